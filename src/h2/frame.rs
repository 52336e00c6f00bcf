//! HTTP/2 frame encoding and decoding.
//!
//! Every frame starts with a fixed 9-byte header:
//! ```text
//! +-----------------------------------------------+
//! |                 Length (24)                   |
//! +---------------+---------------+---------------+
//! |   Type (8)    |   Flags (8)   |
//! +-+-------------+---------------+---------------+
//! |R|                 Stream Identifier (31)      |
//! +-+---------------------------------------------+
//! |                   Frame Payload ...           |
//! +-----------------------------------------------+
//! ```

use super::settings::Param;
use crate::AsyncRead;
use crate::Error;
use bytes::Bytes;
use futures_util::io::AsyncReadExt;

/// Connection preface sent by the client.
pub const PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

/// Frame header size in bytes.
pub const HEADER_LEN: usize = 9;

const DATA: u8 = 0x0;
const HEADERS: u8 = 0x1;
const PRIORITY: u8 = 0x2;
const RST_STREAM: u8 = 0x3;
const SETTINGS: u8 = 0x4;
const PUSH_PROMISE: u8 = 0x5;
const PING: u8 = 0x6;
const GOAWAY: u8 = 0x7;
const WINDOW_UPDATE: u8 = 0x8;
const CONTINUATION: u8 = 0x9;

const END_STREAM: u8 = 0x1;
const ACK: u8 = 0x1;
const END_HEADERS: u8 = 0x4;
const PADDED: u8 = 0x8;
const PRIORITY_FLAG: u8 = 0x20;

/// Error codes of RST_STREAM and GOAWAY.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reason {
    NoError,
    ProtocolError,
    InternalError,
    FlowControlError,
    SettingsTimeout,
    StreamClosed,
    FrameSizeError,
    RefusedStream,
    Cancel,
    CompressionError,
    ConnectError,
    EnhanceYourCalm,
    InadequateSecurity,
    Http11Required,
}

impl Reason {
    pub fn from_u32(v: u32) -> Self {
        match v {
            0x0 => Reason::NoError,
            0x1 => Reason::ProtocolError,
            0x2 => Reason::InternalError,
            0x3 => Reason::FlowControlError,
            0x4 => Reason::SettingsTimeout,
            0x5 => Reason::StreamClosed,
            0x6 => Reason::FrameSizeError,
            0x7 => Reason::RefusedStream,
            0x8 => Reason::Cancel,
            0x9 => Reason::CompressionError,
            0xa => Reason::ConnectError,
            0xb => Reason::EnhanceYourCalm,
            0xc => Reason::InadequateSecurity,
            0xd => Reason::Http11Required,
            // unknown codes must not trigger special behavior
            _ => Reason::InternalError,
        }
    }

    pub fn as_u32(self) -> u32 {
        match self {
            Reason::NoError => 0x0,
            Reason::ProtocolError => 0x1,
            Reason::InternalError => 0x2,
            Reason::FlowControlError => 0x3,
            Reason::SettingsTimeout => 0x4,
            Reason::StreamClosed => 0x5,
            Reason::FrameSizeError => 0x6,
            Reason::RefusedStream => 0x7,
            Reason::Cancel => 0x8,
            Reason::CompressionError => 0x9,
            Reason::ConnectError => 0xa,
            Reason::EnhanceYourCalm => 0xb,
            Reason::InadequateSecurity => 0xc,
            Reason::Http11Required => 0xd,
        }
    }
}

/// An HTTP/2 frame.
#[derive(Debug, Clone)]
pub enum Frame {
    Data {
        stream_id: u32,
        payload: Bytes,
        end_stream: bool,
        /// Length counted against flow control, including padding.
        flow_len: u32,
    },
    Headers {
        stream_id: u32,
        block: Vec<u8>,
        end_stream: bool,
        end_headers: bool,
    },
    Priority {
        stream_id: u32,
    },
    RstStream {
        stream_id: u32,
        reason: Reason,
    },
    Settings {
        ack: bool,
        params: Vec<Param>,
    },
    PushPromise {
        stream_id: u32,
        promised_id: u32,
    },
    Ping {
        ack: bool,
        payload: [u8; 8],
    },
    GoAway {
        last_stream_id: u32,
        reason: Reason,
    },
    WindowUpdate {
        stream_id: u32,
        increment: u32,
    },
    Continuation {
        stream_id: u32,
        block: Vec<u8>,
        end_headers: bool,
    },
    /// Unknown frame types are ignored.
    Unknown {
        kind: u8,
        stream_id: u32,
    },
}

impl Frame {
    pub fn data(stream_id: u32, payload: Bytes, end_stream: bool) -> Self {
        let flow_len = payload.len() as u32;
        Frame::Data {
            stream_id,
            payload,
            end_stream,
            flow_len,
        }
    }

    pub fn stream_id(&self) -> u32 {
        match self {
            Frame::Data { stream_id, .. }
            | Frame::Headers { stream_id, .. }
            | Frame::Priority { stream_id }
            | Frame::RstStream { stream_id, .. }
            | Frame::PushPromise { stream_id, .. }
            | Frame::WindowUpdate { stream_id, .. }
            | Frame::Continuation { stream_id, .. }
            | Frame::Unknown { stream_id, .. } => *stream_id,
            Frame::Settings { .. } | Frame::Ping { .. } | Frame::GoAway { .. } => 0,
        }
    }

    /// Encode this frame, header and payload, into `buf`.
    pub fn encode(&self, buf: &mut Vec<u8>) {
        match self {
            Frame::Data {
                stream_id,
                payload,
                end_stream,
                ..
            } => {
                let flags = if *end_stream { END_STREAM } else { 0 };
                encode_header(buf, payload.len(), DATA, flags, *stream_id);
                buf.extend_from_slice(payload);
            }
            Frame::Headers {
                stream_id,
                block,
                end_stream,
                end_headers,
            } => {
                let mut flags = 0;
                if *end_stream {
                    flags |= END_STREAM;
                }
                if *end_headers {
                    flags |= END_HEADERS;
                }
                encode_header(buf, block.len(), HEADERS, flags, *stream_id);
                buf.extend_from_slice(block);
            }
            Frame::Priority { stream_id } => {
                encode_header(buf, 5, PRIORITY, 0, *stream_id);
                // no dependency, default weight
                buf.extend_from_slice(&[0, 0, 0, 0, 15]);
            }
            Frame::RstStream { stream_id, reason } => {
                encode_header(buf, 4, RST_STREAM, 0, *stream_id);
                buf.extend_from_slice(&reason.as_u32().to_be_bytes());
            }
            Frame::Settings { ack, params } => {
                if *ack {
                    encode_header(buf, 0, SETTINGS, ACK, 0);
                } else {
                    encode_header(buf, params.len() * 6, SETTINGS, 0, 0);
                    for p in params {
                        p.encode(buf);
                    }
                }
            }
            Frame::PushPromise {
                stream_id,
                promised_id,
            } => {
                encode_header(buf, 4, PUSH_PROMISE, END_HEADERS, *stream_id);
                buf.extend_from_slice(&(promised_id & 0x7fff_ffff).to_be_bytes());
            }
            Frame::Ping { ack, payload } => {
                let flags = if *ack { ACK } else { 0 };
                encode_header(buf, 8, PING, flags, 0);
                buf.extend_from_slice(payload);
            }
            Frame::GoAway {
                last_stream_id,
                reason,
            } => {
                encode_header(buf, 8, GOAWAY, 0, 0);
                buf.extend_from_slice(&(last_stream_id & 0x7fff_ffff).to_be_bytes());
                buf.extend_from_slice(&reason.as_u32().to_be_bytes());
            }
            Frame::WindowUpdate {
                stream_id,
                increment,
            } => {
                encode_header(buf, 4, WINDOW_UPDATE, 0, *stream_id);
                buf.extend_from_slice(&(increment & 0x7fff_ffff).to_be_bytes());
            }
            Frame::Continuation {
                stream_id,
                block,
                end_headers,
            } => {
                let flags = if *end_headers { END_HEADERS } else { 0 };
                encode_header(buf, block.len(), CONTINUATION, flags, *stream_id);
                buf.extend_from_slice(block);
            }
            Frame::Unknown { kind, stream_id } => {
                encode_header(buf, 0, *kind, 0, *stream_id);
            }
        }
    }

    /// Decode a frame from its header and complete payload.
    pub fn decode(head: &[u8; HEADER_LEN], payload: Vec<u8>) -> Result<Frame, Error> {
        let kind = head[3];
        let flags = head[4];
        let stream_id = read_u32(&head[5..]) & 0x7fff_ffff;

        let frame = match kind {
            DATA => {
                require_stream(stream_id, "DATA")?;
                let flow_len = payload.len() as u32;
                let payload = strip_padding(payload, flags)?;
                Frame::Data {
                    stream_id,
                    payload: payload.into(),
                    end_stream: flags & END_STREAM != 0,
                    flow_len,
                }
            }
            HEADERS => {
                require_stream(stream_id, "HEADERS")?;
                let mut block = strip_padding(payload, flags)?;
                if flags & PRIORITY_FLAG != 0 {
                    if block.len() < 5 {
                        return Err(protocol("HEADERS priority too short"));
                    }
                    block.drain(..5);
                }
                Frame::Headers {
                    stream_id,
                    block,
                    end_stream: flags & END_STREAM != 0,
                    end_headers: flags & END_HEADERS != 0,
                }
            }
            PRIORITY => {
                require_stream(stream_id, "PRIORITY")?;
                require_len(&payload, 5, "PRIORITY")?;
                Frame::Priority { stream_id }
            }
            RST_STREAM => {
                require_stream(stream_id, "RST_STREAM")?;
                require_len(&payload, 4, "RST_STREAM")?;
                Frame::RstStream {
                    stream_id,
                    reason: Reason::from_u32(read_u32(&payload)),
                }
            }
            SETTINGS => {
                if stream_id != 0 {
                    return Err(protocol("SETTINGS on non-zero stream"));
                }
                let ack = flags & ACK != 0;
                if ack && !payload.is_empty() {
                    return Err(protocol("SETTINGS ack with payload"));
                }
                if payload.len() % 6 != 0 {
                    return Err(protocol("SETTINGS length not a multiple of 6"));
                }
                let params = payload
                    .chunks(6)
                    .filter_map(Param::decode)
                    .collect::<Result<Vec<_>, _>>()?;
                Frame::Settings { ack, params }
            }
            PUSH_PROMISE => {
                require_stream(stream_id, "PUSH_PROMISE")?;
                let block = strip_padding(payload, flags)?;
                if block.len() < 4 {
                    return Err(protocol("PUSH_PROMISE too short"));
                }
                Frame::PushPromise {
                    stream_id,
                    promised_id: read_u32(&block) & 0x7fff_ffff,
                }
            }
            PING => {
                if stream_id != 0 {
                    return Err(protocol("PING on non-zero stream"));
                }
                require_len(&payload, 8, "PING")?;
                let mut data = [0; 8];
                data.copy_from_slice(&payload);
                Frame::Ping {
                    ack: flags & ACK != 0,
                    payload: data,
                }
            }
            GOAWAY => {
                if stream_id != 0 {
                    return Err(protocol("GOAWAY on non-zero stream"));
                }
                if payload.len() < 8 {
                    return Err(protocol("GOAWAY too short"));
                }
                Frame::GoAway {
                    last_stream_id: read_u32(&payload) & 0x7fff_ffff,
                    reason: Reason::from_u32(read_u32(&payload[4..])),
                }
            }
            WINDOW_UPDATE => {
                require_len(&payload, 4, "WINDOW_UPDATE")?;
                Frame::WindowUpdate {
                    stream_id,
                    increment: read_u32(&payload) & 0x7fff_ffff,
                }
            }
            CONTINUATION => {
                require_stream(stream_id, "CONTINUATION")?;
                Frame::Continuation {
                    stream_id,
                    block: payload,
                    end_headers: flags & END_HEADERS != 0,
                }
            }
            _ => Frame::Unknown { kind, stream_id },
        };

        Ok(frame)
    }
}

/// Read one frame. `None` if the transport is closed between frames.
pub async fn read_frame<R: AsyncRead + Unpin>(
    r: &mut R,
    max_frame_size: u32,
) -> Result<Option<Frame>, Error> {
    let mut head = [0; HEADER_LEN];

    let amount = r.read(&mut head).await?;
    if amount == 0 {
        return Ok(None);
    }
    r.read_exact(&mut head[amount..]).await?;

    let len = (u32::from(head[0]) << 16) | (u32::from(head[1]) << 8) | u32::from(head[2]);

    if len > max_frame_size {
        return Err(protocol(&format!(
            "Frame size {} exceeds max {}",
            len, max_frame_size
        )));
    }

    let mut payload = vec![0; len as usize];
    r.read_exact(&mut payload).await?;

    let frame = Frame::decode(&head, payload)?;

    trace!("Read frame: {:?}", frame);

    Ok(Some(frame))
}

fn encode_header(buf: &mut Vec<u8>, len: usize, kind: u8, flags: u8, stream_id: u32) {
    let len = len as u32;
    buf.push((len >> 16) as u8);
    buf.push((len >> 8) as u8);
    buf.push(len as u8);
    buf.push(kind);
    buf.push(flags);
    buf.extend_from_slice(&(stream_id & 0x7fff_ffff).to_be_bytes());
}

pub(crate) fn read_u32(buf: &[u8]) -> u32 {
    (u32::from(buf[0]) << 24)
        | (u32::from(buf[1]) << 16)
        | (u32::from(buf[2]) << 8)
        | u32::from(buf[3])
}

fn strip_padding(mut payload: Vec<u8>, flags: u8) -> Result<Vec<u8>, Error> {
    if flags & PADDED == 0 {
        return Ok(payload);
    }
    if payload.is_empty() {
        return Err(protocol("Padded frame without pad length"));
    }
    let pad = payload[0] as usize;
    if pad >= payload.len() {
        return Err(protocol("Padding exceeds payload"));
    }
    payload.truncate(payload.len() - pad);
    payload.remove(0);
    Ok(payload)
}

fn require_stream(stream_id: u32, name: &str) -> Result<(), Error> {
    if stream_id == 0 {
        return Err(protocol(&format!("{} on stream 0", name)));
    }
    Ok(())
}

fn require_len(payload: &[u8], len: usize, name: &str) -> Result<(), Error> {
    if payload.len() != len {
        return Err(protocol(&format!("{} with bad length {}", name, payload.len())));
    }
    Ok(())
}

fn protocol(msg: &str) -> Error {
    Error::Protocol(msg.to_string())
}

#[cfg(test)]
mod test {
    use super::*;
    use futures_util::io::Cursor;

    fn decode_one(buf: Vec<u8>) -> Frame {
        async_std::task::block_on(async {
            read_frame(&mut Cursor::new(buf), 16_384)
                .await
                .unwrap()
                .unwrap()
        })
    }

    #[test]
    fn data_frame() {
        let mut buf = vec![];
        Frame::data(3, "hello".into(), true).encode(&mut buf);
        assert_eq!(&buf[..9], &[0, 0, 5, 0, 1, 0, 0, 0, 3]);

        match decode_one(buf) {
            Frame::Data {
                stream_id,
                payload,
                end_stream,
                flow_len,
            } => {
                assert_eq!(stream_id, 3);
                assert_eq!(payload, "hello");
                assert!(end_stream);
                assert_eq!(flow_len, 5);
            }
            f => panic!("unexpected {:?}", f),
        }
    }

    #[test]
    fn padded_data_counts_padding() {
        // pad length 2, "ab", two bytes padding
        let buf = vec![0, 0, 5, 0, 0x8, 0, 0, 0, 1, 2, b'a', b'b', 0, 0];
        match decode_one(buf) {
            Frame::Data {
                payload, flow_len, ..
            } => {
                assert_eq!(payload, "ab");
                assert_eq!(flow_len, 5);
            }
            f => panic!("unexpected {:?}", f),
        }
    }

    #[test]
    fn goaway_and_rst() {
        let mut buf = vec![];
        Frame::GoAway {
            last_stream_id: 7,
            reason: Reason::EnhanceYourCalm,
        }
        .encode(&mut buf);
        match decode_one(buf) {
            Frame::GoAway {
                last_stream_id,
                reason,
            } => {
                assert_eq!(last_stream_id, 7);
                assert_eq!(reason, Reason::EnhanceYourCalm);
            }
            f => panic!("unexpected {:?}", f),
        }

        let mut buf = vec![];
        Frame::RstStream {
            stream_id: 1,
            reason: Reason::RefusedStream,
        }
        .encode(&mut buf);
        assert!(matches!(
            decode_one(buf),
            Frame::RstStream {
                stream_id: 1,
                reason: Reason::RefusedStream
            }
        ));
    }

    #[test]
    fn data_on_stream_zero_is_protocol_error() {
        let buf = vec![0, 0, 1, 0, 0, 0, 0, 0, 0, b'x'];
        let err = async_std::task::block_on(read_frame(&mut Cursor::new(buf), 16_384))
            .unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Protocol);
    }

    #[test]
    fn oversized_frame_rejected() {
        let buf = vec![0, 0x40, 1, 0, 0, 0, 0, 0, 1];
        assert!(async_std::task::block_on(read_frame(&mut Cursor::new(buf), 16_384)).is_err());
    }

    #[test]
    fn clean_eof_between_frames() {
        let res = async_std::task::block_on(read_frame(&mut Cursor::new(vec![]), 16_384));
        assert!(res.unwrap().is_none());
    }
}
