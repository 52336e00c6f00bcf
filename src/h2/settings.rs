use super::frame::read_u32;
use crate::Error;

const HEADER_TABLE_SIZE: u16 = 0x1;
const ENABLE_PUSH: u16 = 0x2;
const MAX_CONCURRENT_STREAMS: u16 = 0x3;
const INITIAL_WINDOW_SIZE: u16 = 0x4;
const MAX_FRAME_SIZE: u16 = 0x5;
const MAX_HEADER_LIST_SIZE: u16 = 0x6;

/// Default initial flow-control window.
pub const DEFAULT_WINDOW_SIZE: u32 = 65_535;

/// Smallest (and default) max frame size.
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 16_384;

const MAX_MAX_FRAME_SIZE: u32 = 16_777_215;

/// Streams assumed available before the peer says otherwise.
pub const DEFAULT_MAX_CONCURRENT_STREAMS: u32 = 100;

/// One parameter of a SETTINGS frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Param {
    HeaderTableSize(u32),
    EnablePush(bool),
    MaxConcurrentStreams(u32),
    InitialWindowSize(u32),
    MaxFrameSize(u32),
    MaxHeaderListSize(u32),
}

impl Param {
    pub(crate) fn encode(&self, buf: &mut Vec<u8>) {
        let (id, value) = match *self {
            Param::HeaderTableSize(v) => (HEADER_TABLE_SIZE, v),
            Param::EnablePush(v) => (ENABLE_PUSH, v as u32),
            Param::MaxConcurrentStreams(v) => (MAX_CONCURRENT_STREAMS, v),
            Param::InitialWindowSize(v) => (INITIAL_WINDOW_SIZE, v),
            Param::MaxFrameSize(v) => (MAX_FRAME_SIZE, v),
            Param::MaxHeaderListSize(v) => (MAX_HEADER_LIST_SIZE, v),
        };
        buf.extend_from_slice(&id.to_be_bytes());
        buf.extend_from_slice(&value.to_be_bytes());
    }

    /// Decode one 6 byte parameter. Unknown identifiers are `None` and must be ignored.
    pub(crate) fn decode(buf: &[u8]) -> Option<Result<Param, Error>> {
        let id = (u16::from(buf[0]) << 8) | u16::from(buf[1]);
        let value = read_u32(&buf[2..]);

        let param = match id {
            HEADER_TABLE_SIZE => Param::HeaderTableSize(value),
            ENABLE_PUSH => {
                if value > 1 {
                    return Some(Err(Error::Protocol("ENABLE_PUSH must be 0 or 1".into())));
                }
                Param::EnablePush(value == 1)
            }
            MAX_CONCURRENT_STREAMS => Param::MaxConcurrentStreams(value),
            INITIAL_WINDOW_SIZE => {
                if value > 0x7fff_ffff {
                    return Some(Err(Error::Protocol(
                        "INITIAL_WINDOW_SIZE above max window".into(),
                    )));
                }
                Param::InitialWindowSize(value)
            }
            MAX_FRAME_SIZE => {
                if !(DEFAULT_MAX_FRAME_SIZE..=MAX_MAX_FRAME_SIZE).contains(&value) {
                    return Some(Err(Error::Protocol("MAX_FRAME_SIZE out of range".into())));
                }
                Param::MaxFrameSize(value)
            }
            MAX_HEADER_LIST_SIZE => Param::MaxHeaderListSize(value),
            _ => return None,
        };

        Some(Ok(param))
    }
}

/// HTTP/2 settings of one side of a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Max number of streams the peer may open towards us. `None` is unlimited.
    pub max_concurrent_streams: Option<u32>,
    /// Initial flow-control window of each stream.
    pub initial_window_size: u32,
    /// Largest frame payload accepted.
    pub max_frame_size: u32,
    /// Whether server push is allowed.
    pub enable_push: bool,
    /// HPACK dynamic table size.
    pub header_table_size: u32,
    /// Advisory max size of a header list.
    pub max_header_list_size: Option<u32>,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            max_concurrent_streams: None,
            initial_window_size: DEFAULT_WINDOW_SIZE,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            enable_push: true,
            header_table_size: 4096,
            max_header_list_size: None,
        }
    }
}

impl Settings {
    /// Settings we send as a client. Push is never accepted.
    pub fn client() -> Self {
        Settings {
            enable_push: false,
            ..Default::default()
        }
    }

    /// Settings we send as a server.
    pub fn server() -> Self {
        Settings {
            max_concurrent_streams: Some(DEFAULT_MAX_CONCURRENT_STREAMS),
            enable_push: false,
            ..Default::default()
        }
    }

    /// Builder style setter for max concurrent streams.
    pub fn max_concurrent_streams(mut self, v: u32) -> Self {
        self.max_concurrent_streams = Some(v);
        self
    }

    /// Builder style setter for the initial stream window.
    pub fn initial_window_size(mut self, v: u32) -> Self {
        self.initial_window_size = v.min(0x7fff_ffff);
        self
    }

    /// Builder style setter for max frame size.
    pub fn max_frame_size(mut self, v: u32) -> Self {
        self.max_frame_size = v.max(DEFAULT_MAX_FRAME_SIZE).min(MAX_MAX_FRAME_SIZE);
        self
    }

    /// Parameters differing from the protocol defaults.
    pub(crate) fn params(&self) -> Vec<Param> {
        let def = Settings::default();
        let mut params = vec![];

        if let Some(v) = self.max_concurrent_streams {
            params.push(Param::MaxConcurrentStreams(v));
        }
        if self.initial_window_size != def.initial_window_size {
            params.push(Param::InitialWindowSize(self.initial_window_size));
        }
        if self.max_frame_size != def.max_frame_size {
            params.push(Param::MaxFrameSize(self.max_frame_size));
        }
        if self.enable_push != def.enable_push {
            params.push(Param::EnablePush(self.enable_push));
        }
        if self.header_table_size != def.header_table_size {
            params.push(Param::HeaderTableSize(self.header_table_size));
        }
        if let Some(v) = self.max_header_list_size {
            params.push(Param::MaxHeaderListSize(v));
        }

        params
    }

    /// Apply parameters received from the peer.
    pub(crate) fn apply(&mut self, params: &[Param]) {
        for p in params {
            match *p {
                Param::HeaderTableSize(v) => self.header_table_size = v,
                Param::EnablePush(v) => self.enable_push = v,
                Param::MaxConcurrentStreams(v) => self.max_concurrent_streams = Some(v),
                Param::InitialWindowSize(v) => self.initial_window_size = v,
                Param::MaxFrameSize(v) => self.max_frame_size = v,
                Param::MaxHeaderListSize(v) => self.max_header_list_size = Some(v),
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn params_apply_onto_defaults() {
        let local = Settings::server().initial_window_size(10);
        let params = local.params();

        let mut buf = vec![];
        for p in &params {
            p.encode(&mut buf);
        }
        let decoded: Vec<Param> = buf
            .chunks(6)
            .filter_map(Param::decode)
            .collect::<Result<_, _>>()
            .unwrap();

        let mut remote = Settings::default();
        remote.apply(&decoded);
        assert_eq!(remote, local);
    }

    #[test]
    fn unknown_param_ignored() {
        assert!(Param::decode(&[0, 0x42, 0, 0, 0, 1]).is_none());
    }

    #[test]
    fn bad_frame_size_rejected() {
        let res = Param::decode(&[0, 0x5, 0, 0, 0, 1]).unwrap();
        assert!(res.is_err());
    }
}
