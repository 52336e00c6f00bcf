use crate::io::BufIo;
use crate::AsyncRead;
use crate::Error;
use bytes::Bytes;
use std::io;
use std::io::Write;

/// Longest chunk size line or trailer line we accept.
const MAX_LINE: usize = 4096;

/// Largest slice handed out per read.
const MAX_READ: usize = 16_384;

/// Encoder for `transfer-encoding: chunked`.
pub struct ChunkedEncoder;

impl ChunkedEncoder {
    pub fn write_chunk(data: &[u8], out: &mut Vec<u8>) -> Result<(), Error> {
        // an empty chunk would be taken as the end.
        if data.is_empty() {
            return Ok(());
        }

        write!(out, "{:x}\r\n", data.len())?;
        out.extend_from_slice(data);
        out.extend_from_slice(b"\r\n");

        Ok(())
    }

    pub fn write_finish(out: &mut Vec<u8>) -> Result<(), Error> {
        out.extend_from_slice(b"0\r\n\r\n");
        Ok(())
    }
}

/// Decoder for `transfer-encoding: chunked`.
#[derive(Debug)]
pub struct ChunkedDecoder {
    /// Bytes left in the current chunk.
    left: u64,
    ended: bool,
}

impl ChunkedDecoder {
    pub fn new() -> Self {
        ChunkedDecoder {
            left: 0,
            ended: false,
        }
    }

    pub fn is_end(&self) -> bool {
        self.ended
    }

    pub(crate) async fn read<R: AsyncRead + Unpin>(
        &mut self,
        io: &mut BufIo<R>,
    ) -> Result<Option<Bytes>, Error> {
        if self.ended {
            return Ok(None);
        }

        if self.left == 0 {
            let line = io.read_line(MAX_LINE).await?;
            self.left = parse_chunk_size(&line)?;

            if self.left == 0 {
                // trailers until an empty line. we don't expose them.
                loop {
                    let line = io.read_line(MAX_LINE).await?;
                    if line.is_empty() {
                        break;
                    }
                    trace!("Dropping chunked trailer: {:?}", String::from_utf8_lossy(&line));
                }
                self.ended = true;
                return Ok(None);
            }
        }

        let max = (self.left.min(MAX_READ as u64)) as usize;
        let chunk = io.read_chunk(max).await?;

        if chunk.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "EOF in chunked body",
            )
            .into());
        }

        self.left -= chunk.len() as u64;

        if self.left == 0 {
            let crlf = io.read_line(MAX_LINE).await?;
            if !crlf.is_empty() {
                return Err(Error::Protocol("Missing CRLF after chunk".into()));
            }
        }

        Ok(Some(chunk))
    }
}

fn parse_chunk_size(line: &[u8]) -> Result<u64, Error> {
    let mut size: u64 = 0;
    let mut digits = 0;

    for &c in line {
        let n = match c {
            b'0'..=b'9' => c - b'0',
            b'a'..=b'f' => c - b'a' + 10,
            b'A'..=b'F' => c - b'A' + 10,
            // chunk extensions
            b';' | b' ' | b'\t' if digits > 0 => break,
            _ => {
                return Err(Error::Protocol(format!(
                    "Unexpected char in chunk size: {:?}",
                    c as char
                )))
            }
        };
        size = size
            .checked_mul(16)
            .and_then(|s| s.checked_add(n as u64))
            .ok_or_else(|| Error::Protocol("Chunk size overflow".into()))?;
        digits += 1;
    }

    if digits == 0 {
        return Err(Error::Protocol("Empty chunk size".into()));
    }

    Ok(size)
}

#[cfg(test)]
mod test {
    use super::*;
    use futures_util::io::{AsyncReadExt, Cursor};

    #[test]
    fn encode_chunks() {
        let mut out = vec![];
        ChunkedEncoder::write_chunk(b"hello", &mut out).unwrap();
        ChunkedEncoder::write_chunk(b"", &mut out).unwrap();
        ChunkedEncoder::write_chunk(&[0; 17], &mut out).unwrap();
        ChunkedEncoder::write_finish(&mut out).unwrap();
        assert!(out.starts_with(b"5\r\nhello\r\n11\r\n"));
        assert!(out.ends_with(b"\r\n0\r\n\r\n"));
    }

    #[test]
    fn decode_with_extension_and_trailer() {
        async_std::task::block_on(async {
            let data = b"3;x=y\r\nabc\r\n2\r\nde\r\n0\r\nexpires: never\r\n\r\nNEXT".to_vec();
            let mut io = BufIo::new(Cursor::new(data));
            let mut dec = ChunkedDecoder::new();

            let mut body = vec![];
            while let Some(chunk) = dec.read(&mut io).await.unwrap() {
                body.extend_from_slice(&chunk);
            }
            assert_eq!(body, b"abcde");
            assert!(dec.is_end());

            let mut rest = vec![];
            io.read_to_end(&mut rest).await.unwrap();
            assert_eq!(rest, b"NEXT");
        });
    }

    #[test]
    fn decode_bad_size() {
        async_std::task::block_on(async {
            let mut io = BufIo::new(Cursor::new(b"HELLO\r\n".to_vec()));
            let mut dec = ChunkedDecoder::new();
            let err = dec.read(&mut io).await.unwrap_err();
            assert_eq!(err.to_string(), "protocol error: Unexpected char in chunk size: 'H'");
        });
    }
}
