use crate::chunked::{ChunkedDecoder, ChunkedEncoder};
use crate::io::BufIo;
use crate::AsyncRead;
use crate::Error;
use bytes::Bytes;
use std::fmt;
use std::io;
use std::str::FromStr;

/// Largest slice handed out per read.
const MAX_READ: usize = 16_384;

/// Limit reading data given configuration from request headers.
pub(crate) enum LimitRead {
    /// Read from a chunked decoder. The decoder will know when there is no more
    /// data to be read.
    ChunkedDecoder(ChunkedDecoder),
    /// Body data is limited by a `content-length` header.
    ContentLength(ContentLengthRead),
    /// Read until the connection closes (HTTP/1.0).
    ReadToEnd(ReadToEnd),
    /// No expected body.
    NoBody,
}

impl LimitRead {
    /// Create an instance from request headers.
    ///
    /// 1. If header `transfer-encoding: chunked` use chunked decoder regardless of other headers.
    /// 2. If header `content-length: <number>` use a reader limited by length
    /// 3. Otherwise read to end for responses, no body for requests.
    pub fn from_headers(headers: &http::HeaderMap, is_server_response: bool) -> Self {
        // https://tools.ietf.org/html/rfc7230#page-31
        // If a message is received with both a Transfer-Encoding and a
        // Content-Length header field, the Transfer-Encoding overrides the
        // Content-Length.
        let ret = if is_chunked(headers) {
            LimitRead::ChunkedDecoder(ChunkedDecoder::new())
        } else if let Some(size) = get_as::<u64>(headers, "content-length") {
            LimitRead::ContentLength(ContentLengthRead::new(size))
        } else if is_server_response {
            // https://tools.ietf.org/html/rfc1945#section-7.2.2
            // Otherwise, the body length is determined by the closing
            // of the connection by the server.
            LimitRead::ReadToEnd(ReadToEnd::new())
        } else {
            // Closing the connection cannot be used to indicate the end of a
            // request body, since it leaves no possibility for the server to send
            // back a response.
            LimitRead::NoBody
        };

        trace!("LimitRead from headers: {:?}", ret);

        ret
    }

    pub fn is_no_body(&self) -> bool {
        match &self {
            LimitRead::ContentLength(r) => r.limit == 0,
            LimitRead::NoBody => true,
            _ => false,
        }
    }

    pub fn is_complete(&self) -> bool {
        match &self {
            LimitRead::ChunkedDecoder(v) => v.is_end(),
            LimitRead::ContentLength(v) => v.is_end(),
            LimitRead::ReadToEnd(v) => v.is_end(),
            LimitRead::NoBody => true,
        }
    }

    pub fn body_size(&self) -> Option<u64> {
        if let LimitRead::ContentLength(v) = &self {
            return Some(v.limit);
        }
        if let LimitRead::NoBody = &self {
            return Some(0);
        }
        None
    }

    /// Whether the transport is in a good state for the next exchange.
    pub fn is_reusable(&self) -> bool {
        self.is_complete() && !matches!(self, LimitRead::ReadToEnd(_))
    }

    /// Read the next slice of body. `None` at the end.
    pub async fn read<R: AsyncRead + Unpin>(
        &mut self,
        recv: &mut BufIo<R>,
    ) -> Result<Option<Bytes>, Error> {
        match self {
            LimitRead::ChunkedDecoder(v) => v.read(recv).await,
            LimitRead::ContentLength(v) => v.read(recv).await,
            LimitRead::ReadToEnd(v) => v.read(recv).await,
            LimitRead::NoBody => Ok(None),
        }
    }
}

/// Reader limited by a set length.
#[derive(Debug)]
pub(crate) struct ContentLengthRead {
    limit: u64,
    total: u64,
}

impl ContentLengthRead {
    fn new(limit: u64) -> Self {
        ContentLengthRead { limit, total: 0 }
    }

    fn is_end(&self) -> bool {
        self.total == self.limit
    }

    async fn read<R: AsyncRead + Unpin>(
        &mut self,
        recv: &mut BufIo<R>,
    ) -> Result<Option<Bytes>, Error> {
        let left = (self.limit - self.total).min(MAX_READ as u64) as usize;

        if left == 0 {
            // Nothing more should be read.
            return Ok(None);
        }

        let chunk = recv.read_chunk(left).await?;

        if chunk.is_empty() {
            // https://tools.ietf.org/html/rfc7230#page-32
            // If the sender closes the connection or the recipient times out
            // before the indicated number of octets are received, the recipient
            // MUST consider the message to be incomplete and close the connection.
            let msg = format!(
                "Partial body received {} bytes and expected {}",
                self.total, self.limit
            );
            trace!("{}", msg);
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, msg).into());
        }

        self.total += chunk.len() as u64;

        Ok(Some(chunk))
    }
}

pub(crate) struct ReadToEnd {
    reached_end: bool,
}

impl ReadToEnd {
    fn new() -> Self {
        ReadToEnd { reached_end: false }
    }

    fn is_end(&self) -> bool {
        self.reached_end
    }

    async fn read<R: AsyncRead + Unpin>(
        &mut self,
        recv: &mut BufIo<R>,
    ) -> Result<Option<Bytes>, Error> {
        if self.reached_end {
            return Ok(None);
        }

        let chunk = recv.read_chunk(MAX_READ).await?;

        if chunk.is_empty() {
            self.reached_end = true;
            return Ok(None);
        }

        Ok(Some(chunk))
    }
}

/// Limit writing data by a strategy configured by request headers.
///
/// This is to ensure we don't write more data than "promised" by request/response
/// header configuration.
pub(crate) enum LimitWrite {
    /// Write data using a chunked encoder.
    ChunkedEncoder,
    /// Limit the write by the `content-length` header.
    ContentLength(ContentLengthWrite),
    /// Body delimited by closing the connection (HTTP/1.0 responses).
    CloseDelimited,
    /// There should be no body.
    NoBody,
}

impl LimitWrite {
    /// Create an instance from headers.
    ///
    /// 1. If header `transfer-encoding: chunked` use chunked encoder regardless of other headers.
    /// 2. If header `content-length: <number>` use a writer limited by length
    /// 3. Otherwise expect no body.
    pub fn from_headers(headers: &http::HeaderMap) -> Self {
        let ret = if is_chunked(headers) {
            LimitWrite::ChunkedEncoder
        } else if let Some(limit) = get_as::<u64>(headers, "content-length") {
            LimitWrite::ContentLength(ContentLengthWrite::new(limit))
        } else {
            LimitWrite::NoBody
        };

        trace!("LimitWrite from headers: {:?}", ret);

        ret
    }

    /// Pick framing for an outgoing body, adding the needed header to `extra`.
    ///
    /// Headers already set by the user win. A known length becomes `content-length`,
    /// otherwise chunked for HTTP/1.1 and close-delimited for HTTP/1.0.
    pub fn for_body(
        headers: &http::HeaderMap,
        length: Option<u64>,
        version: http::Version,
        extra: &mut http::HeaderMap,
    ) -> Self {
        if is_chunked(headers) || headers.contains_key("content-length") {
            return LimitWrite::from_headers(headers);
        }

        match length {
            Some(0) => LimitWrite::NoBody,
            Some(n) => {
                extra.insert("content-length", n.into());
                LimitWrite::ContentLength(ContentLengthWrite::new(n))
            }
            None if version == http::Version::HTTP_10 => LimitWrite::CloseDelimited,
            None => {
                extra.insert(
                    "transfer-encoding",
                    http::HeaderValue::from_static("chunked"),
                );
                LimitWrite::ChunkedEncoder
            }
        }
    }

    pub fn is_no_body(&self) -> bool {
        match self {
            LimitWrite::ContentLength(w) => w.limit == 0,
            LimitWrite::NoBody => true,
            _ => false,
        }
    }

    pub fn is_close_delimited(&self) -> bool {
        matches!(self, LimitWrite::CloseDelimited)
    }

    /// Write some data using this limiter.
    pub fn write(&mut self, data: &[u8], out: &mut Vec<u8>) -> Result<(), Error> {
        match self {
            LimitWrite::ChunkedEncoder => ChunkedEncoder::write_chunk(data, out),
            LimitWrite::ContentLength(v) => v.write(data, out),
            LimitWrite::CloseDelimited => {
                out.extend_from_slice(data);
                Ok(())
            }
            LimitWrite::NoBody => {
                if data.is_empty() {
                    Ok(())
                } else {
                    Err(Error::User("Body data is not expected".into()))
                }
            }
        }
    }

    /// Finish up writing, called once after the all `write()` calls are done.
    pub fn finish(&mut self, out: &mut Vec<u8>) -> Result<(), Error> {
        match self {
            LimitWrite::ChunkedEncoder => ChunkedEncoder::write_finish(out),
            LimitWrite::ContentLength(v) => v.finish(),
            LimitWrite::CloseDelimited => Ok(()),
            LimitWrite::NoBody => Ok(()),
        }
    }
}

/// Limit write by length.
#[derive(Debug)]
pub(crate) struct ContentLengthWrite {
    limit: u64,
    total: u64,
}

impl ContentLengthWrite {
    fn new(limit: u64) -> Self {
        ContentLengthWrite { limit, total: 0 }
    }

    fn write(&mut self, data: &[u8], out: &mut Vec<u8>) -> Result<(), Error> {
        if data.is_empty() {
            return Ok(());
        }
        self.total += data.len() as u64;

        if self.total > self.limit {
            let m = format!(
                "Body data longer than content-length header: {} > {}",
                self.total, self.limit
            );
            return Err(Error::User(m));
        }

        out.extend_from_slice(data);

        Ok(())
    }

    fn finish(&self) -> Result<(), Error> {
        if self.total < self.limit {
            let m = format!(
                "Body data shorter than content-length header: {} < {}",
                self.total, self.limit
            );
            return Err(Error::User(m));
        }
        Ok(())
    }
}

impl fmt::Debug for LimitRead {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self {
            LimitRead::ChunkedDecoder(_) => write!(f, "ChunkedDecoder")?,
            LimitRead::ContentLength(l) => write!(f, "ContentLength({})", l.limit)?,
            LimitRead::ReadToEnd(_) => write!(f, "ReadToEnd")?,
            LimitRead::NoBody => write!(f, "NoBody")?,
        }
        Ok(())
    }
}

impl fmt::Debug for LimitWrite {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            LimitWrite::ChunkedEncoder => write!(f, "ChunkedEncoder")?,
            LimitWrite::ContentLength(l) => write!(f, "ContentLength({})", l.limit)?,
            LimitWrite::CloseDelimited => write!(f, "CloseDelimited")?,
            LimitWrite::NoBody => write!(f, "NoBody")?,
        }
        Ok(())
    }
}

fn is_chunked(headers: &http::HeaderMap) -> bool {
    headers
        .get("transfer-encoding")
        .and_then(|h| h.to_str().ok())
        // https://tools.ietf.org/html/rfc2616#section-4.4
        //
        // If a Transfer-Encoding header field (section 14.41) is present and
        // has any value other than "identity", then the transfer-length is
        // defined by use of the "chunked" transfer-coding
        .map(|h| !h.contains("identity"))
        .unwrap_or(false)
}

/// Whether the connection persists after this exchange, decided from version
/// and `connection` header.
pub fn allow_reuse(headers: &http::HeaderMap, version: http::Version) -> bool {
    if version == http::Version::HTTP_11 {
        is_keep_alive(headers, true)
    } else {
        is_keep_alive(headers, false)
    }
}

fn is_keep_alive(headers: &http::HeaderMap, default: bool) -> bool {
    headers
        .get("connection")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| {
            if h.eq_ignore_ascii_case("keep-alive") {
                Some(true)
            } else if h.eq_ignore_ascii_case("close") {
                Some(false)
            } else {
                None
            }
        })
        .unwrap_or(default)
}

fn get_str<'a>(headers: &'a http::HeaderMap, key: &str) -> Option<&'a str> {
    headers.get(key).and_then(|v| v.to_str().ok())
}

fn get_as<T: FromStr>(headers: &http::HeaderMap, key: &str) -> Option<T> {
    get_str(headers, key).and_then(|v| v.parse().ok())
}
