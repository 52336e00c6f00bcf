use crate::Error;
use http::header::{HeaderName, HeaderValue};
use std::io;
use std::io::Write;

/// Max number of headers parsed in a single request/response.
const MAX_HEADERS: usize = 128;

fn version_str(v: http::Version) -> Result<&'static str, Error> {
    match v {
        http::Version::HTTP_10 => Ok("1.0"),
        http::Version::HTTP_11 => Ok("1.1"),
        _ => Err(Error::User(format!("Unsupported http version: {:?}", v))),
    }
}

fn write_headers(
    w: &mut Vec<u8>,
    headers: &http::HeaderMap,
    extra: &http::HeaderMap,
) -> io::Result<()> {
    for (name, value) in headers.iter().chain(extra.iter()) {
        write!(w, "{}: ", name)?;
        w.write_all(value.as_bytes())?;
        write!(w, "\r\n")?;
    }
    write!(w, "\r\n")?;
    Ok(())
}

/// Write an http/1.x request head to a buffer.
///
/// `extra` holds headers decided by the connection, such as body framing,
/// written after the request's own headers.
#[allow(clippy::write_with_newline)]
pub fn write_http1x_req<B>(
    req: &http::Request<B>,
    extra: &http::HeaderMap,
    w: &mut Vec<u8>,
) -> Result<(), Error> {
    let ver = version_str(req.version())?;

    if req.method() == http::Method::CONNECT {
        // CONNECT uses the authority form
        let authority = req
            .uri()
            .authority()
            .map(|a| a.as_str())
            .ok_or_else(|| Error::User("CONNECT request without authority".into()))?;
        write!(w, "CONNECT {} HTTP/{}\r\n", authority, ver)?;
    } else {
        // Path and query
        let pq = req
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        write!(w, "{} {} HTTP/{}\r\n", req.method(), pq, ver)?;
    }

    if !req.headers().contains_key("host") {
        let default_port: u16 = match req.uri().scheme_str() {
            Some("https") => 443,
            Some("http") => 80,
            _ => 0,
        };
        let port = match req.uri().port_u16() {
            Some(p) if p != default_port => p,
            _ => 0,
        };
        // fall back on uri host
        if let Some(h) = req.uri().host() {
            write!(w, "host: {}", h)?;
            if port != 0 {
                write!(w, ":{}", port)?;
            }
            write!(w, "\r\n")?;
        }
    }

    write_headers(w, req.headers(), extra)?;

    trace!("write_http1x_req: {:?}", String::from_utf8_lossy(w));

    Ok(())
}

/// Write an http/1.x response head to a buffer.
#[allow(clippy::write_with_newline)]
pub fn write_http1x_res<B>(
    res: &http::Response<B>,
    extra: &http::HeaderMap,
    w: &mut Vec<u8>,
) -> Result<(), Error> {
    let ver = version_str(res.version())?;

    write!(
        w,
        "HTTP/{} {} {}\r\n",
        ver,
        res.status().as_u16(),
        res.status().canonical_reason().unwrap_or("Unknown")
    )?;

    write_headers(w, res.headers(), extra)?;

    trace!("write_http1x_res: {:?}", String::from_utf8_lossy(w));

    Ok(())
}

fn version_of(v: Option<u8>) -> http::Version {
    match v {
        Some(0) => http::Version::HTTP_10,
        _ => http::Version::HTTP_11,
    }
}

fn invalid<E: Into<Box<dyn std::error::Error + Send + Sync>>>(e: E) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, e)
}

/// Attempt to parse an http/1.x response head.
pub fn try_parse_res(buf: &[u8]) -> Result<Option<(http::Response<()>, usize)>, Error> {
    trace!("try_parse_res: {:?}", String::from_utf8_lossy(buf));

    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut parser = httparse::Response::new(&mut headers);

    let status = parser.parse(buf)?;

    let len = match status {
        httparse::Status::Partial => return Ok(None),
        httparse::Status::Complete(len) => len,
    };

    let mut bld = http::Response::builder().version(version_of(parser.version));

    if let Some(code) = parser.code {
        bld = bld.status(code);
    }

    for head in parser.headers.iter() {
        let name = HeaderName::from_bytes(head.name.as_bytes());
        let value = HeaderValue::from_bytes(head.value);
        match (name, value) {
            (Ok(name), Ok(value)) => bld = bld.header(name, value),
            (Err(e), _) => {
                debug!("Dropping bad header name: {}", e);
            }
            (Ok(name), Err(e)) => {
                debug!("Dropping bad header value ({}): {}", name, e);
            }
        }
    }

    let built = bld.body(()).map_err(invalid)?;

    debug!("try_parse_res success: {:?}", built);

    Ok(Some((built, len)))
}

/// Attempt to parse an http/1.x request head.
pub fn try_parse_req(buf: &[u8]) -> Result<Option<(http::Request<()>, usize)>, Error> {
    trace!("try_parse_req: {:?}", String::from_utf8_lossy(buf));

    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut parser = httparse::Request::new(&mut headers);

    let status = parser.parse(buf)?;

    let len = match status {
        httparse::Status::Partial => return Ok(None),
        httparse::Status::Complete(len) => len,
    };

    let method = parser.method.unwrap_or("GET");
    let path = parser.path.unwrap_or("/");

    let uri = if method == "CONNECT" {
        // authority form, "CONNECT example.com:443 HTTP/1.1"
        http::Uri::builder().authority(path).build()
    } else {
        http::Uri::builder().path_and_query(path).build()
    }
    .map_err(invalid)?;

    let mut bld = http::Request::builder()
        .version(version_of(parser.version))
        .method(method)
        .uri(uri);

    for head in parser.headers.iter() {
        let name = HeaderName::from_bytes(head.name.as_bytes());
        let value = HeaderValue::from_bytes(head.value);
        match (name, value) {
            (Ok(name), Ok(value)) => bld = bld.header(name, value),
            (Err(e), _) => {
                debug!("Dropping bad header name: {}", e);
            }
            (Ok(name), Err(e)) => {
                debug!("Dropping bad header value ({}): {}", name, e);
            }
        }
    }

    let built = bld.body(()).map_err(invalid)?;

    debug!("try_parse_req success: {:?}", built);

    Ok(Some((built, len)))
}
