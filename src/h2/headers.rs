//! Mapping between `http` crate types and HTTP/2 header lists with pseudo headers.

use crate::protocol::Upgrade;
use crate::Error;
use http::header::{HeaderName, HeaderValue};
use http::{Method, Request, Response, Uri, Version};

/// A decoded or to be encoded header list.
pub(crate) type Fields = Vec<(Vec<u8>, Vec<u8>)>;

/// Headers with no meaning in HTTP/2.
const CONNECTION_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-connection",
    "transfer-encoding",
    "upgrade",
    "host",
];

fn push(fields: &mut Fields, name: &str, value: &str) {
    fields.push((name.as_bytes().to_vec(), value.as_bytes().to_vec()));
}

fn push_regular(fields: &mut Fields, headers: &http::HeaderMap) {
    for (name, value) in headers {
        if CONNECTION_HEADERS.contains(&name.as_str()) {
            continue;
        }
        if name == "te" && value != "trailers" {
            continue;
        }
        fields.push((name.as_str().as_bytes().to_vec(), value.as_bytes().to_vec()));
    }
}

/// Header list for a request. A known body length becomes `content-length`.
pub(crate) fn request_fields<B>(req: &Request<B>, length: Option<u64>) -> Result<Fields, Error> {
    let uri = req.uri();
    let mut fields = vec![];

    let authority = uri
        .authority()
        .map(|a| a.as_str().to_string())
        .or_else(|| {
            req.headers()
                .get("host")
                .and_then(|h| h.to_str().ok())
                .map(|h| h.to_string())
        });

    let upgrade = req.extensions().get::<Upgrade>();

    if let Some(upgrade) = upgrade {
        // extended CONNECT, RFC 8441
        push(&mut fields, ":method", "CONNECT");
        push(&mut fields, ":protocol", &upgrade.0);
    } else {
        push(&mut fields, ":method", req.method().as_str());
    }

    if req.method() == Method::CONNECT && upgrade.is_none() {
        let authority = authority
            .ok_or_else(|| Error::User("CONNECT request without authority".into()))?;
        push(&mut fields, ":authority", &authority);
    } else {
        push(&mut fields, ":scheme", uri.scheme_str().unwrap_or("http"));
        if let Some(authority) = &authority {
            push(&mut fields, ":authority", authority);
        }
        let path = uri.path_and_query().map(|p| p.as_str()).unwrap_or("/");
        push(&mut fields, ":path", path);
    }

    push_regular(&mut fields, req.headers());

    if let Some(len) = length {
        if len > 0 && !req.headers().contains_key("content-length") {
            push(&mut fields, "content-length", &len.to_string());
        }
    }

    Ok(fields)
}

/// Header list for a response.
pub(crate) fn response_fields<B>(res: &Response<B>, length: Option<u64>) -> Fields {
    let mut fields = vec![];

    push(&mut fields, ":status", res.status().as_str());
    push_regular(&mut fields, res.headers());

    let status = res.status().as_u16();
    let has_body = status >= 200 && status != 204 && status != 304;

    if let Some(len) = length {
        if has_body && !res.headers().contains_key("content-length") {
            push(&mut fields, "content-length", &len.to_string());
        }
    }

    fields
}

fn malformed(msg: &str) -> Error {
    Error::Protocol(format!("Malformed headers: {}", msg))
}

fn pseudo_value(value: Vec<u8>) -> Result<String, Error> {
    String::from_utf8(value).map_err(|_| malformed("pseudo header not utf-8"))
}

fn set_once(slot: &mut Option<String>, value: Vec<u8>, name: &str) -> Result<(), Error> {
    if slot.is_some() {
        return Err(malformed(&format!("duplicate {}", name)));
    }
    *slot = Some(pseudo_value(value)?);
    Ok(())
}

fn regular_header(
    headers: &mut http::HeaderMap,
    name: &[u8],
    value: &[u8],
) -> Result<(), Error> {
    if name.iter().any(|c| c.is_ascii_uppercase()) {
        return Err(malformed("uppercase header name"));
    }
    let name = HeaderName::from_bytes(name).map_err(|_| malformed("bad header name"))?;
    if CONNECTION_HEADERS.contains(&name.as_str()) && name != "host" {
        return Err(malformed("connection specific header"));
    }
    let value = HeaderValue::from_bytes(value).map_err(|_| malformed("bad header value"))?;
    headers.append(name, value);
    Ok(())
}

/// Validate and convert the initial header list of a request.
///
/// A request needs `:method`, `:scheme` and `:path`, or `:method` CONNECT
/// with `:authority`.
pub(crate) fn parse_request(fields: Fields) -> Result<Request<()>, Error> {
    let mut method = None;
    let mut scheme = None;
    let mut authority = None;
    let mut path = None;
    let mut protocol = None;
    let mut headers = http::HeaderMap::new();

    for (name, value) in fields {
        if name.starts_with(b":") {
            if !headers.is_empty() {
                return Err(malformed("pseudo header after regular header"));
            }
            match &name[..] {
                b":method" => set_once(&mut method, value, ":method")?,
                b":scheme" => set_once(&mut scheme, value, ":scheme")?,
                b":authority" => set_once(&mut authority, value, ":authority")?,
                b":path" => set_once(&mut path, value, ":path")?,
                b":protocol" => set_once(&mut protocol, value, ":protocol")?,
                _ => return Err(malformed("unknown pseudo header")),
            }
        } else {
            regular_header(&mut headers, &name, &value)?;
        }
    }

    let method = method.ok_or_else(|| malformed("missing :method"))?;
    let method = Method::from_bytes(method.as_bytes()).map_err(|_| malformed("bad :method"))?;

    let uri = if method == Method::CONNECT && protocol.is_none() {
        if scheme.is_some() || path.is_some() {
            return Err(malformed("CONNECT with :scheme or :path"));
        }
        let authority = authority.ok_or_else(|| malformed("CONNECT without :authority"))?;
        Uri::builder().authority(authority.as_str()).build()
    } else {
        let scheme = scheme.ok_or_else(|| malformed("missing :scheme"))?;
        let path = path.ok_or_else(|| malformed("missing :path"))?;
        if path.is_empty() {
            return Err(malformed("empty :path"));
        }
        let bld = Uri::builder().path_and_query(path.as_str());
        match authority {
            Some(a) => bld.scheme(scheme.as_str()).authority(a.as_str()).build(),
            None => bld.build(),
        }
    }
    .map_err(|_| malformed("bad uri"))?;

    let mut req = Request::builder()
        .method(method)
        .uri(uri)
        .version(Version::HTTP_2)
        .body(())?;

    *req.headers_mut() = headers;

    if let Some(p) = protocol {
        req.extensions_mut().insert(Upgrade(p));
    }

    Ok(req)
}

/// Validate and convert the header list of a response. Needs `:status`.
pub(crate) fn parse_response(fields: Fields) -> Result<Response<()>, Error> {
    let mut status = None;
    let mut headers = http::HeaderMap::new();

    for (name, value) in fields {
        if name.starts_with(b":") {
            if !headers.is_empty() {
                return Err(malformed("pseudo header after regular header"));
            }
            match &name[..] {
                b":status" => set_once(&mut status, value, ":status")?,
                _ => return Err(malformed("unknown pseudo header")),
            }
        } else {
            regular_header(&mut headers, &name, &value)?;
        }
    }

    let status = status.ok_or_else(|| malformed("missing :status"))?;
    let status = http::StatusCode::from_bytes(status.as_bytes())
        .map_err(|_| malformed("bad :status"))?;

    let mut res = Response::builder()
        .status(status)
        .version(Version::HTTP_2)
        .body(())?;

    *res.headers_mut() = headers;

    Ok(res)
}

/// `content-length` of a received header map.
pub(crate) fn content_length(headers: &http::HeaderMap) -> Option<u64> {
    headers
        .get("content-length")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod test {
    use super::*;

    fn f(list: &[(&str, &str)]) -> Fields {
        list.iter()
            .map(|(k, v)| (k.as_bytes().to_vec(), v.as_bytes().to_vec()))
            .collect()
    }

    #[test]
    fn request_pseudo_headers_first() {
        let req = Request::post("https://example.com/upload?x=1")
            .header("connection", "keep-alive")
            .header("x-foo", "bar")
            .body(())
            .unwrap();

        let fields = request_fields(&req, Some(3)).unwrap();
        assert_eq!(
            fields,
            f(&[
                (":method", "POST"),
                (":scheme", "https"),
                (":authority", "example.com"),
                (":path", "/upload?x=1"),
                ("x-foo", "bar"),
                ("content-length", "3"),
            ])
        );
    }

    #[test]
    fn connect_request_has_authority_only() {
        let req = Request::connect("example.com:443").body(()).unwrap();
        let fields = request_fields(&req, None).unwrap();
        assert_eq!(
            fields,
            f(&[(":method", "CONNECT"), (":authority", "example.com:443")])
        );

        let parsed = parse_request(fields).unwrap();
        assert_eq!(parsed.method(), Method::CONNECT);
        assert_eq!(parsed.uri().authority().unwrap(), "example.com:443");
    }

    #[test]
    fn parse_request_roundtrip() {
        let req = parse_request(f(&[
            (":method", "GET"),
            (":scheme", "http"),
            (":authority", "localhost"),
            (":path", "/index.html"),
            ("accept", "*/*"),
        ]))
        .unwrap();
        assert_eq!(req.uri(), "http://localhost/index.html");
        assert_eq!(req.headers()["accept"], "*/*");
    }

    #[test]
    fn request_missing_path_is_malformed() {
        let err = parse_request(f(&[(":method", "GET"), (":scheme", "http")])).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Protocol);
    }

    #[test]
    fn pseudo_after_regular_is_malformed() {
        assert!(parse_response(f(&[("x", "y"), (":status", "200")])).is_err());
    }

    #[test]
    fn response_status() {
        let res = parse_response(f(&[(":status", "404"), ("content-length", "0")])).unwrap();
        assert_eq!(res.status(), 404);
        assert_eq!(content_length(res.headers()), Some(0));
    }
}
