use super::{upgrade_of, write_body, Connection, Transport, MAX_HEAD};
use crate::body::{Body, HijackFn, Pipe, Writable, DEFAULT_BOUND};
use crate::http11::{try_parse_req, write_http1x_res};
use crate::io::{BoxIo, BufIo, Duplex};
use crate::limit::{allow_reuse, LimitRead, LimitWrite};
use crate::protocol::Upgrade;
use crate::server::Handler;
use crate::Error;
use futures_util::future::join;
use futures_util::io::{AsyncWriteExt, ReadHalf, WriteHalf};
use http::{HeaderMap, HeaderValue, Method, StatusCode, Version};
use std::sync::Arc;

/// What to do with the transport after a response head is written.
enum Outcome {
    /// Exchange is done. `true` if the response allows keep-alive.
    Done(bool),
    /// Give the raw transport to a handler.
    Hijack(HijackFn),
    /// Pipe the transport: response body out, request body in.
    Tunnel(Body),
}

pub(crate) async fn serve(
    conn: &Connection,
    mut t: Transport,
    handler: Arc<dyn Handler>,
) -> Result<(), Error> {
    loop {
        let head = match t.reader.read_head(MAX_HEAD).await? {
            Some(v) => v,
            None => {
                trace!("Client closed connection");
                break;
            }
        };

        conn.started();

        let mut req = match try_parse_req(&head) {
            Ok(Some((req, _))) => req,
            Ok(None) | Err(_) => {
                debug!("Bad request head: {:?}", String::from_utf8_lossy(&head));
                bad_request(&mut t.writer).await?;
                break;
            }
        };

        let version = req.version();
        let is_head = req.method() == Method::HEAD;
        let persistent = allow_reuse(req.headers(), version);

        let upgrade = upgrade_of(req.headers());
        let tunnel = req.method() == Method::CONNECT || upgrade.is_some();

        if let Some(proto) = upgrade {
            req.extensions_mut().insert(Upgrade(proto));
        }

        // request body, fed from the transport or by the tunnel.
        let (body, feed_into, limit) = if tunnel {
            let w = Writable::new(DEFAULT_BOUND);
            (Body::from(w.clone()), Some(w), LimitRead::NoBody)
        } else {
            let limit = LimitRead::from_headers(req.headers(), false);
            if limit.is_no_body() {
                (Body::empty(), None, limit)
            } else {
                let w = match limit.body_size() {
                    Some(n) => Writable::with_length(DEFAULT_BOUND, n),
                    None => Writable::new(DEFAULT_BOUND),
                };
                (Body::from(w.clone()), Some(w), limit)
            }
        };

        let req = req.map(|_| body);

        let tunnel_input = if tunnel { feed_into.clone() } else { None };
        let feed_into = if tunnel { None } else { feed_into };

        let Transport { reader, writer } = &mut t;

        let (fed, outcome) = join(
            feed(reader, limit, feed_into),
            respond(writer, &*handler, req, version, is_head, persistent),
        )
        .await;

        let complete = fed?;

        match outcome? {
            Outcome::Done(keep_alive) => {
                if !(keep_alive && complete) {
                    trace!("Connection not persistent");
                    break;
                }
            }

            Outcome::Hijack(f) => {
                debug!("Hand transport to hijack handler");
                conn.detach();
                let Transport { reader, writer } = t;
                return f(Box::new(Duplex::new(reader, writer))).await;
            }

            Outcome::Tunnel(output) => {
                debug!("Tunnel transport");
                conn.detach();
                let input = tunnel_input.unwrap_or_else(|| Writable::new(DEFAULT_BOUND));
                let Transport { reader, writer } = t;
                Pipe::new(Duplex::new(reader, writer), output, input)
                    .join()
                    .await;
                return Ok(());
            }
        }

        async_std::task::yield_now().await;
    }

    if let Err(e) = t.writer.close().await {
        trace!("Close failed: {}", e);
    }

    Ok(())
}

/// Feed a request body from the transport.
///
/// If the handler drops the body before the end, the rest is read and
/// discarded so the next request head can be found. Returns whether the
/// body was read to its end.
async fn feed(
    reader: &mut BufIo<ReadHalf<BoxIo>>,
    mut limit: LimitRead,
    into: Option<Writable>,
) -> Result<bool, Error> {
    let into = match into {
        Some(v) => v,
        None => return Ok(limit.is_complete()),
    };

    let mut discard = false;

    loop {
        match limit.read(reader).await {
            Ok(Some(chunk)) => {
                if !discard && into.write(chunk).await.is_err() {
                    trace!("Request body dropped, discard rest");
                    discard = true;
                }
            }
            Ok(None) => {
                into.close(None);
                return Ok(limit.is_reusable());
            }
            Err(e) => {
                into.close(Some(e.duplicate()));
                return Err(e);
            }
        }
    }
}

async fn respond(
    writer: &mut WriteHalf<BoxIo>,
    handler: &dyn Handler,
    req: http::Request<Body>,
    version: Version,
    is_head: bool,
    persistent: bool,
) -> Result<Outcome, Error> {
    let tunnel = req.method() == Method::CONNECT || req.extensions().get::<Upgrade>().is_some();

    let res = match handler.call(req).await {
        Ok(v) => v,
        Err(e) => {
            warn!("Handler failed: {}", e);
            http::Response::builder()
                .status(StatusCode::INTERNAL_SERVER_ERROR)
                .body(Body::empty())?
        }
    };

    let (mut parts, mut body) = res.into_parts();
    parts.version = version;

    let mut extra = HeaderMap::new();

    if let Some((f, _input)) = body.take_hijack() {
        write_head(writer, &http::Response::from_parts(parts, ()), &extra).await?;
        return Ok(Outcome::Hijack(f));
    }

    let status = parts.status;

    if tunnel && (status.is_success() || status == StatusCode::SWITCHING_PROTOCOLS) {
        write_head(writer, &http::Response::from_parts(parts, ()), &extra).await?;
        return Ok(Outcome::Tunnel(body));
    }

    let no_body = is_head
        || status.is_informational()
        || status == StatusCode::NO_CONTENT
        || status == StatusCode::NOT_MODIFIED;

    let mut limit = if no_body {
        LimitWrite::NoBody
    } else {
        LimitWrite::for_body(&parts.headers, body.length(), version, &mut extra)
    };

    if !no_body && limit.is_no_body() && !parts.headers.contains_key("content-length") {
        extra.insert("content-length", HeaderValue::from_static("0"));
    }

    let keep_alive = persistent && !tunnel && !limit.is_close_delimited();

    if !keep_alive && version == Version::HTTP_11 && !parts.headers.contains_key("connection") {
        extra.insert("connection", HeaderValue::from_static("close"));
    }

    write_head(writer, &http::Response::from_parts(parts, ()), &extra).await?;

    if no_body {
        drop(body);
        writer.flush().await?;
    } else {
        write_body(writer, &mut limit, body).await?;
    }

    Ok(Outcome::Done(keep_alive))
}

async fn write_head(
    writer: &mut WriteHalf<BoxIo>,
    res: &http::Response<()>,
    extra: &HeaderMap,
) -> Result<(), Error> {
    let mut buf = Vec::with_capacity(1024);
    write_http1x_res(res, extra, &mut buf)?;
    writer.write_all(&buf).await?;
    writer.flush().await?;
    Ok(())
}

async fn bad_request(writer: &mut WriteHalf<BoxIo>) -> Result<(), Error> {
    let res = http::Response::builder()
        .status(StatusCode::BAD_REQUEST)
        .header("content-length", "0")
        .header("connection", "close")
        .body(())?;
    write_head(writer, &res, &HeaderMap::new()).await
}
