use super::{upgrade_of, write_body, Connection, Transport, MAX_HEAD};
use crate::body::{Body, Pipe, Readable, Writable, DEFAULT_BOUND};
use crate::http11::{try_parse_res, write_http1x_req};
use crate::io::{BoxIo, BufIo, Duplex};
use crate::limit::{allow_reuse, LimitRead, LimitWrite};
use crate::protocol::Upgrade;
use crate::Error;
use bytes::Bytes;
use futures_util::future::{BoxFuture, FutureExt};
use futures_util::io::{AsyncWriteExt, ReadHalf};
use http::{HeaderMap, HeaderValue, Method, StatusCode, Version};
use std::future::Future;
use std::io;
use std::mem;
use std::pin::Pin;
use std::task::{Context, Poll};

pub(crate) async fn send_request(
    conn: &Connection,
    mut t: Transport,
    req: &mut http::Request<Body>,
) -> Result<http::Response<Body>, Error> {
    if req.version() != Version::HTTP_10 {
        *req.version_mut() = Version::HTTP_11;
    }

    let upgrade = req.extensions().get::<Upgrade>().map(|u| u.0.clone());
    let tunnel = req.method() == Method::CONNECT || upgrade.is_some();

    let mut extra = HeaderMap::new();

    let mut limit = if tunnel {
        // bytes after the head belong to the tunnel, no framing.
        LimitWrite::CloseDelimited
    } else {
        let length = req.body().length();
        LimitWrite::for_body(req.headers(), length, req.version(), &mut extra)
    };

    if let Some(proto) = &upgrade {
        if !req.headers().contains_key("upgrade") {
            let value = HeaderValue::from_str(proto)
                .map_err(|_| Error::User(format!("Bad upgrade protocol: {}", proto)))?;
            extra.insert("connection", HeaderValue::from_static("upgrade"));
            extra.insert("upgrade", value);
        }
    }

    let mut head = Vec::with_capacity(1024);
    write_http1x_req(req, &extra, &mut head)?;

    // nothing observable reached the peer until the head is flushed.
    if let Err(e) = write_flush(&mut t, &head).await {
        return Err(Error::RequestNotSent(e));
    }

    let body = req.body_mut().take_for_send();

    let is_head = req.method() == Method::HEAD;
    let keep_alive = allow_reuse(req.headers(), req.version());

    if tunnel {
        return start_tunnel(conn, t, body).await;
    }

    write_body(&mut t.writer, &mut limit, body).await?;

    let res = read_response(&mut t.reader).await?;

    Ok(response_body(conn, t, is_head, res, keep_alive))
}

async fn write_flush(t: &mut Transport, buf: &[u8]) -> io::Result<()> {
    t.writer.write_all(buf).await?;
    t.writer.flush().await?;
    Ok(())
}

/// Read a response head, skipping informational responses except 101.
async fn read_response(reader: &mut BufIo<ReadHalf<BoxIo>>) -> Result<http::Response<()>, Error> {
    loop {
        let head = reader.read_head(MAX_HEAD).await?.ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "Connection closed before response",
            )
        })?;

        let (res, _) = try_parse_res(&head)?
            .ok_or_else(|| Error::Protocol("Incomplete response head".into()))?;

        if res.status().is_informational() && res.status() != StatusCode::SWITCHING_PROTOCOLS {
            trace!("Skip informational response: {}", res.status());
            continue;
        }

        return Ok(res);
    }
}

/// CONNECT or upgrade. A 2xx (or 101) response turns the transport into a
/// tunnel: request body bytes go out raw, the response body is whatever the
/// peer sends after the head.
async fn start_tunnel(
    conn: &Connection,
    mut t: Transport,
    body: Body,
) -> Result<http::Response<Body>, Error> {
    let res = read_response(&mut t.reader).await?;

    let status = res.status();
    let accepted = status.is_success() || status == StatusCode::SWITCHING_PROTOCOLS;

    if !accepted {
        debug!("Tunnel refused: {}", status);
        drop(body);
        return Ok(response_body(conn, t, false, res, false));
    }

    debug!("Tunnel established: {}", status);

    conn.detach();

    let output = Writable::new(DEFAULT_BOUND);

    let Transport { reader, writer } = t;
    Pipe::new(Duplex::new(reader, writer), body, output.clone());

    let mut res = res.map(|_| Body::from(output));

    if let Some(proto) = upgrade_of(res.headers()) {
        res.extensions_mut().insert(Upgrade(proto));
    }

    Ok(res)
}

/// Attach a body reading from the transport, or give the transport back
/// right away if there is no body.
///
/// `keep_alive` is what the request side allows.
fn response_body(
    conn: &Connection,
    t: Transport,
    is_head: bool,
    res: http::Response<()>,
    keep_alive: bool,
) -> http::Response<Body> {
    let status = res.status();

    let no_body = is_head
        || status.is_informational()
        || status == StatusCode::NO_CONTENT
        || status == StatusCode::NOT_MODIFIED;

    let limit = if no_body {
        LimitRead::NoBody
    } else {
        LimitRead::from_headers(res.headers(), true)
    };

    let persistent = keep_alive && allow_reuse(res.headers(), res.version());

    trace!("Response {} persistent: {} {:?}", status, persistent, limit);

    let body = if limit.is_no_body() {
        conn.restore(t, persistent);
        Body::empty()
    } else {
        Body::new(RecvBody::new(conn.clone(), t, limit, persistent))
    };

    res.map(|_| body)
}

type ReadFuture = BoxFuture<'static, (Transport, LimitRead, Result<Option<Bytes>, Error>)>;

enum RecvState {
    Idle(Transport, LimitRead),
    Reading(ReadFuture),
    Done,
}

/// Response body read straight from the transport.
///
/// At the end the transport goes back to the connection. Closing before
/// the end closes the connection.
struct RecvBody {
    conn: Connection,
    persistent: bool,
    length: Option<u64>,
    state: RecvState,
}

impl RecvBody {
    fn new(conn: Connection, t: Transport, limit: LimitRead, persistent: bool) -> Self {
        RecvBody {
            conn,
            persistent,
            length: limit.body_size(),
            state: RecvState::Idle(t, limit),
        }
    }
}

impl Readable for RecvBody {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context) -> Poll<Result<Option<Bytes>, Error>> {
        let this = self.get_mut();

        loop {
            match mem::replace(&mut this.state, RecvState::Done) {
                RecvState::Idle(mut t, mut limit) => {
                    let fut = async move {
                        let res = limit.read(&mut t.reader).await;
                        (t, limit, res)
                    };
                    this.state = RecvState::Reading(fut.boxed());
                }

                RecvState::Reading(mut fut) => {
                    let (t, limit, res) = match fut.as_mut().poll(cx) {
                        Poll::Ready(v) => v,
                        Poll::Pending => {
                            this.state = RecvState::Reading(fut);
                            return Poll::Pending;
                        }
                    };

                    return match res {
                        Ok(Some(chunk)) => {
                            this.state = RecvState::Idle(t, limit);
                            Poll::Ready(Ok(Some(chunk)))
                        }
                        Ok(None) => {
                            let reusable = this.persistent && limit.is_reusable();
                            this.conn.restore(t, reusable);
                            Poll::Ready(Ok(None))
                        }
                        Err(e) => {
                            this.conn.fail();
                            Poll::Ready(Err(e))
                        }
                    };
                }

                RecvState::Done => return Poll::Ready(Ok(None)),
            }
        }
    }

    fn close(&mut self, _error: Option<Error>) {
        if let RecvState::Done = self.state {
            return;
        }
        trace!("Response body closed before end");
        self.state = RecvState::Done;
        self.conn.fail();
    }

    fn length(&self) -> Option<u64> {
        self.length
    }
}
