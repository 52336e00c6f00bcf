//! HTTP/1.1 (and 1.0) connections.
//!
//! One exchange at a time. The transport is owned by the connection while
//! idle, lent to the exchange in flight, and handed back when the response
//! body is fully read. A failure anywhere closes the transport.

use crate::body::Body;
use crate::io::{BoxIo, BufIo};
use crate::limit::LimitWrite;
use crate::server::Handler;
use crate::Error;
use crate::AsyncWrite;
use futures_util::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use std::fmt;
use std::io;
use std::sync::{Arc, Mutex};

mod client;
mod server;

/// Max size of a request/response head.
const MAX_HEAD: usize = 64 * 1024;

/// Split transport lent to one exchange.
pub(crate) struct Transport {
    reader: BufIo<ReadHalf<BoxIo>>,
    writer: WriteHalf<BoxIo>,
}

impl Transport {
    fn new(io: BoxIo) -> Self {
        let (r, w) = io.split();
        Transport {
            reader: BufIo::new(r),
            writer: w,
        }
    }
}

/// An HTTP/1 connection in client or server role.
///
/// Cheap to clone, all clones refer to the same transport.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Mutex<State>>,
}

struct State {
    /// `None` while an exchange is in flight, or after close.
    transport: Option<Transport>,
    /// Keep-alive as negotiated by the last exchange.
    persistent: bool,
    /// Previous exchange is completely done.
    ready: bool,
    closed: bool,
    count: usize,
}

impl Connection {
    /// Wrap a connected transport. There is no handshake in HTTP/1.
    pub fn new(io: BoxIo) -> Self {
        let state = State {
            transport: Some(Transport::new(io)),
            persistent: true,
            ready: true,
            closed: false,
            count: 0,
        };
        Connection {
            inner: Arc::new(Mutex::new(state)),
        }
    }

    /// Always 1, there is no multiplexing in HTTP/1.
    pub fn concurrency(&self) -> usize {
        1
    }

    /// The transport is not closed.
    pub fn is_viable(&self) -> bool {
        !self.inner.lock().unwrap().closed
    }

    /// Idle, connected and the last exchange allowed keep-alive.
    pub fn is_reusable(&self) -> bool {
        let state = self.inner.lock().unwrap();
        !state.closed && state.persistent && state.ready && state.transport.is_some()
    }

    /// Number of exchanges started on this connection.
    pub fn count(&self) -> usize {
        self.inner.lock().unwrap().count
    }

    /// Send a request and read the response head.
    ///
    /// The response body reads straight from the transport. The connection
    /// is ready for the next request once that body is read to the end.
    pub async fn call(&self, req: &mut http::Request<Body>) -> Result<http::Response<Body>, Error> {
        let transport = self.lend()?;
        self.started();

        let mut exchange = Exchange::new(self);
        let res = client::send_request(self, transport, req).await;
        exchange.done();

        match res {
            Ok(v) => Ok(v),
            Err(e) => {
                debug!("Request failed: {}", e);
                self.fail();
                Err(e)
            }
        }
    }

    /// Serve requests with `handler` until the client closes the
    /// connection or keep-alive ends.
    pub async fn each(&self, handler: Arc<dyn Handler>) -> Result<(), Error> {
        let transport = self.lend()?;

        // the transport is used up when serving ends, however it ends.
        let _exchange = Exchange::new(self);

        server::serve(self, transport, handler).await
    }

    /// Close the transport. An exchange in flight fails.
    pub async fn close(&self, _error: Option<Error>) {
        let transport = {
            let mut state = self.inner.lock().unwrap();
            state.closed = true;
            state.transport.take()
        };

        if let Some(mut t) = transport {
            trace!("Close transport");
            if let Err(e) = t.writer.close().await {
                trace!("Close failed: {}", e);
            }
        }
    }

    /// Whether both handles refer to the same connection.
    pub fn same(&self, other: &Connection) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Take the transport for an exchange.
    fn lend(&self) -> Result<Transport, Error> {
        let mut state = self.inner.lock().unwrap();

        if state.closed {
            return Err(Error::RequestNotSent(io::Error::new(
                io::ErrorKind::NotConnected,
                "Connection is closed",
            )));
        }

        let transport = state
            .transport
            .take()
            .ok_or_else(|| Error::User("HTTP/1 connection is busy".into()))?;

        state.ready = false;

        Ok(transport)
    }

    fn started(&self) {
        self.inner.lock().unwrap().count += 1;
    }

    /// Exchange is done, give the transport back.
    fn restore(&self, transport: Transport, persistent: bool) {
        let mut state = self.inner.lock().unwrap();

        if state.closed || !persistent {
            trace!("Transport not reusable");
            state.persistent = false;
            state.closed = true;
            return;
        }

        state.transport = Some(transport);
        state.ready = true;
    }

    /// The transport is gone with the exchange.
    fn fail(&self) {
        let mut state = self.inner.lock().unwrap();
        state.closed = true;
        state.transport = None;
    }

    /// The transport moved on to a tunnel or hijack handler.
    fn detach(&self) {
        let mut state = self.inner.lock().unwrap();
        state.persistent = false;
        state.transport = None;
    }
}

/// An exchange holding the lent transport.
///
/// Dropped before `done`, the transport went with it and the connection
/// is closed.
struct Exchange<'a> {
    conn: &'a Connection,
    done: bool,
}

impl<'a> Exchange<'a> {
    fn new(conn: &'a Connection) -> Self {
        Exchange { conn, done: false }
    }

    fn done(&mut self) {
        self.done = true;
    }
}

impl Drop for Exchange<'_> {
    fn drop(&mut self) {
        if !self.done {
            trace!("Exchange dropped before done");
            self.conn.fail();
        }
    }
}

/// Write a body framed by `limit`, flushing every chunk.
async fn write_body<W: AsyncWrite + Unpin>(
    writer: &mut W,
    limit: &mut LimitWrite,
    mut body: Body,
) -> Result<(), Error> {
    let mut buf = Vec::with_capacity(16_384);

    loop {
        let chunk = match body.read().await? {
            Some(v) => v,
            None => break,
        };

        buf.clear();
        if let Err(e) = limit.write(&chunk, &mut buf) {
            body.close(Some(e.duplicate()));
            return Err(e);
        }

        writer.write_all(&buf).await?;
        writer.flush().await?;
    }

    buf.clear();
    limit.finish(&mut buf)?;

    writer.write_all(&buf).await?;
    writer.flush().await?;

    Ok(())
}

/// Upgrade token from `connection: upgrade` plus `upgrade: <protocol>`.
fn upgrade_of(headers: &http::HeaderMap) -> Option<String> {
    let connection = headers.get("connection")?.to_str().ok()?;

    let wants = connection
        .split(',')
        .any(|v| v.trim().eq_ignore_ascii_case("upgrade"));

    if !wants {
        return None;
    }

    headers
        .get("upgrade")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string())
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let state = self.inner.lock().unwrap();
        f.debug_struct("h1::Connection")
            .field("count", &state.count)
            .field("persistent", &state.persistent)
            .field("ready", &state.ready)
            .field("closed", &state.closed)
            .finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[async_std::test]
    async fn dropped_call_closes_connection() -> Result<(), Error> {
        let l = async_std::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = l.local_addr()?;

        async_std::task::spawn(async move {
            // accept and never answer.
            let (_tcp, _) = l.accept().await.unwrap();
            async_std::task::sleep(std::time::Duration::from_secs(10)).await;
        });

        let tcp = async_std::net::TcpStream::connect(addr).await?;
        let conn = Connection::new(Box::new(tcp));

        let mut req = http::Request::get("http://localhost/").body(Body::empty())?;
        let res =
            async_std::future::timeout(std::time::Duration::from_millis(50), conn.call(&mut req))
                .await;
        assert!(res.is_err());

        assert!(!conn.is_viable());
        assert!(!conn.is_reusable());

        Ok(())
    }

    #[test]
    fn upgrade_needs_both_headers() {
        let mut h = http::HeaderMap::new();
        h.insert("upgrade", "websocket".parse().unwrap());
        assert_eq!(upgrade_of(&h), None);

        h.insert("connection", "keep-alive, Upgrade".parse().unwrap());
        assert_eq!(upgrade_of(&h), Some("websocket".to_string()));
    }
}
