//! Serving requests.
//!
//! # Example
//!
//! ```rust, no_run
//! use hreq_transport::{Body, Error, Protocol, Server};
//!
//! #[async_std::main]
//! async fn main() -> Result<(), Error> {
//!     let server = Server::new(Protocol::Http1, |_req: http::Request<Body>| async move {
//!         Ok::<_, Error>(http::Response::new(Body::from("Hello World")))
//!     });
//!
//!     let handle = server.listen("127.0.0.1:3000").await?;
//!     println!("Listening on {}", handle.local_addr());
//!
//!     async_std::future::pending::<()>().await;
//!     Ok(())
//! }
//! ```

use crate::body::Body;
use crate::io::BoxIo;
use crate::protocol::Protocol;
use crate::Error;
use async_std::net::TcpListener;
use futures_util::future::{AbortHandle, Abortable, BoxFuture, FutureExt};
use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

/// Turns requests into responses.
///
/// Implemented for any `Fn(Request<Body>) -> impl Future<Output = Result<Response<Body>, Error>>`.
pub trait Handler: Send + Sync + 'static {
    /// Handle one request.
    fn call(&self, req: http::Request<Body>) -> BoxFuture<'static, Result<http::Response<Body>, Error>>;
}

impl<F, Fut> Handler for F
where
    F: Fn(http::Request<Body>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<http::Response<Body>, Error>> + Send + 'static,
{
    fn call(&self, req: http::Request<Body>) -> BoxFuture<'static, Result<http::Response<Body>, Error>> {
        (self)(req).boxed()
    }
}

/// Accepts connections and serves them with a handler.
#[derive(Clone)]
pub struct Server {
    protocol: Protocol,
    handler: Arc<dyn Handler>,
}

impl Server {
    /// Server speaking `protocol`, handling requests with `handler`.
    pub fn new<H: Handler>(protocol: Protocol, handler: H) -> Self {
        Server {
            protocol,
            handler: Arc::new(handler),
        }
    }

    /// Serve a single accepted transport until it closes.
    pub async fn serve(&self, io: BoxIo) -> Result<(), Error> {
        let conn = self.protocol.server(io).await?;
        conn.each(self.handler.clone()).await
    }

    /// Bind `addr` and accept connections in a background task.
    pub async fn listen(&self, addr: &str) -> Result<ServerHandle, Error> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;

        debug!("Listen on {} ({:?})", local_addr, self.protocol);

        let (abort, registration) = AbortHandle::new_pair();

        let server = self.clone();
        async_std::task::spawn(Abortable::new(server.accept(listener), registration));

        Ok(ServerHandle { local_addr, abort })
    }

    async fn accept(self, listener: TcpListener) {
        loop {
            let (tcp, peer) = match listener.accept().await {
                Ok(v) => v,
                Err(e) => {
                    warn!("Accept failed: {}", e);
                    async_std::task::sleep(Duration::from_millis(10)).await;
                    continue;
                }
            };

            trace!("Accepted: {}", peer);

            if let Err(e) = tcp.set_nodelay(true) {
                debug!("set_nodelay failed: {}", e);
            }

            let server = self.clone();

            async_std::task::spawn(async move {
                if let Err(e) = server.serve(Box::new(tcp)).await {
                    debug!("Connection from {} ended: {}", peer, e);
                }
            });
        }
    }
}

/// A running accept loop.
#[derive(Debug)]
pub struct ServerHandle {
    local_addr: SocketAddr,
    abort: AbortHandle,
}

impl ServerHandle {
    /// Address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting. Connections already accepted keep going.
    pub fn stop(&self) {
        self.abort.abort();
    }
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Server")
            .field("protocol", &self.protocol)
            .finish()
    }
}
