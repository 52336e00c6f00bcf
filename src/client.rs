//! Client dispatching requests over pooled connections.
//!
//! # Example
//!
//! ```rust, no_run
//! use hreq_transport::{Client, Error, TcpEndpoint};
//!
//! #[async_std::main]
//! async fn main() -> Result<(), Error> {
//!     let client = Client::new(TcpEndpoint::new("localhost", 3000));
//!
//!     let mut res = client.get("/hello").await?;
//!     let body = res.body_mut().join().await?;
//!
//!     println!("{} {}", res.status(), String::from_utf8_lossy(&body));
//!
//!     client.close().await;
//!     Ok(())
//! }
//! ```

use crate::body::Body;
use crate::connection::Connection;
use crate::middleware::Middleware;
use crate::pool::{Factory, Pool};
use crate::protocol::Endpoint;
use crate::{Error, ErrorKind};
use futures_util::future::{BoxFuture, FutureExt};
use http::{Method, Request, Response, Uri};
use std::fmt;
use std::sync::Arc;

/// Configuration of a [`Client`].
#[derive(Debug, Clone)]
pub struct Builder {
    retries: usize,
    limit: Option<usize>,
    connect_retries: usize,
}

impl Builder {
    /// Defaults: 3 attempts per request, unlimited connections, 3 connect
    /// attempts.
    pub fn new() -> Self {
        Builder {
            retries: 3,
            limit: None,
            connect_retries: 3,
        }
    }

    /// Max attempts per request, the first one included.
    pub fn retries(mut self, retries: usize) -> Self {
        self.retries = retries.max(1);
        self
    }

    /// Max number of pooled connections.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Failed connects in a row before a request fails.
    pub fn connect_retries(mut self, connect_retries: usize) -> Self {
        self.connect_retries = connect_retries;
        self
    }

    /// Client for `endpoint`.
    pub fn build<E: Endpoint>(self, endpoint: E) -> Client {
        let endpoint: Arc<dyn Endpoint> = Arc::new(endpoint);

        let ep = endpoint.clone();
        let factory: Factory = Arc::new(move || {
            let ep = ep.clone();
            async move {
                let io = match ep.timeout() {
                    Some(t) => async_std::io::timeout(t, ep.connect()).await?,
                    None => ep.connect().await?,
                };
                ep.protocol().client(io).await
            }
            .boxed()
        });

        Client {
            endpoint,
            pool: Pool::new(factory, self.limit, self.connect_retries),
            retries: self.retries,
        }
    }
}

impl Default for Builder {
    fn default() -> Self {
        Builder::new()
    }
}

/// A connection taken from the pool, given back on drop.
struct Lease {
    conn: Connection,
    pool: Pool,
}

impl Drop for Lease {
    fn drop(&mut self) {
        self.pool.release(&self.conn);
    }
}

/// Sends requests to one endpoint, reusing connections.
///
/// A failed request is sent again when it is safe to do so: always if the
/// request never reached the peer, for idempotent requests also when the
/// transport broke after sending started.
#[derive(Clone)]
pub struct Client {
    endpoint: Arc<dyn Endpoint>,
    pool: Pool,
    retries: usize,
}

impl Client {
    /// Client with default configuration.
    pub fn new<E: Endpoint>(endpoint: E) -> Self {
        Builder::new().build(endpoint)
    }

    /// Configure a client.
    pub fn builder() -> Builder {
        Builder::new()
    }

    /// The connection pool.
    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    /// Send a request.
    ///
    /// The connection goes back to the pool when the response body is read
    /// to the end, closed or dropped.
    pub async fn call(&self, mut req: Request<Body>) -> Result<Response<Body>, Error> {
        self.apply_defaults(&mut req)?;

        let idempotent = req.method() != Method::POST && req.body().is_empty();
        let has_body = !req.body().is_empty();

        let mut attempt = 0;

        loop {
            attempt += 1;

            let lease = Lease {
                conn: self.pool.acquire().await?,
                pool: self.pool.clone(),
            };

            let res = lease.conn.call(&mut req).await;

            let err = match res {
                Ok(mut res) => {
                    // released when the response body is done with.
                    res.body_mut().on_complete(move || drop(lease));
                    return Ok(res);
                }
                Err(e) => e,
            };

            drop(lease);

            // a streamed body once taken can't be sent again, buffered ones stay.
            let body_intact = !has_body || !req.body().is_empty();

            let retry = match err.kind() {
                ErrorKind::RequestNotSent => body_intact,
                ErrorKind::TransportBroken => idempotent,
                _ => false,
            };

            if !retry || attempt >= self.retries {
                debug!("Request failed after {} attempts: {}", attempt, err);
                return Err(err);
            }

            warn!("Retry {} {} ({}): {}", req.method(), req.uri(), attempt, err);
        }
    }

    /// `GET` request.
    pub async fn get(&self, uri: &str) -> Result<Response<Body>, Error> {
        self.call(Request::get(uri).body(Body::empty())?).await
    }

    /// `HEAD` request.
    pub async fn head(&self, uri: &str) -> Result<Response<Body>, Error> {
        self.call(Request::head(uri).body(Body::empty())?).await
    }

    /// `POST` request.
    pub async fn post<B: Into<Body>>(&self, uri: &str, body: B) -> Result<Response<Body>, Error> {
        self.call(Request::post(uri).body(body.into())?).await
    }

    /// `PUT` request.
    pub async fn put<B: Into<Body>>(&self, uri: &str, body: B) -> Result<Response<Body>, Error> {
        self.call(Request::put(uri).body(body.into())?).await
    }

    /// `DELETE` request.
    pub async fn delete(&self, uri: &str) -> Result<Response<Body>, Error> {
        self.call(Request::delete(uri).body(Body::empty())?).await
    }

    /// Wait until no connection is busy, then close them all.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Fill in scheme and authority from the endpoint.
    fn apply_defaults(&self, req: &mut Request<Body>) -> Result<(), Error> {
        let uri = req.uri();

        if req.method() == Method::CONNECT || (uri.scheme().is_some() && uri.authority().is_some()) {
            return Ok(());
        }

        let mut parts = uri.clone().into_parts();

        if parts.scheme.is_none() {
            parts.scheme = Some(self.endpoint.scheme().parse().map_err(http::Error::from)?);
        }
        if parts.authority.is_none() {
            parts.authority = Some(self.endpoint.authority().parse().map_err(http::Error::from)?);
        }
        if parts.path_and_query.is_none() {
            parts.path_and_query = Some("/".parse().map_err(http::Error::from)?);
        }

        *req.uri_mut() = Uri::from_parts(parts).map_err(http::Error::from)?;

        Ok(())
    }
}

impl Middleware for Client {
    fn call(&self, req: Request<Body>) -> BoxFuture<'_, Result<Response<Body>, Error>> {
        Client::call(self, req).boxed()
    }

    fn close(&self) -> BoxFuture<'_, ()> {
        Client::close(self).boxed()
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Client")
            .field("authority", &self.endpoint.authority())
            .field("pool", &self.pool)
            .finish()
    }
}
