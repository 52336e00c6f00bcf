use crate::body::Body;
use crate::h1;
use crate::h2;
use crate::server::Handler;
use crate::Error;
use std::sync::Arc;

/// A connection of either protocol.
///
/// Both variants fulfill the same contract. An HTTP/1 connection serves one
/// exchange at a time, an HTTP/2 connection as many as the peer allows.
#[derive(Debug, Clone)]
pub enum Connection {
    /// HTTP/1.1 or 1.0.
    Http1(h1::Connection),
    /// HTTP/2.
    Http2(h2::Connection),
}

impl Connection {
    /// Max number of concurrent exchanges.
    pub fn concurrency(&self) -> usize {
        match self {
            Connection::Http1(c) => c.concurrency(),
            Connection::Http2(c) => c.concurrency(),
        }
    }

    /// The transport is still open.
    pub fn is_viable(&self) -> bool {
        match self {
            Connection::Http1(c) => c.is_viable(),
            Connection::Http2(c) => c.is_viable(),
        }
    }

    /// A new exchange can be started.
    pub fn is_reusable(&self) -> bool {
        match self {
            Connection::Http1(c) => c.is_reusable(),
            Connection::Http2(c) => c.is_reusable(),
        }
    }

    /// Number of exchanges started.
    pub fn count(&self) -> usize {
        match self {
            Connection::Http1(c) => c.count(),
            Connection::Http2(c) => c.count(),
        }
    }

    /// HTTP version spoken.
    pub fn version(&self) -> http::Version {
        match self {
            Connection::Http1(_) => http::Version::HTTP_11,
            Connection::Http2(_) => http::Version::HTTP_2,
        }
    }

    /// Send a request and wait for the response head.
    ///
    /// The request body is taken, the rest of `req` is left for a retry.
    pub async fn call(&self, req: &mut http::Request<Body>) -> Result<http::Response<Body>, Error> {
        match self {
            Connection::Http1(c) => c.call(req).await,
            Connection::Http2(c) => c.call(req).await,
        }
    }

    /// Serve requests with `handler` until the connection ends.
    pub async fn each(&self, handler: Arc<dyn Handler>) -> Result<(), Error> {
        match self {
            Connection::Http1(c) => c.each(handler).await,
            Connection::Http2(c) => c.each(handler).await,
        }
    }

    /// Close the connection, failing exchanges in flight with `error`.
    pub async fn close(&self, error: Option<Error>) {
        match self {
            Connection::Http1(c) => c.close(error).await,
            Connection::Http2(c) => c.close(error).await,
        }
    }

    /// Whether both refer to the same underlying connection.
    pub fn same(&self, other: &Connection) -> bool {
        match (self, other) {
            (Connection::Http1(a), Connection::Http1(b)) => a.same(b),
            (Connection::Http2(a), Connection::Http2(b)) => a.same(b),
            _ => false,
        }
    }
}
