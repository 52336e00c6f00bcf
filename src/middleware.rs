use crate::body::Body;
use crate::Error;
use futures_util::future::BoxFuture;

/// Something that turns requests into responses on the client side.
///
/// [`Client`](crate::Client) is one. Wrappers adding redirects, caching and
/// such implement it around another `Middleware`.
pub trait Middleware: Send + Sync {
    /// Perform a request.
    fn call(&self, req: http::Request<Body>) -> BoxFuture<'_, Result<http::Response<Body>, Error>>;

    /// Release all resources once nothing is in flight.
    fn close(&self) -> BoxFuture<'_, ()>;
}
