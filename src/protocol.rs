//! Wire protocols and the endpoints connections are made to.

use crate::connection::Connection;
use crate::h1;
use crate::h2::{self, Settings};
use crate::io::BoxIo;
use crate::Error;
use async_std::net::TcpStream;
use futures_util::future::{BoxFuture, FutureExt};
use std::io;
use std::time::Duration;

/// Wire protocol spoken over a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    /// HTTP/1.1, falling back to 1.0 for peers asking for it.
    Http1,
    /// HTTP/2 with prior knowledge.
    Http2,
}

impl Protocol {
    /// Client role connection over a connected transport.
    pub async fn client(self, io: BoxIo) -> Result<Connection, Error> {
        Ok(match self {
            Protocol::Http1 => Connection::Http1(h1::Connection::new(io)),
            Protocol::Http2 => {
                Connection::Http2(h2::Connection::client(io, Settings::client()).await?)
            }
        })
    }

    /// Server role connection over an accepted transport.
    pub async fn server(self, io: BoxIo) -> Result<Connection, Error> {
        Ok(match self {
            Protocol::Http1 => Connection::Http1(h1::Connection::new(io)),
            Protocol::Http2 => {
                Connection::Http2(h2::Connection::server(io, Settings::server()).await?)
            }
        })
    }

    /// ALPN identifiers.
    pub fn names(self) -> &'static [&'static str] {
        match self {
            Protocol::Http1 => &["http/1.1", "http/1.0"],
            Protocol::Http2 => &["h2"],
        }
    }
}

/// Protocol an exchange switches to, like `websocket`.
///
/// Set as request extension to ask for an upgrade (HTTP/1 `upgrade` header,
/// HTTP/2 extended CONNECT). Found as extension on requests and responses
/// that negotiated one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upgrade(pub String);

/// Somewhere to open transports to.
pub trait Endpoint: Send + Sync + 'static {
    /// Open a new transport.
    fn connect(&self) -> BoxFuture<'static, io::Result<BoxIo>>;

    /// Protocol to speak over the transports.
    fn protocol(&self) -> Protocol;

    /// Default scheme for requests without one.
    fn scheme(&self) -> &str;

    /// Default authority for requests without one.
    fn authority(&self) -> &str;

    /// Limit on how long `connect` may take.
    fn timeout(&self) -> Option<Duration> {
        None
    }
}

/// Plain TCP endpoint.
#[derive(Debug, Clone)]
pub struct TcpEndpoint {
    authority: String,
    protocol: Protocol,
    timeout: Option<Duration>,
}

impl TcpEndpoint {
    /// Endpoint for `host:port` speaking HTTP/1.
    pub fn new(host: &str, port: u16) -> Self {
        TcpEndpoint {
            authority: format!("{}:{}", host, port),
            protocol: Protocol::Http1,
            timeout: None,
        }
    }

    /// Endpoint from the authority of a url such as `http://localhost:3000`.
    pub fn from_uri(uri: &str) -> Result<Self, Error> {
        let uri: http::Uri = uri.parse().map_err(http::Error::from)?;

        let host = uri
            .host()
            .ok_or_else(|| Error::User(format!("No host in: {}", uri)))?;

        let port = uri.port_u16().unwrap_or(match uri.scheme_str() {
            Some("https") => 443,
            _ => 80,
        });

        Ok(TcpEndpoint::new(host, port))
    }

    /// Speak `protocol` instead of HTTP/1.
    pub fn with_protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = protocol;
        self
    }

    /// Give up connecting after `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

impl Endpoint for TcpEndpoint {
    fn connect(&self) -> BoxFuture<'static, io::Result<BoxIo>> {
        let addr = self.authority.clone();

        async move {
            trace!("Connect: {}", addr);
            let tcp = TcpStream::connect(&addr).await?;
            tcp.set_nodelay(true)?;
            Ok(Box::new(tcp) as BoxIo)
        }
        .boxed()
    }

    fn protocol(&self) -> Protocol {
        self.protocol
    }

    fn scheme(&self) -> &str {
        "http"
    }

    fn authority(&self) -> &str {
        &self.authority
    }

    fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}
