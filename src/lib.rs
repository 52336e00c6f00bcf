#![warn(missing_docs, missing_debug_implementations)]
#![warn(clippy::all)]

//! An asynchronous HTTP/1.1 and HTTP/2 client and server transport.
//!
//! This library moves requests and responses over some byte transport. It
//! speaks HTTP/1.1 (and 1.0) as well as HTTP/2, and gives both protocols the
//! same [`Connection`] contract so that pooling and retries sit on top
//! without caring which one is in use.
//!
//! ## In scope
//!
//! * `Content-Length`, `Transfer-Encoding: chunked` and close-delimited
//!   bodies for HTTP/1.
//! * Stream multiplexing, flow control and `GOAWAY` for HTTP/2.
//! * A [`Pool`] of connections and a [`Client`] that retries requests when it
//!   is safe to do so.
//! * Streaming [`Body`] with backpressure, tunnels (`CONNECT`/`Upgrade`) and
//!   hijacking of the raw transport.
//!
//! ## Out of scope
//!
//! * TLS and ALPN. Bring a transport that already speaks plain bytes.
//! * Following redirects, cookies, caching. These are [`Middleware`] around a
//!   client.
//! * `Content-Encoding` compression.
//! * HTTP/2 server push and priorities.
//!
//! # Layout
//!
//! [`h1`] and [`h2`] hold the protocol connections, unified by
//! [`Connection`]. [`Client`] and [`Server`] are the usual entry points.

#[macro_use]
extern crate tracing;

mod body;
mod client;
mod connection;
mod error;
mod io;
mod limit;
mod middleware;
mod mpsc;
mod pool;
mod protocol;
mod server;

#[doc(hidden)]
pub mod chunked;

#[doc(hidden)]
pub mod http11;

pub mod h1;
pub mod h2;

pub(crate) use futures_io::{AsyncRead, AsyncWrite};

pub use body::{Body, HijackFn, Pipe, Readable, Writable};
pub use client::{Builder, Client};
pub use connection::Connection;
pub use error::{Error, ErrorKind};
pub use io::{BoxIo, Io};
pub use middleware::Middleware;
pub use pool::{Factory, Pool};
pub use protocol::{Endpoint, Protocol, TcpEndpoint, Upgrade};
pub use server::{Handler, Server, ServerHandle};
