//! HTTP/2 connections.
//!
//! One shared framer and reader serves both roles. The reader task
//! dispatches frames to streams, every write goes through a single writer
//! lock so header blocks are never interleaved with other frames.
//!
//! Window updates are demand driven: credit is given back to the peer when
//! the reader of a body consumes a chunk, not when the DATA frame arrives.

use crate::body::Body;
use crate::io::BoxIo;
use crate::server::Handler;
use crate::Error;
use conn::{Framer, Incoming, Role, Shared};
use futures_channel::{mpsc, oneshot};
use futures_util::future::{AbortHandle, Abortable};
use futures_util::io::{AsyncReadExt, BufReader};
use futures_util::stream::StreamExt;
use std::fmt;
use std::io;
use std::sync::{Arc, Mutex};

mod conn;
mod flow;
mod headers;
mod output;
mod stream;

#[doc(hidden)]
pub mod frame;
mod settings;

pub use frame::Reason;
#[doc(hidden)]
pub use settings::Param;
pub use settings::Settings;

use frame::Frame;

/// An HTTP/2 connection in client or server role.
///
/// Cheap to clone, all clones drive the same connection.
#[derive(Clone)]
pub struct Connection {
    shared: Arc<Shared>,
    incoming: Arc<Mutex<Option<mpsc::UnboundedReceiver<Incoming>>>>,
}

impl Connection {
    /// Send the client preface and exchange settings.
    pub async fn client(io: BoxIo, settings: Settings) -> Result<Connection, Error> {
        handshake(io, Role::Client, settings).await
    }

    /// Expect the client preface and exchange settings.
    pub async fn server(io: BoxIo, settings: Settings) -> Result<Connection, Error> {
        handshake(io, Role::Server, settings).await
    }

    /// Max number of concurrent exchanges.
    pub fn concurrency(&self) -> usize {
        self.shared.concurrency()
    }

    /// The connection is not closed.
    pub fn is_viable(&self) -> bool {
        !self.shared.is_closed()
    }

    /// New exchanges can be started. False after GOAWAY from the peer.
    pub fn is_reusable(&self) -> bool {
        self.shared.is_open()
    }

    /// Number of exchanges started on this connection.
    pub fn count(&self) -> usize {
        self.shared.count()
    }

    /// Streams currently open.
    pub fn active(&self) -> usize {
        self.shared.active_streams()
    }

    /// Send a request on a new stream and wait for the response headers.
    ///
    /// The request body is taken and sent in a separate task. The response
    /// body is read as DATA arrives.
    pub async fn call(&self, req: &mut http::Request<Body>) -> Result<http::Response<Body>, Error> {
        let length = req.body().length();
        let fields = headers::request_fields(req, length)?;
        let end_stream = length == Some(0);

        let (tx, rx) = oneshot::channel();
        let stream_id = self.shared.open_stream(tx, fields, end_stream).await?;

        debug!(
            "Request on stream {}: {} {}",
            stream_id,
            req.method(),
            req.uri()
        );

        let mut pending = Pending {
            shared: &self.shared,
            stream_id,
            done: false,
        };

        if end_stream {
            self.shared.close_local(stream_id);
        } else {
            let body = req.body_mut().take_for_send();
            let shared = self.shared.clone();
            async_std::task::spawn(async move {
                if let Err(e) = output::send_body(&shared, stream_id, body).await {
                    debug!("Request body on stream {} failed: {}", stream_id, e);
                }
            });
        }

        let res = rx.await;
        pending.done = true;

        match res {
            Ok(res) => res,
            Err(_) => Err(Error::Closed),
        }
    }

    /// Serve incoming requests with `handler` until the connection closes.
    ///
    /// Every request is handled in its own task.
    pub async fn each(&self, handler: Arc<dyn Handler>) -> Result<(), Error> {
        let rx = self.incoming.lock().unwrap().take();

        let mut rx = match rx {
            Some(v) => v,
            None => return Err(Error::User("Not a server connection, or already serving".into())),
        };

        while let Some((stream_id, req)) = rx.next().await {
            trace!("Incoming on stream {}: {} {}", stream_id, req.method(), req.uri());

            let shared = self.shared.clone();
            let handler = handler.clone();

            async_std::task::spawn(respond(shared, handler, stream_id, req));
        }

        debug!("Serving ended");

        Ok(())
    }

    /// Send GOAWAY and close the transport. Streams in flight fail with
    /// `error` (or `Closed`).
    pub async fn close(&self, error: Option<Error>) {
        self.shared.close(error).await;
    }

    /// Whether both handles drive the same connection.
    pub fn same(&self, other: &Connection) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

/// A stream waiting for its response. Dropped before the response
/// arrives, the stream is cancelled.
struct Pending<'a> {
    shared: &'a Shared,
    stream_id: u32,
    done: bool,
}

impl Drop for Pending<'_> {
    fn drop(&mut self) {
        if !self.done {
            self.shared.reset(self.stream_id, Reason::Cancel);
        }
    }
}

async fn respond(
    shared: Arc<Shared>,
    handler: Arc<dyn Handler>,
    stream_id: u32,
    req: http::Request<Body>,
) {
    let res = match handler.call(req).await {
        Ok(v) => v,
        Err(e) => {
            warn!("Handler failed on stream {}: {}", stream_id, e);
            shared.reset(stream_id, Reason::InternalError);
            return;
        }
    };

    let (parts, body) = res.into_parts();
    let length = body.length();

    let head = http::Response::from_parts(parts, ());
    let fields = headers::response_fields(&head, length);
    let end_stream = length == Some(0);

    if let Err(e) = shared.send_headers(stream_id, fields, end_stream).await {
        debug!("Response headers on stream {} failed: {}", stream_id, e);
        return;
    }

    if end_stream {
        shared.close_local(stream_id);
    } else if let Err(e) = output::send_body(&shared, stream_id, body).await {
        debug!("Response body on stream {} failed: {}", stream_id, e);
        return;
    }

    shared.finish_response(stream_id);
}

async fn handshake(io: BoxIo, role: Role, local: Settings) -> Result<Connection, Error> {
    let (read, write) = io.split();

    let mut reader = BufReader::new(read);
    let mut framer = Framer::new(write);

    match role {
        Role::Client => framer.send_raw(frame::PREFACE).await?,
        Role::Server => {
            let mut buf = [0; 24];
            reader.read_exact(&mut buf).await?;
            if &buf[..] != frame::PREFACE {
                return Err(Error::Protocol("Bad connection preface".into()));
            }
        }
    }

    framer
        .send(&Frame::Settings {
            ack: false,
            params: local.params(),
        })
        .await?;

    let params = match frame::read_frame(&mut reader, local.max_frame_size).await? {
        Some(Frame::Settings { ack: false, params }) => params,
        Some(f) => {
            return Err(Error::Protocol(format!(
                "Expected SETTINGS as first frame: {:?}",
                f
            )));
        }
        None => {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "EOF before SETTINGS",
            )));
        }
    };

    let mut remote = Settings::default();
    remote.apply(&params);

    framer
        .send(&Frame::Settings {
            ack: true,
            params: vec![],
        })
        .await?;

    debug!("Handshake done ({:?}), remote: {:?}", role, remote);

    let (control_tx, control_rx) = mpsc::unbounded();
    let (shared, incoming) = Shared::new(role, local, remote, framer, control_tx);

    async_std::task::spawn(conn::control_loop(shared.clone(), control_rx));

    let (abort, registration) = AbortHandle::new_pair();
    shared.set_reader(abort);
    async_std::task::spawn(Abortable::new(
        conn::read_loop(shared.clone(), reader),
        registration,
    ));

    Ok(Connection {
        shared,
        incoming: Arc::new(Mutex::new(incoming)),
    })
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("h2::Connection")
            .field("count", &self.count())
            .field("reusable", &self.is_reusable())
            .finish()
    }
}
