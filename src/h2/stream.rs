use super::conn::Shared;
use super::flow::Window;
use crate::body::{Body, Readable, Writable};
use crate::Error;
use bytes::Bytes;
use futures_channel::oneshot;
use futures_util::ready;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

pub(crate) type ResponseSender = oneshot::Sender<Result<http::Response<Body>, Error>>;

/// State of one stream, kept in the connection's stream map from `open`
/// until both directions are closed or the stream is reset.
pub(crate) struct Stream {
    pub send_window: Window,
    pub recv_window: Window,
    /// Where received DATA goes.
    pub input: Option<Writable>,
    /// Client side, waiting for the response headers.
    pub response: Option<ResponseSender>,
    pub headers_done: bool,
    pub local_closed: bool,
    pub remote_closed: bool,
}

impl Stream {
    pub fn new(send_window: u32, recv_window: u32, response: Option<ResponseSender>) -> Self {
        Stream {
            send_window: Window::new(send_window),
            recv_window: Window::new(recv_window),
            input: None,
            response,
            headers_done: false,
            local_closed: false,
            remote_closed: false,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.local_closed && self.remote_closed
    }

    /// End of data from the peer.
    pub fn close_remote(&mut self) {
        self.remote_closed = true;
        if let Some(input) = &self.input {
            input.close(None);
        }
    }

    /// Hand `error` to whoever waits on this stream.
    pub fn fail(self, error: &Error) {
        if let Some(input) = self.input {
            input.close(Some(error.duplicate()));
        }
        if let Some(tx) = self.response {
            tx.send(Err(error.duplicate())).ok();
        }
    }
}

/// Body of received DATA frames.
///
/// Every chunk handed to the reader gives the same amount of window back
/// to the peer.
pub(crate) struct Input {
    stream_id: u32,
    writable: Writable,
    shared: Arc<Shared>,
}

impl Input {
    pub fn new(stream_id: u32, writable: Writable, shared: Arc<Shared>) -> Self {
        Input {
            stream_id,
            writable,
            shared,
        }
    }
}

impl Readable for Input {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context) -> Poll<Result<Option<Bytes>, Error>> {
        let this = self.get_mut();

        let res = ready!(Pin::new(&mut this.writable).poll_read(cx));

        if let Ok(Some(chunk)) = &res {
            this.shared
                .release_capacity(this.stream_id, chunk.len() as u32);
        }

        res.into()
    }

    fn close(&mut self, error: Option<Error>) {
        self.writable.close(error);
        self.shared.input_closed(self.stream_id);
    }

    fn length(&self) -> Option<u64> {
        self.writable.length()
    }
}
