//! Streaming bodies shared by both protocols.
//!
//! A [`Body`] is a lazy, finite sequence of byte chunks. It is either
//! buffered in memory, a [`Readable`] source such as a [`Writable`] fed by
//! another task, or a hijack handler that takes over the raw bytes.

use crate::io::BoxIo;
use crate::Error;
use bytes::Bytes;
use futures_util::future::poll_fn;
use futures_util::future::FutureExt;
use futures_util::ready;
use futures_util::stream::Stream;
use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

mod hijack;
mod pipe;
mod writable;

pub(crate) use hijack::Hijack;
pub use hijack::HijackFn;
pub use pipe::Pipe;
pub(crate) use writable::DEFAULT_BOUND;
pub use writable::Writable;

/// A source of body chunks.
pub trait Readable: Send + Unpin {
    /// Poll for the next chunk. `None` once the source is exhausted.
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context) -> Poll<Result<Option<Bytes>, Error>>;

    /// Stop reading. The error, if any, is what a producer on the other end sees.
    fn close(&mut self, _error: Option<Error>) {}

    /// Total number of bytes, if known up front.
    fn length(&self) -> Option<u64> {
        None
    }
}

/// Body of a request or response.
pub struct Body {
    kind: Kind,
    finished: bool,
    on_complete: Option<Box<dyn FnOnce() + Send>>,
}

enum Kind {
    Buffered { chunks: VecDeque<Bytes>, length: u64 },
    Stream(Box<dyn Readable>),
    Hijack(Box<Hijack>),
}

impl Body {
    /// A body without any data.
    pub fn empty() -> Self {
        Body::buffered(VecDeque::new())
    }

    fn buffered(chunks: VecDeque<Bytes>) -> Self {
        let chunks: VecDeque<Bytes> = chunks.into_iter().filter(|c| !c.is_empty()).collect();
        let length = chunks.iter().map(|c| c.len() as u64).sum();
        Body {
            finished: chunks.is_empty(),
            kind: Kind::Buffered { chunks, length },
            on_complete: None,
        }
    }

    /// A body read from some [`Readable`] source.
    pub fn new<R: Readable + 'static>(readable: R) -> Self {
        Body {
            kind: Kind::Stream(Box::new(readable)),
            finished: false,
            on_complete: None,
        }
    }

    /// A body produced by a handler talking raw bytes.
    pub fn hijack<F, Fut>(handler: F) -> Self
    where
        F: FnOnce(BoxIo) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), Error>> + Send + 'static,
    {
        Body::hijack_with(Body::empty(), handler)
    }

    /// Like [`Body::hijack`], where the handler reads `input` when it isn't
    /// given a raw transport.
    pub fn hijack_with<F, Fut>(input: Body, handler: F) -> Self
    where
        F: FnOnce(BoxIo) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), Error>> + Send + 'static,
    {
        let handler: HijackFn = Box::new(move |io| handler(io).boxed());
        Body {
            kind: Kind::Hijack(Box::new(Hijack::new(handler, input))),
            finished: false,
            on_complete: None,
        }
    }

    /// Total length of the body, if known.
    pub fn length(&self) -> Option<u64> {
        match &self.kind {
            Kind::Buffered { length, .. } => Some(*length),
            Kind::Stream(r) => r.length(),
            Kind::Hijack(_) => None,
        }
    }

    /// Whether the body is known to carry no data.
    pub fn is_empty(&self) -> bool {
        self.length() == Some(0)
    }

    /// Whether the end (or an error) has been read, or the body was closed.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Whether this body is a hijack handler.
    pub fn is_hijack(&self) -> bool {
        matches!(self.kind, Kind::Hijack(_))
    }

    /// Poll for the next chunk.
    pub fn poll_read(&mut self, cx: &mut Context) -> Poll<Result<Option<Bytes>, Error>> {
        if self.finished {
            return Poll::Ready(Ok(None));
        }

        let res = ready!(match &mut self.kind {
            Kind::Buffered { chunks, .. } => Poll::Ready(Ok(chunks.pop_front())),
            Kind::Stream(r) => Pin::new(&mut **r).poll_read(cx),
            Kind::Hijack(h) => h.poll_read(cx),
        });

        match &res {
            Ok(Some(_)) => {}
            Ok(None) => {
                self.finished = true;
                self.complete();
            }
            Err(e) => {
                trace!("Body read failed: {}", e);
                self.finished = true;
                self.complete();
            }
        }

        res.into()
    }

    /// Read the next chunk. `None` at the end.
    pub async fn read(&mut self) -> Result<Option<Bytes>, Error> {
        poll_fn(|cx| self.poll_read(cx)).await
    }

    /// Read all chunks into one buffer.
    pub async fn join(&mut self) -> Result<Vec<u8>, Error> {
        let mut out = Vec::with_capacity(self.length().unwrap_or(0) as usize);
        while let Some(chunk) = self.read().await? {
            out.extend_from_slice(&chunk);
        }
        Ok(out)
    }

    /// Drive the body to the end, handing each chunk to `f`, then close it.
    ///
    /// An error from `f` closes the body with that error and is returned.
    pub async fn each<F>(&mut self, mut f: F) -> Result<(), Error>
    where
        F: FnMut(Bytes) -> Result<(), Error>,
    {
        loop {
            match self.read().await {
                Ok(Some(chunk)) => {
                    if let Err(e) = f(chunk) {
                        self.close(Some(e.duplicate()));
                        return Err(e);
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    self.close(None);
                    return Err(e);
                }
            }
        }
        self.close(None);
        Ok(())
    }

    /// Stop reading the body. Calling more than once has no further effect.
    pub fn close(&mut self, error: Option<Error>) {
        if self.finished {
            return;
        }
        self.finished = true;

        match &mut self.kind {
            Kind::Buffered { chunks, .. } => chunks.clear(),
            Kind::Stream(r) => r.close(error),
            Kind::Hijack(h) => h.close(error),
        }

        self.complete();
    }

    /// A copy of what is left of a buffered body. Streams and hijack
    /// handlers can't be copied.
    pub fn try_clone(&self) -> Option<Body> {
        match &self.kind {
            Kind::Buffered { chunks, .. } => Some(Body::buffered(chunks.clone())),
            _ => None,
        }
    }

    /// The body to send for a request, leaving a copy behind when it can be
    /// sent again.
    pub(crate) fn take_for_send(&mut self) -> Body {
        match self.try_clone() {
            Some(v) => v,
            None => std::mem::take(self),
        }
    }

    /// Take out the hijack handler, if this body is one and it hasn't been read.
    pub(crate) fn take_hijack(&mut self) -> Option<(HijackFn, Body)> {
        if let Kind::Hijack(h) = &mut self.kind {
            let taken = h.take();
            if taken.is_some() {
                self.finished = true;
                self.complete();
            }
            taken
        } else {
            None
        }
    }

    /// Register a callback fired exactly once when the body ends, fails, is
    /// closed or dropped. Fires immediately for a finished body.
    pub(crate) fn on_complete<F: FnOnce() + Send + 'static>(&mut self, f: F) {
        if self.finished {
            f();
        } else {
            self.on_complete = Some(Box::new(f));
        }
    }

    fn complete(&mut self) {
        if let Some(f) = self.on_complete.take() {
            f();
        }
    }
}

impl Drop for Body {
    fn drop(&mut self) {
        if !self.finished {
            self.close(Some(Error::Closed));
        }
    }
}

impl Default for Body {
    fn default() -> Self {
        Body::empty()
    }
}

impl Stream for Body {
    type Item = Result<Bytes, Error>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        match ready!(this.poll_read(cx)) {
            Ok(Some(chunk)) => Some(Ok(chunk)),
            Ok(None) => None,
            Err(e) => Some(Err(e)),
        }
        .into()
    }
}

impl From<Bytes> for Body {
    fn from(b: Bytes) -> Self {
        Body::buffered(std::iter::once(b).collect())
    }
}

impl From<Vec<u8>> for Body {
    fn from(v: Vec<u8>) -> Self {
        Bytes::from(v).into()
    }
}

impl From<&'static [u8]> for Body {
    fn from(v: &'static [u8]) -> Self {
        Bytes::from_static(v).into()
    }
}

impl From<String> for Body {
    fn from(s: String) -> Self {
        Bytes::from(s).into()
    }
}

impl From<&'static str> for Body {
    fn from(s: &'static str) -> Self {
        Bytes::from_static(s.as_bytes()).into()
    }
}

impl From<Vec<&'static str>> for Body {
    fn from(v: Vec<&'static str>) -> Self {
        Body::buffered(v.into_iter().map(|s| Bytes::from_static(s.as_bytes())).collect())
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let kind = match &self.kind {
            Kind::Buffered { .. } => "Buffered",
            Kind::Stream(_) => "Stream",
            Kind::Hijack(_) => "Hijack",
        };
        f.debug_struct("Body")
            .field("kind", &kind)
            .field("length", &self.length())
            .field("finished", &self.finished)
            .finish()
    }
}
