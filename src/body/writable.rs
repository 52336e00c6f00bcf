use super::{Body, Readable};
use crate::mpsc::Queue;
use crate::AsyncWrite;
use crate::Error;
use bytes::Bytes;
use futures_util::future::poll_fn;
use futures_util::ready;
use std::fmt;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

/// Queue size used for bodies fed by a connection task.
pub(crate) const DEFAULT_BOUND: usize = 2;

/// A body fed by a producer task.
///
/// Chunks are queued up to `bound`, after which `write` waits for the
/// consumer to catch up. Cloning gives another handle to the same queue,
/// typically one kept by the producer while the consumer reads through
/// the [`Body`] it was turned into.
#[derive(Clone)]
pub struct Writable {
    queue: Queue<Bytes>,
    length: Option<u64>,
}

impl Writable {
    /// Create a writable with room for `bound` queued chunks.
    pub fn new(bound: usize) -> Self {
        Writable {
            queue: Queue::new(bound),
            length: None,
        }
    }

    /// Create a writable that will carry exactly `length` bytes.
    pub fn with_length(bound: usize, length: u64) -> Self {
        Writable {
            queue: Queue::new(bound),
            length: Some(length),
        }
    }

    /// Enqueue a chunk, waiting while the queue is full.
    ///
    /// Fails with the close error once the writable is closed.
    pub async fn write<B: Into<Bytes>>(&self, chunk: B) -> Result<(), Error> {
        poll_fn(|cx| self.queue.poll_ready(cx)).await?;
        self.queue.send(chunk.into())
    }

    /// Enqueue without regard to the bound.
    pub(crate) fn try_write(&self, chunk: Bytes) -> Result<(), Error> {
        self.queue.send(chunk)
    }

    /// Close the writable, optionally with an error the consumer receives
    /// after the already queued chunks.
    ///
    /// Returns `true` for the call that actually closed it.
    pub fn close(&self, error: Option<Error>) -> bool {
        self.queue.close(error)
    }

    /// Whether `close` has been called.
    pub fn is_closed(&self) -> bool {
        self.queue.is_closed()
    }

    /// Whether the consumer has read to the end.
    pub fn is_finished(&self) -> bool {
        self.queue.is_finished()
    }

    /// Number of chunks waiting for the consumer.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Whether there are no chunks waiting for the consumer.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Readable for Writable {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context) -> Poll<Result<Option<Bytes>, Error>> {
        self.queue.poll_recv(cx)
    }

    fn close(&mut self, error: Option<Error>) {
        self.queue.close(error);
    }

    fn length(&self) -> Option<u64> {
        self.length
    }
}

impl AsyncWrite for Writable {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context, buf: &[u8]) -> Poll<io::Result<usize>> {
        let this = self.get_mut();

        ready!(this.queue.poll_ready(cx))?;
        this.queue.send(Bytes::copy_from_slice(buf))?;

        Ok(buf.len()).into()
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context) -> Poll<io::Result<()>> {
        Ok(()).into()
    }

    fn poll_close(self: Pin<&mut Self>, _cx: &mut Context) -> Poll<io::Result<()>> {
        self.queue.close(None);
        Ok(()).into()
    }
}

impl From<Writable> for Body {
    fn from(w: Writable) -> Self {
        Body::new(w)
    }
}

impl fmt::Debug for Writable {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "Writable {{ queued: {}, closed: {} }}",
            self.len(),
            self.is_closed()
        )
    }
}
