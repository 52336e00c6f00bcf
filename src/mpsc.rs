use crate::Error;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, Waker};

/// Simple bounded queue shared between one producer and one consumer task.
///
/// Closing enqueues an end marker once. Items already queued are still
/// handed out before the consumer sees the end (or the close error).
pub(crate) struct Queue<T> {
    inner: Arc<Mutex<Inner<T>>>,
}

impl<T> Clone for Queue<T> {
    fn clone(&self) -> Self {
        Queue {
            inner: self.inner.clone(),
        }
    }
}

impl<T> Queue<T> {
    pub fn new(bound: usize) -> Self {
        Queue {
            inner: Arc::new(Mutex::new(Inner::new(bound.max(1)))),
        }
    }

    /// Poll for whether there is room for another item.
    ///
    /// Errors with the stored close error once the queue is closed.
    pub fn poll_ready(&self, cx: &mut Context) -> Poll<Result<(), Error>> {
        let mut lock = self.inner.lock().unwrap();
        lock.poll_ready(cx)
    }

    /// Enqueue regardless of bound. Fails if the queue is closed.
    pub fn send(&self, t: T) -> Result<(), Error> {
        let mut lock = self.inner.lock().unwrap();

        if let Some(err) = lock.closed_error() {
            return Err(err);
        }

        lock.enqueue(t);

        Ok(())
    }

    pub fn poll_recv(&self, cx: &mut Context) -> Poll<Result<Option<T>, Error>> {
        let mut lock = self.inner.lock().unwrap();
        lock.poll_dequeue(cx)
    }

    /// Close the queue. Returns `true` the first time, the error of later
    /// calls is ignored.
    pub fn close(&self, error: Option<Error>) -> bool {
        let mut lock = self.inner.lock().unwrap();

        if lock.closed.is_some() {
            return false;
        }

        lock.closed = Some(error);
        lock.wake_all();

        true
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().unwrap().closed.is_some()
    }

    /// The consumer has dequeued the end marker.
    pub fn is_finished(&self) -> bool {
        self.inner.lock().unwrap().finished
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().queue.len()
    }
}

struct Inner<T> {
    queue: VecDeque<T>,
    bound: usize,
    // One list for both producer and consumer. There is
    // only ever one of each waiting.
    wakers: Vec<Waker>,
    // Outer Some once closed, inner Some if closed with an error.
    closed: Option<Option<Error>>,
    finished: bool,
}

impl<T> Inner<T> {
    fn new(bound: usize) -> Self {
        Inner {
            queue: VecDeque::new(),
            bound,
            wakers: Vec::new(),
            closed: None,
            finished: false,
        }
    }

    fn closed_error(&self) -> Option<Error> {
        match &self.closed {
            None => None,
            Some(None) => Some(Error::Closed),
            Some(Some(e)) => Some(e.duplicate()),
        }
    }

    fn poll_ready(&mut self, cx: &mut Context) -> Poll<Result<(), Error>> {
        if let Some(err) = self.closed_error() {
            return Err(err).into();
        }

        if self.queue.len() >= self.bound {
            self.wakers.push(cx.waker().clone());
            Poll::Pending
        } else {
            Ok(()).into()
        }
    }

    fn enqueue(&mut self, t: T) {
        self.queue.push_back(t);
        self.wake_all();
    }

    fn poll_dequeue(&mut self, cx: &mut Context) -> Poll<Result<Option<T>, Error>> {
        if let Some(t) = self.queue.pop_front() {
            self.wake_all();
            return Ok(Some(t)).into();
        }

        match &self.closed {
            Some(error) => {
                self.finished = true;
                match error {
                    Some(e) => Err(e.duplicate()).into(),
                    None => Ok(None).into(),
                }
            }
            None => {
                self.wakers.push(cx.waker().clone());
                Poll::Pending
            }
        }
    }

    fn wake_all(&mut self) {
        for w in self.wakers.drain(..) {
            w.wake();
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use futures_util::future::poll_fn;
    use futures_util::task::noop_waker_ref;

    #[test]
    fn bound_applies_to_ready() {
        let q = Queue::new(1);
        let mut cx = Context::from_waker(noop_waker_ref());

        assert!(q.poll_ready(&mut cx).is_ready());
        q.send(1).unwrap();
        assert!(q.poll_ready(&mut cx).is_pending());

        match q.poll_recv(&mut cx) {
            Poll::Ready(Ok(Some(1))) => {}
            _ => panic!("expected 1"),
        }
        assert!(q.poll_ready(&mut cx).is_ready());
    }

    #[test]
    fn close_delivers_queued_then_end() {
        let q = Queue::new(4);
        q.send("a").unwrap();
        q.send("b").unwrap();
        assert!(q.close(None));
        assert!(!q.close(Some(Error::Closed)));

        async_std::task::block_on(async {
            let a = poll_fn(|cx| q.poll_recv(cx)).await.unwrap();
            let b = poll_fn(|cx| q.poll_recv(cx)).await.unwrap();
            let end = poll_fn(|cx| q.poll_recv(cx)).await.unwrap();
            assert_eq!((a, b, end), (Some("a"), Some("b"), None));
        });

        assert!(q.is_finished());
        assert!(q.send("c").is_err());
    }

    #[test]
    fn close_error_is_stored() {
        let q: Queue<u8> = Queue::new(1);
        q.close(Some(Error::User("boom".into())));

        let err = q.send(1).unwrap_err();
        assert_eq!(err.to_string(), "boom");

        let mut cx = Context::from_waker(noop_waker_ref());
        match q.poll_recv(&mut cx) {
            Poll::Ready(Err(e)) => assert_eq!(e.to_string(), "boom"),
            _ => panic!("expected error"),
        }
    }
}
