//! Connection pool.
//!
//! Connections are handed out while they have spare concurrency: once for
//! HTTP/1, up to the negotiated stream limit for HTTP/2. When the pool is
//! at its limit, acquirers wait in line and are woken one at a time as
//! capacity is released.

use crate::connection::Connection;
use crate::Error;
use futures_channel::oneshot;
use futures_util::future::BoxFuture;
use std::collections::VecDeque;
use std::fmt;
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Creates new connections for the pool.
pub type Factory = Arc<dyn Fn() -> BoxFuture<'static, Result<Connection, Error>> + Send + Sync>;

/// Pool of connections to one endpoint.
#[derive(Clone)]
pub struct Pool {
    inner: Arc<Inner>,
}

struct Inner {
    factory: Factory,
    limit: Option<usize>,
    connect_retries: usize,
    state: Mutex<State>,
}

struct State {
    entries: Vec<Entry>,
    /// Entries plus connections being created.
    active: usize,
    /// Acquirers waiting for capacity, in arrival order.
    waiters: VecDeque<oneshot::Sender<()>>,
    /// Waiting for nothing to be busy.
    closers: Vec<oneshot::Sender<()>>,
    closed: bool,
}

struct Entry {
    conn: Connection,
    usage: usize,
}

enum Next {
    Create,
    Wait(oneshot::Receiver<()>),
}

impl State {
    /// Wake the first waiter still listening.
    fn signal(&mut self) {
        while let Some(tx) = self.waiters.pop_front() {
            if tx.send(()).is_ok() {
                break;
            }
        }
        for tx in self.closers.drain(..) {
            tx.send(()).ok();
        }
    }

    /// Remove idle entries that can't be used again.
    fn retire_idle(&mut self) -> Vec<Connection> {
        let mut retired = vec![];
        let mut i = 0;

        while i < self.entries.len() {
            let e = &self.entries[i];
            if e.usage == 0 && !e.conn.is_reusable() {
                let e = self.entries.remove(i);
                self.active -= 1;
                retired.push(e.conn);
            } else {
                i += 1;
            }
        }

        retired
    }

    fn busy(&self) -> usize {
        self.entries.iter().filter(|e| e.usage > 0).count()
    }
}

/// Capacity counted in `active` while a connection is created.
///
/// Given back if creating fails or the acquirer goes away.
struct Slot<'a> {
    inner: Option<&'a Inner>,
}

impl Slot<'_> {
    /// The connection is in the pool now, the slot belongs to its entry.
    fn fill(mut self) {
        self.inner = None;
    }
}

impl Drop for Slot<'_> {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.take() {
            let mut state = inner.state.lock().unwrap();
            state.active = state.active.saturating_sub(1);
            state.signal();
        }
    }
}

fn close_all(conns: Vec<Connection>) {
    for conn in conns {
        debug!("Retire connection: {:?}", conn);
        async_std::task::spawn(async move { conn.close(None).await });
    }
}

impl Pool {
    /// New pool creating connections with `factory`.
    ///
    /// `limit` caps the number of connections, `None` is unlimited.
    /// `connect_retries` is how many times creating a connection may fail in
    /// a row before `acquire` gives up.
    pub fn new(factory: Factory, limit: Option<usize>, connect_retries: usize) -> Self {
        let state = State {
            entries: vec![],
            active: 0,
            waiters: VecDeque::new(),
            closers: vec![],
            closed: false,
        };

        Pool {
            inner: Arc::new(Inner {
                factory,
                limit,
                connect_retries: connect_retries.max(1),
                state: Mutex::new(state),
            }),
        }
    }

    /// Get a connection with spare capacity, creating one if under the limit,
    /// or waiting for one to be released.
    pub async fn acquire(&self) -> Result<Connection, Error> {
        let mut failures = 0;

        loop {
            let next = {
                let mut state = self.inner.state.lock().unwrap();

                if state.closed {
                    return Err(Error::User("Pool is closed".into()));
                }

                close_all(state.retire_idle());

                let found = state
                    .entries
                    .iter_mut()
                    .find(|e| e.usage < e.conn.concurrency() && e.conn.is_reusable());

                if let Some(e) = found {
                    e.usage += 1;
                    trace!("Reuse connection, usage: {}", e.usage);
                    return Ok(e.conn.clone());
                }

                let under_limit = self.inner.limit.map(|l| state.active < l).unwrap_or(true);

                if under_limit {
                    state.active += 1;
                    Next::Create
                } else {
                    let (tx, rx) = oneshot::channel();
                    state.waiters.push_back(tx);
                    Next::Wait(rx)
                }
            };

            match next {
                Next::Create => {
                    let slot = Slot {
                        inner: Some(&*self.inner),
                    };

                    let conn = match (self.inner.factory)().await {
                        Ok(v) => v,
                        Err(e) => {
                            drop(slot);

                            failures += 1;
                            debug!("Connect failed ({}): {}", failures, e);

                            if failures >= self.inner.connect_retries {
                                // no connection exists, nothing was sent.
                                return Err(Error::RequestNotSent(io::Error::from(e)));
                            }

                            async_std::task::sleep(Duration::from_millis(10 * failures as u64))
                                .await;
                            continue;
                        }
                    };

                    debug!("New connection: {:?}", conn);

                    let mut state = self.inner.state.lock().unwrap();
                    slot.fill();

                    state.entries.push(Entry {
                        conn: conn.clone(),
                        usage: 1,
                    });

                    // a multiplexed connection may take the waiters too.
                    if conn.concurrency() > 1 {
                        for tx in state.waiters.drain(..) {
                            tx.send(()).ok();
                        }
                    }

                    return Ok(conn);
                }

                Next::Wait(rx) => {
                    trace!("Wait for connection");
                    // a dropped sender means the pool changed, scan again.
                    rx.await.ok();
                }
            }
        }
    }

    /// Give back a connection from `acquire`.
    ///
    /// A connection that can't be reused is closed once its last user
    /// releases it.
    pub fn release(&self, conn: &Connection) {
        let retired = {
            let mut state = self.inner.state.lock().unwrap();

            let idx = match state.entries.iter().position(|e| e.conn.same(conn)) {
                Some(v) => v,
                None => {
                    trace!("Release of unknown connection");
                    return;
                }
            };

            let entry = &mut state.entries[idx];
            entry.usage = entry.usage.saturating_sub(1);

            let retire = entry.usage == 0 && !entry.conn.is_reusable();

            let retired = if retire {
                state.active -= 1;
                Some(state.entries.remove(idx).conn)
            } else {
                None
            };

            state.signal();

            retired
        };

        if let Some(conn) = retired {
            close_all(vec![conn]);
        }
    }

    /// Number of connections in use.
    pub fn busy(&self) -> usize {
        self.inner.state.lock().unwrap().busy()
    }

    /// Number of connections in the pool.
    pub fn size(&self) -> usize {
        self.inner.state.lock().unwrap().entries.len()
    }

    /// Wait until no connection is in use, then close all of them.
    pub async fn close(&self) {
        loop {
            let rx = {
                let mut state = self.inner.state.lock().unwrap();
                if state.busy() == 0 {
                    break;
                }
                let (tx, rx) = oneshot::channel();
                state.closers.push(tx);
                rx
            };
            rx.await.ok();
        }

        let conns: Vec<Connection> = {
            let mut state = self.inner.state.lock().unwrap();
            state.closed = true;
            state.active = 0;
            state.waiters.clear();
            state.entries.drain(..).map(|e| e.conn).collect()
        };

        debug!("Close pool with {} connections", conns.len());

        for conn in conns {
            conn.close(None).await;
        }
    }
}

impl fmt::Debug for Pool {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let state = self.inner.state.lock().unwrap();
        f.debug_struct("Pool")
            .field("size", &state.entries.len())
            .field("busy", &state.busy())
            .field("active", &state.active)
            .field("limit", &self.inner.limit)
            .finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::h1;
    use async_std::net::{TcpListener, TcpStream};
    use futures_util::future::{select, Either, FutureExt};
    use std::sync::atomic::{AtomicUsize, Ordering};

    async fn tcp_factory(fail_first: usize) -> Result<(Factory, Arc<AtomicUsize>), Error> {
        let l = TcpListener::bind("127.0.0.1:0").await?;
        let addr = l.local_addr()?;

        async_std::task::spawn(async move {
            let mut held = vec![];
            loop {
                let (tcp, _) = l.accept().await.unwrap();
                held.push(tcp);
            }
        });

        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = calls.clone();

        let factory: Factory = Arc::new(move || {
            let n = calls2.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < fail_first {
                    return Err(Error::from(io::Error::new(
                        io::ErrorKind::ConnectionRefused,
                        "nope",
                    )));
                }
                let tcp = TcpStream::connect(addr).await?;
                Ok(Connection::Http1(h1::Connection::new(Box::new(tcp))))
            }
            .boxed()
        });

        Ok((factory, calls))
    }

    #[async_std::test]
    async fn http1_blocks_at_limit() -> Result<(), Error> {
        let (factory, _) = tcp_factory(0).await?;
        let pool = Pool::new(factory, Some(1), 3);

        let c1 = pool.acquire().await?;
        assert_eq!(pool.busy(), 1);

        let waiting = pool.acquire().boxed();
        let timeout = async_std::task::sleep(Duration::from_millis(50)).boxed();

        let waiting = match select(waiting, timeout).await {
            Either::Left(_) => panic!("acquire should block"),
            Either::Right((_, w)) => w,
        };

        pool.release(&c1);

        let c2 = waiting.await?;
        assert!(c1.same(&c2));
        assert_eq!(pool.size(), 1);

        Ok(())
    }

    #[async_std::test]
    async fn closed_connection_is_retired() -> Result<(), Error> {
        let (factory, _) = tcp_factory(0).await?;
        let pool = Pool::new(factory, None, 3);

        let c1 = pool.acquire().await?;
        c1.close(None).await;
        pool.release(&c1);
        assert_eq!(pool.size(), 0);

        let c2 = pool.acquire().await?;
        assert!(!c1.same(&c2));

        Ok(())
    }

    #[async_std::test]
    async fn connect_failures_are_retried() -> Result<(), Error> {
        let (factory, calls) = tcp_factory(2).await?;
        let pool = Pool::new(factory, None, 3);

        pool.acquire().await?;
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        Ok(())
    }

    #[async_std::test]
    async fn connect_gives_up_as_not_sent() -> Result<(), Error> {
        let (factory, _) = tcp_factory(10).await?;
        let pool = Pool::new(factory, None, 2);

        let err = pool.acquire().await.unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::RequestNotSent);
        assert_eq!(pool.size(), 0);

        Ok(())
    }

    #[async_std::test]
    async fn cancelled_connect_frees_its_slot() -> Result<(), Error> {
        let (tcp, _) = tcp_factory(0).await?;
        let made = Arc::new(AtomicUsize::new(0));

        // the first connect never finishes.
        let factory: Factory = Arc::new(move || {
            if made.fetch_add(1, Ordering::SeqCst) == 0 {
                async {
                    async_std::task::sleep(Duration::from_secs(60)).await;
                    Err::<Connection, _>(Error::Closed)
                }
                .boxed()
            } else {
                tcp()
            }
        });

        let pool = Pool::new(factory, Some(1), 3);

        let res = async_std::future::timeout(Duration::from_millis(50), pool.acquire()).await;
        assert!(res.is_err());

        let conn = async_std::future::timeout(Duration::from_secs(5), pool.acquire())
            .await
            .expect("slot given back")?;
        assert!(conn.is_viable());
        assert_eq!(pool.size(), 1);

        Ok(())
    }

    #[async_std::test]
    async fn close_waits_for_busy() -> Result<(), Error> {
        let (factory, _) = tcp_factory(0).await?;
        let pool = Pool::new(factory, None, 3);

        let c1 = pool.acquire().await?;

        let pool2 = pool.clone();
        let closing = async_std::task::spawn(async move { pool2.close().await });

        async_std::task::sleep(Duration::from_millis(20)).await;
        assert_eq!(pool.size(), 1);

        pool.release(&c1);
        closing.await;

        assert_eq!(pool.size(), 0);
        assert!(!c1.is_viable());

        Ok(())
    }
}
