use async_std::net::TcpStream;
use async_std::prelude::*;
use futures_io::{AsyncRead, AsyncWrite};
use futures_util::future::{join, BoxFuture, FutureExt};
use hreq_transport::{BoxIo, Client, Endpoint, Error, ErrorKind, Protocol, TcpEndpoint};
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

mod common;

/// The first connection reads the request and hangs up without answering.
async fn flaky_server() -> Result<(u16, Arc<AtomicUsize>), Error> {
    let (port, accepted) = common::serve_raw(|n, mut tcp| async move {
        let _ = common::read_request(&mut tcp).await?;
        if n == 0 {
            return Ok(());
        }
        tcp.write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 2\r\n\r\nOK")
            .await?;
        // hold the connection until the client is done.
        let _ = common::read_header(&mut tcp).await;
        Ok::<(), std::io::Error>(())
    })
    .await?;
    Ok((port, accepted))
}

fn client(port: u16) -> Client {
    Client::new(TcpEndpoint::new("127.0.0.1", port).with_protocol(Protocol::Http1))
}

#[async_std::test]
async fn get_is_retried_on_broken_transport() -> Result<(), Error> {
    let (port, accepted) = flaky_server().await?;
    let client = client(port);

    let mut res = client.get("/").await?;
    assert_eq!(common::read_body(&mut res).await?, "OK");
    assert_eq!(accepted.load(Ordering::SeqCst), 2);

    Ok(())
}

#[async_std::test]
async fn post_is_not_retried_on_broken_transport() -> Result<(), Error> {
    let (port, accepted) = flaky_server().await?;
    let client = client(port);

    let err = client.post("/", "data").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TransportBroken);
    assert_eq!(accepted.load(Ordering::SeqCst), 1);

    Ok(())
}

#[async_std::test]
async fn retries_stop_at_limit() -> Result<(), Error> {
    let (port, accepted) = common::serve_raw(|_, mut tcp| async move {
        let _ = common::read_request(&mut tcp).await?;
        Ok::<(), std::io::Error>(())
    })
    .await?;

    let client = Client::builder()
        .retries(2)
        .build(TcpEndpoint::new("127.0.0.1", port));

    let err = client.get("/").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TransportBroken);
    assert_eq!(accepted.load(Ordering::SeqCst), 2);

    Ok(())
}

#[async_std::test]
async fn refused_connect_is_not_sent() -> Result<(), Error> {
    common::setup_logger();

    // bind and drop to get a port nobody listens on.
    let port = {
        let l = async_std::net::TcpListener::bind("127.0.0.1:0").await?;
        l.local_addr()?.port()
    };

    let client = Client::builder()
        .connect_retries(2)
        .retries(1)
        .build(TcpEndpoint::new("127.0.0.1", port));

    let err = client.get("/").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::RequestNotSent);

    Ok(())
}

#[async_std::test]
async fn cancelled_call_gives_back_its_connection() -> Result<(), Error> {
    let (port, accepted) = common::serve_raw(|n, mut tcp| async move {
        let _ = common::read_request(&mut tcp).await?;
        if n == 0 {
            // never answer the first request.
            async_std::task::sleep(Duration::from_secs(10)).await;
            return Ok(());
        }
        tcp.write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 2\r\n\r\nOK")
            .await?;
        let _ = common::read_header(&mut tcp).await;
        Ok::<(), std::io::Error>(())
    })
    .await?;

    let client = Client::builder()
        .limit(1)
        .build(TcpEndpoint::new("127.0.0.1", port));

    let res = async_std::future::timeout(Duration::from_millis(100), client.get("/")).await;
    assert!(res.is_err());
    assert_eq!(client.pool().busy(), 0);

    let mut res = async_std::future::timeout(Duration::from_secs(5), client.get("/"))
        .await
        .expect("second call blocked")?;
    assert_eq!(common::read_body(&mut res).await?, "OK");
    assert_eq!(accepted.load(Ordering::SeqCst), 2);

    async_std::future::timeout(Duration::from_secs(5), client.close())
        .await
        .expect("close blocked");

    Ok(())
}

/// Transport failing every write, like a connection reset before sending.
struct Unwritable;

impl AsyncRead for Unwritable {
    fn poll_read(self: Pin<&mut Self>, _: &mut Context, _: &mut [u8]) -> Poll<io::Result<usize>> {
        Poll::Ready(Ok(0))
    }
}

impl AsyncWrite for Unwritable {
    fn poll_write(self: Pin<&mut Self>, _: &mut Context, _: &[u8]) -> Poll<io::Result<usize>> {
        Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "reset")))
    }

    fn poll_flush(self: Pin<&mut Self>, _: &mut Context) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_close(self: Pin<&mut Self>, _: &mut Context) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

/// Endpoint whose first transport can't be written to.
struct FirstUnwritable {
    authority: String,
    connects: Arc<AtomicUsize>,
}

impl Endpoint for FirstUnwritable {
    fn connect(&self) -> BoxFuture<'static, io::Result<BoxIo>> {
        let first = self.connects.fetch_add(1, Ordering::SeqCst) == 0;
        let addr = self.authority.clone();

        async move {
            if first {
                return Ok(Box::new(Unwritable) as BoxIo);
            }
            let tcp = TcpStream::connect(&addr).await?;
            Ok(Box::new(tcp) as BoxIo)
        }
        .boxed()
    }

    fn protocol(&self) -> Protocol {
        Protocol::Http1
    }

    fn scheme(&self) -> &str {
        "http"
    }

    fn authority(&self) -> &str {
        &self.authority
    }
}

#[async_std::test]
async fn post_is_resent_when_not_sent() -> Result<(), Error> {
    let (port, _) = common::serve_raw(|_, mut tcp| async move {
        let (_, body) = common::read_request(&mut tcp).await?;
        let head = format!("HTTP/1.1 200 OK\r\ncontent-length: {}\r\n\r\n", body.len());
        tcp.write_all(head.as_bytes()).await?;
        tcp.write_all(&body).await?;
        let _ = common::read_header(&mut tcp).await;
        Ok::<(), std::io::Error>(())
    })
    .await?;

    let connects = Arc::new(AtomicUsize::new(0));

    let client = Client::new(FirstUnwritable {
        authority: format!("127.0.0.1:{}", port),
        connects: connects.clone(),
    });

    let mut res = client.post("/", "payload").await?;
    assert_eq!(common::read_body(&mut res).await?, "payload");
    assert_eq!(connects.load(Ordering::SeqCst), 2);

    Ok(())
}

#[async_std::test]
async fn keep_alive_requests_never_overlap() -> Result<(), Error> {
    let early = Arc::new(AtomicUsize::new(0));
    let early2 = early.clone();

    let (port, accepted) = common::serve_raw(move |_, mut tcp| {
        let early = early2.clone();
        async move {
            common::read_request(&mut tcp).await?;
            tcp.write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 6\r\n\r\nabc")
                .await?;

            // half the body is out, the next request must wait for the rest.
            let mut one = [0_u8; 1];
            let res = async_std::io::timeout(Duration::from_millis(100), tcp.read(&mut one)).await;
            if res.is_ok() {
                early.fetch_add(1, Ordering::SeqCst);
                return Ok(());
            }

            tcp.write_all(b"def").await?;

            common::read_request(&mut tcp).await?;
            tcp.write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 3\r\n\r\nghi")
                .await?;

            let _ = common::read_header(&mut tcp).await;
            Ok::<(), std::io::Error>(())
        }
    })
    .await?;

    let client = Client::builder()
        .limit(1)
        .build(TcpEndpoint::new("127.0.0.1", port));

    let call = |path: &'static str| {
        let client = client.clone();
        async move {
            let mut res = client.get(path).await?;
            common::read_body(&mut res).await
        }
    };

    let (a, b) = join(call("/1"), call("/2")).await;
    let mut bodies = vec![a?, b?];
    bodies.sort();

    assert_eq!(bodies, vec!["abcdef", "ghi"]);
    assert_eq!(early.load(Ordering::SeqCst), 0);
    assert_eq!(accepted.load(Ordering::SeqCst), 1);

    Ok(())
}
