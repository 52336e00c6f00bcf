use async_std::net::TcpStream;
use async_std::prelude::*;
use hreq_transport::{h1, Body, Client, Error, Protocol, TcpEndpoint, Writable};

mod common;

async fn connect(port: u16) -> Result<h1::Connection, Error> {
    let tcp = TcpStream::connect(("127.0.0.1", port)).await?;
    Ok(h1::Connection::new(Box::new(tcp)))
}

#[async_std::test]
async fn get_with_content_length() -> Result<(), Error> {
    let (port, _) = common::serve_raw(|_, mut tcp| async move {
        let head = common::read_header(&mut tcp).await?;
        assert!(head.starts_with("GET /path HTTP/1.1\r\n"));
        assert!(head.contains("host: 127.0.0.1"));
        tcp.write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 2\r\n\r\nOK")
            .await
    })
    .await?;

    let conn = connect(port).await?;
    let mut req = http::Request::get(format!("http://127.0.0.1:{}/path", port)).body(Body::empty())?;

    let mut res = conn.call(&mut req).await?;
    assert_eq!(res.status(), 200);
    assert_eq!(common::read_body(&mut res).await?, "OK");

    Ok(())
}

#[async_std::test]
async fn chunked_response() -> Result<(), Error> {
    let (port, _) = common::serve_raw(|_, mut tcp| async move {
        common::read_header(&mut tcp).await?;
        tcp.write_all(
            b"HTTP/1.1 200 OK\r\ntransfer-encoding: chunked\r\n\r\n\
              5\r\nhello\r\n6\r\n world\r\n0\r\n\r\n",
        )
        .await
    })
    .await?;

    let conn = connect(port).await?;
    let mut req = http::Request::get("/").body(Body::empty())?;

    let mut res = conn.call(&mut req).await?;
    assert_eq!(common::read_body(&mut res).await?, "hello world");
    assert!(conn.is_reusable());

    Ok(())
}

#[async_std::test]
async fn streamed_request_body_is_chunked() -> Result<(), Error> {
    let (port, _) = common::serve_raw(|_, mut tcp| async move {
        let head = common::read_header(&mut tcp).await?;
        assert!(head.contains("transfer-encoding: chunked\r\n"));

        let mut rest = vec![];
        while !rest.ends_with(b"0\r\n\r\n") {
            let mut buf = [0_u8; 64];
            let n = tcp.read(&mut buf).await?;
            assert!(n > 0);
            rest.extend_from_slice(&buf[..n]);
        }
        assert_eq!(rest, b"3\r\nabc\r\n3\r\ndef\r\n0\r\n\r\n");

        tcp.write_all(b"HTTP/1.1 204 No Content\r\n\r\n").await
    })
    .await?;

    let w = Writable::new(1);
    let w2 = w.clone();
    async_std::task::spawn(async move {
        w2.write("abc").await.unwrap();
        w2.write("def").await.unwrap();
        w2.close(None);
    });

    let conn = connect(port).await?;
    let mut req = http::Request::post("/up").body(Body::from(w))?;

    let mut res = conn.call(&mut req).await?;
    assert_eq!(res.status(), 204);
    assert_eq!(common::read_body(&mut res).await?, "");

    Ok(())
}

#[async_std::test]
async fn http10_response_until_close() -> Result<(), Error> {
    let (port, _) = common::serve_raw(|_, mut tcp| async move {
        common::read_header(&mut tcp).await?;
        tcp.write_all(b"HTTP/1.0 200 OK\r\n\r\nuntil the end").await
    })
    .await?;

    let conn = connect(port).await?;
    let mut req = http::Request::get("/").body(Body::empty())?;

    let mut res = conn.call(&mut req).await?;
    assert_eq!(common::read_body(&mut res).await?, "until the end");
    assert!(!conn.is_reusable());

    Ok(())
}

#[async_std::test]
async fn head_response_has_no_body() -> Result<(), Error> {
    let (port, _) = common::serve_raw(|_, mut tcp| async move {
        common::read_header(&mut tcp).await?;
        tcp.write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 100\r\n\r\n")
            .await?;
        common::read_header(&mut tcp).await?;
        tcp.write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 2\r\n\r\nOK")
            .await
    })
    .await?;

    let conn = connect(port).await?;

    let mut req = http::Request::head("/").body(Body::empty())?;
    let mut res = conn.call(&mut req).await?;
    assert_eq!(common::read_body(&mut res).await?, "");

    // the same connection is usable for the next request.
    let mut req = http::Request::get("/").body(Body::empty())?;
    let mut res = conn.call(&mut req).await?;
    assert_eq!(common::read_body(&mut res).await?, "OK");
    assert_eq!(conn.count(), 2);

    Ok(())
}

#[async_std::test]
async fn busy_connection_refuses_second_call() -> Result<(), Error> {
    let (port, _) = common::serve_raw(|_, mut tcp| async move {
        common::read_header(&mut tcp).await?;
        tcp.write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 2\r\n\r\n")
            .await?;
        async_std::task::sleep(std::time::Duration::from_millis(100)).await;
        tcp.write_all(b"OK").await
    })
    .await?;

    let conn = connect(port).await?;

    let mut req = http::Request::get("/").body(Body::empty())?;
    let mut res = conn.call(&mut req).await?;

    let mut req = http::Request::get("/").body(Body::empty())?;
    let err = conn.call(&mut req).await.unwrap_err();
    assert_eq!(err.kind(), hreq_transport::ErrorKind::User);

    assert_eq!(common::read_body(&mut res).await?, "OK");

    Ok(())
}

#[async_std::test]
async fn client_reuses_keep_alive_connection() -> Result<(), Error> {
    let (port, accepted) = common::serve_raw(|_, mut tcp| async move {
        loop {
            if common::read_header(&mut tcp).await.is_err() {
                return Ok::<(), std::io::Error>(());
            }
            tcp.write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 2\r\n\r\nOK")
                .await?;
        }
    })
    .await?;

    let client = Client::new(TcpEndpoint::new("127.0.0.1", port).with_protocol(Protocol::Http1));

    for _ in 0..5 {
        let mut res = client.get("/path").await?;
        assert_eq!(common::read_body(&mut res).await?, "OK");
    }

    assert_eq!(accepted.load(std::sync::atomic::Ordering::SeqCst), 1);
    assert_eq!(client.pool().size(), 1);
    assert_eq!(client.pool().busy(), 0);

    client.close().await;

    Ok(())
}
