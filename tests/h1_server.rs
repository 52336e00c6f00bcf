use async_std::net::TcpStream;
use async_std::prelude::*;
use hreq_transport::{Body, Error, Protocol, Writable};

mod common;

async fn exchange(port: u16, raw: &[u8]) -> Result<String, Error> {
    let mut tcp = TcpStream::connect(("127.0.0.1", port)).await?;
    tcp.write_all(raw).await?;
    let mut out = vec![];
    tcp.read_to_end(&mut out).await?;
    Ok(String::from_utf8_lossy(&out).to_string())
}

#[async_std::test]
async fn server_request_with_body_clen() -> Result<(), Error> {
    let handle = common::start_server(Protocol::Http1, |mut req: http::Request<Body>| async move {
        assert_eq!(req.method(), "POST");
        assert_eq!(req.uri().path(), "/path");
        let body = req.body_mut().join().await?;
        assert_eq!(body, b"OK\n");
        Ok::<_, Error>(http::Response::new(Body::from("thanks")))
    })
    .await?;

    let out = exchange(
        handle.local_addr().port(),
        b"POST /path HTTP/1.1\r\ncontent-length: 3\r\nconnection: close\r\n\r\nOK\n",
    )
    .await?;

    assert!(out.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(out.contains("content-length: 6\r\n"));
    assert!(out.ends_with("\r\n\r\nthanks"));

    Ok(())
}

#[async_std::test]
async fn server_request_with_body_chunked() -> Result<(), Error> {
    let handle = common::start_server(Protocol::Http1, |mut req: http::Request<Body>| async move {
        let body = req.body_mut().join().await?;
        Ok::<_, Error>(http::Response::new(Body::from(body)))
    })
    .await?;

    let out = exchange(
        handle.local_addr().port(),
        b"POST /path HTTP/1.1\r\ntransfer-encoding: chunked\r\nconnection: close\r\n\r\n\
          3\r\nOK\n\r\n0\r\n\r\n",
    )
    .await?;

    assert!(out.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(out.ends_with("\r\n\r\nOK\n"));

    Ok(())
}

#[async_std::test]
async fn server_streams_chunked_response() -> Result<(), Error> {
    let handle = common::start_server(Protocol::Http1, |_req: http::Request<Body>| async move {
        let w = Writable::new(1);
        let body = Body::from(w.clone());
        async_std::task::spawn(async move {
            for part in &["one", "two"] {
                w.write(*part).await.ok();
            }
            w.close(None);
        });
        Ok::<_, Error>(http::Response::new(body))
    })
    .await?;

    let out = exchange(
        handle.local_addr().port(),
        b"GET / HTTP/1.1\r\nconnection: close\r\n\r\n",
    )
    .await?;

    assert!(out.contains("transfer-encoding: chunked\r\n"));
    assert!(out.ends_with("\r\n\r\n3\r\none\r\n3\r\ntwo\r\n0\r\n\r\n"));

    Ok(())
}

#[async_std::test]
async fn keep_alive_serves_pipelined_requests() -> Result<(), Error> {
    let handle = common::start_server(Protocol::Http1, |req: http::Request<Body>| async move {
        let path = req.uri().path().to_string();
        Ok::<_, Error>(http::Response::new(Body::from(path)))
    })
    .await?;

    let out = exchange(
        handle.local_addr().port(),
        b"GET /a HTTP/1.1\r\n\r\nGET /b HTTP/1.1\r\nconnection: close\r\n\r\n",
    )
    .await?;

    let first = out.find("\r\n\r\n/a").expect("first response");
    let second = out.find("\r\n\r\n/b").expect("second response");
    assert!(first < second);

    Ok(())
}

#[async_std::test]
async fn bad_request_head_is_400() -> Result<(), Error> {
    let handle = common::start_server(Protocol::Http1, |_req: http::Request<Body>| async move {
        Ok::<_, Error>(http::Response::new(Body::empty()))
    })
    .await?;

    let out = exchange(handle.local_addr().port(), b"NOT HTTP AT ALL\r\n\r\n").await?;

    assert!(out.starts_with("HTTP/1.1 400 Bad Request\r\n"));
    assert!(out.contains("connection: close\r\n"));

    Ok(())
}

#[async_std::test]
async fn head_request_gets_no_body() -> Result<(), Error> {
    let handle = common::start_server(Protocol::Http1, |_req: http::Request<Body>| async move {
        Ok::<_, Error>(http::Response::new(Body::from("not sent")))
    })
    .await?;

    let out = exchange(
        handle.local_addr().port(),
        b"HEAD / HTTP/1.1\r\nconnection: close\r\n\r\n",
    )
    .await?;

    assert!(out.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(out.ends_with("\r\n\r\n"));

    Ok(())
}

#[async_std::test]
async fn stopped_server_refuses_connections() -> Result<(), Error> {
    let handle = common::start_server(Protocol::Http1, |_req: http::Request<Body>| async move {
        Ok::<_, Error>(http::Response::new(Body::empty()))
    })
    .await?;

    handle.stop();
    async_std::task::sleep(std::time::Duration::from_millis(20)).await;

    let res = TcpStream::connect(handle.local_addr()).await;
    assert!(res.is_err());

    Ok(())
}
