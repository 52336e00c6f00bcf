use futures_util::future::{BoxFuture, FutureExt};
use hreq_transport::{Body, Error, Middleware, Protocol};

mod common;

async fn hello(_req: http::Request<Body>) -> Result<http::Response<Body>, Error> {
    Ok(http::Response::new(Body::from(vec!["Hello", " ", "World"])))
}

#[async_std::test]
async fn hello_world_http1() -> Result<(), Error> {
    let handle = common::start_server(Protocol::Http1, hello).await?;
    let client = common::client_for(&handle, Protocol::Http1);

    for _ in 0..3 {
        let mut res = client.get("/").await?;
        assert_eq!(res.status(), 200);
        assert_eq!(res.headers()["content-length"], "11");
        assert_eq!(common::read_body(&mut res).await?, "Hello World");
    }

    assert_eq!(client.pool().busy(), 0);
    assert_eq!(client.pool().size(), 1);

    client.close().await;
    handle.stop();

    Ok(())
}

#[async_std::test]
async fn dropped_response_releases_connection() -> Result<(), Error> {
    let handle = common::start_server(Protocol::Http1, hello).await?;
    let client = common::client_for(&handle, Protocol::Http1);

    let res = client.get("/").await?;
    assert_eq!(client.pool().busy(), 1);

    drop(res);
    assert_eq!(client.pool().busy(), 0);

    // the abandoned connection is not handed out again.
    let mut res = client.get("/").await?;
    assert_eq!(common::read_body(&mut res).await?, "Hello World");

    Ok(())
}

#[async_std::test]
async fn echo_streams_both_ways() -> Result<(), Error> {
    for protocol in &[Protocol::Http1, Protocol::Http2] {
        let handle = common::start_server(*protocol, |req: http::Request<Body>| async move {
            // hand the request body straight back.
            let (_, body) = req.into_parts();
            Ok::<_, Error>(http::Response::new(body))
        })
        .await?;

        let client = common::client_for(&handle, *protocol);

        let mut res = client.put("/echo", "round trip").await?;
        assert_eq!(common::read_body(&mut res).await?, "round trip");

        client.close().await;
    }

    Ok(())
}

/// Follows redirects by calling the wrapped middleware again.
struct Redirects<M> {
    inner: M,
    max: usize,
}

impl<M: Middleware> Middleware for Redirects<M> {
    fn call(&self, req: http::Request<Body>) -> BoxFuture<'_, Result<http::Response<Body>, Error>> {
        async move {
            let method = req.method().clone();
            let mut req = req;

            for _ in 0..self.max {
                let res = self.inner.call(req).await?;

                if !res.status().is_redirection() {
                    return Ok(res);
                }

                let location = res
                    .headers()
                    .get("location")
                    .and_then(|v| v.to_str().ok())
                    .ok_or_else(|| Error::User("redirect without location".into()))?
                    .to_string();

                drop(res);

                req = http::Request::builder()
                    .method(method.clone())
                    .uri(location)
                    .body(Body::empty())?;
            }

            Err(Error::User("too many redirects".into()))
        }
        .boxed()
    }

    fn close(&self) -> BoxFuture<'_, ()> {
        self.inner.close()
    }
}

#[async_std::test]
async fn redirect_middleware_wraps_client() -> Result<(), Error> {
    let handle = common::start_server(Protocol::Http1, |req: http::Request<Body>| async move {
        let res = if req.uri().path() == "/" {
            http::Response::builder()
                .status(301)
                .header("location", "/index.html")
                .body(Body::empty())?
        } else {
            http::Response::new(Body::from(req.uri().path().to_string()))
        };
        Ok::<_, Error>(res)
    })
    .await?;

    let client = Redirects {
        inner: common::client_for(&handle, Protocol::Http1),
        max: 5,
    };

    let req = http::Request::get("/").body(Body::empty())?;
    let mut res = client.call(req).await?;

    assert_eq!(res.status(), 200);
    assert_eq!(common::read_body(&mut res).await?, "/index.html");

    client.close().await;

    Ok(())
}
