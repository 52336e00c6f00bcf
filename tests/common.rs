#![allow(dead_code)]

use async_std::net::{TcpListener, TcpStream};
use async_std::prelude::*;
use hreq_transport::{Body, Client, Error, Handler, Protocol, Server, ServerHandle, TcpEndpoint};
use std::future::Future;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Once};

/// Start a server on a random local port.
pub async fn start_server<H: Handler>(protocol: Protocol, handler: H) -> Result<ServerHandle, Error> {
    setup_logger();
    Server::new(protocol, handler).listen("127.0.0.1:0").await
}

/// Client talking to a server started with `start_server`.
pub fn client_for(handle: &ServerHandle, protocol: Protocol) -> Client {
    let addr = handle.local_addr();
    let endpoint = TcpEndpoint::new("127.0.0.1", addr.port()).with_protocol(protocol);
    Client::new(endpoint)
}

/// Raw TCP server handing each accepted connection and its index to `f`.
///
/// Returns the port and a counter of accepted connections.
pub async fn serve_raw<F, R>(f: F) -> Result<(u16, Arc<AtomicUsize>), io::Error>
where
    F: Fn(usize, TcpStream) -> R + Send + Sync + 'static,
    R: Future<Output = Result<(), io::Error>> + Send + 'static,
{
    setup_logger();

    let l = TcpListener::bind("127.0.0.1:0").await?;
    let port = l.local_addr()?.port();

    let count = Arc::new(AtomicUsize::new(0));
    let count2 = count.clone();

    async_std::task::spawn(async move {
        loop {
            let (tcp, _) = l.accept().await.expect("Accept failed");
            let n = count2.fetch_add(1, Ordering::SeqCst);
            let fut = f(n, tcp);
            async_std::task::spawn(async move {
                if let Err(e) = fut.await {
                    log::debug!("raw server connection {} failed: {}", n, e);
                }
            });
        }
    });

    Ok((port, count))
}

/// Read bytes up to and including the end of an http/1.x head.
pub async fn read_header(tcp: &mut TcpStream) -> Result<String, io::Error> {
    let mut buf = vec![];
    let mut one = [0_u8; 1];

    while !buf.ends_with(b"\r\n\r\n") {
        let n = tcp.read(&mut one).await?;
        if n == 0 {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "EOF in header"));
        }
        buf.push(one[0]);
    }

    Ok(String::from_utf8_lossy(&buf).to_string())
}

/// Read a request head and a body of the declared content-length.
pub async fn read_request(tcp: &mut TcpStream) -> Result<(String, Vec<u8>), io::Error> {
    let head = read_header(tcp).await?;

    let len = head
        .lines()
        .filter_map(|l| {
            let mut split = l.splitn(2, ':');
            let name = split.next()?.trim().to_lowercase();
            let value = split.next()?.trim();
            if name == "content-length" {
                value.parse::<usize>().ok()
            } else {
                None
            }
        })
        .next()
        .unwrap_or(0);

    let mut body = vec![0; len];
    tcp.read_exact(&mut body).await?;

    Ok((head, body))
}

pub async fn read_body(res: &mut http::Response<Body>) -> Result<String, Error> {
    let v = res.body_mut().join().await?;
    Ok(String::from_utf8(v).expect("utf8 body"))
}

pub fn setup_logger() {
    static START: Once = Once::new();
    START.call_once(|| {
        let test_log = std::env::var("TEST_LOG")
            .map(|x| x != "0" && x.to_lowercase() != "false")
            .unwrap_or(false);
        let level = if test_log {
            log::LevelFilter::Trace
        } else {
            log::LevelFilter::Info
        };
        pretty_env_logger::formatted_builder()
            .filter_level(log::LevelFilter::Warn)
            .filter_module("hreq_transport", level)
            .target(env_logger::Target::Stdout)
            .init();
    });
}
