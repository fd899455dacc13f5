//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use a2a_courier::config::{ListenerConfig, ReplayConfig};
use a2a_courier::envelope::Envelope;
use a2a_courier::http::{InboundServer, InboundState};
use a2a_courier::replay::{InMemoryNonceStore, ReplayValidator};

/// Canned HTTP response served by a mock peer.
#[derive(Debug, Clone)]
pub struct MockResponse {
    pub status: u16,
    pub headers: Vec<(&'static str, String)>,
    pub body: String,
}

impl MockResponse {
    pub fn status(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: String::new(),
        }
    }

    pub fn header(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.headers.push((name, value.into()));
        self
    }
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        202 => "Accepted",
        400 => "Bad Request",
        404 => "Not Found",
        409 => "Conflict",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        _ => "Unknown",
    }
}

/// Read one request (headers plus `Content-Length` body) so the client never sees a
/// reset while still writing.
async fn drain_request(socket: &mut TcpStream) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = match socket.read(&mut chunk).await {
            Ok(0) | Err(_) => return,
            Ok(n) => n,
        };
        buf.extend_from_slice(&chunk[..n]);

        let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") else {
            continue;
        };
        let head = String::from_utf8_lossy(&buf[..end]).to_ascii_lowercase();
        let content_length = head
            .lines()
            .find_map(|line| line.strip_prefix("content-length:"))
            .and_then(|v| v.trim().parse::<usize>().ok())
            .unwrap_or(0);
        if buf.len() >= end + 4 + content_length {
            return;
        }
    }
}

/// Start a programmable mock peer on an ephemeral port.
///
/// `f` is called once per request, after the request has been read.
pub async fn start_programmable_peer<F, Fut>(f: F) -> SocketAddr
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = MockResponse> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let f = Arc::new(f);

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    let f = f.clone();
                    tokio::spawn(async move {
                        drain_request(&mut socket).await;
                        let response = f().await;

                        let mut head = format!(
                            "HTTP/1.1 {} {}\r\nContent-Length: {}\r\nConnection: close\r\n",
                            response.status,
                            reason(response.status),
                            response.body.len()
                        );
                        for (name, value) in &response.headers {
                            head.push_str(&format!("{}: {}\r\n", name, value));
                        }
                        head.push_str("\r\n");

                        let _ = socket.write_all(head.as_bytes()).await;
                        let _ = socket.write_all(response.body.as_bytes()).await;
                        let _ = socket.shutdown().await;
                    });
                }
                Err(_) => break,
            }
        }
    });

    addr
}

/// An address nothing is listening on.
pub fn dead_addr() -> SocketAddr {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

/// A running inbound endpoint.
pub struct TestPeer {
    pub addr: SocketAddr,
    pub deliveries: mpsc::Receiver<Envelope>,
    pub shutdown: CancellationToken,
}

impl TestPeer {
    pub fn http_url(&self) -> url::Url {
        url::Url::parse(&format!("http://{}/envelopes", self.addr)).unwrap()
    }

    pub fn ws_url(&self) -> url::Url {
        url::Url::parse(&format!("ws://{}/ws", self.addr)).unwrap()
    }
}

impl Drop for TestPeer {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Start an `InboundServer` on an ephemeral port with default replay settings.
pub async fn start_inbound_peer() -> TestPeer {
    start_inbound_peer_with(ReplayConfig::default()).await
}

pub async fn start_inbound_peer_with(replay: ReplayConfig) -> TestPeer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let (tx, rx) = mpsc::channel(64);
    let validator = ReplayValidator::from_config(&replay, Arc::new(InMemoryNonceStore::new()));
    let server = InboundServer::new(ListenerConfig::default(), InboundState::new(validator, tx));

    let shutdown = CancellationToken::new();
    let token = shutdown.clone();
    tokio::spawn(async move {
        let _ = server.run(listener, token).await;
    });

    TestPeer {
        addr,
        deliveries: rx,
        shutdown,
    }
}
