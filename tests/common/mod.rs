//! Shared fixtures for integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::Mutex;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::time::Instant;

use needleware_proxy::config::loader::parse_config;
use needleware_proxy::config::ProxyConfig;
use needleware_proxy::needleware::client::{
    ClientError, ConnectionId, DecisionClient, DecisionCode, DecisionCriteria, DecisionResponse,
};

/// Decision client answering every request with the same code.
#[derive(Debug)]
pub struct MockDecisionClient {
    code: DecisionCode,
    opened: Mutex<Vec<DecisionCriteria>>,
    closed: Mutex<Vec<ConnectionId>>,
}

impl MockDecisionClient {
    pub fn new(code: DecisionCode) -> Self {
        Self {
            code,
            opened: Mutex::new(Vec::new()),
            closed: Mutex::new(Vec::new()),
        }
    }

    pub fn opened(&self) -> Vec<DecisionCriteria> {
        self.opened.lock().unwrap().clone()
    }

    pub fn closed(&self) -> Vec<ConnectionId> {
        self.closed.lock().unwrap().clone()
    }

    pub async fn wait_for_closed(&self, n: usize) -> Vec<ConnectionId> {
        let until = Instant::now() + Duration::from_secs(3);
        while Instant::now() < until && self.closed().len() < n {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.closed()
    }
}

#[async_trait]
impl DecisionClient for MockDecisionClient {
    async fn on_conn_opened(&self, criteria: &DecisionCriteria, _deadline: Instant) -> DecisionResponse {
        self.opened.lock().unwrap().push(criteria.clone());
        DecisionResponse::loaded(self.code)
    }

    async fn on_conn_closed(&self, conn_id: ConnectionId) -> Result<(), ClientError> {
        self.closed.lock().unwrap().push(conn_id);
        Ok(())
    }
}

/// TCP backend echoing everything it reads.
pub async fn start_tcp_echo() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let (mut r, mut w) = socket.split();
                let _ = tokio::io::copy(&mut r, &mut w).await;
            });
        }
    });
    addr
}

/// UDP backend echoing every datagram to its sender.
pub async fn start_udp_echo() -> SocketAddr {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = socket.local_addr().unwrap();
    tokio::spawn(async move {
        let mut buf = vec![0u8; 65535];
        while let Ok((n, from)) = socket.recv_from(&mut buf).await {
            let _ = socket.send_to(&buf[..n], from).await;
        }
    });
    addr
}

/// Send `payload` and read the echo back; `None` if the proxy closed the connection.
pub async fn tcp_roundtrip(addr: SocketAddr, payload: &[u8]) -> Option<Vec<u8>> {
    let mut stream = TcpStream::connect(addr).await.ok()?;
    // the write can race a server-side close
    let _ = stream.write_all(payload).await;
    let mut buf = vec![0u8; payload.len()];
    match tokio::time::timeout(Duration::from_secs(2), stream.read_exact(&mut buf)).await {
        Ok(Ok(_)) => Some(buf),
        _ => None,
    }
}

pub async fn udp_roundtrip(addr: SocketAddr, payload: &[u8]) -> Option<Vec<u8>> {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    socket.send_to(payload, addr).await.unwrap();
    let mut buf = vec![0u8; 65535];
    let (n, _) = tokio::time::timeout(Duration::from_millis(500), socket.recv_from(&mut buf))
        .await
        .ok()?
        .ok()?;
    Some(buf[..n].to_vec())
}

pub fn config(raw: &str) -> ProxyConfig {
    parse_config(raw).unwrap()
}
