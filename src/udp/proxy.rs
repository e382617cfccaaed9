//! UDP forwarding with optional admission control.

use async_trait::async_trait;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;

use crate::needleware::needle::{CloseGuard, Needle};
use crate::tcp::DisabledRoute;
use crate::udp::{UdpConn, UdpConnWriter, UdpHandler, UDP_BUFFER_SIZE};

enum Admission {
    /// No needle, or criteria could not be built.
    Unguarded,
    Admitted(CloseGuard),
    Denied,
}

/// Forwards a pseudo-connection to one backend, asking `needle` first.
#[derive(Debug)]
pub struct UdpProxy {
    target: String,
    needle: Option<Arc<dyn Needle>>,
}

impl UdpProxy {
    pub fn new(target: impl Into<String>, needle: Option<Arc<dyn Needle>>) -> Self {
        Self {
            target: target.into(),
            needle,
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    async fn admit(&self, conn: &UdpConn) -> Admission {
        let Some(needle) = &self.needle else {
            return Admission::Unguarded;
        };
        let remote = conn.peer_addr().to_string();

        let criteria = match needle.new_udp_criteria(&remote, &self.target) {
            Ok(criteria) => Arc::new(criteria),
            Err(e) => {
                tracing::error!(
                    needle = %needle.name(),
                    target = %self.target,
                    error = %e,
                    "Cannot build decision criteria, skipping admission control"
                );
                return Admission::Unguarded;
            }
        };

        let decision = match needle.decide(criteria).await {
            Ok(decision) => decision,
            Err(e) => {
                tracing::error!(needle = %needle.name(), remote = %remote, error = %e, "Decision failed, closing connection");
                return Admission::Denied;
            }
        };

        let guard = CloseGuard::new(needle.clone(), decision);
        if guard.decision().conn_rejected() {
            tracing::debug!(
                needle = %needle.name(),
                conn_id = %guard.decision().criteria().conn_id,
                remote = %remote,
                "Connection rejected"
            );
            return Admission::Denied;
        }
        Admission::Admitted(guard)
    }

    async fn dial(&self) -> io::Result<UdpSocket> {
        let addr = tokio::net::lookup_host(&self.target)
            .await?
            .next()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("no address for {}", self.target)))?;
        let bind: SocketAddr = if addr.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            ([0u16; 8], 0).into()
        };
        let socket = UdpSocket::bind(bind).await?;
        socket.connect(addr).await?;
        Ok(socket)
    }
}

#[async_trait]
impl UdpHandler for UdpProxy {
    async fn serve_udp(&self, conn: UdpConn) {
        // held until both copy directions stop
        let _guard = match self.admit(&conn).await {
            Admission::Unguarded => None,
            Admission::Admitted(guard) => Some(guard),
            Admission::Denied => return,
        };

        let backend = match self.dial().await {
            Ok(backend) => backend,
            Err(e) => {
                tracing::warn!(peer_addr = %conn.peer_addr(), target = %self.target, error = %e, "Backend dial failed");
                return;
            }
        };

        copy_datagrams(conn, backend).await;
    }
}

#[async_trait]
impl UdpHandler for DisabledRoute {
    async fn serve_udp(&self, conn: UdpConn) {
        tracing::warn!(
            route = %self.route(),
            peer_addr = %conn.peer_addr(),
            reason = %self.reason(),
            "Route disabled, dropping UDP session"
        );
    }
}

/// Copy whole datagrams both ways; returns when either direction stops.
async fn copy_datagrams(mut conn: UdpConn, backend: UdpSocket) {
    let peer_addr = conn.peer_addr();
    let writer = conn.writer();

    let result = tokio::select! {
        r = client_to_backend(&mut conn, &backend) => r,
        r = backend_to_client(&backend, &writer) => r,
    };
    match result {
        Ok(()) => tracing::debug!(peer_addr = %peer_addr, "UDP session closed"),
        Err(e) => tracing::debug!(peer_addr = %peer_addr, error = %e, "UDP session ended with error"),
    }
}

async fn client_to_backend(conn: &mut UdpConn, backend: &UdpSocket) -> io::Result<()> {
    let mut buf = vec![0u8; UDP_BUFFER_SIZE];
    while let Some(n) = conn.recv(&mut buf).await {
        backend.send(&buf[..n]).await?;
    }
    Ok(())
}

async fn backend_to_client(backend: &UdpSocket, writer: &UdpConnWriter) -> io::Result<()> {
    let mut buf = vec![0u8; UDP_BUFFER_SIZE];
    loop {
        let n = backend.recv(&mut buf).await?;
        writer.send(&buf[..n]).await?;
    }
}
