//! Terminal TCP handlers: backend forwarding and disabled routes.

use async_trait::async_trait;
use tokio::net::TcpStream;

use crate::tcp::{TcpConn, TcpHandler};

/// Dials the backend and copies bytes both ways until either side closes.
#[derive(Debug, Clone)]
pub struct TcpForwarder {
    backend: String,
}

impl TcpForwarder {
    pub fn new(backend: impl Into<String>) -> Self {
        Self {
            backend: backend.into(),
        }
    }

    pub fn backend(&self) -> &str {
        &self.backend
    }
}

#[async_trait]
impl TcpHandler for TcpForwarder {
    async fn serve_tcp(&self, mut conn: TcpConn) {
        let peer_addr = conn.peer_addr();
        let mut upstream = match TcpStream::connect(&self.backend).await {
            Ok(stream) => stream,
            Err(e) => {
                tracing::warn!(peer_addr = %peer_addr, backend = %self.backend, error = %e, "Backend dial failed");
                conn.close().await;
                return;
            }
        };

        match tokio::io::copy_bidirectional(&mut conn, &mut upstream).await {
            Ok((to_backend, to_client)) => tracing::debug!(
                peer_addr = %peer_addr,
                backend = %self.backend,
                to_backend,
                to_client,
                "Connection finished"
            ),
            Err(e) => tracing::debug!(
                peer_addr = %peer_addr,
                backend = %self.backend,
                error = %e,
                "Connection ended with error"
            ),
        }
    }
}

/// Stand-in for a route whose chain could not be built; closes every connection.
#[derive(Debug, Clone)]
pub struct DisabledRoute {
    route: String,
    reason: String,
}

impl DisabledRoute {
    pub fn new(route: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            route: route.into(),
            reason: reason.into(),
        }
    }

    pub fn route(&self) -> &str {
        &self.route
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }
}

#[async_trait]
impl TcpHandler for DisabledRoute {
    async fn serve_tcp(&self, conn: TcpConn) {
        tracing::warn!(
            route = %self.route,
            peer_addr = %conn.peer_addr(),
            reason = %self.reason,
            "Route disabled, closing connection"
        );
        conn.close().await;
    }
}
