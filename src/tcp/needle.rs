//! Admission control in front of a TCP handler.

use async_trait::async_trait;
use std::sync::Arc;

use crate::needleware::needle::{CloseGuard, Needle};
use crate::tcp::{TcpConn, TcpHandler};

/// Asks a needle before passing the connection to `next`.
#[derive(Debug)]
pub struct TcpNeedle {
    next: Arc<dyn TcpHandler>,
    needle: Arc<dyn Needle>,
    name: String,
}

impl TcpNeedle {
    pub fn new(next: Arc<dyn TcpHandler>, needle: Arc<dyn Needle>, name: impl Into<String>) -> Self {
        Self {
            next,
            needle,
            name: name.into(),
        }
    }
}

#[async_trait]
impl TcpHandler for TcpNeedle {
    async fn serve_tcp(&self, conn: TcpConn) {
        let remote = conn.peer_addr().to_string();
        let local = conn.local_addr().to_string();

        let criteria = match self.needle.new_tcp_criteria(&remote, &local) {
            Ok(criteria) => Arc::new(criteria),
            Err(e) => {
                tracing::error!(
                    route = %self.name,
                    needle = %self.needle.name(),
                    error = %e,
                    "Cannot build decision criteria, skipping admission control"
                );
                self.next.serve_tcp(conn).await;
                return;
            }
        };

        let decision = match self.needle.decide(criteria).await {
            Ok(decision) => decision,
            Err(e) => {
                tracing::error!(
                    route = %self.name,
                    needle = %self.needle.name(),
                    remote = %remote,
                    error = %e,
                    "Decision failed, closing connection"
                );
                conn.close().await;
                return;
            }
        };

        let guard = CloseGuard::new(self.needle.clone(), decision);
        if guard.decision().conn_rejected() {
            tracing::debug!(
                route = %self.name,
                needle = %self.needle.name(),
                conn_id = %guard.decision().criteria().conn_id,
                remote = %remote,
                "Connection rejected"
            );
            conn.close().await;
            return;
        }

        self.next.serve_tcp(conn).await;
    }
}
