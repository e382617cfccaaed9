//! Scripted decision client for unit tests.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

use crate::needleware::client::{
    ClientError, ConnectionId, DecisionClient, DecisionCode, DecisionCriteria, DecisionResponse,
    DecisionStatus,
};

#[derive(Debug, Clone, Copy)]
pub enum Script {
    Accept,
    Reject,
    Fail,
    /// Wait until the deadline, then report a timeout.
    Hang,
    /// A broken client: `Loaded` without a code.
    LoadedWithoutCode,
}

#[derive(Debug)]
pub struct ScriptedClient {
    script: Script,
    block_close: bool,
    fail_close: bool,
    opened: Mutex<Vec<DecisionCriteria>>,
    closed: Mutex<Vec<ConnectionId>>,
    close_attempts: AtomicUsize,
}

impl ScriptedClient {
    pub fn new(script: Script) -> Self {
        Self {
            script,
            block_close: false,
            fail_close: false,
            opened: Mutex::new(Vec::new()),
            closed: Mutex::new(Vec::new()),
            close_attempts: AtomicUsize::new(0),
        }
    }

    pub fn accepting() -> Self {
        Self::new(Script::Accept)
    }

    pub fn with_blocked_close(mut self) -> Self {
        self.block_close = true;
        self
    }

    pub fn with_failing_close(mut self) -> Self {
        self.fail_close = true;
        self
    }

    pub fn opened(&self) -> Vec<DecisionCriteria> {
        self.opened.lock().unwrap().clone()
    }

    pub fn closed(&self) -> Vec<ConnectionId> {
        self.closed.lock().unwrap().clone()
    }

    pub fn close_attempts(&self) -> usize {
        self.close_attempts.load(Ordering::SeqCst)
    }

    pub async fn wait_for_closed(&self, n: usize, timeout: Duration) -> Vec<ConnectionId> {
        let until = Instant::now() + timeout;
        while Instant::now() < until {
            let closed = self.closed();
            if closed.len() >= n {
                return closed;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.closed()
    }
}

#[async_trait]
impl DecisionClient for ScriptedClient {
    async fn on_conn_opened(&self, criteria: &DecisionCriteria, deadline: Instant) -> DecisionResponse {
        self.opened.lock().unwrap().push(criteria.clone());
        match self.script {
            Script::Accept => DecisionResponse::loaded(DecisionCode::Accepted),
            Script::Reject => DecisionResponse::loaded(DecisionCode::Rejected),
            Script::Fail => DecisionResponse::error(ClientError::Status(tonic::Status::unavailable(
                "connection refused",
            ))),
            Script::Hang => {
                tokio::time::sleep_until(deadline).await;
                DecisionResponse::timeout()
            }
            Script::LoadedWithoutCode => DecisionResponse {
                status: DecisionStatus::Loaded,
                code: None,
                cause: None,
            },
        }
    }

    async fn on_conn_closed(&self, conn_id: ConnectionId) -> Result<(), ClientError> {
        self.close_attempts.fetch_add(1, Ordering::SeqCst);
        if self.block_close {
            std::future::pending::<()>().await;
        }
        if self.fail_close {
            return Err(ClientError::Status(tonic::Status::unavailable("gone")));
        }
        self.closed.lock().unwrap().push(conn_id);
        Ok(())
    }
}
