//! Bounded background delivery of connection-closed events.
//!
//! # Responsibilities
//! - Accept close notifications without blocking the connection path
//! - Cap queued and in-flight notifications
//! - Keep each job's client alive until its delivery finishes
//!
//! # Design Decisions
//! - One pool per manager generation, shared by its needles
//! - Full queue = notification dropped with a warning (best-effort)
//! - No deadline and no retry on delivery

use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};

use crate::needleware::client::{ConnectionId, DecisionClient};
use crate::observability::metrics;

pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;
pub const DEFAULT_CONCURRENCY: usize = 32;

/// One pending `on_conn_closed` delivery.
#[derive(Debug)]
pub struct CloseJob {
    pub needle: String,
    pub client: Arc<dyn DecisionClient>,
    pub conn_id: ConnectionId,
}

impl CloseJob {
    async fn deliver(self) {
        match self.client.on_conn_closed(self.conn_id).await {
            Ok(()) => {
                tracing::trace!(needle = %self.needle, conn_id = %self.conn_id, "Close notification delivered");
                metrics::record_close_notification(&self.needle, "ok");
            }
            Err(e) => {
                tracing::error!(
                    needle = %self.needle,
                    conn_id = %self.conn_id,
                    error = %e,
                    "Cannot deliver OnConnClosed event"
                );
                metrics::record_close_notification(&self.needle, "error");
            }
        }
    }
}

/// Handle for submitting close notifications. Cheap to clone.
///
/// The dispatcher task exits once every handle is dropped and the queue
/// has drained.
#[derive(Debug, Clone)]
pub struct CloseNotifier {
    tx: mpsc::Sender<CloseJob>,
}

impl CloseNotifier {
    /// Start a dispatcher on the current Tokio runtime.
    pub fn new(queue_capacity: usize, concurrency: usize) -> Self {
        let (tx, mut rx) = mpsc::channel::<CloseJob>(queue_capacity.max(1));
        let permits = Arc::new(Semaphore::new(concurrency.max(1)));

        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                let permit = match permits.clone().acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => break,
                };
                tokio::spawn(async move {
                    job.deliver().await;
                    drop(permit);
                });
            }
            tracing::debug!("Close notifier drained");
        });

        Self { tx }
    }

    /// Queue a delivery; never waits.
    pub fn submit(&self, job: CloseJob) {
        if let Err(e) = self.tx.try_send(job) {
            let (reason, job) = match e {
                mpsc::error::TrySendError::Full(job) => ("queue full", job),
                mpsc::error::TrySendError::Closed(job) => ("notifier closed", job),
            };
            tracing::warn!(
                needle = %job.needle,
                conn_id = %job.conn_id,
                reason,
                "Dropping close notification"
            );
            metrics::record_close_notification(&job.needle, "dropped");
        }
    }
}

impl Default for CloseNotifier {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY, DEFAULT_CONCURRENCY)
    }
}
