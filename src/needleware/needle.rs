//! The decision engine.
//!
//! # Responsibilities
//! - Build per-connection criteria from live endpoint strings
//! - Run one bounded decision call and resolve it through the policy
//! - Hand close notifications to the background notifier
//!
//! # Design Decisions
//! - `Needle` is a trait so decorators compose over `Arc<dyn Needle>`
//! - One absolute deadline per decision; the client both sends it as
//!   `grpc-timeout` and bounds its own await with it
//! - Each needle owns its connection-id generator

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tokio::time::Instant;

use crate::needleware::addr::{split_host_port, AddrError};
use crate::needleware::client::{
    ConnectionId, DecisionClient, DecisionCriteria, DecisionStatus, Protocol,
};
use crate::needleware::decision::DecisionWrapper;
use crate::needleware::notifier::{CloseJob, CloseNotifier};
use crate::needleware::policy::Policy;
use crate::observability::metrics;

/// Lower bound of the synthetic connection-id range, `2^30`.
const CONN_ID_BASE: i32 = 1 << 30;

/// Internal-consistency failures raised by `decide`.
#[derive(Debug, Error)]
pub enum NeedleError {
    #[error("needle {needle}: client reported a loaded decision without a code (conn {conn_id})")]
    MissingDecisionCode { needle: String, conn_id: ConnectionId },
}

/// Admission control engine bound to one decision service.
#[async_trait]
pub trait Needle: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    /// Criteria for a TCP connection from `remote` to `local` (`host:port`).
    fn new_tcp_criteria(&self, remote: &str, local: &str) -> Result<DecisionCriteria, AddrError>;

    /// Criteria for a UDP pseudo-connection from `remote` to `local`.
    fn new_udp_criteria(&self, remote: &str, local: &str) -> Result<DecisionCriteria, AddrError>;

    /// Ask the decision service and resolve the outcome into accept or reject.
    async fn decide(&self, criteria: Arc<DecisionCriteria>) -> Result<DecisionWrapper, NeedleError>;

    /// Schedule a close notification if the policy asks for one. Returns immediately.
    fn on_conn_close(&self, decision: &DecisionWrapper);
}

/// The configured engine: one client, one policy.
pub struct BasicNeedle {
    name: String,
    client: Arc<dyn DecisionClient>,
    policy: Policy,
    notifier: CloseNotifier,
    rng: Mutex<StdRng>,
}

impl BasicNeedle {
    pub fn new(
        name: impl Into<String>,
        client: Arc<dyn DecisionClient>,
        policy: Policy,
        notifier: CloseNotifier,
    ) -> Self {
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or_default();
        Self {
            name: name.into(),
            client,
            policy,
            notifier,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    /// Uniform in `[2^30, 2^31 - 1]`.
    fn next_conn_id(&self) -> ConnectionId {
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        ConnectionId::new(CONN_ID_BASE + rng.gen_range(0..CONN_ID_BASE))
    }

    fn new_criteria(
        &self,
        protocol: Protocol,
        remote: &str,
        local: &str,
    ) -> Result<DecisionCriteria, AddrError> {
        let (remote_host, remote_port) = split_host_port(remote)?;
        let (local_host, local_port) = split_host_port(local)?;
        Ok(DecisionCriteria {
            protocol,
            conn_id: self.next_conn_id(),
            remote_host,
            remote_port,
            local_host,
            local_port,
            metadata: None,
        })
    }
}

impl fmt::Debug for BasicNeedle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BasicNeedle")
            .field("name", &self.name)
            .field("client", &self.client)
            .field("policy", &self.policy)
            .finish()
    }
}

#[async_trait]
impl Needle for BasicNeedle {
    fn name(&self) -> &str {
        &self.name
    }

    fn new_tcp_criteria(&self, remote: &str, local: &str) -> Result<DecisionCriteria, AddrError> {
        self.new_criteria(Protocol::Tcp, remote, local)
    }

    fn new_udp_criteria(&self, remote: &str, local: &str) -> Result<DecisionCriteria, AddrError> {
        self.new_criteria(Protocol::Udp, remote, local)
    }

    async fn decide(&self, criteria: Arc<DecisionCriteria>) -> Result<DecisionWrapper, NeedleError> {
        let started = Instant::now();
        let deadline = started + self.policy.timeout;
        let response = self.client.on_conn_opened(&criteria, deadline).await;

        let status = response.status;
        let code = match status {
            DecisionStatus::Loaded => match response.code {
                Some(code) => {
                    tracing::debug!(
                        needle = %self.name,
                        conn_id = %criteria.conn_id,
                        remote = %criteria.remote(),
                        local = %criteria.local(),
                        decision = code.as_str(),
                        "Connection decision loaded"
                    );
                    code
                }
                None => {
                    return Err(NeedleError::MissingDecisionCode {
                        needle: self.name.clone(),
                        conn_id: criteria.conn_id,
                    });
                }
            },
            DecisionStatus::Error => {
                let code = self.policy.on_error.code();
                let cause = response
                    .cause
                    .as_ref()
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "unknown".to_string());
                tracing::error!(
                    needle = %self.name,
                    conn_id = %criteria.conn_id,
                    remote = %criteria.remote(),
                    error = %cause,
                    decision = code.as_str(),
                    "Decision request failed, applying onError"
                );
                code
            }
            DecisionStatus::Timeout => {
                let code = self.policy.on_timeout.code();
                tracing::debug!(
                    needle = %self.name,
                    conn_id = %criteria.conn_id,
                    remote = %criteria.remote(),
                    timeout = ?self.policy.timeout,
                    decision = code.as_str(),
                    "Decision request timed out, applying onTimeout"
                );
                code
            }
        };

        metrics::record_decision(&self.name, status.as_str(), code.as_str(), started.elapsed());
        Ok(DecisionWrapper::new(status, code, criteria))
    }

    fn on_conn_close(&self, decision: &DecisionWrapper) {
        if !self.policy.notifies_on(decision.code()) {
            return;
        }
        self.notifier.submit(CloseJob {
            needle: self.name.clone(),
            client: self.client.clone(),
            conn_id: decision.criteria().conn_id,
        });
    }
}

/// Fires `on_conn_close` when the connection scope ends.
pub struct CloseGuard {
    needle: Arc<dyn Needle>,
    decision: DecisionWrapper,
}

impl CloseGuard {
    pub fn new(needle: Arc<dyn Needle>, decision: DecisionWrapper) -> Self {
        Self { needle, decision }
    }

    pub fn decision(&self) -> &DecisionWrapper {
        &self.decision
    }
}

impl Drop for CloseGuard {
    fn drop(&mut self) {
        self.needle.on_conn_close(&self.decision);
    }
}
