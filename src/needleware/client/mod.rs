//! Decision service client abstraction.
//!
//! # Data Flow
//! ```text
//! DecisionCriteria (one per connection)
//!     → DecisionClient::on_conn_opened(criteria, deadline)
//!         → wire request (grpc.rs / pb.rs)
//!         → classify outcome: Loaded(code) | Error(cause) | Timeout
//!     → DecisionResponse
//!
//! Connection closed:
//!     → DecisionClient::on_conn_closed(conn_id)
//! ```
//!
//! # Design Decisions
//! - One trait, one implementation per transport; the decision state
//!   machine never sees wire types
//! - Clients never fail the call: every terminal outcome is folded into a
//!   `DecisionResponse`
//! - The deadline is an absolute `Instant` owned by the caller

pub mod grpc;
pub mod pb;

use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::time::Instant;
use thiserror::Error;

use crate::needleware::policy::{ClientKind, Policy};

pub use grpc::GrpcClient;

/// Transport protocol of the connection being admitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    Udp,
    Tcp,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Udp => "udp",
            Protocol::Tcp => "tcp",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Synthetic, process-local connection identity.
///
/// Not globally unique; used only to correlate the open and close events
/// sent to the decision service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(i32);

impl ConnectionId {
    pub fn new(value: i32) -> Self {
        Self(value)
    }

    pub fn value(&self) -> i32 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Description of one connection submitted for an admission decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecisionCriteria {
    pub protocol: Protocol,
    pub conn_id: ConnectionId,
    pub remote_host: String,
    pub remote_port: u16,
    pub local_host: String,
    pub local_port: u16,
    pub metadata: Option<HashMap<String, String>>,
}

impl DecisionCriteria {
    /// Replace the metadata, consuming the criteria.
    pub fn with_metadata(mut self, metadata: HashMap<String, String>) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// `remote_host:remote_port`, for logging.
    pub fn remote(&self) -> String {
        join_host_port(&self.remote_host, self.remote_port)
    }

    /// `local_host:local_port`, for logging.
    pub fn local(&self) -> String {
        join_host_port(&self.local_host, self.local_port)
    }
}

fn join_host_port(host: &str, port: u16) -> String {
    if host.contains(':') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}

/// Outcome class of a single decision call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DecisionStatus {
    Loaded,
    Error,
    Timeout,
}

impl DecisionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionStatus::Loaded => "loaded",
            DecisionStatus::Error => "error",
            DecisionStatus::Timeout => "timeout",
        }
    }
}

/// Binary admission outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DecisionCode {
    Accepted,
    Rejected,
}

impl DecisionCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionCode::Accepted => "accept",
            DecisionCode::Rejected => "reject",
        }
    }
}

/// Errors reported by a decision client.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The RPC failed with a non-deadline status.
    #[error("decision rpc failed: {0}")]
    Status(#[from] tonic::Status),

    /// The service replied with a code outside the contract.
    #[error("unknown decision code {0}")]
    UnknownDecisionCode(i32),

    /// The channel could not be prepared.
    #[error("transport error: {0}")]
    Transport(String),
}

/// Result of one `on_conn_opened` call.
///
/// `code` is only meaningful when `status` is `Loaded`; `cause` only when
/// it is `Error`.
#[derive(Debug)]
pub struct DecisionResponse {
    pub status: DecisionStatus,
    pub code: Option<DecisionCode>,
    pub cause: Option<ClientError>,
}

impl DecisionResponse {
    pub fn loaded(code: DecisionCode) -> Self {
        Self {
            status: DecisionStatus::Loaded,
            code: Some(code),
            cause: None,
        }
    }

    pub fn error(cause: ClientError) -> Self {
        Self {
            status: DecisionStatus::Error,
            code: None,
            cause: Some(cause),
        }
    }

    pub fn timeout() -> Self {
        Self {
            status: DecisionStatus::Timeout,
            code: None,
            cause: None,
        }
    }

    pub fn conn_accepted(&self) -> bool {
        self.code == Some(DecisionCode::Accepted)
    }

    pub fn conn_rejected(&self) -> bool {
        self.code == Some(DecisionCode::Rejected)
    }
}

/// Wire client for an external decision service.
#[async_trait]
pub trait DecisionClient: Send + Sync + fmt::Debug {
    /// Ask for an admission decision, giving up at `deadline`.
    async fn on_conn_opened(&self, criteria: &DecisionCriteria, deadline: Instant) -> DecisionResponse;

    /// Report that a previously admitted connection has closed. No deadline.
    async fn on_conn_closed(&self, conn_id: ConnectionId) -> Result<(), ClientError>;
}

/// Build the client selected by `policy.client_kind`.
pub fn build_client(policy: &Policy) -> Result<Arc<dyn DecisionClient>, ClientError> {
    match policy.client_kind {
        ClientKind::Grpc => Ok(Arc::new(GrpcClient::connect_lazy(
            &policy.endpoint,
            &policy.transport,
        )?)),
    }
}
