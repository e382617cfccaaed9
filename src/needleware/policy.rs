//! Resolved per-needle policy.

use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::needleware::client::DecisionCode;

pub const DEFAULT_CLIENT_TYPE: &str = "grpc";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_ON_TIMEOUT: DecisionRef = DecisionRef::Reject;
pub const DEFAULT_ON_ERROR: DecisionRef = DecisionRef::Reject;

/// The `{accept}` set used when `notifyConnClose` is not configured.
pub fn default_notify_on_close() -> HashSet<DecisionRef> {
    HashSet::from([DecisionRef::Accept])
}

/// A configured enforcement action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DecisionRef {
    Accept,
    Reject,
}

impl DecisionRef {
    /// Parse a configuration token, case-insensitively.
    pub fn parse(token: &str) -> Option<Self> {
        match token.to_ascii_lowercase().as_str() {
            "accept" => Some(DecisionRef::Accept),
            "reject" => Some(DecisionRef::Reject),
            _ => None,
        }
    }

    pub fn code(self) -> DecisionCode {
        match self {
            DecisionRef::Accept => DecisionCode::Accepted,
            DecisionRef::Reject => DecisionCode::Rejected,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionRef::Accept => "accept",
            DecisionRef::Reject => "reject",
        }
    }
}

impl From<DecisionCode> for DecisionRef {
    fn from(code: DecisionCode) -> Self {
        match code {
            DecisionCode::Accepted => DecisionRef::Accept,
            DecisionCode::Rejected => DecisionRef::Reject,
        }
    }
}

impl fmt::Display for DecisionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Supported decision client transports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientKind {
    Grpc,
}

impl ClientKind {
    pub fn parse(tag: &str) -> Option<Self> {
        match tag.to_ascii_lowercase().as_str() {
            "grpc" => Some(ClientKind::Grpc),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ClientKind::Grpc => "grpc",
        }
    }
}

/// Channel security for the decision client.
#[derive(Clone, PartialEq, Eq)]
pub enum TransportSecurity {
    Insecure,
    Tls {
        /// Informational `client.auth.method` value.
        method: String,
        cert_path: PathBuf,
        /// PEM bytes, already checked to contain at least one certificate.
        ca_pem: Vec<u8>,
    },
}

impl fmt::Debug for TransportSecurity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportSecurity::Insecure => f.write_str("Insecure"),
            TransportSecurity::Tls { method, cert_path, .. } => f
                .debug_struct("Tls")
                .field("method", method)
                .field("cert_path", cert_path)
                .finish(),
        }
    }
}

/// Everything a needle needs besides its client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Policy {
    pub client_kind: ClientKind,
    pub endpoint: String,
    pub transport: TransportSecurity,
    pub timeout: Duration,
    pub on_timeout: DecisionRef,
    pub on_error: DecisionRef,
    pub notify_on_close: HashSet<DecisionRef>,
}

impl Policy {
    /// Default policy for an insecure gRPC endpoint.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client_kind: ClientKind::Grpc,
            endpoint: endpoint.into(),
            transport: TransportSecurity::Insecure,
            timeout: DEFAULT_TIMEOUT,
            on_timeout: DEFAULT_ON_TIMEOUT,
            on_error: DEFAULT_ON_ERROR,
            notify_on_close: default_notify_on_close(),
        }
    }

    pub fn notifies_on(&self, code: DecisionCode) -> bool {
        self.notify_on_close.contains(&DecisionRef::from(code))
    }
}
