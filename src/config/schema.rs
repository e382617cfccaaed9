//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the proxy.
//! All types derive Serde traits for deserialization from config files.
//!
//! Needle definitions stay close to the raw file: every value is an
//! uninterpreted string so that the needle resolver alone decides what is
//! valid, one needle at a time.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Root configuration for the proxy.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct ProxyConfig {
    /// Logging and metrics settings.
    pub observability: ObservabilityConfig,

    #[serde(default)]
    pub admin: AdminConfig,

    /// Connection and notification limits.
    pub limits: LimitsConfig,

    /// Named needle definitions.
    pub needles: BTreeMap<String, NeedleConfig>,

    /// TCP entrypoints.
    pub tcp_routes: Vec<RouteConfig>,

    /// UDP entrypoints.
    pub udp_routes: Vec<RouteConfig>,
}

/// Log output format.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level or `EnvFilter` directive; `RUST_LOG` takes precedence.
    pub log_level: String,

    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable admin API.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,

    /// Admin API bind address.
    pub bind_address: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            // WARNING: This is a placeholder! Change this in production.
            api_key: "CHANGE_ME_IN_PRODUCTION".to_string(),
            bind_address: "127.0.0.1:8081".to_string(),
        }
    }
}

/// Resource limits.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum concurrent connections per TCP entrypoint (backpressure).
    pub max_connections: usize,

    /// Idle time after which a UDP pseudo-connection is closed.
    pub udp_session_idle_secs: u64,

    /// Pending close notifications before new ones are dropped.
    pub notify_queue_capacity: usize,

    /// Close notifications in flight at once.
    pub notify_concurrency: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_connections: 10_000,
            udp_session_idle_secs: 60,
            notify_queue_capacity: 1024,
            notify_concurrency: 32,
        }
    }
}

/// One needle definition, as written in the file.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct NeedleConfig {
    /// Decision service address (`host:port` or URI).
    pub endpoint: String,

    /// Decision codes whose connections are reported on close.
    pub notify_conn_close: Vec<String>,

    pub client: NeedleClientConfig,

    pub decision: NeedleDecisionConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct NeedleClientConfig {
    /// Client kind tag; empty means `grpc`.
    #[serde(rename = "type")]
    pub kind: String,

    /// Request timeout as a duration string; empty means `5s`.
    pub timeout: String,

    /// Presence switches the channel to TLS.
    pub auth: Option<NeedleAuthConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct NeedleAuthConfig {
    pub method: String,

    /// PEM file with the CA certificate(s) trusted for the decision service.
    pub tls_cert_file_path: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct NeedleDecisionConfig {
    pub on_timeout: String,
    pub on_error: String,
}

/// A TCP or UDP entrypoint forwarding to one backend.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct RouteConfig {
    /// Route identifier for logging/metrics.
    pub name: String,

    /// Listen address (e.g., "0.0.0.0:5432").
    pub bind_address: String,

    /// Backend address (e.g., "10.0.0.10:5432").
    pub backend: String,

    /// Optional admission control for this route.
    #[serde(default)]
    pub needle: Option<NeedleRefConfig>,
}

/// Reference from a route to a named needle.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct NeedleRefConfig {
    pub id: String,

    /// Static metadata attached to every decision request of the route.
    #[serde(default)]
    pub metadata: Option<HashMap<String, String>>,
}
