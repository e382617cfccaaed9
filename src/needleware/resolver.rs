//! Turns one raw needle definition into a policy and a client.
//!
//! # Responsibilities
//! - Validate every field independently
//! - Apply defaults for absent values
//! - Load TLS trust material when an auth block is present
//!
//! # Design Decisions
//! - Unknown tokens are failures, never silent defaults
//! - A failure here only disables this one needle

use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::config::schema::{NeedleAuthConfig, NeedleConfig};
use crate::needleware::client::{self, ClientError, DecisionClient};
use crate::needleware::policy::{
    default_notify_on_close, ClientKind, DecisionRef, Policy, TransportSecurity, DEFAULT_ON_ERROR,
    DEFAULT_ON_TIMEOUT, DEFAULT_TIMEOUT,
};

/// Validation failures for one needle definition.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("endpoint is required")]
    EmptyEndpoint,

    #[error("unsupported client type {0:?}")]
    UnknownClientType(String),

    #[error("client.auth.tlsCertFilePath is required when client.auth is set")]
    EmptyCertPath,

    #[error("cannot read TLS certificate {path:?}: {source}")]
    CertRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no PEM certificate found in {path:?}")]
    NoCertificates { path: PathBuf },

    #[error("{field}: invalid action {value:?}, expected accept or reject")]
    InvalidAction { field: &'static str, value: String },

    #[error("notifyConnClose: invalid value {0:?}, expected accept or reject")]
    InvalidNotifyValue(String),

    #[error("client.timeout: invalid duration {value:?}: {reason}")]
    InvalidTimeout { value: String, reason: String },

    #[error(transparent)]
    Client(#[from] ClientError),
}

/// Resolver for the needle named `name`.
#[derive(Debug)]
pub struct NeedleResolver<'a> {
    name: &'a str,
    config: &'a NeedleConfig,
}

impl<'a> NeedleResolver<'a> {
    pub fn new(name: &'a str, config: &'a NeedleConfig) -> Self {
        Self { name, config }
    }

    pub fn name(&self) -> &str {
        self.name
    }

    /// Validate the definition into a policy. Touches the filesystem only for TLS material.
    pub fn resolve(&self) -> Result<Policy, ResolveError> {
        let endpoint = self.config.endpoint.trim();
        if endpoint.is_empty() {
            return Err(ResolveError::EmptyEndpoint);
        }

        Ok(Policy {
            client_kind: resolve_client_kind(&self.config.client.kind)?,
            endpoint: endpoint.to_string(),
            transport: resolve_transport(self.config.client.auth.as_ref())?,
            timeout: resolve_timeout(&self.config.client.timeout)?,
            on_timeout: resolve_action(
                "decision.onTimeout",
                &self.config.decision.on_timeout,
                DEFAULT_ON_TIMEOUT,
            )?,
            on_error: resolve_action(
                "decision.onError",
                &self.config.decision.on_error,
                DEFAULT_ON_ERROR,
            )?,
            notify_on_close: resolve_notify(&self.config.notify_conn_close)?,
        })
    }

    /// Resolve the policy and construct its client.
    pub fn build(&self) -> Result<(Policy, Arc<dyn DecisionClient>), ResolveError> {
        let policy = self.resolve()?;
        let client = client::build_client(&policy)?;
        tracing::debug!(
            needle = %self.name,
            endpoint = %policy.endpoint,
            client = policy.client_kind.as_str(),
            timeout = ?policy.timeout,
            "Needle resolved"
        );
        Ok((policy, client))
    }
}

fn resolve_client_kind(raw: &str) -> Result<ClientKind, ResolveError> {
    if raw.is_empty() {
        return Ok(ClientKind::Grpc);
    }
    ClientKind::parse(raw).ok_or_else(|| ResolveError::UnknownClientType(raw.to_string()))
}

fn resolve_transport(auth: Option<&NeedleAuthConfig>) -> Result<TransportSecurity, ResolveError> {
    let Some(auth) = auth else {
        return Ok(TransportSecurity::Insecure);
    };
    if auth.tls_cert_file_path.is_empty() {
        return Err(ResolveError::EmptyCertPath);
    }

    let path = PathBuf::from(&auth.tls_cert_file_path);
    let pem = fs::read(&path).map_err(|source| ResolveError::CertRead {
        path: path.clone(),
        source,
    })?;

    let mut reader = pem.as_slice();
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .unwrap_or_default();
    if certs.is_empty() {
        return Err(ResolveError::NoCertificates { path });
    }

    Ok(TransportSecurity::Tls {
        method: auth.method.clone(),
        cert_path: path,
        ca_pem: pem,
    })
}

fn resolve_timeout(raw: &str) -> Result<Duration, ResolveError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(DEFAULT_TIMEOUT);
    }
    let timeout = humantime::parse_duration(raw).map_err(|e| ResolveError::InvalidTimeout {
        value: raw.to_string(),
        reason: e.to_string(),
    })?;
    Ok(timeout)
}

fn resolve_action(
    field: &'static str,
    raw: &str,
    default: DecisionRef,
) -> Result<DecisionRef, ResolveError> {
    if raw.is_empty() {
        return Ok(default);
    }
    DecisionRef::parse(raw).ok_or_else(|| ResolveError::InvalidAction {
        field,
        value: raw.to_string(),
    })
}

fn resolve_notify(raw: &[String]) -> Result<HashSet<DecisionRef>, ResolveError> {
    if raw.is_empty() {
        return Ok(default_notify_on_close());
    }
    raw.iter()
        .map(|token| {
            DecisionRef::parse(token).ok_or_else(|| ResolveError::InvalidNotifyValue(token.clone()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{NeedleClientConfig, NeedleDecisionConfig};
    use std::io::Write;

    fn config(endpoint: &str) -> NeedleConfig {
        NeedleConfig {
            endpoint: endpoint.to_string(),
            ..Default::default()
        }
    }

    fn resolve(config: &NeedleConfig) -> Result<Policy, ResolveError> {
        NeedleResolver::new("n", config).resolve()
    }

    fn pem_file(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn minimal_definition_gets_defaults() {
        let policy = resolve(&config("localhost:50051")).unwrap();
        assert_eq!(policy, Policy::new("localhost:50051"));
    }

    #[test]
    fn endpoint_is_required() {
        assert!(matches!(resolve(&config("")), Err(ResolveError::EmptyEndpoint)));
        assert!(matches!(resolve(&config("   ")), Err(ResolveError::EmptyEndpoint)));
    }

    #[test]
    fn client_type_is_case_insensitive_and_closed() {
        let mut c = config("e:1");
        c.client.kind = "gRPC".into();
        assert_eq!(resolve(&c).unwrap().client_kind, ClientKind::Grpc);

        c.client.kind = "http".into();
        assert!(matches!(resolve(&c), Err(ResolveError::UnknownClientType(t)) if t == "http"));
    }

    #[test]
    fn actions_parse_or_fail() {
        let mut c = config("e:1");
        c.decision = NeedleDecisionConfig {
            on_timeout: "Accept".into(),
            on_error: "ACCEPT".into(),
        };
        let policy = resolve(&c).unwrap();
        assert_eq!(policy.on_timeout, DecisionRef::Accept);
        assert_eq!(policy.on_error, DecisionRef::Accept);

        c.decision.on_timeout = "maybe".into();
        assert!(matches!(
            resolve(&c),
            Err(ResolveError::InvalidAction { field: "decision.onTimeout", .. })
        ));

        c.decision.on_timeout = String::new();
        c.decision.on_error = "drop".into();
        assert!(matches!(
            resolve(&c),
            Err(ResolveError::InvalidAction { field: "decision.onError", .. })
        ));
    }

    #[test]
    fn notify_set_rejects_any_unknown_token() {
        let mut c = config("e:1");
        c.notify_conn_close = vec!["reject".into(), "Reject".into()];
        assert_eq!(resolve(&c).unwrap().notify_on_close, HashSet::from([DecisionRef::Reject]));

        c.notify_conn_close = vec!["accept".into(), "sometimes".into()];
        assert!(matches!(resolve(&c), Err(ResolveError::InvalidNotifyValue(t)) if t == "sometimes"));
    }

    #[test]
    fn timeout_parses_duration_strings() {
        let mut c = config("e:1");
        c.client = NeedleClientConfig {
            timeout: "1m 30s".into(),
            ..Default::default()
        };
        assert_eq!(resolve(&c).unwrap().timeout, Duration::from_secs(90));

        c.client.timeout = "250ms".into();
        assert_eq!(resolve(&c).unwrap().timeout, Duration::from_millis(250));

        // an empty budget is valid: every decision resolves through onTimeout
        c.client.timeout = "0s".into();
        assert_eq!(resolve(&c).unwrap().timeout, Duration::ZERO);

        for bad in ["soon", "5", "-1s"] {
            c.client.timeout = bad.into();
            assert!(matches!(resolve(&c), Err(ResolveError::InvalidTimeout { .. })), "{}", bad);
        }
    }

    #[test]
    fn auth_requires_a_cert_path() {
        let mut c = config("e:1");
        c.client.auth = Some(NeedleAuthConfig {
            method: "tls".into(),
            tls_cert_file_path: String::new(),
        });
        assert!(matches!(resolve(&c), Err(ResolveError::EmptyCertPath)));
    }

    #[test]
    fn auth_cert_must_exist_and_contain_certificates() {
        let mut c = config("e:1");
        c.client.auth = Some(NeedleAuthConfig {
            method: "tls".into(),
            tls_cert_file_path: "/nonexistent/ca.pem".into(),
        });
        assert!(matches!(resolve(&c), Err(ResolveError::CertRead { .. })));

        let junk = pem_file("not a certificate\n");
        c.client.auth = Some(NeedleAuthConfig {
            method: "tls".into(),
            tls_cert_file_path: junk.path().to_string_lossy().into_owned(),
        });
        assert!(matches!(resolve(&c), Err(ResolveError::NoCertificates { .. })));
    }

    #[test]
    fn auth_with_valid_cert_selects_tls() {
        let cert = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        let file = pem_file(&cert.cert.pem());

        let mut c = config("localhost:50051");
        c.client.auth = Some(NeedleAuthConfig {
            method: "tls".into(),
            tls_cert_file_path: file.path().to_string_lossy().into_owned(),
        });
        match resolve(&c).unwrap().transport {
            TransportSecurity::Tls { method, cert_path, ca_pem } => {
                assert_eq!(method, "tls");
                assert_eq!(cert_path, file.path());
                assert!(!ca_pem.is_empty());
            }
            other => panic!("expected TLS, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn build_returns_a_ready_client() {
        let (policy, _client) = NeedleResolver::new("n", &config("127.0.0.1:1")).build().unwrap();
        assert_eq!(policy.endpoint, "127.0.0.1:1");
    }
}
