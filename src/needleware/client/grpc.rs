//! gRPC decision client.
//!
//! # Responsibilities
//! - Map criteria onto the `needleware.Needleware` wire request
//! - Issue the call under the caller's deadline
//! - Classify every outcome into a `DecisionResponse`
//!
//! # Design Decisions
//! - Channels connect lazily; a dead endpoint surfaces per call, not at build
//! - The deadline travels as `grpc-timeout` and bounds the local await
//! - Any failure observed at or after the deadline is a timeout: tonic's own
//!   `grpc-timeout` timer reports expiry as `Cancelled`, not `DeadlineExceeded`
//! - An already spent budget never reaches the wire

use async_trait::async_trait;
use tokio::time::Instant;
use tonic::transport::{Certificate, Channel, ClientTlsConfig, Endpoint};

use crate::needleware::client::pb::{self, needleware_client::NeedlewareClient};
use crate::needleware::client::{
    ClientError, ConnectionId, DecisionClient, DecisionCode, DecisionCriteria, DecisionResponse,
    Protocol,
};
use crate::needleware::policy::TransportSecurity;

/// Decision client over a (possibly TLS) tonic channel.
#[derive(Debug, Clone)]
pub struct GrpcClient {
    endpoint: String,
    client: NeedlewareClient<Channel>,
}

impl GrpcClient {
    pub fn new(endpoint: impl Into<String>, client: NeedlewareClient<Channel>) -> Self {
        Self {
            endpoint: endpoint.into(),
            client,
        }
    }

    /// Build a lazily connecting client for `endpoint` (`host:port` or a URI).
    ///
    /// Must be called within a Tokio runtime.
    pub fn connect_lazy(endpoint: &str, transport: &TransportSecurity) -> Result<Self, ClientError> {
        let secure = matches!(transport, TransportSecurity::Tls { .. });
        let uri = endpoint_uri(endpoint, secure);

        let mut builder = Endpoint::from_shared(uri.clone())
            .map_err(|e| ClientError::Transport(format!("invalid endpoint {}: {}", uri, e)))?;

        if let TransportSecurity::Tls { ca_pem, .. } = transport {
            let tls = ClientTlsConfig::new().ca_certificate(Certificate::from_pem(ca_pem));
            builder = builder
                .tls_config(tls)
                .map_err(|e| ClientError::Transport(format!("tls config for {}: {}", uri, e)))?;
        }

        let channel = builder.connect_lazy();
        tracing::debug!(endpoint = %uri, secure, "gRPC channel created");
        Ok(Self::new(endpoint, NeedlewareClient::new(channel)))
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl DecisionClient for GrpcClient {
    async fn on_conn_opened(&self, criteria: &DecisionCriteria, deadline: Instant) -> DecisionResponse {
        let budget = deadline.saturating_duration_since(Instant::now());
        if budget.is_zero() {
            return DecisionResponse::timeout();
        }
        let mut request = tonic::Request::new(to_wire(criteria));
        request.set_timeout(budget);

        let mut client = self.client.clone();
        match tokio::time::timeout_at(deadline, client.on_conn_opened(request)).await {
            Err(_) => DecisionResponse::timeout(),
            Ok(Err(_)) if Instant::now() >= deadline => DecisionResponse::timeout(),
            Ok(Err(status)) => classify_status(status),
            Ok(Ok(response)) => classify_code(response.into_inner().code),
        }
    }

    async fn on_conn_closed(&self, conn_id: ConnectionId) -> Result<(), ClientError> {
        let mut client = self.client.clone();
        client
            .on_conn_closed(tonic::Request::new(pb::ConnectionId { value: conn_id.value() }))
            .await?;
        Ok(())
    }
}

fn endpoint_uri(endpoint: &str, secure: bool) -> String {
    if endpoint.contains("://") {
        endpoint.to_string()
    } else if secure {
        format!("https://{}", endpoint)
    } else {
        format!("http://{}", endpoint)
    }
}

pub(crate) fn to_wire(criteria: &DecisionCriteria) -> pb::Connection {
    let protocol = match criteria.protocol {
        Protocol::Udp => pb::Protocol::Udp,
        Protocol::Tcp => pb::Protocol::Tcp,
    };
    pb::Connection {
        id: Some(pb::ConnectionId {
            value: criteria.conn_id.value(),
        }),
        protocol: protocol as i32,
        remote_address: Some(pb::Address {
            host: criteria.remote_host.clone(),
            port: i32::from(criteria.remote_port),
        }),
        local_address: Some(pb::Address {
            host: criteria.local_host.clone(),
            port: i32::from(criteria.local_port),
        }),
        metadata: criteria
            .metadata
            .as_ref()
            .map(|data| pb::Metadata { data: data.clone() }),
    }
}

pub(crate) fn classify_status(status: tonic::Status) -> DecisionResponse {
    if status.code() == tonic::Code::DeadlineExceeded {
        DecisionResponse::timeout()
    } else {
        DecisionResponse::error(ClientError::Status(status))
    }
}

pub(crate) fn classify_code(code: i32) -> DecisionResponse {
    match pb::DecisionCode::try_from(code) {
        Ok(pb::DecisionCode::Accept) => DecisionResponse::loaded(DecisionCode::Accepted),
        Ok(pb::DecisionCode::Reject) => DecisionResponse::loaded(DecisionCode::Rejected),
        Err(_) => DecisionResponse::error(ClientError::UnknownDecisionCode(code)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::needleware::client::DecisionStatus;
    use std::collections::HashMap;
    use std::time::Duration;

    fn criteria(metadata: Option<HashMap<String, String>>) -> DecisionCriteria {
        DecisionCriteria {
            protocol: Protocol::Udp,
            conn_id: ConnectionId::new(1_500_000_000),
            remote_host: "203.0.113.5".into(),
            remote_port: 51000,
            local_host: "198.51.100.9".into(),
            local_port: 443,
            metadata,
        }
    }

    #[test]
    fn maps_criteria_to_wire() {
        let wire = to_wire(&criteria(Some(HashMap::from([("tenant".into(), "a".into())]))));
        assert_eq!(wire.id.unwrap().value, 1_500_000_000);
        assert_eq!(wire.protocol, pb::Protocol::Udp as i32);
        let remote = wire.remote_address.unwrap();
        assert_eq!((remote.host.as_str(), remote.port), ("203.0.113.5", 51000));
        let local = wire.local_address.unwrap();
        assert_eq!((local.host.as_str(), local.port), ("198.51.100.9", 443));
        assert_eq!(wire.metadata.unwrap().data["tenant"], "a");
    }

    #[test]
    fn absent_metadata_is_not_sent() {
        assert!(to_wire(&criteria(None)).metadata.is_none());
    }

    #[test]
    fn deadline_exceeded_is_a_timeout() {
        let r = classify_status(tonic::Status::deadline_exceeded("too slow"));
        assert_eq!(r.status, DecisionStatus::Timeout);
        assert!(r.cause.is_none());
    }

    #[test]
    fn other_statuses_are_errors_with_cause() {
        for status in [
            tonic::Status::unavailable("down"),
            tonic::Status::cancelled("cancelled"),
            tonic::Status::internal("boom"),
        ] {
            let r = classify_status(status);
            assert_eq!(r.status, DecisionStatus::Error);
            assert!(matches!(r.cause, Some(ClientError::Status(_))));
        }
    }

    #[test]
    fn classifies_decision_codes() {
        assert!(classify_code(0).conn_accepted());
        assert!(classify_code(1).conn_rejected());
        let r = classify_code(42);
        assert_eq!(r.status, DecisionStatus::Error);
        assert!(matches!(r.cause, Some(ClientError::UnknownDecisionCode(42))));
    }

    #[test]
    fn endpoint_scheme_follows_transport() {
        assert_eq!(endpoint_uri("localhost:50051", false), "http://localhost:50051");
        assert_eq!(endpoint_uri("localhost:50051", true), "https://localhost:50051");
        assert_eq!(endpoint_uri("http://10.0.0.1:1", true), "http://10.0.0.1:1");
    }

    #[tokio::test]
    async fn unreachable_service_is_an_error() {
        let client = GrpcClient::connect_lazy("127.0.0.1:1", &TransportSecurity::Insecure).unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        let r = client.on_conn_opened(&criteria(None), deadline).await;
        assert_eq!(r.status, DecisionStatus::Error);
    }

    #[tokio::test]
    async fn silent_service_times_out_at_deadline() {
        // accepts TCP but never speaks HTTP/2
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let client = GrpcClient::connect_lazy(&addr.to_string(), &TransportSecurity::Insecure).unwrap();
        // tonic's grpc-timeout timer races the local deadline on every call
        for _ in 0..20 {
            let started = Instant::now();
            let r = client
                .on_conn_opened(&criteria(None), started + Duration::from_millis(50))
                .await;
            assert_eq!(r.status, DecisionStatus::Timeout, "cause: {:?}", r.cause);
            assert!(started.elapsed() < Duration::from_secs(2));
        }
    }

    #[tokio::test]
    async fn spent_budget_times_out_without_a_call() {
        // nothing listens here; a real call would be an error
        let client = GrpcClient::connect_lazy("127.0.0.1:1", &TransportSecurity::Insecure).unwrap();
        let r = client.on_conn_opened(&criteria(None), Instant::now()).await;
        assert_eq!(r.status, DecisionStatus::Timeout);
    }
}
