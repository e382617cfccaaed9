//! Metrics collection and exposition.
//!
//! # Metrics
//! - `needle_decisions_total` (counter): decisions by needle, status, decision
//! - `needle_decision_duration_seconds` (histogram): decision call latency
//! - `needle_close_notifications_total` (counter): close deliveries by result
//! - `needle_build_total` (counter): needle definitions built, by result
//! - `proxy_active_connections` (gauge): open connections per route
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   exporter every call is a no-op
//! - Prometheus exporter is opt-in (`observability.metrics_enabled`)

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::Duration;

/// Install the Prometheus exporter listening on `addr`.
///
/// Must be called within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_decision(needle: &str, status: &str, decision: &str, elapsed: Duration) {
    counter!(
        "needle_decisions_total",
        "needle" => needle.to_string(),
        "status" => status.to_string(),
        "decision" => decision.to_string()
    )
    .increment(1);
    histogram!("needle_decision_duration_seconds", "needle" => needle.to_string())
        .record(elapsed.as_secs_f64());
}

pub fn record_close_notification(needle: &str, result: &str) {
    counter!(
        "needle_close_notifications_total",
        "needle" => needle.to_string(),
        "result" => result.to_string()
    )
    .increment(1);
}

pub fn record_needle_build(result: &str) {
    counter!("needle_build_total", "result" => result.to_string()).increment(1);
}

pub fn set_active_connections(route: &str, count: usize) {
    gauge!("proxy_active_connections", "route" => route.to_string()).set(count as f64);
}
