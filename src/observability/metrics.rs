//! Metrics collection and exposition.
//!
//! # Metrics
//! - `trust_http_requests_total` (counter): requests by method, status
//! - `trust_http_request_duration_seconds` (histogram): latency distribution
//! - `trust_decisions_total` (counter): engine decisions by operation, verdict
//! - `trust_security_events_total` (counter): appended events by type, severity
//! - `trust_bans_total` (counter): keys newly banned
//! - `trust_geo_enrichment_total` (counter): enrichment by outcome
//! - `trust_rate_limited_total` (counter): throttled requests
//! - `trust_collaborator_failures_total` (counter): store/log failures by operation
//!
//! # Design Decisions
//! - Recording is a no-op until a recorder is installed, so the engine and
//!   tests never depend on the exporter
//! - Labels are drawn from small fixed sets

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus recorder and its scrape endpoint.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "metrics endpoint started");
    Ok(())
}

pub fn record_request(method: &str, status: u16, start: Instant) {
    counter!(
        "trust_http_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    histogram!("trust_http_request_duration_seconds", "method" => method.to_string())
        .record(start.elapsed().as_secs_f64());
}

pub fn record_decision(operation: &'static str, verdict: &'static str) {
    counter!("trust_decisions_total", "operation" => operation, "verdict" => verdict).increment(1);
}

pub fn record_security_event(event_type: &'static str, severity: &'static str) {
    counter!(
        "trust_security_events_total",
        "type" => event_type,
        "severity" => severity
    )
    .increment(1);
}

pub fn record_ban() {
    counter!("trust_bans_total").increment(1);
}

pub fn record_enrichment(outcome: &'static str) {
    counter!("trust_geo_enrichment_total", "outcome" => outcome).increment(1);
}

pub fn record_rate_limited() {
    counter!("trust_rate_limited_total").increment(1);
}

pub fn record_collaborator_failure(operation: &'static str) {
    counter!("trust_collaborator_failures_total", "operation" => operation).increment(1);
}
