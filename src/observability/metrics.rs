//! Metrics collection and exposition.
//!
//! # Metrics
//! - `translator_requests_total` (counter): requests by endpoint, outcome
//! - `translator_request_duration_seconds` (histogram): backend latency
//! - `translator_circuit_state` (gauge): 0=closed, 1=half_open, 2=open
//! - `translator_rate_limit_total` (counter): admitted/queued/rejected
//! - `translator_retries_total` (counter): retries by endpoint, error kind
//! - `translator_cache_lookups_total` (counter): hits and misses
//! - `translator_cache_entries` (gauge): entries per cache
//! - `translator_network_tier` (gauge): 0=excellent .. 4=offline
//! - `translator_credential_rotations_total` (counter): by outcome
//!
//! # Design Decisions
//! - Thin wrappers over the `metrics` facade; without an installed recorder
//!   they are no-ops, so library code records unconditionally
//! - The Prometheus exporter is opt-in via configuration

use std::net::SocketAddr;
use std::time::Duration;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::network::quality::NetworkTier;
use crate::resilience::circuit_breaker::CircuitState;

/// Install the Prometheus exporter with an HTTP listener on `addr`.
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics exporter listening");
    Ok(())
}

pub fn record_request(endpoint: &str, outcome: &'static str, elapsed: Duration) {
    ::metrics::counter!(
        "translator_requests_total",
        "endpoint" => endpoint.to_string(),
        "outcome" => outcome
    )
    .increment(1);
    ::metrics::histogram!(
        "translator_request_duration_seconds",
        "endpoint" => endpoint.to_string()
    )
    .record(elapsed.as_secs_f64());
}

pub fn record_circuit_state(endpoint: &str, state: CircuitState) {
    let value = match state {
        CircuitState::Closed => 0.0,
        CircuitState::HalfOpen => 1.0,
        CircuitState::Open => 2.0,
    };
    ::metrics::gauge!("translator_circuit_state", "endpoint" => endpoint.to_string()).set(value);
}

pub fn record_rate_limit(endpoint: &str, outcome: &'static str) {
    ::metrics::counter!(
        "translator_rate_limit_total",
        "endpoint" => endpoint.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

pub fn record_retry(endpoint: &str, error_kind: &'static str) {
    ::metrics::counter!(
        "translator_retries_total",
        "endpoint" => endpoint.to_string(),
        "error" => error_kind
    )
    .increment(1);
}

pub fn record_cache_lookup(cache: &'static str, hit: bool) {
    let result = if hit { "hit" } else { "miss" };
    ::metrics::counter!("translator_cache_lookups_total", "cache" => cache, "result" => result)
        .increment(1);
}

pub fn record_cache_size(cache: &'static str, entries: usize) {
    ::metrics::gauge!("translator_cache_entries", "cache" => cache).set(entries as f64);
}

pub fn record_network_tier(tier: NetworkTier) {
    ::metrics::gauge!("translator_network_tier").set(f64::from(tier.level()));
}

pub fn record_rotation(outcome: &'static str) {
    ::metrics::counter!("translator_credential_rotations_total", "outcome" => outcome).increment(1);
}
