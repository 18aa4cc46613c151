//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define ingest metrics (batches, records, retries, breaker activity)
//! - Expose Prometheus-compatible metrics endpoint
//!
//! # Metrics
//! - `ingest_batches_total` (counter): batches by outcome
//! - `ingest_records_total` (counter): records persisted
//! - `ingest_batch_duration_seconds` (histogram): end-to-end latency
//! - `ingest_retries_total` (counter): retry sleeps by call path
//! - `circuit_breaker_rejections_total` (counter): fast-failed calls
//! - `circuit_breaker_transitions_total` (counter): state changes
//! - `circuit_breaker_state` (gauge): 0=closed, 1=open, 2=half-open
//! - `telemetry_events_dropped_total` (counter): events lost by reason
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   recorder every call is a no-op, which keeps tests silent

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its HTTP scrape listener.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

/// Record a finished batch.
pub fn record_batch(outcome: &'static str, records: usize, start: Instant) {
    counter!("ingest_batches_total", "outcome" => outcome).increment(1);
    if records > 0 {
        counter!("ingest_records_total").increment(records as u64);
    }
    histogram!("ingest_batch_duration_seconds", "outcome" => outcome)
        .record(start.elapsed().as_secs_f64());
}

/// Record a retry sleep on a protected call path.
pub fn record_retry(path: &str) {
    counter!("ingest_retries_total", "path" => path.to_string()).increment(1);
}

/// Record a call rejected by an open breaker.
pub fn record_breaker_rejection(breaker: &str) {
    counter!("circuit_breaker_rejections_total", "breaker" => breaker.to_string()).increment(1);
}

/// Record a breaker state transition.
pub fn record_breaker_transition(breaker: &str, to: &'static str, state_code: u8) {
    counter!(
        "circuit_breaker_transitions_total",
        "breaker" => breaker.to_string(),
        "to" => to
    )
    .increment(1);
    record_breaker_state(breaker, state_code);
}

/// Publish a breaker's current state.
pub fn record_breaker_state(breaker: &str, state_code: u8) {
    gauge!("circuit_breaker_state", "breaker" => breaker.to_string()).set(f64::from(state_code));
}

/// Record telemetry events that will never be exported.
pub fn record_telemetry_drop(reason: &'static str, count: u64) {
    counter!("telemetry_events_dropped_total", "reason" => reason).increment(count);
}
