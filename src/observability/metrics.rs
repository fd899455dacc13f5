//! Metrics collection and exposition.
//!
//! # Metrics
//! - `courier_send_total` (counter): logical sends by destination, outcome
//! - `courier_send_duration_seconds` (histogram): wall time of a logical send incl. retries
//! - `courier_retries_total` (counter): retry attempts by destination, reason
//! - `courier_circuit_transitions_total` (counter): breaker transitions by destination, state
//! - `courier_circuit_state` (gauge): 0=closed, 1=half-open, 2=open
//! - `courier_circuit_rejections_total` (counter): sends refused by an open breaker
//! - `courier_pending_acks` (gauge): unacknowledged messages across transports
//! - `courier_ack_retransmits_total` / `courier_ack_exhausted_total` (counters)
//! - `courier_replay_rejections_total` (counter): by reason
//! - `courier_inbound_envelopes_total` (counter): inbound acceptance by outcome
//!
//! Without an installed recorder every call is a no-op.

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::resilience::circuit_breaker::CircuitState;

/// Install the Prometheus exporter with an HTTP scrape listener.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

pub fn record_send(destination: &str, outcome: &'static str, start: Instant) {
    counter!("courier_send_total", "destination" => destination.to_string(), "outcome" => outcome)
        .increment(1);
    histogram!("courier_send_duration_seconds", "destination" => destination.to_string())
        .record(start.elapsed().as_secs_f64());
}

pub fn record_retry(destination: &str, reason: &'static str) {
    counter!("courier_retries_total", "destination" => destination.to_string(), "reason" => reason)
        .increment(1);
}

pub fn record_circuit_transition(destination: &str, state: CircuitState) {
    counter!(
        "courier_circuit_transitions_total",
        "destination" => destination.to_string(),
        "state" => state.as_str()
    )
    .increment(1);
    let value = match state {
        CircuitState::Closed => 0.0,
        CircuitState::HalfOpen => 1.0,
        CircuitState::Open => 2.0,
    };
    gauge!("courier_circuit_state", "destination" => destination.to_string()).set(value);
}

pub fn record_circuit_rejection(destination: &str) {
    counter!("courier_circuit_rejections_total", "destination" => destination.to_string())
        .increment(1);
}

pub fn adjust_pending_acks(delta: f64) {
    gauge!("courier_pending_acks").increment(delta);
}

pub fn record_ack_retransmit() {
    counter!("courier_ack_retransmits_total").increment(1);
}

pub fn record_ack_exhausted() {
    counter!("courier_ack_exhausted_total").increment(1);
}

pub fn record_replay_rejection(reason: &'static str) {
    counter!("courier_replay_rejections_total", "reason" => reason).increment(1);
}

pub fn record_inbound(outcome: &'static str) {
    counter!("courier_inbound_envelopes_total", "outcome" => outcome).increment(1);
}
