//! Metrics collection and exposition.
//!
//! # Metrics
//! - `relay_requests_total` (counter): completed requests by method and outcome
//!   (upstream status code, or error kind)
//! - `relay_request_duration_seconds` (histogram): submit-to-completion latency
//! - `relay_connects_total` (counter): connect attempts by outcome
//! - `relay_paused_requests_total` (counter): requests parked by a dying connection
//! - `relay_queue_depth` (gauge): entries waiting, by queue
//! - `relay_circuit_state` (gauge): 0=closed, 1=half-open, 2=open
//!
//! Without an installed recorder every call here is a no-op.

use std::net::SocketAddr;
use std::time::Instant;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::resilience::CircuitState;

/// Install the Prometheus exporter with its own HTTP listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(method: &str, outcome: String, start: Instant) {
    counter!("relay_requests_total", "method" => method.to_string(), "outcome" => outcome)
        .increment(1);
    histogram!("relay_request_duration_seconds", "method" => method.to_string())
        .record(start.elapsed().as_secs_f64());
}

pub fn record_connect(success: bool) {
    let outcome = if success { "success" } else { "failure" };
    counter!("relay_connects_total", "outcome" => outcome).increment(1);
}

pub fn record_paused() {
    counter!("relay_paused_requests_total").increment(1);
}

pub fn record_queue_depth(fresh: usize, paused: usize) {
    gauge!("relay_queue_depth", "queue" => "fresh").set(fresh as f64);
    gauge!("relay_queue_depth", "queue" => "paused").set(paused as f64);
}

pub fn record_circuit_state(state: CircuitState) {
    gauge!("relay_circuit_state").set(state.as_gauge());
}
