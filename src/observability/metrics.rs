//! Metrics collection and exposition.
//!
//! # Metrics
//! - `relay_incidents_total` (counter): incidents created, by source
//! - `relay_decisions_total` (counter): approval decisions, by outcome
//! - `relay_expirations_total` (counter): approval requests expired by the sweeper
//! - `relay_deliveries_total` (counter): outbound webhook deliveries, by outcome
//! - `relay_realtime_sessions` (gauge): open observer sessions

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;

/// Install the Prometheus exporter on `addr`. Must run inside a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_incident(source: &str) {
    counter!("relay_incidents_total", "source" => source.to_string()).increment(1);
}

pub fn record_decision(outcome: &str) {
    counter!("relay_decisions_total", "outcome" => outcome.to_string()).increment(1);
}

pub fn record_expiration() {
    counter!("relay_expirations_total").increment(1);
}

pub fn record_delivery(outcome: &str) {
    counter!("relay_deliveries_total", "outcome" => outcome.to_string()).increment(1);
}

pub fn set_sessions(count: usize) {
    gauge!("relay_realtime_sessions").set(count as f64);
}
