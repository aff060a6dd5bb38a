//! Metrics collection and exposition.
//!
//! # Metrics
//! - `server_connections_accepted_total` (counter)
//! - `server_connections_rejected_total` (counter): by `reason`
//! - `server_open_connections` (gauge): connections currently being served
//! - `server_shutdowns_total` (counter): by `outcome`
//! - `server_drain_duration_seconds` (histogram): time spent in close()

use std::net::SocketAddr;
use std::time::Duration;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus recorder and its scrape endpoint.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

pub fn record_connection_accepted() {
    counter!("server_connections_accepted_total").increment(1);
}

pub fn record_connection_rejected(reason: &'static str) {
    counter!("server_connections_rejected_total", "reason" => reason).increment(1);
}

pub fn connection_opened() {
    gauge!("server_open_connections").increment(1.0);
}

pub fn connection_closed() {
    gauge!("server_open_connections").decrement(1.0);
}

/// Record how a shutdown ended and how long the drain took.
pub fn record_shutdown(outcome: &'static str, elapsed: Duration) {
    counter!("server_shutdowns_total", "outcome" => outcome).increment(1);
    histogram!("server_drain_duration_seconds").record(elapsed.as_secs_f64());
}
