//! Metrics collection and exposition.
//!
//! # Metrics
//! - `mgmt_connections_total` (counter): accepted management connections
//! - `mgmt_commands_total` (counter): commands served, by command
//! - `mgmt_session_errors_total` (counter): failed sessions, by kind
//! - `mgmt_registered_inputs` (gauge): inputs currently registered
//! - `mgmt_server_restarts_total` (counter): supervised restarts
//!
//! Without an installed recorder every call is a no-op.

use std::net::SocketAddr;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus exporter on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_connection() {
    metrics::counter!("mgmt_connections_total").increment(1);
}

pub fn record_command(command: &'static str) {
    metrics::counter!("mgmt_commands_total", "command" => command).increment(1);
}

pub fn record_session_error(kind: &'static str) {
    metrics::counter!("mgmt_session_errors_total", "kind" => kind).increment(1);
}

pub fn record_registered_inputs(count: usize) {
    metrics::gauge!("mgmt_registered_inputs").set(count as f64);
}

pub fn record_server_restart() {
    metrics::counter!("mgmt_server_restarts_total").increment(1);
}
