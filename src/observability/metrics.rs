//! Metrics collection and exposition.
//!
//! # Metrics
//! - `jscp_requests_total` (counter): requests by site and status
//! - `jscp_request_duration_seconds` (histogram): dispatch latency by site
//! - `jscp_log_dropped_total` (counter): log lines dropped on queue overflow
//!
//! # Design Decisions
//! - Macros are no-ops until a recorder is installed, so tests need no setup
//! - The Prometheus exporter runs its own HTTP listener when enabled

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its scrape endpoint.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

/// Record one dispatched request.
pub fn record_request(site: &str, status: u16, start: Instant) {
    metrics::counter!(
        "jscp_requests_total",
        "site" => site.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    metrics::histogram!("jscp_request_duration_seconds", "site" => site.to_string())
        .record(start.elapsed().as_secs_f64());
}

pub fn record_log_dropped() {
    metrics::counter!("jscp_log_dropped_total").increment(1);
}
