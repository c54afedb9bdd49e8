//! Metrics collection and exposition.
//!
//! # Metrics
//! - `lb_requests_total` (counter): client requests by final backend, status
//! - `lb_request_duration_seconds` (histogram): end-to-end dispatch latency
//! - `lb_retries_total` (counter): retries by failure kind
//! - `lb_probes_total` (counter): probe results by backend
//! - `lb_backend_health` (gauge): 1=healthy, 0=not healthy
//!
//! Without an installed recorder every call is a no-op.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::Instant;

/// Install the Prometheus recorder with its own HTTP listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(backend: &str, status: u16, start: Instant) {
    counter!(
        "lb_requests_total",
        "backend" => backend.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    histogram!("lb_request_duration_seconds").record(start.elapsed().as_secs_f64());
}

pub fn record_retry(reason: &'static str) {
    counter!("lb_retries_total", "reason" => reason).increment(1);
}

pub fn record_probe(backend: &str, healthy: bool) {
    let result = if healthy { "up" } else { "down" };
    counter!("lb_probes_total", "backend" => backend.to_string(), "result" => result).increment(1);
}

pub fn record_backend_health(backend: &str, healthy: bool) {
    gauge!("lb_backend_health", "backend" => backend.to_string()).set(if healthy { 1.0 } else { 0.0 });
}
