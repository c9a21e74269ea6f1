//! Prometheus metrics for the request pipeline.
//!
//! Metrics are exposed on a dedicated listener when `METRICS_PORT` is set.
//! Recording functions are safe to call without an installed exporter; the
//! `metrics` facade turns them into no-ops.
//!
//! # Available Metrics
//!
//! ## Counters
//! - `gateway_rate_limited_total` - Requests rejected by the rate limiter
//! - `gateway_errors_total` - Error responses (labels: class, status)
//! - `gateway_sanitized_fields_total` - Fields changed by sanitization (label: kind)
//!
//! ## Histograms
//! - `gateway_request_duration_seconds` - Request duration (labels: method, status)
//!
//! ## Gauges
//! - `gateway_rate_limit_tracked_clients` - Clients currently in the rate-limit table

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::{error, info};

use crate::sanitize::SanitizeReport;

/// Metric names as constants for consistency.
pub mod names {
    pub const RATE_LIMITED_TOTAL: &str = "gateway_rate_limited_total";
    pub const ERRORS_TOTAL: &str = "gateway_errors_total";
    pub const SANITIZED_FIELDS_TOTAL: &str = "gateway_sanitized_fields_total";
    pub const REQUEST_DURATION_SECONDS: &str = "gateway_request_duration_seconds";
    pub const RATE_LIMIT_TRACKED_CLIENTS: &str = "gateway_rate_limit_tracked_clients";
}

/// Install the Prometheus exporter and describe all metrics.
///
/// # Errors
///
/// Returns a message if the exporter cannot be installed (e.g. the port is taken).
pub fn init_metrics(metrics_addr: SocketAddr) -> Result<(), String> {
    PrometheusBuilder::new()
        .with_http_listener(metrics_addr)
        .install()
        .map_err(|e| format!("Failed to install Prometheus exporter: {e}"))?;

    describe_counter!(
        names::RATE_LIMITED_TOTAL,
        "Total number of requests rejected by the rate limiter"
    );
    describe_counter!(
        names::ERRORS_TOTAL,
        "Total number of error responses by class (operational/programming)"
    );
    describe_counter!(
        names::SANITIZED_FIELDS_TOTAL,
        "Total number of request fields removed or escaped by sanitization"
    );

    describe_histogram!(
        names::REQUEST_DURATION_SECONDS,
        "HTTP request duration in seconds"
    );

    describe_gauge!(
        names::RATE_LIMIT_TRACKED_CLIENTS,
        "Number of clients in the rate-limit table"
    );

    info!(addr = %metrics_addr, "Prometheus metrics endpoint started");
    Ok(())
}

/// Initialize metrics, logging failure instead of aborting startup.
pub fn try_init_metrics(metrics_addr: SocketAddr) {
    if let Err(e) = init_metrics(metrics_addr) {
        error!(error = %e, "Failed to initialize metrics, continuing without metrics");
    }
}

// =============================================================================
// Counters
// =============================================================================

pub fn record_rate_limited() {
    counter!(names::RATE_LIMITED_TOTAL).increment(1);
}

/// Record one error response.
pub fn record_error(operational: bool, status: u16) {
    let class = if operational {
        "operational"
    } else {
        "programming"
    };
    counter!(names::ERRORS_TOTAL, "class" => class, "status" => status.to_string()).increment(1);
}

/// Record what a sanitization pass changed. Clean passes record nothing.
pub fn record_sanitized(report: &SanitizeReport) {
    if report.removed_keys > 0 {
        counter!(names::SANITIZED_FIELDS_TOTAL, "kind" => "operator_key")
            .increment(report.removed_keys as u64);
    }
    if report.escaped_strings > 0 {
        counter!(names::SANITIZED_FIELDS_TOTAL, "kind" => "markup")
            .increment(report.escaped_strings as u64);
    }
}

// =============================================================================
// Histograms
// =============================================================================

pub fn record_request_duration(method: &str, status: u16, duration_secs: f64) {
    histogram!(names::REQUEST_DURATION_SECONDS, "method" => method.to_string(), "status" => status.to_string())
        .record(duration_secs);
}

// =============================================================================
// Gauges
// =============================================================================

pub fn set_tracked_clients(count: usize) {
    gauge!(names::RATE_LIMIT_TRACKED_CLIENTS).set(count as f64);
}
