//! Metrics collection and exposition.
//!
//! # Metrics
//! - `http_requests_total` (counter): requests by path, method, status code
//! - `http_request_duration_seconds` (histogram): latency by path, method
//! - `webhook_tls_certificate_unavailable_total` (counter): handshakes refused
//!   because no serving certificate was available
//!
//! The recorder is installed once per process; `/metrics` renders through the
//! returned handle.

use std::time::Instant;

use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder, PrometheusHandle};

const REQUEST_DURATION: &str = "http_request_duration_seconds";

const LATENCY_BUCKETS: &[f64] = &[0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0];

fn builder() -> Result<PrometheusBuilder, BuildError> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(Matcher::Full(REQUEST_DURATION.to_string()), LATENCY_BUCKETS)
}

/// Install the global Prometheus recorder.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    builder()?.install_recorder()
}

/// Build a handle that is not wired to the global recorder.
///
/// Routes need a handle to render from; tests and embedders that never install the
/// global recorder use this one.
pub fn detached_handle() -> Result<PrometheusHandle, BuildError> {
    Ok(builder()?.build_recorder().handle())
}

/// Record a completed HTTP request.
pub fn record_request(path: &str, method: &str, status: u16, start: Instant) {
    metrics::counter!(
        "http_requests_total",
        "path" => path.to_string(),
        "method" => method.to_string(),
        "code" => status.to_string()
    )
    .increment(1);
    metrics::histogram!(
        REQUEST_DURATION,
        "path" => path.to_string(),
        "method" => method.to_string()
    )
    .record(start.elapsed().as_secs_f64());
}

/// Record a handshake refused for lack of a serving certificate.
pub fn record_certificate_unavailable() {
    metrics::counter!("webhook_tls_certificate_unavailable_total").increment(1);
}
