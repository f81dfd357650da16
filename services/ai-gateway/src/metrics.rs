//! Prometheus metrics exposition
//!
//! Gateway metrics:
//!
//! - `gateway_requests_total` (counter): labels `route`, `source`
//! - `gateway_request_duration_seconds` (histogram): label `route`
//! - `gateway_ai_fallbacks_total` (counter): labels `route`, `reason`
//!
//! The key pool crate emits `key_pool_*` counters into the same recorder.

use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};

const DURATION_METRIC: &str = "gateway_request_duration_seconds";

/// Bucket boundaries from 5ms up to the default provider timeout.
const DURATION_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0,
];

fn builder() -> PrometheusBuilder {
    PrometheusBuilder::new()
        .set_buckets_for_metric(Matcher::Full(DURATION_METRIC.to_string()), DURATION_BUCKETS)
        .expect("histogram buckets are non-empty")
}

/// Install the Prometheus recorder and return a handle for rendering metrics.
///
/// Request durations render as a histogram (`_bucket` lines) rather than
/// the default summary.
pub fn install_recorder() -> PrometheusHandle {
    builder()
        .install_recorder()
        .expect("failed to install Prometheus recorder")
}

/// Record a completed request. `source` is `ai`, `fallback` or `error`.
pub fn record_request(route: &'static str, source: &'static str, duration_secs: f64) {
    metrics::counter!("gateway_requests_total", "route" => route, "source" => source)
        .increment(1);
    metrics::histogram!(DURATION_METRIC, "route" => route).record(duration_secs);
}

/// Record that a route answered with its heuristic instead of the model.
pub fn record_ai_fallback(route: &'static str, reason: &'static str) {
    metrics::counter!("gateway_ai_fallbacks_total", "route" => route, "reason" => reason)
        .increment(1);
}
