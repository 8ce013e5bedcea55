//! Prometheus metrics for veer.
//!
//! Fed by [`MetricsListener`], which turns lifecycle events into counters.
use crate::events::{Event, EventListener};
use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, Encoder, HistogramVec, TextEncoder,
};
use tracing::warn;

lazy_static! {
    /// Total number of requests answered
    pub static ref REQUESTS_TOTAL: CounterVec = register_counter_vec!(
        "veer_requests_total",
        "Total number of requests answered by the dispatcher",
        &["method", "status"]
    )
    .unwrap();

    /// Time from arrival to end of response body
    pub static ref REQUEST_DURATION_MS: HistogramVec = register_histogram_vec!(
        "veer_request_duration_ms",
        "Histogram of request duration in milliseconds",
        &["method"],
        vec![1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0]
    )
    .unwrap();

    /// Continuations, by handler kind
    pub static ref REDIRECTS_TOTAL: CounterVec = register_counter_vec!(
        "veer_redirects_total",
        "Total number of continuations",
        &["type"]
    )
    .unwrap();

    /// Failures, by error code name
    pub static ref ERRORS_TOTAL: CounterVec = register_counter_vec!(
        "veer_errors_total",
        "Total number of request failures",
        &["code"]
    )
    .unwrap();
}

/// Collect and return all metrics in Prometheus text format
pub fn collect_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        warn!("Failed to encode metrics: {}", e);
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

pub fn record_request(method: &str, status: u16, duration_ms: f64) {
    REQUESTS_TOTAL
        .with_label_values(&[method, &status.to_string()])
        .inc();
    REQUEST_DURATION_MS
        .with_label_values(&[method])
        .observe(duration_ms);
}

pub fn record_redirect(kind: &str) {
    REDIRECTS_TOTAL.with_label_values(&[kind]).inc();
}

pub fn record_error(code: &str) {
    ERRORS_TOTAL.with_label_values(&[code]).inc();
}

#[derive(Debug, Default)]
pub struct MetricsListener;

impl EventListener for MetricsListener {
    fn on_event(&self, event: &Event) {
        match event {
            Event::Redirected {
                method,
                status_code,
                time_spent,
                ..
            } => record_request(
                method.as_str(),
                *status_code,
                time_spent.as_secs_f64() * 1000.0,
            ),
            Event::Redirecting { kind, .. } => record_redirect(kind),
            Event::Error { reason, .. } => record_error(reason.code().name),
            Event::Incoming { .. } => {}
        }
    }

    fn name(&self) -> &str {
        "metrics"
    }
}
