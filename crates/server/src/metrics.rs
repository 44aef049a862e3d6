//! Prometheus metrics for observability.
//!
//! This module provides metrics for monitoring the gateway:
//! - HTTP request metrics (latency, counts, errors)
//! - Admission failures
//! - Scratch storage usage (collected dynamically)
//!
//! Core job metrics are registered alongside.

use once_cell::sync::Lazy;
use prometheus::{
    self, Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use regex_lite::Regex;
use tracing::error;

/// Global metrics registry.
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let registry = Registry::new();
    register_metrics(&registry);
    registry
});

// =============================================================================
// HTTP Request Metrics
// =============================================================================

/// HTTP request duration in seconds.
pub static HTTP_REQUEST_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "convertly_http_request_duration_seconds",
            "HTTP request duration in seconds",
        )
        .buckets(vec![
            0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 120.0, 600.0,
        ]),
        &["method", "path", "status"],
    )
    .unwrap()
});

/// HTTP requests total count.
pub static HTTP_REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("convertly_http_requests_total", "Total HTTP requests"),
        &["method", "path", "status"],
    )
    .unwrap()
});

/// HTTP requests currently in flight.
pub static HTTP_REQUESTS_IN_FLIGHT: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "convertly_http_requests_in_flight",
        "Number of HTTP requests currently being processed",
    )
    .unwrap()
});

/// Authentication failures.
pub static AUTH_FAILURES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "convertly_auth_failures_total",
            "Total authentication failures",
        ),
        &["reason"],
    )
    .unwrap()
});

// =============================================================================
// Storage Metrics (collected dynamically)
// =============================================================================

pub static SCRATCH_BYTES_IN_USE: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "convertly_scratch_bytes_in_use",
        "Bytes currently charged against the scratch quota",
    )
    .unwrap()
});

// =============================================================================
// Registration
// =============================================================================

fn register_metrics(registry: &Registry) {
    let server: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(HTTP_REQUEST_DURATION.clone()),
        Box::new(HTTP_REQUESTS_TOTAL.clone()),
        Box::new(HTTP_REQUESTS_IN_FLIGHT.clone()),
        Box::new(AUTH_FAILURES_TOTAL.clone()),
        Box::new(SCRATCH_BYTES_IN_USE.clone()),
    ];

    for metric in server.into_iter().chain(convertly_core::metrics::all_metrics()) {
        if let Err(e) = registry.register(metric) {
            error!("Failed to register metric: {}", e);
        }
    }
}

/// Encode all metrics as Prometheus text format.
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!("Failed to encode metrics: {}", e);
        return String::new();
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

/// Refresh gauges read from application state.
pub fn collect_dynamic_metrics(state: &crate::state::AppState) {
    let bytes = state.orchestrator().store().bytes_in_use();
    SCRATCH_BYTES_IN_USE.set(i64::try_from(bytes).unwrap_or(i64::MAX));
}

static ARTIFACT_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[0-9a-f]{32}-[0-9a-f]{12}(\.[A-Za-z0-9]+)?").unwrap());

/// Normalize a path for metric labels (published file names become `{file}`).
pub fn normalize_path(path: &str) -> String {
    ARTIFACT_NAME.replace_all(path, "{file}").into_owned()
}
