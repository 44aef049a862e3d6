//! Prometheus metrics for the conversion core.
//!
//! This module provides metrics for:
//! - Jobs (outcomes, durations, running and queued counts)
//! - Artifacts (published, discarded)
//! - Backends (failures by reason)
//! - Admission (rejections by reason)

use once_cell::sync::Lazy;
use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts};

// =============================================================================
// Job Metrics
// =============================================================================

/// Jobs finished, by kind and result ("succeeded" or a failure kind).
pub static JOBS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("convertly_jobs_total", "Total conversion jobs by outcome"),
        &["kind", "result"],
    )
    .unwrap()
});

/// Job duration from admission to cleanup.
pub static JOB_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "convertly_job_duration_seconds",
            "Duration of conversion jobs",
        )
        .buckets(vec![
            0.01, 0.05, 0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 300.0, 900.0,
        ]),
        &["kind"],
    )
    .unwrap()
});

/// Jobs currently holding a concurrency slot.
pub static JOBS_RUNNING: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "convertly_jobs_running",
        "Number of jobs currently holding a concurrency slot",
    )
    .unwrap()
});

/// Jobs waiting for a concurrency slot.
pub static JOBS_QUEUED: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "convertly_jobs_queued",
        "Number of jobs waiting for a concurrency slot",
    )
    .unwrap()
});

// =============================================================================
// Artifact Metrics
// =============================================================================

pub static ARTIFACTS_PUBLISHED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "convertly_artifacts_published_total",
        "Total artifacts published for download",
    )
    .unwrap()
});

pub static ARTIFACTS_DISCARDED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "convertly_artifacts_discarded_total",
        "Total temporary artifacts discarded",
    )
    .unwrap()
});

// =============================================================================
// Backend and Admission Metrics
// =============================================================================

/// Backend failures by job kind and failure kind.
pub static BACKEND_FAILURES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "convertly_backend_failures_total",
            "Total backend invocation failures",
        ),
        &["kind", "reason"],
    )
    .unwrap()
});

/// Requests turned away before a job was created or started.
pub static ADMISSION_REJECTIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "convertly_admission_rejections_total",
            "Total requests rejected at admission",
        ),
        &["reason"], // "unauthorized", "rate_limited", "queue_full", "queue_timeout"
    )
    .unwrap()
});

// =============================================================================
// Helper functions
// =============================================================================

/// Get all core metrics for registration in a registry.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        Box::new(JOBS_TOTAL.clone()),
        Box::new(JOB_DURATION.clone()),
        Box::new(JOBS_RUNNING.clone()),
        Box::new(JOBS_QUEUED.clone()),
        Box::new(ARTIFACTS_PUBLISHED.clone()),
        Box::new(ARTIFACTS_DISCARDED.clone()),
        Box::new(BACKEND_FAILURES.clone()),
        Box::new(ADMISSION_REJECTIONS.clone()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_metrics_register() {
        let registry = prometheus::Registry::new();
        for metric in all_metrics() {
            registry.register(metric).unwrap();
        }
        JOBS_TOTAL.with_label_values(&["zip_pack", "succeeded"]).inc();
        let families = registry.gather();
        assert!(families
            .iter()
            .any(|f| f.get_name() == "convertly_jobs_total"));
    }
}
