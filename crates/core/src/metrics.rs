//! Prometheus metrics for core components.
//!
//! This module provides metrics for:
//! - Job runs (started, finished by status, active)
//! - Records by outcome and pipeline stage failures
//! - Document service calls and conversions
//! - Progress events published

use once_cell::sync::Lazy;
use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts};

// =============================================================================
// Job Metrics
// =============================================================================

/// Job executions started.
pub static JOBS_STARTED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("docfetch_jobs_started_total", "Total job executions started").unwrap()
});

/// Job executions that left the runner, by resulting status.
pub static JOBS_FINISHED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "docfetch_jobs_finished_total",
            "Job executions finished by resulting status",
        ),
        &["status"], // "completed", "completed_with_errors", "failed", "cancelled"
    )
    .unwrap()
});

/// Jobs currently executing in this process.
pub static JOBS_ACTIVE: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new("docfetch_jobs_active", "Jobs currently executing").unwrap()
});

/// Wall-clock duration of one job execution.
pub static JOB_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "docfetch_job_duration_seconds",
            "Duration of a job execution",
        )
        .buckets(vec![1.0, 10.0, 60.0, 300.0, 900.0, 1800.0, 3600.0, 7200.0]),
        &["status"],
    )
    .unwrap()
});

// =============================================================================
// Record Metrics
// =============================================================================

/// Records processed by outcome.
pub static RECORDS_PROCESSED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("docfetch_records_processed_total", "Records processed"),
        &["outcome"], // "completed", "not_found", "failed"
    )
    .unwrap()
});

/// Record failures by pipeline stage.
pub static RECORD_FAILURES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "docfetch_record_failures_total",
            "Record failures by pipeline stage",
        ),
        &["stage"],
    )
    .unwrap()
});

/// Per-record pipeline duration.
pub static RECORD_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "docfetch_record_duration_seconds",
            "Duration of one record through the pipeline",
        )
        .buckets(vec![0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0]),
        &["outcome"],
    )
    .unwrap()
});

/// Files placed into output folders.
pub static FILES_PLACED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("docfetch_files_placed_total", "Total files placed").unwrap()
});

// =============================================================================
// Progress Metrics
// =============================================================================

/// Progress events handed to a publisher, by event type.
pub static PROGRESS_EVENTS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "docfetch_progress_events_total",
            "Progress events published",
        ),
        &["type"],
    )
    .unwrap()
});

/// Subscribers dropped because delivery failed.
pub static PROGRESS_SUBSCRIBERS_DROPPED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "docfetch_progress_subscribers_dropped_total",
        "Subscribers removed after a failed delivery",
    )
    .unwrap()
});

/// Outbox rows relayed into the local bus.
pub static OUTBOX_RELAYED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "docfetch_outbox_relayed_total",
        "Outbox events relayed to local subscribers",
    )
    .unwrap()
});

/// Get all core metrics for registration.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        Box::new(JOBS_STARTED.clone()),
        Box::new(JOBS_FINISHED.clone()),
        Box::new(JOBS_ACTIVE.clone()),
        Box::new(JOB_DURATION.clone()),
        Box::new(RECORDS_PROCESSED.clone()),
        Box::new(RECORD_FAILURES.clone()),
        Box::new(RECORD_DURATION.clone()),
        Box::new(FILES_PLACED.clone()),
        Box::new(PROGRESS_EVENTS.clone()),
        Box::new(PROGRESS_SUBSCRIBERS_DROPPED.clone()),
        Box::new(OUTBOX_RELAYED.clone()),
    ]
}
