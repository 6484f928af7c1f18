//! Prometheus metrics for core components.
//!
//! This module provides metrics for:
//! - Channel API lookups and resolution outcomes
//! - Credential pool transitions
//! - Job and run lifecycle

use once_cell::sync::Lazy;
use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts};

// =============================================================================
// Channel API
// =============================================================================

/// Channel API lookups by result.
pub static API_LOOKUPS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("tubeid_api_lookups_total", "Total channel API lookups"),
        &["result"], // "found", "not_found", "ambiguous", "quota", "transient", "timeout", "rejected"
    )
    .unwrap()
});

/// Channel API lookup duration in seconds.
pub static API_LOOKUP_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "tubeid_api_lookup_duration_seconds",
            "Duration of channel API lookups",
        )
        .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
        &["api"],
    )
    .unwrap()
});

/// Credential status transitions.
pub static CREDENTIAL_TRANSITIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "tubeid_credential_transitions_total",
            "Credentials removed from rotation, by new status",
        ),
        &["status"],
    )
    .unwrap()
});

// =============================================================================
// Resolution
// =============================================================================

/// Resolution outcomes.
pub static RESOLUTIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("tubeid_resolutions_total", "Total channel resolutions"),
        &["outcome"], // "direct", "lookup", "needs_search", "error"
    )
    .unwrap()
});

// =============================================================================
// Jobs and runs
// =============================================================================

/// Job terminal transitions by status.
pub static JOB_TRANSITIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("tubeid_job_transitions_total", "Jobs reaching a terminal status"),
        &["status"],
    )
    .unwrap()
});

/// Jobs put back to PENDING for another attempt.
pub static JOB_REQUEUES: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("tubeid_job_requeues_total", "Total job requeues").unwrap()
});

/// Deliveries of jobs that were already claimed or terminal.
pub static DUPLICATE_DELIVERIES: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "tubeid_duplicate_deliveries_total",
        "Job deliveries skipped because the job was not PENDING",
    )
    .unwrap()
});

/// Runs started total.
pub static RUNS_STARTED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("tubeid_runs_started_total", "Total runs started").unwrap()
});

/// Runs finalized total.
pub static RUNS_FINALIZED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("tubeid_runs_finalized_total", "Total runs finalized").unwrap()
});

// =============================================================================
// Helper functions
// =============================================================================

/// Get all core metrics for registration in a registry.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        Box::new(API_LOOKUPS.clone()),
        Box::new(API_LOOKUP_DURATION.clone()),
        Box::new(CREDENTIAL_TRANSITIONS.clone()),
        Box::new(RESOLUTIONS.clone()),
        Box::new(JOB_TRANSITIONS.clone()),
        Box::new(JOB_REQUEUES.clone()),
        Box::new(DUPLICATE_DELIVERIES.clone()),
        Box::new(RUNS_STARTED.clone()),
        Box::new(RUNS_FINALIZED.clone()),
    ]
}
