//! Metrics and observability utilities
//!
//! Prometheus metrics for the processor and detector, with
//! standardized naming conventions.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, histogram, Unit};

/// Metrics prefix for all Dossier metrics
pub const METRICS_PREFIX: &str = "dossier";

/// Buckets for per-unit analysis latency (analyzer calls dominate)
pub const UNIT_BUCKETS: &[f64] = &[
    0.100,  // 100ms
    0.250,  // 250ms
    0.500,  // 500ms
    1.000,  // 1s
    2.000,  // 2s
    5.000,  // 5s
    10.00,  // 10s
    30.00,  // 30s
    60.00,  // 60s - per-unit timeout
];

/// Register all metric descriptions
pub fn register_metrics() {
    // Processor metrics
    describe_counter!(
        format!("{}_jobs_claimed_total", METRICS_PREFIX),
        Unit::Count,
        "Total jobs claimed by the processor loop"
    );

    describe_counter!(
        format!("{}_jobs_completed_total", METRICS_PREFIX),
        Unit::Count,
        "Total jobs finished successfully"
    );

    describe_counter!(
        format!("{}_jobs_failed_total", METRICS_PREFIX),
        Unit::Count,
        "Total jobs marked failed"
    );

    describe_counter!(
        format!("{}_units_processed_total", METRICS_PREFIX),
        Unit::Count,
        "Total analysis units completed"
    );

    describe_counter!(
        format!("{}_units_failed_total", METRICS_PREFIX),
        Unit::Count,
        "Total analysis units that errored or timed out"
    );

    describe_histogram!(
        format!("{}_unit_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Per-unit analysis latency in seconds"
    );

    // Detector metrics
    describe_counter!(
        format!("{}_jobs_stalled_total", METRICS_PREFIX),
        Unit::Count,
        "Total jobs auto-failed by the stuck-job detector"
    );

    describe_gauge!(
        format!("{}_jobs_stale_detected", METRICS_PREFIX),
        Unit::Count,
        "Stale jobs found in the last detector sweep"
    );

    tracing::info!("Metrics registered");
}

/// Helper to record the outcome of one analysis unit
pub fn record_unit(duration_secs: f64, job_type: &str, success: bool) {
    if success {
        counter!(
            format!("{}_units_processed_total", METRICS_PREFIX),
            "job_type" => job_type.to_string()
        )
        .increment(1);
    } else {
        counter!(
            format!("{}_units_failed_total", METRICS_PREFIX),
            "job_type" => job_type.to_string()
        )
        .increment(1);
    }

    histogram!(
        format!("{}_unit_duration_seconds", METRICS_PREFIX),
        "job_type" => job_type.to_string()
    )
    .record(duration_secs);
}

/// Helper to record a finished job
pub fn record_job_outcome(job_type: &str, success: bool) {
    let name = if success {
        format!("{}_jobs_completed_total", METRICS_PREFIX)
    } else {
        format!("{}_jobs_failed_total", METRICS_PREFIX)
    };
    counter!(name, "job_type" => job_type.to_string()).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_buckets_sorted() {
        let mut prev = 0.0;
        for &bucket in UNIT_BUCKETS {
            assert!(bucket > prev);
            prev = bucket;
        }
        // Per-unit timeout should be the last bucket
        assert_eq!(*UNIT_BUCKETS.last().unwrap(), 60.0);
    }

    #[test]
    fn test_record_helpers_run() {
        record_unit(0.25, "document_analysis", true);
        record_unit(1.5, "document_analysis", false);
        record_job_outcome("document_analysis", true);
    }
}
