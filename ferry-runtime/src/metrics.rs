//! Prometheus metrics for Ferry runtime operations
//!
//! This module defines metrics for tracking query jobs run against the engine.

use lazy_static::lazy_static;
use prometheus::{register_histogram_vec, register_int_counter_vec, HistogramVec, IntCounterVec};

lazy_static! {
    /// Total number of resolved query jobs
    ///
    /// Labels:
    /// - job_kind: "probe", "write"
    /// - outcome: "success", "service", "client_timeout", "bad_request", "connection_lost", "unexpected"
    pub static ref JOB_OUTCOMES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "ferry_job_outcomes_total",
        "Total number of resolved query jobs",
        &["job_kind", "outcome"]
    )
    .expect("ferry_job_outcomes_total metric registration");

    /// Total number of cancellation requests sent for jobs nearing the deadline
    ///
    /// Labels:
    /// - acknowledged: "true", "false"
    pub static ref JOB_CANCELLATIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "ferry_job_cancellations_total",
        "Total number of query job cancellation requests",
        &["acknowledged"]
    )
    .expect("ferry_job_cancellations_total metric registration");

    /// Wall-clock duration of query jobs from submission to resolution
    ///
    /// Labels:
    /// - job_kind: "probe", "write"
    ///
    /// Buckets: 0.5s to 540s
    pub static ref JOB_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "ferry_job_duration_seconds",
        "Duration of query jobs from submission to resolution",
        &["job_kind"],
        vec![0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 540.0]
    )
    .expect("ferry_job_duration_seconds metric registration");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_registration() {
        let _ = JOB_OUTCOMES_TOTAL.with_label_values(&["probe", "success"]);
        let _ = JOB_CANCELLATIONS_TOTAL.with_label_values(&["true"]);
        let _ = JOB_DURATION_SECONDS.with_label_values(&["write"]);
    }
}
