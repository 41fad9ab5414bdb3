//! Prometheus metrics for ingestion invocations.
//!
//! Job-level metrics (outcomes, cancellations, durations) are recorded by
//! `ferry-runtime`; this module covers the invocation and notification level.
//! Everything registered in the default registry is exposed at `/metrics`.
//!
//! # Example Queries
//!
//! ```promql
//! # Invocation error rate (last 5 minutes)
//! sum(rate(ferry_invocations_total{status="ERROR"}[5m]))
//! / sum(rate(ferry_invocations_total[5m]))
//!
//! # Rows loaded per minute
//! rate(ferry_rows_processed_total[1m]) * 60
//! ```

use prometheus::{
    register_counter, register_counter_vec, register_histogram_vec, Counter, CounterVec,
    HistogramVec,
};
use std::sync::LazyLock;
use std::time::Instant;

/// Total number of invocations by final status.
///
/// Labels:
/// - `status`: DONE | ERROR
pub static INVOCATIONS_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    register_counter_vec!(
        "ferry_invocations_total",
        "Total number of ingestion invocations by status",
        &["status"]
    )
    .expect("Failed to register ferry_invocations_total metric")
});

/// Duration of invocations in seconds.
///
/// Buckets: 1s to the 540s default function timeout
pub static INVOCATION_DURATION_SECONDS: LazyLock<HistogramVec> = LazyLock::new(|| {
    register_histogram_vec!(
        "ferry_invocation_duration_seconds",
        "Duration of ingestion invocations in seconds",
        &["status"],
        vec![1.0, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 540.0]
    )
    .expect("Failed to register ferry_invocation_duration_seconds metric")
});

/// Rows written to destination tables.
pub static ROWS_PROCESSED_TOTAL: LazyLock<Counter> = LazyLock::new(|| {
    register_counter!(
        "ferry_rows_processed_total",
        "Total number of rows written to destination tables"
    )
    .expect("Failed to register ferry_rows_processed_total metric")
});

/// Notifications by publish outcome.
///
/// Labels:
/// - `outcome`: published | failed
pub static NOTIFICATIONS_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    register_counter_vec!(
        "ferry_notifications_total",
        "Total number of completion notifications by publish outcome",
        &["outcome"]
    )
    .expect("Failed to register ferry_notifications_total metric")
});

/// Record a finished invocation.
pub fn record_invocation(status: &str, duration_secs: f64, rows: Option<u64>) {
    INVOCATIONS_TOTAL.with_label_values(&[status]).inc();
    INVOCATION_DURATION_SECONDS
        .with_label_values(&[status])
        .observe(duration_secs);
    if let Some(rows) = rows {
        ROWS_PROCESSED_TOTAL.inc_by(rows as f64);
    }
}

/// Record a notification publish attempt.
pub fn record_notification(published: bool) {
    let outcome = if published { "published" } else { "failed" };
    NOTIFICATIONS_TOTAL.with_label_values(&[outcome]).inc();
}

/// Timer helper for measuring durations.
pub struct Timer {
    start: Instant,
}

impl Timer {
    /// Start a new timer.
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get elapsed time in seconds.
    pub fn elapsed_secs(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }
}

/// Register all worker metrics so they appear before the first invocation.
pub fn init_metrics() {
    LazyLock::force(&INVOCATIONS_TOTAL);
    LazyLock::force(&INVOCATION_DURATION_SECONDS);
    LazyLock::force(&ROWS_PROCESSED_TOTAL);
    LazyLock::force(&NOTIFICATIONS_TOTAL);
}
