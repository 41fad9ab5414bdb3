//! Prometheus metrics for Google API calls
//!
//! - Histograms for latency measurements with defined buckets
//! - Counters for request outcomes

use lazy_static::lazy_static;
use prometheus::{register_histogram_vec, register_int_counter_vec, HistogramVec, IntCounterVec};

lazy_static! {
    /// Duration of Google API requests in seconds
    ///
    /// Labels:
    /// - service: "bigquery", "storage", "pubsub"
    /// - operation: e.g. "jobs.insert", "objects.list", "topics.publish"
    ///
    /// Buckets: 0.01s to 60s
    pub static ref GCP_API_DURATION: HistogramVec = register_histogram_vec!(
        "ferry_gcp_api_duration_seconds",
        "Duration of Google API requests",
        &["service", "operation"],
        vec![0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]
    )
    .expect("ferry_gcp_api_duration_seconds metric registration");

    /// Total number of Google API requests
    ///
    /// Labels:
    /// - service: "bigquery", "storage", "pubsub"
    /// - operation: e.g. "jobs.insert", "objects.list", "topics.publish"
    /// - status: "success", "failure"
    pub static ref GCP_API_REQUESTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "ferry_gcp_api_requests_total",
        "Total number of Google API requests",
        &["service", "operation", "status"]
    )
    .expect("ferry_gcp_api_requests_total metric registration");

    /// Duration of OAuth2 token acquisition
    ///
    /// Labels:
    /// - cached: "true" (cache hit), "false" (fetched)
    pub static ref TOKEN_ACQUISITION_DURATION: HistogramVec = register_histogram_vec!(
        "ferry_gcp_token_acquisition_duration_seconds",
        "Duration of OAuth2 access token acquisition",
        &["cached"],
        vec![0.0001, 0.001, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]
    )
    .expect("ferry_gcp_token_acquisition_duration_seconds metric registration");
}

/// Record the outcome of one API call
pub(crate) fn record_request(service: &str, operation: &str, success: bool) {
    GCP_API_REQUESTS_TOTAL
        .with_label_values(&[service, operation, if success { "success" } else { "failure" }])
        .inc();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_registration() {
        let _ = GCP_API_DURATION.with_label_values(&["bigquery", "jobs.insert"]);
        let _ = GCP_API_REQUESTS_TOTAL.with_label_values(&["storage", "objects.get", "success"]);
        let _ = TOKEN_ACQUISITION_DURATION.with_label_values(&["true"]);
    }

    #[test]
    fn test_record_request() {
        let before = GCP_API_REQUESTS_TOTAL
            .with_label_values(&["pubsub", "test.op", "failure"])
            .get();
        record_request("pubsub", "test.op", false);
        let after = GCP_API_REQUESTS_TOTAL
            .with_label_values(&["pubsub", "test.op", "failure"])
            .get();
        assert_eq!(after, before + 1);
    }
}
