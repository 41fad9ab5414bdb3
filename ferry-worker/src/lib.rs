//! Ferry worker library
//!
//! HTTP front of Ferry: receives an ingestion request naming a Cloud Storage
//! object or folder, loads it into BigQuery within the function timeout and
//! answers with the invocation result.

pub mod config;
pub mod handler;
pub mod metrics;
pub mod processor;
pub mod tracing_config;
pub mod types;

use axum::{
    routing::{get, post},
    Router,
};
use handler::{health_handler, ingest_handler, metrics_handler, AppState};
use std::time::Duration;
use tower_http::{limit::RequestBodyLimitLayer, timeout::TimeoutLayer, trace::TraceLayer};

/// Margin between the invocation deadline and the HTTP request timeout
///
/// Covers [`ferry_runtime::DEADLINE_GRACE`] and
/// [`processor::NOTIFICATION_BUDGET`], so an invocation always answers with
/// its own result before the request times out.
pub const REQUEST_TIMEOUT_MARGIN: Duration = Duration::from_secs(10);

const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Build the worker router
pub fn router(state: AppState) -> Router {
    let request_timeout = state.function_timeout + REQUEST_TIMEOUT_MARGIN;

    Router::new()
        .route("/", post(ingest_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(request_timeout))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .with_state(state)
}
