//! HTTP handlers for the worker API
//!
//! Implements:
//! - POST / - Load the files named in the request, synchronously
//! - GET /health - Health check endpoint
//! - GET /metrics - Prometheus metrics

use crate::processor::IngestProcessor;
use crate::types::{ErrorResponse, HealthResponse, IngestJob, IngestRequest, IngestTarget};
use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use ferry_runtime::{ExecutionContext, InvocationStatus};
use prometheus::{Encoder, TextEncoder};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Header carrying the platform's invocation id
pub const EXECUTION_ID_HEADER: &str = "function-execution-id";

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub processor: Arc<IngestProcessor>,
    /// Deadline of each invocation
    pub function_timeout: Duration,
    /// Cancelled when the server starts shutting down
    pub shutdown: CancellationToken,
}

/// Load the files named in the request body
///
/// # Response
///
/// The invocation result, with status:
/// - 201 when rows were loaded
/// - 200 when the run succeeded with nothing to load
/// - 500 when the run failed
/// - 400 when the request is malformed
pub async fn ingest_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, RequestError> {
    let request: IngestRequest = serde_json::from_slice(&body)
        .map_err(|e| RequestError::InvalidPayload(e.to_string()))?;

    let execution_id = headers
        .get(EXECUTION_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.trim().is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let job = resolve_job(request, execution_id)?;

    info!(
        execution_id = %job.execution_id,
        bucket = %job.bucket_id,
        target = ?job.target,
        additional_columns = job.additional_columns.len(),
        "Received ingestion request"
    );

    let ctx = ExecutionContext::with_shutdown(state.function_timeout, state.shutdown.clone());
    let response = state.processor.process(&job, &ctx).await;

    let status = match response.status {
        InvocationStatus::Error => StatusCode::INTERNAL_SERVER_ERROR,
        InvocationStatus::Done if response.is_empty_success() => StatusCode::OK,
        InvocationStatus::Done => StatusCode::CREATED,
    };

    Ok((status, Json(response)).into_response())
}

/// Validate the request target and attach the invocation id
fn resolve_job(request: IngestRequest, execution_id: String) -> Result<IngestJob, RequestError> {
    let target = match (request.object_id, request.folder) {
        (Some(object_id), None) => IngestTarget::Object(object_id),
        (None, Some(folder)) => IngestTarget::Folder(folder),
        (None, None) => return Err(RequestError::MissingTarget),
        (Some(_), Some(_)) => return Err(RequestError::ConflictingTarget),
    };

    Ok(IngestJob {
        bucket_id: request.bucket_id,
        target,
        additional_columns: request.additional_columns,
        execution_id,
    })
}

/// Health check endpoint
///
/// Returns 200 OK if the service is running.
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse::healthy())
}

/// Prometheus text exposition of the default registry
pub async fn metrics_handler() -> Response {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        error!(error = %e, "Failed to encode metrics");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    (
        [(header::CONTENT_TYPE, encoder.format_type().to_string())],
        buffer,
    )
        .into_response()
}

/// Rejected ingestion requests
#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    #[error("invalid request body: {0}")]
    InvalidPayload(String),

    #[error("object_id or folder is required in the request body")]
    MissingTarget,

    #[error("object_id and folder are mutually exclusive")]
    ConflictingTarget,
}

impl IntoResponse for RequestError {
    fn into_response(self) -> Response {
        warn!(error = %self, "Rejected ingestion request");
        (StatusCode::BAD_REQUEST, Json(ErrorResponse::new(self.to_string()))).into_response()
    }
}
