//! Type definitions for the worker HTTP API
//!
//! Wire contracts of the ingestion endpoint: the request naming the files to
//! load and the invocation result returned to the caller.

use ferry_core::AdditionalColumnValue;
use ferry_runtime::InvocationStatus;
use serde::{Deserialize, Serialize};

/// Ingestion request body
///
/// Exactly one of `object_id` and `folder` must be present.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestRequest {
    /// Bucket holding the incoming files
    pub bucket_id: String,

    /// Single object to load
    #[serde(default)]
    pub object_id: Option<String>,

    /// Folder whose direct children are loaded together
    #[serde(default)]
    pub folder: Option<String>,

    /// Values for additional columns marked `in_request`
    #[serde(default)]
    pub additional_columns: Vec<AdditionalColumnValue>,
}

/// What an invocation loads
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestTarget {
    Object(String),
    Folder(String),
}

impl IngestTarget {
    /// Folder whose `configuration.yaml` describes the target
    ///
    /// For an object this is its directory part, empty at the bucket root.
    pub fn configuration_folder(&self) -> &str {
        match self {
            Self::Object(object_id) => object_id
                .rsplit_once('/')
                .map(|(directory, _)| directory)
                .unwrap_or(""),
            Self::Folder(folder) => folder,
        }
    }
}

/// A validated ingestion request
#[derive(Debug, Clone)]
pub struct IngestJob {
    pub bucket_id: String,
    pub target: IngestTarget,
    pub additional_columns: Vec<AdditionalColumnValue>,
    /// Invocation id, propagated to notifications
    pub execution_id: String,
}

/// Outcome of one invocation, also the HTTP response body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestResponse {
    /// Objects taken into account by the run
    pub filenames: Vec<String>,
    pub bucket: String,
    pub errors: Option<String>,
    pub status: InvocationStatus,
    pub lines_treated: Option<u64>,
}

impl IngestResponse {
    pub fn done(bucket: impl Into<String>, filenames: Vec<String>, lines: Option<u64>) -> Self {
        Self {
            filenames,
            bucket: bucket.into(),
            errors: None,
            status: InvocationStatus::Done,
            lines_treated: lines,
        }
    }

    pub fn failed(
        bucket: impl Into<String>,
        filenames: Vec<String>,
        errors: impl Into<String>,
        lines: Option<u64>,
    ) -> Self {
        Self {
            filenames,
            bucket: bucket.into(),
            errors: Some(errors.into()),
            status: InvocationStatus::Error,
            lines_treated: lines,
        }
    }

    /// Successful runs that loaded nothing: no object found, or no rows
    pub fn is_empty_success(&self) -> bool {
        self.status == InvocationStatus::Done
            && (self.filenames.is_empty() || self.lines_treated.unwrap_or(0) == 0)
    }
}

/// Body of a rejected request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub errors: String,
    pub status: InvocationStatus,
}

impl ErrorResponse {
    pub fn new(errors: impl Into<String>) -> Self {
        Self {
            errors: errors.into(),
            status: InvocationStatus::Error,
        }
    }
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Service status
    pub status: String,

    /// Optional version information
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl HealthResponse {
    /// Create a healthy response
    pub fn healthy() -> Self {
        Self {
            status: "healthy".to_string(),
            version: Some(env!("CARGO_PKG_VERSION").to_string()),
        }
    }
}
