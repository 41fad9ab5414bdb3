//! Query engine abstraction
//!
//! The runner talks to the warehouse only through [`QueryEngine`], which keeps
//! it independent from a specific provider and lets tests script job
//! behaviour.

use async_trait::async_trait;
use ferry_core::CompiledJob;
use std::time::Duration;

/// Result type for query engine operations
pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Errors reported by a query engine
///
/// The first four variants are the failure modes a job is expected to end
/// with. `Unexpected` covers anything outside that contract.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    #[error("Query job failed: {0}")]
    Service(String),

    #[error("Timed out waiting for query job: {0}")]
    ClientTimeout(String),

    #[error("Invalid query request: {0}")]
    BadRequest(String),

    #[error("Connection to query engine lost: {0}")]
    ConnectionLost(String),

    #[error("Unexpected query engine error: {0}")]
    Unexpected(String),
}

/// Reference to a submitted job
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobHandle {
    pub job_id: String,
    pub location: String,
}

impl JobHandle {
    pub fn new(job_id: impl Into<String>, location: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            location: location.into(),
        }
    }
}

/// Rows returned by a finished query
///
/// Values are kept in their wire representation; callers parse what they need.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
}

impl ResultSet {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Option<String>>>) -> Self {
        Self { columns, rows }
    }

    /// Single-row, single-column result
    pub fn scalar(column: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            columns: vec![column.into()],
            rows: vec![vec![Some(value.into())]],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Value of `column` in row `row`, `None` when absent or NULL
    pub fn value(&self, row: usize, column: &str) -> Option<&str> {
        let index = self.columns.iter().position(|c| c == column)?;
        self.rows.get(row)?.get(index)?.as_deref()
    }
}

/// Remote query execution engine
///
/// Implementations must be safe to share across concurrent invocations; each
/// call is an independent request.
#[async_trait]
pub trait QueryEngine: Send + Sync {
    /// Submit a compiled job and return its handle
    async fn submit(&self, job: &CompiledJob) -> EngineResult<JobHandle>;

    /// Refresh the job status, `false` once the job has finished
    async fn is_running(&self, handle: &JobHandle) -> EngineResult<bool>;

    /// Request cancellation, `true` when the request was accepted
    async fn cancel(&self, handle: &JobHandle) -> EngineResult<bool>;

    /// Fetch the final result, waiting at most `wait` for completion
    async fn fetch_result(&self, handle: &JobHandle, wait: Duration) -> EngineResult<ResultSet>;
}
