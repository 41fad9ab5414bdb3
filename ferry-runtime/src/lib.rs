//! # Ferry Runtime
//!
//! Execution runtime for Ferry ingestion runs: per-invocation deadlines, the
//! time-bounded query job runner with cooperative cancellation, and the
//! probe-then-write orchestrator. Remote services are reached through the
//! [`QueryEngine`], [`ObjectStore`] and [`Notifier`] traits.

pub mod context;
pub mod engine;
pub mod metrics;
pub mod notifier;
pub mod object_store;
pub mod orchestrator;
pub mod runner;
pub mod state_machine;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

// Re-export commonly used types
pub use context::ExecutionContext;
pub use engine::{EngineError, EngineResult, JobHandle, QueryEngine, ResultSet};
pub use notifier::{InvocationStatus, Notification, NotifyError, Notifier};
pub use object_store::{ObjectStore, StoreError, StoreResult};
pub use orchestrator::{IngestionOrchestrator, RunOutcome};
pub use runner::{JobFailure, JobOutcome, JobRunner, DEADLINE_GRACE};
pub use state_machine::{JobState, JobStateMachine};

/// Result type for runtime operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for runtime operations
///
/// Classified job failures are not errors: they are reported through
/// [`JobOutcome`] and [`RunOutcome`].
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum Error {
    #[error("Compilation error: {0}")]
    Compile(#[from] ferry_core::CompileError),

    #[error("Query engine error: {0}")]
    Engine(EngineError),

    #[error("Unexpected error: {0}")]
    Unexpected(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Invalid row count result: {0}")]
    InvalidProbeResult(String),
}
