//! Time-bounded query job runner
//!
//! The runner submits a compiled job and polls it once per tick until it
//! finishes. When the invocation deadline gets close it asks the engine to
//! cancel the job, once, and then resolves the job through a single result
//! fetch. A job may still complete between the cancellation request and its
//! effect, so the outcome is always taken from the fetch and never inferred
//! from the cancellation acknowledgment.
//!
//! Every engine call is bounded by the invocation deadline plus
//! [`DEADLINE_GRACE`], so a run never outlives the deadline by more than that
//! grace whatever the engine does.

use crate::context::ExecutionContext;
use crate::engine::{EngineError, JobHandle, QueryEngine, ResultSet};
use crate::metrics::{JOB_CANCELLATIONS_TOTAL, JOB_DURATION_SECONDS, JOB_OUTCOMES_TOTAL};
use crate::state_machine::{JobState, JobStateMachine};
use crate::{Error, Result};
use ferry_core::CompiledJob;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, error, info, instrument, warn};

/// Default interval between two status refreshes
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Default remaining time under which cancellation is requested
pub const DEFAULT_CANCEL_THRESHOLD: Duration = Duration::from_secs(20);

/// Minimum wait bound given to the final result fetch
const MIN_FETCH_WAIT: Duration = Duration::from_secs(1);

/// Time past the invocation deadline after which engine calls are abandoned
pub const DEADLINE_GRACE: Duration = Duration::from_secs(2);

/// Classified terminal failure of a job
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JobFailure {
    #[error("Service error: {0}")]
    Service(String),

    #[error("Client timeout error: {0}")]
    ClientTimeout(String),

    #[error("Bad request error: {0}")]
    BadRequest(String),

    #[error("Connection lost error: {0}")]
    ConnectionLost(String),
}

impl JobFailure {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Service(_) => "service",
            Self::ClientTimeout(_) => "client_timeout",
            Self::BadRequest(_) => "bad_request",
            Self::ConnectionLost(_) => "connection_lost",
        }
    }
}

/// Resolved job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Success(ResultSet),
    Failure(JobFailure),
}

impl JobOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    fn label(&self) -> &'static str {
        match self {
            Self::Success(_) => "success",
            Self::Failure(failure) => failure.kind(),
        }
    }
}

/// Map a fetch result to an outcome, propagating errors outside the contract
fn classify(fetched: std::result::Result<ResultSet, EngineError>) -> Result<JobOutcome> {
    match fetched {
        Ok(result) => Ok(JobOutcome::Success(result)),
        Err(EngineError::Service(msg)) => Ok(JobOutcome::Failure(JobFailure::Service(msg))),
        Err(EngineError::ClientTimeout(msg)) => {
            Ok(JobOutcome::Failure(JobFailure::ClientTimeout(msg)))
        }
        Err(EngineError::BadRequest(msg)) => Ok(JobOutcome::Failure(JobFailure::BadRequest(msg))),
        Err(EngineError::ConnectionLost(msg)) => {
            Ok(JobOutcome::Failure(JobFailure::ConnectionLost(msg)))
        }
        Err(EngineError::Unexpected(msg)) => Err(Error::Unexpected(msg)),
    }
}

fn job_kind(job: &CompiledJob) -> &'static str {
    if job.is_write() {
        "write"
    } else {
        "probe"
    }
}

/// Runs compiled jobs against a [`QueryEngine`] under the invocation deadline
///
/// The runner holds no per-job state and can be shared between concurrent
/// invocations.
#[derive(Clone)]
pub struct JobRunner {
    engine: Arc<dyn QueryEngine>,
    poll_interval: Duration,
    cancel_threshold: Duration,
}

impl JobRunner {
    pub fn new(engine: Arc<dyn QueryEngine>) -> Self {
        Self {
            engine,
            poll_interval: DEFAULT_POLL_INTERVAL,
            cancel_threshold: DEFAULT_CANCEL_THRESHOLD,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_cancel_threshold(mut self, cancel_threshold: Duration) -> Self {
        self.cancel_threshold = cancel_threshold;
        self
    }

    pub fn cancel_threshold(&self) -> Duration {
        self.cancel_threshold
    }

    /// Submit `job` and wait for its outcome
    ///
    /// Returns `Err` when the job cannot be submitted or refreshed, or when
    /// the final fetch fails in a way the engine contract does not describe.
    #[instrument(skip(self, ctx, job), fields(job_kind = job_kind(job)))]
    pub async fn run(&self, ctx: &ExecutionContext, job: &CompiledJob) -> Result<JobOutcome> {
        let started = Instant::now();
        let kind = job_kind(job);

        let hard_deadline = ctx.deadline_at() + DEADLINE_GRACE;

        let handle = match timeout_at(hard_deadline, self.engine.submit(job)).await {
            Ok(submitted) => submitted.map_err(Error::Engine)?,
            Err(_) => {
                return Err(Error::Engine(EngineError::ClientTimeout(
                    "job submission did not complete before the invocation deadline".to_string(),
                )))
            }
        };
        info!(
            job_id = %handle.job_id,
            location = %handle.location,
            remaining_secs = ctx.remaining_time().as_secs(),
            "Query job submitted"
        );

        let mut state = JobStateMachine::new();
        state
            .transition(JobState::Polling)
            .map_err(Error::InvalidState)?;

        self.wait_for_completion(ctx, &handle, &mut state, hard_deadline)
            .await?;

        let wait = ctx.remaining_time().max(MIN_FETCH_WAIT);
        let fetch = self.engine.fetch_result(&handle, wait);
        let fetched = match timeout_at(hard_deadline, fetch).await {
            Ok(fetched) => fetched,
            Err(_) => {
                warn!(job_id = %handle.job_id, "Result fetch abandoned at the invocation deadline");
                Err(EngineError::ClientTimeout(format!(
                    "result of job {} not available before the invocation deadline",
                    handle.job_id
                )))
            }
        };
        state
            .transition(JobState::Resolved)
            .map_err(Error::InvalidState)?;

        let elapsed = started.elapsed();
        JOB_DURATION_SECONDS
            .with_label_values(&[kind])
            .observe(elapsed.as_secs_f64());

        let outcome = match classify(fetched) {
            Ok(outcome) => outcome,
            Err(e) => {
                JOB_OUTCOMES_TOTAL
                    .with_label_values(&[kind, "unexpected"])
                    .inc();
                error!(job_id = %handle.job_id, error = %e, "Unexpected error fetching job result");
                return Err(e);
            }
        };

        JOB_OUTCOMES_TOTAL
            .with_label_values(&[kind, outcome.label()])
            .inc();

        match &outcome {
            JobOutcome::Success(result) => info!(
                job_id = %handle.job_id,
                rows = result.rows.len(),
                cancel_sent = state.cancel_sent(),
                elapsed_ms = elapsed.as_millis() as u64,
                "Query job succeeded"
            ),
            JobOutcome::Failure(failure) => warn!(
                job_id = %handle.job_id,
                failure = failure.kind(),
                error = %failure,
                cancel_sent = state.cancel_sent(),
                elapsed_ms = elapsed.as_millis() as u64,
                "Query job failed"
            ),
        }

        Ok(outcome)
    }

    /// Poll until the job stops running, cancellation is acknowledged, the
    /// deadline is spent after an unacknowledged cancellation, or shutdown
    async fn wait_for_completion(
        &self,
        ctx: &ExecutionContext,
        handle: &JobHandle,
        state: &mut JobStateMachine,
        hard_deadline: Instant,
    ) -> Result<()> {
        let mut cancel_requested = false;

        loop {
            let remaining = ctx.remaining_time();

            if remaining < self.cancel_threshold && !cancel_requested {
                cancel_requested = true;
                warn!(
                    job_id = %handle.job_id,
                    remaining_secs = remaining.as_secs_f64(),
                    "Deadline approaching, requesting job cancellation"
                );
                if self.request_cancel(handle, hard_deadline).await {
                    state
                        .transition(JobState::CancelSent)
                        .map_err(Error::InvalidState)?;
                    return Ok(());
                }
            }

            let refresh = self.engine.is_running(handle);
            let running = match timeout_at(hard_deadline, refresh).await {
                Ok(running) => running.map_err(Error::Engine)?,
                Err(_) => {
                    warn!(
                        job_id = %handle.job_id,
                        "Status refresh abandoned at the invocation deadline"
                    );
                    return Ok(());
                }
            };
            if !running {
                debug!(job_id = %handle.job_id, "Query job finished");
                return Ok(());
            }

            if cancel_requested && ctx.is_expired() {
                warn!(job_id = %handle.job_id, "Deadline reached with job still running");
                return Ok(());
            }

            tokio::select! {
                biased;

                _ = ctx.shutdown_token().cancelled() => {
                    warn!(job_id = %handle.job_id, "Shutdown requested while polling job");
                    if !cancel_requested && self.request_cancel(handle, hard_deadline).await {
                        state
                            .transition(JobState::CancelSent)
                            .map_err(Error::InvalidState)?;
                    }
                    return Ok(());
                }
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }

    /// Ask the engine to cancel the job; errors count as not acknowledged
    async fn request_cancel(&self, handle: &JobHandle, hard_deadline: Instant) -> bool {
        let acknowledged = match timeout_at(hard_deadline, self.engine.cancel(handle)).await {
            Ok(Ok(acknowledged)) => acknowledged,
            Ok(Err(e)) => {
                warn!(job_id = %handle.job_id, error = %e, "Job cancellation request failed");
                false
            }
            Err(_) => {
                warn!(job_id = %handle.job_id, "Job cancellation request timed out");
                false
            }
        };

        JOB_CANCELLATIONS_TOTAL
            .with_label_values(&[if acknowledged { "true" } else { "false" }])
            .inc();
        info!(job_id = %handle.job_id, acknowledged, "Job cancellation requested");

        acknowledged
    }
}
