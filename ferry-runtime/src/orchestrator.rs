//! Probe-then-write orchestration of one ingestion run
//!
//! Every run first counts the rows exposed by the incoming files. An empty
//! input completes the run without touching the destination table, so that a
//! truncating load never replaces existing data with nothing.

use crate::context::ExecutionContext;
use crate::engine::ResultSet;
use crate::runner::{JobFailure, JobOutcome, JobRunner};
use crate::{Error, Result};
use ferry_core::{
    compile_load_job, compile_probe_job, AdditionalColumnValue, JobConfiguration,
    ROW_COUNT_COLUMN,
};
use tracing::{info, instrument, warn};

/// Result of one ingestion run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Rows were written, or there was nothing to write
    Done { rows_processed: u64 },

    /// The probe or the write job failed
    Failed {
        failure: JobFailure,
        /// Row count from the probe when the write phase was reached
        rows_counted: Option<u64>,
    },
}

impl RunOutcome {
    pub fn rows_processed(&self) -> Option<u64> {
        match self {
            Self::Done { rows_processed } => Some(*rows_processed),
            Self::Failed { .. } => None,
        }
    }
}

/// Read the row count returned by the probe query
fn parse_row_count(result: &ResultSet) -> Result<u64> {
    if result.is_empty() {
        return Ok(0);
    }

    let value = result.value(0, ROW_COUNT_COLUMN).ok_or_else(|| {
        Error::InvalidProbeResult(format!("column {} missing or null", ROW_COUNT_COLUMN))
    })?;

    value
        .trim()
        .parse::<u64>()
        .map_err(|e| Error::InvalidProbeResult(format!("{}: {:?}", e, value)))
}

/// Sequences the row count probe and the write job of an ingestion run
#[derive(Clone)]
pub struct IngestionOrchestrator {
    runner: JobRunner,
}

impl IngestionOrchestrator {
    pub fn new(runner: JobRunner) -> Self {
        Self { runner }
    }

    pub fn runner(&self) -> &JobRunner {
        &self.runner
    }

    /// Load `source_uris` into the configured destination table
    #[instrument(
        skip(self, ctx, configuration, source_uris, request_values),
        fields(
            dataset = %configuration.dataset,
            table = %configuration.table,
            files = source_uris.len()
        )
    )]
    pub async fn run(
        &self,
        ctx: &ExecutionContext,
        configuration: &JobConfiguration,
        source_uris: &[String],
        request_values: &[AdditionalColumnValue],
    ) -> Result<RunOutcome> {
        let probe = compile_probe_job(configuration, source_uris);
        let count = match self.runner.run(ctx, &probe).await? {
            JobOutcome::Success(result) => parse_row_count(&result)?,
            JobOutcome::Failure(failure) => {
                warn!(error = %failure, "Row count probe failed");
                return Ok(RunOutcome::Failed {
                    failure,
                    rows_counted: None,
                });
            }
        };

        if count == 0 {
            info!("No rows in source files, skipping write");
            return Ok(RunOutcome::Done { rows_processed: 0 });
        }

        if ctx.is_expired() {
            warn!(rows = count, "Invocation deadline reached before the write job");
            return Ok(RunOutcome::Failed {
                failure: JobFailure::ClientTimeout(
                    "invocation deadline reached before the write job was submitted".to_string(),
                ),
                rows_counted: Some(count),
            });
        }

        info!(rows = count, mode = %configuration.mode, "Writing rows to destination table");
        let load = compile_load_job(configuration, source_uris, request_values)?;

        match self.runner.run(ctx, &load).await? {
            JobOutcome::Success(_) => Ok(RunOutcome::Done {
                rows_processed: count,
            }),
            JobOutcome::Failure(failure) => Ok(RunOutcome::Failed {
                failure,
                rows_counted: Some(count),
            }),
        }
    }
}
