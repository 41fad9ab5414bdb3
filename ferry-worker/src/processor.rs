//! Invocation processing
//!
//! The processor:
//! - Resolves the objects to load (one object, or the direct children of a folder)
//! - Reads the folder's `configuration.yaml` from the configuration bucket
//! - Runs the probe-then-write orchestration against the query engine
//! - Publishes one notification per object, plus a folder aggregate
//!
//! Every failure past request validation becomes an ERROR result; nothing is
//! propagated to the HTTP layer as an error.

use crate::config::WorkerConfig;
use crate::metrics::{record_invocation, record_notification, Timer};
use crate::types::{IngestJob, IngestResponse, IngestTarget};
use ferry_core::{ConfigError, JobConfiguration};
use ferry_runtime::{
    ExecutionContext, IngestionOrchestrator, InvocationStatus, Notification, Notifier,
    ObjectStore, RunOutcome, StoreError,
};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, error, info, instrument, warn};

/// Name of the configuration document in each configuration folder
pub const CONFIGURATION_FILE: &str = "configuration.yaml";

/// Time allowed for publishing all notifications of one invocation
pub const NOTIFICATION_BUDGET: Duration = Duration::from_secs(5);

/// Errors that end an invocation before or while running the load
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("Unable to find configuration file (file URI: {0})")]
    ConfigurationNotFound(String),

    #[error("Failed to read configuration file {uri}: {source}")]
    ConfigurationUnavailable { uri: String, source: StoreError },

    #[error("Configuration file {0} is not valid UTF-8")]
    ConfigurationEncoding(String),

    #[error("Invalid configuration file {uri}: {source}")]
    InvalidConfiguration { uri: String, source: ConfigError },

    #[error("Failed to list objects under gs://{bucket}/{prefix}: {source}")]
    Discovery {
        bucket: String,
        prefix: String,
        source: StoreError,
    },

    #[error("Invocation deadline reached while {0}")]
    DeadlineExceeded(&'static str),

    #[error(transparent)]
    Run(#[from] ferry_runtime::Error),
}

/// Run `operation` unless the invocation deadline passes first
async fn before_deadline<T>(
    ctx: &ExecutionContext,
    stage: &'static str,
    operation: impl Future<Output = Result<T, ProcessError>>,
) -> Result<T, ProcessError> {
    timeout_at(ctx.deadline_at(), operation)
        .await
        .unwrap_or(Err(ProcessError::DeadlineExceeded(stage)))
}

/// Loads the files named by an ingestion request and reports the outcome
pub struct IngestProcessor {
    store: Arc<dyn ObjectStore>,
    notifier: Arc<dyn Notifier>,
    orchestrator: IngestionOrchestrator,
    config: WorkerConfig,
}

impl IngestProcessor {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        notifier: Arc<dyn Notifier>,
        orchestrator: IngestionOrchestrator,
        config: WorkerConfig,
    ) -> Self {
        Self {
            store,
            notifier,
            orchestrator,
            config,
        }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Process one ingestion request within the deadline of `ctx`
    #[instrument(
        skip(self, job, ctx),
        fields(
            execution_id = %job.execution_id,
            bucket = %job.bucket_id,
            target = ?job.target,
        )
    )]
    pub async fn process(&self, job: &IngestJob, ctx: &ExecutionContext) -> IngestResponse {
        let timer = Timer::start();

        let object_ids = match &job.target {
            IngestTarget::Object(object_id) => vec![object_id.clone()],
            IngestTarget::Folder(folder) => match before_deadline(
                ctx,
                "listing objects",
                self.discover(&job.bucket_id, folder),
            )
            .await
            {
                Ok(object_ids) => object_ids,
                Err(e) => {
                    error!(error = %e, "Object discovery failed");
                    let response =
                        IngestResponse::failed(&job.bucket_id, Vec::new(), e.to_string(), None);
                    self.notify(job, &response).await;
                    record_invocation(response.status.as_str(), timer.elapsed_secs(), None);
                    return response;
                }
            },
        };

        if object_ids.is_empty() {
            info!("No object to load");
            record_invocation(InvocationStatus::Done.as_str(), timer.elapsed_secs(), None);
            return IngestResponse::done(&job.bucket_id, object_ids, None);
        }

        let source_uris: Vec<String> = object_ids
            .iter()
            .map(|object_id| format!("gs://{}/{}", job.bucket_id, object_id))
            .collect();

        let response = match self.load(job, &source_uris, ctx).await {
            Ok(RunOutcome::Done { rows_processed }) => {
                IngestResponse::done(&job.bucket_id, object_ids, Some(rows_processed))
            }
            Ok(RunOutcome::Failed {
                failure,
                rows_counted,
            }) => IngestResponse::failed(
                &job.bucket_id,
                object_ids,
                failure.to_string(),
                rows_counted,
            ),
            Err(e) => {
                error!(error = %e, "Ingestion failed");
                IngestResponse::failed(&job.bucket_id, object_ids, e.to_string(), None)
            }
        };

        info!(
            status = %response.status,
            files = response.filenames.len(),
            lines = ?response.lines_treated,
            elapsed_ms = (timer.elapsed_secs() * 1000.0) as u64,
            "Invocation finished"
        );

        self.notify(job, &response).await;

        let rows = match response.status {
            InvocationStatus::Done => response.lines_treated,
            InvocationStatus::Error => None,
        };
        record_invocation(response.status.as_str(), timer.elapsed_secs(), rows);
        response
    }

    /// Direct children of `folder`, ignoring objects in nested folders
    async fn discover(&self, bucket: &str, folder: &str) -> Result<Vec<String>, ProcessError> {
        let prefix = format!("{}/", folder);
        let names = self
            .store
            .list_objects(bucket, &prefix)
            .await
            .map_err(|source| ProcessError::Discovery {
                bucket: bucket.to_string(),
                prefix: prefix.clone(),
                source,
            })?;

        let object_ids: Vec<String> = names
            .into_iter()
            .filter(|name| {
                name.strip_prefix(&prefix)
                    .is_some_and(|rest| !rest.contains('/'))
            })
            .collect();

        debug!(prefix = %prefix, count = object_ids.len(), "Objects discovered");
        Ok(object_ids)
    }

    async fn load(
        &self,
        job: &IngestJob,
        source_uris: &[String],
        ctx: &ExecutionContext,
    ) -> Result<RunOutcome, ProcessError> {
        let configuration = before_deadline(
            ctx,
            "reading the configuration",
            self.load_configuration(&job.target),
        )
        .await?;
        info!(
            dataset = %configuration.dataset,
            table = %configuration.table,
            "Configuration found"
        );

        let outcome = self
            .orchestrator
            .run(ctx, &configuration, source_uris, &job.additional_columns)
            .await?;
        Ok(outcome)
    }

    /// Read and validate the configuration document of `target`
    pub async fn load_configuration(
        &self,
        target: &IngestTarget,
    ) -> Result<JobConfiguration, ProcessError> {
        let object = configuration_object(target);
        let uri = format!("gs://{}/{}", self.config.configuration_bucket, object);
        debug!(uri = %uri, "Reading configuration");

        let content = match self
            .store
            .read_object(&self.config.configuration_bucket, &object)
            .await
        {
            Ok(content) => content,
            Err(StoreError::NotFound { .. }) => {
                return Err(ProcessError::ConfigurationNotFound(uri))
            }
            Err(source) => return Err(ProcessError::ConfigurationUnavailable { uri, source }),
        };

        let document =
            String::from_utf8(content).map_err(|_| ProcessError::ConfigurationEncoding(uri.clone()))?;

        JobConfiguration::from_yaml(&document)
            .map_err(|source| ProcessError::InvalidConfiguration { uri, source })
    }

    /// Publish per-object notifications, then the folder aggregate
    ///
    /// Publish failures are logged and counted only. Publishing stops at
    /// [`NOTIFICATION_BUDGET`], the remaining notifications count as failed.
    async fn notify(&self, job: &IngestJob, response: &IngestResponse) {
        let topic = self.config.topic_for(response.status.is_error());
        let per_object_lines = match job.target {
            IngestTarget::Object(_) => response.lines_treated,
            IngestTarget::Folder(_) => None,
        };

        let mut notifications: Vec<Notification> = response
            .filenames
            .iter()
            .map(|object_id| Notification {
                project: self.config.project_id.clone(),
                result: response.status,
                errors: response.errors.clone(),
                bucket_id: job.bucket_id.clone(),
                object_id: Some(object_id.clone()),
                folder: None,
                execution_id: job.execution_id.clone(),
                lines_treated: per_object_lines,
            })
            .collect();

        if let IngestTarget::Folder(folder) = &job.target {
            notifications.push(Notification {
                project: self.config.project_id.clone(),
                result: response.status,
                errors: response.errors.clone(),
                bucket_id: job.bucket_id.clone(),
                object_id: None,
                folder: Some(folder.clone()),
                execution_id: job.execution_id.clone(),
                lines_treated: response.lines_treated,
            });
        }

        let budget_end = Instant::now() + NOTIFICATION_BUDGET;
        for notification in &notifications {
            let published = timeout_at(budget_end, self.notifier.publish(topic, notification))
                .await
                .map_err(|_| "notification budget exhausted".to_string())
                .and_then(|published| published.map_err(|e| e.to_string()));

            match published {
                Ok(message_id) => {
                    record_notification(true);
                    debug!(topic = %topic, message_id = %message_id, "Notification sent");
                }
                Err(e) => {
                    record_notification(false);
                    warn!(
                        topic = %topic,
                        object_id = ?notification.object_id,
                        folder = ?notification.folder,
                        error = %e,
                        "Failed to publish notification"
                    );
                }
            }
        }
    }
}

/// Object name of the configuration document of `target`
fn configuration_object(target: &IngestTarget) -> String {
    match target.configuration_folder() {
        "" => CONFIGURATION_FILE.to_string(),
        folder => format!("{}/{}", folder, CONFIGURATION_FILE),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferry_runtime::testing::{InMemoryObjectStore, RecordingNotifier, ScriptedEngine};
    use ferry_runtime::JobRunner;
    use std::time::Duration;

    fn config() -> WorkerConfig {
        WorkerConfig {
            project_id: "acme".to_string(),
            configuration_bucket: "acme-configuration".to_string(),
            function_name: "ferry-worker".to_string(),
            function_timeout: Duration::from_secs(540),
            pub_sub_topic: "ingestion_done".to_string(),
            pub_sub_error_topic: "ingestion_failed".to_string(),
            port: 8080,
            cancel_threshold: Duration::from_secs(20),
        }
    }

    fn processor(store: InMemoryObjectStore) -> IngestProcessor {
        let runner = JobRunner::new(Arc::new(ScriptedEngine::new(Vec::new())));
        IngestProcessor::new(
            Arc::new(store),
            Arc::new(RecordingNotifier::new()),
            IngestionOrchestrator::new(runner),
            config(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_storage_call_is_bounded_by_deadline() {
        let ctx = ExecutionContext::new(Duration::from_secs(3));

        let result: Result<(), ProcessError> =
            before_deadline(&ctx, "listing objects", std::future::pending()).await;

        assert!(matches!(
            result,
            Err(ProcessError::DeadlineExceeded("listing objects"))
        ));
        assert_eq!(ctx.elapsed(), Duration::from_secs(3));
    }

    #[test]
    fn test_configuration_object() {
        assert_eq!(
            configuration_object(&IngestTarget::Object("sales/orders.csv".to_string())),
            "sales/configuration.yaml"
        );
        assert_eq!(
            configuration_object(&IngestTarget::Object("orders.csv".to_string())),
            "configuration.yaml"
        );
        assert_eq!(
            configuration_object(&IngestTarget::Folder("sales/daily".to_string())),
            "sales/daily/configuration.yaml"
        );
    }

    #[tokio::test]
    async fn test_discover_keeps_direct_children() {
        let store = InMemoryObjectStore::new()
            .with_object("landing", "sales/a.csv", "1")
            .with_object("landing", "sales/b.csv", "2")
            .with_object("landing", "sales/archive/old.csv", "3")
            .with_object("landing", "salesforce/c.csv", "4");

        let object_ids = processor(store).discover("landing", "sales").await.unwrap();
        assert_eq!(object_ids, vec!["sales/a.csv", "sales/b.csv"]);
    }

    #[tokio::test]
    async fn test_missing_configuration() {
        let err = processor(InMemoryObjectStore::new())
            .load_configuration(&IngestTarget::Object("sales/orders.csv".to_string()))
            .await
            .unwrap_err();

        assert_eq!(
            err.to_string(),
            "Unable to find configuration file (file URI: gs://acme-configuration/sales/configuration.yaml)"
        );
    }

    #[tokio::test]
    async fn test_invalid_configuration() {
        let store = InMemoryObjectStore::new().with_object(
            "acme-configuration",
            "sales/configuration.yaml",
            "dataset: sales\ntable: orders\nfile_schema: []\n",
        );

        let err = processor(store)
            .load_configuration(&IngestTarget::Folder("sales".to_string()))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ProcessError::InvalidConfiguration {
                source: ConfigError::NoFields,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_unreadable_configuration() {
        let store = InMemoryObjectStore::new();
        store.fail_with(StoreError::Transport("connection reset".to_string()));

        let err = processor(store)
            .load_configuration(&IngestTarget::Folder("sales".to_string()))
            .await
            .unwrap_err();

        assert!(matches!(err, ProcessError::ConfigurationUnavailable { .. }));
    }
}
