//! Worker configuration module
//!
//! Loads the invocation environment: project, configuration bucket, topics
//! and the function timeout that bounds every ingestion run.

use anyhow::{anyhow, Context, Result};
use std::env;
use std::time::Duration;

/// Topic used for both completion and error notifications unless overridden
pub const DEFAULT_TOPIC: &str = "gcs_to_bq_integration_done";

const DEFAULT_FUNCTION_NAME: &str = "ferry-worker";
const DEFAULT_FUNCTION_TIMEOUT_SECS: u64 = 540;
const DEFAULT_CANCEL_THRESHOLD_SECS: u64 = 20;
const DEFAULT_PORT: u16 = 8080;

/// Worker configuration
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Project that owns the query jobs and the notification topics
    pub project_id: String,
    /// Bucket holding one `configuration.yaml` per landing folder
    pub configuration_bucket: String,
    pub function_name: String,
    /// Wall-clock budget of one invocation
    pub function_timeout: Duration,
    pub pub_sub_topic: String,
    pub pub_sub_error_topic: String,
    pub port: u16,
    /// Remaining time below which a running job is cancelled
    pub cancel_threshold: Duration,
}

impl WorkerConfig {
    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - `GCP_PROJECT`: project id (required)
    /// - `CONFIGURATION_BUCKET`: configuration bucket (required)
    /// - `FUNCTION_NAME`: service name (default: ferry-worker)
    /// - `FUNCTION_TIMEOUT_SEC`: invocation budget in seconds (default: 540)
    /// - `PUB_SUB_TOPIC` / `PUB_SUB_ERROR_TOPIC`: notification topics
    /// - `PORT`: HTTP port (default: 8080)
    /// - `FERRY_CANCEL_THRESHOLD_SEC`: cancellation threshold (default: 20)
    pub fn from_env() -> Result<Self> {
        let project_id = env::var("GCP_PROJECT").context("GCP_PROJECT environment variable not set")?;
        let configuration_bucket = env::var("CONFIGURATION_BUCKET")
            .context("CONFIGURATION_BUCKET environment variable not set")?;

        let function_timeout = env::var("FUNCTION_TIMEOUT_SEC")
            .ok()
            .map(|v| parse_seconds(&v))
            .transpose()
            .context("FUNCTION_TIMEOUT_SEC must be a number of seconds")?
            .unwrap_or(Duration::from_secs(DEFAULT_FUNCTION_TIMEOUT_SECS));

        let cancel_threshold = env::var("FERRY_CANCEL_THRESHOLD_SEC")
            .ok()
            .map(|v| parse_seconds(&v))
            .transpose()
            .context("FERRY_CANCEL_THRESHOLD_SEC must be a number of seconds")?
            .unwrap_or(Duration::from_secs(DEFAULT_CANCEL_THRESHOLD_SECS));

        let port = env::var("PORT")
            .unwrap_or_else(|_| DEFAULT_PORT.to_string())
            .parse::<u16>()
            .context("PORT must be a valid port number")?;

        let config = Self {
            project_id,
            configuration_bucket,
            function_name: env::var("FUNCTION_NAME")
                .unwrap_or_else(|_| DEFAULT_FUNCTION_NAME.to_string()),
            function_timeout,
            pub_sub_topic: env::var("PUB_SUB_TOPIC").unwrap_or_else(|_| DEFAULT_TOPIC.to_string()),
            pub_sub_error_topic: env::var("PUB_SUB_ERROR_TOPIC")
                .unwrap_or_else(|_| DEFAULT_TOPIC.to_string()),
            port,
            cancel_threshold,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.project_id.trim().is_empty() {
            return Err(anyhow!("GCP_PROJECT cannot be empty"));
        }
        if self.configuration_bucket.trim().is_empty() {
            return Err(anyhow!("CONFIGURATION_BUCKET cannot be empty"));
        }
        if self.pub_sub_topic.trim().is_empty() || self.pub_sub_error_topic.trim().is_empty() {
            return Err(anyhow!("Notification topics cannot be empty"));
        }
        if self.function_timeout.is_zero() {
            return Err(anyhow!("FUNCTION_TIMEOUT_SEC must be positive"));
        }
        if self.cancel_threshold >= self.function_timeout {
            return Err(anyhow!(
                "Cancel threshold ({}s) must be shorter than the function timeout ({}s)",
                self.cancel_threshold.as_secs_f64(),
                self.function_timeout.as_secs_f64()
            ));
        }
        Ok(())
    }

    /// Topic receiving a notification with the given status
    pub fn topic_for(&self, is_error: bool) -> &str {
        if is_error {
            &self.pub_sub_error_topic
        } else {
            &self.pub_sub_topic
        }
    }
}

/// Seconds may be fractional, as in `FUNCTION_TIMEOUT_SEC=540.5`
fn parse_seconds(value: &str) -> Result<Duration> {
    let seconds: f64 = value
        .trim()
        .parse()
        .with_context(|| format!("invalid number of seconds: {:?}", value))?;
    Duration::try_from_secs_f64(seconds).map_err(|e| anyhow!("invalid duration {:?}: {}", value, e))
}
