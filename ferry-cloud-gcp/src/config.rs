//! GCP endpoint configuration loading and validation.

use crate::{Error, Result};

pub const DEFAULT_BIGQUERY_URL: &str = "https://bigquery.googleapis.com/bigquery/v2";
pub const DEFAULT_STORAGE_URL: &str = "https://storage.googleapis.com";
pub const DEFAULT_PUBSUB_URL: &str = "https://pubsub.googleapis.com/v1";

/// Base URLs of the Google APIs, overridable for emulators and tests.
#[derive(Debug, Clone)]
pub struct GcpEndpoints {
    pub bigquery_url: String,
    pub storage_url: String,
    pub pubsub_url: String,
    /// Fixed bearer token used instead of workload identity (emulators)
    pub access_token: Option<String>,
}

impl Default for GcpEndpoints {
    fn default() -> Self {
        Self {
            bigquery_url: DEFAULT_BIGQUERY_URL.to_string(),
            storage_url: DEFAULT_STORAGE_URL.to_string(),
            pubsub_url: DEFAULT_PUBSUB_URL.to_string(),
            access_token: None,
        }
    }
}

impl GcpEndpoints {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        let endpoints = Self {
            bigquery_url: std::env::var("FERRY_BIGQUERY_URL").unwrap_or(defaults.bigquery_url),
            storage_url: std::env::var("FERRY_STORAGE_URL").unwrap_or(defaults.storage_url),
            pubsub_url: std::env::var("FERRY_PUBSUB_URL").unwrap_or(defaults.pubsub_url),
            access_token: std::env::var("FERRY_ACCESS_TOKEN")
                .ok()
                .filter(|token| !token.trim().is_empty()),
        };
        endpoints.validate()?;
        Ok(endpoints)
    }

    pub fn validate(&self) -> Result<()> {
        for (name, url) in [
            ("bigquery_url", &self.bigquery_url),
            ("storage_url", &self.storage_url),
            ("pubsub_url", &self.pubsub_url),
        ] {
            if !url.starts_with("https://") && !url.starts_with("http://") {
                return Err(Error::Config(format!("{} must be a valid HTTP(S) URL", name)));
            }
        }
        Ok(())
    }
}
