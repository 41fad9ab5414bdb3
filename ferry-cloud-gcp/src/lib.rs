//! # Ferry Cloud GCP
//!
//! Google Cloud Platform adapters for Ferry: the BigQuery query engine, the
//! Cloud Storage object store and the Pub/Sub notifier, all speaking the
//! public REST APIs with OAuth2 access tokens.

pub mod auth;
pub mod bigquery;
pub mod config;
pub mod metrics;
pub mod pubsub;
mod rest;
pub mod storage;

// Re-export commonly used types
pub use auth::GcpAuth;
pub use bigquery::BigQueryClient;
pub use config::GcpEndpoints;
pub use pubsub::PubSubNotifier;
pub use storage::GcsObjectStore;

/// Result type for GCP operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for GCP operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("GCP API error: {0}")]
    Api(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}
