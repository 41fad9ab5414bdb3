//! Object store abstraction used to read configuration and discover files

use async_trait::async_trait;

/// Result type for object store operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("Object gs://{bucket}/{object} not found")]
    NotFound { bucket: String, object: String },

    #[error("Object store API error: {0}")]
    Api(String),

    #[error("Object store transport error: {0}")]
    Transport(String),
}

/// Read-only access to a bucketed object store
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Download the full content of an object
    async fn read_object(&self, bucket: &str, object: &str) -> StoreResult<Vec<u8>>;

    /// List object names starting with `prefix`, in lexical order
    async fn list_objects(&self, bucket: &str, prefix: &str) -> StoreResult<Vec<String>>;
}
