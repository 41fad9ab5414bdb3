//! Completion notifications

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Final status of an invocation or of one processed object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum InvocationStatus {
    Done,
    Error,
}

impl InvocationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Done => "DONE",
            Self::Error => "ERROR",
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error)
    }
}

impl fmt::Display for InvocationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Message published when an object or a folder has been processed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub project: String,
    pub result: InvocationStatus,
    pub errors: Option<String>,
    pub bucket_id: String,
    pub object_id: Option<String>,
    pub folder: Option<String>,
    pub execution_id: String,
    pub lines_treated: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NotifyError {
    #[error("Failed to encode notification: {0}")]
    Encode(String),

    #[error("Failed to publish notification: {0}")]
    Publish(String),
}

/// Publishes notifications to a named topic
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Publish one message, returning the broker's message id
    async fn publish(&self, topic: &str, notification: &Notification)
        -> Result<String, NotifyError>;
}
