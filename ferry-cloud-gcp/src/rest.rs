//! Shared plumbing for the Google REST clients

use crate::{Error, Result};
use serde::Deserialize;
use std::time::Duration;

/// Default timeout of a single REST call
pub(crate) const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub(crate) fn http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .map_err(|e| Error::Internal(format!("Failed to create HTTP client: {}", e)))
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ApiError,
}

/// Error payload returned by Google APIs
#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct ApiError {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub errors: Vec<ApiErrorDetail>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct ApiErrorDetail {
    #[serde(default)]
    pub reason: String,
}

impl ApiError {
    /// Parse an error body, keeping the raw text when it is not the usual envelope
    pub fn parse(body: &str) -> Self {
        serde_json::from_str::<ErrorEnvelope>(body)
            .map(|envelope| envelope.error)
            .unwrap_or_else(|_| Self {
                message: body.to_string(),
                errors: Vec::new(),
            })
    }

    pub fn has_reason(&self, reasons: &[&str]) -> bool {
        self.errors
            .iter()
            .any(|detail| reasons.contains(&detail.reason.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_google_error_envelope() {
        let body = r#"{
            "error": {
                "code": 400,
                "message": "Syntax error: Unexpected keyword FROM",
                "errors": [{"reason": "invalidQuery", "message": "Syntax error"}],
                "status": "INVALID_ARGUMENT"
            }
        }"#;

        let error = ApiError::parse(body);
        assert_eq!(error.message, "Syntax error: Unexpected keyword FROM");
        assert!(error.has_reason(&["invalid", "invalidQuery"]));
        assert!(!error.has_reason(&["backendError"]));
    }

    #[test]
    fn test_parse_plain_body() {
        let error = ApiError::parse("upstream connect error");
        assert_eq!(error.message, "upstream connect error");
        assert!(error.errors.is_empty());
    }
}
