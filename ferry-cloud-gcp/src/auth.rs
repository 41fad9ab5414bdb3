//! GCP OAuth2 access tokens
//!
//! Supports three authentication modes:
//! - **Workload Identity** (Cloud Run / Cloud Functions): uses the metadata server
//! - **Service Account JSON**: signs a JWT assertion with a key file (local development)
//! - **Static token**: a fixed bearer token, for emulators

use crate::metrics::TOKEN_ACQUISITION_DURATION;
use crate::{Error, Result};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// OAuth2 scope granting access to BigQuery, Cloud Storage and Pub/Sub
pub const CLOUD_PLATFORM_SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";

/// GCE metadata server URL for Workload Identity
pub const METADATA_SERVER_URL: &str = "http://metadata.google.internal";

const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

/// Header required for metadata server requests
const METADATA_FLAVOR_HEADER: &str = "Metadata-Flavor";
const METADATA_FLAVOR_VALUE: &str = "Google";

/// Service account credentials from GCP
#[derive(Debug, Clone, Deserialize)]
struct ServiceAccountCredentials {
    #[serde(rename = "type")]
    account_type: String,
    private_key_id: String,
    private_key: String,
    client_email: String,
    #[serde(default = "default_token_uri")]
    token_uri: String,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

/// OAuth2 access token with expiration
#[derive(Debug, Clone)]
struct AccessToken {
    token: String,
    expires_at: Instant,
}

impl AccessToken {
    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

/// Response from OAuth2 token endpoint
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
    token_type: String,
}

/// JWT claims for OAuth2 service account assertion
#[derive(Debug, Serialize)]
struct OAuth2Claims {
    iss: String,
    scope: String,
    aud: String,
    exp: u64,
    iat: u64,
}

/// Authentication mode
#[derive(Debug, Clone)]
enum AuthMode {
    /// Service account JSON key (local development)
    ServiceAccount(ServiceAccountCredentials),
    /// GCE metadata server (Workload Identity)
    MetadataServer { metadata_url: String },
    /// Fixed token, never refreshed
    Static(String),
}

/// GCP authentication producing OAuth2 access tokens for the REST clients
///
/// Tokens are cached until five minutes before their expiry and shared by all
/// clients holding the same `GcpAuth`.
pub struct GcpAuth {
    auth_mode: AuthMode,
    http_client: reqwest::Client,
    access_token_cache: Arc<RwLock<Option<AccessToken>>>,
}

impl GcpAuth {
    fn with_mode(auth_mode: AuthMode, timeout: Duration) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Auth(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            auth_mode,
            http_client,
            access_token_cache: Arc::new(RwLock::new(None)),
        })
    }

    /// Create a new GCP auth from service account JSON
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON cannot be parsed or is not a service account key
    pub fn from_service_account_json(service_account_json: &str) -> Result<Self> {
        let credentials: ServiceAccountCredentials = serde_json::from_str(service_account_json)
            .map_err(|e| Error::Auth(format!("Failed to parse service account JSON: {}", e)))?;

        if credentials.account_type != "service_account" {
            return Err(Error::Auth(format!(
                "Invalid account type: expected 'service_account', got '{}'",
                credentials.account_type
            )));
        }

        info!(
            service_account = %credentials.client_email,
            "Initialized GCP auth from service account key"
        );
        Self::with_mode(
            AuthMode::ServiceAccount(credentials),
            Duration::from_secs(30),
        )
    }

    /// Create a new GCP auth using the GCE metadata server (Workload Identity)
    pub fn from_metadata_server() -> Result<Self> {
        Self::from_metadata_server_at(METADATA_SERVER_URL)
    }

    /// Create a new GCP auth using a metadata server at `metadata_url`
    pub fn from_metadata_server_at(metadata_url: &str) -> Result<Self> {
        Self::with_mode(
            AuthMode::MetadataServer {
                metadata_url: metadata_url.trim_end_matches('/').to_string(),
            },
            Duration::from_secs(5),
        )
    }

    /// Create a GCP auth that always returns `token`
    pub fn from_static_token(token: impl Into<String>) -> Result<Self> {
        Self::with_mode(AuthMode::Static(token.into()), Duration::from_secs(5))
    }

    /// Auto-detect authentication method
    ///
    /// Tries the following in order:
    /// 1. Service account JSON from `GOOGLE_APPLICATION_CREDENTIALS` file
    /// 2. GCE metadata server (Workload Identity)
    pub fn auto() -> Result<Self> {
        if let Ok(path) = std::env::var("GOOGLE_APPLICATION_CREDENTIALS") {
            debug!(path = %path, "Attempting GCP auth via GOOGLE_APPLICATION_CREDENTIALS file");
            match std::fs::read_to_string(&path) {
                Ok(json) => match Self::from_service_account_json(&json) {
                    Ok(auth) => return Ok(auth),
                    Err(e) => {
                        warn!(error = %e, path = %path, "Failed to parse service account file");
                    }
                },
                Err(e) => {
                    warn!(error = %e, path = %path, "Failed to read GOOGLE_APPLICATION_CREDENTIALS file");
                }
            }
        }

        info!("Using GCP Workload Identity (metadata server)");
        Self::from_metadata_server()
    }

    /// Get an OAuth2 access token for calling GCP APIs
    ///
    /// Uses the cached token if available and not expired.
    pub async fn get_access_token(&self, scope: &str) -> Result<String> {
        if let AuthMode::Static(token) = &self.auth_mode {
            return Ok(token.clone());
        }

        {
            let cache = self.access_token_cache.read().await;
            if let Some(token) = cache.as_ref() {
                if !token.is_expired() {
                    let _timer = TOKEN_ACQUISITION_DURATION
                        .with_label_values(&["true"])
                        .start_timer();
                    debug!("Using cached OAuth2 access token");
                    return Ok(token.token.clone());
                }
            }
        }

        let _timer = TOKEN_ACQUISITION_DURATION
            .with_label_values(&["false"])
            .start_timer();

        debug!(scope = %scope, "Fetching new OAuth2 access token");
        let token = match &self.auth_mode {
            AuthMode::ServiceAccount(credentials) => {
                self.fetch_access_token_via_jwt(credentials, scope).await?
            }
            AuthMode::MetadataServer { metadata_url } => {
                self.fetch_access_token_from_metadata(metadata_url).await?
            }
            AuthMode::Static(token) => return Ok(token.clone()),
        };

        {
            let mut cache = self.access_token_cache.write().await;
            *cache = Some(token.clone());
        }

        Ok(token.token)
    }

    /// Fetch access token from metadata server (Workload Identity)
    async fn fetch_access_token_from_metadata(&self, metadata_url: &str) -> Result<AccessToken> {
        // The metadata server ignores scopes and returns every scope granted
        // to the service account
        let url = format!(
            "{}/computeMetadata/v1/instance/service-accounts/default/token",
            metadata_url
        );

        let response = self
            .http_client
            .get(&url)
            .header(METADATA_FLAVOR_HEADER, METADATA_FLAVOR_VALUE)
            .send()
            .await
            .map_err(|e| Error::Auth(format!("Failed to fetch access token from metadata: {}", e)))?;

        if !response.status().is_success() {
            return Err(Error::Auth(format!(
                "Metadata server returned status {} for access token",
                response.status()
            )));
        }

        let token_response: TokenResponse = response.json().await.map_err(|e| {
            Error::Auth(format!(
                "Failed to parse token response from metadata: {}",
                e
            ))
        })?;

        Ok(Self::into_access_token(token_response, "metadata server"))
    }

    /// Fetch a new OAuth2 access token via JWT assertion (service account mode)
    async fn fetch_access_token_via_jwt(
        &self,
        credentials: &ServiceAccountCredentials,
        scope: &str,
    ) -> Result<AccessToken> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| Error::Internal(format!("System time error: {}", e)))?
            .as_secs();

        let claims = OAuth2Claims {
            iss: credentials.client_email.clone(),
            scope: scope.to_string(),
            aud: credentials.token_uri.clone(),
            iat: now,
            exp: now + 3600,
        };

        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(credentials.private_key_id.clone());

        let encoding_key = EncodingKey::from_rsa_pem(credentials.private_key.as_bytes())
            .map_err(|e| Error::Auth(format!("Failed to parse private key: {}", e)))?;

        let assertion = encode(&header, &claims, &encoding_key)
            .map_err(|e| Error::Auth(format!("Failed to encode JWT assertion: {}", e)))?;

        let body = format!(
            "grant_type={}&assertion={}",
            urlencoding::encode("urn:ietf:params:oauth:grant-type:jwt-bearer"),
            urlencoding::encode(&assertion)
        );

        let response = self
            .http_client
            .post(&credentials.token_uri)
            .header("Content-Type", "application/x-www-form-urlencoded")
            .body(body)
            .send()
            .await
            .map_err(|e| Error::Auth(format!("Failed to request access token: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Auth(format!(
                "Token endpoint returned {}: {}",
                status, body
            )));
        }

        let token_response: TokenResponse = response
            .json()
            .await
            .map_err(|e| Error::Auth(format!("Failed to parse token response: {}", e)))?;

        Ok(Self::into_access_token(token_response, "JWT assertion"))
    }

    fn into_access_token(token_response: TokenResponse, source: &str) -> AccessToken {
        // Refresh five minutes before the token actually expires
        let expires_in = token_response.expires_in.saturating_sub(300);
        let expires_at = Instant::now() + Duration::from_secs(expires_in);

        debug!(
            token_type = %token_response.token_type,
            expires_in_seconds = expires_in,
            source = source,
            "OAuth2 access token acquired"
        );

        AccessToken {
            token: token_response.access_token,
            expires_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const TOKEN_PATH: &str = "/computeMetadata/v1/instance/service-accounts/default/token";

    fn token_body(token: &str, expires_in: u64) -> serde_json::Value {
        serde_json::json!({
            "access_token": token,
            "expires_in": expires_in,
            "token_type": "Bearer"
        })
    }

    #[tokio::test]
    async fn test_static_token() {
        let auth = GcpAuth::from_static_token("emulator-token").unwrap();
        let token = auth.get_access_token(CLOUD_PLATFORM_SCOPE).await.unwrap();
        assert_eq!(token, "emulator-token");
    }

    #[tokio::test]
    async fn test_metadata_token_is_cached() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(TOKEN_PATH))
            .and(header("Metadata-Flavor", "Google"))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body("ya29.token", 3600)))
            .expect(1)
            .mount(&server)
            .await;

        let auth = GcpAuth::from_metadata_server_at(&server.uri()).unwrap();
        let first = auth.get_access_token(CLOUD_PLATFORM_SCOPE).await.unwrap();
        let second = auth.get_access_token(CLOUD_PLATFORM_SCOPE).await.unwrap();

        assert_eq!(first, "ya29.token");
        assert_eq!(second, "ya29.token");
    }

    #[tokio::test]
    async fn test_short_lived_token_is_refetched() {
        let server = MockServer::start().await;
        // Tokens living under five minutes expire from the cache immediately
        Mock::given(method("GET"))
            .and(path(TOKEN_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body("short", 60)))
            .expect(2)
            .mount(&server)
            .await;

        let auth = GcpAuth::from_metadata_server_at(&server.uri()).unwrap();
        auth.get_access_token(CLOUD_PLATFORM_SCOPE).await.unwrap();
        auth.get_access_token(CLOUD_PLATFORM_SCOPE).await.unwrap();
    }

    #[tokio::test]
    async fn test_metadata_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(TOKEN_PATH))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let auth = GcpAuth::from_metadata_server_at(&server.uri()).unwrap();
        let err = auth.get_access_token(CLOUD_PLATFORM_SCOPE).await.unwrap_err();
        assert!(matches!(err, Error::Auth(msg) if msg.contains("403")));
    }

    #[test]
    fn test_rejects_non_service_account_json() {
        let json = r#"{
            "type": "authorized_user",
            "private_key_id": "k",
            "private_key": "p",
            "client_email": "someone@example.com"
        }"#;
        assert!(matches!(
            GcpAuth::from_service_account_json(json),
            Err(Error::Auth(_))
        ));
    }

    #[test]
    fn test_rejects_malformed_json() {
        assert!(GcpAuth::from_service_account_json("not json").is_err());
    }
}
