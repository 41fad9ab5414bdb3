//! Cloud Storage object store over the JSON API

use crate::auth::{GcpAuth, CLOUD_PLATFORM_SCOPE};
use crate::metrics::{record_request, GCP_API_DURATION};
use crate::rest::{http_client, ApiError};
use crate::Result;
use async_trait::async_trait;
use ferry_runtime::{ObjectStore, StoreError, StoreResult};
use reqwest::{Response, StatusCode};
use serde::Deserialize;
use std::sync::Arc;
use tracing::debug;

const SERVICE: &str = "storage";

#[derive(Debug, Deserialize)]
struct ObjectResource {
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ObjectsPage {
    #[serde(default)]
    items: Vec<ObjectResource>,
    next_page_token: Option<String>,
}

/// Cloud Storage implementation of [`ObjectStore`]
pub struct GcsObjectStore {
    base_url: String,
    auth: Arc<GcpAuth>,
    http_client: reqwest::Client,
}

impl GcsObjectStore {
    /// `base_url` is the API host, e.g. `https://storage.googleapis.com`
    pub fn new(base_url: &str, auth: Arc<GcpAuth>) -> Result<Self> {
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            auth,
            http_client: http_client()?,
        })
    }

    fn objects_url(&self, bucket: &str) -> String {
        format!(
            "{}/storage/v1/b/{}/o",
            self.base_url,
            urlencoding::encode(bucket)
        )
    }

    async fn get(&self, operation: &str, url: &str) -> StoreResult<Response> {
        let token = self
            .auth
            .get_access_token(CLOUD_PLATFORM_SCOPE)
            .await
            .map_err(|e| StoreError::Api(e.to_string()))?;

        let _timer = GCP_API_DURATION
            .with_label_values(&[SERVICE, operation])
            .start_timer();

        let response = self
            .http_client
            .get(url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| {
                record_request(SERVICE, operation, false);
                StoreError::Transport(e.to_string())
            })?;

        record_request(SERVICE, operation, response.status().is_success());
        Ok(response)
    }

    async fn api_error(response: Response) -> StoreError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        StoreError::Api(format!("{}: {}", status, ApiError::parse(&body).message))
    }
}

#[async_trait]
impl ObjectStore for GcsObjectStore {
    async fn read_object(&self, bucket: &str, object: &str) -> StoreResult<Vec<u8>> {
        let url = format!(
            "{}/{}?alt=media",
            self.objects_url(bucket),
            urlencoding::encode(object)
        );
        let response = self.get("objects.get", &url).await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(StoreError::NotFound {
                bucket: bucket.to_string(),
                object: object.to_string(),
            });
        }
        if !response.status().is_success() {
            return Err(Self::api_error(response).await);
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| StoreError::Transport(e.to_string()))?;
        debug!(bucket = %bucket, object = %object, size = bytes.len(), "Object downloaded");
        Ok(bytes.to_vec())
    }

    async fn list_objects(&self, bucket: &str, prefix: &str) -> StoreResult<Vec<String>> {
        let mut names = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut url = format!(
                "{}?prefix={}&fields=items(name),nextPageToken",
                self.objects_url(bucket),
                urlencoding::encode(prefix)
            );
            if let Some(token) = &page_token {
                url.push_str(&format!("&pageToken={}", urlencoding::encode(token)));
            }

            let response = self.get("objects.list", &url).await?;
            if !response.status().is_success() {
                return Err(Self::api_error(response).await);
            }

            let page: ObjectsPage = response
                .json()
                .await
                .map_err(|e| StoreError::Api(format!("Malformed objects list: {}", e)))?;
            names.extend(page.items.into_iter().map(|item| item.name));

            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        debug!(bucket = %bucket, prefix = %prefix, count = names.len(), "Objects listed");
        Ok(names)
    }
}
