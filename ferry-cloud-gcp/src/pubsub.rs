//! Pub/Sub notifier

use crate::auth::{GcpAuth, CLOUD_PLATFORM_SCOPE};
use crate::metrics::{record_request, GCP_API_DURATION};
use crate::rest::{http_client, ApiError};
use crate::Result;
use async_trait::async_trait;
use base64::Engine as _;
use ferry_runtime::{Notification, NotifyError, Notifier};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::debug;

const SERVICE: &str = "pubsub";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PublishResponse {
    #[serde(default)]
    message_ids: Vec<String>,
}

/// Publishes notifications as JSON messages on Pub/Sub topics of one project
pub struct PubSubNotifier {
    project_id: String,
    base_url: String,
    auth: Arc<GcpAuth>,
    http_client: reqwest::Client,
}

impl PubSubNotifier {
    /// `base_url` is the API root, e.g. `https://pubsub.googleapis.com/v1`
    pub fn new(project_id: impl Into<String>, base_url: &str, auth: Arc<GcpAuth>) -> Result<Self> {
        Ok(Self {
            project_id: project_id.into(),
            base_url: base_url.trim_end_matches('/').to_string(),
            auth,
            http_client: http_client()?,
        })
    }

    pub fn topic_path(&self, topic: &str) -> String {
        format!("projects/{}/topics/{}", self.project_id, topic)
    }
}

#[async_trait]
impl Notifier for PubSubNotifier {
    async fn publish(
        &self,
        topic: &str,
        notification: &Notification,
    ) -> std::result::Result<String, NotifyError> {
        let data =
            serde_json::to_vec(notification).map_err(|e| NotifyError::Encode(e.to_string()))?;
        let body = json!({
            "messages": [
                { "data": base64::engine::general_purpose::STANDARD.encode(data) }
            ]
        });

        let token = self
            .auth
            .get_access_token(CLOUD_PLATFORM_SCOPE)
            .await
            .map_err(|e| NotifyError::Publish(e.to_string()))?;

        let url = format!("{}/{}:publish", self.base_url, self.topic_path(topic));
        let _timer = GCP_API_DURATION
            .with_label_values(&[SERVICE, "topics.publish"])
            .start_timer();

        let response = self
            .http_client
            .post(&url)
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                record_request(SERVICE, "topics.publish", false);
                NotifyError::Publish(e.to_string())
            })?;

        let status = response.status();
        record_request(SERVICE, "topics.publish", status.is_success());
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NotifyError::Publish(format!(
                "{}: {}",
                status,
                ApiError::parse(&body).message
            )));
        }

        let published: PublishResponse = response
            .json()
            .await
            .map_err(|e| NotifyError::Publish(format!("Malformed publish response: {}", e)))?;
        let message_id = published
            .message_ids
            .into_iter()
            .next()
            .ok_or_else(|| NotifyError::Publish("No message id in response".to_string()))?;

        debug!(topic = %topic, message_id = %message_id, "Notification published");
        Ok(message_id)
    }
}
