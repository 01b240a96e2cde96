//! Pub/sub gateway used to fan device-state updates out to connected
//! guest dashboards.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PushError {
    #[error("publish request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("push gateway returned status {0}")]
    Status(StatusCode),
}

/// Publishes events to channels on the pub/sub provider.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, channel: &str, event: &str, payload: &Value) -> Result<(), PushError>;
}

/// Client for the push gateway's HTTP events endpoint.
pub struct HttpPublisher {
    events_url: String,
    key: String,
    client: Client,
}

impl HttpPublisher {
    pub fn new(url: &str, app_id: &str, key: &str) -> Result<Self, PushError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .connect_timeout(Duration::from_secs(5))
            .build()?;

        Ok(Self {
            events_url: format!("{}/apps/{}/events", url.trim_end_matches('/'), app_id),
            key: key.to_string(),
            client,
        })
    }
}

#[async_trait]
impl Publisher for HttpPublisher {
    async fn publish(&self, channel: &str, event: &str, payload: &Value) -> Result<(), PushError> {
        let res = self
            .client
            .post(&self.events_url)
            .bearer_auth(&self.key)
            .json(&json!({
                "name": event,
                "channel": channel,
                "data": payload.to_string(),
            }))
            .send()
            .await?;

        if !res.status().is_success() {
            return Err(PushError::Status(res.status()));
        }

        Ok(())
    }
}

/// Recording publisher double.
#[cfg(test)]
pub struct MockPublisher {
    pub fail: bool,
    pub published: std::sync::Mutex<Vec<(String, String, Value)>>,
}

#[cfg(test)]
impl Default for MockPublisher {
    fn default() -> Self {
        Self {
            fail: false,
            published: std::sync::Mutex::new(Vec::new()),
        }
    }
}

#[cfg(test)]
impl MockPublisher {
    pub fn publish_count(&self) -> usize {
        self.published.lock().unwrap().len()
    }
}

#[cfg(test)]
#[async_trait]
impl Publisher for MockPublisher {
    async fn publish(&self, channel: &str, event: &str, payload: &Value) -> Result<(), PushError> {
        if self.fail {
            return Err(PushError::Status(StatusCode::BAD_GATEWAY));
        }

        self.published.lock().unwrap().push((
            channel.to_string(),
            event.to_string(),
            payload.clone(),
        ));

        Ok(())
    }
}
