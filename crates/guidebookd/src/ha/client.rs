use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client, StatusCode};
use serde_json::{json, Value};
use thiserror::Error;

use super::models::{EntityState, ForecastKind};

#[derive(Debug, Error)]
pub enum HaError {
    #[error("invalid access token")]
    InvalidToken,

    #[error("request to Home Assistant failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Home Assistant responded with status {0}")]
    Status(StatusCode),
}

/// Narrow interface over one Home Assistant instance.
#[async_trait]
pub trait HomeAssistant: Send + Sync {
    /// Fetch the state of a single entity.
    async fn state(&self, entity_id: &str) -> Result<EntityState, HaError>;

    /// Fetch the states of every entity known to the instance.
    async fn states(&self) -> Result<Vec<EntityState>, HaError>;

    /// Fetch a weather forecast through the weather service.
    async fn forecast(&self, entity_id: &str, kind: ForecastKind) -> Result<Vec<Value>, HaError>;

    /// Call a service (`"<domain>/<service>"`) and return its response body.
    async fn call_service(&self, service: &str, body: Value) -> Result<Value, HaError>;
}

/// REST client authenticated with a long-lived access token.
pub struct HaRestClient {
    url: String,
    client: Client,
}

impl HaRestClient {
    pub fn new(url: &str, token: &str) -> Result<Self, HaError> {
        let mut headers = header::HeaderMap::new();
        let mut auth = header::HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|_| HaError::InvalidToken)?;
        auth.set_sensitive(true);
        headers.insert(header::AUTHORIZATION, auth);

        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            url: url.trim_end_matches('/').to_string(),
            client,
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, HaError> {
        let res = self.client.get(format!("{}{}", self.url, path)).send().await?;

        if !res.status().is_success() {
            return Err(HaError::Status(res.status()));
        }

        Ok(res.json().await?)
    }
}

#[async_trait]
impl HomeAssistant for HaRestClient {
    async fn state(&self, entity_id: &str) -> Result<EntityState, HaError> {
        self.get_json(&format!("/api/states/{entity_id}")).await
    }

    async fn states(&self) -> Result<Vec<EntityState>, HaError> {
        self.get_json("/api/states").await
    }

    async fn forecast(&self, entity_id: &str, kind: ForecastKind) -> Result<Vec<Value>, HaError> {
        let url = format!(
            "{}/api/services/weather/get_forecasts?return_response=true",
            self.url
        );
        let res = self
            .client
            .post(&url)
            .json(&json!({ "entity_id": entity_id, "type": kind.as_str() }))
            .send()
            .await?;

        if !res.status().is_success() {
            return Err(HaError::Status(res.status()));
        }

        // The service response wraps the forecast per entity; an absent
        // entry is an empty forecast, not an error.
        let envelope: Value = res.json().await?;
        let forecast = envelope
            .pointer(&format!("/service_response/{entity_id}/forecast"))
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        Ok(forecast)
    }

    async fn call_service(&self, service: &str, body: Value) -> Result<Value, HaError> {
        let url = format!("{}/api/services/{service}", self.url);
        let res = self.client.post(&url).json(&body).send().await?;

        if !res.status().is_success() {
            return Err(HaError::Status(res.status()));
        }

        Ok(res.json().await?)
    }
}

/// In-memory Home Assistant double that records outbound calls.
#[cfg(test)]
pub struct MockHomeAssistant {
    pub states: Vec<EntityState>,
    pub forecast: Vec<Value>,
    pub service_response: Value,
    pub fail: bool,
    pub state_requests: std::sync::Mutex<Vec<String>>,
    pub service_calls: std::sync::Mutex<Vec<(String, Value)>>,
}

#[cfg(test)]
impl Default for MockHomeAssistant {
    fn default() -> Self {
        Self {
            states: Vec::new(),
            forecast: Vec::new(),
            service_response: Value::Null,
            fail: false,
            state_requests: std::sync::Mutex::new(Vec::new()),
            service_calls: std::sync::Mutex::new(Vec::new()),
        }
    }
}

#[cfg(test)]
impl MockHomeAssistant {
    pub fn with_states(states: Vec<EntityState>) -> Self {
        Self {
            states,
            ..Self::default()
        }
    }

    pub fn service_call_count(&self) -> usize {
        self.service_calls.lock().unwrap().len()
    }

    pub fn state_request_count(&self) -> usize {
        self.state_requests.lock().unwrap().len()
    }
}

#[cfg(test)]
#[async_trait]
impl HomeAssistant for MockHomeAssistant {
    async fn state(&self, entity_id: &str) -> Result<EntityState, HaError> {
        if self.fail {
            return Err(HaError::Status(StatusCode::BAD_GATEWAY));
        }

        self.state_requests
            .lock()
            .unwrap()
            .push(entity_id.to_string());

        self.states
            .iter()
            .find(|s| s.entity_id == entity_id)
            .cloned()
            .ok_or(HaError::Status(StatusCode::NOT_FOUND))
    }

    async fn states(&self) -> Result<Vec<EntityState>, HaError> {
        if self.fail {
            return Err(HaError::Status(StatusCode::BAD_GATEWAY));
        }

        Ok(self.states.clone())
    }

    async fn forecast(&self, _entity_id: &str, _kind: ForecastKind) -> Result<Vec<Value>, HaError> {
        if self.fail {
            return Err(HaError::Status(StatusCode::BAD_GATEWAY));
        }

        Ok(self.forecast.clone())
    }

    async fn call_service(&self, service: &str, body: Value) -> Result<Value, HaError> {
        if self.fail {
            return Err(HaError::Status(StatusCode::BAD_GATEWAY));
        }

        self.service_calls
            .lock()
            .unwrap()
            .push((service.to_string(), body));

        Ok(self.service_response.clone())
    }
}
