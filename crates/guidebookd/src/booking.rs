//! Opaque booking keys and their validation against the booking service.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

/// Opaque key presented by the guest's browser: `<booking id>-<secret>`.
///
/// Construction enforces only the structural rule that the id and
/// secret are separated by a hyphen; everything else is the
/// validation service's business.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingKey {
    raw: String,
}

#[derive(Debug, Error)]
#[error("missing or malformed booking key")]
pub struct MalformedKey;

impl BookingKey {
    pub fn parse(raw: &str) -> Result<Self, MalformedKey> {
        if raw.contains('-') {
            Ok(Self {
                raw: raw.to_string(),
            })
        } else {
            Err(MalformedKey)
        }
    }

    /// Booking identifier: everything before the first hyphen.
    pub fn booking_id(&self) -> &str {
        self.raw.split_once('-').map_or(self.raw.as_str(), |(id, _)| id)
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl fmt::Display for BookingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Access level resolved by the booking-validation service.
///
/// Writes require [`AccessLevel::Full`]; reads are allowed for any
/// successfully validated level other than [`AccessLevel::None`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum AccessLevel {
    #[serde(alias = "denied")]
    None,
    Partial,
    Full,
}

/// Validation result for an opaque booking key.
#[derive(Debug, Clone, Deserialize)]
pub struct Validation {
    pub access: AccessLevel,

    /// Guest metadata passed through from the validation service.
    #[serde(default)]
    pub guest: Option<serde_json::Value>,
}

#[derive(Debug, Error)]
pub enum ValidatorError {
    #[error("validation request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("validation service returned status {0}")]
    Status(reqwest::StatusCode),
}

/// Resolves opaque booking keys to access levels.
#[async_trait]
pub trait BookingValidator: Send + Sync {
    async fn validate(&self, key: &BookingKey) -> Result<Validation, ValidatorError>;
}

/// Client for the HTTP booking-validation endpoint.
pub struct HttpValidator {
    base_url: String,
    client: reqwest::Client,
}

impl HttpValidator {
    pub fn new(base_url: &str) -> Result<Self, ValidatorError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .connect_timeout(Duration::from_secs(5))
            .build()?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }
}

#[async_trait]
impl BookingValidator for HttpValidator {
    async fn validate(&self, key: &BookingKey) -> Result<Validation, ValidatorError> {
        let url = format!("{}/api/validate-booking", self.base_url);
        let res = self
            .client
            .get(&url)
            .query(&[("booking", key.as_str())])
            .send()
            .await?;

        if !res.status().is_success() {
            return Err(ValidatorError::Status(res.status()));
        }

        Ok(res.json().await?)
    }
}

/// Scripted validator that records the keys it was asked about.
#[cfg(test)]
pub struct MockValidator {
    access: AccessLevel,
    fail: bool,
    calls: std::sync::Mutex<Vec<String>>,
}

#[cfg(test)]
impl MockValidator {
    pub fn with_access(access: AccessLevel) -> Self {
        Self {
            access,
            fail: false,
            calls: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Validator whose requests fail before resolving an access level.
    pub fn failing() -> Self {
        Self {
            access: AccessLevel::None,
            fail: true,
            calls: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[cfg(test)]
#[async_trait]
impl BookingValidator for MockValidator {
    async fn validate(&self, key: &BookingKey) -> Result<Validation, ValidatorError> {
        self.calls.lock().unwrap().push(key.as_str().to_string());

        if self.fail {
            return Err(ValidatorError::Status(
                reqwest::StatusCode::INTERNAL_SERVER_ERROR,
            ));
        }

        Ok(Validation {
            access: self.access,
            guest: None,
        })
    }
}
