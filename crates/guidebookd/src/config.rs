//! Configuration file parsing and structures.
//!
//! guidebookd is configured from a single TOML file: the API bind
//! address, logging, the booking-validation service, the webhook
//! shared secret, the push gateway, and one `[houses.<code>]` entry
//! per Home Assistant instance. House credentials only ever live
//! here and in the clients built from them.

use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing_subscriber::filter::LevelFilter;

/// Top-level configuration structure
#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    pub validator: ValidatorConfig,
    pub webhook: WebhookConfig,
    pub push: PushConfig,

    /// Key = house code (e.g. "193"), value = that house's Home
    /// Assistant credentials.
    #[serde(default)]
    pub houses: HashMap<String, HouseConfig>,
}

#[derive(Debug, Default, Deserialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => LevelFilter::TRACE,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Error => LevelFilter::ERROR,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default)]
    pub level: LogLevel,

    #[serde(default)]
    pub overrides: HashMap<String, LogLevel>,
}

/// HTTP API bind configuration
#[derive(Debug, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_listen")]
    pub listen: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_listen() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8580
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            port: default_port(),
        }
    }
}

/// Booking-validation service endpoint
#[derive(Debug, Deserialize)]
pub struct ValidatorConfig {
    /// Base URL of the validation service
    pub url: String,
}

/// Shared secret expected from Home Assistant webhooks
#[derive(Debug, Deserialize)]
pub struct WebhookConfig {
    pub secret: String,
}

/// Pub/sub push gateway credentials
#[derive(Debug, Deserialize)]
pub struct PushConfig {
    pub url: String,
    pub app_id: String,
    pub key: String,
}

/// One Home Assistant instance
#[derive(Debug, Deserialize)]
pub struct HouseConfig {
    /// Base URL of the instance
    pub url: String,

    /// Long-lived access token
    pub token: String,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Io(path.as_ref().to_path_buf(), e))?;

        let config: Config = toml::from_str(&contents).map_err(ConfigError::Parse)?;
        config.validate()?;

        Ok(config)
    }

    /// Cross-field constraints that parsing cannot express. A config
    /// that passes here cannot produce an unusable client at runtime.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.houses.is_empty() {
            return Err(ConfigError::Validation("no [houses.<code>] entries".to_string()));
        }

        for (code, house) in &self.houses {
            if house.url.is_empty() {
                return Err(ConfigError::Validation(format!("houses.{code}.url is empty")));
            }
            if house.token.is_empty() {
                return Err(ConfigError::Validation(format!("houses.{code}.token is empty")));
            }
        }

        if self.validator.url.is_empty() {
            return Err(ConfigError::Validation("validator.url is empty".to_string()));
        }

        if self.webhook.secret.is_empty() {
            return Err(ConfigError::Validation("webhook.secret is empty".to_string()));
        }

        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {0}: {1}")]
    Io(PathBuf, #[source] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Validation(String),
}
