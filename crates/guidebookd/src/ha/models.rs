use serde::{Deserialize, Serialize};

/// State object returned by the Home Assistant REST API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityState {
    pub entity_id: String,
    pub state: String,

    #[serde(default)]
    pub attributes: serde_json::Value,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_changed: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<String>,
}

/// Forecast granularity accepted by the weather service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForecastKind {
    Hourly,
    Daily,
}

impl ForecastKind {
    /// The `type` value the weather service expects.
    pub fn as_str(self) -> &'static str {
        match self {
            ForecastKind::Hourly => "hourly",
            ForecastKind::Daily => "daily",
        }
    }
}
