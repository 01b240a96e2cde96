//! Authorizing proxy between guest requests and Home Assistant.
//!
//! Every request is checked in the same order: booking-key shape (a
//! local check, before any network call), then the validation
//! service, then the house, then the permission tables. Only then is
//! a single upstream call issued on the guest's behalf.

use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;
use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;

use crate::booking::{AccessLevel, BookingKey, BookingValidator};
use crate::ha::{EntityState, ForecastKind, HaError, HomeAssistant};
use crate::permissions::{self, Domain};

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("Unauthorized: Missing or malformed booking key.")]
    MalformedKey,

    #[error("Forbidden: Your booking is not valid or has expired.")]
    BookingDenied,

    #[error("Forbidden: Your booking is not currently active for sending commands.")]
    CommandsNotAllowed,

    #[error("Forbidden: You do not have permission to control this device.")]
    EntityNotPermitted,

    #[error("Invalid house")]
    UnknownHouse,

    #[error("Missing entity")]
    MissingEntity,

    #[error("Unsupported command type.")]
    UnsupportedCommand,

    #[error("Missing value for command.")]
    MissingValue,

    #[error("A server error occurred while communicating with Home Assistant.")]
    Upstream(#[source] HaError),
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::MalformedKey => StatusCode::UNAUTHORIZED,
            ProxyError::BookingDenied
            | ProxyError::CommandsNotAllowed
            | ProxyError::EntityNotPermitted => StatusCode::FORBIDDEN,
            ProxyError::UnknownHouse
            | ProxyError::MissingEntity
            | ProxyError::UnsupportedCommand
            | ProxyError::MissingValue => StatusCode::BAD_REQUEST,
            ProxyError::Upstream(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        (self.status(), Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// Query parameters of the read path.
#[derive(Debug, Deserialize)]
pub struct ReadRequest {
    #[serde(default)]
    pub house: Option<String>,

    #[serde(default)]
    pub entity: Option<String>,

    /// Comma-separated entity ids, `type=batch_states` only.
    #[serde(default)]
    pub entities: Option<String>,

    #[serde(default, rename = "type")]
    pub read_type: ReadType,

    #[serde(default, rename = "opaqueBookingKey")]
    pub opaque_booking_key: Option<String>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ReadType {
    #[default]
    State,
    HourlyForecast,
    DailyForecast,
    BatchStates,
}

/// Body of the write path.
#[derive(Debug, Deserialize)]
pub struct CommandRequest {
    #[serde(default)]
    pub house: Option<String>,

    #[serde(default)]
    pub entity: Option<String>,

    #[serde(default, rename = "type")]
    pub command_type: Option<String>,

    #[serde(default)]
    pub value: Option<Value>,

    #[serde(default, rename = "opaqueBookingKey")]
    pub opaque_booking_key: Option<String>,
}

/// Device command. Each variant maps to exactly one permission table
/// and one Home Assistant service call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum Command {
    SetTemperature,
    LightToggle,
    LightSetBrightness,
    LightSetColorTemp,
    PingLight,
}

impl Command {
    /// Permission table consulted before dispatch.
    pub fn domain(self) -> Domain {
        match self {
            Command::SetTemperature => Domain::Climate,
            Command::LightToggle
            | Command::LightSetBrightness
            | Command::LightSetColorTemp
            | Command::PingLight => Domain::Light,
        }
    }

    /// Target service, `<domain>/<service>`.
    pub fn service(self) -> &'static str {
        match self {
            Command::SetTemperature => "climate/set_temperature",
            Command::LightToggle => "light/toggle",
            Command::LightSetBrightness | Command::LightSetColorTemp => "light/turn_on",
            Command::PingLight => "script/guidebook_ping_light",
        }
    }

    fn requires_value(self) -> bool {
        matches!(
            self,
            Command::SetTemperature | Command::LightSetBrightness | Command::LightSetColorTemp
        )
    }

    fn service_body(self, entity_id: &str, value: Option<&Value>, house: &str) -> Value {
        match self {
            Command::SetTemperature => json!({ "entity_id": entity_id, "temperature": value }),
            Command::LightToggle => json!({ "entity_id": entity_id }),
            Command::LightSetBrightness => json!({ "entity_id": entity_id, "brightness": value }),
            Command::LightSetColorTemp => json!({ "entity_id": entity_id, "color_temp": value }),
            Command::PingLight => json!({ "entity_id": entity_id, "house": house }),
        }
    }
}

/// Successful read, tagged so the HTTP layer can pick a cache lifetime.
#[derive(Debug, PartialEq)]
pub enum ReadOutcome {
    Single(EntityState),
    Forecast(Vec<Value>),
    Batch(BTreeMap<String, EntityState>),
}

/// Authorization and dispatch core, independent of the HTTP layer.
pub struct Proxy {
    validator: Arc<dyn BookingValidator>,
    houses: HashMap<String, Arc<dyn HomeAssistant>>,
}

impl Proxy {
    pub fn new(
        validator: Arc<dyn BookingValidator>,
        houses: HashMap<String, Arc<dyn HomeAssistant>>,
    ) -> Self {
        Self { validator, houses }
    }

    /// Shared entry checks: key shape first (no network), then the
    /// validation service.
    async fn authorize(
        &self,
        raw_key: Option<&str>,
    ) -> Result<(BookingKey, AccessLevel), ProxyError> {
        let key = raw_key
            .and_then(|k| BookingKey::parse(k).ok())
            .ok_or(ProxyError::MalformedKey)?;

        let access = match self.validator.validate(&key).await {
            Ok(validation) => validation.access,
            Err(err) => {
                tracing::warn!("security: validation call failed for key {key}: {err}");
                return Err(ProxyError::BookingDenied);
            }
        };

        if access == AccessLevel::None {
            tracing::warn!("security: access blocked for key {key}, access level {access}");
            return Err(ProxyError::BookingDenied);
        }

        Ok((key, access))
    }

    fn house<'a>(
        &'a self,
        code: Option<&'a str>,
    ) -> Result<(&'a str, &'a dyn HomeAssistant), ProxyError> {
        let code = code.ok_or(ProxyError::UnknownHouse)?;
        let client = self.houses.get(code).ok_or(ProxyError::UnknownHouse)?;
        Ok((code, client.as_ref()))
    }

    pub async fn read(&self, req: &ReadRequest) -> Result<ReadOutcome, ProxyError> {
        let (key, _access) = self.authorize(req.opaque_booking_key.as_deref()).await?;
        let (house, ha) = self.house(req.house.as_deref())?;

        tracing::debug!(
            "[{house}] {} read for booking {}",
            req.read_type,
            key.booking_id()
        );

        match req.read_type {
            ReadType::BatchStates => {
                let requested = req.entities.as_deref().ok_or(ProxyError::MissingEntity)?;
                let states = self.batch_states(house, ha, &key, requested).await?;
                Ok(ReadOutcome::Batch(states))
            }
            ReadType::State => {
                let entity_id = req.entity.as_deref().ok_or(ProxyError::MissingEntity)?;

                // Single reads go through the same permission union as
                // batch reads.
                if !permissions::union(key.booking_id()).contains(entity_id) {
                    tracing::warn!(
                        "security: forbidden read of {entity_id} by booking {}",
                        key.booking_id()
                    );
                    return Err(ProxyError::EntityNotPermitted);
                }

                let state = ha
                    .state(entity_id)
                    .await
                    .map_err(|e| upstream(house, e))?;
                Ok(ReadOutcome::Single(state))
            }
            ReadType::HourlyForecast | ReadType::DailyForecast => {
                let entity_id = req.entity.as_deref().ok_or(ProxyError::MissingEntity)?;
                let kind = match req.read_type {
                    ReadType::HourlyForecast => ForecastKind::Hourly,
                    _ => ForecastKind::Daily,
                };

                let forecast = ha
                    .forecast(entity_id, kind)
                    .await
                    .map_err(|e| upstream(house, e))?;
                Ok(ReadOutcome::Forecast(forecast))
            }
        }
    }

    async fn batch_states(
        &self,
        house: &str,
        ha: &dyn HomeAssistant,
        key: &BookingKey,
        requested: &str,
    ) -> Result<BTreeMap<String, EntityState>, ProxyError> {
        let permitted = permissions::union(key.booking_id());
        let all = ha.states().await.map_err(|e| upstream(house, e))?;

        // Requested but unpermitted or missing entities are silently
        // omitted rather than errored.
        let mut authorized = BTreeMap::new();
        for entity_id in requested.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            if !permitted.contains(entity_id) {
                continue;
            }
            if let Some(state) = all.iter().find(|s| s.entity_id == entity_id) {
                authorized.insert(entity_id.to_string(), state.clone());
            }
        }

        Ok(authorized)
    }

    pub async fn command(&self, req: &CommandRequest) -> Result<Value, ProxyError> {
        let (key, access) = self.authorize(req.opaque_booking_key.as_deref()).await?;
        let (house, ha) = self.house(req.house.as_deref())?;

        if access != AccessLevel::Full {
            tracing::warn!("security: command blocked for key {key}, access level {access}");
            return Err(ProxyError::CommandsNotAllowed);
        }

        let command = req
            .command_type
            .as_deref()
            .and_then(|t| Command::from_str(t).ok())
            .ok_or(ProxyError::UnsupportedCommand)?;
        let entity_id = req.entity.as_deref().ok_or(ProxyError::MissingEntity)?;

        if command.requires_value() && req.value.is_none() {
            return Err(ProxyError::MissingValue);
        }

        let booking_id = key.booking_id();
        if !permissions::is_permitted(command.domain(), booking_id, entity_id) {
            tracing::warn!(
                "security: forbidden attempt by booking {booking_id} to control {} entity {entity_id}",
                command.domain()
            );
            return Err(ProxyError::EntityNotPermitted);
        }

        tracing::debug!("[{house}] dispatching {command} for {entity_id}");

        let body = command.service_body(entity_id, req.value.as_ref(), house);
        let state = ha
            .call_service(command.service(), body)
            .await
            .map_err(|e| upstream(house, e))?;

        Ok(json!({ "success": true, "state": state }))
    }
}

fn upstream(house: &str, err: HaError) -> ProxyError {
    tracing::error!("[{house}] Home Assistant request failed: {err}");
    ProxyError::Upstream(err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::booking::MockValidator;
    use crate::ha::client::MockHomeAssistant;

    fn light_state(entity_id: &str, state: &str) -> EntityState {
        EntityState {
            entity_id: entity_id.to_string(),
            state: state.to_string(),
            attributes: Value::Null,
            last_changed: None,
            last_updated: None,
        }
    }

    fn proxy_for(
        access: AccessLevel,
        ha: MockHomeAssistant,
    ) -> (Arc<MockValidator>, Arc<MockHomeAssistant>, Proxy) {
        let validator = Arc::new(MockValidator::with_access(access));
        let ha = Arc::new(ha);

        let mut houses: HashMap<String, Arc<dyn HomeAssistant>> = HashMap::new();
        houses.insert("193".to_string(), Arc::clone(&ha) as Arc<dyn HomeAssistant>);

        let proxy = Proxy::new(
            Arc::clone(&validator) as Arc<dyn BookingValidator>,
            houses,
        );
        (validator, ha, proxy)
    }

    fn read_request(entities: &str, key: Option<&str>) -> ReadRequest {
        ReadRequest {
            house: Some("193".to_string()),
            entity: None,
            entities: Some(entities.to_string()),
            read_type: ReadType::BatchStates,
            opaque_booking_key: key.map(String::from),
        }
    }

    fn command_request(command: &str, entity: &str, value: Option<Value>) -> CommandRequest {
        CommandRequest {
            house: Some("193".to_string()),
            entity: Some(entity.to_string()),
            command_type: Some(command.to_string()),
            value,
            opaque_booking_key: Some("31-abc123".to_string()),
        }
    }

    #[tokio::test]
    async fn test_malformed_key_rejected_before_any_network_call() {
        let (validator, ha, proxy) = proxy_for(AccessLevel::Full, MockHomeAssistant::default());

        let err = proxy
            .read(&read_request("light.193_1_lights", Some("no_hyphen")))
            .await
            .unwrap_err();

        assert!(matches!(err, ProxyError::MalformedKey));
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(validator.call_count(), 0);
        assert_eq!(ha.service_call_count(), 0);
    }

    #[tokio::test]
    async fn test_missing_key_rejected() {
        let (validator, _ha, proxy) = proxy_for(AccessLevel::Full, MockHomeAssistant::default());

        let err = proxy
            .read(&read_request("light.193_1_lights", None))
            .await
            .unwrap_err();

        assert!(matches!(err, ProxyError::MalformedKey));
        assert_eq!(validator.call_count(), 0);
    }

    #[tokio::test]
    async fn test_denied_booking_rejected() {
        let (validator, _ha, proxy) = proxy_for(AccessLevel::None, MockHomeAssistant::default());

        let err = proxy
            .read(&read_request("light.193_1_lights", Some("31-abc123")))
            .await
            .unwrap_err();

        assert!(matches!(err, ProxyError::BookingDenied));
        assert_eq!(err.status(), StatusCode::FORBIDDEN);
        assert_eq!(validator.call_count(), 1);
    }

    #[tokio::test]
    async fn test_validator_failure_treated_as_denied() {
        let validator = Arc::new(MockValidator::failing());
        let mut houses: HashMap<String, Arc<dyn HomeAssistant>> = HashMap::new();
        houses.insert(
            "193".to_string(),
            Arc::new(MockHomeAssistant::default()) as Arc<dyn HomeAssistant>,
        );
        let proxy = Proxy::new(Arc::clone(&validator) as Arc<dyn BookingValidator>, houses);

        let err = proxy
            .read(&read_request("light.193_1_lights", Some("31-abc123")))
            .await
            .unwrap_err();

        assert!(matches!(err, ProxyError::BookingDenied));
    }

    #[tokio::test]
    async fn test_unknown_house_rejected() {
        let (_validator, _ha, proxy) = proxy_for(AccessLevel::Full, MockHomeAssistant::default());

        let mut req = read_request("light.193_1_lights", Some("31-abc123"));
        req.house = Some("200".to_string());

        let err = proxy.read(&req).await.unwrap_err();
        assert!(matches!(err, ProxyError::UnknownHouse));
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_batch_states_filters_to_permitted_entities() {
        let ha = MockHomeAssistant::with_states(vec![
            light_state("light.193_1_lights", "on"),
            light_state("light.195_1_lights", "off"),
        ]);
        let (_validator, _ha, proxy) = proxy_for(AccessLevel::Partial, ha);

        let outcome = proxy
            .read(&read_request(
                "light.193_1_lights,light.195_1_lights",
                Some("31-abc123"),
            ))
            .await
            .unwrap();

        let ReadOutcome::Batch(states) = outcome else {
            panic!("expected batch outcome");
        };
        assert_eq!(states.len(), 1);
        assert!(states.contains_key("light.193_1_lights"));
        assert!(!states.contains_key("light.195_1_lights"));
    }

    #[tokio::test]
    async fn test_batch_states_omits_entities_missing_upstream() {
        // climate.193_1_trv is permitted for booking 31 but absent here.
        let ha = MockHomeAssistant::with_states(vec![light_state("light.193_1_lights", "on")]);
        let (_validator, _ha, proxy) = proxy_for(AccessLevel::Partial, ha);

        let outcome = proxy
            .read(&read_request(
                "light.193_1_lights,climate.193_1_trv",
                Some("31-abc123"),
            ))
            .await
            .unwrap();

        let ReadOutcome::Batch(states) = outcome else {
            panic!("expected batch outcome");
        };
        assert_eq!(states.len(), 1);
        assert!(states.contains_key("light.193_1_lights"));
    }

    #[tokio::test]
    async fn test_batch_states_is_idempotent() {
        let ha = MockHomeAssistant::with_states(vec![
            light_state("light.193_1_lights", "on"),
            light_state("climate.193_1_trv", "heat"),
        ]);
        let (_validator, _ha, proxy) = proxy_for(AccessLevel::Partial, ha);
        let req = read_request("climate.193_1_trv,light.193_1_lights", Some("31-abc123"));

        let first = proxy.read(&req).await.unwrap();
        let second = proxy.read(&req).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_single_state_read_requires_permission() {
        let ha = MockHomeAssistant::with_states(vec![light_state("light.195_1_lights", "on")]);
        let (_validator, ha, proxy) = proxy_for(AccessLevel::Partial, ha);

        let req = ReadRequest {
            house: Some("193".to_string()),
            entity: Some("light.195_1_lights".to_string()),
            entities: None,
            read_type: ReadType::State,
            opaque_booking_key: Some("31-abc123".to_string()),
        };

        let err = proxy.read(&req).await.unwrap_err();
        assert!(matches!(err, ProxyError::EntityNotPermitted));
        assert_eq!(ha.state_request_count(), 0);
    }

    #[tokio::test]
    async fn test_single_state_read_returns_state() {
        let ha = MockHomeAssistant::with_states(vec![light_state("light.193_1_lights", "on")]);
        let (_validator, _ha, proxy) = proxy_for(AccessLevel::Partial, ha);

        let req = ReadRequest {
            house: Some("193".to_string()),
            entity: Some("light.193_1_lights".to_string()),
            entities: None,
            read_type: ReadType::State,
            opaque_booking_key: Some("31-abc123".to_string()),
        };

        let outcome = proxy.read(&req).await.unwrap();
        let ReadOutcome::Single(state) = outcome else {
            panic!("expected single outcome");
        };
        assert_eq!(state.state, "on");
    }

    #[tokio::test]
    async fn test_forecast_read_passes_through() {
        let ha = MockHomeAssistant {
            forecast: vec![json!({ "datetime": "2025-01-01T00:00:00Z", "temperature": 3.5 })],
            ..MockHomeAssistant::default()
        };
        let (_validator, _ha, proxy) = proxy_for(AccessLevel::Partial, ha);

        let req = ReadRequest {
            house: Some("193".to_string()),
            entity: Some("weather.forecast_home".to_string()),
            entities: None,
            read_type: ReadType::HourlyForecast,
            opaque_booking_key: Some("31-abc123".to_string()),
        };

        let outcome = proxy.read(&req).await.unwrap();
        let ReadOutcome::Forecast(forecast) = outcome else {
            panic!("expected forecast outcome");
        };
        assert_eq!(forecast.len(), 1);
        assert_eq!(forecast[0]["temperature"], 3.5);
    }

    #[tokio::test]
    async fn test_partial_access_cannot_send_commands() {
        let (_validator, ha, proxy) = proxy_for(AccessLevel::Partial, MockHomeAssistant::default());

        let err = proxy
            .command(&command_request(
                "set_temperature",
                "climate.193_1_trv",
                Some(json!(21)),
            ))
            .await
            .unwrap_err();

        assert!(matches!(err, ProxyError::CommandsNotAllowed));
        assert_eq!(err.status(), StatusCode::FORBIDDEN);
        assert_eq!(ha.service_call_count(), 0);
    }

    #[tokio::test]
    async fn test_light_toggle_issues_exactly_one_service_call() {
        let ha = MockHomeAssistant {
            service_response: json!([{ "entity_id": "light.193_1_lights", "state": "off" }]),
            ..MockHomeAssistant::default()
        };
        let (_validator, ha, proxy) = proxy_for(AccessLevel::Full, ha);

        let envelope = proxy
            .command(&command_request("light_toggle", "light.193_1_lights", None))
            .await
            .unwrap();

        assert_eq!(envelope["success"], true);
        assert_eq!(envelope["state"][0]["state"], "off");

        let calls = ha.service_calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "light/toggle");
        assert_eq!(calls[0].1, json!({ "entity_id": "light.193_1_lights" }));
    }

    #[tokio::test]
    async fn test_set_temperature_maps_value_into_service_body() {
        let (_validator, ha, proxy) = proxy_for(AccessLevel::Full, MockHomeAssistant::default());

        let envelope = proxy
            .command(&command_request(
                "set_temperature",
                "climate.193_1_trv",
                Some(json!(21)),
            ))
            .await
            .unwrap();

        assert_eq!(envelope["success"], true);

        let calls = ha.service_calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "climate/set_temperature");
        assert_eq!(
            calls[0].1,
            json!({ "entity_id": "climate.193_1_trv", "temperature": 21 })
        );
    }

    #[tokio::test]
    async fn test_ping_light_carries_house_code() {
        let (_validator, ha, proxy) = proxy_for(AccessLevel::Full, MockHomeAssistant::default());

        proxy
            .command(&command_request("ping_light", "light.193_1_lights", None))
            .await
            .unwrap();

        let calls = ha.service_calls.lock().unwrap();
        assert_eq!(calls[0].0, "script/guidebook_ping_light");
        assert_eq!(
            calls[0].1,
            json!({ "entity_id": "light.193_1_lights", "house": "193" })
        );
    }

    #[tokio::test]
    async fn test_command_outside_permission_table_rejected() {
        let (_validator, ha, proxy) = proxy_for(AccessLevel::Full, MockHomeAssistant::default());

        let err = proxy
            .command(&command_request(
                "set_temperature",
                "climate.193_2_trv",
                Some(json!(21)),
            ))
            .await
            .unwrap_err();

        assert!(matches!(err, ProxyError::EntityNotPermitted));
        assert_eq!(ha.service_call_count(), 0);
    }

    #[tokio::test]
    async fn test_unsupported_command_type_rejected() {
        let (_validator, _ha, proxy) = proxy_for(AccessLevel::Full, MockHomeAssistant::default());

        let err = proxy
            .command(&command_request("unlock_door", "light.193_1_lights", None))
            .await
            .unwrap_err();

        assert!(matches!(err, ProxyError::UnsupportedCommand));
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_valued_command_without_value_rejected() {
        let (_validator, ha, proxy) = proxy_for(AccessLevel::Full, MockHomeAssistant::default());

        let err = proxy
            .command(&command_request("light_set_brightness", "light.193_1_lights", None))
            .await
            .unwrap_err();

        assert!(matches!(err, ProxyError::MissingValue));
        assert_eq!(ha.service_call_count(), 0);
    }

    #[tokio::test]
    async fn test_upstream_failure_maps_to_server_error() {
        let ha = MockHomeAssistant {
            fail: true,
            ..MockHomeAssistant::default()
        };
        let (_validator, _ha, proxy) = proxy_for(AccessLevel::Full, ha);

        let err = proxy
            .command(&command_request("light_toggle", "light.193_1_lights", None))
            .await
            .unwrap_err();

        assert!(matches!(err, ProxyError::Upstream(_)));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_command_names_round_trip() {
        assert_eq!(Command::from_str("set_temperature").unwrap(), Command::SetTemperature);
        assert_eq!(Command::from_str("light_toggle").unwrap(), Command::LightToggle);
        assert_eq!(Command::SetTemperature.to_string(), "set_temperature");
        assert!(Command::from_str("open_window").is_err());
    }
}
