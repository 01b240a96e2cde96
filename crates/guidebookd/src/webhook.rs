//! Relay for Home Assistant state-change webhooks.
//!
//! Home Assistant automations POST here with a shared secret; valid
//! notifications are republished to the house's pub/sub channel so
//! every connected dashboard sees the change.

use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;

use crate::push::{Publisher, PushError};

/// Header carrying the shared secret.
pub const SECRET_HEADER: &str = "x-webhook-secret";

const EVENT: &str = "state-update";

/// Notification body posted by a Home Assistant automation. Fields are
/// optional so that validation failures map to 400 rather than a body
/// rejection.
#[derive(Debug, Default, Deserialize)]
pub struct Notification {
    #[serde(default)]
    pub entity_id: Option<String>,

    #[serde(default)]
    pub state: Option<String>,

    #[serde(default)]
    pub attributes: Value,

    #[serde(default)]
    pub house: Option<String>,
}

#[derive(Debug, Error)]
#[error("Bad Request: Missing entity_id, state, or house.")]
pub struct MissingField;

/// A notification with all required fields present.
#[derive(Debug)]
pub struct Update {
    pub entity_id: String,
    pub state: String,
    pub attributes: Value,
    pub house: String,
}

impl Notification {
    pub fn into_update(self) -> Result<Update, MissingField> {
        match (self.entity_id, self.state, self.house) {
            (Some(entity_id), Some(state), Some(house))
                if !entity_id.is_empty() && !state.is_empty() && !house.is_empty() =>
            {
                Ok(Update {
                    entity_id,
                    state,
                    attributes: self.attributes,
                    house,
                })
            }
            _ => Err(MissingField),
        }
    }
}

/// Channel carrying state updates for one house.
pub fn house_channel(house: &str) -> String {
    format!("house-{house}")
}

/// Republish one update to the house's channel. No retries; a publish
/// failure surfaces to the caller.
pub async fn relay(publisher: &dyn Publisher, update: &Update) -> Result<(), PushError> {
    let channel = house_channel(&update.house);
    let payload = json!({
        "entity_id": update.entity_id,
        "state": update.state,
        "attributes": update.attributes,
    });

    publisher.publish(&channel, EVENT, &payload).await?;

    tracing::info!("pushed update for {} to channel {}", update.entity_id, channel);
    Ok(())
}
