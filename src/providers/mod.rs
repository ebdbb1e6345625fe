//! External interfaces the core consumes -- live state, history, completion,
//! and key-value persistence. Production implementations talk HTTP; the
//! `memory` module provides in-process doubles for tests.

pub mod hass;
pub mod memory;
pub mod openai;

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// States the host reports when an integration stops answering. They carry
/// no behavioral information, so neither learning nor evaluation sees them.
pub fn is_sentinel_state(state: &str) -> bool {
    matches!(state, "unknown" | "unavailable" | "")
}

/// A point-in-time view of one entity, as the host reports it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityState {
    pub entity_id: String,
    pub state: String,
    #[serde(default)]
    pub attributes: Map<String, Value>,
}

impl EntityState {
    pub fn new(entity_id: &str, state: &str) -> Self {
        Self {
            entity_id: entity_id.to_string(),
            state: state.to_string(),
            attributes: Map::new(),
        }
    }

    pub fn friendly_name(&self) -> String {
        self.attributes
            .get("friendly_name")
            .and_then(Value::as_str)
            .unwrap_or(&self.entity_id)
            .to_string()
    }

    pub fn device_class(&self) -> Option<&str> {
        self.attributes.get("device_class").and_then(Value::as_str)
    }

    /// The device-category prefix of the id, e.g. `sensor` in `sensor.attic_temp`.
    pub fn domain(&self) -> &str {
        self.entity_id.split('.').next().unwrap_or("")
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("API error: {status} -- {body}")]
    Api { status: u16, body: String },
    #[error("failed to parse response: {0}")]
    Parse(String),
}

/// Current entity states, one at a time or the whole registry.
#[async_trait]
pub trait LiveStateSource: Send + Sync {
    /// `None` when the entity does not exist.
    async fn state(&self, entity_id: &str) -> Result<Option<EntityState>, ProviderError>;

    async fn all_states(&self) -> Result<Vec<EntityState>, ProviderError>;
}

/// Recorded state history.
#[async_trait]
pub trait HistorySource: Send + Sync {
    /// Bulk fetch of raw state values for `entity_ids` between `start` and
    /// `end`, oldest first. Entities with nothing recorded in the window are
    /// absent from the result rather than an error.
    async fn history(
        &self,
        entity_ids: &[String],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<HashMap<String, Vec<String>>, ProviderError>;
}

/// A text-in, text-out AI completion API.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// `cost_optimize` permits routing to a cheaper model.
    async fn complete(&self, prompt: &str, cost_optimize: bool) -> Result<String, ProviderError>;
}

/// One durable slot of structured data, in the spirit of the host
/// platform's storage helpers. Absent and corrupt both load as `None`.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn load(&self) -> anyhow::Result<Option<Value>>;
    async fn save(&self, value: &Value) -> anyhow::Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_state_accessors() {
        let mut state = EntityState::new("sensor.attic_temp", "21.5");
        assert_eq!(state.domain(), "sensor");
        assert_eq!(state.friendly_name(), "sensor.attic_temp");
        assert_eq!(state.device_class(), None);

        state.attributes.insert(
            "friendly_name".to_string(),
            Value::String("Attic temperature".to_string()),
        );
        state.attributes.insert(
            "device_class".to_string(),
            Value::String("temperature".to_string()),
        );
        assert_eq!(state.friendly_name(), "Attic temperature");
        assert_eq!(state.device_class(), Some("temperature"));
    }

    #[test]
    fn test_sentinel_states() {
        assert!(is_sentinel_state("unknown"));
        assert!(is_sentinel_state("unavailable"));
        assert!(is_sentinel_state(""));
        assert!(!is_sentinel_state("off"));
        assert!(!is_sentinel_state("21.5"));
    }
}
