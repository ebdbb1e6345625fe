//! In-memory providers -- test doubles for every external interface.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use super::{
    CompletionClient, EntityState, HistorySource, KeyValueStore, LiveStateSource, ProviderError,
};

/// A fixed set of live entity states. Individual entities can be poisoned
/// to simulate per-entity lookup failures.
#[derive(Default)]
pub struct MemoryStates {
    states: Mutex<HashMap<String, EntityState>>,
    poisoned: Mutex<HashSet<String>>,
}

impl MemoryStates {
    pub fn new(states: Vec<EntityState>) -> Self {
        Self {
            states: Mutex::new(
                states
                    .into_iter()
                    .map(|s| (s.entity_id.clone(), s))
                    .collect(),
            ),
            poisoned: Mutex::new(HashSet::new()),
        }
    }

    pub fn set_state(&self, entity_id: &str, state: &str) {
        let mut states = self.states.lock().unwrap();
        states
            .entry(entity_id.to_string())
            .and_modify(|e| e.state = state.to_string())
            .or_insert_with(|| EntityState::new(entity_id, state));
    }

    /// Make lookups for `entity_id` fail.
    pub fn poison(&self, entity_id: &str) {
        self.poisoned.lock().unwrap().insert(entity_id.to_string());
    }
}

#[async_trait]
impl LiveStateSource for MemoryStates {
    async fn state(&self, entity_id: &str) -> Result<Option<EntityState>, ProviderError> {
        if self.poisoned.lock().unwrap().contains(entity_id) {
            return Err(ProviderError::Api {
                status: 500,
                body: format!("poisoned entity {entity_id}"),
            });
        }
        Ok(self.states.lock().unwrap().get(entity_id).cloned())
    }

    async fn all_states(&self) -> Result<Vec<EntityState>, ProviderError> {
        let mut states: Vec<EntityState> = self.states.lock().unwrap().values().cloned().collect();
        states.sort_by(|a, b| a.entity_id.cmp(&b.entity_id));
        Ok(states)
    }
}

/// Canned history series keyed by entity id. Entities without a series are
/// simply absent from the result, like a recorder with nothing in range.
pub struct MemoryHistory {
    series: HashMap<String, Vec<String>>,
}

impl MemoryHistory {
    pub fn new(series: HashMap<String, Vec<String>>) -> Self {
        Self { series }
    }
}

#[async_trait]
impl HistorySource for MemoryHistory {
    async fn history(
        &self,
        entity_ids: &[String],
        _start: DateTime<Utc>,
        _end: DateTime<Utc>,
    ) -> Result<HashMap<String, Vec<String>>, ProviderError> {
        Ok(entity_ids
            .iter()
            .filter_map(|id| self.series.get(id).map(|s| (id.clone(), s.clone())))
            .collect())
    }
}

/// Replays scripted completion replies in order and records every prompt.
#[derive(Default)]
pub struct ScriptedCompletion {
    replies: Mutex<VecDeque<String>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedCompletion {
    pub fn new(replies: Vec<String>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl CompletionClient for ScriptedCompletion {
    async fn complete(&self, prompt: &str, _cost_optimize: bool) -> Result<String, ProviderError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| ProviderError::Api {
                status: 503,
                body: "script exhausted".to_string(),
            })
    }
}

/// A key-value store held in memory.
#[derive(Default)]
pub struct MemoryStore {
    value: Mutex<Option<Value>>,
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn load(&self) -> anyhow::Result<Option<Value>> {
        Ok(self.value.lock().unwrap().clone())
    }

    async fn save(&self, value: &Value) -> anyhow::Result<()> {
        *self.value.lock().unwrap() = Some(value.clone());
        Ok(())
    }
}
