//! Monitored-entity selection -- tiers, ignore list, AI discovery, cleanup.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::providers::{CompletionClient, KeyValueStore, LiveStateSource};
use crate::storage::atomic_write_json;

/// Standard/priority membership within one selection source.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TierList {
    pub standard: Vec<String>,
    pub priority: Vec<String>,
}

/// The full persisted selection.
///
/// Deserialization is deliberately strict -- every key must be present with
/// the right nested shape -- because parsing doubles as validation of the
/// user-editable mirror file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MonitoredEntities {
    pub gpt_selected: TierList,
    pub user_added: TierList,
    pub ignored: Vec<String>,
}

impl MonitoredEntities {
    /// Effective members of one tier: AI-selected plus user-added, minus
    /// ignored, first occurrence wins on duplicates.
    pub fn tier(&self, priority: bool) -> Vec<String> {
        let lists: [&[String]; 2] = if priority {
            [&self.gpt_selected.priority, &self.user_added.priority]
        } else {
            [&self.gpt_selected.standard, &self.user_added.standard]
        };
        self.union_minus_ignored(&lists)
    }

    /// Every effective monitored entity across both tiers.
    pub fn all_monitored(&self) -> Vec<String> {
        self.union_minus_ignored(&[
            &self.gpt_selected.standard,
            &self.gpt_selected.priority,
            &self.user_added.standard,
            &self.user_added.priority,
        ])
    }

    fn union_minus_ignored(&self, lists: &[&[String]]) -> Vec<String> {
        let ignored: HashSet<&String> = self.ignored.iter().collect();
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for list in lists {
            for id in *list {
                if !ignored.contains(id) && seen.insert(id.clone()) {
                    out.push(id.clone());
                }
            }
        }
        out
    }
}

/// What discovery sends the AI about each candidate entity.
#[derive(Debug, Serialize)]
struct EntityProfile {
    entity_id: String,
    friendly_name: String,
    state: String,
    domain: String,
    device_class: String,
}

/// The reply shape discovery insists on. Both keys must be present.
#[derive(Debug, Deserialize)]
struct DiscoveredSelection {
    standard: Vec<String>,
    priority: Vec<String>,
}

/// Maintains which entities are monitored, split into AI-selected and
/// user-added standard/priority tiers plus an ignore list. Persists to a
/// structured store and mirrors to a user-editable JSON file.
pub struct SelectionRegistry {
    store: Arc<dyn KeyValueStore>,
    mirror_path: PathBuf,
    live: Arc<dyn LiveStateSource>,
    state: Mutex<MonitoredEntities>,
}

impl SelectionRegistry {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        mirror_path: PathBuf,
        live: Arc<dyn LiveStateSource>,
    ) -> Self {
        Self {
            store,
            mirror_path,
            live,
            state: Mutex::new(MonitoredEntities::default()),
        }
    }

    /// Load the selection: structured store first, then the user mirror,
    /// which wins only when its full nested shape validates.
    pub async fn load(&self) -> Result<()> {
        let mut selection = MonitoredEntities::default();

        match self.store.load().await {
            Ok(Some(value)) => match serde_json::from_value(value) {
                Ok(stored) => selection = stored,
                Err(e) => warn!(error = %e, "stored selection has unexpected shape, starting empty"),
            },
            Ok(None) => {}
            Err(e) => warn!(error = %e, "failed to read stored selection"),
        }

        match self.read_mirror().await {
            Ok(Some(mirror)) => {
                debug!(path = %self.mirror_path.display(), "user mirror validated, taking precedence");
                selection = mirror;
            }
            Ok(None) => {}
            Err(e) => {
                warn!(path = %self.mirror_path.display(), error = %e,
                    "selection mirror rejected, keeping stored selection");
            }
        }

        *self.state.lock().await = selection;
        Ok(())
    }

    async fn read_mirror(&self) -> Result<Option<MonitoredEntities>> {
        let path = self.mirror_path.clone();
        let content = tokio::task::spawn_blocking(move || match std::fs::read_to_string(&path) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        })
        .await?
        .context("mirror read failed")?;

        let Some(content) = content else {
            return Ok(None);
        };
        let parsed = serde_json::from_str::<MonitoredEntities>(&content)
            .context("mirror failed shape validation")?;
        Ok(Some(parsed))
    }

    /// Persist to the structured store and the JSON mirror. The two writes
    /// are not transactional; one of them landing is enough.
    pub async fn save(&self) -> Result<()> {
        let snapshot = self.state.lock().await.clone();
        let value = serde_json::to_value(&snapshot).context("failed to serialize selection")?;

        let store_result = self.store.save(&value).await;
        if let Err(e) = &store_result {
            warn!(error = %e, "structured selection write failed");
        }

        let mirror_path = self.mirror_path.clone();
        let mirror_value = value.clone();
        let mirror_result =
            tokio::task::spawn_blocking(move || atomic_write_json(&mirror_path, &mirror_value))
                .await?;
        if let Err(e) = &mirror_result {
            warn!(error = %e, "selection mirror write failed");
        }

        if store_result.is_err() && mirror_result.is_err() {
            anyhow::bail!("both selection writes failed");
        }
        Ok(())
    }

    /// Ask the AI to pick up to `entity_count` entities worth monitoring,
    /// split into standard and priority tiers. On a valid reply the
    /// AI-selected tiers are replaced wholesale and persisted; on anything
    /// else the current selection is left untouched and `false` is returned.
    pub async fn discover_entities(
        &self,
        ai: &dyn CompletionClient,
        entity_count: usize,
    ) -> Result<bool> {
        let states = self.live.all_states().await.context("entity snapshot failed")?;
        let ignored: HashSet<String> = self.state.lock().await.ignored.iter().cloned().collect();

        let profiles: Vec<EntityProfile> = states
            .iter()
            .filter(|s| !ignored.contains(&s.entity_id))
            .map(|s| EntityProfile {
                entity_id: s.entity_id.clone(),
                friendly_name: s.friendly_name(),
                state: s.state.clone(),
                domain: s.domain().to_string(),
                device_class: s.device_class().unwrap_or("").to_string(),
            })
            .collect();

        let prompt = discovery_prompt(entity_count, &profiles)?;
        let reply = ai
            .complete(&prompt, false)
            .await
            .context("completion request failed")?;

        let Some(selection) = parse_selection(&reply) else {
            warn!("discovery reply did not contain a valid selection, leaving selection unchanged");
            return Ok(false);
        };

        let (standard_count, priority_count);
        {
            let mut state = self.state.lock().await;
            // Re-read under the lock; the ignore list may have moved while
            // the completion call was in flight.
            let ignored: HashSet<String> = state.ignored.iter().cloned().collect();
            state.gpt_selected.standard = selection
                .standard
                .into_iter()
                .filter(|id| !ignored.contains(id))
                .collect();
            state.gpt_selected.priority = selection
                .priority
                .into_iter()
                .filter(|id| !ignored.contains(id))
                .collect();
            standard_count = state.gpt_selected.standard.len();
            priority_count = state.gpt_selected.priority.len();
        }

        self.save().await?;
        info!(standard = standard_count, priority = priority_count, "AI selection applied");
        Ok(true)
    }

    /// Drop every tracked id that no longer exists in the live registry,
    /// and every tier member that is also ignored. Persists only when
    /// something actually changed.
    pub async fn clean_nonexistent(&self) -> Result<bool> {
        let states = self
            .live
            .all_states()
            .await
            .context("entity enumeration failed")?;
        let live_ids: HashSet<String> = states.into_iter().map(|s| s.entity_id).collect();

        let changed;
        {
            let mut state = self.state.lock().await;
            let original = state.clone();

            state.ignored.retain(|id| live_ids.contains(id));
            let ignored: HashSet<String> = state.ignored.iter().cloned().collect();

            prune(&mut state.gpt_selected.standard, &live_ids, &ignored);
            prune(&mut state.gpt_selected.priority, &live_ids, &ignored);
            prune(&mut state.user_added.standard, &live_ids, &ignored);
            prune(&mut state.user_added.priority, &live_ids, &ignored);

            changed = *state != original;
        }

        if changed {
            info!("selection pruned against live entity registry");
            self.save().await?;
        }
        Ok(changed)
    }

    pub async fn entities_for_tier(&self, priority: bool) -> Vec<String> {
        self.state.lock().await.tier(priority)
    }

    pub async fn monitored_entities(&self) -> Vec<String> {
        self.state.lock().await.all_monitored()
    }

    pub async fn snapshot(&self) -> MonitoredEntities {
        self.state.lock().await.clone()
    }

    #[cfg(test)]
    pub(crate) async fn replace_for_tests(&self, selection: MonitoredEntities) {
        *self.state.lock().await = selection;
    }
}

fn prune(list: &mut Vec<String>, live_ids: &HashSet<String>, ignored: &HashSet<String>) {
    list.retain(|id| live_ids.contains(id) && !ignored.contains(id));
}

fn discovery_prompt(entity_count: usize, profiles: &[EntityProfile]) -> Result<String> {
    let catalog = serde_json::to_string(profiles).context("failed to serialize entity snapshot")?;
    Ok(format!(
        "Here is a list of the entities in my home-automation system. \
         Select at most {entity_count} entities that are most worth monitoring for anomalies. \
         Focus on safety-related sensors, key infrastructure, and anything whose unusual \
         behavior would indicate a problem. Split the result into two groups: \
         \"standard\" for entities that can be checked less often, and \"priority\" for \
         entities critical to safety and day-to-day operation that deserve frequent checks. \
         Respond with JSON only, in the form \
         {{\"standard\": [\"entity_id\", ...], \"priority\": [\"entity_id\", ...]}}.\n\n{catalog}"
    ))
}

fn parse_selection(reply: &str) -> Option<DiscoveredSelection> {
    serde_json::from_str(extract_json(reply)).ok()
}

/// Extract JSON from a completion reply, tolerating markdown code fences
/// and conversational framing around the payload.
fn extract_json(reply: &str) -> &str {
    let trimmed = reply.trim();

    if let Some(start) = trimmed.find("```json") {
        let json_start = start + 7;
        if let Some(end) = trimmed[json_start..].find("```") {
            return trimmed[json_start..json_start + end].trim();
        }
    }

    if let Some(start) = trimmed.find("```") {
        let json_start = start + 3;
        let after_tick = &trimmed[json_start..];
        let content_start = after_tick.find('\n').map_or(0, |n| n + 1);
        if let Some(end) = after_tick[content_start..].find("```") {
            return after_tick[content_start..content_start + end].trim();
        }
    }

    if let Some(start) = trimmed.find('{') {
        if let Some(end) = trimmed.rfind('}') {
            return &trimmed[start..=end];
        }
    }

    trimmed
}
