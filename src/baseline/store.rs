//! Durable persistence for the baseline model set.

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tracing::warn;

use crate::baseline::ModelSet;
use crate::storage::atomic_write_json;

/// The baseline file: one JSON document mapping entity id to model record.
///
/// Saves replace the whole file atomically; a reader sees either the
/// previous complete model set or the new one, never a mix. An absent or
/// corrupt file reads as "no baseline yet".
pub struct BaselineStore {
    path: PathBuf,
}

impl BaselineStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Overwrite the persisted model set.
    pub async fn save(&self, models: &ModelSet) -> Result<()> {
        let path = self.path.clone();
        let value = serde_json::to_value(models).context("failed to serialize baseline")?;
        tokio::task::spawn_blocking(move || atomic_write_json(&path, &value)).await?
    }

    /// Load the persisted model set. `None` means no usable baseline exists.
    pub async fn load(&self) -> Result<Option<ModelSet>> {
        let path = self.path.clone();
        let content = tokio::task::spawn_blocking(move || match std::fs::read_to_string(&path) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        })
        .await?
        .context("baseline read failed")?;

        let Some(content) = content else {
            return Ok(None);
        };

        match serde_json::from_str(&content) {
            Ok(models) => Ok(Some(models)),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "baseline file is corrupt, treating as absent");
                Ok(None)
            }
        }
    }

    /// Age of the baseline in whole days, from the file's mtime.
    /// `None` when no baseline file exists.
    pub async fn age_days(&self) -> Option<i64> {
        let path = self.path.clone();
        let modified = tokio::task::spawn_blocking(move || {
            std::fs::metadata(&path).and_then(|m| m.modified()).ok()
        })
        .await
        .ok()??;

        let modified: DateTime<Utc> = modified.into();
        Some((Utc::now() - modified).num_days())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::baseline::{BaselineRecord, BinaryModel, ModelKind, Tuning};
    use std::collections::HashMap;

    fn sample_models() -> ModelSet {
        let mut models = ModelSet::new();
        models.insert(
            "binary_sensor.front_door".to_string(),
            BaselineRecord {
                model: ModelKind::Binary(BinaryModel {
                    state_counts: HashMap::from([("off".to_string(), 95), ("on".to_string(), 5)]),
                    most_common: "off".to_string(),
                    flip_threshold: 0.05,
                }),
                tuning: Tuning {
                    window_days: 14,
                    sigma: None,
                },
            },
        );
        models
    }

    #[tokio::test]
    async fn test_save_load_roundtrip() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = BaselineStore::new(dir.path().join("baseline.json"));

        let models = sample_models();
        store.save(&models).await.unwrap();

        let loaded = store.load().await.unwrap().unwrap();
        assert_eq!(loaded.len(), 1);
        match &loaded["binary_sensor.front_door"].model {
            ModelKind::Binary(m) => {
                assert_eq!(m.most_common, "off");
                assert_eq!(m.flip_threshold, 0.05);
            }
            _ => panic!("expected binary model"),
        }
    }

    #[tokio::test]
    async fn test_absent_file_is_no_baseline() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = BaselineStore::new(dir.path().join("baseline.json"));
        assert!(store.load().await.unwrap().is_none());
        assert_eq!(store.age_days().await, None);
    }

    #[tokio::test]
    async fn test_corrupt_file_is_no_baseline() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("baseline.json");
        std::fs::write(&path, "[[[").unwrap();

        let store = BaselineStore::new(path);
        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_fresh_file_age_is_zero_days() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = BaselineStore::new(dir.path().join("baseline.json"));
        store.save(&ModelSet::new()).await.unwrap();
        assert_eq!(store.age_days().await, Some(0));
    }
}
