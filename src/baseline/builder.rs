//! Baseline construction -- one batched history fetch, one model per entity.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use tracing::{debug, info};

use crate::baseline::classify::{classify, EntityClass};
use crate::baseline::{
    BaselineRecord, BaselineStore, BinaryModel, CategoricalModel, ModelKind, ModelSet,
    NumericModel, Tuning, RARE_FREQUENCY, SINGLE_STATE_FLIP_FLOOR,
};
use crate::providers::{is_sentinel_state, HistorySource};
use crate::registry::SelectionRegistry;

/// Builds the full baseline for the current selection and overwrites the
/// persisted model set. Entities whose history is missing or empty are
/// skipped; they never abort the batch.
pub struct BaselineBuilder {
    history: Arc<dyn HistorySource>,
    registry: Arc<SelectionRegistry>,
    store: Arc<BaselineStore>,
    sigma_overrides: HashMap<String, f64>,
}

impl BaselineBuilder {
    pub fn new(
        history: Arc<dyn HistorySource>,
        registry: Arc<SelectionRegistry>,
        store: Arc<BaselineStore>,
        sigma_overrides: HashMap<String, f64>,
    ) -> Self {
        Self {
            history,
            registry,
            store,
            sigma_overrides,
        }
    }

    /// Build models for every monitored entity over the trailing window and
    /// persist the result as one atomic overwrite. Entities absent from the
    /// current selection disappear from the new baseline.
    pub async fn build_all(&self, window_days: u32, sigma: f64) -> Result<ModelSet> {
        let entity_ids = self.registry.monitored_entities().await;
        let end = Utc::now();
        let start = end - Duration::days(window_days as i64);

        let histories = self
            .history
            .history(&entity_ids, start, end)
            .await
            .context("history fetch failed")?;

        let mut models = ModelSet::new();
        for entity_id in &entity_ids {
            let Some(raw) = histories.get(entity_id) else {
                debug!(entity = %entity_id, "no history in window, skipping");
                continue;
            };
            let values: Vec<String> = raw
                .iter()
                .filter(|v| !is_sentinel_state(v))
                .cloned()
                .collect();

            let Some(class) = classify(&values) else {
                debug!(entity = %entity_id, "empty history after filtering, skipping");
                continue;
            };

            let record = match class {
                EntityClass::Numeric => {
                    let sigma = self
                        .sigma_overrides
                        .get(entity_id)
                        .copied()
                        .unwrap_or(sigma);
                    BaselineRecord {
                        model: ModelKind::Numeric(numeric_model(&values, sigma)),
                        tuning: Tuning {
                            window_days,
                            sigma: Some(sigma),
                        },
                    }
                }
                EntityClass::Binary => BaselineRecord {
                    model: ModelKind::Binary(binary_model(&values)),
                    tuning: Tuning {
                        window_days,
                        sigma: None,
                    },
                },
                EntityClass::Categorical => BaselineRecord {
                    model: ModelKind::Categorical(categorical_model(&values)),
                    tuning: Tuning {
                        window_days,
                        sigma: None,
                    },
                },
            };
            models.insert(entity_id.clone(), record);
        }

        self.store
            .save(&models)
            .await
            .context("baseline save failed")?;
        info!(
            models = models.len(),
            selected = entity_ids.len(),
            window_days,
            "baseline built"
        );
        Ok(models)
    }
}

fn numeric_model(values: &[String], sigma: f64) -> NumericModel {
    let floats: Vec<f64> = values
        .iter()
        .filter_map(|v| v.trim().parse::<f64>().ok())
        .collect();

    let mean = floats.iter().sum::<f64>() / floats.len() as f64;
    // Population stddev: divide by N. Small windows would overshoot with
    // the sample estimator.
    let variance = floats.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / floats.len() as f64;
    let stddev = variance.sqrt();

    NumericModel {
        mean,
        stddev,
        min_threshold: mean - sigma * stddev,
        max_threshold: mean + sigma * stddev,
        sigma: Some(sigma),
    }
}

fn binary_model(values: &[String]) -> BinaryModel {
    let mut state_counts: HashMap<String, u64> = HashMap::new();
    for value in values {
        *state_counts.entry(value.to_lowercase()).or_default() += 1;
    }

    // Highest count wins; ties break toward the lexicographically smaller
    // state so rebuilds over identical history are stable.
    let (most_common, most_count) = state_counts
        .iter()
        .max_by(|a, b| a.1.cmp(b.1).then_with(|| b.0.cmp(a.0)))
        .map(|(state, count)| (state.clone(), *count))
        .unwrap_or_default();

    let total: u64 = state_counts.values().sum();
    let flip_threshold = if state_counts.len() < 2 {
        SINGLE_STATE_FLIP_FLOOR
    } else {
        1.0 - most_count as f64 / total as f64
    };

    BinaryModel {
        state_counts,
        most_common,
        flip_threshold,
    }
}

fn categorical_model(values: &[String]) -> CategoricalModel {
    let mut state_counts: HashMap<String, u64> = HashMap::new();
    for value in values {
        *state_counts.entry(value.clone()).or_default() += 1;
    }

    let total: u64 = state_counts.values().sum();
    let frequencies: HashMap<String, f64> = state_counts
        .iter()
        .map(|(state, count)| (state.clone(), *count as f64 / total as f64))
        .collect();
    let rare_states: HashMap<String, f64> = frequencies
        .iter()
        .filter(|(_, freq)| **freq < RARE_FREQUENCY)
        .map(|(state, freq)| (state.clone(), *freq))
        .collect();

    CategoricalModel {
        state_counts,
        frequencies,
        rare_states,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::memory::{MemoryHistory, MemoryStates, MemoryStore};
    use crate::registry::{MonitoredEntities, TierList};

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    async fn builder_with(
        series: HashMap<String, Vec<String>>,
        monitored: Vec<&str>,
        dir: &tempfile::TempDir,
    ) -> (BaselineBuilder, Arc<BaselineStore>) {
        let live = Arc::new(MemoryStates::new(vec![]));
        let registry = Arc::new(SelectionRegistry::new(
            Arc::new(MemoryStore::default()),
            dir.path().join("monitored_entities_user.json"),
            live,
        ));
        registry
            .replace_for_tests(MonitoredEntities {
                user_added: TierList {
                    standard: monitored.iter().map(|s| s.to_string()).collect(),
                    priority: vec![],
                },
                ..Default::default()
            })
            .await;

        let store = Arc::new(BaselineStore::new(dir.path().join("baseline.json")));
        let builder = BaselineBuilder::new(
            Arc::new(MemoryHistory::new(series)),
            registry,
            store.clone(),
            HashMap::new(),
        );
        (builder, store)
    }

    #[test]
    fn test_numeric_threshold_symmetry() {
        let values = strings(&["10.0", "12.0", "14.0", "16.0", "18.0"]);
        let model = numeric_model(&values, 3.0);

        assert_eq!(model.mean, 14.0);
        let upper = model.max_threshold - model.mean;
        let lower = model.mean - model.min_threshold;
        assert!((upper - lower).abs() < 1e-9);
        assert!((upper - 3.0 * model.stddev).abs() < 1e-9);
    }

    #[test]
    fn test_numeric_population_stddev() {
        // Population stddev of [2, 4, 4, 4, 5, 5, 7, 9] is exactly 2.
        let values = strings(&["2", "4", "4", "4", "5", "5", "7", "9"]);
        let model = numeric_model(&values, 2.0);
        assert!((model.stddev - 2.0).abs() < 1e-9);
        assert_eq!(model.mean, 5.0);
        assert_eq!(model.min_threshold, 1.0);
        assert_eq!(model.max_threshold, 9.0);
    }

    #[test]
    fn test_numeric_constant_series_has_zero_width() {
        let values = vec!["20.0".to_string(); 50];
        let model = numeric_model(&values, 3.0);
        assert_eq!(model.mean, 20.0);
        assert_eq!(model.stddev, 0.0);
        assert_eq!(model.min_threshold, 20.0);
        assert_eq!(model.max_threshold, 20.0);
    }

    #[test]
    fn test_binary_flip_threshold() {
        let mut values = vec!["off".to_string(); 90];
        values.extend(vec!["on".to_string(); 10]);
        let model = binary_model(&values);

        assert_eq!(model.most_common, "off");
        assert!((model.flip_threshold - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_binary_single_state_floor() {
        let values = vec!["off".to_string(); 40];
        let model = binary_model(&values);
        assert_eq!(model.flip_threshold, SINGLE_STATE_FLIP_FLOOR);
    }

    #[test]
    fn test_binary_counts_case_insensitively() {
        let values = strings(&["On", "ON", "off"]);
        let model = binary_model(&values);
        assert_eq!(model.state_counts["on"], 2);
        assert_eq!(model.most_common, "on");
    }

    #[test]
    fn test_categorical_rare_states_match_frequencies() {
        let mut values = vec!["idle".to_string(); 95];
        values.extend(vec!["alarm".to_string(); 5]);
        values.extend(vec!["fault".to_string(); 2]);
        let model = categorical_model(&values);

        // 5/102 and 2/102 are both under the 5% cutoff.
        assert!(model.rare_states.contains_key("alarm"));
        assert!(model.rare_states.contains_key("fault"));
        assert!(!model.rare_states.contains_key("idle"));
        for (state, freq) in &model.rare_states {
            assert_eq!(model.frequencies[state], *freq);
        }
    }

    #[tokio::test]
    async fn test_build_all_skips_missing_history() {
        let dir = tempfile::TempDir::new().unwrap();
        let series = HashMap::from([(
            "sensor.good".to_string(),
            strings(&["1.0", "2.0", "3.0"]),
        )]);
        let (builder, store) =
            builder_with(series, vec!["sensor.good", "sensor.unrecorded"], &dir).await;

        let models = builder.build_all(14, 3.0).await.unwrap();
        assert_eq!(models.len(), 1);
        assert!(models.contains_key("sensor.good"));

        let persisted = store.load().await.unwrap().unwrap();
        assert_eq!(persisted.len(), 1);
    }

    #[tokio::test]
    async fn test_build_all_skips_sentinel_only_history() {
        let dir = tempfile::TempDir::new().unwrap();
        let series = HashMap::from([(
            "sensor.flaky".to_string(),
            strings(&["unavailable", "unknown", "unavailable"]),
        )]);
        let (builder, _) = builder_with(series, vec!["sensor.flaky"], &dir).await;

        let models = builder.build_all(7, 3.0).await.unwrap();
        assert!(models.is_empty());
    }

    #[tokio::test]
    async fn test_build_all_overwrites_previous_set() {
        let dir = tempfile::TempDir::new().unwrap();
        let series = HashMap::from([
            ("sensor.kept".to_string(), strings(&["1.0", "2.0"])),
            ("sensor.dropped".to_string(), strings(&["5.0", "6.0"])),
        ]);
        let (builder, store) =
            builder_with(series.clone(), vec!["sensor.kept", "sensor.dropped"], &dir).await;
        builder.build_all(7, 3.0).await.unwrap();
        assert_eq!(store.load().await.unwrap().unwrap().len(), 2);

        // Rebuild with a narrower selection: the dropped entity vanishes.
        let (builder, store2) = builder_with(series, vec!["sensor.kept"], &dir).await;
        builder.build_all(7, 3.0).await.unwrap();
        let persisted = store2.load().await.unwrap().unwrap();
        assert_eq!(persisted.len(), 1);
        assert!(persisted.contains_key("sensor.kept"));
    }

    #[tokio::test]
    async fn test_build_all_applies_sigma_override() {
        let dir = tempfile::TempDir::new().unwrap();
        let series = HashMap::from([(
            "sensor.tight".to_string(),
            strings(&["10.0", "12.0", "14.0", "16.0", "18.0"]),
        )]);
        let live = Arc::new(MemoryStates::new(vec![]));
        let registry = Arc::new(SelectionRegistry::new(
            Arc::new(MemoryStore::default()),
            dir.path().join("monitored_entities_user.json"),
            live,
        ));
        registry
            .replace_for_tests(MonitoredEntities {
                user_added: TierList {
                    standard: vec!["sensor.tight".into()],
                    priority: vec![],
                },
                ..Default::default()
            })
            .await;

        let store = Arc::new(BaselineStore::new(dir.path().join("baseline.json")));
        let builder = BaselineBuilder::new(
            Arc::new(MemoryHistory::new(series)),
            registry,
            store,
            HashMap::from([("sensor.tight".to_string(), 1.5)]),
        );

        let models = builder.build_all(7, 3.0).await.unwrap();
        match &models["sensor.tight"].model {
            ModelKind::Numeric(m) => {
                assert_eq!(m.sigma, Some(1.5));
                assert!((m.max_threshold - (m.mean + 1.5 * m.stddev)).abs() < 1e-9);
            }
            _ => panic!("expected numeric model"),
        }
        assert_eq!(models["sensor.tight"].tuning.sigma, Some(1.5));
    }
}
