//! Live-state evaluation against stored baselines.

use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use tracing::{debug, warn};

use crate::baseline::{
    BaselineRecord, BaselineStore, BinaryModel, CategoricalModel, NumericModel, RARE_FREQUENCY,
};
use crate::detect::sensitivity::SensitivityController;
use crate::detect::{Anomaly, AnomalyDetail, AnomalyLedger, Severity};
use crate::providers::{is_sentinel_state, EntityState, LiveStateSource};
use crate::registry::SelectionRegistry;

/// Rare-state frequencies below these grade medium and high.
const RARE_ELEVATED: f64 = 0.02;
const RARE_SEVERE: f64 = 0.01;

/// Flip-threshold breakpoints for binary severity: the rarer a flip was
/// historically, the more a deviation matters. Everything beyond `medium`
/// floors at low severity.
#[derive(Debug, Clone)]
pub struct BinaryCutoffs {
    pub high: f64,
    pub medium: f64,
}

impl Default for BinaryCutoffs {
    fn default() -> Self {
        Self {
            high: 0.05,
            medium: 0.1,
        }
    }
}

/// Sweeps live states against the persisted baseline and grades deviations.
pub struct AnomalyEvaluator {
    store: Arc<BaselineStore>,
    live: Arc<dyn LiveStateSource>,
    registry: Arc<SelectionRegistry>,
    sensitivity: Arc<SensitivityController>,
    cutoffs: BinaryCutoffs,
    ledger: Arc<AnomalyLedger>,
}

impl AnomalyEvaluator {
    pub fn new(
        store: Arc<BaselineStore>,
        live: Arc<dyn LiveStateSource>,
        registry: Arc<SelectionRegistry>,
        sensitivity: Arc<SensitivityController>,
        cutoffs: BinaryCutoffs,
        ledger: Arc<AnomalyLedger>,
    ) -> Self {
        Self {
            store,
            live,
            registry,
            sensitivity,
            cutoffs,
            ledger,
        }
    }

    /// Sweep every modeled entity.
    pub async fn detect(&self) -> Result<Vec<Anomaly>> {
        self.sweep(None).await
    }

    /// Sweep only the standard (`false`) or priority (`true`) tier.
    pub async fn detect_by_priority(&self, priority: bool) -> Result<Vec<Anomaly>> {
        self.sweep(Some(priority)).await
    }

    async fn sweep(&self, tier: Option<bool>) -> Result<Vec<Anomaly>> {
        let Some(models) = self.store.load().await? else {
            warn!("no baseline available, skipping anomaly sweep");
            return Ok(Vec::new());
        };

        let targets: Vec<String> = match tier {
            None => models.keys().cloned().collect(),
            Some(priority) => self.registry.entities_for_tier(priority).await,
        };

        let mut found = Vec::new();
        for entity_id in &targets {
            let Some(record) = models.get(entity_id) else {
                continue;
            };
            let state = match self.live.state(entity_id).await {
                Ok(Some(state)) => state,
                Ok(None) => {
                    debug!(entity = %entity_id, "no live state, skipping");
                    continue;
                }
                Err(e) => {
                    warn!(entity = %entity_id, error = %e, "live state lookup failed, skipping");
                    continue;
                }
            };
            if is_sentinel_state(&state.state) {
                continue;
            }

            if let Some(anomaly) = self.evaluate(entity_id, record, &state) {
                warn!(
                    entity = %entity_id,
                    severity = %anomaly.severity,
                    value = %anomaly.current_value,
                    "anomaly detected"
                );
                found.push(anomaly);
            }
        }

        self.ledger.record(&found);
        Ok(found)
    }

    fn evaluate(
        &self,
        entity_id: &str,
        record: &BaselineRecord,
        state: &EntityState,
    ) -> Option<Anomaly> {
        let (severity, detail) = match &record.model {
            crate::baseline::ModelKind::Numeric(model) => self.check_numeric(model, &state.state)?,
            crate::baseline::ModelKind::Binary(model) => {
                check_binary(model, &state.state, &self.cutoffs)?
            }
            crate::baseline::ModelKind::Categorical(model) => {
                check_categorical(model, &state.state)?
            }
        };

        Some(Anomaly {
            entity_id: entity_id.to_string(),
            friendly_name: state.friendly_name(),
            current_value: state.state.clone(),
            class: record.model.class(),
            severity,
            detected_at: Utc::now(),
            detail,
        })
    }

    fn check_numeric(&self, model: &NumericModel, raw: &str) -> Option<(Severity, AnomalyDetail)> {
        let value: f64 = raw.trim().parse().ok()?;

        // Recompute the window from the model's sigma, or the live global
        // sensitivity when it has none, so a sensitivity change applies
        // without a rebuild. The precomputed thresholds are informational.
        let sigma = model
            .sigma
            .unwrap_or_else(|| self.sensitivity.current());
        let expected_low = model.mean - sigma * model.stddev;
        let expected_high = model.mean + sigma * model.stddev;
        if value >= expected_low && value <= expected_high {
            return None;
        }

        let z_score = if model.stddev > 0.0 {
            (value - model.mean).abs() / model.stddev
        } else {
            0.0
        };
        let deviation_pct = if model.mean.abs() > f64::EPSILON {
            (value - model.mean) / model.mean * 100.0
        } else {
            0.0
        };

        let severity = if z_score > 5.0 {
            Severity::Critical
        } else if z_score > 4.0 {
            Severity::High
        } else if z_score > 3.0 {
            Severity::Medium
        } else {
            Severity::Low
        };

        Some((
            severity,
            AnomalyDetail::Numeric {
                z_score,
                deviation_pct,
                expected_low,
                expected_high,
            },
        ))
    }
}

/// A binary entity away from its dominant state is always anomalous; the
/// stored flip rate only grades how unusual that is. The live sensitivity
/// plays no part here.
fn check_binary(
    model: &BinaryModel,
    current: &str,
    cutoffs: &BinaryCutoffs,
) -> Option<(Severity, AnomalyDetail)> {
    if current.eq_ignore_ascii_case(&model.most_common) {
        return None;
    }

    let flip_threshold = model.flip_threshold;
    let severity = if flip_threshold <= cutoffs.high {
        Severity::High
    } else if flip_threshold <= cutoffs.medium {
        Severity::Medium
    } else {
        Severity::Low
    };

    Some((
        severity,
        AnomalyDetail::Binary {
            expected_state: model.most_common.clone(),
            flip_threshold,
        },
    ))
}

fn check_categorical(model: &CategoricalModel, current: &str) -> Option<(Severity, AnomalyDetail)> {
    // Rarity is recomputed from the stored counts rather than read from the
    // rare_states map, so the two cannot drift apart.
    let total: u64 = model.state_counts.values().sum();
    match model.state_counts.get(current) {
        None => Some((Severity::High, AnomalyDetail::Categorical { frequency: None })),
        Some(&count) if total > 0 => {
            let frequency = count as f64 / total as f64;
            if frequency < RARE_FREQUENCY {
                let severity = if frequency < RARE_SEVERE {
                    Severity::High
                } else if frequency < RARE_ELEVATED {
                    Severity::Medium
                } else {
                    Severity::Low
                };
                Some((severity, AnomalyDetail::Categorical { frequency: Some(frequency) }))
            } else {
                None
            }
        }
        Some(_) => None,
    }
}
