//! Global sensitivity and the false-alarm feedback loop.

use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::detect::AnomalyLedger;
use crate::providers::KeyValueStore;

#[derive(Debug, Serialize, Deserialize)]
struct PersistedSensitivity {
    current_sensitivity: f64,
}

/// One entry of the append-only feedback log.
#[derive(Debug, Serialize, Deserialize)]
pub struct FalseAlarmRecord {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub entity_id: String,
    pub reason: String,
    /// The global sensitivity in effect when the alarm was reported.
    pub sensitivity: f64,
}

/// Owns the global sigma multiplier. Every reported false alarm widens it
/// by one fixed step, clamped to the configured range, so detection grows
/// monotonically less sensitive as complaints accrue.
pub struct SensitivityController {
    store: Arc<dyn KeyValueStore>,
    log_path: PathBuf,
    ledger: Arc<AnomalyLedger>,
    minimum: f64,
    maximum: f64,
    step: f64,
    current: Mutex<f64>,
}

impl SensitivityController {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        log_path: PathBuf,
        ledger: Arc<AnomalyLedger>,
        default_sigma: f64,
        minimum: f64,
        maximum: f64,
        step: f64,
    ) -> Self {
        Self {
            store,
            log_path,
            ledger,
            minimum,
            maximum,
            step,
            current: Mutex::new(default_sigma.clamp(minimum, maximum)),
        }
    }

    /// Adopt the persisted value if one exists; otherwise the configured
    /// default stands. Never fails.
    pub async fn load(&self) {
        match self.store.load().await {
            Ok(Some(value)) => match serde_json::from_value::<PersistedSensitivity>(value) {
                Ok(persisted) => {
                    let clamped = persisted.current_sensitivity.clamp(self.minimum, self.maximum);
                    *self.current.lock().unwrap() = clamped;
                    debug!(sensitivity = clamped, "restored persisted sensitivity");
                }
                Err(e) => warn!(error = %e, "persisted sensitivity has unexpected shape, keeping default"),
            },
            Ok(None) => {}
            Err(e) => warn!(error = %e, "failed to read persisted sensitivity, keeping default"),
        }
    }

    pub fn current(&self) -> f64 {
        *self.current.lock().unwrap()
    }

    /// Record a user-reported false alarm: append to the feedback log, drop
    /// the entity from the accumulated anomalies, widen the sensitivity by
    /// one step, and persist it. Every failure inside is logged and
    /// swallowed; the report itself never errors.
    pub async fn log_false_alarm(&self, entity_id: &str, reason: &str) {
        let at = self.current();
        let record = FalseAlarmRecord {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            entity_id: entity_id.to_string(),
            reason: reason.to_string(),
            sensitivity: at,
        };
        if let Err(e) = self.append_log(&record).await {
            warn!(error = %e, "false-alarm log append failed");
        }

        if self.ledger.dismiss(entity_id) {
            debug!(entity = %entity_id, "dismissed accumulated anomaly");
        }

        let adjusted = (at + self.step).clamp(self.minimum, self.maximum);
        *self.current.lock().unwrap() = adjusted;
        info!(entity = %entity_id, from = at, to = adjusted, "sensitivity widened after false alarm");

        let value = serde_json::json!({ "current_sensitivity": adjusted });
        if let Err(e) = self.store.save(&value).await {
            warn!(error = %e, "failed to persist sensitivity");
        }
    }

    async fn append_log(&self, record: &FalseAlarmRecord) -> Result<()> {
        let line = serde_json::to_string(record)?;
        let path = self.log_path.clone();
        tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let mut file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)?;
            writeln!(file, "{line}")
        })
        .await??;
        Ok(())
    }
}
