//! Anomaly records, severity ordering, and the accumulated ledger.

pub mod evaluator;
pub mod sensitivity;

pub use self::evaluator::AnomalyEvaluator;
pub use self::sensitivity::SensitivityController;

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::baseline::EntityClass;

/// Ordinal anomaly importance. Derived ordering follows declaration order,
/// so `Low < Medium < High < Critical`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Low => write!(f, "low"),
            Severity::Medium => write!(f, "medium"),
            Severity::High => write!(f, "high"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

/// A detected deviation from an entity's baseline.
#[derive(Debug, Clone, Serialize)]
pub struct Anomaly {
    pub entity_id: String,
    pub friendly_name: String,
    pub current_value: String,
    #[serde(rename = "type")]
    pub class: EntityClass,
    pub severity: Severity,
    pub detected_at: DateTime<Utc>,
    #[serde(flatten)]
    pub detail: AnomalyDetail,
}

/// Model-type-specific evidence attached to an anomaly.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum AnomalyDetail {
    Numeric {
        z_score: f64,
        deviation_pct: f64,
        expected_low: f64,
        expected_high: f64,
    },
    Binary {
        expected_state: String,
        flip_threshold: f64,
    },
    Categorical {
        #[serde(skip_serializing_if = "Option::is_none")]
        frequency: Option<f64>,
    },
}

/// Anomalies accumulated across sweeps, deduplicated by entity id.
/// Entries leave only through a false-alarm report.
///
/// Sweeps on independent timers may overlap, so the check-then-append runs
/// under one lock acquisition.
#[derive(Debug, Default)]
pub struct AnomalyLedger {
    entries: Mutex<Vec<Anomaly>>,
    last_anomaly_time: Mutex<Option<DateTime<Utc>>>,
}

impl AnomalyLedger {
    /// Append the sweep's findings, skipping entities already present, and
    /// stamp the last-anomaly time. A no-anomaly sweep leaves both alone.
    pub fn record(&self, batch: &[Anomaly]) {
        if batch.is_empty() {
            return;
        }
        let mut entries = self.entries.lock().unwrap();
        for anomaly in batch {
            if !entries.iter().any(|e| e.entity_id == anomaly.entity_id) {
                entries.push(anomaly.clone());
            }
        }
        *self.last_anomaly_time.lock().unwrap() = Some(Utc::now());
    }

    /// Remove every accumulated anomaly for `entity_id`. Returns whether
    /// anything was removed.
    pub fn dismiss(&self, entity_id: &str) -> bool {
        let mut entries = self.entries.lock().unwrap();
        let before = entries.len();
        entries.retain(|a| a.entity_id != entity_id);
        entries.len() != before
    }

    pub fn snapshot(&self) -> Vec<Anomaly> {
        self.entries.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn last_anomaly_time(&self) -> Option<DateTime<Utc>> {
        *self.last_anomaly_time.lock().unwrap()
    }
}
