//! Baseline models -- per-entity statistical descriptions of normal behavior.

pub mod builder;
pub mod classify;
pub mod store;

pub use self::builder::BaselineBuilder;
pub use self::classify::{classify, EntityClass};
pub use self::store::BaselineStore;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// States observed less often than this fraction of the window are "rare".
/// The evaluator recomputes rarity from `state_counts` with the same cutoff,
/// so the stored `rare_states` map stays consistent by construction.
pub const RARE_FREQUENCY: f64 = 0.05;

/// Flip threshold assigned to binary entities that never left one state in
/// the learning window. A zero tolerance would flag the first flip ever
/// observed as maximally severe.
pub const SINGLE_STATE_FLIP_FLOOR: f64 = 0.01;

/// One persisted baseline entry: the typed model plus the tuning that
/// produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaselineRecord {
    #[serde(flatten)]
    pub model: ModelKind,
    pub tuning: Tuning,
}

/// The per-type statistical model, tagged by the classifier's verdict.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "model", rename_all = "lowercase")]
pub enum ModelKind {
    Numeric(NumericModel),
    Binary(BinaryModel),
    Categorical(CategoricalModel),
}

impl ModelKind {
    pub fn class(&self) -> EntityClass {
        match self {
            ModelKind::Numeric(_) => EntityClass::Numeric,
            ModelKind::Binary(_) => EntityClass::Binary,
            ModelKind::Categorical(_) => EntityClass::Categorical,
        }
    }
}

/// Gaussian-style model for float-valued entities.
///
/// `min_threshold`/`max_threshold` are derived as mean +/- sigma * stddev at
/// build time. The evaluator recomputes them from `sigma` (or the live
/// global sensitivity when `sigma` is absent) so a sensitivity change takes
/// effect without a rebuild.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NumericModel {
    pub mean: f64,
    pub stddev: f64,
    pub min_threshold: f64,
    pub max_threshold: f64,
    #[serde(default)]
    pub sigma: Option<f64>,
}

/// Dominant-state model for on/off-style entities.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BinaryModel {
    pub state_counts: HashMap<String, u64>,
    pub most_common: String,
    /// Historical rate of deviation from `most_common`:
    /// 1 - count(most_common) / total.
    pub flip_threshold: f64,
}

/// Frequency-table model for free-form discrete states.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoricalModel {
    pub state_counts: HashMap<String, u64>,
    pub frequencies: HashMap<String, f64>,
    pub rare_states: HashMap<String, f64>,
}

/// Provenance for a model: the parameters it was built with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tuning {
    pub window_days: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sigma: Option<f64>,
}

/// The full persisted baseline: entity id -> record.
pub type ModelSet = HashMap<String, BaselineRecord>;
