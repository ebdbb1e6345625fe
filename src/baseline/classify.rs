//! Entity classification -- deciding what kind of variable a state series is.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// Fraction of values that must parse as floats for a numeric verdict.
const NUMERIC_PARSE_RATIO: f64 = 0.8;

/// The vocabulary that marks an entity as binary.
const BINARY_STATES: [&str; 4] = ["on", "off", "true", "false"];

/// The classifier's verdict for one entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityClass {
    Numeric,
    Binary,
    Categorical,
}

impl std::fmt::Display for EntityClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntityClass::Numeric => write!(f, "numeric"),
            EntityClass::Binary => write!(f, "binary"),
            EntityClass::Categorical => write!(f, "categorical"),
        }
    }
}

/// Classify a series of observed state values.
///
/// Returns `None` for an empty series: with no observations there is no
/// model to build, and callers skip the entity.
pub fn classify(values: &[String]) -> Option<EntityClass> {
    if values.is_empty() {
        return None;
    }

    let numeric_count = values
        .iter()
        .filter(|v| v.trim().parse::<f64>().is_ok())
        .count();
    if numeric_count as f64 / values.len() as f64 >= NUMERIC_PARSE_RATIO {
        return Some(EntityClass::Numeric);
    }

    let distinct: HashSet<String> = values.iter().map(|v| v.to_lowercase()).collect();
    if distinct.iter().all(|v| BINARY_STATES.contains(&v.as_str())) {
        return Some(EntityClass::Binary);
    }

    Some(EntityClass::Categorical)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_empty_series_has_no_verdict() {
        assert_eq!(classify(&[]), None);
    }

    #[test]
    fn test_all_floats_is_numeric() {
        let values = strings(&["20.0", "20.5", "21.1", "19.8"]);
        assert_eq!(classify(&values), Some(EntityClass::Numeric));
    }

    #[test]
    fn test_numeric_ratio_boundary() {
        // Exactly 80% parseable: still numeric.
        let values = strings(&["1.0", "2.0", "3.0", "4.0", "weird"]);
        assert_eq!(classify(&values), Some(EntityClass::Numeric));

        // Below 80%: falls through to categorical.
        let values = strings(&["1.0", "2.0", "3.0", "weird", "weird"]);
        assert_eq!(classify(&values), Some(EntityClass::Categorical));
    }

    #[test]
    fn test_on_off_is_binary() {
        let values = strings(&["on", "off", "on", "ON", "Off"]);
        assert_eq!(classify(&values), Some(EntityClass::Binary));
    }

    #[test]
    fn test_true_false_is_binary() {
        let values = strings(&["true", "false", "true"]);
        assert_eq!(classify(&values), Some(EntityClass::Binary));
    }

    #[test]
    fn test_mixed_states_are_categorical() {
        let values = strings(&["idle", "cleaning", "docked", "idle"]);
        assert_eq!(classify(&values), Some(EntityClass::Categorical));
    }

    #[test]
    fn test_binary_vocabulary_plus_other_state_is_categorical() {
        let values = strings(&["on", "off", "standby"]);
        assert_eq!(classify(&values), Some(EntityClass::Categorical));
    }

    #[test]
    fn test_order_independent() {
        let mut values = strings(&["1.0", "2.0", "3.0", "4.0", "weird"]);
        let forward = classify(&values);
        values.reverse();
        assert_eq!(classify(&values), forward);
    }
}
