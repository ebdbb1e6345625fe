//! sensorwarden -- statistical anomaly detection for home-automation sensor fleets.
//!
//! This crate watches a Home Assistant installation from the outside: it
//! learns per-entity baselines of normal behavior from recorded state
//! history, persists them as JSON, and flags live states that deviate.
//! Entity selection is AI-assisted, and a feedback loop desensitizes
//! detection as false alarms are reported.

pub mod baseline;
pub mod config;
pub mod detect;
pub mod providers;
pub mod registry;
pub mod storage;
pub mod warden;
