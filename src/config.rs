//! TOML configuration for sensorwarden.
//!
//! A layered configuration model with sensible defaults, environment
//! variable override for the config file path, and a standard filesystem
//! location.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Root configuration for the sensorwarden process.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WardenConfig {
    #[serde(default)]
    pub home_assistant: HomeAssistantConfig,
    #[serde(default)]
    pub openai: OpenAiConfig,
    #[serde(default)]
    pub detection: DetectionConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl WardenConfig {
    /// Load configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        info!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    /// Try to load configuration from, in order:
    /// 1. The path specified by the `SENSORWARDEN_CONFIG` environment variable.
    /// 2. `/etc/sensorwarden/sensorwarden.toml`.
    /// 3. Fall back to compiled-in defaults.
    pub fn load_or_default() -> Self {
        if let Ok(env_path) = std::env::var("SENSORWARDEN_CONFIG") {
            let path = Path::new(&env_path);
            match Self::load(path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "SENSORWARDEN_CONFIG set but file could not be loaded, trying fallback"
                    );
                }
            }
        }

        let system_path = Path::new("/etc/sensorwarden/sensorwarden.toml");
        if system_path.exists() {
            match Self::load(system_path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %system_path.display(),
                        error = %e,
                        "system config file exists but could not be loaded, using defaults"
                    );
                }
            }
        }

        debug!("no config file found, using compiled-in defaults");
        Self::default()
    }
}

// ---------------------------------------------------------------------------
// Home Assistant
// ---------------------------------------------------------------------------

/// Connection to the watched Home Assistant instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HomeAssistantConfig {
    /// Base URL of the instance, without trailing slash.
    pub base_url: String,
    /// Long-lived access token. `HASS_TOKEN` in the environment wins.
    pub token: String,
}

impl Default for HomeAssistantConfig {
    fn default() -> Self {
        Self {
            base_url: "http://homeassistant.local:8123".to_string(),
            token: String::new(),
        }
    }
}

impl HomeAssistantConfig {
    pub fn resolved_token(&self) -> String {
        std::env::var("HASS_TOKEN").unwrap_or_else(|_| self.token.clone())
    }
}

// ---------------------------------------------------------------------------
// OpenAI
// ---------------------------------------------------------------------------

/// The completion API used for entity discovery.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenAiConfig {
    /// API key. `OPENAI_API_KEY` in the environment wins.
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    /// Cheaper model used for cost-optimized calls.
    pub fallback_model: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://api.openai.com".to_string(),
            model: "gpt-4.1-mini".to_string(),
            fallback_model: "gpt-4.1-nano".to_string(),
            max_tokens: 2000,
            temperature: 0.3,
        }
    }
}

impl OpenAiConfig {
    pub fn resolved_api_key(&self) -> String {
        std::env::var("OPENAI_API_KEY").unwrap_or_else(|_| self.api_key.clone())
    }
}

// ---------------------------------------------------------------------------
// Detection
// ---------------------------------------------------------------------------

/// Baseline and evaluation tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Trailing history window used when building baselines (days).
    pub window_days: u32,
    /// Default sigma multiplier on standard deviation.
    pub sigma: f64,
    /// Clamp range for the global sensitivity.
    pub sigma_min: f64,
    pub sigma_max: f64,
    /// How far one false-alarm report widens the sensitivity.
    pub false_alarm_step: f64,
    /// How many entities to ask the AI for during discovery.
    pub entity_count: usize,
    /// Per-entity sigma overrides, keyed by entity id.
    pub sigma_overrides: HashMap<String, f64>,
    /// Binary severity cutoffs on the stored flip threshold. At or below
    /// `binary_high_cutoff` grades high, at or below `binary_medium_cutoff`
    /// grades medium, anything flappier floors at low.
    pub binary_high_cutoff: f64,
    pub binary_medium_cutoff: f64,
    /// Baselines older than this are flagged as stale (informational only).
    pub baseline_stale_days: i64,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            window_days: 14,
            sigma: 3.0,
            sigma_min: 1.0,
            sigma_max: 10.0,
            false_alarm_step: 0.25,
            entity_count: 20,
            sigma_overrides: HashMap::new(),
            binary_high_cutoff: 0.05,
            binary_medium_cutoff: 0.1,
            baseline_stale_days: 30,
        }
    }
}

// ---------------------------------------------------------------------------
// Schedule
// ---------------------------------------------------------------------------

/// Sweep cadence for watch mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Interval between standard-tier sweeps (seconds).
    pub standard_interval_secs: u64,
    /// Interval between priority-tier sweeps (seconds).
    pub priority_interval_secs: u64,
    /// Interval between cleanup passes against the live registry (seconds).
    pub cleanup_interval_secs: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            standard_interval_secs: 1800,
            priority_interval_secs: 300,
            cleanup_interval_secs: 86_400,
        }
    }
}

// ---------------------------------------------------------------------------
// Storage
// ---------------------------------------------------------------------------

/// Where the persisted artifacts live.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("/var/lib/sensorwarden"),
        }
    }
}

impl StorageConfig {
    pub fn baseline_path(&self) -> PathBuf {
        self.data_dir.join("baseline.json")
    }

    pub fn selection_store_path(&self) -> PathBuf {
        self.data_dir.join("monitored_entities.json")
    }

    /// The user-editable selection mirror.
    pub fn selection_mirror_path(&self) -> PathBuf {
        self.data_dir.join("monitored_entities_user.json")
    }

    pub fn sensitivity_store_path(&self) -> PathBuf {
        self.data_dir.join("sensitivity.json")
    }

    pub fn false_alarm_log_path(&self) -> PathBuf {
        self.data_dir.join("false_alarms.jsonl")
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Minimum tracing level (`trace`, `debug`, `info`, `warn`, `error`).
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_sane() {
        let cfg = WardenConfig::default();

        assert_eq!(cfg.home_assistant.base_url, "http://homeassistant.local:8123");
        assert!(cfg.home_assistant.token.is_empty());

        assert_eq!(cfg.openai.model, "gpt-4.1-mini");
        assert_eq!(cfg.openai.max_tokens, 2000);

        assert_eq!(cfg.detection.window_days, 14);
        assert_eq!(cfg.detection.sigma, 3.0);
        assert_eq!(cfg.detection.sigma_min, 1.0);
        assert_eq!(cfg.detection.sigma_max, 10.0);
        assert_eq!(cfg.detection.false_alarm_step, 0.25);
        assert_eq!(cfg.detection.entity_count, 20);
        assert_eq!(cfg.detection.binary_high_cutoff, 0.05);
        assert_eq!(cfg.detection.binary_medium_cutoff, 0.1);
        assert_eq!(cfg.detection.baseline_stale_days, 30);

        assert_eq!(cfg.schedule.standard_interval_secs, 1800);
        assert_eq!(cfg.schedule.priority_interval_secs, 300);
        assert_eq!(cfg.schedule.cleanup_interval_secs, 86_400);

        assert_eq!(cfg.storage.data_dir, PathBuf::from("/var/lib/sensorwarden"));
        assert_eq!(
            cfg.storage.baseline_path(),
            PathBuf::from("/var/lib/sensorwarden/baseline.json")
        );

        assert_eq!(cfg.logging.level, "info");
    }

    #[test]
    fn test_parse_example_toml() {
        let toml_str = r#"
[home_assistant]
base_url = "http://10.0.0.5:8123"
token = "abc123"

[openai]
api_key = "sk-test"
model = "gpt-4.1"
fallback_model = "gpt-4.1-mini"
max_tokens = 1000
temperature = 0.1

[detection]
window_days = 7
sigma = 2.5
entity_count = 30

[detection.sigma_overrides]
"sensor.fridge_temp" = 1.5

[schedule]
standard_interval_secs = 900
priority_interval_secs = 120

[storage]
data_dir = "/tmp/warden"

[logging]
level = "debug"
"#;

        let cfg: WardenConfig = toml::from_str(toml_str).unwrap();

        assert_eq!(cfg.home_assistant.base_url, "http://10.0.0.5:8123");
        assert_eq!(cfg.openai.model, "gpt-4.1");
        assert_eq!(cfg.detection.window_days, 7);
        assert_eq!(cfg.detection.sigma, 2.5);
        assert_eq!(cfg.detection.entity_count, 30);
        assert_eq!(cfg.detection.sigma_overrides["sensor.fridge_temp"], 1.5);
        assert_eq!(cfg.schedule.standard_interval_secs, 900);
        assert_eq!(cfg.schedule.priority_interval_secs, 120);
        assert_eq!(cfg.storage.data_dir, PathBuf::from("/tmp/warden"));
        assert_eq!(cfg.logging.level, "debug");
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let toml_str = r#"
[detection]
sigma = 4.0
"#;

        let cfg: WardenConfig = toml::from_str(toml_str).unwrap();

        assert_eq!(cfg.detection.sigma, 4.0);
        // Everything else should be defaults.
        assert_eq!(cfg.detection.window_days, 14);
        assert_eq!(cfg.home_assistant.base_url, "http://homeassistant.local:8123");
        assert_eq!(cfg.schedule.priority_interval_secs, 300);
    }

    #[test]
    fn test_empty_toml_uses_all_defaults() {
        let cfg: WardenConfig = toml::from_str("").unwrap();
        let defaults = WardenConfig::default();

        assert_eq!(cfg.detection.sigma, defaults.detection.sigma);
        assert_eq!(cfg.storage.data_dir, defaults.storage.data_dir);
        assert_eq!(cfg.openai.model, defaults.openai.model);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("sensorwarden.toml");
        std::fs::write(
            &path,
            r#"
[detection]
window_days = 21
"#,
        )
        .unwrap();

        let cfg = WardenConfig::load(&path).unwrap();
        assert_eq!(cfg.detection.window_days, 21);
    }

    #[test]
    fn test_load_missing_file_errors() {
        let result = WardenConfig::load(Path::new("/nonexistent/path/sensorwarden.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn test_serialization_roundtrip() {
        let cfg = WardenConfig::default();
        let toml_str = toml::to_string_pretty(&cfg).unwrap();
        let roundtripped: WardenConfig = toml::from_str(&toml_str).unwrap();

        assert_eq!(cfg.detection.sigma, roundtripped.detection.sigma);
        assert_eq!(cfg.schedule.cleanup_interval_secs, roundtripped.schedule.cleanup_interval_secs);
        assert_eq!(cfg.storage.data_dir, roundtripped.storage.data_dir);
    }
}
