//! The coordinator -- wires selection, building, evaluation, and feedback
//! together and owns the error boundary toward the caller.
//!
//! Every public operation catches its own failures and degrades to an
//! empty/false/None result with a log entry. Nothing escapes to the caller
//! as a panic or error from a routine sweep.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use crate::baseline::{BaselineBuilder, BaselineStore, ModelSet};
use crate::config::{DetectionConfig, ScheduleConfig, WardenConfig};
use crate::detect::evaluator::BinaryCutoffs;
use crate::detect::{Anomaly, AnomalyEvaluator, AnomalyLedger, SensitivityController, Severity};
use crate::providers::hass::HassClient;
use crate::providers::openai::OpenAiClient;
use crate::providers::{CompletionClient, HistorySource, KeyValueStore, LiveStateSource};
use crate::registry::{MonitoredEntities, SelectionRegistry};
use crate::storage::JsonFileStore;

pub struct Warden {
    registry: Arc<SelectionRegistry>,
    builder: BaselineBuilder,
    evaluator: AnomalyEvaluator,
    sensitivity: Arc<SensitivityController>,
    ledger: Arc<AnomalyLedger>,
    store: Arc<BaselineStore>,
    ai: Arc<dyn CompletionClient>,
    detection: DetectionConfig,
    schedule: ScheduleConfig,
}

impl Warden {
    /// Assemble a warden from explicit dependencies. Production callers go
    /// through [`Warden::from_config`]; tests inject in-memory providers.
    pub fn new(
        config: &WardenConfig,
        live: Arc<dyn LiveStateSource>,
        history: Arc<dyn HistorySource>,
        ai: Arc<dyn CompletionClient>,
        selection_store: Arc<dyn KeyValueStore>,
        sensitivity_store: Arc<dyn KeyValueStore>,
    ) -> Self {
        let ledger = Arc::new(AnomalyLedger::default());
        let store = Arc::new(BaselineStore::new(config.storage.baseline_path()));
        let registry = Arc::new(SelectionRegistry::new(
            selection_store,
            config.storage.selection_mirror_path(),
            live.clone(),
        ));
        let sensitivity = Arc::new(SensitivityController::new(
            sensitivity_store,
            config.storage.false_alarm_log_path(),
            ledger.clone(),
            config.detection.sigma,
            config.detection.sigma_min,
            config.detection.sigma_max,
            config.detection.false_alarm_step,
        ));
        let builder = BaselineBuilder::new(
            history,
            registry.clone(),
            store.clone(),
            config.detection.sigma_overrides.clone(),
        );
        let evaluator = AnomalyEvaluator::new(
            store.clone(),
            live,
            registry.clone(),
            sensitivity.clone(),
            BinaryCutoffs {
                high: config.detection.binary_high_cutoff,
                medium: config.detection.binary_medium_cutoff,
            },
            ledger.clone(),
        );

        Self {
            registry,
            builder,
            evaluator,
            sensitivity,
            ledger,
            store,
            ai,
            detection: config.detection.clone(),
            schedule: config.schedule.clone(),
        }
    }

    /// Wire up the production providers: Home Assistant for states and
    /// history, OpenAI for discovery, JSON files for persistence.
    pub fn from_config(config: &WardenConfig) -> Result<Self> {
        let hass = Arc::new(HassClient::new(
            &config.home_assistant.base_url,
            &config.home_assistant.resolved_token(),
        )?);
        let ai = Arc::new(OpenAiClient::new(
            config.openai.resolved_api_key(),
            config.openai.model.clone(),
            config.openai.fallback_model.clone(),
            config.openai.base_url.clone(),
            config.openai.max_tokens,
            config.openai.temperature,
        ));
        let selection_store = Arc::new(JsonFileStore::new(config.storage.selection_store_path()));
        let sensitivity_store =
            Arc::new(JsonFileStore::new(config.storage.sensitivity_store_path()));

        Ok(Self::new(
            config,
            hass.clone(),
            hass,
            ai,
            selection_store,
            sensitivity_store,
        ))
    }

    /// Restore persisted selection and sensitivity. Call once at startup.
    pub async fn start(&self) {
        if let Err(e) = self.registry.load().await {
            warn!(error = %e, "selection load failed, starting with empty selection");
        }
        self.sensitivity.load().await;
    }

    /// Build the baseline for the current selection. Defaults come from
    /// config (window) and the live sensitivity (sigma).
    pub async fn build_all(&self, window_days: Option<u32>, sigma: Option<f64>) -> ModelSet {
        let window_days = window_days.unwrap_or(self.detection.window_days);
        let sigma = sigma.unwrap_or_else(|| self.sensitivity.current());
        match self.builder.build_all(window_days, sigma).await {
            Ok(models) => models,
            Err(e) => {
                error!(error = %e, "baseline build failed");
                ModelSet::new()
            }
        }
    }

    /// AI-assisted entity reselection. `false` means the selection was left
    /// untouched, whether the reply was unusable or the call failed.
    pub async fn discover_entities(&self, entity_count: Option<usize>) -> bool {
        let count = entity_count.unwrap_or(self.detection.entity_count);
        match self
            .registry
            .discover_entities(self.ai.as_ref(), count)
            .await
        {
            Ok(applied) => applied,
            Err(e) => {
                error!(error = %e, "entity discovery failed");
                false
            }
        }
    }

    /// Drop selected entities that no longer exist in the live registry.
    pub async fn clean_nonexistent_entities(&self) -> bool {
        match self.registry.clean_nonexistent().await {
            Ok(changed) => changed,
            Err(e) => {
                error!(error = %e, "selection cleanup failed");
                false
            }
        }
    }

    /// Sweep every modeled entity.
    pub async fn detect(&self) -> Vec<Anomaly> {
        match self.evaluator.detect().await {
            Ok(anomalies) => anomalies,
            Err(e) => {
                error!(error = %e, "anomaly sweep failed");
                Vec::new()
            }
        }
    }

    /// Sweep one tier.
    pub async fn detect_by_priority(&self, priority: bool) -> Vec<Anomaly> {
        match self.evaluator.detect_by_priority(priority).await {
            Ok(anomalies) => anomalies,
            Err(e) => {
                error!(error = %e, "anomaly sweep failed");
                Vec::new()
            }
        }
    }

    pub async fn log_false_alarm(&self, entity_id: &str, reason: &str) {
        self.sensitivity.log_false_alarm(entity_id, reason).await;
    }

    /// Age of the persisted baseline in whole days, if one exists.
    pub async fn baseline_age_days(&self) -> Option<i64> {
        self.store.age_days().await
    }

    pub async fn baseline_model_count(&self) -> Option<usize> {
        self.store.load().await.ok().flatten().map(|m| m.len())
    }

    pub fn current_sensitivity(&self) -> f64 {
        self.sensitivity.current()
    }

    /// Anomalies accumulated across sweeps since startup.
    pub fn anomalies(&self) -> Vec<Anomaly> {
        self.ledger.snapshot()
    }

    pub async fn selection(&self) -> MonitoredEntities {
        self.registry.snapshot().await
    }

    /// Run periodic standard and priority sweeps plus a cleanup pass on
    /// independent timers until interrupted. Overlapping sweeps are safe;
    /// the ledger deduplicates by entity id.
    pub async fn watch(self: Arc<Self>) -> Result<()> {
        info!(
            standard_secs = self.schedule.standard_interval_secs,
            priority_secs = self.schedule.priority_interval_secs,
            "watch mode started"
        );

        let standard = {
            let warden = self.clone();
            tokio::spawn(async move {
                let mut tick = tokio::time::interval(Duration::from_secs(
                    warden.schedule.standard_interval_secs,
                ));
                tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    tick.tick().await;
                    warden.sweep_tier(false).await;
                }
            })
        };

        let priority = {
            let warden = self.clone();
            tokio::spawn(async move {
                let mut tick = tokio::time::interval(Duration::from_secs(
                    warden.schedule.priority_interval_secs,
                ));
                tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    tick.tick().await;
                    warden.sweep_tier(true).await;
                }
            })
        };

        let cleanup = {
            let warden = self.clone();
            tokio::spawn(async move {
                let mut tick = tokio::time::interval(Duration::from_secs(
                    warden.schedule.cleanup_interval_secs,
                ));
                tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    tick.tick().await;
                    if warden.clean_nonexistent_entities().await {
                        info!("selection cleaned against live registry");
                    }
                    if let Some(age) = warden.baseline_age_days().await {
                        if age > warden.detection.baseline_stale_days {
                            warn!(age_days = age, "baseline is stale, consider rebuilding");
                        }
                    }
                }
            })
        };

        tokio::signal::ctrl_c().await?;
        standard.abort();
        priority.abort();
        cleanup.abort();
        info!("watch mode stopped");
        Ok(())
    }

    async fn sweep_tier(&self, priority: bool) {
        let tier = if priority { "priority" } else { "standard" };
        let anomalies = self.detect_by_priority(priority).await;
        if anomalies.is_empty() {
            return;
        }
        info!(count = anomalies.len(), tier, "sweep finished with anomalies");
        // High and critical deviations get their own alert line, the
        // closest thing a daemon has to a notification.
        for anomaly in &anomalies {
            if anomaly.severity >= Severity::High {
                warn!(
                    entity = %anomaly.entity_id,
                    name = %anomaly.friendly_name,
                    value = %anomaly.current_value,
                    severity = %anomaly.severity,
                    "ALERT: severe anomaly"
                );
            }
        }
    }
}
