use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};

use sensorwarden::config::WardenConfig;
use sensorwarden::detect::Anomaly;
use sensorwarden::warden::Warden;

#[derive(Parser)]
#[command(
    name = "sensorwarden",
    about = "Statistical anomaly detection for home-automation sensor fleets",
    version,
    long_about = None
)]
struct Cli {
    /// Path to the TOML config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build or rebuild the baseline for the current selection
    BuildBaseline {
        /// History window in days
        #[arg(long)]
        window_days: Option<u32>,

        /// Sigma multiplier on standard deviation
        #[arg(long)]
        sigma: Option<f64>,
    },

    /// Ask the AI to (re)select which entities to monitor
    Discover {
        /// Maximum number of entities to select
        #[arg(long)]
        count: Option<usize>,
    },

    /// Run one anomaly sweep
    Detect {
        /// Restrict the sweep to one tier: standard or priority
        #[arg(long)]
        tier: Option<String>,

        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },

    /// Drop selected entities that no longer exist
    Clean,

    /// Report a flagged anomaly as a false alarm
    FalseAlarm {
        /// Entity id of the wrongly flagged anomaly
        entity_id: String,

        /// Why the flag was wrong
        #[arg(long, default_value = "")]
        reason: String,
    },

    /// Show baseline, selection, and sensitivity status
    Status {
        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },

    /// Run periodic sweeps until interrupted
    Watch,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => WardenConfig::load(path)?,
        None => WardenConfig::load_or_default(),
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(config.logging.level.clone())),
        )
        .init();

    let warden = Arc::new(Warden::from_config(&config)?);
    warden.start().await;

    match cli.command {
        Commands::BuildBaseline { window_days, sigma } => {
            tracing::info!(?window_days, ?sigma, "building baseline");
            let models = warden.build_all(window_days, sigma).await;
            println!("Baseline built: {} models.", models.len());
        }
        Commands::Discover { count } => {
            tracing::info!(?count, "running entity discovery");
            if warden.discover_entities(count).await {
                let selection = warden.selection().await;
                println!(
                    "Selection updated: {} standard, {} priority.",
                    selection.gpt_selected.standard.len(),
                    selection.gpt_selected.priority.len()
                );
            } else {
                println!("Discovery failed; selection unchanged.");
            }
        }
        Commands::Detect { tier, json } => {
            let anomalies = match tier.as_deref() {
                None => warden.detect().await,
                Some("standard") => warden.detect_by_priority(false).await,
                Some("priority") => warden.detect_by_priority(true).await,
                Some(other) => anyhow::bail!("unknown tier '{}', expected standard or priority", other),
            };

            if json {
                println!("{}", serde_json::to_string_pretty(&anomalies)?);
            } else if anomalies.is_empty() {
                println!("No anomalies detected.");
            } else {
                print_anomaly_table(&anomalies);
            }
        }
        Commands::Clean => {
            if warden.clean_nonexistent_entities().await {
                println!("Selection cleaned.");
            } else {
                println!("Nothing to clean.");
            }
        }
        Commands::FalseAlarm { entity_id, reason } => {
            warden.log_false_alarm(&entity_id, &reason).await;
            println!(
                "False alarm recorded for {}. Sensitivity is now {:.2}.",
                entity_id,
                warden.current_sensitivity()
            );
        }
        Commands::Status { json } => {
            let age = warden.baseline_age_days().await;
            let models = warden.baseline_model_count().await;
            let selection = warden.selection().await;

            if json {
                let status = serde_json::json!({
                    "baseline_age_days": age,
                    "baseline_models": models,
                    "current_sensitivity": warden.current_sensitivity(),
                    "anomalies_accumulated": warden.anomalies().len(),
                    "selection": selection,
                });
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                println!("\nsensorwarden status");
                match (age, models) {
                    (Some(age), Some(models)) => {
                        println!("Baseline:    {} models, {} days old", models, age)
                    }
                    _ => println!("Baseline:    not built yet"),
                }
                println!("Sensitivity: {:.2}", warden.current_sensitivity());
                println!(
                    "Selected:    {} AI standard, {} AI priority, {} user standard, {} user priority",
                    selection.gpt_selected.standard.len(),
                    selection.gpt_selected.priority.len(),
                    selection.user_added.standard.len(),
                    selection.user_added.priority.len()
                );
                println!("Ignored:     {}", selection.ignored.len());
                println!();
            }
        }
        Commands::Watch => {
            warden.watch().await?;
        }
    }

    Ok(())
}

fn print_anomaly_table(anomalies: &[Anomaly]) {
    println!("{:<35} | {:<10} | {:<12} | Value", "Entity", "Severity", "Type");
    println!("{:-<35}-|-{:-<10}-|-{:-<12}-|-{:-<20}", "", "", "", "");
    for anomaly in anomalies {
        println!(
            "{:<35} | {:<10} | {:<12} | {}",
            anomaly.entity_id,
            anomaly.severity.to_string(),
            anomaly.class.to_string(),
            anomaly.current_value
        );
    }
}
