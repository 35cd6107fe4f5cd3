//! fraudit: run fraud-detection rules over a snapshot directory.
//!
//! Snapshots are read from `<data-dir>/<watermark>/*.json`; alerts are kept
//! in a single JSON file.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use uuid::Uuid;

use fraudit_core::{load_dotenv, AlertStatus, EngineConfig};
use fraudit_rules::{parse_rule_ids, AlertStore, Engine, JsonDirSource, JsonFileAlertStore};

// ── CLI ─────────────────────────────────────────────────────────────

/// Fraud-detection rule engine for public-spending records.
#[derive(Parser, Debug)]
#[command(name = "fraudit", version, about)]
struct Cli {
    /// Path to a YAML config file.
    #[arg(long, global = true, env = "FRAUDIT_CONFIG")]
    config: Option<PathBuf>,

    /// Snapshot root: one directory per watermark.
    #[arg(long, global = true, env = "FRAUDIT_DATA_DIR", default_value = "data/snapshots")]
    data_dir: PathBuf,

    /// Alert store file.
    #[arg(long, global = true, env = "FRAUDIT_ALERTS", default_value = "data/alerts.json")]
    alerts: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run rules against a snapshot and commit the alerts.
    Run {
        /// Comma-separated rule ids. Defaults to every rule.
        #[arg(long, value_delimiter = ',')]
        rules: Vec<String>,

        /// Watermark to evaluate. Defaults to the latest.
        #[arg(long)]
        watermark: Option<String>,

        /// Print the run result as JSON.
        #[arg(long)]
        json: bool,
    },
    /// List the available rules.
    Rules,
    /// Inspect and triage stored alerts.
    Alerts {
        #[command(subcommand)]
        action: AlertsAction,
    },
}

#[derive(Subcommand, Debug)]
enum AlertsAction {
    /// List stored alerts.
    List {
        /// Only alerts with this status (open, dismissed, confirmed).
        #[arg(long)]
        status: Option<AlertStatus>,
    },
    /// Dismiss, confirm, or reopen an alert.
    SetStatus { id: Uuid, status: AlertStatus },
}

fn main() -> Result<()> {
    load_dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let config = EngineConfig::load(cli.config.as_deref()).context("failed to load configuration")?;
    let store: Arc<dyn AlertStore> = Arc::new(JsonFileAlertStore::new(&cli.alerts));

    match cli.command {
        Command::Run {
            rules,
            watermark,
            json,
        } => {
            config.log_summary();
            let engine = Engine::new(config, Arc::new(JsonDirSource::new(&cli.data_dir)), store)?;
            let selected = if rules.is_empty() {
                None
            } else {
                Some(parse_rule_ids(&rules)?)
            };

            info!(data_dir = %cli.data_dir.display(), alerts = %cli.alerts.display(), "starting run");
            let result = engine.run_at(watermark.as_deref(), selected.as_deref())?;

            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                print!("{result}");
            }
            if !result.failed_rules().is_empty() {
                warn!(failed = result.failed_rules().len(), "some rules did not complete");
            }
        }
        Command::Rules => {
            let engine = Engine::new(config, Arc::new(JsonDirSource::new(&cli.data_dir)), store)?;
            for rule in engine.list_rules() {
                println!(
                    "{:<22} {:<12} {}",
                    rule.id.as_str(),
                    rule.default_severity.to_string(),
                    rule.description
                );
            }
        }
        Command::Alerts { action } => match action {
            AlertsAction::List { status } => {
                let alerts = store.load_all()?;
                for a in alerts.iter().filter(|a| status.map_or(true, |s| a.status == s)) {
                    let rules: Vec<&str> = a.rule_ids.iter().map(|r| r.as_str()).collect();
                    println!(
                        "{}  {:<11} {:<9} {}  [{}]",
                        a.id,
                        a.severity.to_string(),
                        a.status.to_string(),
                        a.primary_key,
                        rules.join(",")
                    );
                }
            }
            AlertsAction::SetStatus { id, status } => {
                let alert = store.set_status(id, status)?;
                println!("{} -> {}", alert.id, alert.status);
            }
        },
    }
    Ok(())
}
