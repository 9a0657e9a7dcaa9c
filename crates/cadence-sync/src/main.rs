//! Operator CLI for the Cadence storage engine.
//!
//! Runs the boot-time storage tasks outside the bot process:
//!
//! - `cadence-sync resync` -- migrate both stores, then copy every replica
//!   table into the primary (the default when no command is given).
//! - `cadence-sync check` -- migrate, then ping both stores.
//!
//! Configuration comes from `cadence-config.yaml` (or `--config`), with the
//! `CADENCE_*` environment overrides applied on top. A missing file means
//! built-in defaults; the replica URL and token must then come from the
//! environment.

mod error;

use std::path::{Path, PathBuf};

use cadence_core::{BotStorage, CadenceConfig};
use cadence_db::{SqlStore, Store};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::error::SyncError;

#[derive(Parser)]
#[command(name = "cadence-sync")]
#[command(version, about = "Cadence storage maintenance", long_about = None)]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(
        short,
        long,
        global = true,
        env = "CADENCE_CONFIG",
        default_value = "cadence-config.yaml"
    )]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Clone, Copy, Default)]
enum Command {
    /// Copy every replica table into the primary.
    #[default]
    Resync,
    /// Verify that both stores answer.
    Check,
}

/// Application entry point.
///
/// # Errors
///
/// Returns an error if configuration, connection, migration, the health
/// check or the resync fails.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = load_config(&cli.config)?;
    init_logging(&config);

    info!(
        config = %cli.config.display(),
        primary = %config.storage.primary.path.display(),
        "cadence-sync starting"
    );

    let storage = BotStorage::connect(&config).await.map_err(SyncError::from)?;
    storage.init().await.map_err(SyncError::from)?;

    let outcome = match cli.command.unwrap_or_default() {
        Command::Resync => resync(&storage).await,
        Command::Check => check(&storage).await,
    };

    storage.close().await;
    outcome?;
    Ok(())
}

fn load_config(path: &Path) -> Result<CadenceConfig, cadence_core::config::ConfigError> {
    if path.exists() {
        CadenceConfig::from_file(path)
    } else {
        Ok(CadenceConfig::from_env())
    }
}

fn init_logging(config: &CadenceConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    if config.logging.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    }
}

async fn resync(storage: &BotStorage<SqlStore, SqlStore>) -> Result<(), SyncError> {
    let report = storage.full_resync().await;

    for table in &report.tables {
        info!(
            table = %table.table,
            replica_rows = table.replica_rows,
            copied = table.copied,
            errors = table.errors,
            skipped = table.skipped,
            "table report"
        );
    }

    if report.success {
        info!(
            tables_synced = report.tables_synced,
            total_copied = report.total_copied,
            "resync complete"
        );
        Ok(())
    } else {
        Err(SyncError::ResyncIncomplete {
            errors: report.total_errors,
        })
    }
}

async fn check(storage: &BotStorage<SqlStore, SqlStore>) -> Result<(), SyncError> {
    storage
        .primary()
        .ping()
        .await
        .map_err(|e| SyncError::Unreachable {
            store: "primary",
            reason: e.to_string(),
        })?;
    info!("primary store reachable");

    storage
        .replica()
        .ping()
        .await
        .map_err(|e| SyncError::Unreachable {
            store: "replica",
            reason: e.to_string(),
        })?;
    info!("replica store reachable");

    Ok(())
}
