//! # Open Finance Sync Entry Point
//!
//! Serves the HTTP API by default; `sync` runs one pass from the command line
//! and `migrate` only applies pending migrations.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, anyhow};
use clap::{Parser, Subcommand};

use openfinance_sync::config::{AppConfig, ConfigLoader, parse_timestamp};
use openfinance_sync::server::{AppState, run_server};
use openfinance_sync::{db, telemetry};

#[derive(Parser, Debug)]
#[command(author, version, about = "Open Finance account and transaction sync", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the HTTP API (default)
    Serve,
    /// Run one sync pass and print the report as JSON
    Sync {
        /// Lower bound for transaction dates (RFC 3339 or YYYY-MM-DD)
        #[arg(long)]
        from: Option<String>,
        /// Sync only this item
        #[arg(long)]
        item: Option<String>,
    },
    /// Apply pending database migrations and exit
    Migrate,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    let config = ConfigLoader::new()
        .load()
        .context("Failed to load configuration")?;
    telemetry::init_tracing(&config).context("Failed to initialize telemetry")?;

    tracing::info!(profile = %config.profile, "Loaded configuration");
    if let Ok(redacted_json) = config.redacted_json() {
        tracing::debug!(config = %redacted_json, "Effective configuration");
    }

    let db = db::init_pool(&config).await?;
    db::run_migrations(&db).await?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => {
            run_server(config, db).await?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Sync { from, item } => run_sync(config, db, from, item).await,
        Command::Migrate => Ok(ExitCode::SUCCESS),
    }
}

async fn run_sync(
    config: AppConfig,
    db: sea_orm::DatabaseConnection,
    from: Option<String>,
    item: Option<String>,
) -> anyhow::Result<ExitCode> {
    let from = match from.as_deref() {
        Some(raw) => parse_timestamp(raw).ok_or_else(|| anyhow!("invalid --from value: {raw}"))?,
        None => config.sync.default_from()?,
    };

    let state = AppState::from_config(Arc::new(config), db)?;
    let report = match item.as_deref() {
        Some(item_id) => state.orchestrator.sync_item(item_id, from).await?,
        None => state.orchestrator.sync_all(from).await?,
    };

    println!("{}", serde_json::to_string_pretty(&report)?);

    if report.errors.is_empty() {
        Ok(ExitCode::SUCCESS)
    } else {
        tracing::warn!(failed_items = ?report.failed_item_ids(), "Sync finished with errors");
        Ok(ExitCode::FAILURE)
    }
}
