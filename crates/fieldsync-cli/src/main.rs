//! fieldsync CLI - queue mutations offline and replay them against the API
//!
//! Every command opens the local queue database, does its work and flushes.

mod cli;
mod commands;
mod error;

#[cfg(test)]
mod tests;

use std::path::Path;

use clap::Parser;
use fieldsync_core::ClientConfig;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands};
use crate::commands::cache::run_cache;
use crate::commands::common::{load_config, resolve_config_path, resolve_db_path};
use crate::commands::completions::run_completions;
use crate::commands::config::run_config;
use crate::commands::conflicts::{run_conflicts, run_resolve};
use crate::commands::enqueue::{run_enqueue, run_record};
use crate::commands::failed::{run_discard, run_prune, run_retry};
use crate::commands::list::{run_list, run_show};
use crate::commands::status::run_status;
use crate::commands::sync::{run_sync, run_watch};
use crate::error::CliError;

const DEFAULT_LOG_FILTER: &str = "fieldsync=info,fieldsync_core=info";

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config_path = resolve_config_path(cli.config)?;

    match cli.command {
        Commands::Completions { shell, output } => run_completions(shell, output.as_deref()),
        Commands::Config { command } => run_config(command, &config_path),
        command => {
            let config = load_config(&config_path)?;
            let db_path = resolve_db_path(cli.db_path)?;
            tracing::debug!("Using queue database at {}", db_path.display());
            run_queue_command(command, &config, &db_path).await
        }
    }
}

async fn run_queue_command(
    command: Commands,
    config: &ClientConfig,
    db_path: &Path,
) -> Result<(), CliError> {
    match command {
        Commands::Enqueue(args) => run_enqueue(&args, config, db_path).await,
        Commands::Record(args) => run_record(&args, config, db_path).await,
        Commands::Status { json } => run_status(json, config, db_path).await,
        Commands::List {
            status,
            limit,
            json,
        } => run_list(&status, limit, json, config, db_path).await,
        Commands::Show { id } => run_show(&id, config, db_path).await,
        Commands::Sync { json } => run_sync(json, config, db_path).await,
        Commands::Watch => run_watch(config, db_path).await,
        Commands::Conflicts {
            limit,
            history,
            json,
        } => run_conflicts(limit, history, json, config, db_path).await,
        Commands::Resolve { id, strategy, body } => {
            run_resolve(&id, &strategy, body.as_deref(), config, db_path).await
        }
        Commands::Retry { id } => run_retry(&id, config, db_path).await,
        Commands::Discard { id } => run_discard(&id, config, db_path).await,
        Commands::Prune { older_than_hours } => run_prune(older_than_hours, config, db_path).await,
        Commands::Cache { command } => run_cache(command, config, db_path).await,
        // Dispatched in `run` without opening the queue.
        Commands::Completions { .. } | Commands::Config { .. } => Ok(()),
    }
}
