//! Carelink CLI - inspect and drive the offline sync subsystem
//!
//! Useful for checking what a client has cached and queued, and for forcing
//! a reconciliation pass from the terminal.

mod cli;
mod commands;
mod error;


use std::path::PathBuf;

use carelink_core::config::{non_blank, resolve_config, ClientConfig};
use carelink_core::OfflineService;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands, QueueCommand};
use crate::commands::list::{run_appointments, run_notifications};
use crate::commands::queue::{run_queue_clear, run_queue_list};
use crate::commands::status::{run_probe, run_status};
use crate::commands::sync::run_sync;
use crate::commands::watch::run_watch;
use crate::error::CliError;

const DEFAULT_LOG_FILTER: &str = "carelink=info";

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
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .init();

    let cli = Cli::parse();
    let config = apply_cli_overrides(resolve_config(), cli.db_path, cli.api_url);
    tracing::debug!("Resolved client config: {:?}", config);

    let service = OfflineService::open(&config).await?;
    let result = match cli.command {
        Commands::Status => run_status(&service, &config).await,
        Commands::Probe => run_probe(&service).await,
        Commands::Sync => run_sync(&service).await,
        Commands::Queue { action } => match action {
            QueueCommand::List { json } => run_queue_list(&service, json).await,
            QueueCommand::Clear => run_queue_clear(&service).await,
        },
        Commands::Appointments { json } => run_appointments(&service, json).await,
        Commands::Notifications { json } => run_notifications(&service, json).await,
        Commands::Watch => run_watch(&service).await,
    };
    service.shutdown();
    result
}

/// Command-line flags win over the config file and environment
fn apply_cli_overrides(
    mut config: ClientConfig,
    db_path: Option<PathBuf>,
    api_url: Option<String>,
) -> ClientConfig {
    if let Some(path) = db_path {
        config.database_path = Some(path);
    }
    if let Some(url) = non_blank(api_url) {
        config.api_base_url = url;
    }
    config
}
