use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "carelink")]
#[command(about = "Inspect and drive the Carelink offline cache and sync queue")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Optional path to the local cache database
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    /// Base URL of the scheduling API (overrides config and environment)
    #[arg(long, global = true, value_name = "URL")]
    pub api_url: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show cached sync state without touching the network
    Status,
    /// Probe the API once and report connectivity
    Probe,
    /// Replay queued operations and refresh the cache
    Sync,
    /// Inspect or clear the pending operation queue
    Queue {
        #[command(subcommand)]
        action: QueueCommand,
    },
    /// List appointments (cached data when offline)
    Appointments {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List notifications (cached data when offline)
    Notifications {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Monitor connectivity until interrupted
    Watch,
}

#[derive(Subcommand)]
pub enum QueueCommand {
    /// List queued operations in replay order
    #[command(alias = "ls")]
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Drop every queued operation
    Clear,
}
