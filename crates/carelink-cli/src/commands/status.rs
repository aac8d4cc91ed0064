use carelink_core::config::ClientConfig;
use carelink_core::{ConnectivityPhase, HttpRemote, OfflineService};
use chrono::Utc;

use crate::commands::common::format_sync_time;
use crate::error::CliError;

pub async fn run_status(
    service: &OfflineService<HttpRemote>,
    config: &ClientConfig,
) -> Result<(), CliError> {
    let store = service.store();
    let pending = service.queue().len().await;
    let mode = if store.offline_mode().await {
        "offline"
    } else {
        "online"
    };

    println!("API:            {}", config.api_base_url);
    println!("Database:       {}", config.database_path().display());
    println!("Last known:     {mode}");
    println!(
        "Last sync:      {}",
        format_sync_time(store.last_sync().await, Utc::now())
    );
    println!("Pending:        {pending} operation(s)");
    Ok(())
}

pub async fn run_probe(service: &OfflineService<HttpRemote>) -> Result<(), CliError> {
    let state = service.check_connectivity().await;
    println!(
        "{} (connected: {}, reachable: {})",
        state.phase(),
        state.is_connected,
        state.is_reachable
    );

    // Coming online kicks off a replay; let it finish before exiting.
    if state.phase() == ConnectivityPhase::Online {
        if let Some(summary) = service.monitor().wait_for_background_sync().await {
            println!("Synced: {summary}");
        }
    }
    Ok(())
}
