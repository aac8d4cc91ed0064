use carelink_core::{HttpRemote, OfflineService};

use crate::error::CliError;

pub async fn run_sync(service: &OfflineService<HttpRemote>) -> Result<(), CliError> {
    let summary = service.sync_now().await;
    if !summary.success {
        return Err(CliError::SyncFailed(summary.message));
    }

    println!("Sync completed: {summary}");
    if !summary.refreshed.is_empty() {
        let refreshed = summary
            .refreshed
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        println!("Refreshed: {refreshed}");
    }
    Ok(())
}
