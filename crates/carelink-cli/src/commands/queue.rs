use carelink_core::{HttpRemote, OfflineService};
use chrono::Utc;

use crate::commands::common::{format_operation_lines, operation_to_item, OperationItem};
use crate::error::CliError;

pub async fn run_queue_list(
    service: &OfflineService<HttpRemote>,
    as_json: bool,
) -> Result<(), CliError> {
    let operations = service.pending_operations().await;

    if as_json {
        let json_items = operations
            .iter()
            .map(operation_to_item)
            .collect::<Vec<OperationItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
        return Ok(());
    }

    if operations.is_empty() {
        println!("No pending operations.");
        return Ok(());
    }

    for line in format_operation_lines(&operations, Utc::now()) {
        println!("{line}");
    }
    Ok(())
}

pub async fn run_queue_clear(service: &OfflineService<HttpRemote>) -> Result<(), CliError> {
    let count = service.queue().len().await;
    service.queue().clear().await?;
    println!("Cleared {count} pending operation(s)");
    Ok(())
}
