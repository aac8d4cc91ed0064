use carelink_core::{HttpRemote, OfflineService};

use crate::commands::common::{format_appointment_lines, format_notification_lines, origin_note};
use crate::error::CliError;

pub async fn run_appointments(
    service: &OfflineService<HttpRemote>,
    as_json: bool,
) -> Result<(), CliError> {
    let outcome = service.appointments().await;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&outcome.data)?);
        return Ok(());
    }

    if outcome.data.is_empty() {
        println!("No appointments.");
    }
    for line in format_appointment_lines(&outcome.data) {
        println!("{line}");
    }
    if let Some(note) = origin_note(&outcome) {
        println!("{note}");
    }
    Ok(())
}

pub async fn run_notifications(
    service: &OfflineService<HttpRemote>,
    as_json: bool,
) -> Result<(), CliError> {
    let outcome = service.notifications().await;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&outcome.data)?);
        return Ok(());
    }

    if outcome.data.is_empty() {
        println!("No notifications.");
    }
    for line in format_notification_lines(&outcome.data) {
        println!("{line}");
    }
    if let Some(note) = origin_note(&outcome) {
        println!("{note}");
    }
    Ok(())
}
