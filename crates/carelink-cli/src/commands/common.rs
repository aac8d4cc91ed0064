use carelink_core::models::{Appointment, Notification, PendingOperation};
use carelink_core::Outcome;
use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct OperationItem {
    pub id: u64,
    pub action: String,
    pub endpoint: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_id: Option<String>,
    pub enqueued_at: String,
}

pub fn operation_to_item(operation: &PendingOperation) -> OperationItem {
    OperationItem {
        id: operation.id.as_u64(),
        action: operation.action.to_string(),
        endpoint: operation.endpoint.clone(),
        local_id: operation.local_id.clone(),
        enqueued_at: operation.enqueued_at.to_rfc3339(),
    }
}

pub fn format_operation_lines(operations: &[PendingOperation], now: DateTime<Utc>) -> Vec<String> {
    operations
        .iter()
        .map(|operation| {
            let age = format_relative_time(operation.enqueued_at, now);
            format!(
                "{:<18}  {:<6}  {:<40}  {age}",
                operation.id,
                operation.action.to_string(),
                operation.endpoint
            )
        })
        .collect()
}

pub fn format_appointment_lines(appointments: &[Appointment]) -> Vec<String> {
    appointments
        .iter()
        .map(|appointment| {
            let marker = if appointment.id.is_local() { "*" } else { " " };
            format!(
                "{marker}{:<42}  {:<10}  {:<20}  {}",
                appointment.id.as_str(),
                appointment.status.as_str(),
                appointment.slot,
                appointment.patient
            )
        })
        .collect()
}

pub fn format_notification_lines(notifications: &[Notification]) -> Vec<String> {
    notifications
        .iter()
        .map(|notification| {
            let marker = if notification.read { " " } else { "•" };
            format!("{marker} {:<24}  {}", notification.id, notification.title)
        })
        .collect()
}

/// Trailing note describing where a result came from
pub fn origin_note<T>(outcome: &Outcome<T>) -> Option<String> {
    outcome.message().map(|message| format!("({message})"))
}

pub fn format_relative_time(at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let seconds = (now - at).num_seconds().max(0);
    match seconds {
        0..=59 => "just now".to_string(),
        60..=3_599 => format!("{}m ago", seconds / 60),
        3_600..=86_399 => format!("{}h ago", seconds / 3_600),
        _ => format!("{}d ago", seconds / 86_400),
    }
}

pub fn format_sync_time(last_sync: Option<DateTime<Utc>>, now: DateTime<Utc>) -> String {
    last_sync.map_or_else(
        || "never".to_string(),
        |at| format!("{} ({})", at.format("%Y-%m-%d %H:%M:%S UTC"), format_relative_time(at, now)),
    )
}
