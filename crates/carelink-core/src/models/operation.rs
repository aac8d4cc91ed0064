//! Pending operation model for the sync queue

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::{AppointmentStatus, AppointmentUpdate, NewAppointment};

/// Identifier of a queued operation
///
/// Derived from a microsecond clock reading and forced to be strictly greater
/// than every id already queued, so numeric order is enqueue order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationId(u64);

impl OperationId {
    /// Next id after `last`, taken from the clock when possible
    #[must_use]
    pub fn next_after(last: Option<Self>) -> Self {
        let now = unix_timestamp_micros();
        match last {
            Some(Self(last)) if now <= last => Self(last.saturating_add(1)),
            _ => Self(now),
        }
    }

    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Verb of a deferred remote call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncAction {
    Create,
    Update,
    Delete,
}

impl fmt::Display for SyncAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        })
    }
}

/// Push-notification device registration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRegistration {
    pub token: String,
    pub platform: String,
}

/// Typed body of a queued operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainPayload {
    CreateAppointment(NewAppointment),
    UpdateAppointment(AppointmentUpdate),
    AppointmentStatus { status: AppointmentStatus },
    MarkRead,
    RegisterDevice(DeviceRegistration),
}

impl DomainPayload {
    /// Action this payload may be replayed with
    pub const fn action(&self) -> SyncAction {
        match self {
            Self::CreateAppointment(_) | Self::RegisterDevice(_) => SyncAction::Create,
            Self::UpdateAppointment(_) | Self::AppointmentStatus { .. } | Self::MarkRead => {
                SyncAction::Update
            }
        }
    }

    /// JSON request body sent to the remote service
    pub fn to_body(&self) -> serde_json::Result<Option<serde_json::Value>> {
        let body = match self {
            Self::CreateAppointment(request) => Some(serde_json::to_value(request)?),
            Self::UpdateAppointment(update) => Some(serde_json::to_value(update)?),
            Self::AppointmentStatus { status } => Some(serde_json::json!({ "status": status })),
            Self::MarkRead => None,
            Self::RegisterDevice(registration) => Some(serde_json::to_value(registration)?),
        };
        Ok(body)
    }
}

fn unix_timestamp_micros() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp_micros()).unwrap_or_default()
}

/// A mutation waiting to be replayed against the remote service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingOperation {
    pub id: OperationId,
    pub action: SyncAction,
    pub endpoint: String,
    #[serde(default)]
    pub payload: Option<DomainPayload>,
    /// Temporary id of the entity a queued create produced locally
    #[serde(default)]
    pub local_id: Option<String>,
    pub enqueued_at: DateTime<Utc>,
}

impl PendingOperation {
    /// Check that the record can be dispatched as-is
    pub fn validate(&self) -> Result<(), String> {
        if !self.endpoint.starts_with('/') {
            return Err(format!("endpoint '{}' must start with '/'", self.endpoint));
        }

        match (self.action, &self.payload) {
            (SyncAction::Delete, None) => Ok(()),
            (SyncAction::Delete, Some(_)) => Err("delete must not carry a payload".to_string()),
            (action, None) => Err(format!("{action} requires a payload")),
            (action, Some(payload)) if payload.action() != action => Err(format!(
                "payload is not valid for a {action} operation"
            )),
            _ => Ok(()),
        }
    }

    /// Whether this operation targets the entity with the given id
    pub fn targets(&self, entity_id: &str) -> bool {
        self.local_id.as_deref() == Some(entity_id)
            || self.endpoint.split('/').any(|segment| segment == entity_id)
    }

    /// Replace a local entity id with the server-assigned one
    pub fn retarget(&mut self, local_id: &str, server_id: &str) -> bool {
        if !self.endpoint.split('/').any(|segment| segment == local_id) {
            return false;
        }
        self.endpoint = self
            .endpoint
            .split('/')
            .map(|segment| if segment == local_id { server_id } else { segment })
            .collect::<Vec<_>>()
            .join("/");
        true
    }
}
