//! Appointment model

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Prefix marking identifiers minted on the device before the server has
/// assigned one.
pub const LOCAL_ID_PREFIX: &str = "local_";

/// Identifier of an appointment, either server-assigned or local.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AppointmentId(String);

impl AppointmentId {
    /// Wrap a server-assigned identifier
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Mint a temporary identifier for an appointment created offline
    ///
    /// Uses UUID v7 so local ids sort by creation time.
    #[must_use]
    pub fn local() -> Self {
        Self(format!("{LOCAL_ID_PREFIX}{}", Uuid::now_v7()))
    }

    /// Whether this id was minted locally and not yet replaced by the server
    pub fn is_local(&self) -> bool {
        self.0.starts_with(LOCAL_ID_PREFIX)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AppointmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle status of an appointment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AppointmentStatus {
    /// Requested, awaiting confirmation (also used for optimistic local state)
    #[default]
    Pending,
    Confirmed,
    Cancelled,
    Completed,
}

impl AppointmentStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Cancelled => "cancelled",
            Self::Completed => "completed",
        }
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An appointment as known to the client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: AppointmentId,
    /// Patient the appointment is booked for
    pub patient: String,
    /// Requested time slot
    pub slot: String,
    #[serde(default)]
    pub health_center: Option<String>,
    #[serde(default)]
    pub service: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub status: AppointmentStatus,
    /// Creation timestamp (Unix ms)
    #[serde(default)]
    pub created_at: i64,
}

impl Appointment {
    /// Build the optimistic local representation of an offline booking
    #[must_use]
    pub fn local(request: &NewAppointment) -> Self {
        Self {
            id: AppointmentId::local(),
            patient: request.patient.clone(),
            slot: request.slot.clone(),
            health_center: request.health_center.clone(),
            service: request.service.clone(),
            notes: request.notes.clone(),
            status: AppointmentStatus::Pending,
            created_at: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Apply a partial update in place
    pub fn apply(&mut self, update: &AppointmentUpdate) {
        if let Some(slot) = &update.slot {
            self.slot.clone_from(slot);
        }
        if let Some(health_center) = &update.health_center {
            self.health_center = Some(health_center.clone());
        }
        if let Some(service) = &update.service {
            self.service = Some(service.clone());
        }
        if let Some(notes) = &update.notes {
            self.notes = Some(notes.clone());
        }
    }
}

/// Booking request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewAppointment {
    pub patient: String,
    pub slot: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_center: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl NewAppointment {
    pub fn new(patient: impl Into<String>, slot: impl Into<String>) -> Self {
        Self {
            patient: patient.into(),
            slot: slot.into(),
            health_center: None,
            service: None,
            notes: None,
        }
    }
}

/// Partial appointment update; `None` fields are left unchanged
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppointmentUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slot: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_center: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}
