//! Administrator-only views

use serde::{Deserialize, Serialize};

/// Aggregate counters shown on the admin dashboard
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminStats {
    #[serde(default)]
    pub total_users: u64,
    #[serde(default)]
    pub total_appointments: u64,
    #[serde(default)]
    pub pending_appointments: u64,
    #[serde(default)]
    pub total_health_centers: u64,
    #[serde(default)]
    pub total_services: u64,
}

/// One entry of the audit trail
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityLog {
    pub id: String,
    pub action: String,
    #[serde(default)]
    pub actor: Option<String>,
    #[serde(default)]
    pub details: Option<String>,
    /// Unix ms
    #[serde(default)]
    pub created_at: i64,
}
