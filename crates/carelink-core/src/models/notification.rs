//! Notification model

use serde::{Deserialize, Serialize};

/// A notification addressed to the signed-in user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub read: bool,
    /// Creation timestamp (Unix ms)
    #[serde(default)]
    pub created_at: i64,
}
