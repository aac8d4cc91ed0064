//! Cached collection keys and entries

use chrono::{DateTime, Utc};
use std::fmt;

/// A remote collection mirrored in the local cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    User,
    Appointments,
    Notifications,
    HealthCenters,
    Services,
}

impl Collection {
    /// Every cached collection
    pub const ALL: [Self; 5] = [
        Self::User,
        Self::Appointments,
        Self::Notifications,
        Self::HealthCenters,
        Self::Services,
    ];

    /// Collections refreshed after each drain of the sync queue
    pub const SHARED: [Self; 4] = [
        Self::Appointments,
        Self::Notifications,
        Self::HealthCenters,
        Self::Services,
    ];

    /// Storage key in the cache store
    pub const fn key(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Appointments => "appointments",
            Self::Notifications => "notifications",
            Self::HealthCenters => "healthCenters",
            Self::Services => "services",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Last known-good snapshot of a collection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry<T> {
    pub data: T,
    pub last_sync: DateTime<Utc>,
}
