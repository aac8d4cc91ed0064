//! Data models for Carelink

mod admin;
mod appointment;
mod catalog;
mod collection;
mod notification;
mod operation;
mod user;

pub use admin::{ActivityLog, AdminStats};
pub use appointment::{
    Appointment, AppointmentId, AppointmentStatus, AppointmentUpdate, NewAppointment,
    LOCAL_ID_PREFIX,
};
pub use catalog::{HealthCenter, NewService, Service, ServiceUpdate};
pub use collection::{CacheEntry, Collection};
pub use notification::Notification;
pub use operation::{
    DeviceRegistration, DomainPayload, OperationId, PendingOperation, SyncAction,
};
pub use user::{ProfileUpdate, UserProfile, UserRole};
