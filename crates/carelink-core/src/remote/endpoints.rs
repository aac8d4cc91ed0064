//! Resource paths of the remote scheduling service

pub const HEALTH: &str = "/health";
pub const PROFILE: &str = "/users/me";
pub const APPOINTMENTS: &str = "/appointments";
pub const NOTIFICATIONS: &str = "/notifications";
pub const NOTIFICATIONS_READ_ALL: &str = "/notifications/read-all";
pub const HEALTH_CENTERS: &str = "/health-centers";
pub const SERVICES: &str = "/services";
pub const DEVICE_TOKENS: &str = "/devices/token";
pub const ADMIN_STATS: &str = "/admin/stats";
pub const ACTIVITY_LOGS: &str = "/admin/activity-logs";

pub fn appointment(id: &str) -> String {
    format!("{APPOINTMENTS}/{id}")
}

pub fn appointment_status(id: &str) -> String {
    format!("{APPOINTMENTS}/{id}/status")
}

pub fn notification_read(id: &str) -> String {
    format!("{NOTIFICATIONS}/{id}/read")
}

pub fn service(id: &str) -> String {
    format!("{SERVICES}/{id}")
}

pub fn activity_logs(limit: usize) -> String {
    format!("{ACTIVITY_LOGS}?limit={limit}")
}
