//! Runtime configuration for Carelink clients.
//!
//! Values come from a JSON runtime config file under the platform data
//! directory, then environment variables override individual fields.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::connectivity::MonitorConfig;
use crate::error::{Error, Result};

const CONFIG_DIR: &str = "carelink";
const RUNTIME_CONFIG_FILE: &str = "client-config.json";
const DATABASE_FILE: &str = "carelink-cache.db";

const DEFAULT_API_BASE_URL: &str = "http://localhost:3000/api";
const DEFAULT_PROBE_INTERVAL_SECS: u64 = 30;
const DEFAULT_PROBE_TIMEOUT_SECS: u64 = 5;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 15;

/// Client configuration shared by every Carelink front end
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ClientConfig {
    /// Base URL of the scheduling API, e.g. `https://api.example.com/api`
    pub api_base_url: String,
    /// Path of the health endpoint probed by the connectivity monitor
    pub health_path: String,
    pub probe_interval_secs: u64,
    pub probe_timeout_secs: u64,
    pub request_timeout_secs: u64,
    /// Cache database location; defaults to the platform data directory
    pub database_path: Option<PathBuf>,
    /// Bearer token passed through to the API (obtained elsewhere)
    pub auth_token: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            health_path: crate::remote::endpoints::HEALTH.to_string(),
            probe_interval_secs: DEFAULT_PROBE_INTERVAL_SECS,
            probe_timeout_secs: DEFAULT_PROBE_TIMEOUT_SECS,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            database_path: None,
            auth_token: None,
        }
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("ClientConfig")
            .field("api_base_url", &self.api_base_url)
            .field("health_path", &self.health_path)
            .field("probe_interval_secs", &self.probe_interval_secs)
            .field("probe_timeout_secs", &self.probe_timeout_secs)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("database_path", &self.database_path)
            .field("auth_token", &self.auth_token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl ClientConfig {
    pub const fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_secs)
    }

    pub const fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub const fn monitor_config(&self) -> MonitorConfig {
        MonitorConfig {
            probe_interval: self.probe_interval(),
            probe_timeout: self.probe_timeout(),
        }
    }

    /// Cache database path, falling back to the platform data directory
    pub fn database_path(&self) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(|| data_dir().join(DATABASE_FILE))
    }

    /// Override fields from `CARELINK_*` variables provided by `lookup`
    #[must_use]
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let var = |name: &str| non_blank(lookup(name));

        if let Some(url) = var("CARELINK_API_URL") {
            self.api_base_url = url;
        }
        if let Some(path) = var("CARELINK_HEALTH_PATH") {
            self.health_path = path;
        }
        if let Some(secs) = var("CARELINK_PROBE_INTERVAL_SECS").and_then(|v| parse_secs(&v)) {
            self.probe_interval_secs = secs;
        }
        if let Some(secs) = var("CARELINK_PROBE_TIMEOUT_SECS").and_then(|v| parse_secs(&v)) {
            self.probe_timeout_secs = secs;
        }
        if let Some(secs) = var("CARELINK_REQUEST_TIMEOUT_SECS").and_then(|v| parse_secs(&v)) {
            self.request_timeout_secs = secs;
        }
        if let Some(path) = var("CARELINK_DATABASE_PATH") {
            self.database_path = Some(PathBuf::from(path));
        }
        if let Some(token) = var("CARELINK_AUTH_TOKEN") {
            self.auth_token = Some(token);
        }
        self
    }

    /// Check the values a client cannot run without
    pub fn validate(&self) -> Result<()> {
        let url = non_blank(Some(self.api_base_url.clone()))
            .ok_or_else(|| Error::InvalidInput("api_base_url must not be empty".to_string()))?;
        if !has_http_scheme(&url) {
            return Err(Error::InvalidInput(
                "api_base_url must include http:// or https://".to_string(),
            ));
        }
        if self.probe_interval_secs == 0 || self.probe_timeout_secs == 0 {
            return Err(Error::InvalidInput(
                "probe interval and timeout must be greater than zero".to_string(),
            ));
        }
        if self.request_timeout_secs == 0 {
            return Err(Error::InvalidInput(
                "request timeout must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Platform data directory used for Carelink files
pub fn data_dir() -> PathBuf {
    dirs::data_local_dir()
        .or_else(dirs::data_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(CONFIG_DIR)
}

pub fn default_config_path() -> PathBuf {
    data_dir().join(RUNTIME_CONFIG_FILE)
}

/// Resolve configuration from the default file and the process environment
pub fn resolve_config() -> ClientConfig {
    load_config_from_path(&default_config_path()).with_overrides(|name| std::env::var(name).ok())
}

/// Load the runtime config file, falling back to defaults when unreadable
pub fn load_config_from_path(path: &Path) -> ClientConfig {
    if !path.exists() {
        return ClientConfig::default();
    }

    match std::fs::read_to_string(path) {
        Ok(content) => match serde_json::from_str::<ClientConfig>(&content) {
            Ok(config) => config,
            Err(error) => {
                tracing::warn!(
                    "Failed to parse runtime config at {}: {}",
                    path.display(),
                    error
                );
                ClientConfig::default()
            }
        },
        Err(error) => {
            tracing::warn!(
                "Failed to read runtime config at {}: {}",
                path.display(),
                error
            );
            ClientConfig::default()
        }
    }
}

pub fn save_config_to_path(config: &ClientConfig, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let content = serde_json::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}

/// Trimmed text, or `None` when nothing but whitespace remains
pub fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty())
}

/// Whether a URL uses a scheme the HTTP client can talk to
pub fn has_http_scheme(url: &str) -> bool {
    ["http://", "https://"]
        .iter()
        .any(|scheme| url.starts_with(scheme))
}

fn parse_secs(value: &str) -> Option<u64> {
    match value.parse::<u64>() {
        Ok(secs) if secs > 0 => Some(secs),
        _ => {
            tracing::warn!("Ignoring invalid duration override '{}'", value);
            None
        }
    }
}
