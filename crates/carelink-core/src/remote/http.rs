//! reqwest-backed implementation of the remote service boundary.

use std::fmt;
use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::Deserialize;

use super::{ApiRequest, ApiResponse, Method, RemoteError, RemoteService};
use crate::config::{has_http_scheme, non_blank, ClientConfig};
use crate::error::{Error, Result};

// Longest slice of a non-JSON error body quoted back to the caller.
const ERROR_PREVIEW_CHARS: usize = 180;

/// HTTP client for the scheduling API
#[derive(Clone)]
pub struct HttpRemote {
    base_url: String,
    health_url: String,
    auth_token: Option<String>,
    probe_timeout: Duration,
    client: Client,
}

impl fmt::Debug for HttpRemote {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("HttpRemote")
            .field("base_url", &self.base_url)
            .field("health_url", &self.health_url)
            .field("auth_token", &self.auth_token.as_ref().map(|_| "[REDACTED]"))
            .finish_non_exhaustive()
    }
}

impl HttpRemote {
    /// Build a client from resolved configuration
    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        let base_url = normalize_base_url(config.api_base_url.clone())?;
        let health_path = normalize_path(&config.health_path);
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()?;

        Ok(Self {
            health_url: format!("{base_url}{health_path}"),
            base_url,
            auth_token: non_blank(config.auth_token.clone()),
            probe_timeout: config.probe_timeout(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}{}", self.base_url, normalize_path(endpoint))
    }
}

impl RemoteService for HttpRemote {
    async fn request(&self, request: ApiRequest) -> std::result::Result<ApiResponse, RemoteError> {
        let url = self.url(&request.endpoint);
        let mut builder = match request.method {
            Method::Get => self.client.get(&url),
            Method::Post => self.client.post(&url),
            Method::Put => self.client.put(&url),
            Method::Delete => self.client.delete(&url),
        }
        .header(reqwest::header::ACCEPT, "application/json");

        if let Some(token) = &self.auth_token {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        tracing::debug!("{} {}", request.method, url);
        let response = builder.send().await.map_err(map_transport_error)?;
        let status = response.status();
        let body = response.text().await.map_err(map_transport_error)?;

        Ok(parse_response(status, &body))
    }

    async fn health_check(&self) -> std::result::Result<(), RemoteError> {
        let response = self
            .client
            .get(&self.health_url)
            .timeout(self.probe_timeout)
            .send()
            .await
            .map_err(map_transport_error)?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(RemoteError::Status(response.status().as_u16()))
        }
    }
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: Option<String>,
    message: Option<String>,
}

/// Turn an HTTP answer into the service envelope.
///
/// 2xx bodies that are not an envelope are wrapped as `data`; other statuses
/// become a failure carrying the best message the body offers.
fn parse_response(status: StatusCode, body: &str) -> ApiResponse {
    if status.is_success() {
        if body.trim().is_empty() {
            return ApiResponse {
                success: true,
                message: None,
                data: None,
            };
        }
        if let Ok(envelope) = serde_json::from_str::<ApiResponse>(body) {
            return envelope;
        }
        return match serde_json::from_str::<serde_json::Value>(body) {
            Ok(data) => ApiResponse::ok(data),
            Err(error) => ApiResponse::failure(format!("invalid JSON response: {error}")),
        };
    }

    if let Ok(envelope) = serde_json::from_str::<ApiResponse>(body) {
        return ApiResponse {
            success: false,
            ..envelope
        };
    }
    ApiResponse::failure(parse_api_error(status, body))
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ErrorBody>(body) {
        if let Some(message) = payload.message.or(payload.error) {
            return format!("{} ({})", message.trim(), status.as_u16());
        }
    }

    let preview: String = body.trim().chars().take(ERROR_PREVIEW_CHARS).collect();
    if preview.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{} ({})", preview, status.as_u16())
    }
}

fn map_transport_error(error: reqwest::Error) -> RemoteError {
    if error.is_timeout() {
        RemoteError::Timeout
    } else {
        RemoteError::Transport(error.to_string())
    }
}

fn normalize_base_url(raw: String) -> Result<String> {
    let url = non_blank(Some(raw))
        .ok_or_else(|| Error::InvalidInput("API base URL must not be empty".to_string()))?;
    if has_http_scheme(&url) {
        Ok(url.trim_end_matches('/').to_string())
    } else {
        Err(Error::InvalidInput(
            "API base URL must include http:// or https://".to_string(),
        ))
    }
}

fn normalize_path(path: &str) -> String {
    let path = path.trim();
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    }
}
