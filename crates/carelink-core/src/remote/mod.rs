//! Boundary to the remote scheduling service.
//!
//! The rest of the crate only talks to the server through [`RemoteService`],
//! so the HTTP client can be swapped for a scripted double in tests.

pub mod endpoints;
mod http;

use std::fmt;
use std::future::Future;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::SyncAction;

pub use http::HttpRemote;

/// HTTP verb of a remote request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl From<SyncAction> for Method {
    fn from(action: SyncAction) -> Self {
        match action {
            SyncAction::Create => Self::Post,
            SyncAction::Update => Self::Put,
            SyncAction::Delete => Self::Delete,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
        })
    }
}

/// A request against one resource of the remote service
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: Method,
    pub endpoint: String,
    pub body: Option<serde_json::Value>,
}

impl ApiRequest {
    pub fn get(endpoint: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            endpoint: endpoint.into(),
            body: None,
        }
    }

    pub fn post(endpoint: impl Into<String>, body: serde_json::Value) -> Self {
        Self {
            method: Method::Post,
            endpoint: endpoint.into(),
            body: Some(body),
        }
    }

    pub fn put(endpoint: impl Into<String>, body: Option<serde_json::Value>) -> Self {
        Self {
            method: Method::Put,
            endpoint: endpoint.into(),
            body,
        }
    }

    pub fn delete(endpoint: impl Into<String>) -> Self {
        Self {
            method: Method::Delete,
            endpoint: endpoint.into(),
            body: None,
        }
    }
}

/// Envelope every remote resource answers with
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl ApiResponse {
    pub fn ok(data: serde_json::Value) -> Self {
        Self {
            success: true,
            message: None,
            data: Some(data),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
            data: None,
        }
    }

    /// Decode the `data` field of a successful response
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, RemoteError> {
        let data = self.data.clone().unwrap_or(serde_json::Value::Null);
        serde_json::from_value(data).map_err(|error| RemoteError::Decode(error.to_string()))
    }

    /// Server-assigned `id` of the returned record, if any
    pub fn record_id(&self) -> Option<String> {
        match self.data.as_ref()?.get("id")? {
            serde_json::Value::String(id) => Some(id.clone()),
            serde_json::Value::Number(id) => Some(id.to_string()),
            _ => None,
        }
    }

    /// Message to surface when the server rejected a request
    pub fn failure_message(&self) -> String {
        self.message
            .clone()
            .unwrap_or_else(|| "request rejected by server".to_string())
    }
}

/// Failure to obtain any answer from the remote service
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
    #[error("network request failed: {0}")]
    Transport(String),
    #[error("request timed out")]
    Timeout,
    #[error("unexpected HTTP status {0}")]
    Status(u16),
    #[error("invalid response payload: {0}")]
    Decode(String),
}

/// Request/response access to the remote scheduling service
pub trait RemoteService: Send + Sync + 'static {
    /// Send one request and return the server's envelope
    ///
    /// `Err` means no usable answer was obtained (network failure, timeout).
    /// A server-side rejection is `Ok` with `success == false`.
    fn request(
        &self,
        request: ApiRequest,
    ) -> impl Future<Output = Result<ApiResponse, RemoteError>> + Send;

    /// Probe the health endpoint; `Ok` only for a 2xx answer
    fn health_check(&self) -> impl Future<Output = Result<(), RemoteError>> + Send;
}
