//! Error handling module for the sync daemon.
//!
//! Provides a single error type shared by the sync core, the remote client and the
//! local API, with mapping to HTTP status codes and response envelopes.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

/// Error codes as constants to avoid stringly-typed errors.
#[allow(dead_code)]
pub mod codes {
    pub const UNAUTHORIZED: &str = "UNAUTHORIZED";
    pub const FORBIDDEN: &str = "FORBIDDEN";
    pub const NOT_FOUND: &str = "NOT_FOUND";
    pub const VALIDATION_ERROR: &str = "VALIDATION_ERROR";
    pub const REMOTE_ERROR: &str = "REMOTE_ERROR";
    pub const NETWORK_ERROR: &str = "NETWORK_ERROR";
    pub const SCOPE_CHANGED: &str = "SCOPE_CHANGED";
    pub const STORAGE_ERROR: &str = "STORAGE_ERROR";
    pub const CONFIG_ERROR: &str = "CONFIG_ERROR";
    pub const INTERNAL_ERROR: &str = "INTERNAL_ERROR";
    pub const BAD_REQUEST: &str = "BAD_REQUEST";
}

/// Sync error type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// No active session, or the remote rejected our credentials
    Unauthorized(String),
    /// The remote refused to act on another tenant's record
    Forbidden(String),
    /// Resource not found
    NotFound(String),
    /// Validation error
    Validation(String),
    /// The remote answered with a non-success status
    Remote { status: u16, message: String },
    /// The remote could not be reached
    Network(String),
    /// The effective scope changed while the request was in flight
    ScopeChanged,
    /// Snapshot storage error
    Storage(String),
    /// Invalid configuration
    Config(String),
    /// Internal error
    Internal(String),
    /// Bad request (malformed payloads)
    BadRequest(String),
}

impl SyncError {
    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            SyncError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            SyncError::Forbidden(_) => StatusCode::FORBIDDEN,
            SyncError::NotFound(_) => StatusCode::NOT_FOUND,
            SyncError::Validation(_) => StatusCode::BAD_REQUEST,
            SyncError::Remote { .. } => StatusCode::BAD_GATEWAY,
            SyncError::Network(_) => StatusCode::BAD_GATEWAY,
            SyncError::ScopeChanged => StatusCode::CONFLICT,
            SyncError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            SyncError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            SyncError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            SyncError::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }

    /// Get the error code for this error.
    pub fn error_code(&self) -> &'static str {
        match self {
            SyncError::Unauthorized(_) => codes::UNAUTHORIZED,
            SyncError::Forbidden(_) => codes::FORBIDDEN,
            SyncError::NotFound(_) => codes::NOT_FOUND,
            SyncError::Validation(_) => codes::VALIDATION_ERROR,
            SyncError::Remote { .. } => codes::REMOTE_ERROR,
            SyncError::Network(_) => codes::NETWORK_ERROR,
            SyncError::ScopeChanged => codes::SCOPE_CHANGED,
            SyncError::Storage(_) => codes::STORAGE_ERROR,
            SyncError::Config(_) => codes::CONFIG_ERROR,
            SyncError::Internal(_) => codes::INTERNAL_ERROR,
            SyncError::BadRequest(_) => codes::BAD_REQUEST,
        }
    }

    /// Get the error message.
    pub fn message(&self) -> String {
        match self {
            SyncError::Unauthorized(msg) => msg.clone(),
            SyncError::Forbidden(msg) => msg.clone(),
            SyncError::NotFound(msg) => msg.clone(),
            SyncError::Validation(msg) => msg.clone(),
            SyncError::Remote { message, .. } => message.clone(),
            SyncError::Network(msg) => msg.clone(),
            SyncError::ScopeChanged => "Scope changed while the request was in flight".to_string(),
            SyncError::Storage(msg) => msg.clone(),
            SyncError::Config(msg) => msg.clone(),
            SyncError::Internal(msg) => msg.clone(),
            SyncError::BadRequest(msg) => msg.clone(),
        }
    }

    /// Message shown to the user, falling back when the remote gave none.
    pub fn user_message(&self, fallback: &str) -> String {
        let message = self.message();
        if message.trim().is_empty() {
            fallback.to_string()
        } else {
            message
        }
    }
}

impl std::fmt::Display for SyncError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.error_code(), self.message())
    }
}

impl std::error::Error for SyncError {}

impl From<sqlx::Error> for SyncError {
    fn from(err: sqlx::Error) -> Self {
        tracing::error!("Database error: {:?}", err);
        SyncError::Storage(format!("Database error: {}", err))
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        tracing::error!("HTTP client error: {:?}", err);
        match err.status() {
            Some(status) => SyncError::Remote {
                status: status.as_u16(),
                message: format!("Request failed: {}", err),
            },
            None => SyncError::Network(format!("Request failed: {}", err)),
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        tracing::error!("JSON error: {:?}", err);
        SyncError::BadRequest(format!("JSON error: {}", err))
    }
}

/// Error details in the response envelope.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetails {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// Error response envelope.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub success: bool,
    pub error: ErrorDetails,
    pub scope_generation: u64,
}

impl ErrorResponse {
    pub fn new(error: &SyncError, scope_generation: u64) -> Self {
        let details = match error {
            SyncError::Remote { status, .. } => Some(serde_json::json!({ "remoteStatus": status })),
            _ => None,
        };

        Self {
            success: false,
            error: ErrorDetails {
                code: error.error_code().to_string(),
                message: error.message(),
                details,
            },
            scope_generation,
        }
    }
}

/// Wrapper type for errors that carry the scope generation they were produced under.
pub struct ApiError {
    pub error: SyncError,
    pub scope_generation: u64,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.error.status_code();
        let body = ErrorResponse::new(&self.error, self.scope_generation);
        (status, Json(body)).into_response()
    }
}
