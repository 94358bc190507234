//! Local REST API module.
//!
//! Exposes the sync core's read model and mutation verbs to UI consumers. Every
//! response carries the scope generation it was produced under.

mod entities;
mod session;
mod team;

pub use entities::*;
pub use session::*;
pub use team::*;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::errors::{ApiError, SyncError};

/// Success response envelope.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    pub data: T,
    pub scope_generation: u64,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn new(data: T, scope_generation: u64) -> Self {
        Self {
            success: true,
            data,
            scope_generation,
        }
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        (StatusCode::OK, Json(self)).into_response()
    }
}

/// Response type that can be either success or error.
pub type ApiResult<T> = Result<ApiResponse<T>, ApiError>;

/// Create a successful API response.
pub fn success<T: Serialize>(data: T, scope_generation: u64) -> ApiResult<T> {
    Ok(ApiResponse::new(data, scope_generation))
}

/// Create an error API response.
pub fn error<T: Serialize>(err: SyncError, scope_generation: u64) -> ApiResult<T> {
    Err(ApiError {
        error: err,
        scope_generation,
    })
}
