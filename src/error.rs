//! Error types for the Sagasu server

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Application-wide result type
pub type Result<T> = std::result::Result<T, AppError>;

/// Errors answered before a WebSocket upgrade
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Upload already in progress: {0}")]
    Conflict(String),

    #[error("Too many concurrent uploads (max: {0})")]
    Busy(usize),
}

/// Error response body
#[derive(Serialize)]
struct ErrorResponse {
    ok: bool,
    error: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::Forbidden(segment) => (StatusCode::FORBIDDEN, segment.clone()),
            AppError::NotFound(segment) => (StatusCode::NOT_FOUND, segment.clone()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::Conflict(path) => (StatusCode::CONFLICT, path.clone()),
            AppError::Busy(_) => (StatusCode::SERVICE_UNAVAILABLE, self.to_string()),
        };

        (status, Json(ErrorResponse { ok: false, error: message })).into_response()
    }
}
