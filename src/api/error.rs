//! API error type with HTTP status mapping.

use crate::api::types::ApiErrorResponse;
use crate::error::{Error, ErrorKind};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

/// API error with an HTTP status code.
#[derive(Debug)]
pub enum ApiError {
    /// Resource not found (404).
    NotFound(String),
    /// Resource already exists (409).
    Conflict(String),
    /// Invalid input (400).
    BadRequest(String),
    /// Internal server error (500).
    Internal(String),
}

impl ApiError {
    /// Map an error on the deploy/update path. The historical provider
    /// contract surfaces image and driver failures as 400 there; only
    /// missing resources keep their 404.
    pub fn deploy(err: Error) -> Self {
        match err.kind() {
            ErrorKind::NotFound => Self::NotFound(err.to_string()),
            _ => Self::BadRequest(err.to_string()),
        }
    }

    /// Map an error on an invocation path: missing functions are 404,
    /// everything else (including `NoHealthyInstance`) is 500.
    pub fn invoke(err: Error) -> Self {
        match err.kind() {
            ErrorKind::NotFound => Self::NotFound(err.to_string()),
            _ => Self::Internal(err.to_string()),
        }
    }
}

impl From<Error> for ApiError {
    /// Standard mapping, used on scale and delete paths: validation 400,
    /// not-found 404, conflict 409, everything else 500.
    fn from(err: Error) -> Self {
        match err.kind() {
            ErrorKind::Validation => Self::BadRequest(err.to_string()),
            ErrorKind::NotFound => Self::NotFound(err.to_string()),
            ErrorKind::Conflict => Self::Conflict(err.to_string()),
            ErrorKind::Image
            | ErrorKind::Driver
            | ErrorKind::NoHealthyInstance
            | ErrorKind::Cancelled
            | ErrorKind::Internal => Self::Internal(err.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg),
        };
        (
            status,
            Json(ApiErrorResponse {
                error: message,
                code,
            }),
        )
            .into_response()
    }
}
