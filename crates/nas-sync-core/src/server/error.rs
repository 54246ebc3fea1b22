//! HTTP error handling for the assembler API.
//!
//! This module provides conversion from core library errors to appropriate
//! HTTP responses with JSON error bodies.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// API error response body.
#[derive(Debug, Clone, Serialize)]
pub struct ApiError {
    /// Error code (e.g., "E102" for a destination conflict)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Human-readable error message
    pub message: String,
    /// Additional details about the error
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ApiError {
    /// Create a new API error with a message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
            details: None,
        }
    }

    /// Create a new API error with code and message.
    #[must_use]
    pub fn with_code(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: Some(code.into()),
            message: message.into(),
            details: None,
        }
    }

    /// Add details to the error.
    #[must_use]
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// Create a bad request error.
    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::with_code("E108", message)
    }

    /// Get the HTTP status code for this error.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self.code.as_deref() {
            Some("E101") => StatusCode::NOT_FOUND,
            Some("E102") => StatusCode::CONFLICT,
            Some("E103" | "E104" | "E105") => StatusCode::UNPROCESSABLE_ENTITY,
            Some("E106") => StatusCode::BAD_GATEWAY,
            Some("E107") => StatusCode::GATEWAY_TIMEOUT,
            Some("E108") => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        let status = match self.code.as_deref() {
            None if self.message.contains("not found") => StatusCode::NOT_FOUND,
            None if self.message.contains("invalid") => StatusCode::BAD_REQUEST,
            _ => status,
        };

        if status.is_server_error() {
            tracing::warn!(status = %status, message = %self.message, "Request failed");
        } else {
            tracing::debug!(status = %status, message = %self.message, "Request rejected");
        }

        (status, Json(self)).into_response()
    }
}

impl From<crate::error::Error> for ApiError {
    fn from(err: crate::error::Error) -> Self {
        Self {
            code: err.code().map(String::from),
            message: err.to_string(),
            details: err.suggestion().map(String::from),
        }
    }
}

impl From<std::io::Error> for ApiError {
    fn from(err: std::io::Error) -> Self {
        Self {
            code: None,
            message: format!("I/O error: {err}"),
            details: None,
        }
    }
}

/// Result type for handlers.
pub type ApiResult<T> = Result<T, ApiError>;

/// Extension trait for converting Results to ApiResults.
pub trait IntoApiResult<T> {
    /// Convert to an API result.
    #[allow(clippy::missing_errors_doc)]
    fn into_api_result(self) -> ApiResult<T>;
}

impl<T> IntoApiResult<T> for crate::error::Result<T> {
    fn into_api_result(self) -> ApiResult<T> {
        self.map_err(ApiError::from)
    }
}
