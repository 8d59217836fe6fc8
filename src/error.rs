//! # Error Handling
//!
//! This module defines the relay server's error type and how it is converted to
//! HTTP responses.
//!
//! ## Response Contract:
//! The browser-facing endpoints never expose a structured error object. Every
//! failure is rendered as:
//! ```json
//! { "success": false, "error": "human readable message" }
//! ```
//! Clients only look at `success` and `error`; the HTTP status is informational.
//!
//! ## Status Code Mapping:
//! - **Remote**: Whatever status the remote calling API answered with
//! - **ValidationError**: 400 (Bad Request)

use crate::vapi::VapiError;
use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;

/// Custom error types for the relay server.
///
/// ## Usage Example:
/// ```rust,ignore
/// return Err(AppError::ValidationError("phoneNumber is required".to_string()));
/// ```
#[derive(Debug)]
pub enum AppError {
    /// User input failed validation rules
    ValidationError(String),

    /// The remote calling API rejected or failed the request
    Remote { status: u16, message: String },
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::ValidationError(msg) => write!(f, "{}", msg),
            AppError::Remote { message, .. } => write!(f, "{}", message),
        }
    }
}

/// Converts errors into the `{success: false, error}` body.
///
/// ## Why the remote status is kept:
/// The relay is a thin pass-through, so a 401 from the remote API stays a 401
/// here. Unknown or out-of-range codes fall back to 502 (Bad Gateway).
impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::ValidationError(_) => StatusCode::BAD_REQUEST,
            AppError::Remote { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(json!({
            "success": false,
            "error": self.to_string(),
        }))
    }
}

/// Remote API failures keep their upstream status and message.
impl From<VapiError> for AppError {
    fn from(err: VapiError) -> Self {
        let status = err.status();
        let message = match err {
            VapiError::Api { message, .. } => message,
            other => other.to_string(),
        };
        AppError::Remote { status, message }
    }
}

/// Type alias for Results that use our custom error type.
pub type AppResult<T> = Result<T, AppError>;
