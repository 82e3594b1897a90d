//! # Error Handling
//!
//! Defines the crate-wide error type and how it is converted to HTTP
//! responses on the operational surface.
//!
//! ## Error Categories:
//! - **Internal**: Server-side problems (500 errors)
//! - **BadRequest**: Client sent invalid data (400 errors)
//! - **ConfigError**: Configuration problems (500 errors)
//! - **Codec**: Malformed audio payloads or transcode failures (400 errors)
//! - **Agent**: Failures on the voice-agent leg (502 errors)
//!
//! Inside the bridge most of these are logged and swallowed rather than
//! surfaced — a malformed frame must never take down a call.

use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;

/// Custom error types for the application.
#[derive(Debug)]
pub enum AppError {
    /// Internal server errors (lock poisoning, task failures, etc.)
    Internal(String),

    /// Client sent invalid or malformed data
    BadRequest(String),

    /// Configuration file or environment variable problems
    ConfigError(String),

    /// Audio payload could not be decoded or transcoded
    Codec(String),

    /// The voice-agent endpoint failed (connect, handshake, transport)
    Agent(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            AppError::Codec(msg) => write!(f, "Codec error: {}", msg),
            AppError::Agent(msg) => write!(f, "Agent error: {}", msg),
        }
    }
}

/// Converts errors into JSON HTTP responses with a consistent structure:
/// `{ "error": { "type", "message", "timestamp" } }`.
impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        let (status, error_type, message) = match self {
            AppError::Internal(msg) => (
                actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                msg.clone(),
            ),
            AppError::BadRequest(msg) => (
                actix_web::http::StatusCode::BAD_REQUEST,
                "bad_request",
                msg.clone(),
            ),
            AppError::ConfigError(msg) => (
                actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,
                "config_error",
                msg.clone(),
            ),
            AppError::Codec(msg) => (
                actix_web::http::StatusCode::BAD_REQUEST,
                "codec_error",
                msg.clone(),
            ),
            AppError::Agent(msg) => (
                actix_web::http::StatusCode::BAD_GATEWAY,
                "agent_error",
                msg.clone(),
            ),
        };

        HttpResponse::build(status).json(json!({
            "error": {
                "type": error_type,
                "message": message,
                "timestamp": chrono::Utc::now().to_rfc3339()
            }
        }))
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

/// JSON parsing failures are client data errors, not server faults.
impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::BadRequest(format!("JSON parsing error: {}", err))
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(err.to_string())
    }
}

/// Wire audio payloads arrive base64-encoded; a bad payload is a codec
/// error, never a panic.
impl From<base64::DecodeError> for AppError {
    fn from(err: base64::DecodeError) -> Self {
        AppError::Codec(format!("invalid base64 payload: {}", err))
    }
}

/// Type alias for Results that use our custom error type.
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_formats() {
        let err = AppError::Codec("odd byte count".to_string());
        assert_eq!(err.to_string(), "Codec error: odd byte count");

        let err = AppError::Agent("handshake refused".to_string());
        assert_eq!(err.to_string(), "Agent error: handshake refused");
    }

    #[test]
    fn test_base64_error_becomes_codec() {
        use base64::Engine;

        let result = base64::engine::general_purpose::STANDARD.decode("not//valid!!");
        let err: AppError = result.unwrap_err().into();
        assert!(matches!(err, AppError::Codec(_)));
    }
}
