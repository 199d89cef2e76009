//! API error handling module
//!
//! Provides a unified error type for all API endpoints with structured error variants.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use passkey_core::{ErrorKind, PasskeyError};
use thiserror::Error;

/// API error type with structured variants for different error categories
#[derive(Debug, Error)]
pub enum ApiError {
    /// Bad request - client provided invalid input
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Unauthorized - missing or invalid session
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Session layer failure - the session store could not be read or written
    #[error("Session error: {0}")]
    Session(#[from] tower_sessions::session::Error),

    /// Passkey engine error - protocol or storage failure
    #[error("Passkey error: {0}")]
    Passkey(#[from] PasskeyError),
}

impl ApiError {
    /// Create a bad request error
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    /// Create an unauthorized error
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized(message.into())
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Session(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Passkey(e) => match e.kind() {
                // Backend failures → 503
                ErrorKind::StorageUnavailable => StatusCode::SERVICE_UNAVAILABLE,

                // Concurrent flow or credential id already claimed → 409
                ErrorKind::Conflict => StatusCode::CONFLICT,

                // Every protocol rejection is the client's fault → 400
                ErrorKind::NotFound
                | ErrorKind::InvalidIdentity
                | ErrorKind::MalformedPayload
                | ErrorKind::ChallengeMissingOrExpired
                | ErrorKind::ChallengeMismatch
                | ErrorKind::TypeMismatch
                | ErrorKind::OriginMismatch
                | ErrorKind::RelyingPartyMismatch
                | ErrorKind::UserPresenceMissing
                | ErrorKind::UserVerificationMissing
                | ErrorKind::UnsupportedAlgorithm
                | ErrorKind::SignatureInvalid
                | ErrorKind::ReplayDetected
                | ErrorKind::NoCredential => StatusCode::BAD_REQUEST,
            },
        }
    }

    /// Get the error code for programmatic error handling
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "INVALID_INPUT",
            Self::Unauthorized(_) => "UNAUTHORIZED",
            Self::Session(_) => ErrorKind::StorageUnavailable.code(),
            Self::Passkey(e) => e.kind().code(),
        }
    }

    /// Get sanitized error message for client response
    fn client_message(&self) -> String {
        match self {
            Self::Passkey(e) => match e.kind() {
                ErrorKind::StorageUnavailable => "Storage unavailable".to_string(),
                ErrorKind::SignatureInvalid => "Signature verification failed".to_string(),
                ErrorKind::ReplayDetected => "Signature counter did not advance".to_string(),
                ErrorKind::ChallengeMissingOrExpired | ErrorKind::ChallengeMismatch => {
                    "Invalid challenge".to_string()
                }
                ErrorKind::NoCredential | ErrorKind::NotFound => "User not found".to_string(),
                // Remaining kinds describe the client's own input
                _ => e.to_string(),
            },
            Self::Session(_) => "Storage unavailable".to_string(),
            _ => self.to_string(),
        }
    }

    /// Get the error category for logging
    fn error_category(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "bad_request",
            Self::Unauthorized(_) => "unauthorized",
            Self::Session(_) => "session",
            Self::Passkey(_) => "passkey",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let category = self.error_category();
        let code = self.error_code();
        let internal_message = self.to_string();
        let client_message = self.client_message();

        // Log based on severity, always including internal details
        if status.is_server_error() {
            tracing::error!(
                status = %status,
                category = category,
                code = code,
                error = %internal_message,
                "Server error"
            );
        } else {
            tracing::warn!(
                status = %status,
                category = category,
                code = code,
                error = %internal_message,
                "Client error"
            );
        }

        let body = serde_json::json!({
            "error": client_message,
            "code": code,
        });

        (status, Json(body)).into_response()
    }
}
