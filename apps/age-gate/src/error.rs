//! Error types for age assertions.
//!
//! Every variant carries a stable machine code (`error_code()`), which is what
//! relying pages branch on. Human-readable text is for logs only.
//! The signing service converts these into JSON responses via `ResponseError`.

use actix_web::{HttpResponse, ResponseError, http::StatusCode};
use serde::Serialize;
use thiserror::Error;

/// Error type shared by the token codec, cache, estimators and handshake.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AgeGateError {
    // Handshake outcomes
    #[error("Verifier context could not be opened (popup blocked)")]
    PopupBlocked,

    #[error("Verification cancelled: verifier context closed")]
    Cancelled,

    #[error("Verification attempt timed out after {0} ms")]
    Timeout(u64),

    // Verifier-reported failures
    #[error("Webcam error: {0}")]
    Webcam(String),

    #[error("Different face detected: {0}")]
    DifferentFace(String),

    #[error("No face detected: {0}")]
    NoFace(String),

    #[error("Liveness step '{0}' failed after retries")]
    WrongPoseExceededRetries(String),

    // Token verification
    #[error("Malformed token: {0}")]
    Malformed(String),

    #[error("Token expired at {exp} (now {now})")]
    Expired { exp: i64, now: i64 },

    #[error("Token subject mismatch: expected {expected}, got {actual}")]
    InvalidSubject { expected: i32, actual: i32 },

    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    // Signing
    #[error("Signing failed: {0}")]
    SigningFailed(String),

    #[error("Signing service unreachable: {0}")]
    SignerUnreachable(String),

    // Signing service auth
    #[error("Unauthorized")]
    Unauthorized,

    // Infrastructure
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// JSON error response body.
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    code: &'static str,
}

impl AgeGateError {
    /// Stable machine code for this error.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::PopupBlocked => "POPUP_BLOCKED",
            Self::Cancelled => "CANCELLED",
            Self::Timeout(_) => "TIMEOUT",
            Self::Webcam(_) => "WEBCAM_ERROR",
            Self::DifferentFace(_) => "DIFFERENT_FACE_ERROR",
            Self::NoFace(_) => "NO_FACE",
            Self::WrongPoseExceededRetries(_) => "WRONG_POSE_EXCEEDED_RETRIES",
            Self::Malformed(_) => "MALFORMED",
            Self::Expired { .. } => "EXPIRED",
            Self::InvalidSubject { .. } => "INVALID_SUBJECT",
            Self::InvalidSignature(_) => "INVALID_SIGNATURE",
            Self::SigningFailed(_) => "SIGNING_FAILED",
            Self::SignerUnreachable(_) => "SIGNER_UNREACHABLE",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::Config(_) => "CONFIG_ERROR",
            Self::Storage(_) => "STORAGE_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::InvalidInput(_) => "INVALID_INPUT",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// True for failures of the token checks (MALFORMED, EXPIRED, INVALID_SUBJECT,
    /// INVALID_SIGNATURE). These are handled locally by clearing the cache.
    pub fn is_token_rejection(&self) -> bool {
        matches!(
            self,
            Self::Malformed(_)
                | Self::Expired { .. }
                | Self::InvalidSubject { .. }
                | Self::InvalidSignature(_)
        )
    }
}

impl ResponseError for AgeGateError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidInput(_) | Self::Malformed(_) | Self::Serialization(_) => {
                StatusCode::BAD_REQUEST
            }

            Self::Unauthorized => StatusCode::UNAUTHORIZED,

            Self::Expired { .. } | Self::InvalidSubject { .. } | Self::InvalidSignature(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }

            Self::SignerUnreachable(_) => StatusCode::BAD_GATEWAY,

            Self::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,

            Self::PopupBlocked
            | Self::Cancelled
            | Self::Webcam(_)
            | Self::DifferentFace(_)
            | Self::NoFace(_)
            | Self::WrongPoseExceededRetries(_) => StatusCode::CONFLICT,

            Self::SigningFailed(_) | Self::Config(_) | Self::Storage(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_response(&self) -> HttpResponse {
        // Server-side details stay in the logs
        let error = if self.status_code().is_server_error() {
            "Internal server error".to_string()
        } else {
            self.to_string()
        };
        let body = ErrorResponse {
            error,
            code: self.error_code(),
        };

        HttpResponse::build(self.status_code()).json(body)
    }
}

// Conversion from common error types

impl From<std::io::Error> for AgeGateError {
    fn from(err: std::io::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for AgeGateError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<redb::Error> for AgeGateError {
    fn from(err: redb::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<redb::DatabaseError> for AgeGateError {
    fn from(err: redb::DatabaseError) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<redb::TableError> for AgeGateError {
    fn from(err: redb::TableError) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<redb::TransactionError> for AgeGateError {
    fn from(err: redb::TransactionError) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<redb::CommitError> for AgeGateError {
    fn from(err: redb::CommitError) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<redb::StorageError> for AgeGateError {
    fn from(err: redb::StorageError) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<reqwest::Error> for AgeGateError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::SignerUnreachable(format!("Request timed out: {err}"))
        } else if err.is_connect() {
            Self::SignerUnreachable(format!("Connection failed: {err}"))
        } else {
            Self::SigningFailed(err.to_string())
        }
    }
}

/// Result type alias for age-gate operations.
pub type AgeGateResult<T> = Result<T, AgeGateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(AgeGateError::PopupBlocked.error_code(), "POPUP_BLOCKED");
        assert_eq!(
            AgeGateError::DifferentFace("distance 0.700".to_string()).error_code(),
            "DIFFERENT_FACE_ERROR"
        );
        assert_eq!(
            AgeGateError::Expired { exp: 1, now: 2 }.error_code(),
            "EXPIRED"
        );
        assert_eq!(AgeGateError::Timeout(10).error_code(), "TIMEOUT");
    }

    #[test]
    fn test_token_rejections() {
        assert!(AgeGateError::Malformed("x".to_string()).is_token_rejection());
        assert!(AgeGateError::InvalidSignature("x".to_string()).is_token_rejection());
        assert!(!AgeGateError::Cancelled.is_token_rejection());
        assert!(!AgeGateError::Storage("x".to_string()).is_token_rejection());
    }

    #[test]
    fn test_error_status_codes() {
        assert_eq!(
            AgeGateError::InvalidInput("test".to_string()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AgeGateError::Unauthorized.status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            AgeGateError::Internal("boom".to_string()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[actix_web::test]
    async fn test_server_errors_hide_details() {
        let resp = AgeGateError::Storage("disk /var/lib/x full".to_string()).error_response();
        let body = actix_web::body::to_bytes(resp.into_body()).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["error"], "Internal server error");
        assert_eq!(body["code"], "STORAGE_ERROR");
    }
}
