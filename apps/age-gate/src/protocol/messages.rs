//! Wire messages exchanged over the cross-context channel.
//!
//! The set of messages is closed. Anything that does not parse into one of
//! the variants below, including unknown `type` values, is dropped.

use serde::{Deserialize, Serialize};

use crate::error::AgeGateError;

/// Error text older relying pages match on.
pub const WEBCAM_ERROR_TEXT: &str = "Error accessing webcam";
pub const DIFFERENT_FACE_ERROR_TEXT: &str = "Different face detected for liveness check";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ProtocolMessage {
    /// Verifier asks whether its opener wants to drive the attempt.
    #[serde(rename = "check-parent-commandeer")]
    CheckParentCommandeer,

    /// Opener takes control and hands over the attempt parameters.
    #[serde(rename = "confirm-parent-commandeer")]
    ConfirmParentCommandeer(CommandeerConfirm),

    #[serde(rename = "age-estimation-result")]
    AgeEstimationResult(EstimationResult),

    #[serde(rename = "age-estimation-error")]
    AgeEstimationError(EstimationFailure),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandeerConfirm {
    pub nonce: String,
    pub liveness_check: bool,
    /// Token lifetime in milliseconds.
    pub cache_duration: u64,
    /// Origin of the relying page; the token subject is bound to it.
    pub origin: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EstimationResult {
    pub nonce: String,
    /// Informational. The relying side trusts only the age inside the token.
    pub age: u32,
    pub token: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EstimationFailure {
    pub nonce: String,
    /// Human-readable text.
    pub error: String,
    /// Typed code. Older verifiers omit it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<ErrorCode>,
}

/// Failure codes a verifier can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    WebcamError,
    DifferentFaceError,
    NoFace,
    WrongPoseExceededRetries,
    Timeout,
    InternalError,
    /// Codes from newer verifiers fall back to the text.
    #[serde(other)]
    Unknown,
}

impl ProtocolMessage {
    /// Parse a raw channel payload. Returns `None` for anything outside the
    /// closed message set.
    pub fn parse(data: &serde_json::Value) -> Option<Self> {
        match Self::deserialize(data) {
            Ok(message) => Some(message),
            Err(err) => {
                tracing::trace!(error = %err, "Dropping unrecognized message");
                None
            }
        }
    }

    pub fn to_value(&self) -> serde_json::Value {
        // Plain structs of strings and integers always serialize
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    /// Nonce carried by the message, if its type has one.
    pub fn nonce(&self) -> Option<&str> {
        match self {
            Self::CheckParentCommandeer => None,
            Self::ConfirmParentCommandeer(m) => Some(&m.nonce),
            Self::AgeEstimationResult(m) => Some(&m.nonce),
            Self::AgeEstimationError(m) => Some(&m.nonce),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::CheckParentCommandeer => "check-parent-commandeer",
            Self::ConfirmParentCommandeer(_) => "confirm-parent-commandeer",
            Self::AgeEstimationResult(_) => "age-estimation-result",
            Self::AgeEstimationError(_) => "age-estimation-error",
        }
    }
}

impl EstimationFailure {
    /// Describe a verifier-side failure for the wire.
    pub fn from_error(nonce: impl Into<String>, err: &AgeGateError) -> Self {
        let (error, code) = match err {
            AgeGateError::Webcam(_) => (WEBCAM_ERROR_TEXT.to_string(), ErrorCode::WebcamError),
            AgeGateError::DifferentFace(_) => (
                DIFFERENT_FACE_ERROR_TEXT.to_string(),
                ErrorCode::DifferentFaceError,
            ),
            AgeGateError::NoFace(_) => (err.to_string(), ErrorCode::NoFace),
            AgeGateError::WrongPoseExceededRetries(_) => {
                (err.to_string(), ErrorCode::WrongPoseExceededRetries)
            }
            AgeGateError::Timeout(_) => (err.to_string(), ErrorCode::Timeout),
            other => (other.to_string(), ErrorCode::InternalError),
        };
        Self {
            nonce: nonce.into(),
            error,
            code: Some(code),
        }
    }
}

/// Map a reported failure to the error surfaced by the relying side.
///
/// The typed code wins when present and known. Otherwise the text is matched
/// by substring, the way older relying pages did.
pub fn classify_error(failure: &EstimationFailure) -> AgeGateError {
    let text = failure.error.clone();
    match failure.code {
        Some(ErrorCode::WebcamError) => AgeGateError::Webcam(text),
        Some(ErrorCode::DifferentFaceError) => AgeGateError::DifferentFace(text),
        Some(ErrorCode::NoFace) => AgeGateError::NoFace(text),
        Some(ErrorCode::WrongPoseExceededRetries) => AgeGateError::WrongPoseExceededRetries(text),
        // A verifier-side timeout carries no duration the relying side can trust
        Some(ErrorCode::Timeout | ErrorCode::InternalError) => AgeGateError::Internal(text),
        Some(ErrorCode::Unknown) | None => {
            if text.contains("webcam") {
                AgeGateError::Webcam(text)
            } else if text.contains("Different face") {
                AgeGateError::DifferentFace(text)
            } else {
                AgeGateError::Internal(text)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_parse_known_messages() {
        assert_eq!(
            ProtocolMessage::parse(&json!({"type": "check-parent-commandeer"})),
            Some(ProtocolMessage::CheckParentCommandeer)
        );

        let confirm = json!({
            "type": "confirm-parent-commandeer",
            "nonce": "abc",
            "livenessCheck": true,
            "cacheDuration": 86_400_000,
            "origin": "https://shop.example"
        });
        assert_eq!(
            ProtocolMessage::parse(&confirm),
            Some(ProtocolMessage::ConfirmParentCommandeer(CommandeerConfirm {
                nonce: "abc".to_string(),
                liveness_check: true,
                cache_duration: 86_400_000,
                origin: "https://shop.example".to_string(),
            }))
        );
    }

    #[test]
    fn test_unknown_and_incomplete_messages_dropped() {
        assert!(ProtocolMessage::parse(&json!({"type": "hello"})).is_none());
        assert!(ProtocolMessage::parse(&json!("age-estimation-result")).is_none());
        // Missing nonce
        assert!(
            ProtocolMessage::parse(&json!({
                "type": "age-estimation-result",
                "age": 30,
                "token": "a.b"
            }))
            .is_none()
        );
    }

    #[test]
    fn test_serializes_with_type_tag() {
        let message = ProtocolMessage::AgeEstimationResult(EstimationResult {
            nonce: "n".to_string(),
            age: 30,
            token: "a.b".to_string(),
        });
        assert_eq!(
            message.to_value(),
            json!({"type": "age-estimation-result", "nonce": "n", "age": 30, "token": "a.b"})
        );
    }

    #[test]
    fn test_classify_by_substring() {
        let failure = |error: &str| EstimationFailure {
            nonce: "n".to_string(),
            error: error.to_string(),
            code: None,
        };
        assert_eq!(
            classify_error(&failure("Error accessing webcam")).error_code(),
            "WEBCAM_ERROR"
        );
        assert_eq!(
            classify_error(&failure("Different face detected for liveness check")).error_code(),
            "DIFFERENT_FACE_ERROR"
        );
        assert_eq!(
            classify_error(&failure("Error loading models")).error_code(),
            "INTERNAL_ERROR"
        );
    }

    #[test]
    fn test_typed_code_wins_over_text() {
        let failure = EstimationFailure {
            nonce: "n".to_string(),
            error: "webcam fine, but Different face".to_string(),
            code: Some(ErrorCode::NoFace),
        };
        assert_eq!(classify_error(&failure).error_code(), "NO_FACE");

        let unknown: EstimationFailure = serde_json::from_value(json!({
            "nonce": "n",
            "error": "Error accessing webcam",
            "code": "SOMETHING_NEW"
        }))
        .unwrap();
        assert_eq!(unknown.code, Some(ErrorCode::Unknown));
        assert_eq!(classify_error(&unknown).error_code(), "WEBCAM_ERROR");
    }

    #[test]
    fn test_failure_text_round_trips_through_classifier() {
        for err in [
            AgeGateError::Webcam("denied".to_string()),
            AgeGateError::DifferentFace("distance 0.9".to_string()),
        ] {
            let mut failure = EstimationFailure::from_error("n", &err);
            let code = err.error_code();
            assert_eq!(classify_error(&failure).error_code(), code);
            // An old relying page sees only the text
            failure.code = None;
            assert_eq!(classify_error(&failure).error_code(), code);
        }
    }
}
