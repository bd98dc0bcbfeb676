//! Token wire format.
//!
//! `<base64(JSON(claim))>.<hex(signature)>`
//!
//! The payload uses the standard base64 alphabet with padding, which never
//! contains `.`, so a well-formed token has exactly one separator.

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};

use crate::error::{AgeGateError, AgeGateResult};
use crate::token::claims::ClaimPayload;

/// Separator between the payload and signature segments.
pub const SEPARATOR: char = '.';

/// Encode a claim into its payload segment.
pub fn encode_payload(claim: &ClaimPayload) -> AgeGateResult<String> {
    let json = serde_json::to_vec(claim)?;
    Ok(BASE64.encode(json))
}

/// Join a payload segment and a hex signature.
pub fn assemble(payload_segment: &str, signature_hex: &str) -> String {
    format!("{payload_segment}{SEPARATOR}{signature_hex}")
}

/// Split a token into `(payload_segment, signature_segment)`.
///
/// Fails with `MALFORMED` unless there are exactly two segments.
pub fn split_token(token: &str) -> AgeGateResult<(&str, &str)> {
    let mut parts = token.split(SEPARATOR);
    match (parts.next(), parts.next(), parts.next()) {
        (Some(payload), Some(signature), None) => Ok((payload, signature)),
        _ => Err(AgeGateError::Malformed(format!(
            "expected 2 segments, got {}",
            token.split(SEPARATOR).count()
        ))),
    }
}

/// Decode a payload segment back into a claim.
///
/// This does not check expiry, subject or signature.
pub fn decode_payload(payload_segment: &str) -> AgeGateResult<ClaimPayload> {
    let bytes = BASE64
        .decode(payload_segment)
        .map_err(|e| AgeGateError::Malformed(format!("payload is not base64: {e}")))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| AgeGateError::Malformed(format!("payload is not a claim: {e}")))
}
