//! Redirect back to a calling app after verification.
//!
//! The `hash` parameter is advisory: it is derived from public values, so the
//! receiving app must not treat it as proof of anything.

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use reqwest::Url;

use crate::error::{AgeGateError, AgeGateResult};
use crate::token::claims::TimestampMs;

const HASH_LEN: usize = 16;

/// First 16 alphanumeric characters of `base64("{verified}-{timestamp}-{user_id}")`.
pub fn advisory_hash(verified: bool, timestamp: TimestampMs, user_id: Option<&str>) -> String {
    let input = format!("{verified}-{timestamp}-{}", user_id.unwrap_or_default());
    BASE64
        .encode(input)
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .take(HASH_LEN)
        .collect()
}

/// `base` with `verified`, `timestamp`, `user_id` (when given) and `hash` set.
///
/// Existing parameters with those names are replaced; others are kept.
pub fn callback_url(
    base: &str,
    verified: bool,
    timestamp: TimestampMs,
    user_id: Option<&str>,
) -> AgeGateResult<Url> {
    let mut url = Url::parse(base)
        .map_err(|e| AgeGateError::InvalidInput(format!("Invalid callback URL: {e}")))?;

    let mut params = vec![
        ("verified", verified.to_string()),
        ("timestamp", timestamp.to_string()),
    ];
    if let Some(user_id) = user_id {
        params.push(("user_id", user_id.to_string()));
    }
    params.push(("hash", advisory_hash(verified, timestamp, user_id)));

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| !params.iter().any(|(name, _)| name == key))
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();

    url.query_pairs_mut()
        .clear()
        .extend_pairs(kept)
        .extend_pairs(params);

    tracing::debug!(verified, host = url.host_str().unwrap_or_default(), "Built callback URL");
    Ok(url)
}
