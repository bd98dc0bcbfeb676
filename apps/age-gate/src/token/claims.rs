//! Claim payload carried inside an age token.

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};

/// Milliseconds since the Unix epoch.
pub type TimestampMs = i64;

/// Current time in milliseconds since the Unix epoch.
pub fn now_ms() -> TimestampMs {
    Utc::now().timestamp_millis()
}

/// Unsigned content of a token.
///
/// Field order is part of the wire format: the JSON is serialized in
/// declaration order and the signature covers its base64 encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ClaimPayload {
    /// Finalized estimated age.
    pub age: u32,
    /// Issuance instant (ms).
    pub created_at: TimestampMs,
    /// Absolute expiry (ms). The token is invalid once `exp < now`.
    pub exp: TimestampMs,
    /// Subject fingerprint, see [`super::subject::SubjectContext::fingerprint`].
    pub sub: i32,
}

impl ClaimPayload {
    /// Build a claim issued at `created_at` and valid for `lifetime`.
    pub fn new(age: u32, created_at: TimestampMs, lifetime: Duration, sub: i32) -> Self {
        Self {
            age,
            created_at,
            exp: created_at.saturating_add(lifetime.num_milliseconds()),
            sub,
        }
    }

    /// Whether the claim has expired at `now`.
    pub fn is_expired_at(&self, now: TimestampMs) -> bool {
        self.exp < now
    }
}
