//! Rate limiting for the signing endpoint.
//!
//! Every accepted `/sign` call produces a valid signature, so the limiter
//! caps how fast a single peer can mint tokens. Uses actix-governor with the
//! built-in PeerIpKeyExtractor.
//!
//! The config owns the limiter state. Build it once and wrap each app
//! instance with `Governor::new(&config)` so every worker draws from the same
//! per-peer buckets.

use actix_governor::{GovernorConfig, GovernorConfigBuilder, PeerIpKeyExtractor};
use governor::middleware::NoOpMiddleware;

use crate::config::Settings;
use crate::error::{AgeGateError, AgeGateResult};

/// Signing rate limits per peer IP.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// Sustained signing requests per minute.
    pub sign_per_minute: u32,
    /// Requests allowed in a burst before the sustained rate applies.
    pub sign_burst: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            sign_per_minute: 30,
            sign_burst: 10,
        }
    }
}

impl RateLimitConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            sign_per_minute: settings.sign_per_minute(),
            sign_burst: settings.sign_burst(),
        }
    }

    /// Replenish interval for one request, at least 1ms.
    fn replenish_ms(&self) -> u64 {
        match self.sign_per_minute {
            0 => 60_000,
            per_minute => (60_000 / u64::from(per_minute)).max(1),
        }
    }
}

/// Shared limiter state for `/sign`, keyed by peer IP.
pub type RateLimiter = GovernorConfig<PeerIpKeyExtractor, NoOpMiddleware>;

/// Create the limiter guarding `/sign`.
pub fn sign_limiter(config: &RateLimitConfig) -> AgeGateResult<RateLimiter> {
    GovernorConfigBuilder::default()
        .milliseconds_per_request(config.replenish_ms())
        .burst_size(config.sign_burst.max(1))
        .finish()
        .ok_or_else(|| AgeGateError::Config("Invalid signing rate limit".to_string()))
}
