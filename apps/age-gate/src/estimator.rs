//! Relying-side entry point.
//!
//! [`AgeEstimator`] is an explicit context object: it owns the opener, the
//! session cache and the relying inbox. Attempts are serialized through the
//! inbox lock, so two concurrent `estimate_age` calls never share a listener.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::sync::mpsc::UnboundedReceiver;

use crate::cache::SessionCache;
use crate::config::Settings;
use crate::error::AgeGateResult;
use crate::protocol::channel::{ContextOpener, InboundMessage};
use crate::protocol::handshake::{DEFAULT_CACHE_DURATION, Handshake, HandshakeConfig};
use crate::token::verifier::ClaimVerifier;

/// Verifier page used when testing against a local build.
pub const LOCAL_VERIFIER_PATH: &str = "../index.html";

/// Per-call options for [`AgeEstimator::estimate_age`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EstimateParams {
    pub liveness_check: bool,
    /// Reuse and persist tokens. Off by default; when off, any stored token
    /// is removed first.
    pub enable_cache: bool,
    /// Lifetime requested for a fresh token.
    pub cache_duration: Duration,
    /// Target a verifier served from the relying origin itself.
    pub local_testing: bool,
}

impl Default for EstimateParams {
    fn default() -> Self {
        Self {
            liveness_check: false,
            enable_cache: false,
            cache_duration: DEFAULT_CACHE_DURATION,
            local_testing: false,
        }
    }
}

/// Where the verifier lives and how long to wait for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EstimatorSettings {
    pub verifier_url: String,
    pub verifier_origin: String,
    pub relying_origin: String,
    pub poll_interval: Duration,
    pub attempt_timeout: Duration,
}

impl EstimatorSettings {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            verifier_url: settings.verifier_url().to_string(),
            verifier_origin: settings.verifier_origin().to_string(),
            relying_origin: settings.relying_origin().to_string(),
            poll_interval: settings.poll_interval(),
            attempt_timeout: settings.attempt_timeout(),
        }
    }
}

pub struct AgeEstimator<O, V> {
    opener: O,
    cache: SessionCache<V>,
    inbox: Mutex<UnboundedReceiver<InboundMessage>>,
    settings: EstimatorSettings,
}

impl<O: ContextOpener, V: ClaimVerifier> AgeEstimator<O, V> {
    pub fn new(
        opener: O,
        inbox: UnboundedReceiver<InboundMessage>,
        cache: SessionCache<V>,
        settings: EstimatorSettings,
    ) -> Self {
        Self {
            opener,
            cache,
            inbox: Mutex::new(inbox),
            settings,
        }
    }

    pub fn cache(&self) -> &SessionCache<V> {
        &self.cache
    }

    pub fn settings(&self) -> &EstimatorSettings {
        &self.settings
    }

    /// Resolve with a verified age, from the cache or a fresh attempt.
    pub async fn estimate_age(&self, params: &EstimateParams) -> AgeGateResult<u32> {
        if params.enable_cache {
            if let Some(cached) = self.cache.get()? {
                tracing::info!(age = cached.age(), "Using cached age token");
                return Ok(cached.age());
            }
        } else {
            self.cache.clear()?;
        }

        let mut inbox = self.inbox.lock().await;
        let mut handshake = Handshake::new(
            &self.opener,
            &self.cache,
            &mut inbox,
            self.handshake_config(params),
        );
        handshake.run().await
    }

    /// Age from the cached token, if it still verifies.
    pub fn cached_age(&self) -> AgeGateResult<Option<u32>> {
        self.cache.cached_age()
    }

    /// Raw cached token, unverified.
    pub fn cached_token(&self) -> AgeGateResult<Option<String>> {
        self.cache.cached_token()
    }

    pub fn clear_cache(&self) -> AgeGateResult<()> {
        self.cache.clear()
    }

    /// Whether the cache holds a verified claim of at least `min_age`.
    ///
    /// A verified claim below `min_age` is cleared so the next check prompts again.
    pub fn has_valid_claim(&self, min_age: u32) -> AgeGateResult<bool> {
        match self.cache.get()? {
            Some(verified) if verified.age() >= min_age => Ok(true),
            Some(verified) => {
                tracing::info!(age = verified.age(), min_age, "Cached age below minimum");
                self.cache.clear()?;
                Ok(false)
            }
            None => Ok(false),
        }
    }

    fn handshake_config(&self, params: &EstimateParams) -> HandshakeConfig {
        let (verifier_url, verifier_origin) = if params.local_testing {
            (
                LOCAL_VERIFIER_PATH.to_string(),
                self.settings.relying_origin.clone(),
            )
        } else {
            (
                self.settings.verifier_url.clone(),
                self.settings.verifier_origin.clone(),
            )
        };

        HandshakeConfig {
            verifier_url,
            verifier_origin,
            relying_origin: self.settings.relying_origin.clone(),
            liveness_check: params.liveness_check,
            cache_duration: params.cache_duration,
            enable_cache: params.enable_cache,
            poll_interval: self.settings.poll_interval,
            attempt_timeout: self.settings.attempt_timeout,
        }
    }
}
