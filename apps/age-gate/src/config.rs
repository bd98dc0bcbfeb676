//! Configuration derived from environment variables.
//!
//! Loaded once at startup and validated before use. The relying-side settings
//! and the signing-service settings share one struct so a single environment
//! can describe both ends of a deployment.
//!
//! ## Environment Variables
//!
//! ### Relying side
//! - `AGE_GATE_VERIFIER_URL`: Verifier page to open (default: hosted estimator)
//! - `AGE_GATE_VERIFIER_ORIGIN`: Origin results must come from
//! - `AGE_GATE_ORIGIN`: Origin of the relying page (token subject binding)
//! - `AGE_GATE_DEVICE_ID`: Device identity string (token subject binding)
//! - `AGE_GATE_PUBLIC_KEY_JWK`: Inline JWK replacing the embedded key
//! - `AGE_GATE_PUBLIC_KEY_PATH`: JWK or PEM file replacing the embedded key
//! - `AGE_GATE_CACHE_PATH`: ReDB file holding the cached token
//! - `AGE_GATE_CACHE_ENABLED`: Reuse verified tokens (default: true)
//! - `AGE_GATE_CACHE_DURATION_MS`: Requested token lifetime (default: 24h)
//! - `AGE_GATE_LIVENESS`: Ask for the liveness challenge
//! - `AGE_GATE_MIN_AGE`: Gate threshold (default: 18)
//! - `AGE_GATE_IDENTITY_THRESHOLD`: Max descriptor distance for "same face" (default: 0.6)
//! - `AGE_GATE_POLL_INTERVAL_MS`, `AGE_GATE_SAMPLE_INTERVAL_MS`, `AGE_GATE_ATTEMPT_TIMEOUT_MS`
//!
//! ### Signing service
//! - `SIGNER_PORT`: HTTP port (default: 5101)
//! - `SIGNER_HOST`: Bind address (default: :: for dual-stack IPv4/IPv6)
//! - `SIGNER_PRIVATE_KEY_PATH`: PKCS#8 or PKCS#1 PEM signing key
//! - `SIGNER_ENDPOINT`: Base URL the remote signer client calls
//! - `SIGNER_REQUEST_TIMEOUT_MS`, `SIGNER_BODY_LIMIT_KB`
//! - `INTERNAL_SERVICE_TOKEN`: Shared secret for `/sign`
//! - `INTERNAL_SERVICE_TOKEN_REQUIRED`: Force the token outside production
//! - `RATE_LIMIT_SIGN_PER_MINUTE`, `RATE_LIMIT_SIGN_BURST`
//! - `RUST_LOG`: Log level filter

use std::env;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use rsa::RsaPublicKey;

use crate::error::AgeGateResult;
use crate::estimation::liveness::DEFAULT_IDENTITY_THRESHOLD;
use crate::token::keys::{default_public_key, load_public_key, parse_public_key};

pub const HOSTED_VERIFIER_URL: &str = "https://universal-verify.github.io/age-estimator/";
pub const HOSTED_VERIFIER_ORIGIN: &str = "https://universal-verify.github.io";

const DEFAULT_SIGNER_PORT: u16 = 5101;
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_BODY_LIMIT_KB: usize = 16;
const DEFAULT_CACHE_DURATION_MS: u64 = 24 * 60 * 60 * 1000;
const DEFAULT_MIN_AGE: u32 = 18;
const DEFAULT_POLL_INTERVAL_MS: u64 = 500;
const DEFAULT_SAMPLE_INTERVAL_MS: u64 = 250;
const DEFAULT_ATTEMPT_TIMEOUT_MS: u64 = 5 * 60 * 1000;
const DEFAULT_SIGN_PER_MINUTE: u32 = 30;
const DEFAULT_SIGN_BURST: u32 = 10;

/// Helper to get trimmed env var or empty string.
fn env_trim(name: &str) -> String {
    env::var(name).unwrap_or_default().trim().to_string()
}

/// Helper to get lowercase env var.
fn env_lower(name: &str) -> String {
    env_trim(name).to_lowercase()
}

/// Non-empty env var.
fn env_opt(name: &str) -> Option<String> {
    Some(env_trim(name)).filter(|v| !v.is_empty())
}

/// Parse an env var, falling back to `default` when unset or invalid.
fn env_parse<T: FromStr>(name: &str, default: T) -> T {
    env_trim(name).parse().unwrap_or(default)
}

/// Check if a string value is truthy.
fn is_truthy(value: &str) -> bool {
    matches!(value.trim(), "1" | "true" | "yes")
}

/// Boolean env var with a default for unset values.
fn env_flag(name: &str, default: bool) -> bool {
    match env_lower(name).as_str() {
        "" => default,
        value => is_truthy(value),
    }
}

/// Configuration for both sides of a deployment.
#[derive(Debug, Clone)]
pub struct Settings {
    // Relying side
    verifier_url: String,
    verifier_origin: String,
    relying_origin: String,
    device_identity: String,
    public_key_jwk: Option<String>,
    public_key_path: Option<PathBuf>,
    cache_path: PathBuf,
    cache_enabled: bool,
    cache_duration_ms: u64,
    liveness_check: bool,
    min_age: u32,
    identity_threshold: f64,
    poll_interval_ms: u64,
    sample_interval_ms: u64,
    attempt_timeout_ms: u64,

    // Signing service
    port: u16,
    host: IpAddr,
    private_key_path: Option<PathBuf>,
    signer_endpoint: Option<String>,
    internal_token: Option<String>,
    internal_token_required: bool,
    request_timeout_ms: u64,
    body_limit_bytes: usize,
    sign_per_minute: u32,
    sign_burst: u32,
}

impl Settings {
    /// Load settings from environment variables.
    pub fn from_env() -> Self {
        // Default to IPv6 unspecified (::) for dual-stack support.
        let host = env_trim("SIGNER_HOST")
            .parse::<IpAddr>()
            .unwrap_or(IpAddr::V6(Ipv6Addr::UNSPECIFIED));

        // Determine if token is required based on environment
        let is_production = ["NODE_ENV", "APP_ENV", "RUST_ENV"]
            .iter()
            .any(|name| env_lower(name) == "production");
        let internal_token_required =
            is_production || is_truthy(&env_lower("INTERNAL_SERVICE_TOKEN_REQUIRED"));

        let body_limit_kb = env_parse("SIGNER_BODY_LIMIT_KB", DEFAULT_BODY_LIMIT_KB);

        Self {
            verifier_url: env_opt("AGE_GATE_VERIFIER_URL")
                .unwrap_or_else(|| HOSTED_VERIFIER_URL.to_string()),
            verifier_origin: env_opt("AGE_GATE_VERIFIER_ORIGIN")
                .unwrap_or_else(|| HOSTED_VERIFIER_ORIGIN.to_string()),
            relying_origin: env_opt("AGE_GATE_ORIGIN")
                .unwrap_or_else(|| "http://localhost".to_string()),
            device_identity: env_opt("AGE_GATE_DEVICE_ID").unwrap_or_default(),
            public_key_jwk: env_opt("AGE_GATE_PUBLIC_KEY_JWK"),
            public_key_path: env_opt("AGE_GATE_PUBLIC_KEY_PATH").map(PathBuf::from),
            cache_path: env_opt("AGE_GATE_CACHE_PATH")
                .map_or_else(|| PathBuf::from("./.data/age-gate.redb"), PathBuf::from),
            cache_enabled: env_flag("AGE_GATE_CACHE_ENABLED", true),
            cache_duration_ms: env_parse("AGE_GATE_CACHE_DURATION_MS", DEFAULT_CACHE_DURATION_MS),
            liveness_check: env_flag("AGE_GATE_LIVENESS", false),
            min_age: env_parse("AGE_GATE_MIN_AGE", DEFAULT_MIN_AGE),
            identity_threshold: env_parse(
                "AGE_GATE_IDENTITY_THRESHOLD",
                DEFAULT_IDENTITY_THRESHOLD,
            ),
            poll_interval_ms: env_parse("AGE_GATE_POLL_INTERVAL_MS", DEFAULT_POLL_INTERVAL_MS),
            sample_interval_ms: env_parse(
                "AGE_GATE_SAMPLE_INTERVAL_MS",
                DEFAULT_SAMPLE_INTERVAL_MS,
            ),
            attempt_timeout_ms: env_parse(
                "AGE_GATE_ATTEMPT_TIMEOUT_MS",
                DEFAULT_ATTEMPT_TIMEOUT_MS,
            ),
            port: env_parse("SIGNER_PORT", DEFAULT_SIGNER_PORT),
            host,
            private_key_path: env_opt("SIGNER_PRIVATE_KEY_PATH").map(PathBuf::from),
            signer_endpoint: env_opt("SIGNER_ENDPOINT"),
            internal_token: env_opt("INTERNAL_SERVICE_TOKEN"),
            internal_token_required,
            request_timeout_ms: env_parse("SIGNER_REQUEST_TIMEOUT_MS", DEFAULT_REQUEST_TIMEOUT_MS),
            body_limit_bytes: body_limit_kb.saturating_mul(1024),
            sign_per_minute: env_parse("RATE_LIMIT_SIGN_PER_MINUTE", DEFAULT_SIGN_PER_MINUTE),
            sign_burst: env_parse("RATE_LIMIT_SIGN_BURST", DEFAULT_SIGN_BURST),
        }
    }

    /// Settings for tests: local origins, in-repo paths, fast timings.
    pub fn for_tests() -> Self {
        Self {
            verifier_url: "https://verify.example/age-estimator/".to_string(),
            verifier_origin: "https://verify.example".to_string(),
            relying_origin: "https://relying.example".to_string(),
            device_identity: "test-device".to_string(),
            public_key_jwk: None,
            public_key_path: None,
            cache_path: PathBuf::from("./.data/test-age-gate.redb"),
            cache_enabled: true,
            cache_duration_ms: DEFAULT_CACHE_DURATION_MS,
            liveness_check: false,
            min_age: DEFAULT_MIN_AGE,
            identity_threshold: DEFAULT_IDENTITY_THRESHOLD,
            poll_interval_ms: 10,
            sample_interval_ms: 1,
            attempt_timeout_ms: 5_000,
            port: DEFAULT_SIGNER_PORT,
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            private_key_path: None,
            signer_endpoint: None,
            internal_token: None,
            internal_token_required: false,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            body_limit_bytes: DEFAULT_BODY_LIMIT_KB * 1024,
            sign_per_minute: 600,
            sign_burst: 100,
        }
    }

    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.relying_origin = origin.into();
        self
    }

    pub fn with_device_identity(mut self, device_identity: impl Into<String>) -> Self {
        self.device_identity = device_identity.into();
        self
    }

    pub fn with_cache_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.cache_path = path.into();
        self
    }

    pub fn with_public_key_jwk(mut self, jwk: impl Into<String>) -> Self {
        self.public_key_jwk = Some(jwk.into());
        self
    }

    pub fn with_internal_token(mut self, token: Option<String>, required: bool) -> Self {
        self.internal_token = token;
        self.internal_token_required = required;
        self
    }

    pub fn with_sign_rate_limit(mut self, per_minute: u32, burst: u32) -> Self {
        self.sign_per_minute = per_minute;
        self.sign_burst = burst;
        self
    }

    /// Validate settings.
    ///
    /// Returns an error message if validation fails.
    pub fn validate(&self) -> Result<(), String> {
        if self.internal_token_required && self.internal_token.is_none() {
            return Err("INTERNAL_SERVICE_TOKEN is required in production. \
                 Set INTERNAL_SERVICE_TOKEN or INTERNAL_SERVICE_TOKEN_REQUIRED=0."
                .to_string());
        }

        if self.public_key_jwk.is_some() && self.public_key_path.is_some() {
            return Err("Set only one of AGE_GATE_PUBLIC_KEY_JWK and AGE_GATE_PUBLIC_KEY_PATH."
                .to_string());
        }

        if !(self.identity_threshold.is_finite() && self.identity_threshold > 0.0) {
            return Err(format!(
                "AGE_GATE_IDENTITY_THRESHOLD must be a positive number, got {}",
                self.identity_threshold
            ));
        }

        if self.poll_interval_ms == 0 || self.sample_interval_ms == 0 {
            return Err("Poll and sample intervals must be greater than zero.".to_string());
        }

        if self.attempt_timeout_ms == 0 {
            return Err("AGE_GATE_ATTEMPT_TIMEOUT_MS must be greater than zero.".to_string());
        }

        if self.sign_per_minute == 0 || self.sign_burst == 0 {
            return Err("Signing rate limits must be greater than zero.".to_string());
        }

        Ok(())
    }

    /// Verification key: configured JWK, configured file, or the embedded key.
    pub fn public_key(&self) -> AgeGateResult<RsaPublicKey> {
        if let Some(jwk) = self.public_key_jwk.as_deref() {
            return parse_public_key(jwk);
        }
        if let Some(path) = self.public_key_path.as_deref() {
            return load_public_key(path);
        }
        default_public_key()
    }

    // Getters

    pub fn verifier_url(&self) -> &str {
        &self.verifier_url
    }

    pub fn verifier_origin(&self) -> &str {
        &self.verifier_origin
    }

    pub fn relying_origin(&self) -> &str {
        &self.relying_origin
    }

    pub fn device_identity(&self) -> &str {
        &self.device_identity
    }

    pub fn cache_path(&self) -> &Path {
        &self.cache_path
    }

    pub fn cache_enabled(&self) -> bool {
        self.cache_enabled
    }

    pub fn cache_duration(&self) -> Duration {
        Duration::from_millis(self.cache_duration_ms)
    }

    pub fn liveness_check(&self) -> bool {
        self.liveness_check
    }

    pub fn min_age(&self) -> u32 {
        self.min_age
    }

    pub fn identity_threshold(&self) -> f64 {
        self.identity_threshold
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms)
    }

    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.attempt_timeout_ms)
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    pub fn private_key_path(&self) -> Option<&Path> {
        self.private_key_path.as_deref()
    }

    pub fn signer_endpoint(&self) -> Option<&str> {
        self.signer_endpoint.as_deref()
    }

    pub fn internal_token(&self) -> Option<&str> {
        self.internal_token.as_deref()
    }

    pub fn internal_token_required(&self) -> bool {
        self.internal_token_required
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn body_limit_bytes(&self) -> usize {
        self.body_limit_bytes
    }

    pub fn sign_per_minute(&self) -> u32 {
        self.sign_per_minute
    }

    pub fn sign_burst(&self) -> u32 {
        self.sign_burst
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::keys::PublicKeyJwk;

    #[test]
    fn test_settings_validation() {
        assert!(Settings::for_tests().validate().is_ok());
    }

    #[test]
    fn test_token_required_without_token_fails() {
        let settings = Settings::for_tests().with_internal_token(None, true);
        assert!(settings.validate().is_err());

        let settings = Settings::for_tests().with_internal_token(Some("secret".into()), true);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_truthy_values() {
        assert!(is_truthy("1"));
        assert!(is_truthy(" yes "));
        assert!(!is_truthy("0"));
    }

    #[test]
    fn test_public_key_defaults_to_embedded() {
        let settings = Settings::for_tests();
        assert_eq!(settings.public_key().unwrap(), default_public_key().unwrap());
    }

    #[test]
    fn test_public_key_override() {
        let key = crate::test_support::test_signer().public_key();
        let jwk = serde_json::to_string(&PublicKeyJwk::from_public_key(&key)).unwrap();

        let settings = Settings::for_tests().with_public_key_jwk(jwk);
        assert_eq!(settings.public_key().unwrap(), key);
    }

    #[test]
    fn test_bad_identity_threshold() {
        let mut settings = Settings::for_tests();
        settings.identity_threshold = f64::NAN;
        assert!(settings.validate().is_err());
    }
}
