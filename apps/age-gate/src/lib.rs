// Crate-level lint configuration
// Allow noisy pedantic/cargo lints that aren't worth fixing individually
#![allow(clippy::multiple_crate_versions)] // Transitive deps, can't easily fix
#![allow(clippy::missing_errors_doc)] // Would require extensive doc changes
#![allow(clippy::missing_panics_doc)] // Would require extensive doc changes
#![allow(clippy::must_use_candidate)] // Too many false positives for internal APIs
#![allow(clippy::module_name_repetitions)] // Acceptable for clarity (e.g., AgeGateError in error mod)
#![allow(clippy::doc_markdown)] // Too strict about backticks in docs
#![allow(clippy::missing_const_for_fn)] // Often debatable, runtime doesn't benefit

//! Age Gate
//!
//! Signed age assertions produced by a camera-based estimator and consumed by
//! relying pages.
//!
//! ## Architecture
//!
//! - **Verifier context**: opens a camera, reaches an age consensus over
//!   several frames, optionally runs a head-turn liveness challenge bound to
//!   the same face, then asks a signer for an RSA-PSS signature over the claim.
//!
//! - **Relying context**: opens the verifier, answers its commandeer request
//!   with a nonce, verifies the returned token locally and caches it.
//!
//! - **Token signer** (`token-signer` binary, port 5101): holds the private
//!   key and signs payloads over HTTP.
//!
//! ## Trust Model
//!
//! - Only the signature is a security boundary. The subject hash binds a token
//!   to a device/origin pair as replay friction, nothing more.
//! - Cached tokens are re-verified on every read.
//! - Messages are accepted only from the opened context, the expected origin
//!   and the attempt's nonce.

pub mod cache;
pub mod callback;
pub mod config;
pub mod error;
pub mod estimation;
pub mod estimator;
pub mod gate;
pub mod middleware;
pub mod protocol;
pub mod routes;
pub mod session;
pub mod storage;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod token;

mod logging {
    //! Console layer and filter shared by both telemetry variants.

    use tracing_subscriber::{EnvFilter, Layer, Registry, fmt};

    pub(crate) fn env_filter() -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| "age_gate=info,actix_web=info".into())
    }

    /// Plain or JSON console output, chosen by `LOG_FORMAT=json`.
    pub(crate) fn fmt_layer() -> Box<dyn Layer<Registry> + Send + Sync> {
        let json = std::env::var("LOG_FORMAT")
            .is_ok_and(|value| value.trim().eq_ignore_ascii_case("json"));
        if json {
            fmt::layer().json().boxed()
        } else {
            fmt::layer().boxed()
        }
    }
}

#[cfg(feature = "otel")]
pub mod telemetry;

#[cfg(not(feature = "otel"))]
pub mod telemetry {
    //! Stub telemetry module when OpenTelemetry is disabled.

    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    use crate::logging::{env_filter, fmt_layer};

    /// Initialize tracing with console output only.
    pub fn init_tracing() {
        tracing_subscriber::registry()
            .with(fmt_layer())
            .with(env_filter())
            .init();
    }

    /// No-op shutdown when OpenTelemetry is disabled.
    pub fn shutdown_tracing() {}
}

// Re-export commonly used types
pub use cache::SessionCache;
pub use config::Settings;
pub use error::{AgeGateError, AgeGateResult};
pub use estimator::{AgeEstimator, EstimateParams};
pub use gate::{AgeGate, GateAction, GateEvent, GateNotice};
pub use token::{ClaimPayload, TokenIssuer, TokenVerifier};
