//! Token Signer
//!
//! Holds the RSA private key and signs claim payloads for verifier contexts.
//!
//! ## Security
//!
//! - `/sign` requires `INTERNAL_SERVICE_TOKEN` in production
//! - `/sign` is rate limited per peer IP
//! - Only payloads that decode to a claim are signed

use actix_web::{App, HttpServer, middleware, web};
use age_gate::{
    config::Settings,
    middleware::{InternalAuth, RateLimitConfig, sign_limiter},
    routes, telemetry,
    token::{LocalSigner, key_id, keys::load_private_key},
};
use rsa::RsaPrivateKey;
use rsa::rand_core::OsRng;
use tracing_actix_web::TracingLogger;

/// Size of the throwaway key used when no key file is configured.
const EPHEMERAL_KEY_BITS: usize = 2048;

fn load_signer(settings: &Settings) -> anyhow::Result<LocalSigner> {
    if let Some(path) = settings.private_key_path() {
        let key = load_private_key(path)?;
        tracing::info!(path = %path.display(), "Loaded signing key");
        return Ok(LocalSigner::new(key));
    }

    if settings.internal_token_required() {
        anyhow::bail!("SIGNER_PRIVATE_KEY_PATH is required in production");
    }

    tracing::warn!(
        "No SIGNER_PRIVATE_KEY_PATH set; generating an ephemeral key. \
         Tokens will not verify against the embedded public key."
    );
    let key = RsaPrivateKey::new(&mut OsRng, EPHEMERAL_KEY_BITS)?;
    Ok(LocalSigner::new(key))
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Initialize tracing first
    telemetry::init_tracing();

    // Load and validate settings
    let settings = Settings::from_env();
    if let Err(message) = settings.validate() {
        tracing::error!("{message}");
        std::process::exit(1);
    }

    let signer = match load_signer(&settings) {
        Ok(signer) => signer,
        Err(e) => {
            tracing::error!(error = %e, "Failed to load signing key");
            std::process::exit(1);
        }
    };

    let rate_limit = RateLimitConfig::from_settings(&settings);
    let limiter = match sign_limiter(&rate_limit) {
        Ok(limiter) => limiter,
        Err(e) => {
            tracing::error!(error = %e, "Failed to build rate limiter");
            std::process::exit(1);
        }
    };

    let addr = settings.socket_addr();
    let key_id = key_id(&signer.public_key());

    tracing::info!(
        addr = %addr,
        key_id = %key_id,
        token_required = settings.internal_token_required(),
        sign_per_minute = rate_limit.sign_per_minute,
        sign_burst = rate_limit.sign_burst,
        "Starting token signer"
    );

    let auth = InternalAuth::new(&settings);
    let json_limit = settings.body_limit_bytes();
    let signer_data = web::Data::new(signer);

    HttpServer::new(move || {
        App::new()
            .wrap(auth.clone())
            // Request tracing, outside auth so rejections are logged too
            .wrap(TracingLogger::default())
            // Default headers
            .wrap(
                middleware::DefaultHeaders::new()
                    .add(("X-Service", "token-signer"))
                    .add(("X-Key-Id", key_id.clone())),
            )
            // Shared state
            .app_data(signer_data.clone())
            .app_data(web::JsonConfig::default().limit(json_limit))
            // Routes
            .configure(routes::health::configure)
            .configure(routes::sign::configure(limiter.clone()))
    })
    .bind(addr)?
    .run()
    .await?;

    // Shutdown tracing
    telemetry::shutdown_tracing();

    Ok(())
}
