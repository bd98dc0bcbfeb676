//! Health check and build info endpoints.
//!
//! These endpoints are public (no authentication required).

use actix_web::{HttpResponse, web};
use serde::{Deserialize, Serialize};

use crate::token::keys::key_id;
use crate::token::signer::LocalSigner;

const SERVICE_NAME: &str = "token-signer";

/// Health check response.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
}

/// Build information response.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BuildInfoResponse {
    pub service: String,
    pub version: String,
    pub git_sha: String,
    pub build_time: String,
    /// Identifier of the signing key, to confirm which key a deployment uses.
    pub key_id: String,
}

/// GET /health
///
/// Returns service health status. Used by load balancers and monitoring.
#[tracing::instrument]
pub async fn health() -> HttpResponse {
    HttpResponse::Ok().json(HealthResponse {
        status: "ok".to_string(),
        service: SERVICE_NAME.to_string(),
    })
}

/// GET /build-info
///
/// Returns build metadata for deployment verification.
#[tracing::instrument(skip(signer))]
pub async fn build_info(signer: web::Data<LocalSigner>) -> HttpResponse {
    let response = BuildInfoResponse {
        service: SERVICE_NAME.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        git_sha: env!("GIT_SHA").to_string(),
        build_time: env!("BUILD_TIME").to_string(),
        key_id: key_id(&signer.public_key()),
    };

    HttpResponse::Ok().json(response)
}

/// Configure health routes on the given scope.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health))
        .route("/build-info", web::get().to(build_info));
}
