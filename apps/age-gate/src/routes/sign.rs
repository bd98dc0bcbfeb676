//! Token signing endpoints.
//!
//! `POST /sign` only signs payloads that decode to a claim, so the service
//! cannot be used as a generic signing oracle for arbitrary bytes.

use actix_governor::Governor;
use actix_web::{HttpResponse, ResponseError, web};

use crate::error::AgeGateError;
use crate::middleware::RateLimiter;
use crate::token::codec::decode_payload;
use crate::token::keys::PublicKeyJwk;
use crate::token::signer::{LocalSigner, SignRequest, SignResponse};

/// POST /sign
///
/// Sign a base64 claim payload with the service key.
#[tracing::instrument(skip(signer, request), fields(payload_len = request.payload.len()))]
pub async fn sign(signer: web::Data<LocalSigner>, request: web::Json<SignRequest>) -> HttpResponse {
    let SignRequest { payload } = request.into_inner();

    let claim = match decode_payload(&payload) {
        Ok(claim) => claim,
        Err(e) => {
            tracing::warn!(error = %e, "Refusing to sign non-claim payload");
            return e.error_response();
        }
    };

    // RSA signing is CPU-bound; keep it off the async workers
    let signer = signer.into_inner();
    let signed = web::block(move || signer.sign_payload(payload.as_bytes()))
        .await
        .map_err(|e| AgeGateError::Internal(format!("Signing task failed: {e}")))
        .and_then(|result| result);

    match signed {
        Ok(signature) => {
            tracing::info!(age = claim.age, exp = claim.exp, "Claim signed");
            HttpResponse::Ok().json(SignResponse { signature })
        }
        Err(e) => {
            tracing::error!(error = %e, "Signing failed");
            e.error_response()
        }
    }
}

/// GET /public-key
///
/// Verification key as a JWK, for relying sides that rotate keys by config.
#[tracing::instrument(skip(signer))]
pub async fn public_key(signer: web::Data<LocalSigner>) -> HttpResponse {
    HttpResponse::Ok().json(PublicKeyJwk::from_public_key(&signer.public_key()))
}

/// Configure signing routes, guarding `/sign` with `limiter`.
///
/// Call once per app instance; every instance built from clones of the same
/// limiter shares its buckets.
pub fn configure(limiter: RateLimiter) -> impl FnOnce(&mut web::ServiceConfig) {
    move |cfg| {
        cfg.service(
            web::resource("/sign")
                .wrap(Governor::new(&limiter))
                .route(web::post().to(sign)),
        )
        .route("/public-key", web::get().to(public_key));
    }
}

#[cfg(test)]
mod tests {
    use actix_web::http::StatusCode;
    use actix_web::{App, test};
    use chrono::Duration;

    use super::*;
    use crate::middleware::{RateLimitConfig, sign_limiter};
    use crate::test_support::{test_signer, test_subject};
    use crate::token::claims::{ClaimPayload, now_ms};
    use crate::token::codec::{assemble, encode_payload};
    use crate::token::verifier::{ClaimVerifier, TokenVerifier};

    fn limiter() -> RateLimiter {
        sign_limiter(&RateLimitConfig {
            sign_per_minute: 600,
            sign_burst: 100,
        })
        .unwrap()
    }

    #[actix_rt::test]
    async fn test_sign_claim_payload() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(test_signer()))
                .configure(configure(limiter())),
        )
        .await;

        let claim = ClaimPayload::new(29, now_ms(), Duration::hours(1), test_subject().fingerprint());
        let payload = encode_payload(&claim).unwrap();

        let req = test::TestRequest::post()
            .uri("/sign")
            .peer_addr("127.0.0.1:40000".parse().unwrap())
            .set_json(SignRequest {
                payload: payload.clone(),
            })
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert!(resp.status().is_success());

        let body: SignResponse = test::read_body_json(resp).await;
        let token = assemble(&payload, &body.signature);
        let verified = TokenVerifier::new(test_signer().public_key(), test_subject())
            .verify(&token)
            .unwrap();
        assert_eq!(verified, claim);
    }

    #[actix_rt::test]
    async fn test_refuses_arbitrary_bytes() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(test_signer()))
                .configure(configure(limiter())),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/sign")
            .peer_addr("127.0.0.1:40000".parse().unwrap())
            .set_json(SignRequest {
                payload: "aGVsbG8=".to_string(),
            })
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["code"], "MALFORMED");
    }

    #[actix_rt::test]
    async fn test_sign_rate_limited() {
        let strict = sign_limiter(&RateLimitConfig {
            sign_per_minute: 1,
            sign_burst: 1,
        })
        .unwrap();
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(test_signer()))
                .configure(configure(strict)),
        )
        .await;

        let payload = encode_payload(&ClaimPayload::new(
            40,
            now_ms(),
            Duration::hours(1),
            test_subject().fingerprint(),
        ))
        .unwrap();

        let mut statuses = Vec::new();
        for _ in 0..2 {
            let req = test::TestRequest::post()
                .uri("/sign")
                .peer_addr("127.0.0.1:40000".parse().unwrap())
                .set_json(SignRequest {
                    payload: payload.clone(),
                })
                .to_request();
            statuses.push(test::call_service(&app, req).await.status());
        }
        assert_eq!(statuses, vec![StatusCode::OK, StatusCode::TOO_MANY_REQUESTS]);
    }

    #[actix_rt::test]
    async fn test_rate_limit_shared_across_app_instances() {
        // HttpServer builds one app per worker from clones of the limiter
        let strict = sign_limiter(&RateLimitConfig {
            sign_per_minute: 1,
            sign_burst: 1,
        })
        .unwrap();
        let first = test::init_service(
            App::new()
                .app_data(web::Data::new(test_signer()))
                .configure(configure(strict.clone())),
        )
        .await;
        let second = test::init_service(
            App::new()
                .app_data(web::Data::new(test_signer()))
                .configure(configure(strict)),
        )
        .await;

        let payload = encode_payload(&ClaimPayload::new(
            40,
            now_ms(),
            Duration::hours(1),
            test_subject().fingerprint(),
        ))
        .unwrap();
        let request = || {
            test::TestRequest::post()
                .uri("/sign")
                .peer_addr("127.0.0.1:40001".parse().unwrap())
                .set_json(SignRequest {
                    payload: payload.clone(),
                })
                .to_request()
        };

        assert_eq!(test::call_service(&first, request()).await.status(), StatusCode::OK);
        assert_eq!(
            test::call_service(&second, request()).await.status(),
            StatusCode::TOO_MANY_REQUESTS
        );
    }

    #[actix_rt::test]
    async fn test_public_key_matches_signer() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(test_signer()))
                .configure(configure(limiter())),
        )
        .await;

        let req = test::TestRequest::get().uri("/public-key").to_request();
        let jwk: PublicKeyJwk = test::call_and_read_body_json(&app, req).await;
        assert_eq!(jwk.to_public_key().unwrap(), test_signer().public_key());
    }
}
