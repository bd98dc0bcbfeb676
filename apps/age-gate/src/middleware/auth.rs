//! Internal authentication for the signing service.
//!
//! `/sign` requires `INTERNAL_SERVICE_TOKEN` when the token is mandatory
//! (production). Outside production a configured token is still checked when
//! the caller presents one. Health, build info and the public key stay open.

use actix_web::body::{EitherBody, MessageBody};
use actix_web::dev::{Service, ServiceRequest, ServiceResponse, Transform, forward_ready};
use actix_web::{Error, ResponseError};
use futures_util::future::{LocalBoxFuture, Ready, ready};

use crate::config::Settings;
use crate::error::AgeGateError;

/// Routes served without a token.
const PUBLIC_PATHS: &[&str] = &["/health", "/build-info", "/public-key"];

/// Middleware enforcing internal service token authentication.
#[derive(Debug, Clone)]
pub struct InternalAuth {
    required: bool,
    token: Option<String>,
}

impl InternalAuth {
    /// Build from service settings.
    pub fn new(settings: &Settings) -> Self {
        Self {
            required: settings.internal_token_required(),
            token: settings.internal_token().map(ToString::to_string),
        }
    }

    /// Build directly from config (used for tests).
    pub fn from_config(required: bool, token: Option<String>) -> Self {
        Self { required, token }
    }

    fn is_public_path(path: &str) -> bool {
        PUBLIC_PATHS.contains(&path)
    }

    /// Bearer token, falling back to `X-Internal-Token`.
    fn presented_token(req: &ServiceRequest) -> Option<&str> {
        let headers = req.headers();

        let bearer = headers
            .get("authorization")
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "));

        bearer
            .or_else(|| {
                headers
                    .get("x-internal-token")
                    .and_then(|value| value.to_str().ok())
            })
            .map(str::trim)
    }

    fn authorize(&self, presented: Option<&str>) -> Result<(), AgeGateError> {
        let authorized = match (self.token.as_deref(), presented) {
            (Some(expected), Some(presented)) => expected == presented,
            (Some(_), None) | (None, _) => !self.required,
        };

        if authorized {
            Ok(())
        } else {
            Err(AgeGateError::Unauthorized)
        }
    }
}

impl<S, B> Transform<S, ServiceRequest> for InternalAuth
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type InitError = ();
    type Transform = InternalAuthMiddleware<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(InternalAuthMiddleware {
            service,
            auth: self.clone(),
        }))
    }
}

pub struct InternalAuthMiddleware<S> {
    service: S,
    auth: InternalAuth,
}

impl<S, B> Service<ServiceRequest> for InternalAuthMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        if !InternalAuth::is_public_path(req.path())
            && let Err(err) = self.auth.authorize(InternalAuth::presented_token(&req))
        {
            tracing::warn!(path = %req.path(), "Rejected unauthenticated request");
            let response = err.error_response();
            let (req, _pl) = req.into_parts();
            return Box::pin(async move {
                Ok(ServiceResponse::new(req, response.map_into_right_body()))
            });
        }

        let fut = self.service.call(req);
        Box::pin(async move { fut.await.map(ServiceResponse::map_into_left_body) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::http::StatusCode;
    use actix_web::{App, HttpResponse, test, web};

    fn app_routes(cfg: &mut web::ServiceConfig) {
        cfg.route("/health", web::get().to(|| async { HttpResponse::Ok().finish() }))
            .route("/sign", web::post().to(|| async { HttpResponse::Ok().finish() }));
    }

    #[actix_rt::test]
    async fn test_public_routes_open() {
        let auth = InternalAuth::from_config(true, Some("secret".to_string()));
        let app = test::init_service(App::new().wrap(auth).configure(app_routes)).await;

        let req = test::TestRequest::get().uri("/health").to_request();
        let resp = test::call_service(&app, req).await;
        assert!(resp.status().is_success());
    }

    #[actix_rt::test]
    async fn test_sign_requires_token_when_required() {
        let auth = InternalAuth::from_config(true, Some("secret".to_string()));
        let app = test::init_service(App::new().wrap(auth).configure(app_routes)).await;

        let req = test::TestRequest::post().uri("/sign").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["code"], "UNAUTHORIZED");
    }

    #[actix_rt::test]
    async fn test_accepts_either_header() {
        let auth = InternalAuth::from_config(true, Some("secret".to_string()));
        let app = test::init_service(App::new().wrap(auth).configure(app_routes)).await;

        let req = test::TestRequest::post()
            .uri("/sign")
            .insert_header(("authorization", "Bearer secret"))
            .to_request();
        assert!(test::call_service(&app, req).await.status().is_success());

        let req = test::TestRequest::post()
            .uri("/sign")
            .insert_header(("x-internal-token", " secret "))
            .to_request();
        assert!(test::call_service(&app, req).await.status().is_success());
    }

    #[actix_rt::test]
    async fn test_optional_token_still_checked_when_presented() {
        let auth = InternalAuth::from_config(false, Some("secret".to_string()));
        assert!(auth.authorize(None).is_ok());
        assert!(auth.authorize(Some("secret")).is_ok());
        assert_eq!(auth.authorize(Some("wrong")), Err(AgeGateError::Unauthorized));

        let open = InternalAuth::from_config(false, None);
        assert!(open.authorize(Some("anything")).is_ok());

        let misconfigured = InternalAuth::from_config(true, None);
        assert!(misconfigured.authorize(Some("anything")).is_err());
    }
}
