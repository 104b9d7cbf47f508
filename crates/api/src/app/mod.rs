//! HTTP application wiring (Axum router + shared state).
//!
//! - `services.rs`: builds the stores, key ring, issuer and broker
//! - `routes/`: handlers, one file per area
//! - `dto.rs`: request/response bodies
//! - `errors.rs`: the shared `{status, error, message, path}` error body
//! - `extract.rs`: body extractors rejecting with that error body

use std::sync::Arc;

use axum::{Router, middleware::from_fn_with_state};
use tower::ServiceBuilder;

use trustgate_auth::{AuthorityRequirement, KeyRing, OperationRegistry, TokenVerifier};
use trustgate_core::Clock;
use trustgate_infra::{ClientCredentialsBroker, InMemoryRevocationStore, TokenIssuer};

use crate::middleware::{self, OpenPaths};

pub mod dto;
pub mod errors;
pub mod extract;
pub mod routes;
pub mod services;

#[derive(Clone)]
pub struct AppState {
    pub issuer: Arc<TokenIssuer>,
    pub verifier: Arc<TokenVerifier>,
    pub keys: Arc<KeyRing>,
    pub revocations: Arc<InMemoryRevocationStore>,
    pub open_paths: Arc<OpenPaths>,
    pub operations: Arc<OperationRegistry>,
    /// Applied to every protected route before the per-operation gate.
    pub request_gate: Arc<AuthorityRequirement>,
    pub clock: Arc<dyn Clock>,
    pub broker: Option<Arc<ClientCredentialsBroker>>,
    pub http: reqwest::Client,
    pub product_service_url: Option<String>,
}

/// Build the full HTTP router: open auth endpoints, protected service
/// routes, and the gateway check in front of everything.
pub fn build_app(state: AppState) -> Router {
    let protected = routes::router().route_layer(from_fn_with_state(
        state.clone(),
        middleware::service_auth_middleware,
    ));

    Router::new()
        .merge(routes::open_router())
        .merge(protected)
        .layer(ServiceBuilder::new().layer(from_fn_with_state(
            state.clone(),
            middleware::gateway_middleware,
        )))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{Request, StatusCode, header};
    use tower::ServiceExt;
    use trustgate_infra::TrustgateConfig;

    use super::*;

    fn test_state() -> AppState {
        let mut config = TrustgateConfig::default();
        config.signing.secret = Some("router-test-secret".into());
        services::build_state(&config).unwrap()
    }

    async fn status_of(app: Router, req: Request<Body>) -> StatusCode {
        app.oneshot(req).await.unwrap().status()
    }

    #[tokio::test]
    async fn health_is_open() {
        let app = build_app(test_state());
        let req = Request::get("/health").body(Body::empty()).unwrap();
        assert_eq!(status_of(app, req).await, StatusCode::OK);
    }

    #[tokio::test]
    async fn protected_route_without_token_is_401() {
        let app = build_app(test_state());
        let req = Request::get("/api/orders").body(Body::empty()).unwrap();
        assert_eq!(status_of(app, req).await, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn issued_access_token_reaches_handler() {
        let state = test_state();
        let pair = state.issuer.login("user@example.com", "password").await.unwrap();
        let app = build_app(state);

        let req = Request::get("/api/me")
            .header(header::AUTHORIZATION, format!("Bearer {}", pair.access_token))
            .body(Body::empty())
            .unwrap();
        assert_eq!(status_of(app, req).await, StatusCode::OK);
    }

    #[tokio::test]
    async fn unknown_path_outside_allowlist_still_needs_a_token() {
        let app = build_app(test_state());
        let req = Request::get("/nowhere").body(Body::empty()).unwrap();
        assert_eq!(status_of(app, req).await, StatusCode::UNAUTHORIZED);
    }
}
