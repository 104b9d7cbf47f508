use axum::{
    Router,
    routing::{delete, get, post},
};

use trustgate_auth::{AuthorityRequirement, OperationRegistry};

use crate::app::AppState;

pub mod auth;
pub mod orders;
pub mod products;
pub mod system;

/// Endpoints reachable without a token (the gateway allowlist covers them).
pub fn open_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(system::health))
        .route("/api/auth/register", post(auth::register))
        .route("/api/auth/login", post(auth::login))
        .route("/api/auth/refreshtoken", post(auth::refresh))
        .route("/api/auth/logout", post(auth::logout))
        .route("/oauth2/token", post(auth::token))
        .route("/.well-known/jwks.json", get(auth::jwks))
}

/// Routes behind full token verification.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/me", get(system::me))
        .route("/api/orders", get(orders::list_orders))
        .route("/api/orders/:id", delete(orders::delete_order))
        .route("/api/orders/:id/catalog", get(orders::order_catalog))
        .route("/api/products", get(products::list_products))
}

/// Per-operation requirements of the sample services.
pub fn operations() -> OperationRegistry {
    OperationRegistry::new()
        .register(
            orders::LIST,
            AuthorityRequirement::any_of(["ROLE_USER", "ROLE_ADMIN", "order:read"]),
        )
        .register(orders::DELETE, AuthorityRequirement::any_of(["ROLE_ADMIN"]))
        .register(
            orders::CATALOG,
            AuthorityRequirement::any_of(["ROLE_USER", "ROLE_ADMIN", "order:read"]),
        )
        .register(
            products::LIST,
            AuthorityRequirement::any_of(["ROLE_USER", "product:read"]),
        )
}
