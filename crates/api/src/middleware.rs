//! Bearer-token middleware.
//!
//! [`gateway_middleware`] is the edge: open paths pass untouched, everything
//! else needs a structurally valid bearer token. [`service_auth_middleware`]
//! runs in front of protected routes: full verification, a fresh
//! [`PrincipalContext`] per request, then the request-level gate.

use axum::{
    extract::State,
    http::{HeaderMap, Request},
    middleware::Next,
    response::Response,
};

use trustgate_auth::{TokenKind, authorize, coarse_check};

use crate::app::AppState;
use crate::app::errors::ApiError;
use crate::context::PrincipalContext;

/// Path prefixes that bypass the gateway check. Data, not logic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OpenPaths {
    prefixes: Vec<String>,
}

impl OpenPaths {
    pub fn new<I, S>(prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            prefixes: prefixes.into_iter().map(Into::into).collect(),
        }
    }

    pub fn push(&mut self, prefix: impl Into<String>) {
        self.prefixes.push(prefix.into());
    }

    /// Prefix match on whole path segments: `/actuator` opens
    /// `/actuator/health` but not `/actuators`.
    pub fn is_open(&self, path: &str) -> bool {
        self.prefixes.iter().any(|prefix| {
            path.strip_prefix(prefix.as_str()).is_some_and(|rest| {
                rest.is_empty() || prefix.ends_with('/') || rest.starts_with('/')
            })
        })
    }
}

pub async fn gateway_middleware(
    State(state): State<AppState>,
    req: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let path = req.uri().path().to_string();
    if state.open_paths.is_open(&path) {
        return Ok(next.run(req).await);
    }

    let token = extract_bearer(req.headers(), &path)?;
    coarse_check(token).map_err(|e| {
        tracing::debug!(%path, code = e.code(), "gateway rejected token");
        ApiError::from_verify(&e, &path)
    })?;

    Ok(next.run(req).await)
}

pub async fn service_auth_middleware(
    State(state): State<AppState>,
    mut req: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let path = req.uri().path().to_string();
    let token = extract_bearer(req.headers(), &path)?;

    let principal = state
        .verifier
        .verify(token, TokenKind::Access, state.clock.now())
        .map_err(|e| ApiError::from_verify(&e, &path))?;

    authorize(Some(&principal), &state.request_gate)
        .into_result()
        .map_err(|deny| {
            tracing::info!(subject = %principal.subject, %path, reason = %deny, "request denied");
            ApiError::from_deny(deny, &path)
        })?;

    req.extensions_mut().insert(PrincipalContext::new(principal));
    Ok(next.run(req).await)
}

fn extract_bearer<'a>(headers: &'a HeaderMap, path: &str) -> Result<&'a str, ApiError> {
    let missing = || {
        ApiError::unauthorized("Full authentication is required to access this resource", path)
    };

    let header = headers
        .get(axum::http::header::AUTHORIZATION)
        .ok_or_else(missing)?;
    let header = header.to_str().map_err(|_| missing())?;
    let (scheme, token) = header.trim_start().split_once(' ').ok_or_else(missing)?;
    if !scheme.eq_ignore_ascii_case("Bearer") {
        return Err(missing());
    }
    let token = token.trim();
    if token.is_empty() {
        return Err(missing());
    }
    Ok(token)
}
