//! Authorization-server endpoints. All are reachable without a token.

use axum::{
    Json,
    extract::{OriginalUri, State},
    http::{HeaderMap, StatusCode, header},
};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use jsonwebtoken::jwk::JwkSet;

use trustgate_auth::AuthoritySet;
use trustgate_core::ClientId;
use trustgate_infra::{ClientCredentialsResponse, GrantType, TokenResponse};

use crate::app::AppState;
use crate::app::dto::{
    LoginRequest, RefreshRequest, RegisterRequest, RegisteredResponse, TokenForm,
};
use crate::app::errors::ApiError;
use crate::app::extract::{ApiForm, ApiJson};

pub async fn register(
    State(state): State<AppState>,
    OriginalUri(uri): OriginalUri,
    ApiJson(body): ApiJson<RegisterRequest>,
) -> Result<(StatusCode, Json<RegisteredResponse>), ApiError> {
    let principal = state
        .issuer
        .register(&body.email, &body.password)
        .await
        .map_err(|e| ApiError::from_issue(&e, uri.path()))?;
    Ok((
        StatusCode::CREATED,
        Json(RegisteredResponse {
            email: principal.subject.to_string(),
            roles: principal.authorities.to_strings(),
        }),
    ))
}

pub async fn login(
    State(state): State<AppState>,
    OriginalUri(uri): OriginalUri,
    ApiJson(body): ApiJson<LoginRequest>,
) -> Result<Json<TokenResponse>, ApiError> {
    let pair = state
        .issuer
        .login(&body.email, &body.password)
        .await
        .map_err(|e| ApiError::from_issue(&e, uri.path()))?;
    Ok(Json(pair.into()))
}

pub async fn refresh(
    State(state): State<AppState>,
    OriginalUri(uri): OriginalUri,
    ApiJson(body): ApiJson<RefreshRequest>,
) -> Result<Json<TokenResponse>, ApiError> {
    let pair = state
        .issuer
        .reissue_from_refresh(&body.refresh_token)
        .await
        .map_err(|e| ApiError::from_issue(&e, uri.path()))?;
    Ok(Json(pair.into()))
}

pub async fn logout(
    State(state): State<AppState>,
    OriginalUri(uri): OriginalUri,
    ApiJson(body): ApiJson<RefreshRequest>,
) -> Result<StatusCode, ApiError> {
    state
        .issuer
        .logout(&body.refresh_token)
        .await
        .map_err(|e| ApiError::from_issue(&e, uri.path()))?;
    Ok(StatusCode::NO_CONTENT)
}

/// OAuth2 token endpoint, `client_credentials` grant only. Client
/// authentication is HTTP basic or `client_id`/`client_secret` form fields.
pub async fn token(
    State(state): State<AppState>,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    ApiForm(form): ApiForm<TokenForm>,
) -> Result<Json<ClientCredentialsResponse>, ApiError> {
    let path = uri.path();

    match form.grant_type.parse::<GrantType>() {
        Ok(GrantType::ClientCredentials) => {}
        _ => {
            return Err(ApiError::bad_request(
                format!("unsupported grant type '{}'", form.grant_type),
                path,
            ));
        }
    }

    let (client_id, secret) = client_auth(&headers, &form)
        .ok_or_else(|| ApiError::unauthorized("client authentication required", path))?;
    let client_id = ClientId::parse(&client_id)
        .map_err(|_| ApiError::unauthorized("client authentication required", path))?;

    let scopes: AuthoritySet = form
        .scope
        .as_deref()
        .unwrap_or_default()
        .split_whitespace()
        .map(str::to_string)
        .collect();

    let issued = state
        .issuer
        .issue_client_credentials(&client_id, &secret, &scopes)
        .await
        .map_err(|e| ApiError::from_issue(&e, path))?;
    Ok(Json(issued.into()))
}

pub async fn jwks(State(state): State<AppState>) -> Json<JwkSet> {
    Json(state.keys.jwks(state.clock.now()))
}

fn client_auth(headers: &HeaderMap, form: &TokenForm) -> Option<(String, String)> {
    if let Some(value) = headers.get(header::AUTHORIZATION) {
        return basic_credentials(value.to_str().ok()?);
    }
    Some((form.client_id.clone()?, form.client_secret.clone()?))
}

fn basic_credentials(header_value: &str) -> Option<(String, String)> {
    let encoded = header_value.strip_prefix("Basic ")?.trim();
    let decoded = String::from_utf8(STANDARD.decode(encoded).ok()?).ok()?;
    let (id, secret) = decoded.split_once(':')?;
    Some((id.to_string(), secret.to_string()))
}
