use axum::{Json, extract::Extension, http::StatusCode};

use crate::app::dto::MeResponse;
use crate::context::PrincipalContext;

pub async fn health() -> StatusCode {
    StatusCode::OK
}

pub async fn me(Extension(principal): Extension<PrincipalContext>) -> Json<MeResponse> {
    Json(MeResponse {
        subject: principal.subject().to_string(),
        authorities: principal.authorities().to_strings(),
    })
}
