//! Body extractors whose rejections use the shared error body.

use axum::{
    Form, Json, async_trait,
    extract::{
        FromRequest, OriginalUri, Request,
        rejection::{FormRejection, JsonRejection},
    },
};

use crate::app::errors::ApiError;

/// `Json<T>` that rejects with an [`ApiError`].
#[derive(Debug, Clone)]
pub struct ApiJson<T>(pub T);

/// `Form<T>` that rejects with an [`ApiError`].
#[derive(Debug, Clone)]
pub struct ApiForm<T>(pub T);

fn request_path(req: &Request) -> String {
    match req.extensions().get::<OriginalUri>() {
        Some(OriginalUri(uri)) => uri.path().to_string(),
        None => req.uri().path().to_string(),
    }
}

#[async_trait]
impl<S, T> FromRequest<S> for ApiJson<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let path = request_path(&req);
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(Self(value)),
            Err(rejection) => {
                tracing::debug!(%path, error = %rejection.body_text(), "json body rejected");
                Err(ApiError::new(rejection.status(), rejection.body_text(), path))
            }
        }
    }
}

#[async_trait]
impl<S, T> FromRequest<S> for ApiForm<T>
where
    Form<T>: FromRequest<S, Rejection = FormRejection>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let path = request_path(&req);
        match Form::<T>::from_request(req, state).await {
            Ok(Form(value)) => Ok(Self(value)),
            Err(rejection) => {
                tracing::debug!(%path, error = %rejection.body_text(), "form body rejected");
                Err(ApiError::new(rejection.status(), rejection.body_text(), path))
            }
        }
    }
}
