use axum::{
    Json,
    extract::{Extension, OriginalUri, State},
};

use crate::app::AppState;
use crate::app::dto::ProductView;
use crate::app::errors::ApiError;
use crate::authz::authorize_operation;
use crate::context::PrincipalContext;

pub const LIST: &str = "products.list";

pub async fn list_products(
    State(state): State<AppState>,
    OriginalUri(uri): OriginalUri,
    Extension(principal): Extension<PrincipalContext>,
) -> Result<Json<Vec<ProductView>>, ApiError> {
    authorize_operation(&state.operations, LIST, Some(&principal), uri.path())?;

    Ok(Json(vec![
        ProductView { id: 1, name: "Keyboard".into() },
        ProductView { id: 2, name: "Monitor".into() },
    ]))
}
