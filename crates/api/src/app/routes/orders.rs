use axum::{
    Json,
    extract::{Extension, OriginalUri, Path, State},
    http::StatusCode,
};

use trustgate_core::ClientId;

use crate::app::AppState;
use crate::app::dto::{OrderCatalogResponse, OrderView, ProductView};
use crate::app::errors::ApiError;
use crate::authz::authorize_operation;
use crate::context::PrincipalContext;

pub const LIST: &str = "orders.list";
pub const DELETE: &str = "orders.delete";
pub const CATALOG: &str = "orders.catalog";

const PRODUCT_SERVICE: &str = "product-service";

fn sample_order(id: u64) -> OrderView {
    OrderView {
        id,
        customer: "customer-1".into(),
        status: "OPEN",
    }
}

pub async fn list_orders(
    State(state): State<AppState>,
    OriginalUri(uri): OriginalUri,
    Extension(principal): Extension<PrincipalContext>,
) -> Result<Json<Vec<OrderView>>, ApiError> {
    authorize_operation(&state.operations, LIST, Some(&principal), uri.path())?;
    Ok(Json(vec![sample_order(1), sample_order(2)]))
}

pub async fn delete_order(
    State(state): State<AppState>,
    OriginalUri(uri): OriginalUri,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<u64>,
) -> Result<StatusCode, ApiError> {
    authorize_operation(&state.operations, DELETE, Some(&principal), uri.path())?;
    tracing::info!(order_id = id, subject = %principal.subject(), "order deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// Order plus the product catalog, fetched from the product service with a
/// service token from the broker. The caller's own token is never forwarded.
pub async fn order_catalog(
    State(state): State<AppState>,
    OriginalUri(uri): OriginalUri,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<u64>,
) -> Result<Json<OrderCatalogResponse>, ApiError> {
    let path = uri.path();
    authorize_operation(&state.operations, CATALOG, Some(&principal), path)?;

    let (Some(broker), Some(base_url)) = (&state.broker, &state.product_service_url) else {
        return Err(ApiError::new(
            StatusCode::SERVICE_UNAVAILABLE,
            "product service is not configured",
            path,
        ));
    };
    let target = ClientId::parse(PRODUCT_SERVICE)
        .map_err(|e| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string(), path))?;

    let request = state
        .http
        .get(format!("{}/api/products", base_url.trim_end_matches('/')));
    let response = broker
        .authorize_request(request, &target)
        .await
        .map_err(|e| ApiError::from_broker(&e, path))?
        .send()
        .await
        .map_err(|e| ApiError::new(StatusCode::BAD_GATEWAY, e.to_string(), path))?;

    let status = response.status();
    if status == reqwest::StatusCode::UNAUTHORIZED {
        broker.evict(&target).await;
    }
    if !status.is_success() {
        tracing::warn!(%status, target_client = %target, "product service call failed");
        return Err(ApiError::new(
            StatusCode::BAD_GATEWAY,
            format!("product service answered {status}"),
            path,
        ));
    }

    let products: Vec<ProductView> = response
        .json()
        .await
        .map_err(|e| ApiError::new(StatusCode::BAD_GATEWAY, e.to_string(), path))?;

    Ok(Json(OrderCatalogResponse {
        order: sample_order(id),
        products,
    }))
}
