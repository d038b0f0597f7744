use axum::{
    extract::{Json, Path, Query, State},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::handlers::common::{
    created_response, success_response, validate_input, Paginated, PaginationMeta,
    PaginationParams,
};
use crate::services::inventory::CreateProductInput;
use crate::{errors::ServiceError, AppState};

pub fn inventory_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_stock))
        .route("/:product_id", get(get_stock))
        .route("/:product_id/reserve", post(reserve))
        .route("/reservations/:id/release", post(release))
}

pub fn products_routes() -> Router<Arc<AppState>> {
    Router::new().route("/", post(create_product))
}

async fn create_product(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateProductInput>,
) -> Result<impl axum::response::IntoResponse, ServiceError> {
    validate_input(&payload)?;
    let product = state.services.inventory.create_product(payload).await?;
    Ok(created_response(product))
}

async fn list_stock(
    State(state): State<Arc<AppState>>,
    Query(pagination): Query<PaginationParams>,
) -> Result<impl axum::response::IntoResponse, ServiceError> {
    let (levels, total) = state
        .services
        .inventory
        .list_stock(pagination.page, pagination.per_page)
        .await?;
    Ok(success_response(Paginated {
        meta: PaginationMeta::new(&pagination, total),
        items: levels,
    }))
}

async fn get_stock(
    State(state): State<Arc<AppState>>,
    Path(product_id): Path<Uuid>,
) -> Result<impl axum::response::IntoResponse, ServiceError> {
    let level = state.services.inventory.get_stock(product_id).await?;
    Ok(success_response(level))
}

#[derive(Debug, Deserialize)]
struct ReserveRequest {
    quantity: i32,
    #[serde(default)]
    variant_id: Option<Uuid>,
    #[serde(default)]
    order_id: Option<Uuid>,
}

/// Reserve stock directly; 422 when the guarded decrement loses
async fn reserve(
    State(state): State<Arc<AppState>>,
    Path(product_id): Path<Uuid>,
    Json(payload): Json<ReserveRequest>,
) -> Result<impl axum::response::IntoResponse, ServiceError> {
    let reservation = state
        .services
        .inventory
        .reserve(
            product_id,
            payload.variant_id,
            payload.quantity,
            payload.order_id,
        )
        .await?;
    Ok(created_response(reservation))
}

/// Release a reservation; repeated releases are no-ops
async fn release(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<impl axum::response::IntoResponse, ServiceError> {
    let released = state.services.inventory.release(id).await?;
    Ok(success_response(serde_json::json!({ "released": released })))
}
