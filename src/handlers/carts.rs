use axum::{
    extract::{Json, Path, State},
    routing::{delete, get, post, put},
    Router,
};
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::handlers::common::{no_content_response, success_response, validate_input};
use crate::services::carts::AddItemInput;
use crate::{errors::ServiceError, AppState};

/// Creates the router for cart endpoints
pub fn carts_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/:customer_id", get(get_cart))
        .route("/:customer_id/items", post(add_item))
        .route("/:customer_id/items/:item_id", put(update_item))
        .route("/:customer_id/items/:item_id", delete(remove_item))
        .route("/:customer_id/clear", post(clear_cart))
}

/// Get the cart with its items and subtotal
async fn get_cart(
    State(state): State<Arc<AppState>>,
    Path(customer_id): Path<Uuid>,
) -> Result<impl axum::response::IntoResponse, ServiceError> {
    let cart = state.services.carts.get_cart(customer_id).await?;
    Ok(success_response(cart))
}

/// Add an item, folding repeats into the existing line
async fn add_item(
    State(state): State<Arc<AppState>>,
    Path(customer_id): Path<Uuid>,
    Json(payload): Json<AddItemInput>,
) -> Result<impl axum::response::IntoResponse, ServiceError> {
    validate_input(&payload)?;
    let item = state.services.carts.add_item(customer_id, payload).await?;
    Ok(success_response(item))
}

#[derive(Debug, Deserialize)]
struct UpdateQuantityRequest {
    quantity: i32,
}

/// Set a line quantity; zero or negative removes the line
async fn update_item(
    State(state): State<Arc<AppState>>,
    Path((customer_id, item_id)): Path<(Uuid, Uuid)>,
    Json(payload): Json<UpdateQuantityRequest>,
) -> Result<impl axum::response::IntoResponse, ServiceError> {
    let updated = state
        .services
        .carts
        .update_item_quantity(customer_id, item_id, payload.quantity)
        .await?;
    match updated {
        Some(item) => Ok(success_response(item)),
        None => Ok(no_content_response()),
    }
}

/// Remove a line entirely
async fn remove_item(
    State(state): State<Arc<AppState>>,
    Path((customer_id, item_id)): Path<(Uuid, Uuid)>,
) -> Result<impl axum::response::IntoResponse, ServiceError> {
    state.services.carts.remove_item(customer_id, item_id).await?;
    Ok(no_content_response())
}

/// Empty the cart, keeping the cart row
async fn clear_cart(
    State(state): State<Arc<AppState>>,
    Path(customer_id): Path<Uuid>,
) -> Result<impl axum::response::IntoResponse, ServiceError> {
    let removed = state.services.carts.clear(customer_id).await?;
    Ok(success_response(serde_json::json!({ "removed": removed })))
}
