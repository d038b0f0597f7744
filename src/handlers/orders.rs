use axum::{
    extract::{Json, Path, Query, State},
    routing::{get, post, put},
    Router,
};
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::entities::order::OrderStatus;
use crate::handlers::common::{success_response, Paginated, PaginationMeta, PaginationParams};
use crate::services::orders::OrderFilter;
use crate::{errors::ServiceError, AppState};

pub fn orders_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_orders))
        .route("/:id", get(get_order))
        .route("/by-number/:order_number", get(get_order_by_number))
        .route("/:id/history", get(get_history))
        .route("/:id/status", put(update_status))
        .route("/:id/cancel", post(cancel_order))
}

// serde(flatten) breaks numeric query fields under serde_urlencoded, so
// pagination is spelled out here.
#[derive(Debug, Deserialize)]
pub(crate) struct ListOrdersQuery {
    #[serde(default)]
    customer_id: Option<Uuid>,
    #[serde(default)]
    status: Option<OrderStatus>,
    #[serde(default = "default_page")]
    page: u64,
    #[serde(default = "default_per_page")]
    per_page: u64,
}

fn default_page() -> u64 {
    1
}

fn default_per_page() -> u64 {
    20
}

pub(crate) async fn list_orders(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListOrdersQuery>,
) -> Result<impl axum::response::IntoResponse, ServiceError> {
    let filter = OrderFilter {
        customer_id: query.customer_id,
        status: query.status,
    };
    let pagination = PaginationParams {
        page: query.page,
        per_page: query.per_page,
    };
    let (orders, total) = state
        .services
        .orders
        .list_orders(filter, pagination.page, pagination.per_page)
        .await?;
    Ok(success_response(Paginated {
        meta: PaginationMeta::new(&pagination, total),
        items: orders,
    }))
}

async fn get_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<impl axum::response::IntoResponse, ServiceError> {
    let order = state.services.orders.get_order(id).await?;
    let items = state.services.orders.get_order_items(id).await?;
    Ok(success_response(
        serde_json::json!({ "order": order, "items": items }),
    ))
}

async fn get_order_by_number(
    State(state): State<Arc<AppState>>,
    Path(order_number): Path<String>,
) -> Result<impl axum::response::IntoResponse, ServiceError> {
    let order = state
        .services
        .orders
        .get_order_by_number(&order_number)
        .await?;
    Ok(success_response(order))
}

async fn get_history(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<impl axum::response::IntoResponse, ServiceError> {
    let history = state.services.orders.get_history(id).await?;
    Ok(success_response(history))
}

#[derive(Debug, Deserialize)]
struct UpdateStatusRequest {
    status: OrderStatus,
    #[serde(default = "default_actor")]
    changed_by: String,
    #[serde(default)]
    comment: Option<String>,
}

fn default_actor() -> String {
    "system".to_string()
}

/// Move the order through its state machine; disallowed transitions get 422
async fn update_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateStatusRequest>,
) -> Result<impl axum::response::IntoResponse, ServiceError> {
    let order = state
        .services
        .orders
        .transition(id, payload.status, &payload.changed_by, payload.comment)
        .await?;
    Ok(success_response(order))
}

#[derive(Debug, Deserialize, Default)]
struct CancelRequest {
    #[serde(default)]
    comment: Option<String>,
}

/// Cancel the order and release its stock reservations
async fn cancel_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    payload: Option<Json<CancelRequest>>,
) -> Result<impl axum::response::IntoResponse, ServiceError> {
    let comment = payload.and_then(|Json(p)| p.comment);
    let order = state
        .services
        .orders
        .cancel_order(id, "customer", comment)
        .await?;
    Ok(success_response(order))
}
