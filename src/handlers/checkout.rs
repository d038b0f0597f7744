use axum::{
    extract::{Json, State},
    http::HeaderMap,
    routing::post,
    Router,
};
use std::sync::Arc;

use crate::handlers::common::created_response;
use crate::services::checkout::CheckoutInput;
use crate::{errors::ServiceError, AppState};

pub fn checkout_routes() -> Router<Arc<AppState>> {
    Router::new().route("/", post(create_order))
}

/// Run checkout for the customer's cart. An optional `Idempotency-Key`
/// header makes client retries safe: a replayed key returns the order the
/// first attempt created.
pub(crate) async fn create_order(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<CheckoutInput>,
) -> Result<impl axum::response::IntoResponse, ServiceError> {
    let idempotency_key = headers
        .get("idempotency-key")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());

    let outcome = state
        .services
        .checkout
        .create_order(payload, idempotency_key)
        .await
        .map_err(ServiceError::from)?;

    Ok(created_response(outcome))
}
