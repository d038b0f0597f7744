use axum::{
    extract::{Json, Query, State},
    routing::{get, post},
    Router,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::handlers::common::{
    created_response, success_response, validate_input, Paginated, PaginationMeta,
    PaginationParams,
};
use crate::services::coupons::CreateCouponInput;
use crate::{errors::ServiceError, AppState};

pub fn coupons_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", post(create_coupon).get(list_coupons))
        .route("/validate", post(validate_coupon))
}

async fn create_coupon(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateCouponInput>,
) -> Result<impl axum::response::IntoResponse, ServiceError> {
    validate_input(&payload)?;
    let coupon = state.services.coupons.create_coupon(payload).await?;
    Ok(created_response(coupon))
}

async fn list_coupons(
    State(state): State<Arc<AppState>>,
    Query(pagination): Query<PaginationParams>,
) -> Result<impl axum::response::IntoResponse, ServiceError> {
    let (coupons, total) = state
        .services
        .coupons
        .list_coupons(pagination.page, pagination.per_page)
        .await?;
    Ok(success_response(Paginated {
        meta: PaginationMeta::new(&pagination, total),
        items: coupons,
    }))
}

#[derive(Debug, Deserialize)]
struct ValidateCouponRequest {
    code: String,
    customer_id: Uuid,
    subtotal: Decimal,
}

/// Dry-run validation: reports the discount a checkout would apply, or the
/// structured rejection reason with 200 (the request itself succeeded).
async fn validate_coupon(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ValidateCouponRequest>,
) -> Result<impl axum::response::IntoResponse, ServiceError> {
    let result = state
        .services
        .coupons
        .validate(&payload.code, payload.customer_id, payload.subtotal)
        .await?;

    let body = match result {
        Ok((coupon, discount)) => serde_json::json!({
            "valid": true,
            "code": coupon.code,
            "discount_amount": discount,
        }),
        Err(rejection) => serde_json::json!({
            "valid": false,
            "reason": rejection.reason(),
            "message": rejection.message(),
        }),
    };
    Ok(success_response(body))
}
