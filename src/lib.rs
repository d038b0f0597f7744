//! Order checkout, inventory reservation, and coupon redemption core for a
//! multi-vendor marketplace.

pub mod capabilities;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod metrics;
pub mod services;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use sea_orm::DatabaseConnection;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::config::AppConfig;
use crate::events::EventSender;
use crate::handlers::AppServices;
use crate::services::checkout::{Capabilities, CheckoutService};

/// Shared application state.
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: AppConfig,
    pub event_sender: Arc<EventSender>,
    pub services: AppServices,
}

impl AppState {
    pub fn new(
        db: Arc<DatabaseConnection>,
        config: AppConfig,
        event_sender: Arc<EventSender>,
        capabilities: Capabilities,
    ) -> Self {
        let services = AppServices {
            carts: services::carts::CartService::new(Arc::clone(&db), Arc::clone(&event_sender)),
            checkout: Arc::new(CheckoutService::new(
                Arc::clone(&db),
                config.checkout.clone(),
                capabilities,
                Arc::clone(&event_sender),
            )),
            coupons: services::coupons::CouponService::new(Arc::clone(&db)),
            federation: services::federation::FederationService::new(
                Arc::clone(&db),
                config.federation.clone(),
            ),
            inventory: services::inventory::InventoryService::new(
                Arc::clone(&db),
                Arc::clone(&event_sender),
            ),
            orders: services::orders::OrderService::new(Arc::clone(&db), Arc::clone(&event_sender)),
        };
        Self {
            db,
            config,
            event_sender,
            services,
        }
    }
}

/// All v1 API routes, without the ambient layers.
pub fn api_v1_routes() -> Router<Arc<AppState>> {
    Router::new()
        .nest("/carts", handlers::carts::carts_routes())
        .nest("/checkout", handlers::checkout::checkout_routes())
        .nest("/orders", handlers::orders::orders_routes())
        .nest("/coupons", handlers::coupons::coupons_routes())
        .nest("/inventory", handlers::inventory::inventory_routes())
        .nest("/products", handlers::inventory::products_routes())
        .nest("/admin", handlers::admin::admin_routes())
        // axum maps a nested `/` to the bare prefix only; register the
        // trailing-slash forms of the collection endpoints as well.
        .route("/checkout/", post(handlers::checkout::create_order))
        .route("/orders/", get(handlers::orders::list_orders))
}

/// Full application router with health, metrics, and middleware.
pub fn app_router(state: Arc<AppState>) -> Router {
    metrics::register_metrics();
    Router::new()
        .nest("/api/v1", api_v1_routes())
        .route("/health", get(health))
        .route("/status", get(status))
        .route("/metrics", get(metrics_endpoint))
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Liveness probe with a database ping.
async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.db.ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(serde_json::json!({ "status": "healthy" })),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({ "status": "unhealthy", "error": e.to_string() })),
        ),
    }
}

async fn status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "environment": state.config.environment,
        "federated": state.services.federation.is_federated(),
    }))
}

async fn metrics_endpoint() -> impl IntoResponse {
    (
        [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics::gather(),
    )
}
