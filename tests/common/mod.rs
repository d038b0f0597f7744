use std::sync::Arc;

use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
    Router,
};
use chrono::Utc;
use http_body_util::BodyExt;
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, Set};
use serde_json::Value;
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

use marketplace_api::config::{
    AppConfig, CheckoutConfig, FederationConfig, InvalidCouponPolicy,
};
use marketplace_api::db;
use marketplace_api::entities::coupon::{self, DiscountType};
use marketplace_api::entities::product;
use marketplace_api::events::{self, EventSender};
use marketplace_api::services::checkout::Capabilities;
use marketplace_api::{app_router, AppState};

/// Application harness backed by an in-memory SQLite database.
///
/// The pool is capped at a single connection so every handle sees the same
/// in-memory database.
pub struct TestApp {
    pub router: Router,
    pub state: Arc<AppState>,
    _event_task: tokio::task::JoinHandle<()>,
}

pub fn test_config() -> AppConfig {
    AppConfig {
        database_url: "sqlite::memory:".to_string(),
        host: "127.0.0.1".to_string(),
        port: 18080,
        environment: "test".to_string(),
        log_level: "debug".to_string(),
        log_json: false,
        db_max_connections: 1,
        db_min_connections: 1,
        event_channel_capacity: 64,
        checkout: CheckoutConfig::default(),
        federation: FederationConfig::default(),
    }
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_coupon_policy(InvalidCouponPolicy::Reject).await
    }

    pub async fn with_coupon_policy(policy: InvalidCouponPolicy) -> Self {
        let mut cfg = test_config();
        cfg.checkout.invalid_coupon_policy = policy;
        Self::with_config(cfg).await
    }

    pub async fn with_config(cfg: AppConfig) -> Self {
        Self::with_capabilities(cfg, Capabilities::default()).await
    }

    pub async fn with_capabilities(cfg: AppConfig, capabilities: Capabilities) -> Self {
        let pool = db::establish_connection(&cfg)
            .await
            .expect("failed to create test database");
        db::ensure_schema(&pool).await.expect("schema");

        let (tx, rx) = mpsc::channel(cfg.event_channel_capacity);
        let event_task = tokio::spawn(events::process_events(rx));
        let event_sender = Arc::new(EventSender::new(tx));

        let state = Arc::new(AppState::new(
            Arc::new(pool),
            cfg,
            event_sender,
            capabilities,
        ));
        let router = app_router(Arc::clone(&state));

        Self {
            router,
            state,
            _event_task: event_task,
        }
    }

    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        self.request_with_headers(method, uri, body, &[]).await
    }

    pub async fn request_with_headers(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        headers: &[(&str, &str)],
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let request = match body {
            Some(json) => builder
                .header("content-type", "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("request failed");
        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("body")
            .to_bytes();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, json)
    }

    pub async fn seed_product(&self, price: Decimal, stock: i32) -> product::Model {
        self.seed_product_full(price, stock, Decimal::ZERO, true, false)
            .await
    }

    pub async fn seed_product_full(
        &self,
        price: Decimal,
        stock: i32,
        commission_rate: Decimal,
        track_inventory: bool,
        allow_backorders: bool,
    ) -> product::Model {
        let now = Utc::now();
        let id = Uuid::new_v4();
        product::ActiveModel {
            id: Set(id),
            vendor_id: Set(Uuid::new_v4()),
            name: Set(format!("Product {}", &id.to_string()[..8])),
            sku: Set(format!("SKU-{}", &id.to_string()[..8])),
            price: Set(price),
            currency: Set("USD".to_string()),
            commission_rate: Set(commission_rate),
            stock_quantity: Set(stock),
            low_stock_threshold: Set(0),
            track_inventory: Set(track_inventory),
            allow_backorders: Set(allow_backorders),
            is_active: Set(true),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed product")
    }

    pub async fn seed_coupon(
        &self,
        code: &str,
        discount_type: DiscountType,
        discount_value: Decimal,
        max_uses: Option<i32>,
    ) -> coupon::Model {
        self.seed_coupon_full(code, discount_type, discount_value, max_uses, 100, None, None)
            .await
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn seed_coupon_full(
        &self,
        code: &str,
        discount_type: DiscountType,
        discount_value: Decimal,
        max_uses: Option<i32>,
        max_uses_per_customer: i32,
        min_order_amount: Option<Decimal>,
        valid_until: Option<chrono::DateTime<Utc>>,
    ) -> coupon::Model {
        let now = Utc::now();
        coupon::ActiveModel {
            id: Set(Uuid::new_v4()),
            code: Set(code.to_uppercase()),
            discount_type: Set(discount_type),
            discount_value: Set(discount_value),
            max_discount_amount: Set(None),
            min_order_amount: Set(min_order_amount),
            max_uses: Set(max_uses),
            max_uses_per_customer: Set(max_uses_per_customer),
            current_uses: Set(0),
            is_active: Set(true),
            valid_from: Set(now - chrono::Duration::hours(1)),
            valid_until: Set(valid_until),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed coupon")
    }

    /// Adds an item through the service layer, pinning the catalog price.
    pub async fn add_to_cart(&self, customer_id: Uuid, product_id: Uuid, quantity: i32) {
        self.state
            .services
            .carts
            .add_item(
                customer_id,
                marketplace_api::services::carts::AddItemInput {
                    product_id,
                    variant_id: None,
                    quantity,
                    unit_price: None,
                },
            )
            .await
            .expect("add to cart");
    }
}

/// Standard checkout payload for a customer.
pub fn checkout_payload(customer_id: Uuid, coupon_code: Option<&str>) -> Value {
    serde_json::json!({
        "customer_id": customer_id,
        "shipping_address_id": Uuid::new_v4(),
        "billing_address_id": Uuid::new_v4(),
        "payment_method": "card",
        "coupon_code": coupon_code,
    })
}
