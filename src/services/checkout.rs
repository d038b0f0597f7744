//! Checkout orchestrator.
//!
//! Turns a cart into an order inside one transaction: read cart, validate
//! coupon, price the order, reserve stock, write the order with snapshotted
//! line items, redeem the coupon, clear the cart, commit. A failure at any
//! step rolls everything back; the transaction itself compensates partial
//! reservations. Payment initiation, notification, and events run strictly
//! after commit.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use rand::distributions::Alphanumeric;
use rand::Rng;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DatabaseTransaction, EntityTrait,
    QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::capabilities::{
    AddressLookup, OrderNotifier, PaymentGateway, ShippingMethod, ShippingRateCalculator,
    TaxCalculator,
};
use crate::config::{CheckoutConfig, InvalidCouponPolicy};
use crate::entities::cart_item::{self, Entity as CartItem};
use crate::entities::coupon;
use crate::entities::order::{self, Entity as Order, OrderStatus};
use crate::entities::order_item;
use crate::entities::product::Entity as Product;
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::metrics;
use crate::services::coupons::{self, CouponRejection};
use crate::services::inventory;
use crate::services::orders;

/// Typed checkout failures. Each carries the detail an actionable client
/// message needs; `is_retryable` distinguishes contention and infrastructure
/// failures from validation ones.
#[derive(Debug, Error)]
pub enum CheckoutError {
    #[error("Cart is empty")]
    EmptyCart,

    #[error("Insufficient stock for product {product_id}: requested {requested}, available {available}")]
    InsufficientStock {
        product_id: Uuid,
        variant_id: Option<Uuid>,
        requested: i32,
        available: i32,
    },

    #[error("Invalid coupon: {}", .0.message())]
    InvalidCoupon(CouponRejection),

    #[error("Order total must be positive")]
    InvalidTotal,

    #[error("Could not allocate a unique order number")]
    OrderNumberExhausted,

    #[error("Pricing capability timed out")]
    PricingTimeout,

    #[error(transparent)]
    Service(#[from] ServiceError),
}

impl CheckoutError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::InsufficientStock { .. }
                | Self::OrderNumberExhausted
                | Self::PricingTimeout
                | Self::Service(_)
        )
    }

    fn metric_reason(&self) -> &'static str {
        match self {
            Self::EmptyCart => "empty_cart",
            Self::InsufficientStock { .. } => "insufficient_stock",
            Self::InvalidCoupon(_) => "invalid_coupon",
            Self::InvalidTotal => "invalid_total",
            Self::OrderNumberExhausted => "order_number_exhausted",
            Self::PricingTimeout => "pricing_timeout",
            Self::Service(_) => "internal",
        }
    }
}

impl From<sea_orm::DbErr> for CheckoutError {
    fn from(err: sea_orm::DbErr) -> Self {
        Self::Service(err.into())
    }
}

impl From<CheckoutError> for ServiceError {
    fn from(err: CheckoutError) -> Self {
        match err {
            CheckoutError::EmptyCart => ServiceError::ValidationError("Cart is empty".to_string()),
            CheckoutError::InsufficientStock { .. } => {
                ServiceError::InsufficientStock(err.to_string())
            }
            CheckoutError::InvalidCoupon(rejection) => {
                ServiceError::CouponRejected(rejection.message())
            }
            CheckoutError::InvalidTotal => {
                ServiceError::ValidationError("Order total must be positive".to_string())
            }
            CheckoutError::OrderNumberExhausted => {
                ServiceError::Conflict("Could not allocate a unique order number".to_string())
            }
            CheckoutError::PricingTimeout => {
                ServiceError::Timeout("Pricing capability timed out".to_string())
            }
            CheckoutError::Service(inner) => inner,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutInput {
    pub customer_id: Uuid,
    pub shipping_address_id: Uuid,
    pub billing_address_id: Uuid,
    pub payment_method: String,
    #[serde(default)]
    pub coupon_code: Option<String>,
    #[serde(default)]
    pub shipping_method: ShippingMethod,
    #[serde(default)]
    pub customer_note: Option<String>,
}

/// Successful checkout result.
#[derive(Debug, Clone, Serialize)]
pub struct CheckoutOutcome {
    pub order: order::Model,
    pub items: Vec<order_item::Model>,
    /// True when an idempotency key replay returned an existing order.
    pub replayed: bool,
    #[serde(skip)]
    coupon_redemption: Option<(Uuid, String, Decimal)>,
}

/// External capabilities the orchestrator consumes.
pub struct Capabilities {
    pub address_lookup: Arc<dyn AddressLookup>,
    pub tax: Arc<dyn TaxCalculator>,
    pub shipping: Arc<dyn ShippingRateCalculator>,
    pub payment: Arc<dyn PaymentGateway>,
    pub notifier: Arc<dyn OrderNotifier>,
}

impl Default for Capabilities {
    fn default() -> Self {
        use crate::capabilities::{
            AutoApprovePaymentGateway, FlatRateTaxCalculator, LoggingNotifier,
            StaticAddressLookup, TieredShippingCalculator,
        };
        Self {
            address_lookup: Arc::new(StaticAddressLookup),
            tax: Arc::new(FlatRateTaxCalculator::default()),
            shipping: Arc::new(TieredShippingCalculator),
            payment: Arc::new(AutoApprovePaymentGateway),
            notifier: Arc::new(LoggingNotifier),
        }
    }
}

/// Per-key progress of a keyed checkout. `InFlight` arbitrates duplicate
/// submissions racing the same key.
#[derive(Debug, Clone, Copy)]
enum IdempotencyState {
    InFlight,
    Completed(Uuid),
}

pub struct CheckoutService {
    db: Arc<DatabaseConnection>,
    config: CheckoutConfig,
    capabilities: Capabilities,
    event_sender: Arc<EventSender>,
    // Client idempotency keys. Failed attempts free their key; completed
    // ones keep it for the process lifetime. A multi-instance deployment
    // swaps this for a shared store with a TTL.
    idempotency_keys: DashMap<String, IdempotencyState>,
}

impl CheckoutService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        config: CheckoutConfig,
        capabilities: Capabilities,
        event_sender: Arc<EventSender>,
    ) -> Self {
        Self {
            db,
            config,
            capabilities,
            event_sender,
            idempotency_keys: DashMap::new(),
        }
    }

    /// Runs the full checkout. `idempotency_key` is client-supplied; the
    /// same key never creates a second order.
    #[instrument(skip(self, input), fields(customer_id = %input.customer_id))]
    pub async fn create_order(
        &self,
        input: CheckoutInput,
        idempotency_key: Option<String>,
    ) -> Result<CheckoutOutcome, CheckoutError> {
        if let Some(key) = idempotency_key.as_deref() {
            let completed = match self.idempotency_keys.entry(key.to_string()) {
                Entry::Occupied(entry) => match *entry.get() {
                    IdempotencyState::Completed(order_id) => Some(order_id),
                    IdempotencyState::InFlight => {
                        return Err(CheckoutError::Service(ServiceError::Conflict(
                            "A checkout with this idempotency key is already in progress"
                                .to_string(),
                        )));
                    }
                },
                Entry::Vacant(entry) => {
                    entry.insert(IdempotencyState::InFlight);
                    None
                }
            };
            if let Some(order_id) = completed {
                info!(%order_id, "idempotency key replay");
                return self.replay(order_id).await;
            }
        }

        let timer = metrics::CHECKOUT_DURATION.start_timer();
        let result = self.run_checkout(&input).await;
        timer.observe_duration();

        match result {
            Ok(outcome) => {
                metrics::CHECKOUTS_COMPLETED.inc();
                if let Some(key) = idempotency_key {
                    self.idempotency_keys
                        .insert(key, IdempotencyState::Completed(outcome.order.id));
                }
                self.after_commit(&outcome, &input).await;
                Ok(outcome)
            }
            Err(err) => {
                // The key is released so the client can retry the failure.
                if let Some(key) = idempotency_key {
                    self.idempotency_keys.remove(&key);
                }
                metrics::CHECKOUT_FAILURES
                    .with_label_values(&[err.metric_reason()])
                    .inc();
                warn!(error = %err, "checkout failed");
                Err(err)
            }
        }
    }

    async fn replay(&self, order_id: Uuid) -> Result<CheckoutOutcome, CheckoutError> {
        let order = Order::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| {
                CheckoutError::Service(ServiceError::NotFound(format!(
                    "Order {} not found",
                    order_id
                )))
            })?;
        let items = order_item::Entity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .order_by_asc(order_item::Column::CreatedAt)
            .all(&*self.db)
            .await?;
        Ok(CheckoutOutcome {
            order,
            items,
            replayed: true,
            coupon_redemption: None,
        })
    }

    async fn run_checkout(&self, input: &CheckoutInput) -> Result<CheckoutOutcome, CheckoutError> {
        let txn = self.db.begin().await?;

        let cart_items = CartItem::find()
            .filter(cart_item::Column::CartId.eq(input.customer_id))
            .order_by_asc(cart_item::Column::CreatedAt)
            .all(&txn)
            .await?;
        if cart_items.is_empty() {
            return Err(CheckoutError::EmptyCart);
        }

        let subtotal: Decimal = cart_items
            .iter()
            .map(|i| i.unit_price * Decimal::from(i.quantity))
            .sum();

        let coupon_outcome = self
            .resolve_coupon(&txn, input, subtotal)
            .await?;
        let discount_amount = coupon_outcome
            .as_ref()
            .map(|(_, discount)| *discount)
            .unwrap_or(Decimal::ZERO);

        let (tax_amount, shipping_cost) = self.price(input, subtotal, &cart_items).await?;

        let total = subtotal + tax_amount + shipping_cost - discount_amount;
        if total <= Decimal::ZERO {
            return Err(CheckoutError::InvalidTotal);
        }

        let order_id = Uuid::new_v4();
        for item in &cart_items {
            self.reserve_line(&txn, order_id, item).await?;
        }

        let order_number = self.allocate_order_number(&txn).await?;
        let now = Utc::now();
        let order = order::ActiveModel {
            id: Set(order_id),
            order_number: Set(order_number),
            customer_id: Set(input.customer_id),
            shipping_address_id: Set(Some(input.shipping_address_id)),
            billing_address_id: Set(Some(input.billing_address_id)),
            status: Set(OrderStatus::Pending),
            subtotal: Set(subtotal),
            tax_amount: Set(tax_amount),
            shipping_cost: Set(shipping_cost),
            discount_amount: Set(discount_amount),
            total: Set(total),
            currency: Set("USD".to_string()),
            coupon_code: Set(coupon_outcome.as_ref().map(|(c, _)| c.code.clone())),
            payment_method: Set(input.payment_method.clone()),
            customer_note: Set(input.customer_note.clone()),
            created_at: Set(now),
            updated_at: Set(now),
            paid_at: Set(None),
            shipped_at: Set(None),
            delivered_at: Set(None),
            cancelled_at: Set(None),
        }
        .insert(&txn)
        .await?;

        let items = self.write_order_items(&txn, &order, &cart_items).await?;

        if let Some((coupon, discount)) = &coupon_outcome {
            let redeemed =
                coupons::redeem_on(&txn, coupon, input.customer_id, order.id, *discount).await?;
            if !redeemed {
                // A concurrent checkout took the last use between validation
                // and redemption.
                return Err(CheckoutError::InvalidCoupon(CouponRejection::Exhausted {
                    code: coupon.code.clone(),
                }));
            }
        }

        orders::append_history(&txn, order.id, None, OrderStatus::Pending, "system", None)
            .await?;

        CartItem::delete_many()
            .filter(cart_item::Column::CartId.eq(input.customer_id))
            .exec(&txn)
            .await?;

        txn.commit().await?;

        info!(order_id = %order.id, order_number = %order.order_number, %total, "order created");
        Ok(CheckoutOutcome {
            order,
            items,
            replayed: false,
            coupon_redemption: coupon_outcome
                .map(|(coupon, discount)| (coupon.id, coupon.code, discount)),
        })
    }

    async fn resolve_coupon(
        &self,
        txn: &DatabaseTransaction,
        input: &CheckoutInput,
        subtotal: Decimal,
    ) -> Result<Option<(coupon::Model, Decimal)>, CheckoutError> {
        let code = match input.coupon_code.as_deref() {
            Some(code) if !code.trim().is_empty() => code,
            _ => return Ok(None),
        };

        match coupons::validate_on(txn, code, input.customer_id, subtotal).await? {
            Ok(validated) => Ok(Some(validated)),
            Err(rejection) => match self.config.invalid_coupon_policy {
                InvalidCouponPolicy::Reject => Err(CheckoutError::InvalidCoupon(rejection)),
                InvalidCouponPolicy::Ignore => {
                    warn!(
                        code,
                        reason = rejection.reason(),
                        "coupon rejected, proceeding without discount"
                    );
                    Ok(None)
                }
            },
        }
    }

    async fn price(
        &self,
        input: &CheckoutInput,
        subtotal: Decimal,
        cart_items: &[cart_item::Model],
    ) -> Result<(Decimal, Decimal), CheckoutError> {
        let timeout = Duration::from_secs(self.config.pricing_timeout_secs);

        let address = tokio::time::timeout(
            timeout,
            self.capabilities.address_lookup.lookup(input.shipping_address_id),
        )
        .await
        .map_err(|_| CheckoutError::PricingTimeout)??;

        let tax_amount = tokio::time::timeout(
            timeout,
            self.capabilities.tax.tax_amount(subtotal, &address),
        )
        .await
        .map_err(|_| CheckoutError::PricingTimeout)??;

        let item_count: i32 = cart_items.iter().map(|i| i.quantity).sum();
        let shipping_cost = tokio::time::timeout(
            timeout,
            self.capabilities.shipping.shipping_cost(
                item_count.max(0) as u32,
                &address,
                input.shipping_method,
            ),
        )
        .await
        .map_err(|_| CheckoutError::PricingTimeout)??;

        Ok((tax_amount, shipping_cost))
    }

    async fn reserve_line(
        &self,
        txn: &DatabaseTransaction,
        order_id: Uuid,
        item: &cart_item::Model,
    ) -> Result<(), CheckoutError> {
        match inventory::reserve_on(
            txn,
            item.product_id,
            item.variant_id,
            item.quantity,
            Some(order_id),
        )
        .await
        {
            Ok(_) => Ok(()),
            Err(ServiceError::InsufficientStock(_)) => {
                let available =
                    inventory::available_quantity(txn, item.product_id, item.variant_id).await?;
                Err(CheckoutError::InsufficientStock {
                    product_id: item.product_id,
                    variant_id: item.variant_id,
                    requested: item.quantity,
                    available,
                })
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn write_order_items(
        &self,
        txn: &DatabaseTransaction,
        order: &order::Model,
        cart_items: &[cart_item::Model],
    ) -> Result<Vec<order_item::Model>, CheckoutError> {
        let mut items = Vec::with_capacity(cart_items.len());
        for cart_item in cart_items {
            let product = Product::find_by_id(cart_item.product_id)
                .one(txn)
                .await?
                .ok_or_else(|| {
                    CheckoutError::Service(ServiceError::NotFound(format!(
                        "Product {} not found",
                        cart_item.product_id
                    )))
                })?;

            let line_subtotal = cart_item.unit_price * Decimal::from(cart_item.quantity);
            let commission_amount =
                (line_subtotal * product.commission_rate / Decimal::from(100)).round_dp(2);
            let vendor_payout = line_subtotal - commission_amount;

            let item = order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order.id),
                product_id: Set(product.id),
                variant_id: Set(cart_item.variant_id),
                vendor_id: Set(product.vendor_id),
                product_name: Set(product.name.clone()),
                product_sku: Set(product.sku.clone()),
                unit_price: Set(cart_item.unit_price),
                quantity: Set(cart_item.quantity),
                subtotal: Set(line_subtotal),
                commission_rate: Set(product.commission_rate),
                commission_amount: Set(commission_amount),
                vendor_payout: Set(vendor_payout),
                created_at: Set(Utc::now()),
            }
            .insert(txn)
            .await?;
            items.push(item);
        }
        Ok(items)
    }

    /// `ORD-` + UTC date + 6 random alphanumerics, retried while taken.
    async fn allocate_order_number(
        &self,
        txn: &DatabaseTransaction,
    ) -> Result<String, CheckoutError> {
        for _ in 0..self.config.order_number_attempts {
            let candidate = generate_order_number();
            let taken = Order::find()
                .filter(order::Column::OrderNumber.eq(candidate.clone()))
                .one(txn)
                .await?
                .is_some();
            if !taken {
                return Ok(candidate);
            }
        }
        Err(CheckoutError::OrderNumberExhausted)
    }

    /// Post-commit side effects. None of these may fail the request.
    async fn after_commit(&self, outcome: &CheckoutOutcome, input: &CheckoutInput) {
        let order = &outcome.order;

        self.event_sender
            .send_or_log(Event::OrderCreated {
                order_id: order.id,
                order_number: order.order_number.clone(),
                customer_id: order.customer_id,
                total: order.total,
            })
            .await;
        self.event_sender
            .send_or_log(Event::CheckoutCompleted {
                order_id: order.id,
                customer_id: order.customer_id,
                item_count: outcome.items.len(),
            })
            .await;
        if let Some((coupon_id, code, discount_amount)) = outcome.coupon_redemption.clone() {
            self.event_sender
                .send_or_log(Event::CouponRedeemed {
                    coupon_id,
                    code,
                    customer_id: order.customer_id,
                    order_id: order.id,
                    discount_amount,
                })
                .await;
        }

        // Payment is initiated, never awaited for settlement.
        let payment = Arc::clone(&self.capabilities.payment);
        let notifier = Arc::clone(&self.capabilities.notifier);
        let order_id = order.id;
        let customer_id = order.customer_id;
        let total = order.total;
        let method = input.payment_method.clone();
        tokio::spawn(async move {
            if let Err(e) = payment.charge(order_id, total, &method).await {
                error!(%order_id, error = %e, "payment initiation failed");
            }
            if let Err(e) = notifier.order_created(order_id, customer_id).await {
                warn!(%order_id, error = %e, "order notification failed");
            }
        });
    }
}

/// Generates `ORD-YYYYMMDD-XXXXXX`.
pub fn generate_order_number() -> String {
    let date = Utc::now().format("%Y%m%d");
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(6)
        .map(|c| (c as char).to_ascii_uppercase())
        .collect();
    format!("ORD-{}-{}", date, suffix)
}
