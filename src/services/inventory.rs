//! Inventory ledger.
//!
//! Reservation decrements stock with a guarded single-statement update so
//! concurrent checkouts can never oversell. Release flips the reservation
//! row to `released` first, so restocking happens at most once no matter how
//! many times release is called.

use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use sea_orm::sea_query::Expr;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use crate::entities::product::{self, Entity as Product};
use crate::entities::product_variant::{self, Entity as ProductVariant};
use crate::entities::stock_reservation::{self, Entity as StockReservation, ReservationStatus};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::metrics;

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateProductInput {
    pub vendor_id: Uuid,
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    #[validate(length(min = 1, max = 100))]
    pub sku: String,
    pub price: Decimal,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default)]
    pub commission_rate: Decimal,
    #[validate(range(min = 0))]
    pub stock_quantity: i32,
    #[serde(default = "default_low_stock_threshold")]
    pub low_stock_threshold: i32,
    #[serde(default = "default_true")]
    pub track_inventory: bool,
    #[serde(default)]
    pub allow_backorders: bool,
}

fn default_currency() -> String {
    "USD".to_string()
}

fn default_low_stock_threshold() -> i32 {
    5
}

fn default_true() -> bool {
    true
}

/// Stock summary for API responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockLevel {
    pub product_id: Uuid,
    pub sku: String,
    pub stock_quantity: i32,
    pub low_stock_threshold: i32,
    pub track_inventory: bool,
    pub allow_backorders: bool,
    pub is_low: bool,
}

impl From<product::Model> for StockLevel {
    fn from(model: product::Model) -> Self {
        let is_low = model.track_inventory && model.stock_quantity <= model.low_stock_threshold;
        Self {
            product_id: model.id,
            sku: model.sku,
            stock_quantity: model.stock_quantity,
            low_stock_threshold: model.low_stock_threshold,
            track_inventory: model.track_inventory,
            allow_backorders: model.allow_backorders,
            is_low,
        }
    }
}

#[derive(Debug, Clone)]
pub struct InventoryService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
}

impl InventoryService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Arc<EventSender>) -> Self {
        Self { db, event_sender }
    }

    #[instrument(skip(self, input))]
    pub async fn create_product(
        &self,
        input: CreateProductInput,
    ) -> Result<product::Model, ServiceError> {
        input.validate()?;
        if input.price <= Decimal::ZERO {
            return Err(ServiceError::InvalidInput(
                "price must be positive".to_string(),
            ));
        }

        let now = Utc::now();
        let model = product::ActiveModel {
            id: Set(Uuid::new_v4()),
            vendor_id: Set(input.vendor_id),
            name: Set(input.name),
            sku: Set(input.sku),
            price: Set(input.price),
            currency: Set(input.currency),
            commission_rate: Set(input.commission_rate),
            stock_quantity: Set(input.stock_quantity),
            low_stock_threshold: Set(input.low_stock_threshold),
            track_inventory: Set(input.track_inventory),
            allow_backorders: Set(input.allow_backorders),
            is_active: Set(true),
            created_at: Set(now),
            updated_at: Set(now),
        };
        let created = model.insert(&*self.db).await?;
        info!(product_id = %created.id, sku = %created.sku, "product created");
        Ok(created)
    }

    #[instrument(skip(self))]
    pub async fn get_stock(&self, product_id: Uuid) -> Result<StockLevel, ServiceError> {
        let product = Product::find_by_id(product_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", product_id)))?;
        Ok(product.into())
    }

    #[instrument(skip(self))]
    pub async fn list_stock(
        &self,
        page: u64,
        per_page: u64,
    ) -> Result<(Vec<StockLevel>, u64), ServiceError> {
        let paginator = Product::find()
            .order_by_asc(product::Column::Sku)
            .paginate(&*self.db, per_page.clamp(1, 100));
        let total = paginator.num_items().await?;
        let products = paginator.fetch_page(page.saturating_sub(1)).await?;
        Ok((products.into_iter().map(Into::into).collect(), total))
    }

    /// Reserves stock outside of a checkout (direct API surface). Decrement
    /// and reservation row commit together or not at all.
    #[instrument(skip(self))]
    pub async fn reserve(
        &self,
        product_id: Uuid,
        variant_id: Option<Uuid>,
        quantity: i32,
        order_id: Option<Uuid>,
    ) -> Result<stock_reservation::Model, ServiceError> {
        let txn = self.db.begin().await?;
        let reservation = reserve_on(&txn, product_id, variant_id, quantity, order_id).await?;
        txn.commit().await?;
        self.event_sender
            .send_or_log(Event::InventoryReserved {
                reservation_id: reservation.id,
                product_id,
                variant_id,
                quantity,
            })
            .await;
        self.emit_low_stock_if_needed(product_id).await;
        Ok(reservation)
    }

    /// Idempotent release of a single reservation. The status flip and the
    /// restock commit together; a failed restock leaves the reservation
    /// active so a retry can release it.
    #[instrument(skip(self))]
    pub async fn release(&self, reservation_id: Uuid) -> Result<bool, ServiceError> {
        let txn = self.db.begin().await?;
        let reservation = StockReservation::find_by_id(reservation_id)
            .one(&txn)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Reservation {} not found", reservation_id))
            })?;
        let released = release_on(&txn, &reservation).await?;
        txn.commit().await?;

        if released {
            self.event_sender
                .send_or_log(Event::InventoryReleased {
                    reservation_id: reservation.id,
                    product_id: reservation.product_id,
                    quantity: reservation.quantity,
                })
                .await;
        }
        Ok(released)
    }

    async fn emit_low_stock_if_needed(&self, product_id: Uuid) {
        if let Ok(Some(product)) = Product::find_by_id(product_id).one(&*self.db).await {
            if product.track_inventory && product.stock_quantity <= product.low_stock_threshold {
                self.event_sender
                    .send_or_log(Event::LowStockWarning {
                        product_id,
                        remaining: product.stock_quantity,
                        threshold: product.low_stock_threshold,
                    })
                    .await;
            }
        }
    }
}

/// Reserves stock on any connection, so checkout can run it inside its own
/// transaction.
///
/// The decrement is a single guarded statement: zero rows affected means a
/// concurrent reservation took the remaining stock.
pub async fn reserve_on<C: ConnectionTrait>(
    conn: &C,
    product_id: Uuid,
    variant_id: Option<Uuid>,
    quantity: i32,
    order_id: Option<Uuid>,
) -> Result<stock_reservation::Model, ServiceError> {
    if quantity <= 0 {
        return Err(ServiceError::InvalidInput(
            "reservation quantity must be positive".to_string(),
        ));
    }

    let product = Product::find_by_id(product_id)
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", product_id)))?;

    if !product.is_active {
        metrics::INVENTORY_RESERVATION_FAILURES
            .with_label_values(&["inactive_product"])
            .inc();
        return Err(ServiceError::InvalidOperation(format!(
            "Product {} is not active",
            product_id
        )));
    }

    if product.track_inventory {
        let decremented = match variant_id {
            Some(vid) => decrement_variant(conn, vid, product_id, quantity, &product).await?,
            None => decrement_product(conn, &product, quantity).await?,
        };
        if !decremented {
            metrics::INVENTORY_RESERVATION_FAILURES
                .with_label_values(&["insufficient_stock"])
                .inc();
            let available = available_quantity(conn, product_id, variant_id).await?;
            warn!(
                %product_id,
                ?variant_id,
                requested = quantity,
                available,
                "reservation rejected"
            );
            return Err(ServiceError::InsufficientStock(format!(
                "Product {}: requested {}, available {}",
                product_id, quantity, available
            )));
        }
    }

    let now = Utc::now();
    let reservation = stock_reservation::ActiveModel {
        id: Set(Uuid::new_v4()),
        product_id: Set(product_id),
        variant_id: Set(variant_id),
        quantity: Set(quantity),
        order_id: Set(order_id),
        status: Set(ReservationStatus::Active),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(conn)
    .await?;

    metrics::INVENTORY_RESERVATIONS.inc();
    info!(reservation_id = %reservation.id, %product_id, quantity, "stock reserved");
    Ok(reservation)
}

async fn decrement_product<C: ConnectionTrait>(
    conn: &C,
    product: &product::Model,
    quantity: i32,
) -> Result<bool, ServiceError> {
    let mut update = Product::update_many()
        .col_expr(
            product::Column::StockQuantity,
            Expr::col(product::Column::StockQuantity).sub(quantity),
        )
        .col_expr(product::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(product::Column::Id.eq(product.id));
    if !product.allow_backorders {
        update = update.filter(product::Column::StockQuantity.gte(quantity));
    }
    let result = update.exec(conn).await?;
    Ok(result.rows_affected == 1)
}

async fn decrement_variant<C: ConnectionTrait>(
    conn: &C,
    variant_id: Uuid,
    product_id: Uuid,
    quantity: i32,
    product: &product::Model,
) -> Result<bool, ServiceError> {
    let variant = ProductVariant::find_by_id(variant_id)
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Variant {} not found", variant_id)))?;
    if variant.product_id != product_id {
        return Err(ServiceError::InvalidInput(format!(
            "Variant {} does not belong to product {}",
            variant_id, product_id
        )));
    }
    if !variant.is_active {
        return Err(ServiceError::InvalidOperation(format!(
            "Variant {} is not active",
            variant_id
        )));
    }

    let mut update = ProductVariant::update_many()
        .col_expr(
            product_variant::Column::StockQuantity,
            Expr::col(product_variant::Column::StockQuantity).sub(quantity),
        )
        .col_expr(product_variant::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(product_variant::Column::Id.eq(variant_id));
    if !product.allow_backorders {
        update = update.filter(product_variant::Column::StockQuantity.gte(quantity));
    }
    let result = update.exec(conn).await?;
    Ok(result.rows_affected == 1)
}

/// Current sellable quantity, for error messages.
pub async fn available_quantity<C: ConnectionTrait>(
    conn: &C,
    product_id: Uuid,
    variant_id: Option<Uuid>,
) -> Result<i32, ServiceError> {
    match variant_id {
        Some(vid) => Ok(ProductVariant::find_by_id(vid)
            .one(conn)
            .await?
            .map(|v| v.stock_quantity)
            .unwrap_or(0)),
        None => Ok(Product::find_by_id(product_id)
            .one(conn)
            .await?
            .map(|p| p.stock_quantity)
            .unwrap_or(0)),
    }
}

/// Flips the reservation to released and restocks. Returns false when the
/// reservation was already released (no double restock).
pub async fn release_on<C: ConnectionTrait>(
    conn: &C,
    reservation: &stock_reservation::Model,
) -> Result<bool, ServiceError> {
    let flipped = StockReservation::update_many()
        .col_expr(
            stock_reservation::Column::Status,
            Expr::value(ReservationStatus::Released),
        )
        .col_expr(stock_reservation::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(stock_reservation::Column::Id.eq(reservation.id))
        .filter(stock_reservation::Column::Status.eq(ReservationStatus::Active))
        .exec(conn)
        .await?;

    if flipped.rows_affected == 0 {
        return Ok(false);
    }

    let product = Product::find_by_id(reservation.product_id)
        .one(conn)
        .await?
        .ok_or_else(|| {
            ServiceError::NotFound(format!("Product {} not found", reservation.product_id))
        })?;

    if product.track_inventory {
        match reservation.variant_id {
            Some(vid) => {
                ProductVariant::update_many()
                    .col_expr(
                        product_variant::Column::StockQuantity,
                        Expr::col(product_variant::Column::StockQuantity)
                            .add(reservation.quantity),
                    )
                    .col_expr(product_variant::Column::UpdatedAt, Expr::value(Utc::now()))
                    .filter(product_variant::Column::Id.eq(vid))
                    .exec(conn)
                    .await?;
            }
            None => {
                Product::update_many()
                    .col_expr(
                        product::Column::StockQuantity,
                        Expr::col(product::Column::StockQuantity).add(reservation.quantity),
                    )
                    .col_expr(product::Column::UpdatedAt, Expr::value(Utc::now()))
                    .filter(product::Column::Id.eq(reservation.product_id))
                    .exec(conn)
                    .await?;
            }
        }
    }

    metrics::INVENTORY_RELEASES.inc();
    info!(reservation_id = %reservation.id, "reservation released");
    Ok(true)
}

/// Releases every active reservation held by an order, on the caller's
/// connection. Cancellation runs this inside the same transaction as the
/// status change so a crash can never strand released stock. Returns the
/// reservations actually released.
pub async fn release_for_order_on<C: ConnectionTrait>(
    conn: &C,
    order_id: Uuid,
) -> Result<Vec<stock_reservation::Model>, ServiceError> {
    let reservations = StockReservation::find()
        .filter(stock_reservation::Column::OrderId.eq(order_id))
        .filter(stock_reservation::Column::Status.eq(ReservationStatus::Active))
        .all(conn)
        .await?;

    let mut released = Vec::with_capacity(reservations.len());
    for reservation in reservations {
        if release_on(conn, &reservation).await? {
            released.push(reservation);
        }
    }
    Ok(released)
}
