//! Cart aggregate.
//!
//! One cart per customer, created lazily on the first add. Re-adding the
//! same (product, variant) pair increments the existing line instead of
//! duplicating it; the unit price pinned at first add is kept.

use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;
use validator::Validate;

use crate::entities::cart::{self, Entity as Cart};
use crate::entities::cart_item::{self, Entity as CartItem};
use crate::entities::product::Entity as Product;
use crate::entities::product_variant::Entity as ProductVariant;
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct AddItemInput {
    pub product_id: Uuid,
    #[serde(default)]
    pub variant_id: Option<Uuid>,
    #[validate(range(min = 1, max = 1000))]
    pub quantity: i32,
    /// Price override for admin flows; customer traffic omits it and the
    /// catalog price is captured.
    #[serde(default)]
    pub unit_price: Option<Decimal>,
}

/// Cart view returned by the API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CartView {
    pub customer_id: Uuid,
    pub items: Vec<cart_item::Model>,
    pub subtotal: Decimal,
    pub item_count: i32,
}

#[derive(Debug, Clone)]
pub struct CartService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
}

impl CartService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Arc<EventSender>) -> Self {
        Self { db, event_sender }
    }

    #[instrument(skip(self, input))]
    pub async fn add_item(
        &self,
        customer_id: Uuid,
        input: AddItemInput,
    ) -> Result<cart_item::Model, ServiceError> {
        input.validate()?;

        let unit_price = match input.unit_price {
            Some(price) if price > Decimal::ZERO => price,
            Some(_) => {
                return Err(ServiceError::InvalidInput(
                    "unit_price must be positive".to_string(),
                ))
            }
            None => self.catalog_price(input.product_id, input.variant_id).await?,
        };

        self.ensure_cart(customer_id).await?;

        // Try the increment first. SQL NULLs never match each other, so a
        // missing variant needs an explicit IS NULL filter rather than the
        // unique-index upsert.
        let variant_filter = match input.variant_id {
            Some(vid) => Condition::all().add(cart_item::Column::VariantId.eq(vid)),
            None => Condition::all().add(cart_item::Column::VariantId.is_null()),
        };
        let updated = CartItem::update_many()
            .col_expr(
                cart_item::Column::Quantity,
                Expr::col(cart_item::Column::Quantity).add(input.quantity),
            )
            .col_expr(cart_item::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(cart_item::Column::CartId.eq(customer_id))
            .filter(cart_item::Column::ProductId.eq(input.product_id))
            .filter(variant_filter.clone())
            .exec(&*self.db)
            .await?;

        let item = if updated.rows_affected > 0 {
            CartItem::find()
                .filter(cart_item::Column::CartId.eq(customer_id))
                .filter(cart_item::Column::ProductId.eq(input.product_id))
                .filter(variant_filter)
                .one(&*self.db)
                .await?
                .ok_or_else(|| {
                    ServiceError::InternalError("cart item vanished after update".to_string())
                })?
        } else {
            let now = Utc::now();
            // The unique index still arbitrates the non-null-variant race;
            // losing it folds into an increment.
            let insert = CartItem::insert(cart_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                cart_id: Set(customer_id),
                product_id: Set(input.product_id),
                variant_id: Set(input.variant_id),
                quantity: Set(input.quantity),
                unit_price: Set(unit_price),
                created_at: Set(now),
                updated_at: Set(now),
            })
            .on_conflict(
                OnConflict::columns([
                    cart_item::Column::CartId,
                    cart_item::Column::ProductId,
                    cart_item::Column::VariantId,
                ])
                .value(
                    cart_item::Column::Quantity,
                    Expr::col(cart_item::Column::Quantity).add(input.quantity),
                )
                .value(cart_item::Column::UpdatedAt, Expr::value(now))
                .to_owned(),
            )
            .exec(&*self.db)
            .await?;

            CartItem::find_by_id(insert.last_insert_id)
                .one(&*self.db)
                .await?
                .ok_or_else(|| {
                    ServiceError::InternalError("cart item vanished after insert".to_string())
                })?
        };

        self.event_sender
            .send_or_log(Event::CartItemAdded {
                customer_id,
                product_id: input.product_id,
                quantity: input.quantity,
            })
            .await;

        info!(%customer_id, product_id = %input.product_id, quantity = input.quantity, "cart item added");
        Ok(item)
    }

    /// Sets the line quantity; zero or less removes the line.
    #[instrument(skip(self))]
    pub async fn update_item_quantity(
        &self,
        customer_id: Uuid,
        item_id: Uuid,
        quantity: i32,
    ) -> Result<Option<cart_item::Model>, ServiceError> {
        let item = self.find_item(customer_id, item_id).await?;

        if quantity <= 0 {
            CartItem::delete_by_id(item.id).exec(&*self.db).await?;
            return Ok(None);
        }

        let mut active: cart_item::ActiveModel = item.into();
        active.quantity = Set(quantity);
        active.updated_at = Set(Utc::now());
        Ok(Some(active.update(&*self.db).await?))
    }

    #[instrument(skip(self))]
    pub async fn remove_item(&self, customer_id: Uuid, item_id: Uuid) -> Result<(), ServiceError> {
        let item = self.find_item(customer_id, item_id).await?;
        CartItem::delete_by_id(item.id).exec(&*self.db).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn get_cart(&self, customer_id: Uuid) -> Result<CartView, ServiceError> {
        let items = CartItem::find()
            .filter(cart_item::Column::CartId.eq(customer_id))
            .order_by_asc(cart_item::Column::CreatedAt)
            .all(&*self.db)
            .await?;
        Ok(view(customer_id, items))
    }

    /// Removes every item but keeps the cart row.
    #[instrument(skip(self))]
    pub async fn clear(&self, customer_id: Uuid) -> Result<u64, ServiceError> {
        let result = CartItem::delete_many()
            .filter(cart_item::Column::CartId.eq(customer_id))
            .exec(&*self.db)
            .await?;
        Ok(result.rows_affected)
    }

    async fn ensure_cart(&self, customer_id: Uuid) -> Result<(), ServiceError> {
        let now = Utc::now();
        Cart::insert(cart::ActiveModel {
            customer_id: Set(customer_id),
            created_at: Set(now),
            updated_at: Set(now),
        })
        .on_conflict(
            OnConflict::column(cart::Column::CustomerId)
                .do_nothing()
                .to_owned(),
        )
        .do_nothing()
        .exec(&*self.db)
        .await?;
        Ok(())
    }

    async fn find_item(
        &self,
        customer_id: Uuid,
        item_id: Uuid,
    ) -> Result<cart_item::Model, ServiceError> {
        CartItem::find_by_id(item_id)
            .filter(cart_item::Column::CartId.eq(customer_id))
            .one(&*self.db)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!(
                    "Cart item {} not found for customer {}",
                    item_id, customer_id
                ))
            })
    }

    async fn catalog_price(
        &self,
        product_id: Uuid,
        variant_id: Option<Uuid>,
    ) -> Result<Decimal, ServiceError> {
        if let Some(vid) = variant_id {
            let variant = ProductVariant::find_by_id(vid)
                .one(&*self.db)
                .await?
                .ok_or_else(|| ServiceError::NotFound(format!("Variant {} not found", vid)))?;
            if variant.product_id != product_id {
                return Err(ServiceError::InvalidInput(format!(
                    "Variant {} does not belong to product {}",
                    vid, product_id
                )));
            }
            return Ok(variant.price);
        }
        let product = Product::find_by_id(product_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", product_id)))?;
        Ok(product.price)
    }
}

fn view(customer_id: Uuid, items: Vec<cart_item::Model>) -> CartView {
    let subtotal = items
        .iter()
        .map(|i| i.unit_price * Decimal::from(i.quantity))
        .sum();
    let item_count = items.iter().map(|i| i.quantity).sum();
    CartView {
        customer_id,
        items,
        subtotal,
        item_count,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn item(quantity: i32, unit_price: Decimal) -> cart_item::Model {
        let now = Utc::now();
        cart_item::Model {
            id: Uuid::new_v4(),
            cart_id: Uuid::new_v4(),
            product_id: Uuid::new_v4(),
            variant_id: None,
            quantity,
            unit_price,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn view_sums_lines() {
        let customer = Uuid::new_v4();
        let v = view(customer, vec![item(2, dec!(50.00)), item(1, dec!(30.00))]);
        assert_eq!(v.subtotal, dec!(130.00));
        assert_eq!(v.item_count, 3);
    }

    #[test]
    fn empty_cart_has_zero_subtotal() {
        let v = view(Uuid::new_v4(), vec![]);
        assert_eq!(v.subtotal, Decimal::ZERO);
        assert_eq!(v.item_count, 0);
    }
}
