//! Order aggregate.
//!
//! Orders are financially immutable after creation; the only mutations are
//! status transitions, each validated against the state machine and appended
//! to the history table in the same transaction.

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::entities::order::{self, Entity as Order, OrderStatus};
use crate::entities::order_item::{self, Entity as OrderItem};
use crate::entities::order_status_history::{self, Entity as OrderStatusHistory};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};

/// Allowed transitions. Terminal statuses admit nothing, including
/// same-status no-ops.
pub fn transition_allowed(from: OrderStatus, to: OrderStatus) -> bool {
    use OrderStatus::*;
    match (from, to) {
        (Pending, Paid) => true,
        (Paid, Processing) => true,
        (Processing, Shipped) => true,
        (Shipped, Delivered) => true,
        (Pending | Paid | Processing, Cancelled) => true,
        (Paid | Processing | Shipped, Refunded) => true,
        (Pending, Failed) => true,
        _ => false,
    }
}

#[derive(Debug, Clone, Default)]
pub struct OrderFilter {
    pub customer_id: Option<Uuid>,
    pub status: Option<OrderStatus>,
}

#[derive(Debug, Clone)]
pub struct OrderService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
}

impl OrderService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Arc<EventSender>) -> Self {
        Self { db, event_sender }
    }

    #[instrument(skip(self))]
    pub async fn get_order(&self, order_id: Uuid) -> Result<order::Model, ServiceError> {
        Order::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))
    }

    #[instrument(skip(self))]
    pub async fn get_order_by_number(
        &self,
        order_number: &str,
    ) -> Result<order::Model, ServiceError> {
        Order::find()
            .filter(order::Column::OrderNumber.eq(order_number))
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_number)))
    }

    #[instrument(skip(self))]
    pub async fn get_order_items(
        &self,
        order_id: Uuid,
    ) -> Result<Vec<order_item::Model>, ServiceError> {
        Ok(OrderItem::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .order_by_asc(order_item::Column::CreatedAt)
            .all(&*self.db)
            .await?)
    }

    #[instrument(skip(self))]
    pub async fn list_orders(
        &self,
        filter: OrderFilter,
        page: u64,
        per_page: u64,
    ) -> Result<(Vec<order::Model>, u64), ServiceError> {
        let mut query = Order::find().order_by_desc(order::Column::CreatedAt);
        if let Some(customer_id) = filter.customer_id {
            query = query.filter(order::Column::CustomerId.eq(customer_id));
        }
        if let Some(status) = filter.status {
            query = query.filter(order::Column::Status.eq(status));
        }
        let paginator = query.paginate(&*self.db, per_page.clamp(1, 100));
        let total = paginator.num_items().await?;
        let orders = paginator.fetch_page(page.saturating_sub(1)).await?;
        Ok((orders, total))
    }

    #[instrument(skip(self))]
    pub async fn get_history(
        &self,
        order_id: Uuid,
    ) -> Result<Vec<order_status_history::Model>, ServiceError> {
        // 404 for unknown orders rather than an empty history
        self.get_order(order_id).await?;
        Ok(OrderStatusHistory::find()
            .filter(order_status_history::Column::OrderId.eq(order_id))
            .order_by_asc(order_status_history::Column::CreatedAt)
            .all(&*self.db)
            .await?)
    }

    /// Moves the order to `new_status`, appending history in the same
    /// transaction. Rejects transitions the state machine does not allow.
    #[instrument(skip(self))]
    pub async fn transition(
        &self,
        order_id: Uuid,
        new_status: OrderStatus,
        changed_by: &str,
        comment: Option<String>,
    ) -> Result<order::Model, ServiceError> {
        let txn = self.db.begin().await?;
        let (updated, old_status) =
            apply_transition(&txn, order_id, new_status, changed_by, comment).await?;
        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::OrderStatusChanged {
                order_id,
                old_status,
                new_status,
            })
            .await;

        info!(%order_id, %old_status, %new_status, changed_by, "order status changed");
        Ok(updated)
    }

    /// Cancels the order and releases its stock reservations in a single
    /// transaction: either the order is CANCELLED and the stock is back, or
    /// neither happened and the cancel can be retried. Events fire only
    /// after commit.
    #[instrument(skip(self))]
    pub async fn cancel_order(
        &self,
        order_id: Uuid,
        changed_by: &str,
        comment: Option<String>,
    ) -> Result<order::Model, ServiceError> {
        let txn = self.db.begin().await?;
        let (updated, old_status) =
            apply_transition(&txn, order_id, OrderStatus::Cancelled, changed_by, comment).await?;
        let released = super::inventory::release_for_order_on(&txn, order_id).await?;
        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::OrderStatusChanged {
                order_id,
                old_status,
                new_status: OrderStatus::Cancelled,
            })
            .await;
        for reservation in &released {
            self.event_sender
                .send_or_log(Event::InventoryReleased {
                    reservation_id: reservation.id,
                    product_id: reservation.product_id,
                    quantity: reservation.quantity,
                })
                .await;
        }

        info!(%order_id, released = released.len(), "order cancelled");
        Ok(updated)
    }
}

/// Validates and applies a status change on the caller's connection,
/// appending the history row. Returns the updated order and the status it
/// moved from.
async fn apply_transition<C: ConnectionTrait>(
    conn: &C,
    order_id: Uuid,
    new_status: OrderStatus,
    changed_by: &str,
    comment: Option<String>,
) -> Result<(order::Model, OrderStatus), ServiceError> {
    let current = Order::find_by_id(order_id)
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

    let old_status = current.status;
    if !transition_allowed(old_status, new_status) {
        return Err(ServiceError::InvalidStatus(format!(
            "Order {} cannot move from {} to {}",
            order_id, old_status, new_status
        )));
    }

    let now = Utc::now();
    let mut active: order::ActiveModel = current.into();
    active.status = Set(new_status);
    active.updated_at = Set(now);
    match new_status {
        OrderStatus::Paid => active.paid_at = Set(Some(now)),
        OrderStatus::Shipped => active.shipped_at = Set(Some(now)),
        OrderStatus::Delivered => active.delivered_at = Set(Some(now)),
        OrderStatus::Cancelled => active.cancelled_at = Set(Some(now)),
        _ => {}
    }
    let updated = active.update(conn).await?;

    append_history(conn, order_id, Some(old_status), new_status, changed_by, comment).await?;

    Ok((updated, old_status))
}

/// Appends a history row on any connection, so checkout can record the
/// creation row inside its own transaction.
pub async fn append_history<C: ConnectionTrait>(
    conn: &C,
    order_id: Uuid,
    old_status: Option<OrderStatus>,
    new_status: OrderStatus,
    changed_by: &str,
    comment: Option<String>,
) -> Result<(), ServiceError> {
    order_status_history::ActiveModel {
        id: Set(Uuid::new_v4()),
        order_id: Set(order_id),
        old_status: Set(old_status),
        new_status: Set(new_status),
        changed_by: Set(changed_by.to_string()),
        comment: Set(comment),
        created_at: Set(Utc::now()),
    }
    .insert(conn)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use OrderStatus::*;

    #[test]
    fn happy_path_transitions_are_allowed() {
        assert!(transition_allowed(Pending, Paid));
        assert!(transition_allowed(Paid, Processing));
        assert!(transition_allowed(Processing, Shipped));
        assert!(transition_allowed(Shipped, Delivered));
    }

    #[test]
    fn cancellation_only_before_shipping() {
        assert!(transition_allowed(Pending, Cancelled));
        assert!(transition_allowed(Paid, Cancelled));
        assert!(transition_allowed(Processing, Cancelled));
        assert!(!transition_allowed(Shipped, Cancelled));
        assert!(!transition_allowed(Delivered, Cancelled));
    }

    #[test]
    fn terminal_states_reject_everything() {
        for terminal in [Cancelled, Refunded, Delivered, Failed] {
            for target in [
                Pending, Paid, Processing, Shipped, Delivered, Cancelled, Refunded, Failed,
            ] {
                assert!(
                    !transition_allowed(terminal, target),
                    "{} -> {} must be rejected",
                    terminal,
                    target
                );
            }
        }
    }

    #[test]
    fn same_status_is_not_a_noop() {
        assert!(!transition_allowed(Paid, Paid));
        assert!(!transition_allowed(Pending, Pending));
    }

    #[test]
    fn skipping_states_is_rejected() {
        assert!(!transition_allowed(Pending, Shipped));
        assert!(!transition_allowed(Paid, Delivered));
        assert!(!transition_allowed(Pending, Refunded));
    }
}
