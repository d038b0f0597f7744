use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::entities::order::OrderStatus;

/// Events emitted after a transaction commits.
///
/// Emission is strictly post-commit: nothing may send an event for work that
/// could still roll back. Delivery is best-effort; a full or closed channel
/// is logged and the request still succeeds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    // Order events
    OrderCreated {
        order_id: Uuid,
        order_number: String,
        customer_id: Uuid,
        total: Decimal,
    },
    CheckoutCompleted {
        order_id: Uuid,
        customer_id: Uuid,
        item_count: usize,
    },
    OrderStatusChanged {
        order_id: Uuid,
        old_status: OrderStatus,
        new_status: OrderStatus,
    },

    // Cart events
    CartItemAdded {
        customer_id: Uuid,
        product_id: Uuid,
        quantity: i32,
    },

    // Inventory events
    InventoryReserved {
        reservation_id: Uuid,
        product_id: Uuid,
        variant_id: Option<Uuid>,
        quantity: i32,
    },
    InventoryReleased {
        reservation_id: Uuid,
        product_id: Uuid,
        quantity: i32,
    },
    LowStockWarning {
        product_id: Uuid,
        remaining: i32,
        threshold: i32,
    },

    // Coupon events
    CouponRedeemed {
        coupon_id: Uuid,
        code: String,
        customer_id: Uuid,
        order_id: Uuid,
        discount_amount: Decimal,
    },
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Sends an event, logging instead of failing when the consumer is gone.
    /// Used on post-commit paths where the request must not error.
    pub async fn send_or_log(&self, event: Event) {
        if let Err(e) = self.send(event).await {
            warn!("Dropping event: {}", e);
        }
    }
}

/// Consumes events from the channel until every sender is dropped.
///
/// Spawned once at startup; handlers here are side-effect-only and must not
/// touch the transactional tables.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match event {
            Event::OrderCreated {
                order_id,
                ref order_number,
                customer_id,
                total,
            } => {
                info!(
                    %order_id,
                    %order_number,
                    %customer_id,
                    %total,
                    "order created"
                );
            }
            Event::CheckoutCompleted {
                order_id,
                customer_id,
                item_count,
            } => {
                info!(%order_id, %customer_id, item_count, "checkout completed");
            }
            Event::OrderStatusChanged {
                order_id,
                old_status,
                new_status,
            } => {
                info!(%order_id, %old_status, %new_status, "order status changed");
            }
            Event::CartItemAdded {
                customer_id,
                product_id,
                quantity,
            } => {
                info!(%customer_id, %product_id, quantity, "cart item added");
            }
            Event::InventoryReserved {
                reservation_id,
                product_id,
                variant_id,
                quantity,
            } => {
                info!(
                    %reservation_id,
                    %product_id,
                    ?variant_id,
                    quantity,
                    "inventory reserved"
                );
            }
            Event::InventoryReleased {
                reservation_id,
                product_id,
                quantity,
            } => {
                info!(%reservation_id, %product_id, quantity, "inventory released");
            }
            Event::LowStockWarning {
                product_id,
                remaining,
                threshold,
            } => {
                warn!(%product_id, remaining, threshold, "stock below threshold");
            }
            Event::CouponRedeemed {
                coupon_id,
                ref code,
                customer_id,
                order_id,
                discount_amount,
            } => {
                info!(
                    %coupon_id,
                    %code,
                    %customer_id,
                    %order_id,
                    %discount_amount,
                    "coupon redeemed"
                );
            }
        }
    }

    error!("Event channel closed, stopping event processing loop");
}
