pub mod admin;
pub mod carts;
pub mod checkout;
pub mod common;
pub mod coupons;
pub mod inventory;
pub mod orders;

use std::sync::Arc;

use crate::services::carts::CartService;
use crate::services::checkout::CheckoutService;
use crate::services::coupons::CouponService;
use crate::services::federation::FederationService;
use crate::services::inventory::InventoryService;
use crate::services::orders::OrderService;

/// Service instances shared across handlers.
pub struct AppServices {
    pub carts: CartService,
    pub checkout: Arc<CheckoutService>,
    pub coupons: CouponService,
    pub federation: FederationService,
    pub inventory: InventoryService,
    pub orders: OrderService,
}
