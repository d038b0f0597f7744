pub mod carts;
pub mod checkout;
pub mod coupons;
pub mod federation;
pub mod inventory;
pub mod orders;
