use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::errors::ServiceError;

/// Address snapshot resolved from the identity service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Address {
    pub id: Uuid,
    pub country: String,
    pub region: Option<String>,
    pub postal_code: String,
}

/// Shipping speed selected at checkout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShippingMethod {
    Standard,
    Express,
    Overnight,
}

impl Default for ShippingMethod {
    fn default() -> Self {
        Self::Standard
    }
}

/// Outcome of initiating a charge. Settlement is confirmed asynchronously;
/// the orchestrator only records initiation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChargeResult {
    pub charge_id: Uuid,
    pub accepted: bool,
}

#[async_trait]
pub trait AddressLookup: Send + Sync {
    async fn lookup(&self, address_id: Uuid) -> Result<Address, ServiceError>;
}

#[async_trait]
pub trait TaxCalculator: Send + Sync {
    async fn tax_amount(
        &self,
        subtotal: Decimal,
        address: &Address,
    ) -> Result<Decimal, ServiceError>;
}

#[async_trait]
pub trait ShippingRateCalculator: Send + Sync {
    async fn shipping_cost(
        &self,
        item_count: u32,
        address: &Address,
        method: ShippingMethod,
    ) -> Result<Decimal, ServiceError>;
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Initiates the charge. Must not block on settlement.
    async fn charge(
        &self,
        order_id: Uuid,
        amount: Decimal,
        method: &str,
    ) -> Result<ChargeResult, ServiceError>;
}

#[async_trait]
pub trait OrderNotifier: Send + Sync {
    /// Fire-and-forget: failures are the caller's to log, never to propagate.
    async fn order_created(&self, order_id: Uuid, customer_id: Uuid) -> Result<(), ServiceError>;
}

/// Passthrough lookup for deployments where address ids are opaque snapshots.
pub struct StaticAddressLookup;

#[async_trait]
impl AddressLookup for StaticAddressLookup {
    async fn lookup(&self, address_id: Uuid) -> Result<Address, ServiceError> {
        Ok(Address {
            id: address_id,
            country: "US".to_string(),
            region: None,
            postal_code: "00000".to_string(),
        })
    }
}

/// Single-rate tax on the order subtotal.
pub struct FlatRateTaxCalculator {
    pub rate: Decimal,
}

impl Default for FlatRateTaxCalculator {
    fn default() -> Self {
        Self { rate: dec!(0.08) }
    }
}

#[async_trait]
impl TaxCalculator for FlatRateTaxCalculator {
    async fn tax_amount(
        &self,
        subtotal: Decimal,
        _address: &Address,
    ) -> Result<Decimal, ServiceError> {
        Ok((subtotal * self.rate).round_dp(2))
    }
}

/// Base rate per method plus a small per-item surcharge.
pub struct TieredShippingCalculator;

#[async_trait]
impl ShippingRateCalculator for TieredShippingCalculator {
    async fn shipping_cost(
        &self,
        item_count: u32,
        _address: &Address,
        method: ShippingMethod,
    ) -> Result<Decimal, ServiceError> {
        let base = match method {
            ShippingMethod::Standard => dec!(5.00),
            ShippingMethod::Express => dec!(15.00),
            ShippingMethod::Overnight => dec!(30.00),
        };
        let surcharge = Decimal::from(item_count.saturating_sub(1)) * dec!(0.50);
        Ok((base + surcharge).round_dp(2))
    }
}

/// Accepts every charge immediately. Stands in for the real gateway in
/// development and tests.
pub struct AutoApprovePaymentGateway;

#[async_trait]
impl PaymentGateway for AutoApprovePaymentGateway {
    async fn charge(
        &self,
        order_id: Uuid,
        amount: Decimal,
        method: &str,
    ) -> Result<ChargeResult, ServiceError> {
        info!(%order_id, %amount, method, "charge initiated");
        Ok(ChargeResult {
            charge_id: Uuid::new_v4(),
            accepted: true,
        })
    }
}

/// Notification capability that only writes a log line.
pub struct LoggingNotifier;

#[async_trait]
impl OrderNotifier for LoggingNotifier {
    async fn order_created(&self, order_id: Uuid, customer_id: Uuid) -> Result<(), ServiceError> {
        info!(%order_id, %customer_id, "order confirmation queued");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn flat_rate_tax_rounds_to_cents() {
        let calc = FlatRateTaxCalculator { rate: dec!(0.0825) };
        let addr = StaticAddressLookup.lookup(Uuid::new_v4()).await.unwrap();
        let tax = calc.tax_amount(dec!(19.99), &addr).await.unwrap();
        assert_eq!(tax, dec!(1.65));
    }

    #[tokio::test]
    async fn shipping_scales_with_item_count() {
        let calc = TieredShippingCalculator;
        let addr = StaticAddressLookup.lookup(Uuid::new_v4()).await.unwrap();
        let one = calc
            .shipping_cost(1, &addr, ShippingMethod::Standard)
            .await
            .unwrap();
        let three = calc
            .shipping_cost(3, &addr, ShippingMethod::Standard)
            .await
            .unwrap();
        assert_eq!(one, dec!(5.00));
        assert_eq!(three, dec!(6.00));
    }
}
