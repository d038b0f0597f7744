//! Property test for the pricing arithmetic: however the line items and
//! discount fall out, the persisted total must equal
//! subtotal + tax + shipping - discount and stay positive.

mod common;

use axum::http::{Method, StatusCode};
use proptest::prelude::*;
use rust_decimal::Decimal;
use std::str::FromStr;
use uuid::Uuid;

use common::{checkout_payload, TestApp};
use marketplace_api::entities::coupon::DiscountType;

fn dec_field(value: &serde_json::Value) -> Decimal {
    Decimal::from_str(value.as_str().expect("decimal as string")).expect("parse decimal")
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn totals_always_add_up(
        price_cents in 100i64..50_000,
        quantity in 1i32..5,
        percent in 1i64..50,
        use_coupon in any::<bool>(),
    ) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        rt.block_on(async move {
            let app = TestApp::new().await;
            let customer = Uuid::new_v4();
            let price = Decimal::new(price_cents, 2);
            let product = app.seed_product(price, 1000).await;
            app.add_to_cart(customer, product.id, quantity).await;

            let coupon_code = if use_coupon {
                app.seed_coupon("PROP", DiscountType::Percentage, Decimal::from(percent), None)
                    .await;
                Some("PROP")
            } else {
                None
            };

            let (status, body) = app
                .request(
                    Method::POST,
                    "/api/v1/checkout/",
                    Some(checkout_payload(customer, coupon_code)),
                )
                .await;
            prop_assert_eq!(status, StatusCode::CREATED);

            let order = &body["order"];
            let subtotal = dec_field(&order["subtotal"]);
            let tax = dec_field(&order["tax_amount"]);
            let shipping = dec_field(&order["shipping_cost"]);
            let discount = dec_field(&order["discount_amount"]);
            let total = dec_field(&order["total"]);

            prop_assert_eq!(subtotal, price * Decimal::from(quantity));
            prop_assert_eq!(total, subtotal + tax + shipping - discount);
            prop_assert!(total > Decimal::ZERO);
            Ok(())
        })?;
    }
}
