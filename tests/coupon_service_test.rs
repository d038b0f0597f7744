mod common;

use assert_matches::assert_matches;
use axum::http::{Method, StatusCode};
use chrono::{Duration, Utc};
use rust_decimal_macros::dec;
use sea_orm::EntityTrait;
use uuid::Uuid;

use common::{checkout_payload, TestApp};
use marketplace_api::entities::coupon::DiscountType;
use marketplace_api::services::coupons::CouponRejection;

#[tokio::test]
async fn validation_reports_typed_rejections() {
    let app = TestApp::new().await;
    let customer = Uuid::new_v4();

    let unknown = app
        .state
        .services
        .coupons
        .validate("NOSUCH", customer, dec!(100))
        .await
        .unwrap();
    assert_matches!(unknown, Err(CouponRejection::UnknownCode { .. }));

    app.seed_coupon_full(
        "EXPIRED",
        DiscountType::Percentage,
        dec!(10),
        None,
        100,
        None,
        Some(Utc::now() - Duration::hours(1)),
    )
    .await;
    let expired = app
        .state
        .services
        .coupons
        .validate("EXPIRED", customer, dec!(100))
        .await
        .unwrap();
    assert_matches!(expired, Err(CouponRejection::Expired { .. }));

    app.seed_coupon_full(
        "MIN50",
        DiscountType::Percentage,
        dec!(10),
        None,
        100,
        Some(dec!(50.00)),
        None,
    )
    .await;
    let below_min = app
        .state
        .services
        .coupons
        .validate("MIN50", customer, dec!(20.00))
        .await
        .unwrap();
    assert_matches!(
        below_min,
        Err(CouponRejection::MinOrderNotMet { minimum, subtotal, .. })
            if minimum == dec!(50.00) && subtotal == dec!(20.00)
    );
}

#[tokio::test]
async fn coupon_codes_match_case_insensitively() {
    let app = TestApp::new().await;
    app.seed_coupon("SAVE10", DiscountType::Percentage, dec!(10), None)
        .await;

    let result = app
        .state
        .services
        .coupons
        .validate("save10", Uuid::new_v4(), dec!(100))
        .await
        .unwrap();
    let (coupon, discount) = result.expect("lowercase code resolves");
    assert_eq!(coupon.code, "SAVE10");
    assert_eq!(discount, dec!(10.00));
}

#[tokio::test]
async fn shared_budget_is_never_exceeded() {
    let app = TestApp::new().await;
    let product = app.seed_product(dec!(30.00), 100).await;
    app.seed_coupon("LIMIT2", DiscountType::Percentage, dec!(10), Some(2))
        .await;

    // Three customers race the two remaining uses.
    let mut statuses = Vec::new();
    for _ in 0..3 {
        let customer = Uuid::new_v4();
        app.add_to_cart(customer, product.id, 1).await;
        let (status, _) = app
            .request(
                Method::POST,
                "/api/v1/checkout/",
                Some(checkout_payload(customer, Some("LIMIT2"))),
            )
            .await;
        statuses.push(status);
    }

    let redeemed = statuses
        .iter()
        .filter(|s| **s == StatusCode::CREATED)
        .count();
    assert_eq!(redeemed, 2, "max_uses caps total redemptions");
    assert_eq!(
        statuses
            .iter()
            .filter(|s| **s == StatusCode::UNPROCESSABLE_ENTITY)
            .count(),
        1
    );
}

#[tokio::test]
async fn per_customer_limit_is_enforced() {
    let app = TestApp::new().await;
    let customer = Uuid::new_v4();
    let product = app.seed_product(dec!(30.00), 100).await;
    app.seed_coupon_full(
        "ONCE",
        DiscountType::Percentage,
        dec!(10),
        None,
        1,
        None,
        None,
    )
    .await;

    app.add_to_cart(customer, product.id, 1).await;
    let (first, _) = app
        .request(
            Method::POST,
            "/api/v1/checkout/",
            Some(checkout_payload(customer, Some("ONCE"))),
        )
        .await;
    assert_eq!(first, StatusCode::CREATED);

    app.add_to_cart(customer, product.id, 1).await;
    let (second, body) = app
        .request(
            Method::POST,
            "/api/v1/checkout/",
            Some(checkout_payload(customer, Some("ONCE"))),
        )
        .await;
    assert_eq!(second, StatusCode::UNPROCESSABLE_ENTITY, "body: {}", body);

    // A different customer can still redeem.
    let other = Uuid::new_v4();
    app.add_to_cart(other, product.id, 1).await;
    let (third, _) = app
        .request(
            Method::POST,
            "/api/v1/checkout/",
            Some(checkout_payload(other, Some("ONCE"))),
        )
        .await;
    assert_eq!(third, StatusCode::CREATED);
}

#[tokio::test]
async fn validate_endpoint_reports_discount_without_redeeming() {
    let app = TestApp::new().await;
    let seeded = app
        .seed_coupon("DRYRUN", DiscountType::FixedAmount, dec!(5.00), Some(10))
        .await;

    let (status, body) = app
        .request(
            Method::POST,
            "/api/v1/coupons/validate",
            Some(serde_json::json!({
                "code": "DRYRUN",
                "customer_id": Uuid::new_v4(),
                "subtotal": "40.00",
            })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["valid"], true);
    assert_eq!(body["discount_amount"], "5.00");

    let refreshed = marketplace_api::entities::coupon::Entity::find_by_id(seeded.id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(refreshed.current_uses, 0, "dry run must not redeem");
}
