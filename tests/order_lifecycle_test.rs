mod common;

use axum::http::{Method, StatusCode};
use rust_decimal_macros::dec;
use sea_orm::{ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter};
use uuid::Uuid;

use common::{checkout_payload, TestApp};
use marketplace_api::entities::order::OrderStatus;
use marketplace_api::entities::stock_reservation::{self, ReservationStatus};

async fn checkout_order(app: &TestApp) -> (Uuid, Uuid) {
    let customer = Uuid::new_v4();
    let product = app.seed_product(dec!(20.00), 100).await;
    app.add_to_cart(customer, product.id, 1).await;
    let (status, body) = app
        .request(
            Method::POST,
            "/api/v1/checkout/",
            Some(checkout_payload(customer, None)),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let order_id = body["order"]["id"].as_str().unwrap().parse().unwrap();
    (order_id, product.id)
}

#[tokio::test]
async fn full_lifecycle_to_delivery() {
    let app = TestApp::new().await;
    let (order_id, _) = checkout_order(&app).await;

    for status in ["PAID", "PROCESSING", "SHIPPED", "DELIVERED"] {
        let (code, body) = app
            .request(
                Method::PUT,
                &format!("/api/v1/orders/{}/status", order_id),
                Some(serde_json::json!({ "status": status, "changed_by": "admin" })),
            )
            .await;
        assert_eq!(code, StatusCode::OK, "transition to {}: {}", status, body);
        assert_eq!(body["status"], status);
    }

    // Creation plus four transitions.
    let (_, history) = app
        .request(
            Method::GET,
            &format!("/api/v1/orders/{}/history", order_id),
            None,
        )
        .await;
    let rows = history.as_array().unwrap();
    assert_eq!(rows.len(), 5);
    assert!(rows[0]["old_status"].is_null());
    assert_eq!(rows[0]["new_status"], "PENDING");
    assert_eq!(rows[4]["new_status"], "DELIVERED");
    assert_eq!(rows[1]["changed_by"], "admin");

    // Delivered is terminal.
    let (code, _) = app
        .request(
            Method::PUT,
            &format!("/api/v1/orders/{}/status", order_id),
            Some(serde_json::json!({ "status": "CANCELLED" })),
        )
        .await;
    assert_eq!(code, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn illegal_jumps_are_rejected() {
    let app = TestApp::new().await;
    let (order_id, _) = checkout_order(&app).await;

    for status in ["SHIPPED", "DELIVERED", "REFUNDED"] {
        let (code, _) = app
            .request(
                Method::PUT,
                &format!("/api/v1/orders/{}/status", order_id),
                Some(serde_json::json!({ "status": status })),
            )
            .await;
        assert_eq!(code, StatusCode::UNPROCESSABLE_ENTITY, "PENDING -> {}", status);
    }
}

#[tokio::test]
async fn cancelling_restocks_the_reserved_units() {
    let app = TestApp::new().await;
    let (order_id, product_id) = checkout_order(&app).await;

    assert_eq!(
        app.state
            .services
            .inventory
            .get_stock(product_id)
            .await
            .unwrap()
            .stock_quantity,
        99
    );

    let (code, body) = app
        .request(
            Method::POST,
            &format!("/api/v1/orders/{}/cancel", order_id),
            Some(serde_json::json!({ "comment": "changed my mind" })),
        )
        .await;
    assert_eq!(code, StatusCode::OK);
    assert_eq!(body["status"], "CANCELLED");

    assert_eq!(
        app.state
            .services
            .inventory
            .get_stock(product_id)
            .await
            .unwrap()
            .stock_quantity,
        100,
        "cancellation returns the stock"
    );
    let active = stock_reservation::Entity::find()
        .filter(stock_reservation::Column::OrderId.eq(order_id))
        .filter(stock_reservation::Column::Status.eq(ReservationStatus::Active))
        .count(&*app.state.db)
        .await
        .unwrap();
    assert_eq!(active, 0, "no active reservation survives the cancel");

    // A second cancel fails the state check and must not restock again.
    let (code, _) = app
        .request(
            Method::POST,
            &format!("/api/v1/orders/{}/cancel", order_id),
            None,
        )
        .await;
    assert_eq!(code, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(
        app.state
            .services
            .inventory
            .get_stock(product_id)
            .await
            .unwrap()
            .stock_quantity,
        100
    );
}

#[tokio::test]
async fn orders_are_queryable_by_id_number_and_filters() {
    let app = TestApp::new().await;
    let customer = Uuid::new_v4();
    let product = app.seed_product(dec!(20.00), 100).await;
    app.add_to_cart(customer, product.id, 1).await;
    let (_, body) = app
        .request(
            Method::POST,
            "/api/v1/checkout/",
            Some(checkout_payload(customer, None)),
        )
        .await;
    let order_id = body["order"]["id"].as_str().unwrap();
    let order_number = body["order"]["order_number"].as_str().unwrap();

    let (code, by_id) = app
        .request(Method::GET, &format!("/api/v1/orders/{}", order_id), None)
        .await;
    assert_eq!(code, StatusCode::OK);
    assert_eq!(by_id["order"]["order_number"], order_number);
    assert_eq!(by_id["items"].as_array().unwrap().len(), 1);

    let (code, by_number) = app
        .request(
            Method::GET,
            &format!("/api/v1/orders/by-number/{}", order_number),
            None,
        )
        .await;
    assert_eq!(code, StatusCode::OK);
    assert_eq!(by_number["id"].as_str().unwrap(), order_id);

    let (code, listed) = app
        .request(
            Method::GET,
            &format!("/api/v1/orders/?customer_id={}&status=PENDING", customer),
            None,
        )
        .await;
    assert_eq!(code, StatusCode::OK);
    assert_eq!(listed["items"].as_array().unwrap().len(), 1);
    assert_eq!(listed["meta"]["total"], 1);

    let (code, empty) = app
        .request(
            Method::GET,
            &format!("/api/v1/orders/?customer_id={}&status=SHIPPED", customer),
            None,
        )
        .await;
    assert_eq!(code, StatusCode::OK);
    assert!(empty["items"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn unknown_order_is_404() {
    let app = TestApp::new().await;
    let (code, _) = app
        .request(
            Method::GET,
            &format!("/api/v1/orders/{}", Uuid::new_v4()),
            None,
        )
        .await;
    assert_eq!(code, StatusCode::NOT_FOUND);
}

#[test]
fn terminal_statuses_match_the_state_machine() {
    for status in [
        OrderStatus::Cancelled,
        OrderStatus::Refunded,
        OrderStatus::Delivered,
        OrderStatus::Failed,
    ] {
        assert!(status.is_terminal());
    }
    assert!(!OrderStatus::Pending.is_terminal());
    assert!(!OrderStatus::Shipped.is_terminal());
}
