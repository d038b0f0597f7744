mod common;

use axum::http::{Method, StatusCode};
use rust_decimal_macros::dec;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set};
use uuid::Uuid;

use common::TestApp;
use marketplace_api::entities::{cart, product};
use marketplace_api::services::carts::AddItemInput;

#[tokio::test]
async fn re_adding_increments_the_existing_line() {
    let app = TestApp::new().await;
    let customer = Uuid::new_v4();
    let product = app.seed_product(dec!(19.99), 50).await;

    app.add_to_cart(customer, product.id, 2).await;
    app.add_to_cart(customer, product.id, 3).await;

    let view = app.state.services.carts.get_cart(customer).await.unwrap();
    assert_eq!(view.items.len(), 1, "same product folds into one line");
    assert_eq!(view.items[0].quantity, 5);
    assert_eq!(view.subtotal, dec!(99.95));
}

#[tokio::test]
async fn unit_price_is_pinned_at_first_add() {
    let app = TestApp::new().await;
    let customer = Uuid::new_v4();
    let seeded = app.seed_product(dec!(10.00), 50).await;

    app.add_to_cart(customer, seeded.id, 1).await;

    // Catalog price change between adds must not reprice the line.
    let mut active: product::ActiveModel = seeded.clone().into();
    active.price = Set(dec!(99.00));
    active.update(&*app.state.db).await.unwrap();

    app.add_to_cart(customer, seeded.id, 1).await;

    let view = app.state.services.carts.get_cart(customer).await.unwrap();
    assert_eq!(view.items.len(), 1);
    assert_eq!(view.items[0].unit_price, dec!(10.00));
    assert_eq!(view.subtotal, dec!(20.00));
}

#[tokio::test]
async fn distinct_variants_get_distinct_lines() {
    let app = TestApp::new().await;
    let customer = Uuid::new_v4();
    let product = app.seed_product(dec!(15.00), 50).await;

    app.state
        .services
        .carts
        .add_item(
            customer,
            AddItemInput {
                product_id: product.id,
                variant_id: None,
                quantity: 1,
                unit_price: None,
            },
        )
        .await
        .unwrap();
    app.state
        .services
        .carts
        .add_item(
            customer,
            AddItemInput {
                product_id: product.id,
                variant_id: None,
                quantity: 1,
                unit_price: Some(dec!(12.00)),
            },
        )
        .await
        .unwrap();

    // Same (product, no variant) pair: still one line, price unchanged.
    let view = app.state.services.carts.get_cart(customer).await.unwrap();
    assert_eq!(view.items.len(), 1);
    assert_eq!(view.items[0].quantity, 2);
    assert_eq!(view.items[0].unit_price, dec!(15.00));
}

#[tokio::test]
async fn zero_quantity_update_removes_the_line() {
    let app = TestApp::new().await;
    let customer = Uuid::new_v4();
    let product = app.seed_product(dec!(10.00), 50).await;
    app.add_to_cart(customer, product.id, 2).await;

    let view = app.state.services.carts.get_cart(customer).await.unwrap();
    let item_id = view.items[0].id;

    let (status, _) = app
        .request(
            Method::PUT,
            &format!("/api/v1/carts/{}/items/{}", customer, item_id),
            Some(serde_json::json!({ "quantity": 0 })),
        )
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let view = app.state.services.carts.get_cart(customer).await.unwrap();
    assert!(view.items.is_empty());
}

#[tokio::test]
async fn clear_keeps_the_cart_row() {
    let app = TestApp::new().await;
    let customer = Uuid::new_v4();
    let product = app.seed_product(dec!(10.00), 50).await;
    app.add_to_cart(customer, product.id, 2).await;

    let (status, body) = app
        .request(
            Method::POST,
            &format!("/api/v1/carts/{}/clear", customer),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["removed"], 1);

    let row = cart::Entity::find()
        .filter(cart::Column::CustomerId.eq(customer))
        .one(&*app.state.db)
        .await
        .unwrap();
    assert!(row.is_some(), "cart row survives clearing");

    let view = app.state.services.carts.get_cart(customer).await.unwrap();
    assert!(view.items.is_empty());
}

#[tokio::test]
async fn removing_someone_elses_item_is_not_found() {
    let app = TestApp::new().await;
    let owner = Uuid::new_v4();
    let intruder = Uuid::new_v4();
    let product = app.seed_product(dec!(10.00), 50).await;
    app.add_to_cart(owner, product.id, 1).await;

    let view = app.state.services.carts.get_cart(owner).await.unwrap();
    let item_id = view.items[0].id;

    let (status, _) = app
        .request(
            Method::DELETE,
            &format!("/api/v1/carts/{}/items/{}", intruder, item_id),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
