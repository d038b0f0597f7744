use std::time::Duration;

use sea_orm::{
    ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DbErr, Schema,
};
use sea_orm::sea_query::{Index, IndexCreateStatement};
use tracing::info;

use crate::config::AppConfig;
use crate::entities;

/// Opens the connection pool with the configured bounds.
pub async fn establish_connection(config: &AppConfig) -> Result<DatabaseConnection, DbErr> {
    let mut opts = ConnectOptions::new(config.database_url.clone());
    opts.max_connections(config.db_max_connections)
        .min_connections(config.db_min_connections)
        .connect_timeout(Duration::from_secs(10))
        .acquire_timeout(Duration::from_secs(10))
        .idle_timeout(Duration::from_secs(300))
        .sqlx_logging(false);

    let db = Database::connect(opts).await?;
    info!("Database connection established");
    Ok(db)
}

/// Creates every table and index if it does not already exist.
///
/// Idempotent so it can run unconditionally at startup and in the test
/// harness against in-memory SQLite.
pub async fn ensure_schema(db: &DatabaseConnection) -> Result<(), DbErr> {
    let backend = db.get_database_backend();
    let schema = Schema::new(backend);

    let mut stmts = vec![
        schema.create_table_from_entity(entities::product::Entity),
        schema.create_table_from_entity(entities::product_variant::Entity),
        schema.create_table_from_entity(entities::cart::Entity),
        schema.create_table_from_entity(entities::cart_item::Entity),
        schema.create_table_from_entity(entities::coupon::Entity),
        schema.create_table_from_entity(entities::coupon_usage::Entity),
        schema.create_table_from_entity(entities::order::Entity),
        schema.create_table_from_entity(entities::order_item::Entity),
        schema.create_table_from_entity(entities::order_status_history::Entity),
        schema.create_table_from_entity(entities::stock_reservation::Entity),
    ];

    for stmt in stmts.iter_mut() {
        stmt.if_not_exists();
        db.execute(backend.build(&*stmt)).await?;
    }

    for idx in indexes() {
        db.execute(backend.build(&idx)).await?;
    }

    info!("Schema ensured");
    Ok(())
}

fn indexes() -> Vec<IndexCreateStatement> {
    use entities::{cart_item, coupon_usage, order_status_history, stock_reservation};

    vec![
        // One line per (cart, product, variant); the upsert path relies on it.
        Index::create()
            .name("uq_cart_items_cart_product_variant")
            .table(cart_item::Entity)
            .col(cart_item::Column::CartId)
            .col(cart_item::Column::ProductId)
            .col(cart_item::Column::VariantId)
            .unique()
            .if_not_exists()
            .to_owned(),
        Index::create()
            .name("idx_coupon_usages_coupon_customer")
            .table(coupon_usage::Entity)
            .col(coupon_usage::Column::CouponId)
            .col(coupon_usage::Column::CustomerId)
            .if_not_exists()
            .to_owned(),
        Index::create()
            .name("idx_order_status_history_order")
            .table(order_status_history::Entity)
            .col(order_status_history::Column::OrderId)
            .if_not_exists()
            .to_owned(),
        Index::create()
            .name("idx_stock_reservations_order")
            .table(stock_reservation::Entity)
            .col(stock_reservation::Column::OrderId)
            .if_not_exists()
            .to_owned(),
    ]
}
