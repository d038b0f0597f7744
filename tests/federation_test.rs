mod common;

use axum::http::{Method, StatusCode};
use std::collections::BTreeMap;

use common::{test_config, TestApp};

#[tokio::test]
async fn non_postgres_backend_degrades_to_not_federated() {
    let mut cfg = test_config();
    cfg.federation.enabled = true;
    cfg.federation.max_retries = 1;
    let app = TestApp::with_config(cfg).await;

    // Bootstrap must not error even though SQLite cannot federate.
    app.state.services.federation.bootstrap().await;
    assert!(!app.state.services.federation.is_federated());
}

#[tokio::test]
async fn degraded_federation_maps_to_503() {
    let app = TestApp::new().await;

    let (status, body) = app
        .request(Method::GET, "/api/v1/admin/federated/users", None)
        .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"], "federation_unavailable");
    assert!(body["message"]
        .as_str()
        .unwrap()
        .contains("per-service APIs"));
}

#[tokio::test]
async fn unknown_entities_are_rejected_before_any_query() {
    let app = TestApp::new().await;

    let (status, _) = app
        .request(Method::GET, "/api/v1/admin/federated/secrets", None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn filter_columns_are_validated() {
    let app = TestApp::new().await;
    let mut filters = BTreeMap::new();
    filters.insert("id; DROP TABLE users".to_string(), "1".to_string());

    let result = app
        .state
        .services
        .federation
        .query("users", &filters)
        .await;
    assert!(result.is_err(), "hostile column names are refused");
}
