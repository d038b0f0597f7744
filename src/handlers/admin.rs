use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::handlers::common::success_response;
use crate::services::federation::FederationQuery;
use crate::{errors::ServiceError, AppState};

pub fn admin_routes() -> Router<Arc<AppState>> {
    Router::new().route("/federated/:entity", get(query_federated))
}

/// Read rows from a sibling service through the federation layer. Query
/// parameters become equality filters. When federation is degraded the
/// caller gets 503 with a payload pointing at the per-service APIs.
async fn query_federated(
    State(state): State<Arc<AppState>>,
    Path(entity): Path<String>,
    Query(filters): Query<BTreeMap<String, String>>,
) -> Result<impl IntoResponse, ServiceError> {
    match state.services.federation.query(&entity, &filters).await? {
        FederationQuery::Rows { rows } => {
            Ok(success_response(serde_json::json!({ "rows": rows })))
        }
        FederationQuery::NotFederated => Ok((
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({
                "error": "federation_unavailable",
                "message": "Cross-service queries are degraded; use the per-service APIs",
            })),
        )
            .into_response()),
    }
}
