//! Cross-service aggregator.
//!
//! The admin surface reads sibling-service tables through postgres_fdw
//! foreign schemas. Bootstrap runs once at startup with bounded retries and
//! doubling backoff; any failure degrades to non-federated mode instead of
//! aborting the process. Per-request queries never retry or sleep.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use sea_orm::{ConnectionTrait, DatabaseBackend, DatabaseConnection, FromQueryResult, JsonValue, Statement};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::config::FederationConfig;
use crate::errors::ServiceError;

/// Entities readable across the federation boundary. Everything else is
/// refused before any SQL is built.
const ENTITY_WHITELIST: &[(&str, &str)] = &[
    ("users", "federated_auth.users"),
    ("products", "federated_product.products"),
    ("orders", "federated_order.orders"),
];

const MAX_FEDERATED_ROWS: u64 = 200;

/// Result of a federated read. `NotFederated` is a state, not an error: the
/// caller decides whether to degrade or to surface 503.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FederationQuery {
    Rows { rows: Vec<JsonValue> },
    NotFederated,
}

#[derive(Debug, Clone)]
pub struct FederationService {
    db: Arc<DatabaseConnection>,
    config: FederationConfig,
    federated: Arc<AtomicBool>,
}

impl FederationService {
    pub fn new(db: Arc<DatabaseConnection>, config: FederationConfig) -> Self {
        Self {
            db,
            config,
            federated: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_federated(&self) -> bool {
        self.federated.load(Ordering::Relaxed)
    }

    /// Imports missing foreign schemas. The only code path allowed to sleep
    /// between attempts; it runs once at startup and never fails the caller.
    #[instrument(skip(self))]
    pub async fn bootstrap(&self) {
        if !self.config.enabled {
            info!("federation disabled by configuration");
            return;
        }
        if self.db.get_database_backend() != DatabaseBackend::Postgres {
            warn!("federation requires postgres, running non-federated");
            return;
        }

        let mut delay = Duration::from_secs(self.config.retry_delay_secs);
        for attempt in 1..=self.config.max_retries {
            match self.import_foreign_schemas().await {
                Ok(()) => {
                    self.federated.store(true, Ordering::Relaxed);
                    info!(attempt, "federation bootstrap complete");
                    return;
                }
                Err(e) => {
                    warn!(
                        attempt,
                        max_retries = self.config.max_retries,
                        error = %e,
                        "federation bootstrap attempt failed"
                    );
                    if attempt < self.config.max_retries {
                        tokio::time::sleep(delay).await;
                        delay *= 2;
                    }
                }
            }
        }
        warn!("federation bootstrap exhausted retries, running non-federated");
    }

    async fn import_foreign_schemas(&self) -> Result<(), ServiceError> {
        for server in self.foreign_servers() {
            let local_schema = format!("federated_{}", server);
            let count_stmt = Statement::from_sql_and_values(
                DatabaseBackend::Postgres,
                "SELECT COUNT(*) AS cnt FROM information_schema.foreign_tables \
                 WHERE foreign_table_schema = $1",
                [local_schema.clone().into()],
            );
            let row = self.db.query_one(count_stmt).await?;
            let imported: i64 = row
                .map(|r| r.try_get::<i64>("", "cnt"))
                .transpose()?
                .unwrap_or(0);
            if imported > 0 {
                continue;
            }

            // Identifiers come from configuration, not request input.
            let create = format!("CREATE SCHEMA IF NOT EXISTS {}", local_schema);
            self.db
                .execute(Statement::from_string(DatabaseBackend::Postgres, create))
                .await?;
            let import = format!(
                "IMPORT FOREIGN SCHEMA public FROM SERVER {}_server INTO {}",
                server, local_schema
            );
            self.db
                .execute(Statement::from_string(DatabaseBackend::Postgres, import))
                .await?;
            info!(server, schema = %local_schema, "foreign schema imported");
        }
        Ok(())
    }

    fn foreign_servers(&self) -> Vec<String> {
        self.config
            .foreign_servers
            .as_deref()
            .unwrap_or("auth,product,order")
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }

    /// Reads rows from a federated table. Filters are equality-only over a
    /// small set of allowed columns.
    #[instrument(skip(self, filters))]
    pub async fn query(
        &self,
        entity_type: &str,
        filters: &BTreeMap<String, String>,
    ) -> Result<FederationQuery, ServiceError> {
        let table = match ENTITY_WHITELIST
            .iter()
            .find(|(name, _)| *name == entity_type)
        {
            Some((_, table)) => *table,
            None => {
                return Err(ServiceError::InvalidInput(format!(
                    "Unknown federated entity '{}'",
                    entity_type
                )))
            }
        };

        for column in filters.keys() {
            if !column.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                return Err(ServiceError::InvalidInput(format!(
                    "Invalid filter column '{}'",
                    column
                )));
            }
        }

        if !self.is_federated() {
            return Ok(FederationQuery::NotFederated);
        }

        let mut sql = format!("SELECT * FROM {}", table);
        let mut values = Vec::new();
        for (i, (column, value)) in filters.iter().enumerate() {
            sql.push_str(if i == 0 { " WHERE " } else { " AND " });
            sql.push_str(&format!("{} = ${}", column, i + 1));
            values.push(value.clone().into());
        }
        sql.push_str(&format!(" LIMIT {}", MAX_FEDERATED_ROWS));

        let stmt = Statement::from_sql_and_values(DatabaseBackend::Postgres, sql, values);
        let rows = JsonValue::find_by_statement(stmt).all(&*self.db).await?;
        Ok(FederationQuery::Rows { rows })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whitelist_covers_the_admin_entities() {
        for entity in ["users", "products", "orders"] {
            assert!(ENTITY_WHITELIST.iter().any(|(name, _)| *name == entity));
        }
    }
}
