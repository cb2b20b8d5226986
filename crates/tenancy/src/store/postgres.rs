//! Schema-per-tenant store over PostgreSQL.
//!
//! All tenants share one database; each tenant has its own schema. A switch
//! checks that the schema exists and then sets the session `search_path` to
//! the tenant schema followed by the persistent schemas:
//!
//! ```sql
//! SET search_path TO "acme", "shared", "public"
//! ```
//!
//! Pools built with [`PostgresConnector::from_params`] use the `Clean`
//! recycling method, so a connection returned to the pool while still
//! switched has its `search_path` discarded before anyone else gets it.

use std::path::Path;

use async_trait::async_trait;
use deadpool_postgres::{Client, Config, ManagerConfig, Pool, RecyclingMethod, Runtime};
use tokio_postgres::NoTls;
use tracing::debug;

use super::{CloneStrategy, StoreConnector, SwitchTarget, TenantStore};
use crate::config::{SwitchStrategy, TenancyConfig};
use crate::connection::ConnectionParams;
use crate::error::{StoreError, StoreResult};

const KIND: &str = "postgres";

const SCHEMA_EXISTS_SQL: &str =
    "SELECT EXISTS(SELECT 1 FROM information_schema.schemata WHERE schema_name = $1)";

const LIST_TABLES_SQL: &str = "SELECT table_name FROM information_schema.tables \
     WHERE table_schema = $1 AND table_type = 'BASE TABLE' ORDER BY table_name";

/// Opens [`PostgresSchemaStore`] connections from a pool.
#[derive(Clone)]
pub struct PostgresConnector {
    pool: Pool,
    baseline_path: Vec<String>,
}

impl PostgresConnector {
    /// Creates a connector over `pool` whose baseline search path is the
    /// configured default schema followed by the persistent schemas.
    pub fn new(pool: Pool, config: &TenancyConfig) -> Self {
        let mut baseline_path = vec![config.default_schema().to_string()];
        baseline_path.extend(
            config
                .persistent_schemas()
                .iter()
                .filter(|s| s.as_str() != config.default_schema())
                .cloned(),
        );
        Self {
            pool,
            baseline_path,
        }
    }

    /// Builds a pool from connection parameters.
    ///
    /// Reads `host`, `port`, `database`, `user` and `password`.
    pub fn from_params(params: &ConnectionParams, max_size: usize) -> StoreResult<Pool> {
        let mut cfg = Config::new();
        cfg.host = params.host().map(str::to_string);
        cfg.port = params.get("port").and_then(|p| p.parse().ok());
        cfg.dbname = params.database().map(str::to_string);
        cfg.user = params.get("user").map(str::to_string);
        cfg.password = params.get("password").map(str::to_string);
        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Clean,
        });

        cfg.builder(NoTls)
            .map_err(|e| StoreError::Internal {
                store: KIND.to_string(),
                message: format!("Failed to create pool builder: {e}"),
                source: None,
            })?
            .max_size(max_size)
            .runtime(Runtime::Tokio1)
            .build()
            .map_err(|e| StoreError::ConnectionFailed {
                store: KIND.to_string(),
                message: e.to_string(),
            })
    }

    /// Returns the baseline search path.
    pub fn baseline_path(&self) -> &[String] {
        &self.baseline_path
    }
}

impl std::fmt::Debug for PostgresConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresConnector")
            .field("baseline_path", &self.baseline_path)
            .field("pool_status", &self.pool.status())
            .finish()
    }
}

#[async_trait]
impl StoreConnector for PostgresConnector {
    type Store = PostgresSchemaStore;

    async fn connect(&self) -> StoreResult<PostgresSchemaStore> {
        let client = self.pool.get().await?;
        let mut store = PostgresSchemaStore::new(client, self.baseline_path.clone());
        store.switch_to_baseline().await?;
        Ok(store)
    }
}

/// One pooled PostgreSQL connection switched between tenant schemas.
pub struct PostgresSchemaStore {
    client: Client,
    baseline_path: Vec<String>,
    current: Option<String>,
}

impl PostgresSchemaStore {
    /// Wraps a pooled client. The session `search_path` is left untouched
    /// until the first switch.
    pub fn new(client: Client, baseline_path: Vec<String>) -> Self {
        Self {
            client,
            baseline_path,
            current: None,
        }
    }

    /// Returns the client for running statements.
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Returns the selected schema, or `None` when on the baseline.
    pub fn current(&self) -> Option<&str> {
        self.current.as_deref()
    }

    async fn schema_exists(&self, name: &str) -> StoreResult<bool> {
        let row = self.client.query_one(SCHEMA_EXISTS_SQL, &[&name]).await?;
        Ok(row.get(0))
    }
}

impl std::fmt::Debug for PostgresSchemaStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresSchemaStore")
            .field("current", &self.current)
            .field("baseline_path", &self.baseline_path)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl TenantStore for PostgresSchemaStore {
    fn kind(&self) -> &'static str {
        KIND
    }

    fn supports(&self, strategy: SwitchStrategy) -> bool {
        strategy == SwitchStrategy::Schema
    }

    async fn switch_to(&mut self, target: &SwitchTarget) -> StoreResult<()> {
        // search_path accepts missing schemas silently
        if !self.schema_exists(&target.store_name).await? {
            return Err(StoreError::not_found(&target.store_name));
        }
        self.client
            .batch_execute(&search_path_sql(&target.search_path))
            .await?;
        self.current = Some(target.store_name.clone());
        Ok(())
    }

    async fn switch_to_baseline(&mut self) -> StoreResult<()> {
        self.client
            .batch_execute(&search_path_sql(&self.baseline_path))
            .await?;
        self.current = None;
        Ok(())
    }

    async fn create_tenant_store(
        &mut self,
        name: &str,
        _params: &ConnectionParams,
        clone: &CloneStrategy,
    ) -> StoreResult<()> {
        let schema_sql = match clone {
            CloneStrategy::SchemaFile(path) => Some(tokio::fs::read_to_string(path).await?),
            _ => None,
        };

        // DDL is transactional: a failed clone leaves no schema behind.
        let tx = self.client.transaction().await?;
        tx.batch_execute(&create_schema_sql(name)).await?;

        match clone {
            CloneStrategy::Empty => {}
            CloneStrategy::SchemaFile(_) => {
                tx.batch_execute(&local_search_path_sql(name)).await?;
                if let Some(sql) = &schema_sql {
                    tx.batch_execute(sql).await?;
                }
            }
            CloneStrategy::CopyFrom { source } => {
                let rows = tx.query(LIST_TABLES_SQL, &[source]).await?;
                for row in &rows {
                    let table: String = row.get(0);
                    tx.batch_execute(&copy_table_sql(source, name, &table)).await?;
                }
                debug!(source = %source, target = name, tables = rows.len(), "Copied schema structure");
            }
        }

        tx.commit().await?;
        Ok(())
    }

    async fn drop_tenant_store(&mut self, name: &str) -> StoreResult<()> {
        self.client.batch_execute(&drop_schema_sql(name)).await?;
        if self.current.as_deref() == Some(name) {
            self.switch_to_baseline().await?;
        }
        Ok(())
    }

    async fn store_exists(&mut self, name: &str) -> StoreResult<bool> {
        self.schema_exists(name).await
    }

    async fn load_seed(&mut self, path: &Path) -> StoreResult<()> {
        let sql = tokio::fs::read_to_string(path).await?;
        self.client.batch_execute(&sql).await?;
        Ok(())
    }
}

/// Escapes a SQL identifier (schema name, table name, etc.).
fn escape_identifier(id: &str) -> String {
    format!("\"{}\"", id.replace('"', "\"\""))
}

/// Generates SQL to set the session search_path.
fn search_path_sql(path: &[String]) -> String {
    let schemas: Vec<String> = path.iter().map(|s| escape_identifier(s)).collect();
    format!("SET search_path TO {}", schemas.join(", "))
}

/// Generates SQL to set the search_path for the current transaction only.
fn local_search_path_sql(schema: &str) -> String {
    format!("SET LOCAL search_path TO {}", escape_identifier(schema))
}

/// Generates SQL to create a schema. Fails if the schema exists.
fn create_schema_sql(schema: &str) -> String {
    format!("CREATE SCHEMA {}", escape_identifier(schema))
}

/// Generates SQL to drop a schema and everything in it.
fn drop_schema_sql(schema: &str) -> String {
    format!("DROP SCHEMA {} CASCADE", escape_identifier(schema))
}

/// Generates SQL to copy one table's structure between schemas.
fn copy_table_sql(source: &str, target: &str, table: &str) -> String {
    format!(
        "CREATE TABLE {}.{} (LIKE {}.{} INCLUDING ALL)",
        escape_identifier(target),
        escape_identifier(table),
        escape_identifier(source),
        escape_identifier(table)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_path_sql() {
        let path = vec!["acme".to_string(), "shared".to_string(), "public".to_string()];
        assert_eq!(
            search_path_sql(&path),
            "SET search_path TO \"acme\", \"shared\", \"public\""
        );
    }

    #[test]
    fn test_local_search_path_sql() {
        assert_eq!(
            local_search_path_sql("acme"),
            "SET LOCAL search_path TO \"acme\""
        );
    }

    #[test]
    fn test_create_schema_sql() {
        assert_eq!(create_schema_sql("acme"), "CREATE SCHEMA \"acme\"");
    }

    #[test]
    fn test_drop_schema_sql() {
        assert_eq!(drop_schema_sql("acme"), "DROP SCHEMA \"acme\" CASCADE");
    }

    #[test]
    fn test_copy_table_sql() {
        assert_eq!(
            copy_table_sql("public", "acme", "orders"),
            "CREATE TABLE \"acme\".\"orders\" (LIKE \"public\".\"orders\" INCLUDING ALL)"
        );
    }

    #[test]
    fn test_escape_identifier() {
        assert_eq!(escape_identifier("tenant_acme"), "\"tenant_acme\"");
        assert_eq!(escape_identifier("odd\"name"), "\"odd\"\"name\"");
    }

    #[test]
    fn test_baseline_path_from_config() {
        let mut config = TenancyConfig::new();
        config.set_persistent_schemas(vec!["shared".to_string(), "public".to_string()]);
        let pool = PostgresConnector::from_params(
            &ConnectionParams::new().with("host", "localhost"),
            1,
        )
        .unwrap();
        let connector = PostgresConnector::new(pool, &config);
        assert_eq!(connector.baseline_path(), ["public", "shared"]);
    }
}
