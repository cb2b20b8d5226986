//! Database-per-tenant store over SQLite files.
//!
//! Each tenant lives in its own database file inside a data directory; the
//! baseline store is one more file in the same directory. Switching closes
//! the current connection and opens the tenant's file, so a switched
//! [`SqliteStore`] sees nothing of any other tenant.
//!
//! ```text
//! data/
//! ├── public.sqlite3     baseline (registry tables, shared data)
//! ├── acme.sqlite3
//! └── globex.sqlite3
//! ```

use std::fmt::Debug;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use rusqlite::{Connection, OpenFlags};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{CloneStrategy, StoreConnector, SwitchTarget, TenantStore};
use crate::config::{DEFAULT_SCHEMA, SwitchStrategy};
use crate::connection::ConnectionParams;
use crate::error::{StoreError, StoreResult, TenancyResult};
use crate::id::TenantId;
use crate::registry::{TenantListing, TenantProvider};

const KIND: &str = "sqlite";

/// Configuration for the SQLite store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqliteStoreConfig {
    /// Directory holding one database file per store.
    pub data_dir: PathBuf,

    /// Name of the baseline store.
    #[serde(default = "default_baseline")]
    pub baseline: String,

    /// File extension for database files.
    #[serde(default = "default_extension")]
    pub extension: String,

    /// SQLite busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u32,

    /// Enable foreign key constraints on every connection.
    #[serde(default = "default_true")]
    pub enable_foreign_keys: bool,

    /// Allowed store names (regex pattern). Keeps names inside `data_dir`.
    #[serde(default = "default_store_name_pattern")]
    pub store_name_pattern: String,
}

fn default_baseline() -> String {
    DEFAULT_SCHEMA.to_string()
}

fn default_extension() -> String {
    "sqlite3".to_string()
}

fn default_busy_timeout_ms() -> u32 {
    5000
}

fn default_true() -> bool {
    true
}

fn default_store_name_pattern() -> String {
    r"^[A-Za-z0-9][A-Za-z0-9_\-]*$".to_string()
}

impl SqliteStoreConfig {
    /// Creates a configuration for `data_dir` with defaults.
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            baseline: default_baseline(),
            extension: default_extension(),
            busy_timeout_ms: default_busy_timeout_ms(),
            enable_foreign_keys: true,
            store_name_pattern: default_store_name_pattern(),
        }
    }

    /// Sets the baseline store name.
    pub fn with_baseline(mut self, baseline: impl Into<String>) -> Self {
        self.baseline = baseline.into();
        self
    }
}

#[derive(Debug)]
struct Shared {
    config: SqliteStoreConfig,
    name_pattern: Regex,
}

impl Shared {
    fn path_for(&self, name: &str) -> StoreResult<PathBuf> {
        if !self.name_pattern.is_match(name) {
            return Err(StoreError::Query {
                message: format!("invalid store name {name:?}"),
            });
        }
        Ok(self
            .config
            .data_dir
            .join(format!("{name}.{}", self.config.extension)))
    }

    fn open(&self, path: &Path, create: bool) -> StoreResult<Connection> {
        let mut flags = OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        if create {
            flags |= OpenFlags::SQLITE_OPEN_CREATE;
        }
        let conn = Connection::open_with_flags(path, flags)?;
        conn.busy_timeout(Duration::from_millis(u64::from(self.config.busy_timeout_ms)))?;
        if self.config.enable_foreign_keys {
            conn.execute_batch("PRAGMA foreign_keys = ON")?;
        }
        Ok(conn)
    }

    fn open_baseline(&self) -> StoreResult<Connection> {
        let path = self.path_for(&self.config.baseline)?;
        self.open(&path, true)
    }
}

/// Opens [`SqliteStore`] connections for one data directory.
#[derive(Debug, Clone)]
pub struct SqliteConnector {
    shared: Arc<Shared>,
}

impl SqliteConnector {
    /// Creates a connector, creating the data directory if needed.
    ///
    /// # Errors
    ///
    /// Fails if the store name pattern is not a valid regex or the data
    /// directory cannot be created.
    pub fn new(config: SqliteStoreConfig) -> StoreResult<Self> {
        let name_pattern =
            Regex::new(&config.store_name_pattern).map_err(|e| StoreError::Internal {
                store: KIND.to_string(),
                message: format!("invalid store name pattern: {e}"),
                source: Some(Box::new(e)),
            })?;
        std::fs::create_dir_all(&config.data_dir)?;

        Ok(Self {
            shared: Arc::new(Shared {
                config,
                name_pattern,
            }),
        })
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SqliteStoreConfig {
        &self.shared.config
    }

    /// Returns the database file for the named store.
    pub fn path_for(&self, name: &str) -> StoreResult<PathBuf> {
        self.shared.path_for(name)
    }

    /// Opens a connection to the baseline store.
    pub fn open(&self) -> StoreResult<SqliteStore> {
        Ok(SqliteStore {
            shared: Arc::clone(&self.shared),
            conn: self.shared.open_baseline()?,
            current: None,
        })
    }

    /// Returns the names of every store file in the data directory except
    /// the baseline, sorted.
    pub fn list_stores(&self) -> StoreResult<Vec<String>> {
        let config = &self.shared.config;
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&config.data_dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(config.extension.as_str()) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str())
                && stem != config.baseline
                && self.shared.name_pattern.is_match(stem)
            {
                names.push(stem.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    /// Returns a tenant provider reading identities from `table` in the
    /// baseline database.
    ///
    /// The table must have a text column `name`. Until the table exists the
    /// provider fails with a storage error, which the registry treats as "no
    /// tenants".
    pub fn tenant_provider(&self, table: impl Into<String>) -> SqliteTenantProvider {
        SqliteTenantProvider {
            shared: Arc::clone(&self.shared),
            table: table.into(),
        }
    }
}

#[async_trait]
impl StoreConnector for SqliteConnector {
    type Store = SqliteStore;

    async fn connect(&self) -> StoreResult<SqliteStore> {
        self.open()
    }
}

/// One SQLite connection that can be switched between tenant databases.
pub struct SqliteStore {
    shared: Arc<Shared>,
    conn: Connection,
    current: Option<String>,
}

impl SqliteStore {
    /// Returns the connection to the currently selected database.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Returns the selected store, or `None` when on the baseline.
    pub fn current(&self) -> Option<&str> {
        self.current.as_deref()
    }

    fn copy_structure(&self, source: &str, target: &Connection) -> StoreResult<()> {
        let source_path = self.shared.path_for(source)?;
        if !source_path.exists() {
            return Err(StoreError::not_found(source));
        }
        let source_conn = self.shared.open(&source_path, false)?;

        let mut stmt = source_conn.prepare(
            "SELECT sql FROM sqlite_master \
             WHERE sql IS NOT NULL AND name NOT LIKE 'sqlite_%' \
             ORDER BY CASE type WHEN 'table' THEN 0 WHEN 'index' THEN 1 ELSE 2 END, rowid",
        )?;
        let statements = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        for sql in &statements {
            target.execute_batch(sql)?;
        }
        debug!(source, statements = statements.len(), "Copied store structure");
        Ok(())
    }

    fn populate(&self, conn: &Connection, clone: &CloneStrategy) -> StoreResult<()> {
        match clone {
            CloneStrategy::Empty => Ok(()),
            CloneStrategy::SchemaFile(path) => {
                let sql = std::fs::read_to_string(path)?;
                conn.execute_batch(&sql)?;
                Ok(())
            }
            CloneStrategy::CopyFrom { source } => self.copy_structure(source, conn),
        }
    }
}

impl Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore")
            .field("data_dir", &self.shared.config.data_dir)
            .field("current", &self.current)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl TenantStore for SqliteStore {
    fn kind(&self) -> &'static str {
        KIND
    }

    fn supports(&self, strategy: SwitchStrategy) -> bool {
        strategy == SwitchStrategy::Database
    }

    async fn switch_to(&mut self, target: &SwitchTarget) -> StoreResult<()> {
        let path = self.shared.path_for(&target.store_name)?;
        if !path.exists() {
            return Err(StoreError::not_found(&target.store_name));
        }
        self.conn = self.shared.open(&path, false)?;
        self.current = Some(target.store_name.clone());
        Ok(())
    }

    async fn switch_to_baseline(&mut self) -> StoreResult<()> {
        self.conn = self.shared.open_baseline()?;
        self.current = None;
        Ok(())
    }

    async fn create_tenant_store(
        &mut self,
        name: &str,
        _params: &ConnectionParams,
        clone: &CloneStrategy,
    ) -> StoreResult<()> {
        let path = self.shared.path_for(name)?;
        if path.exists() {
            return Err(StoreError::AlreadyExists {
                object: name.to_string(),
            });
        }

        let conn = self.shared.open(&path, true)?;
        if let Err(err) = self.populate(&conn, clone) {
            drop(conn);
            let _ = std::fs::remove_file(&path);
            return Err(err);
        }
        Ok(())
    }

    async fn drop_tenant_store(&mut self, name: &str) -> StoreResult<()> {
        let path = self.shared.path_for(name)?;
        if self.current.as_deref() == Some(name) {
            self.conn = self.shared.open_baseline()?;
            self.current = None;
        }

        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StoreError::not_found(name)),
            Err(e) => Err(e.into()),
        }
    }

    async fn store_exists(&mut self, name: &str) -> StoreResult<bool> {
        Ok(self.shared.path_for(name)?.exists())
    }

    async fn load_seed(&mut self, path: &Path) -> StoreResult<()> {
        let sql = std::fs::read_to_string(path)?;
        self.conn.execute_batch(&sql)?;
        Ok(())
    }
}

/// Reads tenant identities from a table in the baseline database.
#[derive(Debug, Clone)]
pub struct SqliteTenantProvider {
    shared: Arc<Shared>,
    table: String,
}

#[async_trait]
impl TenantProvider for SqliteTenantProvider {
    async fn tenants(&self) -> TenancyResult<TenantListing> {
        let conn = self.shared.open_baseline()?;
        let sql = format!(
            "SELECT name FROM {} ORDER BY rowid",
            quote_identifier(&self.table)
        );
        let mut stmt = conn.prepare(&sql).map_err(StoreError::from)?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(StoreError::from)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(StoreError::from)?;

        let mut ids = Vec::with_capacity(names.len());
        for name in names {
            match TenantId::parse(&name) {
                Ok(id) => ids.push(id),
                Err(err) => warn!(
                    table = %self.table,
                    name = %name,
                    error = %err,
                    "Skipping invalid tenant name in registry table"
                ),
            }
        }
        Ok(TenantListing::List(ids))
    }
}

/// Quotes an identifier for safe use in SQL.
fn quote_identifier(id: &str) -> String {
    format!("\"{}\"", id.replace('"', "\"\""))
}
