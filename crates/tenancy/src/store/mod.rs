//! Storage capability interface and reference stores.
//!
//! The engine decides *what* to switch to and *when*; a [`TenantStore`]
//! performs the switch on one exclusively owned connection. A
//! [`StoreConnector`] hands out fresh stores so that concurrent units of work
//! never share a switched connection.
//!
//! Reference implementations:
//!
//! - [`MemoryStore`] - in-process catalog, supports both strategies
//! - [`SqliteStore`] - one SQLite file per tenant, database strategy (feature `sqlite`)
//! - [`PostgresSchemaStore`] - one schema per tenant via `search_path` (feature `postgres`)
//!
//! # Choosing a Strategy
//!
//! | Strategy | Isolation | Switch cost | Store |
//! |----------|-----------|-------------|-------|
//! | Schema | Medium | `SET search_path` | PostgreSQL |
//! | Database | High | reconnect | SQLite, PostgreSQL |

mod memory;
#[cfg(feature = "postgres")]
mod postgres;
#[cfg(feature = "sqlite")]
mod sqlite;

pub use memory::{MemoryCatalog, MemoryStore};
#[cfg(feature = "postgres")]
pub use postgres::{PostgresConnector, PostgresSchemaStore};
#[cfg(feature = "sqlite")]
pub use sqlite::{SqliteConnector, SqliteStore, SqliteStoreConfig, SqliteTenantProvider};

use std::fmt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::config::SwitchStrategy;
use crate::connection::ConnectionParams;
use crate::error::StoreResult;
use crate::id::TenantId;

/// Everything a store needs to switch its connection to a tenant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwitchTarget {
    /// The tenant being switched to.
    pub tenant: TenantId,
    /// Physical schema or database name.
    pub store_name: String,
    /// Connection parameters resolved for the tenant.
    pub params: ConnectionParams,
    /// Schema search order: the tenant's store followed by the persistent
    /// schemas. Only meaningful under the schema strategy.
    pub search_path: Vec<String>,
}

/// How a newly created tenant store is populated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloneStrategy {
    /// Create the store empty.
    Empty,
    /// Load a schema definition file into the new store.
    SchemaFile(PathBuf),
    /// Copy the structure of an existing store with raw SQL.
    CopyFrom {
        /// Schema or database to copy from.
        source: String,
    },
}

impl fmt::Display for CloneStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloneStrategy::Empty => write!(f, "empty"),
            CloneStrategy::SchemaFile(path) => write!(f, "schema-file:{}", path.display()),
            CloneStrategy::CopyFrom { source } => write!(f, "copy-from:{source}"),
        }
    }
}

/// Low-level switching capability for one exclusively owned connection.
///
/// Every method takes `&mut self`: a switched connection carries session
/// state and must not be used by two units of work at once.
#[async_trait]
pub trait TenantStore: Send {
    /// Short adapter name, used in error messages.
    fn kind(&self) -> &'static str;

    /// Returns `true` if this store can isolate tenants with `strategy`.
    fn supports(&self, strategy: SwitchStrategy) -> bool;

    /// Points the connection at the target tenant.
    async fn switch_to(&mut self, target: &SwitchTarget) -> StoreResult<()>;

    /// Points the connection back at the baseline store.
    async fn switch_to_baseline(&mut self) -> StoreResult<()>;

    /// Provisions a new schema or database.
    async fn create_tenant_store(
        &mut self,
        name: &str,
        params: &ConnectionParams,
        clone: &CloneStrategy,
    ) -> StoreResult<()>;

    /// Removes a schema or database.
    async fn drop_tenant_store(&mut self, name: &str) -> StoreResult<()>;

    /// Returns `true` if the named schema or database exists.
    async fn store_exists(&mut self, name: &str) -> StoreResult<bool>;

    /// Runs a seed data file against the currently selected store.
    async fn load_seed(&mut self, path: &Path) -> StoreResult<()>;
}

/// Opens fresh, exclusively owned stores.
#[async_trait]
pub trait StoreConnector: Send + Sync {
    /// The store type handed out.
    type Store: TenantStore + 'static;

    /// Opens a store connected to the baseline.
    async fn connect(&self) -> StoreResult<Self::Store>;
}
