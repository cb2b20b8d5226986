//! Tenancy configuration.
//!
//! [`TenancyConfig`] holds every setting the engine consults. Each field is
//! optional internally: unset fields report their documented default, and any
//! field can be returned to "unset" on its own with [`TenancyConfig::unset`].
//!
//! # Defaults
//!
//! | Setting | Default |
//! |---------|---------|
//! | `default_schema` | `public` |
//! | `strategy` | `database` |
//! | `use_sql` | `false` |
//! | `seed_after_create` | `false` |
//! | `prepend_environment` | `false` |
//! | `append_environment` | `false` |
//! | `environment` | `development` |
//! | `excluded_models` | empty |
//! | `persistent_schemas` | empty |
//! | `tld_length` | `1` |
//! | `allow_prepend_tenant_name` | `false` |
//! | `parallel_migration_threads` | `0` (serial) |
//! | `connection_class` | `default` |
//! | `database_schema_file` | unset |
//! | `seed_data_file` | `db/seeds.sql` |
//!
//! # Process-wide configuration
//!
//! The process-wide instance is written once at boot with [`configure`] and
//! read with [`current`], which returns a cheap snapshot without locking.
//! Writers are serialized; a snapshot taken before a write keeps seeing the
//! old values. Tests that touch the process-wide instance should call
//! [`reset`] afterwards.
//!
//! ```
//! use helios_tenancy::config::{self, SwitchStrategy};
//!
//! config::configure(|c| {
//!     c.set_strategy(SwitchStrategy::Schema)
//!         .set_persistent_schemas(vec!["shared".to_string()]);
//! });
//! assert_eq!(config::current().strategy(), SwitchStrategy::Schema);
//!
//! config::reset();
//! assert_eq!(config::current().default_schema(), "public");
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Fallback for `default_schema`.
pub const DEFAULT_SCHEMA: &str = "public";

/// Fallback for `environment`.
pub const DEFAULT_ENVIRONMENT: &str = "development";

/// Fallback for `connection_class`.
pub const DEFAULT_CONNECTION_CLASS: &str = "default";

/// Fallback for `seed_data_file`.
pub const DEFAULT_SEED_DATA_FILE: &str = "db/seeds.sql";

/// Fallback for `tld_length`.
pub const DEFAULT_TLD_LENGTH: usize = 1;

/// How tenants are isolated from each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwitchStrategy {
    /// One schema per tenant inside a shared database, switched by changing
    /// the session's search path.
    Schema,
    /// One database per tenant, switched by reconnecting.
    #[default]
    Database,
}

impl fmt::Display for SwitchStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SwitchStrategy::Schema => write!(f, "schema"),
            SwitchStrategy::Database => write!(f, "database"),
        }
    }
}

/// Names a single [`TenancyConfig`] field, for [`TenancyConfig::unset`].
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigField {
    DefaultSchema,
    Strategy,
    UseSql,
    SeedAfterCreate,
    PrependEnvironment,
    AppendEnvironment,
    Environment,
    ExcludedModels,
    PersistentSchemas,
    TldLength,
    AllowPrependTenantName,
    ParallelMigrationThreads,
    ConnectionClass,
    DatabaseSchemaFile,
    SeedDataFile,
}

/// Settings consulted by the registry, the sessions and the identifier
/// rewriter.
///
/// Deserializes from any serde format; every key is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TenancyConfig {
    default_schema: Option<String>,
    strategy: Option<SwitchStrategy>,
    use_sql: Option<bool>,
    seed_after_create: Option<bool>,
    prepend_environment: Option<bool>,
    append_environment: Option<bool>,
    environment: Option<String>,
    excluded_models: Option<Vec<String>>,
    persistent_schemas: Option<Vec<String>>,
    tld_length: Option<usize>,
    allow_prepend_tenant_name: Option<bool>,
    parallel_migration_threads: Option<usize>,
    connection_class: Option<String>,
    database_schema_file: Option<PathBuf>,
    seed_data_file: Option<PathBuf>,
}

impl TenancyConfig {
    /// Creates a configuration with every field unset.
    pub fn new() -> Self {
        Self::default()
    }

    /// Schema (or database) holding shared data; never empty.
    pub fn default_schema(&self) -> &str {
        self.default_schema
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_SCHEMA)
    }

    /// Isolation strategy.
    pub fn strategy(&self) -> SwitchStrategy {
        self.strategy.unwrap_or_default()
    }

    /// Clone new tenants by copying the default schema with raw SQL instead of
    /// loading the schema definition file.
    pub fn use_sql(&self) -> bool {
        self.use_sql.unwrap_or(false)
    }

    /// Load seed data into every newly created tenant.
    pub fn seed_after_create(&self) -> bool {
        self.seed_after_create.unwrap_or(false)
    }

    /// Prefix physical store names with the environment name.
    pub fn prepend_environment(&self) -> bool {
        self.prepend_environment.unwrap_or(false)
    }

    /// Suffix physical store names with the environment name.
    pub fn append_environment(&self) -> bool {
        self.append_environment.unwrap_or(false)
    }

    /// Environment name used by the prepend/append settings.
    pub fn environment(&self) -> &str {
        self.environment.as_deref().unwrap_or(DEFAULT_ENVIRONMENT)
    }

    /// Models (tables) that always live in the default schema.
    pub fn excluded_models(&self) -> &[String] {
        self.excluded_models.as_deref().unwrap_or(&[])
    }

    /// Schemas shared by every tenant; never created or dropped per tenant.
    pub fn persistent_schemas(&self) -> &[String] {
        self.persistent_schemas.as_deref().unwrap_or(&[])
    }

    /// Number of labels in the top-level domain, for host-based tenant lookup.
    pub fn tld_length(&self) -> usize {
        self.tld_length.unwrap_or(DEFAULT_TLD_LENGTH)
    }

    /// Whether bare identifiers are qualified with the active tenant.
    pub fn allow_prepend_tenant_name(&self) -> bool {
        self.allow_prepend_tenant_name.unwrap_or(false)
    }

    /// Upper bound on concurrent per-tenant tasks; `0` runs them serially.
    pub fn parallel_migration_threads(&self) -> usize {
        self.parallel_migration_threads.unwrap_or(0)
    }

    /// Name of the connection handle sessions are opened from.
    pub fn connection_class(&self) -> &str {
        self.connection_class
            .as_deref()
            .unwrap_or(DEFAULT_CONNECTION_CLASS)
    }

    /// Schema definition loaded into new tenants, if any.
    pub fn database_schema_file(&self) -> Option<&Path> {
        self.database_schema_file.as_deref()
    }

    /// Seed data loaded when `seed_after_create` is on.
    pub fn seed_data_file(&self) -> &Path {
        self.seed_data_file
            .as_deref()
            .unwrap_or_else(|| Path::new(DEFAULT_SEED_DATA_FILE))
    }

    /// Returns `true` if `name` is the default schema or a persistent schema.
    pub fn is_persistent(&self, name: &str) -> bool {
        name == self.default_schema() || self.persistent_schemas().iter().any(|s| s == name)
    }

    /// Returns `true` if `model` is excluded from tenant scoping.
    pub fn is_excluded(&self, model: &str) -> bool {
        self.excluded_models().iter().any(|m| m == model)
    }
}

// Setters replace the stored value.
#[allow(missing_docs)]
impl TenancyConfig {
    pub fn set_default_schema(&mut self, schema: impl Into<String>) -> &mut Self {
        self.default_schema = Some(schema.into());
        self
    }

    pub fn set_strategy(&mut self, strategy: SwitchStrategy) -> &mut Self {
        self.strategy = Some(strategy);
        self
    }

    pub fn set_use_sql(&mut self, enabled: bool) -> &mut Self {
        self.use_sql = Some(enabled);
        self
    }

    pub fn set_seed_after_create(&mut self, enabled: bool) -> &mut Self {
        self.seed_after_create = Some(enabled);
        self
    }

    pub fn set_prepend_environment(&mut self, enabled: bool) -> &mut Self {
        self.prepend_environment = Some(enabled);
        self
    }

    pub fn set_append_environment(&mut self, enabled: bool) -> &mut Self {
        self.append_environment = Some(enabled);
        self
    }

    pub fn set_environment(&mut self, environment: impl Into<String>) -> &mut Self {
        self.environment = Some(environment.into());
        self
    }

    pub fn set_excluded_models(&mut self, models: Vec<String>) -> &mut Self {
        self.excluded_models = Some(models);
        self
    }

    pub fn set_persistent_schemas(&mut self, schemas: Vec<String>) -> &mut Self {
        self.persistent_schemas = Some(schemas);
        self
    }

    pub fn set_tld_length(&mut self, length: usize) -> &mut Self {
        self.tld_length = Some(length);
        self
    }

    pub fn set_allow_prepend_tenant_name(&mut self, enabled: bool) -> &mut Self {
        self.allow_prepend_tenant_name = Some(enabled);
        self
    }

    pub fn set_parallel_migration_threads(&mut self, threads: usize) -> &mut Self {
        self.parallel_migration_threads = Some(threads);
        self
    }

    pub fn set_connection_class(&mut self, class: impl Into<String>) -> &mut Self {
        self.connection_class = Some(class.into());
        self
    }

    pub fn set_database_schema_file(&mut self, path: impl Into<PathBuf>) -> &mut Self {
        self.database_schema_file = Some(path.into());
        self
    }

    pub fn set_seed_data_file(&mut self, path: impl Into<PathBuf>) -> &mut Self {
        self.seed_data_file = Some(path.into());
        self
    }

    /// Returns a single field to unset, so its getter reports the default.
    pub fn unset(&mut self, field: ConfigField) -> &mut Self {
        match field {
            ConfigField::DefaultSchema => self.default_schema = None,
            ConfigField::Strategy => self.strategy = None,
            ConfigField::UseSql => self.use_sql = None,
            ConfigField::SeedAfterCreate => self.seed_after_create = None,
            ConfigField::PrependEnvironment => self.prepend_environment = None,
            ConfigField::AppendEnvironment => self.append_environment = None,
            ConfigField::Environment => self.environment = None,
            ConfigField::ExcludedModels => self.excluded_models = None,
            ConfigField::PersistentSchemas => self.persistent_schemas = None,
            ConfigField::TldLength => self.tld_length = None,
            ConfigField::AllowPrependTenantName => self.allow_prepend_tenant_name = None,
            ConfigField::ParallelMigrationThreads => self.parallel_migration_threads = None,
            ConfigField::ConnectionClass => self.connection_class = None,
            ConfigField::DatabaseSchemaFile => self.database_schema_file = None,
            ConfigField::SeedDataFile => self.seed_data_file = None,
        }
        self
    }

    /// Returns every field to unset.
    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

struct GlobalConfig {
    current: ArcSwap<TenancyConfig>,
    writer: Mutex<()>,
}

static GLOBAL: LazyLock<GlobalConfig> = LazyLock::new(|| GlobalConfig {
    current: ArcSwap::from_pointee(TenancyConfig::default()),
    writer: Mutex::new(()),
});

/// Returns a snapshot of the process-wide configuration.
pub fn current() -> Arc<TenancyConfig> {
    GLOBAL.current.load_full()
}

/// Applies a batch of assignments to the process-wide configuration.
///
/// Readers observe either none or all of the batch.
pub fn configure<F>(f: F)
where
    F: FnOnce(&mut TenancyConfig),
{
    let _writer = GLOBAL.writer.lock();
    let mut next = TenancyConfig::clone(&GLOBAL.current.load());
    f(&mut next);
    debug!(config = ?next, "Tenancy configuration updated");
    GLOBAL.current.store(Arc::new(next));
}

/// Replaces the process-wide configuration.
pub fn replace(config: TenancyConfig) {
    let _writer = GLOBAL.writer.lock();
    GLOBAL.current.store(Arc::new(config));
}

/// Returns every process-wide field to unset.
pub fn reset() {
    replace(TenancyConfig::default());
}
