//! Shared helpers for tenancy integration tests.

#![allow(dead_code)]

use std::path::{Path, PathBuf};

use helios_tenancy::store::MemoryCatalog;
#[cfg(feature = "sqlite")]
use helios_tenancy::store::{SqliteConnector, SqliteStoreConfig};
use helios_tenancy::{ConnectionParams, Tenancy, TenancyConfig, TenantRegistry, TenantSource};
#[cfg(feature = "sqlite")]
use tempfile::TempDir;

/// Baseline connection parameters used by every test registry.
pub fn baseline() -> ConnectionParams {
    ConnectionParams::new()
        .with("host", "localhost")
        .with("database", "app")
}

/// A registry listing the given tenants.
pub fn listed(tenants: &[&str]) -> TenantRegistry {
    TenantRegistry::new(TenantSource::list(tenants).unwrap(), baseline())
}

/// An in-memory engine whose catalog and registry both contain `tenants`.
pub fn memory_tenancy(
    tenants: &[&str],
    config: TenancyConfig,
) -> (MemoryCatalog, Tenancy<MemoryCatalog>) {
    let catalog = MemoryCatalog::with_stores(tenants.iter().copied());
    let tenancy = Tenancy::new(catalog.clone(), listed(tenants)).with_config(config);
    (catalog, tenancy)
}

/// A SQLite engine over a fresh temporary data directory.
#[cfg(feature = "sqlite")]
pub fn sqlite_tenancy(
    registry: TenantRegistry,
    config: TenancyConfig,
) -> (TempDir, Tenancy<SqliteConnector>) {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let connector = SqliteConnector::new(SqliteStoreConfig::new(dir.path().join("data")))
        .expect("Failed to create SQLite connector");
    let tenancy = Tenancy::new(connector, registry).with_config(config);
    (dir, tenancy)
}

/// Writes a SQL file into `dir` and returns its path.
pub fn write_sql(dir: &Path, name: &str, sql: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, sql).expect("Failed to write SQL file");
    path
}
