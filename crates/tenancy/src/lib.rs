//! Helios Tenancy
//!
//! This crate maps each tenant of an application to its own schema or its own
//! database inside one database server, and redirects data access to the
//! tenant currently in scope.
//!
//! # Features
//!
//! - **Tenant Registry**: static lists, static maps, or providers evaluated on every lookup
//! - **Two Strategies**: schema-per-tenant (`search_path`) and database-per-tenant (reconnect)
//! - **Scoped Switching**: the previous tenant is restored on every exit path
//! - **Identifier Qualification**: `orders` becomes `acme.orders` when enabled
//! - **Parallel Runs**: visit every tenant with bounded concurrency
//!
//! # Store Features
//!
//! ```toml
//! [dependencies]
//! helios-tenancy = { version = "0.1", features = ["postgres"] }
//! ```
//!
//! - `sqlite` (default) - one SQLite file per tenant
//! - `postgres` - one PostgreSQL schema per tenant
//!
//! # Architecture
//!
//! - [`error`] - Error taxonomy
//! - [`id`] - Tenant identities
//! - [`config`] - Process-wide configuration
//! - [`registry`] - Tenant sources and enumeration
//! - [`connection`] - Connection parameters and resolution
//! - [`naming`] - Identifier qualification and store naming
//! - [`context`] - Per-session active tenant and switching
//! - [`store`] - Storage capability traits and reference stores
//! - [`tenancy`] - The engine tying it together
//!
//! # Quick Start
//!
//! ```no_run
//! use helios_tenancy::{ConnectionParams, Tenancy, TenantRegistry, TenantSource};
//! use helios_tenancy::store::{SqliteConnector, SqliteStoreConfig};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! helios_tenancy::config::configure(|c| {
//!     c.set_seed_after_create(false);
//! });
//!
//! let connector = SqliteConnector::new(SqliteStoreConfig::new("data"))?;
//! let registry = TenantRegistry::new(
//!     TenantSource::provider(connector.tenant_provider("tenants")),
//!     ConnectionParams::new(),
//! );
//! let tenancy = Tenancy::new(connector, registry);
//!
//! let mut session = tenancy.session().await?;
//! session.create("acme").await?;
//! session
//!     .with_tenant("acme", |s| {
//!         Box::pin(async move {
//!             s.store()
//!                 .connection()
//!                 .execute_batch("CREATE TABLE orders (id INTEGER PRIMARY KEY)")
//!                 .map_err(helios_tenancy::StoreError::from)?;
//!             Ok(())
//!         })
//!     })
//!     .await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod config;
pub mod connection;
pub mod context;
pub mod error;
pub mod id;
pub mod naming;
pub mod registry;
pub mod store;
pub mod tenancy;

// Re-export commonly used types at crate root
pub use config::{SwitchStrategy, TenancyConfig};
pub use connection::{ConnectionParams, ConnectionResolver};
pub use context::{ActiveTenant, TenantGuard, TenantSession, current_tenant};
pub use error::{StoreError, StoreResult, TenancyError, TenancyResult};
pub use id::TenantId;
pub use registry::{TenantListing, TenantMap, TenantProvider, TenantRegistry, TenantSource};
pub use store::{CloneStrategy, StoreConnector, SwitchTarget, TenantStore};
pub use tenancy::{Tenancy, TenantOutcome};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name.
pub const NAME: &str = env!("CARGO_PKG_NAME");
