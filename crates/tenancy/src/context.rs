//! Per-unit-of-work tenant context.
//!
//! A [`TenantSession`] owns one store connection exclusively and records which
//! tenant that connection is switched to. Switching operations take
//! `&mut self`, so a session cannot be shared by two concurrently running
//! units of work; give each request or task its own session instead (see
//! [`Tenancy::session`](crate::Tenancy::session)).
//!
//! # State Machine
//!
//! ```text
//!            switch(id)                switch(other)
//!   Unset ─────────────▶ Active(id) ─────────────────▶ Active(other)
//!     ▲                      │
//!     └──────── reset() ─────┘
//! ```
//!
//! Failed switches leave the state unchanged.
//!
//! # Scoped Switching
//!
//! [`TenantSession::with_tenant`] and [`TenantSession::enter`] switch for the
//! duration of a scope and restore the previous state afterwards. If a scope
//! is abandoned without restoring (a panic, or the future being dropped), the
//! session clears its active tenant and resets the connection before it is
//! used again.
//!
//! ```
//! use std::sync::Arc;
//! use helios_tenancy::{ConnectionResolver, TenancyConfig, TenantRegistry, TenantSession};
//! use helios_tenancy::store::MemoryCatalog;
//!
//! # tokio_test_main(async {
//! let catalog = MemoryCatalog::with_stores(["acme"]);
//! let resolver = ConnectionResolver::new(Arc::new(TenantRegistry::default()));
//! let mut session =
//!     TenantSession::new(catalog.store(), resolver, Arc::new(TenancyConfig::new())).unwrap();
//!
//! let name = session
//!     .with_tenant("acme", |s| {
//!         Box::pin(async move { Ok(s.current_name().to_string()) })
//!     })
//!     .await
//!     .unwrap();
//! assert_eq!(name, "acme");
//! assert!(session.current().is_none());
//! # });
//! # fn tokio_test_main<F: std::future::Future>(f: F) {
//! #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f);
//! # }
//! ```

use std::future::Future;
use std::ops::{Deref, DerefMut};
use std::path::Path;
use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::{debug, info, warn};

use crate::config::TenancyConfig;
use crate::connection::{ConnectionParams, ConnectionResolver};
use crate::error::{StoreError, TenancyError, TenancyResult};
use crate::id::TenantId;
use crate::naming;
use crate::store::{CloneStrategy, SwitchTarget, TenantStore};

tokio::task_local! {
    static CURRENT_TENANT: TenantId;
}

/// Returns the tenant of the innermost enclosing scoped switch on this task.
///
/// Returns `None` outside [`TenantSession::with_tenant`] and
/// [`scope_tenant`]. Unscoped [`TenantSession::switch`] calls are not visible
/// here; ask the session instead.
pub fn current_tenant() -> Option<TenantId> {
    CURRENT_TENANT.try_with(Clone::clone).ok()
}

/// Runs `future` with `tenant` visible through [`current_tenant`].
///
/// Useful for carrying the active tenant into tasks spawned from inside a
/// scoped switch.
pub async fn scope_tenant<F: Future>(tenant: TenantId, future: F) -> F::Output {
    CURRENT_TENANT.scope(tenant, future).await
}

/// The tenant a session is switched to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ActiveTenant {
    /// Connected to the baseline store.
    #[default]
    Unset,
    /// Connected to the given tenant's store.
    Active(TenantId),
}

impl ActiveTenant {
    /// Returns the active tenant, if any.
    pub fn tenant(&self) -> Option<&TenantId> {
        match self {
            ActiveTenant::Unset => None,
            ActiveTenant::Active(id) => Some(id),
        }
    }

    /// Returns `true` if no tenant is active.
    pub fn is_unset(&self) -> bool {
        matches!(self, ActiveTenant::Unset)
    }
}

/// One unit of work's exclusively owned, tenant-switchable connection.
pub struct TenantSession<S: TenantStore> {
    store: S,
    resolver: ConnectionResolver,
    config: Arc<TenancyConfig>,
    active: ActiveTenant,
    /// Set when a scope was abandoned while switched.
    needs_reset: bool,
}

impl<S: TenantStore> TenantSession<S> {
    /// Creates a session over `store`, starting in the `Unset` state.
    ///
    /// # Errors
    ///
    /// Returns [`TenancyError::AdapterNotFound`] if the store cannot isolate
    /// tenants with the configured strategy.
    pub fn new(
        store: S,
        resolver: ConnectionResolver,
        config: Arc<TenancyConfig>,
    ) -> TenancyResult<Self> {
        let strategy = config.strategy();
        if !store.supports(strategy) {
            return Err(TenancyError::AdapterNotFound {
                adapter: store.kind().to_string(),
                strategy: strategy.to_string(),
            });
        }

        Ok(Self {
            store,
            resolver,
            config,
            active: ActiveTenant::Unset,
            needs_reset: false,
        })
    }

    /// Returns the active tenant, or `None` when unset.
    pub fn current(&self) -> Option<&TenantId> {
        self.active.tenant()
    }

    /// Returns the session state.
    pub fn active(&self) -> &ActiveTenant {
        &self.active
    }

    /// Returns the active tenant's name, or the default schema when unset.
    pub fn current_name(&self) -> &str {
        self.active
            .tenant()
            .map_or(self.config.default_schema(), TenantId::as_str)
    }

    /// Returns the configuration snapshot this session runs with.
    pub fn config(&self) -> &TenancyConfig {
        &self.config
    }

    /// Returns the resolver this session consults.
    pub fn resolver(&self) -> &ConnectionResolver {
        &self.resolver
    }

    /// Returns the underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Returns the underlying store for running statements.
    ///
    /// Switching the store directly bypasses the session's bookkeeping.
    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    /// Qualifies `identifier` with the active tenant when configured.
    ///
    /// See [`naming::qualify`].
    pub fn qualify(&self, identifier: &str) -> String {
        naming::qualify(identifier, self.current(), &self.config)
    }

    /// Switches to `tenant`.
    ///
    /// # Errors
    ///
    /// - [`TenancyError::InvalidTenant`] for an empty identity
    /// - [`TenancyError::TenantNotFound`] if a tenant source is configured and
    ///   does not list `tenant`, or the tenant's store does not exist
    /// - [`TenancyError::Storage`] if the store fails otherwise
    ///
    /// On error the active tenant is unchanged.
    pub async fn switch(&mut self, tenant: &str) -> TenancyResult<()> {
        self.reset_if_abandoned().await?;
        let id = TenantId::parse(tenant)?;

        // One evaluation serves both the membership check and the params.
        let registry = self.resolver.registry();
        let params = if registry.is_configured() {
            match registry.tenants_with_config().await?.get(id.as_str()) {
                Some(params) => params.clone(),
                None => return Err(TenancyError::tenant_not_found(id.as_str())),
            }
        } else {
            registry.baseline().clone()
        };

        self.switch_with(id, params).await
    }

    /// Switches back to the baseline store.
    ///
    /// # Errors
    ///
    /// Returns [`TenancyError::Storage`] if the store cannot be reached.
    pub async fn reset(&mut self) -> TenancyResult<()> {
        self.store.switch_to_baseline().await?;
        self.needs_reset = false;
        if let Some(previous) = self.active.tenant() {
            debug!(tenant = %previous, "Reset to baseline");
        }
        self.active = ActiveTenant::Unset;
        Ok(())
    }

    /// Returns `true` if the physical store for `tenant` exists.
    pub async fn exists(&mut self, tenant: &str) -> TenancyResult<bool> {
        self.reset_if_abandoned().await?;
        let id = TenantId::parse(tenant)?;
        let name = naming::store_name(&id, &self.config);
        Ok(self.store.store_exists(&name).await?)
    }

    /// Provisions the schema or database for `tenant`.
    ///
    /// The store is populated according to the configuration: a raw SQL
    /// copy of the default schema when `use_sql` is set, else the schema
    /// definition file when one is configured, else nothing. With
    /// `seed_after_create` the seed file is then run inside the new tenant and
    /// the previous state restored.
    ///
    /// # Errors
    ///
    /// - [`TenancyError::TenantExists`] if the store already exists
    /// - [`TenancyError::FileNotFound`] if a configured schema or seed file
    ///   is missing; checked before anything is created
    pub async fn create(&mut self, tenant: &str) -> TenancyResult<()> {
        self.reset_if_abandoned().await?;
        let id = TenantId::parse(tenant)?;
        let name = naming::store_name(&id, &self.config);

        if self.store.store_exists(&name).await? {
            return Err(TenancyError::TenantExists {
                tenant: id.to_string(),
            });
        }

        let clone = self.clone_strategy().await?;
        let seed = if self.config.seed_after_create() {
            let path = self.config.seed_data_file().to_path_buf();
            require_file(&path).await?;
            Some(path)
        } else {
            None
        };

        let params = self.resolver.connection_params_for(id.as_str()).await?;
        self.store
            .create_tenant_store(&name, &params, &clone)
            .await
            .map_err(|err| match err {
                StoreError::AlreadyExists { .. } => TenancyError::TenantExists {
                    tenant: id.to_string(),
                },
                other => TenancyError::Storage(other),
            })?;
        info!(tenant = %id, store = %name, clone = %clone, "Created tenant store");

        if let Some(path) = seed {
            let previous = self.active.clone();
            self.switch_unchecked(id.clone()).await?;
            let guard = TenantGuard::new(self, previous, id.clone());
            let seeded = guard.session.store.load_seed(&path).await;
            let restored = guard.exit().await;
            seeded?;
            restored?;
            info!(tenant = %id, seed = %path.display(), "Seeded tenant store");
        }

        Ok(())
    }

    /// Removes the schema or database for `tenant`.
    ///
    /// If `tenant` is active the session resets to the baseline first.
    ///
    /// # Errors
    ///
    /// - [`TenancyError::PersistentTenant`] for the default schema or a
    ///   persistent schema, whether or not it exists
    /// - [`TenancyError::TenantNotFound`] if the store does not exist
    pub async fn drop(&mut self, tenant: &str) -> TenancyResult<()> {
        self.reset_if_abandoned().await?;
        let id = TenantId::parse(tenant)?;
        let name = naming::store_name(&id, &self.config);

        if self.config.is_persistent(id.as_str()) || self.config.is_persistent(&name) {
            return Err(TenancyError::PersistentTenant {
                tenant: id.to_string(),
            });
        }

        if !self.store.store_exists(&name).await? {
            return Err(TenancyError::tenant_not_found(id.as_str()));
        }

        if self.current() == Some(&id) {
            self.reset().await?;
        }

        self.store
            .drop_tenant_store(&name)
            .await
            .map_err(|err| not_found_as_tenant(err, &id))?;
        info!(tenant = %id, store = %name, "Dropped tenant store");
        Ok(())
    }

    /// Runs `f` switched to `tenant`, then restores the previous state.
    ///
    /// The previous state is restored whether `f` succeeds or fails. While
    /// `f` runs, [`current_tenant`] returns `tenant` on this task.
    ///
    /// # Errors
    ///
    /// Returns the switch error, `f`'s error, or the restore error, in that
    /// order of precedence.
    pub async fn with_tenant<T, F>(&mut self, tenant: &str, f: F) -> TenancyResult<T>
    where
        F: for<'a> FnOnce(&'a mut TenantSession<S>) -> BoxFuture<'a, TenancyResult<T>>,
    {
        let mut guard = self.enter(tenant).await?;
        let id = guard.tenant().clone();
        let result = scope_tenant(id, f(&mut *guard)).await;
        let restored = guard.exit().await;

        match (result, restored) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(err)) => Err(err),
            (Err(err), restored) => {
                if let Err(restore_err) = restored {
                    warn!(error = %restore_err, "Failed to restore tenant after error");
                }
                Err(err)
            }
        }
    }

    /// Switches to `tenant` and returns a guard that restores the previous
    /// state on [`TenantGuard::exit`].
    ///
    /// # Errors
    ///
    /// Same as [`TenantSession::switch`].
    pub async fn enter(&mut self, tenant: &str) -> TenancyResult<TenantGuard<'_, S>> {
        let previous = self.active.clone();
        self.switch(tenant).await?;
        let id = match self.active.tenant() {
            Some(id) => id.clone(),
            None => TenantId::parse(tenant)?,
        };
        Ok(TenantGuard::new(self, previous, id))
    }

    async fn switch_unchecked(&mut self, id: TenantId) -> TenancyResult<()> {
        let params = self.resolver.connection_params_for(id.as_str()).await?;
        self.switch_with(id, params).await
    }

    async fn switch_with(&mut self, id: TenantId, params: ConnectionParams) -> TenancyResult<()> {
        let name = naming::store_name(&id, &self.config);
        if !self.store.store_exists(&name).await? {
            return Err(TenancyError::tenant_not_found(id.as_str()));
        }

        let mut search_path = vec![name.clone()];
        search_path.extend(
            self.config
                .persistent_schemas()
                .iter()
                .filter(|schema| **schema != name)
                .cloned(),
        );

        let target = SwitchTarget {
            tenant: id,
            store_name: name,
            params,
            search_path,
        };
        self.store
            .switch_to(&target)
            .await
            .map_err(|err| not_found_as_tenant(err, &target.tenant))?;

        debug!(tenant = %target.tenant, store = %target.store_name, "Switched tenant");
        self.active = ActiveTenant::Active(target.tenant);
        Ok(())
    }

    async fn restore(&mut self, previous: ActiveTenant) -> TenancyResult<()> {
        match previous {
            ActiveTenant::Unset => self.reset().await,
            ActiveTenant::Active(id) => {
                if let Err(err) = self.switch_unchecked(id.clone()).await {
                    warn!(tenant = %id, error = %err, "Failed to restore previous tenant, resetting");
                    self.reset().await?;
                    return Err(err);
                }
                Ok(())
            }
        }
    }

    async fn reset_if_abandoned(&mut self) -> TenancyResult<()> {
        if self.needs_reset {
            debug!("Resetting connection left switched by an abandoned scope");
            self.reset().await?;
        }
        Ok(())
    }

    async fn clone_strategy(&self) -> TenancyResult<CloneStrategy> {
        if self.config.use_sql() {
            return Ok(CloneStrategy::CopyFrom {
                source: self.config.default_schema().to_string(),
            });
        }

        match self.config.database_schema_file() {
            Some(path) => {
                require_file(path).await?;
                Ok(CloneStrategy::SchemaFile(path.to_path_buf()))
            }
            None => Ok(CloneStrategy::Empty),
        }
    }
}

impl<S: TenantStore> std::fmt::Debug for TenantSession<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TenantSession")
            .field("store", &self.store.kind())
            .field("active", &self.active)
            .field("needs_reset", &self.needs_reset)
            .finish()
    }
}

fn not_found_as_tenant(err: StoreError, tenant: &TenantId) -> TenancyError {
    if err.is_not_found() {
        TenancyError::tenant_not_found(tenant.as_str())
    } else {
        TenancyError::Storage(err)
    }
}

async fn require_file(path: &Path) -> TenancyResult<()> {
    match tokio::fs::try_exists(path).await {
        Ok(true) => Ok(()),
        _ => Err(TenancyError::FileNotFound {
            path: path.to_path_buf(),
        }),
    }
}

/// A scoped switch returned by [`TenantSession::enter`].
///
/// Dereferences to the session. Call [`TenantGuard::exit`] to restore the
/// previous state; dropping the guard instead clears the active tenant and
/// makes the session reset its connection before the next operation.
pub struct TenantGuard<'s, S: TenantStore> {
    session: &'s mut TenantSession<S>,
    previous: ActiveTenant,
    tenant: TenantId,
    armed: bool,
}

impl<'s, S: TenantStore> TenantGuard<'s, S> {
    fn new(session: &'s mut TenantSession<S>, previous: ActiveTenant, tenant: TenantId) -> Self {
        Self {
            session,
            previous,
            tenant,
            armed: true,
        }
    }

    /// Returns the tenant this guard switched to.
    pub fn tenant(&self) -> &TenantId {
        &self.tenant
    }

    /// Restores the state the session had before the guard was created.
    ///
    /// # Errors
    ///
    /// Returns the error from switching back. If the previous tenant can no
    /// longer be reached the session is reset to the baseline.
    pub async fn exit(mut self) -> TenancyResult<()> {
        let previous = std::mem::take(&mut self.previous);
        let restored = self.session.restore(previous).await;
        if restored.is_ok() || (self.session.active.is_unset() && !self.session.needs_reset) {
            self.armed = false;
        }
        restored
    }
}

impl<S: TenantStore> Deref for TenantGuard<'_, S> {
    type Target = TenantSession<S>;

    fn deref(&self) -> &Self::Target {
        self.session
    }
}

impl<S: TenantStore> DerefMut for TenantGuard<'_, S> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.session
    }
}

impl<S: TenantStore> Drop for TenantGuard<'_, S> {
    fn drop(&mut self) {
        if self.armed {
            warn!(tenant = %self.tenant, "Tenant scope abandoned, connection will be reset");
            self.session.active = ActiveTenant::Unset;
            self.session.needs_reset = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::config::SwitchStrategy;
    use crate::registry::{TenantListing, TenantRegistry, TenantSource};
    use crate::store::{MemoryCatalog, MemoryStore};

    fn session_with(
        catalog: &MemoryCatalog,
        source: Option<TenantSource>,
        config: TenancyConfig,
    ) -> TenantSession<MemoryStore> {
        let registry = match source {
            Some(source) => TenantRegistry::new(source, ConnectionParams::new()),
            None => TenantRegistry::unset(ConnectionParams::new()),
        };
        let resolver = ConnectionResolver::new(Arc::new(registry));
        TenantSession::new(catalog.store(), resolver, Arc::new(config)).unwrap()
    }

    fn session(catalog: &MemoryCatalog) -> TenantSession<MemoryStore> {
        session_with(catalog, None, TenancyConfig::new())
    }

    #[tokio::test]
    async fn test_switch_and_reset() {
        let catalog = MemoryCatalog::with_stores(["acme"]);
        let mut session = session(&catalog);

        session.switch("acme").await.unwrap();
        assert_eq!(session.current().map(TenantId::as_str), Some("acme"));
        assert_eq!(session.store().current(), Some("acme"));

        session.reset().await.unwrap();
        assert!(session.active().is_unset());
        assert_eq!(session.store().current(), None);
        assert_eq!(session.current_name(), "public");
    }

    #[tokio::test]
    async fn test_switch_unknown_keeps_state() {
        let catalog = MemoryCatalog::with_stores(["acme"]);
        let mut session = session(&catalog);
        session.switch("acme").await.unwrap();

        let err = session.switch("ghost").await.unwrap_err();
        assert!(matches!(err, TenancyError::TenantNotFound { .. }));
        assert_eq!(session.current().map(TenantId::as_str), Some("acme"));
    }

    #[tokio::test]
    async fn test_switch_requires_registry_entry() {
        let catalog = MemoryCatalog::with_stores(["acme", "orphan"]);
        let source = TenantSource::list(["acme"]).unwrap();
        let mut session = session_with(&catalog, Some(source), TenancyConfig::new());

        session.switch("acme").await.unwrap();
        let err = session.switch("orphan").await.unwrap_err();
        assert!(matches!(err, TenancyError::TenantNotFound { .. }));
    }

    #[tokio::test]
    async fn test_switch_evaluates_source_once() {
        let catalog = MemoryCatalog::with_stores(["acme"]);
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        // Lists acme on the first evaluation only.
        let source = TenantSource::from_fn(move || {
            let ids = if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                vec![TenantId::parse("acme")?]
            } else {
                Vec::new()
            };
            Ok(TenantListing::List(ids))
        });
        let mut session = session_with(&catalog, Some(source), TenancyConfig::new());

        session.switch("acme").await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(session.store().current(), Some("acme"));
    }

    #[tokio::test]
    async fn test_switch_permission_denied_is_storage_error() {
        let catalog = MemoryCatalog::with_stores(["acme"]);
        catalog.deny_switch("acme");
        let mut session = session(&catalog);

        let err = session.switch("acme").await.unwrap_err();
        assert!(err.is_storage());
        assert!(session.active().is_unset());
    }

    #[tokio::test]
    async fn test_blank_identity_is_invalid() {
        let catalog = MemoryCatalog::new();
        let mut session = session(&catalog);
        let err = session.switch("   ").await.unwrap_err();
        assert!(matches!(err, TenancyError::InvalidTenant { .. }));
    }

    #[tokio::test]
    async fn test_unsupported_strategy() {
        let catalog = MemoryCatalog::new().only(SwitchStrategy::Database);
        let mut config = TenancyConfig::new();
        config.set_strategy(SwitchStrategy::Schema);
        let resolver = ConnectionResolver::new(Arc::new(TenantRegistry::default()));

        let err = TenantSession::new(catalog.store(), resolver, Arc::new(config)).unwrap_err();
        assert!(matches!(err, TenancyError::AdapterNotFound { .. }));
    }

    #[tokio::test]
    async fn test_schema_search_path_includes_persistent_schemas() {
        let catalog = MemoryCatalog::with_stores(["acme"]);
        let mut config = TenancyConfig::new();
        config
            .set_strategy(SwitchStrategy::Schema)
            .set_persistent_schemas(vec!["shared".to_string(), "extensions".to_string()]);
        let mut session = session_with(&catalog, None, config);

        session.switch("acme").await.unwrap();
        assert_eq!(
            session.store().search_path(),
            ["acme", "shared", "extensions"]
        );
    }

    #[tokio::test]
    async fn test_with_tenant_restores_previous_tenant() {
        let catalog = MemoryCatalog::with_stores(["acme", "globex"]);
        let mut session = session(&catalog);
        session.switch("acme").await.unwrap();

        let seen = session
            .with_tenant("globex", |s| {
                Box::pin(async move {
                    let task_local = current_tenant().map(|t| t.to_string());
                    Ok((s.current_name().to_string(), task_local))
                })
            })
            .await
            .unwrap();

        assert_eq!(seen, ("globex".to_string(), Some("globex".to_string())));
        assert_eq!(session.current().map(TenantId::as_str), Some("acme"));
        assert_eq!(session.store().current(), Some("acme"));
        assert!(current_tenant().is_none());
    }

    #[tokio::test]
    async fn test_with_tenant_restores_after_error() {
        let catalog = MemoryCatalog::with_stores(["acme"]);
        let mut session = session(&catalog);

        let result: TenancyResult<()> = session
            .with_tenant("acme", |_| {
                Box::pin(async { Err(TenancyError::tenant_not_found("inner")) })
            })
            .await;

        assert!(result.is_err());
        assert!(session.active().is_unset());
        assert_eq!(session.store().current(), None);
    }

    #[tokio::test]
    async fn test_dropped_guard_forces_reset() {
        let catalog = MemoryCatalog::with_stores(["acme"]);
        let mut session = session(&catalog);

        {
            let guard = session.enter("acme").await.unwrap();
            assert_eq!(guard.current_name(), "acme");
        }

        assert!(session.active().is_unset());
        // Connection still points at the tenant until the next operation.
        assert_eq!(session.store().current(), Some("acme"));

        assert!(session.exists("acme").await.unwrap());
        assert_eq!(session.store().current(), None);
    }

    #[tokio::test]
    async fn test_guard_exit_restores() {
        let catalog = MemoryCatalog::with_stores(["acme"]);
        let mut session = session(&catalog);

        let guard = session.enter("acme").await.unwrap();
        guard.exit().await.unwrap();
        assert!(session.active().is_unset());
        assert_eq!(session.store().current(), None);
    }

    #[tokio::test]
    async fn test_create_twice_fails() {
        let catalog = MemoryCatalog::new();
        let mut session = session(&catalog);

        session.create("acme").await.unwrap();
        assert!(catalog.contains("acme"));
        let err = session.create("acme").await.unwrap_err();
        assert!(matches!(err, TenancyError::TenantExists { .. }));
    }

    #[tokio::test]
    async fn test_create_with_missing_schema_file() {
        let catalog = MemoryCatalog::new();
        let mut config = TenancyConfig::new();
        config.set_database_schema_file("/nonexistent/schema.sql");
        let mut session = session_with(&catalog, None, config);

        let err = session.create("acme").await.unwrap_err();
        assert!(matches!(err, TenancyError::FileNotFound { .. }));
        assert!(!catalog.contains("acme"));
    }

    #[tokio::test]
    async fn test_create_with_use_sql_copies_default_schema() {
        let catalog = MemoryCatalog::new();
        let mut config = TenancyConfig::new();
        config.set_use_sql(true);
        let mut session = session_with(&catalog, None, config);

        session.create("acme").await.unwrap();
        assert_eq!(
            catalog.clone_strategy("acme"),
            Some(CloneStrategy::CopyFrom {
                source: "public".to_string()
            })
        );
    }

    #[tokio::test]
    async fn test_create_with_environment_prefix() {
        let catalog = MemoryCatalog::new();
        let mut config = TenancyConfig::new();
        config
            .set_environment("test")
            .set_prepend_environment(true);
        let mut session = session_with(&catalog, None, config);

        session.create("acme").await.unwrap();
        assert!(catalog.contains("test_acme"));
        session.switch("acme").await.unwrap();
        assert_eq!(session.store().current(), Some("test_acme"));
    }

    #[tokio::test]
    async fn test_environment_prefix_keeps_tenants_apart() {
        let catalog = MemoryCatalog::new();
        let mut config = TenancyConfig::new();
        config
            .set_environment("test")
            .set_prepend_environment(true);
        let mut session = session_with(&catalog, None, config);

        session.create("acme").await.unwrap();
        let err = session.switch("test_acme").await.unwrap_err();
        assert!(matches!(err, TenancyError::TenantNotFound { .. }));
        assert!(session.active().is_unset());

        session.create("test_acme").await.unwrap();
        session.create("latest").await.unwrap();
        assert!(catalog.contains("test_test_acme"));
        assert!(catalog.contains("test_latest"));
        session.switch("test_acme").await.unwrap();
        assert_eq!(session.store().current(), Some("test_test_acme"));
    }

    #[tokio::test]
    async fn test_drop_refuses_persistent_schema() {
        let catalog = MemoryCatalog::with_stores(["shared"]);
        let mut config = TenancyConfig::new();
        config.set_persistent_schemas(vec!["shared".to_string()]);
        let mut session = session_with(&catalog, None, config);

        let err = session.drop("shared").await.unwrap_err();
        assert!(matches!(err, TenancyError::PersistentTenant { .. }));
        assert!(catalog.contains("shared"));

        let err = session.drop("public").await.unwrap_err();
        assert!(matches!(err, TenancyError::PersistentTenant { .. }));
    }

    #[tokio::test]
    async fn test_drop_active_tenant_resets_first() {
        let catalog = MemoryCatalog::with_stores(["acme"]);
        let mut session = session(&catalog);
        session.switch("acme").await.unwrap();

        session.drop("acme").await.unwrap();
        assert!(session.active().is_unset());
        assert!(!catalog.contains("acme"));

        let err = session.drop("acme").await.unwrap_err();
        assert!(matches!(err, TenancyError::TenantNotFound { .. }));
    }

    #[tokio::test]
    async fn test_reset_unreachable_store() {
        let catalog = MemoryCatalog::with_stores(["acme"]);
        let mut session = session(&catalog);
        session.switch("acme").await.unwrap();

        catalog.set_unreachable(true);
        let err = session.reset().await.unwrap_err();
        assert!(matches!(
            err,
            TenancyError::Storage(StoreError::ConnectionFailed { .. })
        ));
    }

    #[tokio::test]
    async fn test_qualify_uses_active_tenant() {
        let catalog = MemoryCatalog::with_stores(["acme"]);
        let mut config = TenancyConfig::new();
        config
            .set_strategy(SwitchStrategy::Schema)
            .set_allow_prepend_tenant_name(true);
        let mut session = session_with(&catalog, None, config);

        assert_eq!(session.qualify("orders"), "public.orders");
        session.switch("acme").await.unwrap();
        assert_eq!(session.qualify("orders"), "acme.orders");
        assert_eq!(session.qualify("public.orders"), "public.orders");
    }

    #[tokio::test]
    async fn test_qualify_matches_prefixed_schema() {
        let catalog = MemoryCatalog::new();
        let mut config = TenancyConfig::new();
        config
            .set_strategy(SwitchStrategy::Schema)
            .set_allow_prepend_tenant_name(true)
            .set_environment("prod")
            .set_prepend_environment(true);
        let mut session = session_with(&catalog, None, config);

        session.create("acme").await.unwrap();
        session.switch("acme").await.unwrap();
        assert_eq!(session.store().search_path(), ["prod_acme"]);
        assert_eq!(session.qualify("orders"), "prod_acme.orders");
    }
}
