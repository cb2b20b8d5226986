//! The tenancy engine.
//!
//! [`Tenancy`] holds the pieces every session needs (a store connector, the
//! tenant registry and a configuration snapshot) and hands out independent
//! [`TenantSession`]s. It is cheap to clone and safe to share between tasks.

use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::config::{self, TenancyConfig};
use crate::connection::ConnectionResolver;
use crate::context::TenantSession;
use crate::error::{StoreError, TenancyResult};
use crate::id::TenantId;
use crate::registry::TenantRegistry;
use crate::store::StoreConnector;

/// Outcome of running work in one tenant.
pub type TenantOutcome<T> = (TenantId, TenancyResult<T>);

/// Entry point tying a store connector, a registry and configuration together.
///
/// # Examples
///
/// ```
/// use helios_tenancy::{ConnectionParams, Tenancy, TenancyConfig, TenantRegistry, TenantSource};
/// use helios_tenancy::store::MemoryCatalog;
///
/// # tokio_test_main(async {
/// let catalog = MemoryCatalog::with_stores(["acme", "globex"]);
/// let registry = TenantRegistry::new(
///     TenantSource::list(["acme", "globex"]).unwrap(),
///     ConnectionParams::new(),
/// );
/// let tenancy = Tenancy::new(catalog, registry).with_config(TenancyConfig::new());
///
/// let visited = tenancy
///     .each_tenant(|session| {
///         Box::pin(async move { Ok(session.current_name().to_string()) })
///     })
///     .await
///     .unwrap();
/// assert_eq!(visited.len(), 2);
/// # });
/// # fn tokio_test_main<F: std::future::Future>(f: F) {
/// #     tokio::runtime::Builder::new_multi_thread().build().unwrap().block_on(f);
/// # }
/// ```
pub struct Tenancy<C: StoreConnector> {
    connector: Arc<C>,
    resolver: ConnectionResolver,
    config: Arc<TenancyConfig>,
}

impl<C: StoreConnector> Clone for Tenancy<C> {
    fn clone(&self) -> Self {
        Self {
            connector: Arc::clone(&self.connector),
            resolver: self.resolver.clone(),
            config: Arc::clone(&self.config),
        }
    }
}

impl<C: StoreConnector> std::fmt::Debug for Tenancy<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tenancy")
            .field("registry", self.resolver.registry())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<C: StoreConnector + 'static> Tenancy<C> {
    /// Creates an engine using the process-wide configuration as of now.
    pub fn new(connector: C, registry: TenantRegistry) -> Self {
        Self {
            connector: Arc::new(connector),
            resolver: ConnectionResolver::new(Arc::new(registry)),
            config: config::current(),
        }
    }

    /// Replaces the configuration snapshot.
    #[must_use]
    pub fn with_config(mut self, config: TenancyConfig) -> Self {
        self.config = Arc::new(config);
        self
    }

    /// Returns the configuration snapshot.
    pub fn config(&self) -> &TenancyConfig {
        &self.config
    }

    /// Returns the tenant registry.
    pub fn registry(&self) -> &TenantRegistry {
        self.resolver.registry()
    }

    /// Returns the connection resolver.
    pub fn resolver(&self) -> &ConnectionResolver {
        &self.resolver
    }

    /// Returns the store connector.
    pub fn connector(&self) -> &C {
        &self.connector
    }

    /// Opens a new session on a fresh connection, in the `Unset` state.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the connection cannot be opened, or
    /// [`TenancyError::AdapterNotFound`](crate::TenancyError::AdapterNotFound)
    /// if the store does not support the configured strategy.
    pub async fn session(&self) -> TenancyResult<TenantSession<C::Store>> {
        let store = self.connector.connect().await?;
        TenantSession::new(store, self.resolver.clone(), Arc::clone(&self.config))
    }

    /// Returns the registered tenant identities.
    pub async fn tenants(&self) -> TenancyResult<Vec<TenantId>> {
        self.registry().list_tenant_identities().await
    }

    /// Runs `f` once per registered tenant, each in its own session.
    ///
    /// With `parallel_migration_threads == 0` tenants are visited one after
    /// another on the calling task. Otherwise each tenant runs on a spawned
    /// task, at most that many at a time. A failure in one tenant does not
    /// stop the others; outcomes are returned in registry order.
    ///
    /// # Errors
    ///
    /// Only enumeration failures are returned as `Err`. Per-tenant failures
    /// are reported in the outcome list.
    ///
    /// # Panics
    ///
    /// A panic inside `f` on a spawned task is resumed on the caller.
    pub async fn each_tenant<T, F>(&self, f: F) -> TenancyResult<Vec<TenantOutcome<T>>>
    where
        F: for<'a> Fn(&'a mut TenantSession<C::Store>) -> BoxFuture<'a, TenancyResult<T>>
            + Send
            + Sync
            + 'static,
        T: Send + 'static,
    {
        let tenants = self.tenants().await?;
        let threads = self.config.parallel_migration_threads();
        info!(tenants = tenants.len(), threads, "Running across tenants");

        let outcomes = if threads == 0 {
            let mut outcomes = Vec::with_capacity(tenants.len());
            for id in tenants {
                let result = self.run_in(&id, &f).await;
                outcomes.push((id, result));
            }
            outcomes
        } else {
            self.run_parallel(tenants, threads, f).await
        };

        for (id, result) in &outcomes {
            if let Err(err) = result {
                warn!(tenant = %id, error = %err, "Tenant run failed");
            }
        }
        Ok(outcomes)
    }

    async fn run_parallel<T, F>(
        &self,
        tenants: Vec<TenantId>,
        threads: usize,
        f: F,
    ) -> Vec<TenantOutcome<T>>
    where
        F: for<'a> Fn(&'a mut TenantSession<C::Store>) -> BoxFuture<'a, TenancyResult<T>>
            + Send
            + Sync
            + 'static,
        T: Send + 'static,
    {
        let semaphore = Arc::new(Semaphore::new(threads));
        let f = Arc::new(f);
        let mut set = JoinSet::new();

        for (index, id) in tenants.into_iter().enumerate() {
            let semaphore = Arc::clone(&semaphore);
            let engine = self.clone();
            let f = Arc::clone(&f);
            set.spawn(async move {
                let result = match semaphore.acquire_owned().await {
                    Ok(_permit) => engine.run_in(&id, f.as_ref()).await,
                    Err(closed) => Err(StoreError::Internal {
                        store: "tenancy".to_string(),
                        message: closed.to_string(),
                        source: Some(Box::new(closed)),
                    }
                    .into()),
                };
                (index, id, result)
            });
        }

        let mut outcomes = Vec::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
                Err(err) => warn!(error = %err, "Tenant task cancelled"),
            }
        }
        outcomes.sort_by_key(|(index, _, _)| *index);
        outcomes
            .into_iter()
            .map(|(_, id, result)| (id, result))
            .collect()
    }

    async fn run_in<T, F>(&self, id: &TenantId, f: &F) -> TenancyResult<T>
    where
        F: for<'a> Fn(&'a mut TenantSession<C::Store>) -> BoxFuture<'a, TenancyResult<T>>,
    {
        debug!(tenant = %id, "Opening tenant session");
        let mut session = self.session().await?;
        session.with_tenant(id.as_str(), |s| f(s)).await
    }
}
