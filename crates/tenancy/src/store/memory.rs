//! In-process tenant store.
//!
//! A [`MemoryCatalog`] is a shared set of named stores; every [`MemoryStore`]
//! opened from it is an independent "connection" with its own selected store
//! and search path. Failures can be injected to exercise error paths.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{CloneStrategy, StoreConnector, SwitchTarget, TenantStore};
use crate::config::SwitchStrategy;
use crate::connection::ConnectionParams;
use crate::error::{StoreError, StoreResult};

const KIND: &str = "memory";

#[derive(Debug, Clone)]
struct StoreEntry {
    params: ConnectionParams,
    clone: CloneStrategy,
    seeds: Vec<PathBuf>,
}

#[derive(Debug, Default)]
struct CatalogState {
    stores: BTreeMap<String, StoreEntry>,
    denied: HashSet<String>,
    unreachable: bool,
    only: Option<SwitchStrategy>,
}

/// Shared catalog of in-memory stores.
#[derive(Debug, Clone, Default)]
pub struct MemoryCatalog {
    state: Arc<Mutex<CatalogState>>,
}

impl MemoryCatalog {
    /// Creates an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a catalog that already contains the named stores.
    pub fn with_stores<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let catalog = Self::new();
        for name in names {
            catalog.add_store(name);
        }
        catalog
    }

    /// Restricts stores opened from this catalog to one strategy.
    #[must_use]
    pub fn only(self, strategy: SwitchStrategy) -> Self {
        self.state.lock().only = Some(strategy);
        self
    }

    /// Adds an empty store.
    pub fn add_store(&self, name: impl Into<String>) {
        self.state.lock().stores.insert(
            name.into(),
            StoreEntry {
                params: ConnectionParams::new(),
                clone: CloneStrategy::Empty,
                seeds: Vec::new(),
            },
        );
    }

    /// Returns `true` if the named store exists.
    pub fn contains(&self, name: &str) -> bool {
        self.state.lock().stores.contains_key(name)
    }

    /// Returns the store names in order.
    pub fn stores(&self) -> Vec<String> {
        self.state.lock().stores.keys().cloned().collect()
    }

    /// Returns how the named store was populated.
    pub fn clone_strategy(&self, name: &str) -> Option<CloneStrategy> {
        self.state.lock().stores.get(name).map(|e| e.clone.clone())
    }

    /// Returns the parameters the named store was created with.
    pub fn params(&self, name: &str) -> Option<ConnectionParams> {
        self.state.lock().stores.get(name).map(|e| e.params.clone())
    }

    /// Returns the seed files run against the named store.
    pub fn seeds(&self, name: &str) -> Vec<PathBuf> {
        self.state
            .lock()
            .stores
            .get(name)
            .map(|e| e.seeds.clone())
            .unwrap_or_default()
    }

    /// Makes switching to the named store fail with a permission error.
    pub fn deny_switch(&self, name: impl Into<String>) {
        self.state.lock().denied.insert(name.into());
    }

    /// Makes every store operation fail as if the server were down.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.state.lock().unreachable = unreachable;
    }

    /// Opens a new connection to this catalog.
    pub fn store(&self) -> MemoryStore {
        MemoryStore {
            catalog: self.clone(),
            current: None,
            search_path: Vec::new(),
        }
    }

    fn check_reachable(&self) -> StoreResult<()> {
        if self.state.lock().unreachable {
            return Err(StoreError::ConnectionFailed {
                store: KIND.to_string(),
                message: "catalog unreachable".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl StoreConnector for MemoryCatalog {
    type Store = MemoryStore;

    async fn connect(&self) -> StoreResult<MemoryStore> {
        self.check_reachable()?;
        Ok(self.store())
    }
}

/// One connection to a [`MemoryCatalog`].
#[derive(Debug)]
pub struct MemoryStore {
    catalog: MemoryCatalog,
    current: Option<String>,
    search_path: Vec<String>,
}

impl MemoryStore {
    /// Returns the selected store, or `None` when on the baseline.
    pub fn current(&self) -> Option<&str> {
        self.current.as_deref()
    }

    /// Returns the search path set by the last switch.
    pub fn search_path(&self) -> &[String] {
        &self.search_path
    }

    /// Returns the catalog this connection belongs to.
    pub fn catalog(&self) -> &MemoryCatalog {
        &self.catalog
    }
}

#[async_trait]
impl TenantStore for MemoryStore {
    fn kind(&self) -> &'static str {
        KIND
    }

    fn supports(&self, strategy: SwitchStrategy) -> bool {
        self.catalog
            .state
            .lock()
            .only
            .is_none_or(|only| only == strategy)
    }

    async fn switch_to(&mut self, target: &SwitchTarget) -> StoreResult<()> {
        self.catalog.check_reachable()?;
        {
            let state = self.catalog.state.lock();
            if !state.stores.contains_key(&target.store_name) {
                return Err(StoreError::not_found(&target.store_name));
            }
            if state.denied.contains(&target.store_name) {
                return Err(StoreError::PermissionDenied {
                    message: format!("switch to {} denied", target.store_name),
                });
            }
        }
        self.current = Some(target.store_name.clone());
        self.search_path = target.search_path.clone();
        Ok(())
    }

    async fn switch_to_baseline(&mut self) -> StoreResult<()> {
        self.catalog.check_reachable()?;
        self.current = None;
        self.search_path.clear();
        Ok(())
    }

    async fn create_tenant_store(
        &mut self,
        name: &str,
        params: &ConnectionParams,
        clone: &CloneStrategy,
    ) -> StoreResult<()> {
        self.catalog.check_reachable()?;
        let mut state = self.catalog.state.lock();
        if state.stores.contains_key(name) {
            return Err(StoreError::AlreadyExists {
                object: name.to_string(),
            });
        }
        state.stores.insert(
            name.to_string(),
            StoreEntry {
                params: params.clone(),
                clone: clone.clone(),
                seeds: Vec::new(),
            },
        );
        Ok(())
    }

    async fn drop_tenant_store(&mut self, name: &str) -> StoreResult<()> {
        self.catalog.check_reachable()?;
        self.catalog
            .state
            .lock()
            .stores
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| StoreError::not_found(name))
    }

    async fn store_exists(&mut self, name: &str) -> StoreResult<bool> {
        self.catalog.check_reachable()?;
        Ok(self.catalog.contains(name))
    }

    async fn load_seed(&mut self, path: &Path) -> StoreResult<()> {
        self.catalog.check_reachable()?;
        let Some(current) = &self.current else {
            return Err(StoreError::Query {
                message: "no tenant store selected for seeding".to_string(),
            });
        };
        let mut state = self.catalog.state.lock();
        let entry = state
            .stores
            .get_mut(current)
            .ok_or_else(|| StoreError::not_found(current))?;
        entry.seeds.push(path.to_path_buf());
        Ok(())
    }
}
