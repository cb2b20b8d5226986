//! Tenant registry: where tenant identities and their connection parameters
//! come from.
//!
//! A [`TenantSource`] is one of three tagged forms:
//!
//! - [`TenantSource::StaticList`]: identities only; each maps to the baseline
//!   connection parameters.
//! - [`TenantSource::StaticMap`]: identities with their own parameters.
//! - [`TenantSource::Provider`]: a callable evaluated on every request, which
//!   may query the database the tenants live in.
//!
//! Sources are never cached. Callers that need a stable view must snapshot
//! the result of [`TenantRegistry::tenants_with_config`].
//!
//! # Enumeration fallback
//!
//! When a provider fails with a storage-layer error (for example because the
//! table listing tenants has not been created yet on a fresh environment),
//! the registry logs the failure and behaves as if no tenants exist. This is
//! the only place where errors are suppressed. Any other error kind raised by
//! a provider propagates.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::connection::ConnectionParams;
use crate::error::{TenancyError, TenancyResult};
use crate::id::TenantId;

/// Tenant identities mapped to their connection parameters.
///
/// Keys keep their original case. Lookups try an exact match first and fall
/// back to an ASCII case-insensitive match.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantMap(BTreeMap<TenantId, ConnectionParams>);

impl TenantMap {
    /// Creates an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces the parameters for `tenant`.
    pub fn insert(&mut self, tenant: TenantId, params: ConnectionParams) {
        self.0.insert(tenant, params);
    }

    /// Looks up the parameters for `tenant`.
    pub fn get(&self, tenant: &str) -> Option<&ConnectionParams> {
        let tenant = tenant.trim();
        self.0.get(tenant).or_else(|| {
            self.0
                .iter()
                .find(|(id, _)| id.eq_ignore_case(tenant))
                .map(|(_, params)| params)
        })
    }

    /// Returns `true` if `tenant` is a key of this map.
    pub fn contains(&self, tenant: &str) -> bool {
        self.get(tenant).is_some()
    }

    /// Returns the identities in key order.
    pub fn ids(&self) -> Vec<TenantId> {
        self.0.keys().cloned().collect()
    }

    /// Iterates over the entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&TenantId, &ConnectionParams)> {
        self.0.iter()
    }

    /// Returns the number of tenants.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if the map holds no tenants.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(TenantId, ConnectionParams)> for TenantMap {
    fn from_iter<I: IntoIterator<Item = (TenantId, ConnectionParams)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// The evaluated value of a tenant source.
///
/// Deserializes from either a JSON array of identities or a JSON object of
/// identity to string parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TenantListing {
    /// Identities only.
    List(Vec<TenantId>),
    /// Identities with their connection parameters.
    Map(TenantMap),
}

/// A dynamically computed tenant source.
///
/// Implementations are invoked on every registry request.
#[async_trait]
pub trait TenantProvider: Send + Sync {
    /// Produces the current tenants.
    async fn tenants(&self) -> TenancyResult<TenantListing>;
}

/// Adapts a synchronous closure into a [`TenantProvider`].
pub struct FnProvider<F>(F);

#[async_trait]
impl<F> TenantProvider for FnProvider<F>
where
    F: Fn() -> TenancyResult<TenantListing> + Send + Sync,
{
    async fn tenants(&self) -> TenancyResult<TenantListing> {
        (self.0)()
    }
}

/// Where tenant identities come from.
#[derive(Clone)]
pub enum TenantSource {
    /// A fixed, ordered list of identities.
    StaticList(Vec<TenantId>),
    /// A fixed mapping of identity to connection parameters.
    StaticMap(TenantMap),
    /// A provider evaluated on every request.
    Provider(Arc<dyn TenantProvider>),
}

impl TenantSource {
    /// Builds a static list source from raw identities.
    ///
    /// # Errors
    ///
    /// Returns [`TenancyError::InvalidTenant`] if any identity is blank.
    pub fn list<I, S>(ids: I) -> TenancyResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        ids.into_iter()
            .map(TenantId::parse)
            .collect::<TenancyResult<Vec<_>>>()
            .map(TenantSource::StaticList)
    }

    /// Wraps a provider implementation.
    pub fn provider(provider: impl TenantProvider + 'static) -> Self {
        TenantSource::Provider(Arc::new(provider))
    }

    /// Wraps a synchronous closure as a provider.
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn() -> TenancyResult<TenantListing> + Send + Sync + 'static,
    {
        Self::provider(FnProvider(f))
    }

    /// Builds a static source from a JSON array or object.
    ///
    /// # Errors
    ///
    /// Returns the deserialization error if the value is neither an array of
    /// identities nor an object of identity to string parameters.
    pub fn from_json(value: serde_json::Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value::<TenantListing>(value).map(Into::into)
    }

    async fn evaluate(&self) -> TenancyResult<TenantListing> {
        match self {
            TenantSource::StaticList(ids) => Ok(TenantListing::List(ids.clone())),
            TenantSource::StaticMap(map) => Ok(TenantListing::Map(map.clone())),
            TenantSource::Provider(provider) => provider.tenants().await,
        }
    }
}

impl From<TenantListing> for TenantSource {
    fn from(listing: TenantListing) -> Self {
        match listing {
            TenantListing::List(ids) => TenantSource::StaticList(ids),
            TenantListing::Map(map) => TenantSource::StaticMap(map),
        }
    }
}

impl fmt::Debug for TenantSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TenantSource::StaticList(ids) => f.debug_tuple("StaticList").field(ids).finish(),
            TenantSource::StaticMap(map) => f.debug_tuple("StaticMap").field(map).finish(),
            TenantSource::Provider(_) => f.write_str("Provider(..)"),
        }
    }
}

/// Authoritative source of tenant identities and their connection parameters.
///
/// The default registry has no source and empty baseline parameters.
#[derive(Debug, Clone, Default)]
pub struct TenantRegistry {
    source: Option<TenantSource>,
    baseline: ConnectionParams,
}

impl TenantRegistry {
    /// Creates a registry over `source`, with `baseline` as the default
    /// connection parameters.
    pub fn new(source: TenantSource, baseline: ConnectionParams) -> Self {
        Self {
            source: Some(source),
            baseline,
        }
    }

    /// Creates a registry without a tenant source.
    pub fn unset(baseline: ConnectionParams) -> Self {
        Self {
            source: None,
            baseline,
        }
    }

    /// Returns `true` if a tenant source has been set.
    pub fn is_configured(&self) -> bool {
        self.source.is_some()
    }

    /// Returns the baseline connection parameters.
    pub fn baseline(&self) -> &ConnectionParams {
        &self.baseline
    }

    /// Returns the tenant identities, deduplicated after normalization.
    ///
    /// List sources keep their first-occurrence order; map sources are
    /// returned in key order. An unset source yields an empty list.
    ///
    /// # Errors
    ///
    /// Returns any non-storage error raised by a provider.
    pub async fn list_tenant_identities(&self) -> TenancyResult<Vec<TenantId>> {
        Ok(match self.evaluate().await? {
            None => Vec::new(),
            Some(TenantListing::List(ids)) => dedup(ids),
            Some(TenantListing::Map(map)) => map.ids(),
        })
    }

    /// Returns every tenant with its connection parameters.
    ///
    /// Listed identities map to the baseline parameters. The source is
    /// re-evaluated on every call.
    ///
    /// # Errors
    ///
    /// Returns any non-storage error raised by a provider.
    pub async fn tenants_with_config(&self) -> TenancyResult<TenantMap> {
        Ok(match self.evaluate().await? {
            None => TenantMap::new(),
            Some(TenantListing::List(ids)) => ids
                .into_iter()
                .map(|id| (id, self.baseline.clone()))
                .collect(),
            Some(TenantListing::Map(map)) => map,
        })
    }

    /// Returns `true` if `tenant` is one of the registered identities.
    ///
    /// # Errors
    ///
    /// Returns any non-storage error raised by a provider.
    pub async fn contains(&self, tenant: &str) -> TenancyResult<bool> {
        Ok(self.tenants_with_config().await?.contains(tenant))
    }

    async fn evaluate(&self) -> TenancyResult<Option<TenantListing>> {
        let Some(source) = &self.source else {
            return Ok(None);
        };

        match source.evaluate().await {
            Ok(listing) => Ok(Some(listing)),
            Err(TenancyError::Storage(err)) => {
                warn!(
                    error = %err,
                    "Tenant enumeration failed at the storage layer; treating registry as empty"
                );
                Ok(None)
            }
            Err(err) => {
                debug!(error = %err, "Tenant provider failed");
                Err(err)
            }
        }
    }
}

fn dedup(ids: Vec<TenantId>) -> Vec<TenantId> {
    let mut seen = HashSet::new();
    ids.into_iter()
        .filter(|id| seen.insert(id.clone()))
        .collect()
}
