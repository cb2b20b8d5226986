//! Connection parameters and tenant-to-connection resolution.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::TenancyResult;
use crate::id::TenantId;
use crate::registry::TenantRegistry;

/// Keys whose values are never printed.
const REDACTED_KEYS: &[&str] = &["password", "passwd", "secret"];

/// Opaque key-value description of how to reach a tenant's store.
///
/// Common keys are `host`, `port`, `database`, `schema`, `user` and
/// `password`, but any key may be carried through to the store.
///
/// # Examples
///
/// ```
/// use helios_tenancy::ConnectionParams;
///
/// let params = ConnectionParams::new()
///     .with("host", "db.internal")
///     .with("database", "acme");
/// assert_eq!(params.database(), Some("acme"));
/// ```
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionParams(BTreeMap<String, String>);

impl ConnectionParams {
    /// Creates an empty parameter set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy with `key` set to `value`.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Sets `key` to `value`.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    /// Returns the value for `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Returns the `host` entry.
    pub fn host(&self) -> Option<&str> {
        self.get("host")
    }

    /// Returns the `database` entry.
    pub fn database(&self) -> Option<&str> {
        self.get("database")
    }

    /// Returns the `schema` entry.
    pub fn schema(&self) -> Option<&str> {
        self.get("schema")
    }

    /// Returns `true` if no parameters are set.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates over the parameters in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Returns these parameters layered over `base`: keys set here win.
    #[must_use]
    pub fn merged_over(&self, base: &ConnectionParams) -> ConnectionParams {
        let mut merged = base.clone();
        for (key, value) in &self.0 {
            merged.0.insert(key.clone(), value.clone());
        }
        merged
    }
}

impl fmt::Debug for ConnectionParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (key, value) in &self.0 {
            if REDACTED_KEYS.contains(&key.to_ascii_lowercase().as_str()) {
                map.entry(key, &"***");
            } else {
                map.entry(key, value);
            }
        }
        map.finish()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for ConnectionParams {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// Resolves the connection parameters to use for a tenant.
///
/// Unknown tenants are not an error at this layer: they resolve to the
/// registry's baseline parameters. Whether a tenant exists is decided when a
/// session switches to it.
#[derive(Debug, Clone)]
pub struct ConnectionResolver {
    registry: Arc<TenantRegistry>,
}

impl ConnectionResolver {
    /// Creates a resolver over the given registry.
    pub fn new(registry: Arc<TenantRegistry>) -> Self {
        Self { registry }
    }

    /// Returns the registry this resolver reads from.
    pub fn registry(&self) -> &Arc<TenantRegistry> {
        &self.registry
    }

    /// Returns the baseline connection parameters.
    pub fn baseline(&self) -> &ConnectionParams {
        self.registry.baseline()
    }

    /// Returns the connection parameters for `tenant`.
    ///
    /// The tenant source is evaluated on every call.
    ///
    /// # Errors
    ///
    /// Returns [`TenancyError::InvalidTenant`](crate::TenancyError::InvalidTenant)
    /// if `tenant` is empty or whitespace only, or any non-storage error the
    /// tenant source raised.
    pub async fn connection_params_for(&self, tenant: &str) -> TenancyResult<ConnectionParams> {
        let id = TenantId::parse(tenant)?;
        let tenants = self.registry.tenants_with_config().await?;
        Ok(tenants
            .get(id.as_str())
            .cloned()
            .unwrap_or_else(|| self.registry.baseline().clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{TenantMap, TenantSource};

    fn baseline() -> ConnectionParams {
        ConnectionParams::new()
            .with("host", "localhost")
            .with("database", "app")
    }

    #[test]
    fn test_debug_redacts_password() {
        let params = baseline().with("password", "hunter2");
        let printed = format!("{params:?}");
        assert!(printed.contains("localhost"));
        assert!(!printed.contains("hunter2"));
    }

    #[test]
    fn test_merged_over() {
        let tenant = ConnectionParams::new().with("database", "acme");
        let merged = tenant.merged_over(&baseline());
        assert_eq!(merged.host(), Some("localhost"));
        assert_eq!(merged.database(), Some("acme"));
    }

    #[tokio::test]
    async fn test_mapped_tenant_resolves_to_its_params() {
        let acme = ConnectionParams::new().with("database", "acme_db");
        let mut map = TenantMap::new();
        map.insert(TenantId::parse("acme").unwrap(), acme.clone());
        let registry = Arc::new(TenantRegistry::new(TenantSource::StaticMap(map), baseline()));
        let resolver = ConnectionResolver::new(registry);

        assert_eq!(resolver.connection_params_for("acme").await.unwrap(), acme);
        assert_eq!(
            resolver.connection_params_for("globex").await.unwrap(),
            baseline()
        );
    }

    #[tokio::test]
    async fn test_listed_tenant_resolves_to_baseline() {
        let registry = Arc::new(TenantRegistry::new(
            TenantSource::list(["acme", "globex"]).unwrap(),
            baseline(),
        ));
        let resolver = ConnectionResolver::new(registry);
        assert_eq!(
            resolver.connection_params_for("acme").await.unwrap(),
            baseline()
        );
    }

    #[tokio::test]
    async fn test_blank_tenant_is_an_error() {
        let resolver = ConnectionResolver::new(Arc::new(TenantRegistry::unset(baseline())));
        let err = resolver.connection_params_for("  ").await.unwrap_err();
        assert!(matches!(err, crate::TenancyError::InvalidTenant { .. }));
    }
}
