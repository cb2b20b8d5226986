//! Identifier rewriting and physical store naming.
//!
//! Under the schema strategy a deployment may qualify every bare table name
//! with the active tenant's schema (`orders` becomes `acme.orders`) instead of
//! changing the session search path. The guards in [`qualify`] make this a
//! no-op for database-per-tenant deployments and for deployments that never
//! enable it.

use crate::config::{SwitchStrategy, TenancyConfig};
use crate::context;
use crate::id::{QUALIFIER_SEPARATOR, TenantId};

/// Qualifies `identifier` with the active tenant when configured.
///
/// Returns `identifier` unchanged unless all of the following hold:
///
/// - `allow_prepend_tenant_name` is enabled,
/// - `identifier` contains no `.` separator,
/// - the strategy is [`SwitchStrategy::Schema`].
///
/// The qualifier is the active tenant's physical schema name (see
/// [`store_name`]). With no active tenant the default schema is used.
///
/// # Examples
///
/// ```
/// use helios_tenancy::{TenancyConfig, TenantId};
/// use helios_tenancy::config::SwitchStrategy;
/// use helios_tenancy::naming::qualify;
///
/// let mut config = TenancyConfig::new();
/// config.set_strategy(SwitchStrategy::Schema).set_allow_prepend_tenant_name(true);
///
/// let acme = TenantId::parse("acme").unwrap();
/// assert_eq!(qualify("orders", Some(&acme), &config), "acme.orders");
/// assert_eq!(qualify("public.orders", Some(&acme), &config), "public.orders");
/// ```
pub fn qualify(identifier: &str, active: Option<&TenantId>, config: &TenancyConfig) -> String {
    if !config.allow_prepend_tenant_name()
        || identifier.contains(QUALIFIER_SEPARATOR)
        || config.strategy() != SwitchStrategy::Schema
    {
        return identifier.to_string();
    }

    let namespace = match active {
        Some(tenant) => store_name(tenant, config),
        None => config.default_schema().to_string(),
    };
    format!("{namespace}{QUALIFIER_SEPARATOR}{identifier}")
}

/// Qualifies `identifier` with the tenant of the enclosing scoped switch.
///
/// Reads the task-local tenant set by
/// [`TenantSession::with_tenant`](crate::TenantSession::with_tenant), so call
/// sites deep inside a unit of work need no session handle.
pub fn qualify_current(identifier: &str, config: &TenancyConfig) -> String {
    qualify(identifier, context::current_tenant().as_ref(), config)
}

/// Returns the physical schema or database name for `tenant`.
///
/// Adds the environment name as a prefix (`production_acme`) or suffix
/// (`acme_production`) when configured. Prepending wins if both are set.
/// The affix is applied to every tenant, so distinct tenants always get
/// distinct store names.
pub fn store_name(tenant: &TenantId, config: &TenancyConfig) -> String {
    let name = tenant.as_str();
    let environment = config.environment();

    if config.prepend_environment() {
        format!("{environment}_{name}")
    } else if config.append_environment() {
        format!("{name}_{environment}")
    } else {
        name.to_string()
    }
}

/// Returns the table name an excluded model should use.
///
/// Excluded models always resolve to the shared default schema under the
/// schema strategy. Under the database strategy they are reached through the
/// baseline connection instead, so the name is unchanged.
pub fn excluded_table_name(table: &str, config: &TenancyConfig) -> String {
    if config.strategy() != SwitchStrategy::Schema || table.contains(QUALIFIER_SEPARATOR) {
        return table.to_string();
    }
    format!("{}{QUALIFIER_SEPARATOR}{table}", config.default_schema())
}
