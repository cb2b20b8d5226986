//! Tenant identifier type.
//!
//! This module defines the [`TenantId`] type, an opaque, case-sensitive
//! identifier for a tenant.

use std::borrow::Borrow;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TenancyError;

/// Separator between a namespace and an identifier, as in `acme.orders`.
pub const QUALIFIER_SEPARATOR: char = '.';

/// An opaque tenant identifier.
///
/// Identities are case-sensitive. Construction normalizes the input by
/// trimming surrounding whitespace and rejects identities that are empty
/// afterwards, so a `TenantId` is never empty.
///
/// # Examples
///
/// ```
/// use helios_tenancy::TenantId;
///
/// let tenant = TenantId::parse("  acme ").unwrap();
/// assert_eq!(tenant.as_str(), "acme");
/// assert!(TenantId::parse("   ").is_err());
/// ```
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TenantId(String);

impl TenantId {
    /// Parses and normalizes a tenant identity.
    ///
    /// # Errors
    ///
    /// Returns [`TenancyError::InvalidTenant`] if the identity is empty or
    /// whitespace only.
    pub fn parse(id: impl AsRef<str>) -> Result<Self, TenancyError> {
        let raw = id.as_ref();
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(TenancyError::InvalidTenant {
                tenant: raw.to_string(),
                reason: "identity is empty".to_string(),
            });
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Returns the tenant ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns `true` if the other identity matches ignoring ASCII case.
    pub fn eq_ignore_case(&self, other: &str) -> bool {
        self.0.eq_ignore_ascii_case(other.trim())
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TenantId({})", self.0)
    }
}

impl FromStr for TenantId {
    type Err = TenancyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TenantId::parse(s)
    }
}

impl TryFrom<&str> for TenantId {
    type Error = TenancyError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        TenantId::parse(s)
    }
}

impl TryFrom<String> for TenantId {
    type Error = TenancyError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        TenantId::parse(s)
    }
}

impl From<TenantId> for String {
    fn from(id: TenantId) -> Self {
        id.0
    }
}

impl AsRef<str> for TenantId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for TenantId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tenant_id_creation() {
        let tenant = TenantId::parse("my-tenant").unwrap();
        assert_eq!(tenant.as_str(), "my-tenant");
    }

    #[test]
    fn test_tenant_id_trims_whitespace() {
        let tenant = TenantId::parse("\tacme \n").unwrap();
        assert_eq!(tenant.as_str(), "acme");
    }

    #[test]
    fn test_tenant_id_rejects_empty() {
        assert!(matches!(
            TenantId::parse(""),
            Err(TenancyError::InvalidTenant { .. })
        ));
        assert!(matches!(
            TenantId::parse("   "),
            Err(TenancyError::InvalidTenant { .. })
        ));
    }

    #[test]
    fn test_tenant_id_is_case_sensitive() {
        let upper = TenantId::parse("Acme").unwrap();
        let lower = TenantId::parse("acme").unwrap();
        assert_ne!(upper, lower);
        assert!(upper.eq_ignore_case("ACME"));
    }

    #[test]
    fn test_serde_roundtrip() {
        let tenant = TenantId::parse("acme").unwrap();
        let json = serde_json::to_string(&tenant).unwrap();
        assert_eq!(json, "\"acme\"");

        let parsed: TenantId = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, tenant);
    }

    #[test]
    fn test_serde_rejects_blank() {
        let parsed: Result<TenantId, _> = serde_json::from_str("\"  \"");
        assert!(parsed.is_err());
    }

    #[test]
    fn test_from_str() {
        let tenant: TenantId = "my-tenant".parse().unwrap();
        assert_eq!(tenant.as_str(), "my-tenant");
    }
}
