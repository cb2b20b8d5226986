//! Error types for the tenancy engine.
//!
//! Every fallible operation returns a [`TenancyError`]. Failures reported by a
//! [`TenantStore`](crate::store::TenantStore) are classified as [`StoreError`]
//! first, then translated by the engine: a missing object during a switch
//! becomes [`TenancyError::TenantNotFound`], an existing object during create
//! becomes [`TenancyError::TenantExists`], and everything else is passed
//! through as [`TenancyError::Storage`].

// Error enum variant fields are self-documenting via their #[error(...)] messages
#![allow(missing_docs)]

use std::path::PathBuf;

use thiserror::Error;

/// The base error type for all tenancy operations.
#[derive(Error, Debug)]
pub enum TenancyError {
    /// The requested store adapter or switching strategy is not supported.
    #[error("adapter not found: {adapter} does not support {strategy}")]
    AdapterNotFound { adapter: String, strategy: String },

    /// A configured file (schema definition, seed data) does not exist.
    #[error("file not found: {}", path.display())]
    FileNotFound { path: PathBuf },

    /// Switch or drop targeted a tenant with no registry entry or no store.
    #[error("tenant not found: {tenant}")]
    TenantNotFound { tenant: String },

    /// Create targeted a tenant whose store already exists.
    #[error("tenant already exists: {tenant}")]
    TenantExists { tenant: String },

    /// The tenant identity is malformed (empty or whitespace only).
    #[error("invalid tenant identity {tenant:?}: {reason}")]
    InvalidTenant { tenant: String, reason: String },

    /// Drop refused because the store is shared across tenants.
    #[error("refusing to drop persistent store: {tenant}")]
    PersistentTenant { tenant: String },

    /// Unclassified storage-layer failure.
    #[error(transparent)]
    Storage(#[from] StoreError),
}

impl TenancyError {
    /// Creates a [`TenancyError::TenantNotFound`] for the given tenant.
    pub fn tenant_not_found(tenant: impl Into<String>) -> Self {
        TenancyError::TenantNotFound {
            tenant: tenant.into(),
        }
    }

    /// Returns `true` if this error came from the storage layer.
    pub fn is_storage(&self) -> bool {
        matches!(self, TenancyError::Storage(_))
    }
}

/// Errors reported by a tenant store.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The schema, database, table or other object does not exist.
    #[error("object not found: {object}")]
    ObjectNotFound { object: String },

    /// The schema or database being created already exists.
    #[error("object already exists: {object}")]
    AlreadyExists { object: String },

    /// The store rejected the operation for lack of privileges.
    #[error("permission denied: {message}")]
    PermissionDenied { message: String },

    /// The store could not be reached.
    #[error("connection failed to {store}: {message}")]
    ConnectionFailed { store: String, message: String },

    /// A statement failed for a reason not covered above.
    #[error("query execution failed: {message}")]
    Query { message: String },

    /// Filesystem failure while managing store files.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Internal store error.
    #[error("internal error in {store}: {message}")]
    Internal {
        store: String,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl StoreError {
    /// Creates a [`StoreError::ObjectNotFound`].
    pub fn not_found(object: impl Into<String>) -> Self {
        StoreError::ObjectNotFound {
            object: object.into(),
        }
    }

    /// Returns `true` if the failure means the target object is missing.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::ObjectNotFound { .. })
    }
}

/// Result type alias for tenancy operations.
pub type TenancyResult<T> = Result<T, TenancyError>;

/// Result type alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

#[cfg(feature = "sqlite")]
impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        use rusqlite::ffi::ErrorCode;

        match &err {
            rusqlite::Error::SqliteFailure(code, Some(message))
                if code.code == ErrorCode::Unknown && message.starts_with("no such table") =>
            {
                StoreError::ObjectNotFound {
                    object: message.trim_start_matches("no such table:").trim().to_string(),
                }
            }
            rusqlite::Error::SqliteFailure(code, _)
                if code.code == ErrorCode::CannotOpen =>
            {
                StoreError::ConnectionFailed {
                    store: "sqlite".to_string(),
                    message: err.to_string(),
                }
            }
            rusqlite::Error::SqliteFailure(code, _)
                if code.code == ErrorCode::PermissionDenied
                    || code.code == ErrorCode::ReadOnly =>
            {
                StoreError::PermissionDenied {
                    message: err.to_string(),
                }
            }
            _ => StoreError::Internal {
                store: "sqlite".to_string(),
                message: err.to_string(),
                source: Some(Box::new(err)),
            },
        }
    }
}

#[cfg(feature = "postgres")]
impl From<tokio_postgres::Error> for StoreError {
    fn from(err: tokio_postgres::Error) -> Self {
        use tokio_postgres::error::SqlState;

        let Some(code) = err.code() else {
            return StoreError::ConnectionFailed {
                store: "postgres".to_string(),
                message: err.to_string(),
            };
        };

        if *code == SqlState::UNDEFINED_TABLE
            || *code == SqlState::INVALID_SCHEMA_NAME
            || *code == SqlState::INVALID_CATALOG_NAME
        {
            StoreError::ObjectNotFound {
                object: err
                    .as_db_error()
                    .map(|db| db.message().to_string())
                    .unwrap_or_else(|| err.to_string()),
            }
        } else if *code == SqlState::DUPLICATE_SCHEMA || *code == SqlState::DUPLICATE_DATABASE {
            StoreError::AlreadyExists {
                object: err.to_string(),
            }
        } else if *code == SqlState::INSUFFICIENT_PRIVILEGE {
            StoreError::PermissionDenied {
                message: err.to_string(),
            }
        } else {
            StoreError::Query {
                message: err.to_string(),
            }
        }
    }
}

#[cfg(feature = "postgres")]
impl From<deadpool_postgres::PoolError> for StoreError {
    fn from(err: deadpool_postgres::PoolError) -> Self {
        StoreError::ConnectionFailed {
            store: "postgres".to_string(),
            message: err.to_string(),
        }
    }
}
