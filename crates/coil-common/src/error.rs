//! Error types for Coil IPAM
//!
//! Errors are structured with fields so that callers can tell the failure
//! categories apart: input validation, uniqueness conflicts, missing objects,
//! exhausted pools, and store/transport failures. Optimistic-concurrency
//! races never surface here; they are retried inside the transaction loops.

use std::time::Duration;

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for Coil operations
#[derive(Debug, Error)]
pub enum Error {
    /// A pool with this name is already registered
    #[error("pool {pool} already exists")]
    PoolExists {
        /// Name of the conflicting pool
        pool: String,
    },

    /// The subnet is already owned by some pool (this one or another)
    #[error("subnet {subnet} is already in use")]
    SubnetInUse {
        /// The conflicting subnet in CIDR notation
        subnet: String,
    },

    /// The requested object does not exist in the store
    #[error("{kind} {name} not found")]
    NotFound {
        /// Kind of object (e.g., "pool", "block")
        kind: String,
        /// Identifier of the missing object
        name: String,
    },

    /// Every subnet of the pool is fully granted
    #[error("no free block in pool {pool}")]
    PoolExhausted {
        /// Name of the exhausted pool
        pool: String,
    },

    /// Input validation error, raised before any store access
    #[error("validation error for {target}: {message}")]
    Validation {
        /// Object being validated (pool name, subnet, ...)
        target: String,
        /// Description of what's invalid
        message: String,
        /// The invalid field (e.g., "block_size")
        field: Option<String>,
    },

    /// Store transport or backend error, passed through without retry
    #[error("store error [{operation}]: {message}")]
    Store {
        /// Store operation that failed (get, txn, connect, ...)
        operation: String,
        /// Message from the underlying client
        message: String,
    },

    /// A store request exceeded its deadline and was abandoned
    #[error("store request [{operation}] timed out after {timeout:?}")]
    Timeout {
        /// Store operation that timed out
        operation: String,
        /// Deadline that was exceeded
        timeout: Duration,
    },

    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// The record kind being serialized (if known)
        kind: Option<String>,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "watcher", "cli")
        context: String,
    },
}

impl Error {
    /// Create a pool-exists conflict
    pub fn pool_exists(pool: impl Into<String>) -> Self {
        Self::PoolExists { pool: pool.into() }
    }

    /// Create a subnet-in-use conflict
    pub fn subnet_in_use(subnet: impl ToString) -> Self {
        Self::SubnetInUse {
            subnet: subnet.to_string(),
        }
    }

    /// Create a not-found error for an object of the given kind
    pub fn not_found(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Create a not-found error for a pool
    pub fn pool_not_found(name: impl Into<String>) -> Self {
        Self::not_found("pool", name)
    }

    /// Create a pool-exhausted error
    pub fn pool_exhausted(pool: impl Into<String>) -> Self {
        Self::PoolExhausted { pool: pool.into() }
    }

    /// Create a validation error with the given message
    ///
    /// For simple validation errors without a target.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            target: UNKNOWN_CONTEXT.to_string(),
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error for a named target and field
    pub fn validation_for_field(
        target: impl Into<String>,
        field: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Validation {
            target: target.into(),
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Create a store error from an underlying client error
    pub fn store(operation: impl Into<String>, err: impl std::fmt::Display) -> Self {
        Self::Store {
            operation: operation.into(),
            message: err.to_string(),
        }
    }

    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>, timeout: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout,
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: None,
        }
    }

    /// Create a serialization error with record kind context
    pub fn serialization_for_kind(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: Some(kind.into()),
        }
    }

    /// Create an internal error with the given message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: UNKNOWN_CONTEXT.to_string(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// True for uniqueness conflicts the caller must resolve
    /// (pick another name or subnet)
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::PoolExists { .. } | Error::SubnetInUse { .. })
    }

    /// True if the error reports a missing object
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NotFound { .. } => true,
            Error::Kube {
                source: kube::Error::Api(ae),
            } => ae.code == 404,
            _ => false,
        }
    }

    /// Check if this error is retryable by a caller
    ///
    /// Conflicts, validation and not-found errors are definitive.
    /// Transport failures and timeouts may succeed on a later attempt,
    /// but the core itself never retries them.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source } => !matches!(
                source,
                kube::Error::Api(ae) if (400..500).contains(&ae.code)
            ),
            Error::Store { .. } | Error::Timeout { .. } => true,
            Error::PoolExhausted { .. } => true,
            Error::Internal { .. } => true,
            Error::PoolExists { .. }
            | Error::SubnetInUse { .. }
            | Error::NotFound { .. }
            | Error::Validation { .. }
            | Error::Serialization { .. } => false,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization(err.to_string())
    }
}
