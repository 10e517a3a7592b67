//! Common types for Coil IPAM: the address-space model, store key layout,
//! CRDs, errors, and utilities

#![deny(missing_docs)]

pub mod crd;
pub mod error;
pub mod keys;
pub mod model;
pub mod retry;
pub mod telemetry;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Name of the pool used when none is specified
pub const DEFAULT_POOL: &str = "default";

/// Default prefix of every key Coil writes to the store
pub const DEFAULT_KEY_PREFIX: &str = "/coil/";
