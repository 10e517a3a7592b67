//! Coil IPAM core: pool lifecycle and block allocation over a transactional
//! key-value store
//!
//! - [`PoolManager`] creates, extends, reads and removes pools.
//! - [`NodeIpam`] grants blocks of a pool to nodes and wakes allocations
//!   waiting on an exhausted pool when [`Notifier::notify`] is called.

#![deny(missing_docs)]

pub mod node;
pub mod notify;
pub mod pool;
mod record;

pub use node::{NodeIpam, DEFAULT_RESYNC_INTERVAL};
pub use notify::{Notifier, PoolNotifier, Subscription};
pub use pool::PoolManager;
