//! Store Transaction Client for Coil IPAM
//!
//! A thin transactional key-value layer: reads with revisions, guarded
//! multi-key writes, nested conditional transactions and atomic multi-key
//! deletes. Backed by etcd in production and by [`MemoryStore`] in tests.

#![deny(missing_docs)]

pub mod config;
pub mod etcd;
pub mod memory;
pub mod txn;

pub use config::{connect, StoreBackend, StoreConfig};
pub use etcd::EtcdStore;
pub use memory::MemoryStore;
pub use txn::{Compare, KeyValue, KvStore, Txn, TxnOp, TxnOpResponse, TxnResponse};
