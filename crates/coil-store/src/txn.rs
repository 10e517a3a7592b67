//! Transaction model and the store trait
//!
//! Transactions follow the etcd shape: a list of guards, the operations to
//! apply when every guard holds, and the operations to apply otherwise.
//! A [`TxnOp::Txn`] nests a complete transaction inside a branch; its own
//! outcome is reported separately in [`TxnResponse::nested`], which is how
//! callers tell an outer guard failure apart from an inner one.

use async_trait::async_trait;
use coil_common::Result;

/// A stored value together with the revision that last modified it
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyValue {
    /// Key, relative to the store's namespace
    pub key: String,
    /// Raw value
    pub value: Vec<u8>,
    /// Store revision of the last write to this key
    pub mod_revision: i64,
}

/// Transaction guard
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Compare {
    /// Holds if the key does not exist
    KeyMissing {
        /// Key to check
        key: String,
    },
    /// Holds if the key was last modified at exactly `revision`
    ///
    /// A missing key has modification revision 0.
    ModRevision {
        /// Key to check
        key: String,
        /// Expected modification revision
        revision: i64,
    },
}

impl Compare {
    /// Guard that `key` is absent
    pub fn key_missing(key: impl Into<String>) -> Self {
        Self::KeyMissing { key: key.into() }
    }

    /// Guard that `key` is unchanged since `revision`
    pub fn mod_revision(key: impl Into<String>, revision: i64) -> Self {
        Self::ModRevision {
            key: key.into(),
            revision,
        }
    }

    /// Key this guard inspects
    pub fn key(&self) -> &str {
        match self {
            Self::KeyMissing { key } | Self::ModRevision { key, .. } => key,
        }
    }
}

/// Operation inside a transaction branch
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TxnOp {
    /// Write a value
    Put {
        /// Key to write
        key: String,
        /// Value to store
        value: Vec<u8>,
    },
    /// Remove a key; deleting a missing key is not an error
    Delete {
        /// Key to remove
        key: String,
    },
    /// Nested conditional transaction
    Txn(Box<Txn>),
}

impl TxnOp {
    /// Put operation
    pub fn put(key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        Self::Put {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Delete operation
    pub fn delete(key: impl Into<String>) -> Self {
        Self::Delete { key: key.into() }
    }

    /// Nested transaction operation
    pub fn txn(txn: Txn) -> Self {
        Self::Txn(Box::new(txn))
    }
}

/// Conditional transaction
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Txn {
    /// Guards that must all hold for `success` to run
    pub compare: Vec<Compare>,
    /// Operations applied when every guard holds
    pub success: Vec<TxnOp>,
    /// Operations applied when any guard fails
    pub failure: Vec<TxnOp>,
}

impl Txn {
    /// Empty transaction; with no guards it always succeeds
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the guards
    pub fn when(mut self, compare: Vec<Compare>) -> Self {
        self.compare = compare;
        self
    }

    /// Set the success branch
    pub fn and_then(mut self, ops: Vec<TxnOp>) -> Self {
        self.success = ops;
        self
    }

    /// Set the failure branch
    pub fn or_else(mut self, ops: Vec<TxnOp>) -> Self {
        self.failure = ops;
        self
    }
}

/// Result of one operation of the branch that ran
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TxnOpResponse {
    /// A put was applied
    Put,
    /// A delete was applied
    Delete {
        /// Number of keys removed (0 or 1)
        deleted: i64,
    },
    /// Outcome of a nested transaction
    Txn(TxnResponse),
}

/// Outcome of a transaction
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TxnResponse {
    /// True if every guard held and the success branch ran
    pub succeeded: bool,
    /// One response per operation of the branch that ran
    pub responses: Vec<TxnOpResponse>,
    /// Store revision after the transaction
    pub revision: i64,
}

impl TxnResponse {
    /// Outcome of the nested transaction at `index` of the branch that ran
    pub fn nested(&self, index: usize) -> Option<&TxnResponse> {
        match self.responses.get(index) {
            Some(TxnOpResponse::Txn(inner)) => Some(inner),
            _ => None,
        }
    }
}

/// Strongly-consistent transactional key-value store
///
/// Implementations serialize every transaction: guards are evaluated and the
/// selected branch is applied atomically, including nested transactions.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Read a key with its modification revision
    async fn get(&self, key: &str) -> Result<Option<KeyValue>>;

    /// Read every key starting with `prefix`, in key order
    async fn get_prefix(&self, prefix: &str) -> Result<Vec<KeyValue>>;

    /// Run a transaction atomically
    async fn txn(&self, txn: Txn) -> Result<TxnResponse>;

    /// Delete `keys` atomically, optionally only if `guard` holds
    ///
    /// Returns false if the guard failed and nothing was deleted.
    async fn delete_all(&self, keys: Vec<String>, guard: Option<Compare>) -> Result<bool> {
        let ops = keys.into_iter().map(TxnOp::delete).collect();
        let txn = Txn::new().when(guard.into_iter().collect()).and_then(ops);
        Ok(self.txn(txn).await?.succeeded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_sets_branches() {
        let txn = Txn::new()
            .when(vec![Compare::key_missing("pool/a")])
            .and_then(vec![TxnOp::put("pool/a", "x")])
            .or_else(vec![TxnOp::delete("pool/b")]);
        assert_eq!(txn.compare.len(), 1);
        assert_eq!(txn.compare[0].key(), "pool/a");
        assert_eq!(txn.success, vec![TxnOp::put("pool/a", b"x".to_vec())]);
        assert_eq!(txn.failure, vec![TxnOp::delete("pool/b")]);
    }

    #[test]
    fn test_nested_reads_only_transaction_responses() {
        let inner = TxnResponse {
            succeeded: false,
            responses: vec![],
            revision: 7,
        };
        let outer = TxnResponse {
            succeeded: true,
            responses: vec![TxnOpResponse::Put, TxnOpResponse::Txn(inner.clone())],
            revision: 7,
        };
        assert_eq!(outer.nested(1), Some(&inner));
        assert_eq!(outer.nested(0), None);
        assert_eq!(outer.nested(2), None);
    }
}
