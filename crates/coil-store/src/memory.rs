//! In-process store backend
//!
//! Serializes every operation behind one lock and keeps etcd's revision
//! semantics: a global counter bumped once per transaction that writes, and
//! a per-key modification revision. Used for tests and single-process runs.

use std::collections::BTreeMap;

use async_trait::async_trait;
use coil_common::Result;
use parking_lot::Mutex;

use crate::txn::{Compare, KeyValue, KvStore, Txn, TxnOp, TxnOpResponse, TxnResponse};

#[derive(Debug)]
struct Entry {
    value: Vec<u8>,
    mod_revision: i64,
}

#[derive(Debug, Default)]
struct State {
    revision: i64,
    data: BTreeMap<String, Entry>,
}

impl State {
    fn holds(&self, compare: &Compare) -> bool {
        match compare {
            Compare::KeyMissing { key } => !self.data.contains_key(key),
            Compare::ModRevision { key, revision } => {
                self.data.get(key).map_or(0, |e| e.mod_revision) == *revision
            }
        }
    }

    /// Apply a transaction at `write_revision`; returns the response and
    /// whether anything was written.
    fn apply(&mut self, txn: Txn, write_revision: i64) -> (bool, Vec<TxnOpResponse>, bool) {
        let succeeded = txn.compare.iter().all(|c| self.holds(c));
        let ops = if succeeded { txn.success } else { txn.failure };

        let mut wrote = false;
        let mut responses = Vec::with_capacity(ops.len());
        for op in ops {
            match op {
                TxnOp::Put { key, value } => {
                    self.data.insert(
                        key,
                        Entry {
                            value,
                            mod_revision: write_revision,
                        },
                    );
                    wrote = true;
                    responses.push(TxnOpResponse::Put);
                }
                TxnOp::Delete { key } => {
                    let deleted = i64::from(self.data.remove(&key).is_some());
                    wrote |= deleted > 0;
                    responses.push(TxnOpResponse::Delete { deleted });
                }
                TxnOp::Txn(inner) => {
                    let (inner_ok, inner_responses, inner_wrote) =
                        self.apply(*inner, write_revision);
                    wrote |= inner_wrote;
                    responses.push(TxnOpResponse::Txn(TxnResponse {
                        succeeded: inner_ok,
                        responses: inner_responses,
                        // Patched to the final revision below
                        revision: 0,
                    }));
                }
            }
        }
        (succeeded, responses, wrote)
    }
}

fn stamp_revision(responses: &mut [TxnOpResponse], revision: i64) {
    for response in responses {
        if let TxnOpResponse::Txn(inner) = response {
            inner.revision = revision;
            stamp_revision(&mut inner.responses, revision);
        }
    }
}

/// Single-process store with the same contract as etcd
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    /// Create an empty store at revision 0
    pub fn new() -> Self {
        Self::default()
    }

    /// Current store revision
    pub fn revision(&self) -> i64 {
        self.state.lock().revision
    }

    /// All keys, in order
    pub fn keys(&self) -> Vec<String> {
        self.state.lock().data.keys().cloned().collect()
    }

    /// Number of stored keys
    pub fn len(&self) -> usize {
        self.state.lock().data.len()
    }

    /// True if the store holds no keys
    pub fn is_empty(&self) -> bool {
        self.state.lock().data.is_empty()
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<KeyValue>> {
        let state = self.state.lock();
        Ok(state.data.get(key).map(|e| KeyValue {
            key: key.to_string(),
            value: e.value.clone(),
            mod_revision: e.mod_revision,
        }))
    }

    async fn get_prefix(&self, prefix: &str) -> Result<Vec<KeyValue>> {
        let state = self.state.lock();
        Ok(state
            .data
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, e)| KeyValue {
                key: k.clone(),
                value: e.value.clone(),
                mod_revision: e.mod_revision,
            })
            .collect())
    }

    async fn txn(&self, txn: Txn) -> Result<TxnResponse> {
        let mut state = self.state.lock();
        let write_revision = state.revision + 1;
        let (succeeded, mut responses, wrote) = state.apply(txn, write_revision);
        if wrote {
            state.revision = write_revision;
        }
        stamp_revision(&mut responses, state.revision);
        Ok(TxnResponse {
            succeeded,
            responses,
            revision: state.revision,
        })
    }
}
