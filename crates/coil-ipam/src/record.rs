//! Encoding of stored records and reads with revision

use coil_common::model::AddressPool;
use coil_common::{keys, Error, Result};
use coil_store::{KeyValue, KvStore, TxnResponse};
use serde::de::DeserializeOwned;
use serde::Serialize;

pub(crate) fn encode<T: Serialize>(kind: &str, value: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| Error::serialization_for_kind(kind, e.to_string()))
}

pub(crate) fn decode<T: DeserializeOwned>(kind: &str, kv: &KeyValue) -> Result<T> {
    serde_json::from_slice(&kv.value).map_err(|e| {
        Error::serialization_for_kind(kind, format!("{}: {e}", kv.key))
    })
}

/// Read a pool record and the revision it was last written at
pub(crate) async fn read_pool(
    store: &dyn KvStore,
    name: &str,
) -> Result<Option<(AddressPool, i64)>> {
    match store.get(&keys::pool_key(name)).await? {
        Some(kv) => Ok(Some((decode("pool", &kv)?, kv.mod_revision))),
        None => Ok(None),
    }
}

/// Outcome of the nested transaction at index 0 of the branch that ran
pub(crate) fn nested_succeeded(resp: &TxnResponse) -> Result<bool> {
    resp.nested(0).map(|inner| inner.succeeded).ok_or_else(|| {
        Error::internal_with_context("txn", "store response lacks the nested transaction outcome")
    })
}
