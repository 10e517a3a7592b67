//! etcd backend
//!
//! Maps the transaction model one-to-one onto etcd transactions, including
//! nested ones, so every guard is evaluated server-side within a single
//! revision. All keys are namespaced under a prefix. Every request is bounded
//! by the configured timeout; on expiry the request future is dropped and the
//! caller gets [`Error::Timeout`](coil_common::Error::Timeout). etcd applies a
//! transaction entirely or not at all, so an abandoned request leaves no
//! partial state.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use coil_common::{Error, Result};
use etcd_client::{Client, CompareOp, ConnectOptions, GetOptions};
use tracing::{debug, info};

use crate::config::StoreConfig;
use crate::txn::{Compare, KeyValue, KvStore, Txn, TxnOp, TxnOpResponse, TxnResponse};

/// Store backed by an etcd cluster
#[derive(Clone)]
pub struct EtcdStore {
    client: Client,
    prefix: String,
    request_timeout: Duration,
}

impl std::fmt::Debug for EtcdStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EtcdStore")
            .field("prefix", &self.prefix)
            .field("request_timeout", &self.request_timeout)
            .finish_non_exhaustive()
    }
}

impl EtcdStore {
    /// Connect to the endpoints in `config`
    pub async fn connect(config: &StoreConfig) -> Result<Self> {
        let mut options = ConnectOptions::new()
            .with_connect_timeout(config.dial_timeout)
            .with_timeout(config.request_timeout);
        if let (Some(user), Some(password)) = (&config.username, &config.password) {
            options = options.with_user(user.clone(), password.clone());
        }

        let client = tokio::time::timeout(
            config.dial_timeout,
            Client::connect(config.endpoints.clone(), Some(options)),
        )
        .await
        .map_err(|_| Error::timeout("connect", config.dial_timeout))?
        .map_err(|e| {
            Error::store(
                "connect",
                format!(
                    "unable to connect to etcd at {}: {e}",
                    config.endpoints.join(", ")
                ),
            )
        })?;

        info!(
            endpoints = %config.endpoints.join(","),
            prefix = %config.key_prefix,
            "Connected to etcd"
        );
        Ok(Self::new(client, &config.key_prefix, config.request_timeout))
    }

    /// Wrap an existing client
    pub fn new(client: Client, prefix: &str, request_timeout: Duration) -> Self {
        Self {
            client,
            prefix: prefix.to_string(),
            request_timeout,
        }
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    fn relative_key(&self, raw: &[u8]) -> Result<String> {
        let key = std::str::from_utf8(raw)
            .map_err(|e| Error::serialization_for_kind("key", e.to_string()))?;
        Ok(key.strip_prefix(&self.prefix).unwrap_or(key).to_string())
    }

    /// Run one request under the request timeout
    async fn bounded<T, F>(&self, operation: &str, request: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, etcd_client::Error>>,
    {
        match tokio::time::timeout(self.request_timeout, request).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(classify_error(operation, self.request_timeout, e)),
            Err(_) => Err(Error::timeout(operation, self.request_timeout)),
        }
    }

    fn to_etcd_txn(&self, txn: Txn) -> etcd_client::Txn {
        let compare: Vec<etcd_client::Compare> = txn
            .compare
            .iter()
            .map(|c| match c {
                Compare::KeyMissing { key } => {
                    etcd_client::Compare::version(self.full_key(key), CompareOp::Equal, 0)
                }
                Compare::ModRevision { key, revision } => etcd_client::Compare::mod_revision(
                    self.full_key(key),
                    CompareOp::Equal,
                    *revision,
                ),
            })
            .collect();

        etcd_client::Txn::new()
            .when(compare)
            .and_then(self.to_etcd_ops(txn.success))
            .or_else(self.to_etcd_ops(txn.failure))
    }

    fn to_etcd_ops(&self, ops: Vec<TxnOp>) -> Vec<etcd_client::TxnOp> {
        ops.into_iter()
            .map(|op| match op {
                TxnOp::Put { key, value } => {
                    etcd_client::TxnOp::put(self.full_key(&key), value, None)
                }
                TxnOp::Delete { key } => etcd_client::TxnOp::delete(self.full_key(&key), None),
                TxnOp::Txn(inner) => etcd_client::TxnOp::txn(self.to_etcd_txn(*inner)),
            })
            .collect()
    }
}

fn from_etcd_response(resp: etcd_client::TxnResponse, revision: i64) -> TxnResponse {
    let responses = resp
        .op_responses()
        .into_iter()
        .filter_map(|op| match op {
            etcd_client::TxnOpResponse::Put(_) => Some(TxnOpResponse::Put),
            etcd_client::TxnOpResponse::Delete(d) => Some(TxnOpResponse::Delete {
                deleted: d.deleted(),
            }),
            etcd_client::TxnOpResponse::Txn(inner) => {
                Some(TxnOpResponse::Txn(from_etcd_response(inner, revision)))
            }
            etcd_client::TxnOpResponse::Get(_) => None,
        })
        .collect();

    TxnResponse {
        succeeded: resp.succeeded(),
        responses,
        revision,
    }
}

/// Turn a client error into a store error
///
/// etcd_client::Error carries gRPC status text only, so deadline errors are
/// recognized by message.
fn classify_error(operation: &str, timeout: Duration, err: etcd_client::Error) -> Error {
    let message = err.to_string();
    let lower = message.to_lowercase();
    if lower.contains("deadline exceeded") || lower.contains("timed out") {
        Error::timeout(operation, timeout)
    } else {
        Error::store(operation, message)
    }
}

#[async_trait]
impl KvStore for EtcdStore {
    async fn get(&self, key: &str) -> Result<Option<KeyValue>> {
        let mut client = self.client.clone();
        let resp = self.bounded("get", client.get(self.full_key(key), None)).await?;

        match resp.kvs().first() {
            Some(kv) => Ok(Some(KeyValue {
                key: key.to_string(),
                value: kv.value().to_vec(),
                mod_revision: kv.mod_revision(),
            })),
            None => Ok(None),
        }
    }

    async fn get_prefix(&self, prefix: &str) -> Result<Vec<KeyValue>> {
        let mut client = self.client.clone();
        let resp = self
            .bounded(
                "get_prefix",
                client.get(self.full_key(prefix), Some(GetOptions::new().with_prefix())),
            )
            .await?;

        resp.kvs()
            .iter()
            .map(|kv| {
                Ok(KeyValue {
                    key: self.relative_key(kv.key())?,
                    value: kv.value().to_vec(),
                    mod_revision: kv.mod_revision(),
                })
            })
            .collect()
    }

    async fn txn(&self, txn: Txn) -> Result<TxnResponse> {
        let mut client = self.client.clone();
        let request = self.to_etcd_txn(txn);
        let resp = self.bounded("txn", client.txn(request)).await?;

        let revision = resp.header().map_or(0, |h| h.revision());
        debug!(succeeded = resp.succeeded(), revision, "etcd txn");
        Ok(from_etcd_response(resp, revision))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deadline_messages_map_to_timeout() {
        let err = classify_error(
            "txn",
            Duration::from_secs(3),
            etcd_client::Error::InvalidArgs("context deadline exceeded".into()),
        );
        assert!(matches!(err, Error::Timeout { .. }));

        let err = classify_error(
            "get",
            Duration::from_secs(3),
            etcd_client::Error::InvalidArgs("permission denied".into()),
        );
        assert!(matches!(err, Error::Store { ref operation, .. } if operation == "get"));
    }
}
