//! Pool Manager
//!
//! Pool and subnet lifecycle against the store. Every write that depends on
//! a read carries the read's revision as a guard; a failed guard restarts
//! the read-modify-write sequence. Uniqueness of pool names and of subnets
//! across pools is enforced by store-side guards, never by local locks.
//!
//! Registering a subnet writes three keys in one nested transaction: the
//! pool record, the subnet ownership marker and the empty block assignment
//! record. The outer guard protects the pool record, the inner guard the
//! subnet marker, and each outcome is read back separately.

use std::collections::BTreeMap;
use std::sync::Arc;

use coil_common::keys;
use coil_common::model::{validate_pool_name, validate_subnet, AddressPool, BlockAssignment};
use coil_common::retry::RetryConfig;
use coil_common::{Error, Result};
use coil_store::{Compare, KvStore, Txn, TxnOp};
use ipnet::IpNet;
use tracing::{debug, info, instrument};

use crate::notify::Notifier;
use crate::record::{decode, encode, nested_succeeded, read_pool};

/// Pool and subnet lifecycle operations
#[derive(Clone)]
pub struct PoolManager {
    store: Arc<dyn KvStore>,
    notifier: Option<Arc<dyn Notifier>>,
    retry: RetryConfig,
}

impl PoolManager {
    /// Create a manager over `store`
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self {
            store,
            notifier: None,
            retry: RetryConfig::conflict(),
        }
    }

    /// Signal `notifier` whenever a pool gains capacity
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Override the backoff used between revision-conflict retries
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Create a pool with its single initial subnet
    ///
    /// Fails with `PoolExists` if the name is taken and with `SubnetInUse`
    /// if any pool already owns the subnet. Either way nothing is written.
    ///
    /// Ownership is per exact subnet: a subnet that merely overlaps one of
    /// another pool (`10.0.0.0/24` inside `10.0.0.0/16`) is accepted, and the
    /// two pools can then grant the same addresses. Keep pools disjoint.
    #[instrument(skip(self, pool), fields(pool = %name))]
    pub async fn add_pool(&self, name: &str, pool: &AddressPool) -> Result<()> {
        validate_pool_name(name)?;
        if pool.subnets.len() != 1 {
            return Err(Error::validation_for_field(
                name,
                "subnets",
                format!(
                    "a new pool must have exactly one subnet, got {}",
                    pool.subnets.len()
                ),
            ));
        }
        pool.validate()?;
        let subnet = pool.subnets[0];

        let txn = Txn::new()
            .when(vec![Compare::key_missing(keys::pool_key(name))])
            .and_then(vec![register_subnet(name, pool, &subnet)?]);
        let resp = self.store.txn(txn).await?;

        if !resp.succeeded {
            return Err(Error::pool_exists(name));
        }
        if !nested_succeeded(&resp)? {
            return Err(Error::subnet_in_use(subnet));
        }

        info!(subnet = %subnet, block_size = pool.block_size, "Pool created");
        Ok(())
    }

    /// Append a subnet to an existing pool
    ///
    /// Concurrent changes to the pool record are retried without bound.
    /// Fails with `NotFound` if the pool does not exist (or disappears
    /// while retrying) and with `SubnetInUse` if any pool owns the subnet.
    #[instrument(skip(self), fields(pool = %name, subnet = %subnet))]
    pub async fn add_subnet(&self, name: &str, subnet: IpNet) -> Result<()> {
        validate_subnet(&subnet)?;
        let pool_key = keys::pool_key(name);
        let mut backoff = self.retry.backoff();

        loop {
            let Some((mut pool, revision)) = read_pool(&*self.store, name).await? else {
                return Err(Error::pool_not_found(name));
            };
            if pool.has_subnet(&subnet) {
                return Err(Error::subnet_in_use(subnet));
            }
            pool.subnets.push(subnet);
            pool.validate()?;

            let txn = Txn::new()
                .when(vec![Compare::mod_revision(&pool_key, revision)])
                .and_then(vec![register_subnet(name, &pool, &subnet)?]);
            let resp = self.store.txn(txn).await?;

            if resp.succeeded {
                if !nested_succeeded(&resp)? {
                    return Err(Error::subnet_in_use(subnet));
                }
                info!(subnets = pool.subnets.len(), "Subnet added");
                if let Some(notifier) = &self.notifier {
                    notifier.notify(name);
                }
                return Ok(());
            }

            debug!(
                attempt = backoff.attempt() + 1,
                revision, "pool record changed concurrently, retrying"
            );
            if !backoff.wait().await {
                return Err(Error::internal_with_context(
                    "add_subnet",
                    format!("gave up after {} revision conflicts", backoff.attempt()),
                ));
            }
        }
    }

    /// Fetch a pool record
    pub async fn get_pool(&self, name: &str) -> Result<AddressPool> {
        read_pool(&*self.store, name)
            .await?
            .map(|(pool, _)| pool)
            .ok_or_else(|| Error::pool_not_found(name))
    }

    /// Fetch every pool record, keyed by pool name
    pub async fn list_pools(&self) -> Result<BTreeMap<String, AddressPool>> {
        let mut pools = BTreeMap::new();
        for kv in self.store.get_prefix(keys::POOL_PREFIX).await? {
            let Some(name) = keys::pool_name_from_key(&kv.key) else {
                continue;
            };
            pools.insert(name.to_string(), decode("pool", &kv)?);
        }
        Ok(pools)
    }

    /// Delete a pool with every subnet marker and block record it owns
    ///
    /// The delete is guarded by the pool record's revision, so a subnet
    /// appended between the read and the delete forces a fresh read and is
    /// deleted too.
    #[instrument(skip(self), fields(pool = %name))]
    pub async fn remove_pool(&self, name: &str) -> Result<()> {
        let pool_key = keys::pool_key(name);
        let mut backoff = self.retry.backoff();

        loop {
            let Some((pool, revision)) = read_pool(&*self.store, name).await? else {
                return Err(Error::pool_not_found(name));
            };

            let mut doomed = Vec::with_capacity(1 + 2 * pool.subnets.len());
            doomed.push(pool_key.clone());
            for subnet in &pool.subnets {
                doomed.push(keys::subnet_key(subnet));
                doomed.push(keys::block_key(name, subnet));
            }

            let guard = Compare::mod_revision(&pool_key, revision);
            if self.store.delete_all(doomed, Some(guard)).await? {
                info!(subnets = pool.subnets.len(), "Pool removed");
                return Ok(());
            }

            debug!(
                attempt = backoff.attempt() + 1,
                revision, "pool record changed concurrently, retrying"
            );
            if !backoff.wait().await {
                return Err(Error::internal_with_context(
                    "remove_pool",
                    format!("gave up after {} revision conflicts", backoff.attempt()),
                ));
            }
        }
    }
}

/// Nested transaction claiming `subnet` for pool `name`
///
/// Writes the updated pool record, the subnet marker and an empty block
/// assignment record, only if no pool owns the subnet yet.
fn register_subnet(name: &str, pool: &AddressPool, subnet: &IpNet) -> Result<TxnOp> {
    let subnet_key = keys::subnet_key(subnet);
    let assignment = BlockAssignment::empty(*subnet, pool.block_size);

    Ok(TxnOp::txn(
        Txn::new()
            .when(vec![Compare::key_missing(&subnet_key)])
            .and_then(vec![
                TxnOp::put(keys::pool_key(name), encode("pool", pool)?),
                TxnOp::put(subnet_key, Vec::new()),
                TxnOp::put(keys::block_key(name, subnet), encode("block", &assignment)?),
            ]),
    ))
}
