//! Block Allocation Coordinator
//!
//! Grants blocks of a pool's subnets to nodes. Each subnet's assignment set
//! is a single store record updated with an optimistic read-modify-write:
//! read it with its revision, grant or release in memory, and write it back
//! guarded by that revision. A conflict means another grant or release
//! committed in between, so the loop re-reads and tries again.

use std::sync::Arc;
use std::time::Duration;

use coil_common::keys;
use coil_common::model::BlockAssignment;
use coil_common::retry::RetryConfig;
use coil_common::{Error, Result};
use coil_store::{Compare, KvStore, Txn, TxnOp};
use ipnet::IpNet;
use tracing::{debug, info, instrument};

use crate::notify::{Notifier, PoolNotifier};
use crate::record::{decode, encode, read_pool};

/// Default interval after which a waiting allocation retries unprompted
pub const DEFAULT_RESYNC_INTERVAL: Duration = Duration::from_secs(30);

/// Server-side block allocation for nodes
#[derive(Clone)]
pub struct NodeIpam {
    store: Arc<dyn KvStore>,
    signals: Arc<PoolNotifier>,
    retry: RetryConfig,
    resync_interval: Duration,
}

impl NodeIpam {
    /// Create a coordinator over `store`
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self {
            store,
            signals: Arc::new(PoolNotifier::new()),
            retry: RetryConfig::conflict(),
            resync_interval: DEFAULT_RESYNC_INTERVAL,
        }
    }

    /// Override the backoff used between revision-conflict retries
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Override how long a waiting allocation sleeps without a signal
    pub fn with_resync_interval(mut self, interval: Duration) -> Self {
        self.resync_interval = interval;
        self
    }

    /// Grant one free block of `pool` to `node`
    ///
    /// Subnets are tried in registration order and blocks in address order.
    /// Fails with `PoolExhausted` if no subnet has a free block.
    #[instrument(skip(self), fields(node = %node, pool = %pool))]
    pub async fn acquire_block(&self, node: &str, pool: &str) -> Result<IpNet> {
        let (record, _) = read_pool(&*self.store, pool)
            .await?
            .ok_or_else(|| Error::pool_not_found(pool))?;

        for subnet in &record.subnets {
            let granted = self
                .update_assignment(pool, subnet, |assignment| assignment.grant(node))
                .await?;
            if let Some(block) = granted {
                info!(block = %block, "Block granted");
                return Ok(block);
            }
        }

        debug!(subnets = record.subnets.len(), "no free block");
        Err(Error::pool_exhausted(pool))
    }

    /// Grant a block, waiting for capacity while the pool is exhausted
    ///
    /// Parks on the pool's signal between attempts, with the resync interval
    /// as a fallback. Errors other than `PoolExhausted` end the wait. Cancel
    /// by dropping the future.
    pub async fn wait_for_block(&self, node: &str, pool: &str) -> Result<IpNet> {
        let signal = self.signals.subscribe(pool);

        loop {
            // Register interest before looking, so a release that lands
            // between the attempt and the wait is not missed
            let notified = signal.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match self.acquire_block(node, pool).await {
                Err(Error::PoolExhausted { .. }) => {}
                other => return other,
            }

            debug!(node = %node, pool = %pool, "waiting for capacity");
            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep(self.resync_interval) => {}
            }
        }
    }

    /// Return `block` held by `node` to the free set
    ///
    /// Fails with `NotFound` if the node does not hold the block.
    #[instrument(skip(self), fields(node = %node, pool = %pool, block = %block))]
    pub async fn release_block(&self, node: &str, pool: &str, block: IpNet) -> Result<()> {
        let (record, _) = read_pool(&*self.store, pool)
            .await?
            .ok_or_else(|| Error::pool_not_found(pool))?;

        let Some(subnet) = record.subnets.iter().find(|s| s.contains(&block)) else {
            return Err(Error::not_found("block", block.to_string()));
        };

        let released = self
            .update_assignment(pool, subnet, |assignment| {
                assignment.release(node, &block).then_some(())
            })
            .await?;
        if released.is_none() {
            return Err(Error::not_found("block", format!("{block} on node {node}")));
        }

        info!("Block released");
        self.notify(pool);
        Ok(())
    }

    /// Return every block `node` holds in `pool`
    #[instrument(skip(self), fields(node = %node, pool = %pool))]
    pub async fn release_node(&self, node: &str, pool: &str) -> Result<Vec<IpNet>> {
        let (record, _) = read_pool(&*self.store, pool)
            .await?
            .ok_or_else(|| Error::pool_not_found(pool))?;

        let mut released = Vec::new();
        for subnet in &record.subnets {
            let blocks = self
                .update_assignment(pool, subnet, |assignment| {
                    let blocks = assignment.release_node(node);
                    (!blocks.is_empty()).then_some(blocks)
                })
                .await?;
            released.extend(blocks.into_iter().flatten());
        }

        if !released.is_empty() {
            info!(count = released.len(), "Node blocks released");
            self.notify(pool);
        }
        Ok(released)
    }

    /// Blocks `node` currently holds in `pool`
    pub async fn assigned_blocks(&self, node: &str, pool: &str) -> Result<Vec<IpNet>> {
        let (record, _) = read_pool(&*self.store, pool)
            .await?
            .ok_or_else(|| Error::pool_not_found(pool))?;

        let mut blocks = Vec::new();
        for subnet in &record.subnets {
            if let Some(kv) = self.store.get(&keys::block_key(pool, subnet)).await? {
                let assignment: BlockAssignment = decode("block", &kv)?;
                blocks.extend_from_slice(assignment.blocks_of(node));
            }
        }
        Ok(blocks)
    }

    /// Revision-guarded update of one subnet's assignment set
    ///
    /// `mutate` runs against a fresh copy on every attempt. Returning None
    /// means there is nothing to write, and the loop stops without a write.
    async fn update_assignment<T, F>(
        &self,
        pool: &str,
        subnet: &IpNet,
        mut mutate: F,
    ) -> Result<Option<T>>
    where
        F: FnMut(&mut BlockAssignment) -> Option<T>,
    {
        let key = keys::block_key(pool, subnet);
        let mut backoff = self.retry.backoff();

        loop {
            // The record goes away only together with the pool
            let Some(kv) = self.store.get(&key).await? else {
                return Err(Error::pool_not_found(pool));
            };
            let mut assignment: BlockAssignment = decode("block", &kv)?;

            let Some(out) = mutate(&mut assignment) else {
                return Ok(None);
            };

            let txn = Txn::new()
                .when(vec![Compare::mod_revision(&key, kv.mod_revision)])
                .and_then(vec![TxnOp::put(&key, encode("block", &assignment)?)]);
            if self.store.txn(txn).await?.succeeded {
                return Ok(Some(out));
            }

            debug!(
                key = %key,
                attempt = backoff.attempt() + 1,
                "assignment changed concurrently, retrying"
            );
            if !backoff.wait().await {
                return Err(Error::internal_with_context(
                    "update_assignment",
                    format!("gave up after {} revision conflicts", backoff.attempt()),
                ));
            }
        }
    }
}

impl Notifier for NodeIpam {
    fn notify(&self, pool: &str) {
        self.signals.notify(pool);
    }
}
