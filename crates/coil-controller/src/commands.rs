//! Command implementations
//!
//! Pool and block commands return the text to print so that they can be
//! exercised against the in-memory store.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use coil_common::crd::BlockRequest;
use coil_common::model::AddressPool;
use coil_ipam::{NodeIpam, PoolManager};
use coil_store::{KvStore, StoreConfig};
use ipnet::IpNet;
use kube::{Client, CustomResourceExt};
use tracing::info;

use crate::cli::{BlockCommand, Cli, Commands, PoolCommand};
use crate::watcher::{block_request_controller, Context, KubeBlockRequestReader};

/// Dispatch a parsed command line
pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = cli.store.to_config();
    let output = match cli.command {
        Commands::Crd => crd_yaml()?,
        Commands::Pool(cmd) => run_pool(cmd, open_store(&config).await?).await?,
        Commands::Block(cmd) => run_block(cmd, open_store(&config).await?).await?,
    };
    println!("{output}");
    Ok(())
}

async fn open_store(config: &StoreConfig) -> anyhow::Result<Arc<dyn KvStore>> {
    coil_store::connect(config)
        .await
        .context("failed to open the store")
}

/// BlockRequest CRD manifest as YAML
pub fn crd_yaml() -> anyhow::Result<String> {
    serde_yaml::to_string(&BlockRequest::crd())
        .map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {}", e))
}

/// Wait for a block of `pool` while `reconciler` runs in the same process
///
/// The reconciler wakes the wait through the signal hub of `ipam`, so it
/// must have been built with `ipam` (or a clone) as its notifier. If the
/// reconciler stops first the wait is abandoned.
pub async fn wait_alongside<R>(
    ipam: &NodeIpam,
    node: &str,
    pool: &str,
    deadline: Duration,
    reconciler: R,
) -> anyhow::Result<IpNet>
where
    R: Future<Output = ()>,
{
    tokio::select! {
        waited = tokio::time::timeout(deadline, ipam.wait_for_block(node, pool)) => {
            let block = waited.map_err(|_| {
                anyhow::anyhow!("no block in pool {pool} after {}s", deadline.as_secs())
            })??;
            Ok(block)
        }
        _ = reconciler => {
            anyhow::bail!("BlockRequest reconciler stopped before a block was granted")
        }
    }
}

/// Execute a pool command
pub async fn run_pool(cmd: PoolCommand, store: Arc<dyn KvStore>) -> anyhow::Result<String> {
    let pools = PoolManager::new(store);

    match cmd {
        PoolCommand::Create {
            name,
            subnet,
            block_size,
        } => {
            pools
                .add_pool(&name, &AddressPool::new(subnet, block_size))
                .await?;
            Ok(format!("pool {name} created with subnet {subnet}"))
        }
        PoolCommand::AddSubnet { name, subnet } => {
            pools.add_subnet(&name, subnet).await?;
            Ok(format!("subnet {subnet} added to pool {name}"))
        }
        PoolCommand::Show { name } => {
            let pool = pools.get_pool(&name).await?;
            Ok(serde_json::to_string_pretty(&pool)?)
        }
        PoolCommand::List => {
            let lines: Vec<String> = pools
                .list_pools()
                .await?
                .into_iter()
                .map(|(name, pool)| {
                    let subnets: Vec<String> =
                        pool.subnets.iter().map(ToString::to_string).collect();
                    format!("{name}\tblock_size={}\t{}", pool.block_size, subnets.join(","))
                })
                .collect();
            Ok(lines.join("\n"))
        }
        PoolCommand::Remove { name } => {
            pools.remove_pool(&name).await?;
            Ok(format!("pool {name} removed"))
        }
    }
}

/// Execute a block command
pub async fn run_block(cmd: BlockCommand, store: Arc<dyn KvStore>) -> anyhow::Result<String> {
    let ipam = NodeIpam::new(store);

    match cmd {
        BlockCommand::Acquire {
            node,
            pool,
            wait_secs,
            watch_requests,
            resync_secs,
        } => {
            let Some(secs) = wait_secs else {
                return Ok(ipam.acquire_block(&node, &pool).await?.to_string());
            };
            let ipam = ipam.with_resync_interval(Duration::from_secs(resync_secs));
            let deadline = Duration::from_secs(secs);

            let block = if watch_requests {
                let client = Client::try_default()
                    .await
                    .context("failed to create Kubernetes client")?;
                let ctx = Arc::new(Context::new(
                    Arc::new(KubeBlockRequestReader::new(client.clone())),
                    Arc::new(ipam.clone()),
                ));
                info!(node = %node, pool = %pool, "Waiting for a block while reconciling BlockRequests");
                wait_alongside(&ipam, &node, &pool, deadline, block_request_controller(client, ctx))
                    .await?
            } else {
                wait_alongside(&ipam, &node, &pool, deadline, futures::future::pending()).await?
            };
            Ok(block.to_string())
        }
        BlockCommand::Release { node, pool, block } => {
            ipam.release_block(&node, &pool, block).await?;
            Ok(format!("block {block} released from {node}"))
        }
        BlockCommand::List { node, pool } => {
            let blocks: Vec<String> = ipam
                .assigned_blocks(&node, &pool)
                .await?
                .iter()
                .map(ToString::to_string)
                .collect();
            Ok(blocks.join("\n"))
        }
    }
}
