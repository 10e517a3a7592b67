//! Block allocation properties, exercised against the in-memory store

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use coil_common::model::AddressPool;
use coil_common::Error;
use coil_ipam::{NodeIpam, Notifier, PoolManager};
use coil_store::{KvStore, MemoryStore};
use futures::future::join_all;
use ipnet::IpNet;

fn net(s: &str) -> IpNet {
    s.parse().unwrap()
}

async fn setup(pool: AddressPool) -> (PoolManager, NodeIpam) {
    let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
    let ipam = NodeIpam::new(store.clone());
    let pools = PoolManager::new(store).with_notifier(Arc::new(ipam.clone()));
    pools.add_pool("default", &pool).await.unwrap();
    (pools, ipam)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_grants_never_overlap() {
    // 2 subnets x 16 blocks of 16 addresses
    let pool = AddressPool::new(net("10.0.0.0/24"), 16);
    let (pools, ipam) = setup(pool).await;
    pools.add_subnet("default", net("10.0.1.0/24")).await.unwrap();

    let tasks = (0..40).map(|i| {
        let ipam = ipam.clone();
        tokio::spawn(async move {
            ipam.acquire_block(&format!("node-{}", i % 5), "default")
                .await
        })
    });
    let results: Vec<_> = join_all(tasks)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();

    let granted: Vec<IpNet> = results.iter().filter_map(|r| r.as_ref().ok().copied()).collect();
    assert_eq!(granted.len(), 32);
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(|e| matches!(e, Error::PoolExhausted { .. })));

    let unique: HashSet<IpNet> = granted.iter().copied().collect();
    assert_eq!(unique.len(), granted.len());
    for (i, a) in granted.iter().enumerate() {
        for b in &granted[i + 1..] {
            assert!(!a.contains(b) && !b.contains(a), "{a} overlaps {b}");
        }
    }

    let mut recorded = 0;
    for n in 0..5 {
        recorded += ipam
            .assigned_blocks(&format!("node-{n}"), "default")
            .await
            .unwrap()
            .len();
    }
    assert_eq!(recorded, 32);
}

#[tokio::test]
async fn notify_without_waiters_returns_immediately() {
    let (_, ipam) = setup(AddressPool::new(net("10.0.0.0/24"), 8)).await;

    let started = Instant::now();
    for _ in 0..1000 {
        ipam.notify("default");
        ipam.notify("no-such-pool");
    }
    assert!(started.elapsed() < Duration::from_secs(1));

    // Nothing changed in the pool
    assert!(ipam
        .assigned_blocks("node-1", "default")
        .await
        .unwrap()
        .is_empty());
}

/// Story: many nodes wait on an exhausted pool and one notification
/// wakes them all
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn story_one_subnet_addition_serves_every_waiter() {
    let (pools, ipam) = setup(AddressPool::new(net("10.0.0.0/30"), 4)).await;
    let ipam = ipam.with_resync_interval(Duration::from_secs(3600));
    ipam.acquire_block("node-0", "default").await.unwrap();

    let waiters: Vec<_> = (1..=3)
        .map(|i| {
            let ipam = ipam.clone();
            tokio::spawn(async move {
                ipam.wait_for_block(&format!("node-{i}"), "default").await
            })
        })
        .collect();
    tokio::time::sleep(Duration::from_millis(50)).await;

    pools.add_subnet("default", net("10.0.1.0/28")).await.unwrap();

    let blocks: HashSet<IpNet> = tokio::time::timeout(Duration::from_secs(5), join_all(waiters))
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.unwrap().unwrap())
        .collect();
    assert_eq!(blocks.len(), 3);
    assert!(blocks.iter().all(|b| net("10.0.1.0/28").contains(b)));
}

#[tokio::test]
async fn dropping_a_waiting_allocation_cancels_it() {
    let (_, ipam) = setup(AddressPool::new(net("10.0.0.0/30"), 4)).await;
    ipam.acquire_block("node-0", "default").await.unwrap();

    let waited =
        tokio::time::timeout(Duration::from_millis(50), ipam.wait_for_block("node-1", "default"))
            .await;
    assert!(waited.is_err());
    assert!(ipam
        .assigned_blocks("node-1", "default")
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn removed_pool_stops_granting() {
    let (pools, ipam) = setup(AddressPool::new(net("10.0.0.0/24"), 8)).await;
    ipam.acquire_block("node-1", "default").await.unwrap();
    pools.remove_pool("default").await.unwrap();

    assert!(ipam
        .acquire_block("node-1", "default")
        .await
        .unwrap_err()
        .is_not_found());
}
