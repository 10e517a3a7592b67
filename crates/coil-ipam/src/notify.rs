//! Per-pool wake-up signals
//!
//! Allocation attempts that found a pool exhausted park on the pool's
//! signal. Anything that may have created capacity (a new subnet, a released
//! block, a processed BlockRequest) fires it. A signal only exists while
//! someone is subscribed, so notifying a pool nobody waits on does nothing.

use std::ops::Deref;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Notify;
use tracing::trace;

/// Receiver of "pool state may have changed" signals
///
/// Implementations must not block.
pub trait Notifier: Send + Sync {
    /// Wake every allocation attempt currently waiting on `pool`
    fn notify(&self, pool: &str);
}

/// Hub of lazily created per-pool signals
#[derive(Debug, Default)]
pub struct PoolNotifier {
    pools: DashMap<String, Arc<Notify>>,
}

impl PoolNotifier {
    /// Create an empty hub
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal for `pool`, created on first use
    ///
    /// The signal is dropped from the hub when its last subscription goes.
    pub fn subscribe(&self, pool: &str) -> Subscription<'_> {
        let signal = self
            .pools
            .entry(pool.to_string())
            .or_insert_with(|| Arc::new(Notify::new()))
            .clone();
        Subscription {
            hub: self,
            pool: pool.to_string(),
            signal,
        }
    }

    /// Number of pools with a signal
    pub fn len(&self) -> usize {
        self.pools.len()
    }

    /// True if no pool has a signal yet
    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }
}

/// A held per-pool signal; see [`PoolNotifier::subscribe`]
#[derive(Debug)]
pub struct Subscription<'a> {
    hub: &'a PoolNotifier,
    pool: String,
    signal: Arc<Notify>,
}

impl Subscription<'_> {
    /// True if both subscriptions share one signal
    pub fn same_signal(&self, other: &Subscription<'_>) -> bool {
        Arc::ptr_eq(&self.signal, &other.signal)
    }
}

impl Deref for Subscription<'_> {
    type Target = Notify;

    fn deref(&self) -> &Notify {
        &self.signal
    }
}

impl Drop for Subscription<'_> {
    fn drop(&mut self) {
        // Subscriptions clone under the shard lock, so a count of two (hub
        // plus this one) means nobody else holds the signal
        self.hub.pools.remove_if(&self.pool, |_, signal| {
            Arc::ptr_eq(signal, &self.signal) && Arc::strong_count(signal) == 2
        });
    }
}

impl Notifier for PoolNotifier {
    fn notify(&self, pool: &str) {
        if let Some(signal) = self.pools.get(pool) {
            trace!(pool = %pool, "waking waiters");
            signal.notify_waiters();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_notify_without_subscribers_is_a_no_op() {
        let hub = PoolNotifier::new();
        hub.notify("default");
        hub.notify("default");
        assert!(hub.is_empty());
    }

    #[test]
    fn test_subscribe_reuses_the_pool_signal() {
        let hub = PoolNotifier::new();
        let a = hub.subscribe("default");
        let b = hub.subscribe("default");
        assert!(a.same_signal(&b));
        let _other = hub.subscribe("other");
        assert_eq!(hub.len(), 2);
    }

    /// Story: waiters come and go across many pool names
    ///
    /// The hub only keeps signals somebody still holds, so pools that are
    /// no longer waited on (including removed ones) do not accumulate.
    #[test]
    fn story_signals_are_pruned_with_their_last_subscriber() {
        let hub = PoolNotifier::new();
        for i in 0..100 {
            let _waiter = hub.subscribe(&format!("pool-{i}"));
        }
        assert!(hub.is_empty());

        let first = hub.subscribe("default");
        let second = hub.subscribe("default");
        drop(first);
        assert_eq!(hub.len(), 1, "signal still held by the second waiter");
        drop(second);
        assert!(hub.is_empty());

        // A fresh subscription after pruning gets a working signal
        let again = hub.subscribe("default");
        assert_eq!(hub.len(), 1);
        drop(again);
        assert!(hub.is_empty());
    }

    #[tokio::test]
    async fn test_notify_wakes_all_waiters_of_that_pool_only() {
        let hub = PoolNotifier::new();
        let default = hub.subscribe("default");
        let other = hub.subscribe("other");

        let first = default.notified();
        let second = default.notified();
        let unrelated = other.notified();
        tokio::pin!(first, second, unrelated);
        first.as_mut().enable();
        second.as_mut().enable();
        unrelated.as_mut().enable();

        hub.notify("default");

        tokio::time::timeout(Duration::from_secs(1), async {
            first.await;
            second.await;
        })
        .await
        .unwrap();
        assert!(
            tokio::time::timeout(Duration::from_millis(20), unrelated)
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_signal_is_not_stored_for_future_waiters() {
        let hub = PoolNotifier::new();
        let signal = hub.subscribe("default");
        hub.notify("default");

        // notify_waiters does not leave a permit behind
        let late = signal.notified();
        assert!(
            tokio::time::timeout(Duration::from_millis(20), late)
                .await
                .is_err()
        );
    }
}
