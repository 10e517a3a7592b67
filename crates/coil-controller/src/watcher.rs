//! Block Request Reconciler
//!
//! Watches BlockRequests and tells the allocation side to re-evaluate a pool
//! whenever a request for it has been processed. Requests without conditions
//! have not been looked at yet and are left alone. Deleted requests are never
//! reconciled: the controller only runs for objects still in its cache.
//! Reconciling is idempotent, so a repeated run only repeats a harmless
//! notification.
//!
//! The notifier must be the [`NodeIpam`](coil_ipam::NodeIpam) whose
//! allocations are waiting, i.e. the controller runs in the same process.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use coil_common::crd::BlockRequest;
use coil_common::retry::{Backoff, RetryConfig};
use coil_common::{Error, Result};
use coil_ipam::Notifier;
use dashmap::DashMap;
use futures::StreamExt;
use kube::runtime::controller::Action;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client, ResourceExt};
use tracing::{debug, error, instrument, warn};

#[cfg(test)]
use mockall::automock;

/// Watcher timeout (seconds) - must be less than client read_timeout (30s)
/// This forces the API server to close the watch before the client times out,
/// preventing "body read timed out" errors on idle watches.
pub const WATCH_TIMEOUT_SECS: u32 = 25;

/// Read access to BlockRequests
#[cfg_attr(test, automock)]
#[async_trait]
pub trait BlockRequestReader: Send + Sync {
    /// Fetch a BlockRequest by name; None if it does not exist
    async fn get(&self, name: &str) -> Result<Option<BlockRequest>>;
}

/// [`BlockRequestReader`] backed by the Kubernetes API
pub struct KubeBlockRequestReader {
    api: Api<BlockRequest>,
}

impl KubeBlockRequestReader {
    /// Read cluster-scoped BlockRequests through `client`
    pub fn new(client: Client) -> Self {
        Self {
            api: Api::all(client),
        }
    }
}

#[async_trait]
impl BlockRequestReader for KubeBlockRequestReader {
    async fn get(&self, name: &str) -> Result<Option<BlockRequest>> {
        Ok(self.api.get_opt(name).await?)
    }
}

/// Shared state of the BlockRequest controller
pub struct Context {
    reader: Arc<dyn BlockRequestReader>,
    notifier: Arc<dyn Notifier>,
    retry: RetryConfig,
    /// Requeue backoff per request name, reset by a successful reconcile
    failures: DashMap<String, Backoff>,
}

impl Context {
    /// Create a context reading through `reader` and signalling `notifier`
    pub fn new(reader: Arc<dyn BlockRequestReader>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            reader,
            notifier,
            retry: RetryConfig {
                initial_delay: Duration::from_millis(500),
                ..RetryConfig::with_max_attempts(5)
            },
            failures: DashMap::new(),
        }
    }

    /// Override the requeue backoff for failed reconciles
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }
}

/// Reconcile one BlockRequest
///
/// The object is fetched fresh before acting on it. A missing object is not
/// an error. Fetch errors are returned for [`error_policy`] to judge.
#[instrument(skip(req, ctx), fields(request = %req.name_any()))]
pub async fn reconcile(req: Arc<BlockRequest>, ctx: Arc<Context>) -> Result<Action> {
    if !req.has_conditions() {
        return Ok(Action::await_change());
    }

    let name = req.name_any();
    let fetched = ctx.reader.get(&name).await?;
    ctx.failures.remove(&name);

    let Some(current) = fetched else {
        debug!("BlockRequest is gone");
        return Ok(Action::await_change());
    };
    if !current.has_conditions() {
        return Ok(Action::await_change());
    }

    let pool = &current.spec.pool_name;
    debug!(pool = %pool, node = %current.spec.node_name, "notifying pool");
    ctx.notifier.notify(pool);
    Ok(Action::await_change())
}

/// Decide what happens after a failed reconcile
///
/// Retryable errors requeue with jittered exponential backoff until the
/// attempts run out. Anything else waits for the next change of the object.
pub fn error_policy(req: Arc<BlockRequest>, error: &Error, ctx: Arc<Context>) -> Action {
    let name = req.name_any();

    if !error.is_retryable() {
        ctx.failures.remove(&name);
        error!(?error, request = %name, "reconciliation failed, not retrying");
        return Action::await_change();
    }

    let delay = {
        let mut backoff = ctx
            .failures
            .entry(name.clone())
            .or_insert_with(|| ctx.retry.backoff());
        backoff.next_delay()
    };

    match delay {
        Some(delay) => {
            warn!(
                ?error,
                request = %name,
                delay_ms = delay.as_millis(),
                "reconciliation failed, requeueing"
            );
            Action::requeue(delay)
        }
        None => {
            ctx.failures.remove(&name);
            error!(?error, request = %name, "reconciliation failed after max retries");
            Action::await_change()
        }
    }
}

/// Build the BlockRequest controller future
///
/// Runs until the process receives a termination signal.
pub fn block_request_controller(client: Client, ctx: Arc<Context>) -> impl Future<Output = ()> + Send {
    let requests: Api<BlockRequest> = Api::all(client);

    Controller::new(
        requests,
        WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS),
    )
    .shutdown_on_signal()
    .run(reconcile, error_policy, ctx)
    .for_each(|result| {
        match result {
            Ok((request, action)) => {
                debug!(%request, ?action, "BlockRequest reconciliation completed")
            }
            Err(e) => warn!(error = %e, "BlockRequest reconciliation error"),
        }
        std::future::ready(())
    })
}
