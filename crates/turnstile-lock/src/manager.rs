//! Sequential lock manager
//!
//! Each acquisition creates one ephemeral sequential node under the lock's
//! root and waits until it has the smallest sequence number among the
//! siblings. A waiter watches only its immediate predecessor, so a release
//! wakes exactly one waiter and nobody stampedes. After every wakeup the
//! siblings are listed again: a deletion only means the queue changed, not
//! that the waiter is now first.
//!
//! Every coordination call made on behalf of an attempt is bounded by the
//! attempt's deadline, so a client that retries internally cannot stretch
//! the caller's budget.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{Instrument, debug, info, info_span, warn};
use turnstile_common::{TurnstileConfig, path};
use turnstile_coordination::{CoordinationClient, CoordinationError, WatchedEvent, Watcher};
use uuid::Uuid;

use crate::error::{LockError, Result};
use crate::handle::{LockHandle, delete_if_exists, spawn_cleanup};
use crate::metrics;
use crate::ordering::{self, Position};
use crate::session::{SessionGate, deadline_after};
use crate::wait_gate::{WaitGate, WaitOutcome};

/// Run one coordination call, giving up with `TimedOut` at `deadline`.
async fn within<T, F>(deadline: Instant, call: F) -> Result<std::result::Result<T, CoordinationError>>
where
    F: Future<Output = std::result::Result<T, CoordinationError>>,
{
    tokio::time::timeout_at(deadline, call)
        .await
        .map_err(|_| LockError::TimedOut)
}

/// Node created by an attempt that does not own the lock yet.
///
/// Dropping it while armed deletes the node in the background, which covers
/// acquire futures dropped mid-wait.
struct PendingNode {
    client: Arc<dyn CoordinationClient>,
    node_path: Option<String>,
}

impl PendingNode {
    fn new(client: Arc<dyn CoordinationClient>, node_path: String) -> Self {
        Self {
            client,
            node_path: Some(node_path),
        }
    }

    /// The node is owned by a handle now, or already gone.
    fn disarm(&mut self) {
        self.node_path = None;
    }

    /// Delete the node before giving up on the attempt. Past `deadline` the
    /// delete is left to the background cleanup.
    async fn abandon(mut self, deadline: Instant) {
        let Some(node_path) = self.node_path.clone() else {
            return;
        };
        match within(deadline, delete_if_exists(self.client.as_ref(), &node_path)).await {
            Ok(Ok(_)) => debug!("Deleted abandoned lock node {}", node_path),
            Ok(Err(CoordinationError::SessionExpired(_))) => {}
            Ok(Err(e)) => {
                warn!(
                    "Failed to delete abandoned lock node {}: {}, retrying in background",
                    node_path, e
                );
                return;
            }
            Err(_) => {
                debug!(
                    "Deadline reached deleting {}, retrying in background",
                    node_path
                );
                return;
            }
        }
        self.disarm();
    }
}

impl Drop for PendingNode {
    fn drop(&mut self) {
        if let Some(node_path) = self.node_path.take() {
            spawn_cleanup(self.client.clone(), node_path);
        }
    }
}

/// Distributed mutual exclusion over a `CoordinationClient`.
///
/// One manager serves any number of concurrent acquisitions for any keys;
/// all of them share the client's session.
pub struct LockManager {
    client: Arc<dyn CoordinationClient>,
    session: Arc<SessionGate>,
    locks_base: String,
    acquire_timeout: Duration,
    connection_timeout: Duration,
}

impl LockManager {
    pub fn new(client: Arc<dyn CoordinationClient>) -> Self {
        Self::with_config(client, &TurnstileConfig::default())
    }

    pub fn with_config(client: Arc<dyn CoordinationClient>, config: &TurnstileConfig) -> Self {
        let session = SessionGate::attach(client.as_ref());
        Self {
            client,
            session,
            locks_base: config.locks_base(),
            acquire_timeout: config.lock.acquire_timeout(),
            connection_timeout: config.lock.connection_timeout(),
        }
    }

    pub fn session(&self) -> &Arc<SessionGate> {
        &self.session
    }

    pub fn client(&self) -> &Arc<dyn CoordinationClient> {
        &self.client
    }

    /// Root under which contenders for `lock_key` queue.
    pub fn lock_root(&self, lock_key: &str) -> Result<String> {
        Ok(path::lock_root(&self.locks_base, lock_key)?)
    }

    /// Wait up to the configured connection timeout for a connected session.
    pub async fn await_connected(&self) -> Result<()> {
        self.session.await_connected(self.connection_timeout).await
    }

    /// Acquire with the configured default timeout. Waiting for a connected
    /// session is further capped by the configured connection timeout.
    pub async fn acquire_default(&self, lock_key: &str) -> Result<LockHandle> {
        self.acquire_within(lock_key, self.acquire_timeout, self.connection_timeout)
            .await
    }

    /// Acquire `lock_key`, waiting at most `timeout` in total.
    ///
    /// The budget covers waiting for a connected session and every wait in
    /// the queue. On `TimedOut` or any failure other than `SessionExpired`
    /// the attempt's node has been deleted (or is being deleted in the
    /// background when the service is unreachable).
    pub async fn acquire(&self, lock_key: &str, timeout: Duration) -> Result<LockHandle> {
        self.acquire_within(lock_key, timeout, timeout).await
    }

    async fn acquire_within(
        &self,
        lock_key: &str,
        timeout: Duration,
        connect_timeout: Duration,
    ) -> Result<LockHandle> {
        let started = Instant::now();
        let deadline = deadline_after(timeout);
        let connect_deadline = deadline.min(deadline_after(connect_timeout));
        let attempt_id = Uuid::new_v4();
        let span = info_span!("lock_attempt", key = %lock_key, attempt = %attempt_id);

        let result = self
            .attempt(lock_key, connect_deadline, deadline)
            .instrument(span)
            .await;
        let waited = started.elapsed();
        match &result {
            Ok(handle) => {
                metrics::record_acquired(lock_key, waited);
                info!(
                    "Acquired lock {} with {} after {:?}",
                    lock_key,
                    handle.node_path(),
                    waited
                );
            }
            Err(LockError::TimedOut) => {
                metrics::record_timeout(lock_key);
                info!("Timed out acquiring lock {} after {:?}", lock_key, waited);
            }
            Err(e) => {
                metrics::record_failed(lock_key, e.kind());
                warn!("Failed to acquire lock {}: {}", lock_key, e);
            }
        }
        result
    }

    /// A single attempt that does not wait in the queue.
    ///
    /// Returns `None` when someone else holds the lock; the attempt's node is
    /// removed again.
    pub async fn try_acquire(&self, lock_key: &str) -> Result<Option<LockHandle>> {
        match self.acquire(lock_key, Duration::ZERO).await {
            Ok(handle) => Ok(Some(handle)),
            Err(LockError::TimedOut) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn release(&self, handle: LockHandle) -> Result<()> {
        handle.release().await
    }

    /// Run `f` while holding `lock_key`; the lock is released afterwards
    /// whatever `f` returns.
    pub async fn with_lock<F, Fut, T>(&self, lock_key: &str, timeout: Duration, f: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let handle = self.acquire(lock_key, timeout).await?;
        let output = f().await;
        handle.release().await?;
        Ok(output)
    }

    /// Whether `handle`'s node still exists and is first in its queue.
    pub async fn is_held(&self, handle: &LockHandle) -> Result<bool> {
        let root = path::parent(handle.node_path());
        let children = self.client.list_children(root).await?;
        let siblings = ordering::sorted_siblings(&children);
        Ok(ordering::position_of(&siblings, path::node_name(handle.node_path()))
            == Position::Holder)
    }

    /// Path of the node currently holding `lock_key`.
    pub async fn current_holder(&self, lock_key: &str) -> Result<Option<String>> {
        let root = self.lock_root(lock_key)?;
        let children = self.client.list_children(&root).await?;
        let siblings = ordering::sorted_siblings(&children);
        Ok(ordering::holder(&siblings).map(|name| path::join(&root, name)))
    }

    async fn attempt(
        &self,
        lock_key: &str,
        connect_deadline: Instant,
        deadline: Instant,
    ) -> Result<LockHandle> {
        let root = self.lock_root(lock_key)?;
        self.session.await_connected_until(connect_deadline).await?;

        let prefix = path::node_prefix(&root);
        let node_path = within(deadline, self.client.create_ephemeral_sequential(&prefix)).await??;
        let mut pending = PendingNode::new(self.client.clone(), node_path.clone());
        let Some(sequence) = path::parse_sequence(&node_path) else {
            pending.abandon(deadline).await;
            return Err(LockError::Internal(format!(
                "created node {} has no sequence suffix",
                node_path
            )));
        };
        debug!("Created lock node {}", node_path);

        match self.wait_for_turn(&root, &node_path, deadline).await {
            Ok(()) => {
                pending.disarm();
                Ok(LockHandle::new(
                    lock_key.to_string(),
                    node_path,
                    sequence,
                    self.client.clone(),
                ))
            }
            Err(LockError::SessionExpired) => {
                pending.disarm();
                Err(LockError::SessionExpired)
            }
            Err(e) => {
                pending.abandon(deadline).await;
                Err(e)
            }
        }
    }

    async fn wait_for_turn(&self, root: &str, node_path: &str, deadline: Instant) -> Result<()> {
        let own_name = path::node_name(node_path);
        loop {
            let children = within(deadline, self.client.list_children(root)).await??;
            let siblings = ordering::sorted_siblings(&children);
            let predecessor = match ordering::position_of(&siblings, own_name) {
                Position::Holder => return Ok(()),
                Position::Missing => {
                    warn!("Lock node {} no longer exists", node_path);
                    return Err(LockError::SessionExpired);
                }
                Position::Waiting { predecessor, ahead } => {
                    debug!("{} waiting behind {} ({} ahead)", own_name, predecessor, ahead);
                    path::join(root, &predecessor)
                }
            };

            if Instant::now() >= deadline {
                return Err(LockError::TimedOut);
            }

            let (gate, token) = WaitGate::arm();
            let watcher: Arc<dyn Watcher> = gate;
            let registered = Arc::downgrade(&watcher);
            match within(deadline, self.client.watch_on_delete(&predecessor, watcher.clone())).await? {
                Ok(()) => {}
                Err(CoordinationError::NoSuchNode(_)) => {
                    watcher.process(WatchedEvent::NodeDeleted(predecessor.clone()));
                }
                Err(e) => return Err(e.into()),
            }
            // Only the service keeps the gate alive from here on
            drop(watcher);

            match token.wait(deadline, &self.session).await {
                WaitOutcome::Signalled(event) => {
                    debug!("Predecessor {} deleted, re-evaluating", event.path())
                }
                WaitOutcome::Abandoned => debug!("Watch on {} discarded, re-evaluating", predecessor),
                WaitOutcome::TimedOut => {
                    if let Some(watcher) = registered.upgrade() {
                        self.forget_watch(&predecessor, &watcher, deadline).await;
                    }
                    return Err(LockError::TimedOut);
                }
                WaitOutcome::SessionExpired => return Err(LockError::SessionExpired),
            }
        }
    }

    async fn forget_watch(&self, node_path: &str, watcher: &Arc<dyn Watcher>, deadline: Instant) {
        match within(deadline, self.client.remove_watch(node_path, watcher)).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => debug!("Failed to remove watch on {}: {}", node_path, e),
            Err(_) => debug!("Deadline reached removing watch on {}", node_path),
        }
    }
}
