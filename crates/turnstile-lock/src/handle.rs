//! Proof of lock ownership

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::runtime::Handle;
use tracing::{debug, info, warn};
use turnstile_coordination::{CoordinationClient, CoordinationError, RetryPolicy, SessionId};

use crate::error::Result;
use crate::metrics;

const CLEANUP_BASE_SLEEP: Duration = Duration::from_millis(100);
const CLEANUP_MAX_RETRIES: u32 = 5;
const CLEANUP_MAX_SLEEP: Duration = Duration::from_secs(2);

/// A held lock.
///
/// Release it with `release` (or `LockManager::release`). Dropping an
/// unreleased handle deletes its node in the background.
pub struct LockHandle {
    lock_key: String,
    node_path: String,
    sequence: u64,
    session_id: SessionId,
    acquired_at: Instant,
    client: Arc<dyn CoordinationClient>,
    released: bool,
}

impl fmt::Debug for LockHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockHandle")
            .field("lock_key", &self.lock_key)
            .field("node_path", &self.node_path)
            .field("sequence", &self.sequence)
            .field("session_id", &self.session_id)
            .finish()
    }
}

impl LockHandle {
    pub(crate) fn new(
        lock_key: String,
        node_path: String,
        sequence: u64,
        client: Arc<dyn CoordinationClient>,
    ) -> Self {
        Self {
            lock_key,
            node_path,
            sequence,
            session_id: client.session_id(),
            acquired_at: Instant::now(),
            client,
            released: false,
        }
    }

    pub fn lock_key(&self) -> &str {
        &self.lock_key
    }

    /// Full path of the owned node
    pub fn node_path(&self) -> &str {
        &self.node_path
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Session that created the node
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn held_for(&self) -> Duration {
        self.acquired_at.elapsed()
    }

    /// Delete the owned node.
    ///
    /// Succeeds when the node is already gone, whether deleted externally or
    /// removed with an expired session. Connection failures are returned and
    /// the node is then deleted in the background.
    pub async fn release(mut self) -> Result<()> {
        match delete_if_exists(self.client.as_ref(), &self.node_path).await {
            Ok(true) => {}
            Ok(false) => debug!("Lock node {} already gone at release", self.node_path),
            Err(CoordinationError::SessionExpired(session)) => debug!(
                "Session {} expired before release of {}",
                session, self.node_path
            ),
            Err(e) => return Err(e.into()),
        }
        self.released = true;
        metrics::record_released(&self.lock_key);
        info!(
            "Released lock {} ({}) after {:?}",
            self.lock_key,
            self.node_path,
            self.held_for()
        );
        Ok(())
    }
}

impl Drop for LockHandle {
    fn drop(&mut self) {
        if !self.released {
            warn!(
                "Lock handle for {} dropped without release, deleting {}",
                self.lock_key, self.node_path
            );
            spawn_cleanup(self.client.clone(), self.node_path.clone());
        }
    }
}

/// Delete a node, treating absence as success. Returns whether it existed.
pub(crate) async fn delete_if_exists(
    client: &dyn CoordinationClient,
    node_path: &str,
) -> std::result::Result<bool, CoordinationError> {
    match client.delete(node_path).await {
        Ok(()) => Ok(true),
        Err(CoordinationError::NoSuchNode(_)) => Ok(false),
        Err(e) => Err(e),
    }
}

/// Best-effort background delete, retried on connection loss.
///
/// Without a runtime the node is left to be removed with its session.
pub(crate) fn spawn_cleanup(client: Arc<dyn CoordinationClient>, node_path: String) {
    let Ok(runtime) = Handle::try_current() else {
        warn!(
            "No runtime to delete {}, it will be removed when the session ends",
            node_path
        );
        return;
    };

    runtime.spawn(async move {
        let policy = RetryPolicy::new(CLEANUP_BASE_SLEEP, CLEANUP_MAX_RETRIES, CLEANUP_MAX_SLEEP);
        let deleted = policy
            .run("lock node cleanup", || {
                delete_if_exists(client.as_ref(), &node_path)
            })
            .await;
        match deleted {
            Ok(_) => debug!("Cleaned up lock node {}", node_path),
            Err(CoordinationError::SessionExpired(_)) => {
                debug!("Lock node {} went away with its session", node_path)
            }
            Err(e) => warn!("Failed to clean up lock node {}: {}", node_path, e),
        }
    });
}
