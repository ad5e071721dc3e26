//! Exponential backoff for transient connection failures
//!
//! `RetryingClient` wraps any `CoordinationClient` and retries the idempotent
//! operations (children listing, watch registration, delete) while they fail
//! with `Connection`. Ephemeral-sequential creation is never retried: a
//! create whose reply was lost may still have produced a node, and a second
//! attempt would leave a duplicate in the queue.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tracing::warn;
use turnstile_common::RetrySettings;

use crate::client::CoordinationClient;
use crate::error::Result;
use crate::listener::{SessionListener, Watcher};
use crate::model::SessionId;

/// Upper bound on retries so the backoff shift cannot overflow
const MAX_RETRIES_LIMIT: u32 = 29;

/// Bounded exponential backoff with random jitter.
///
/// Sleep before retry `n` (zero-based) is `base_sleep * max(1, r)` where `r`
/// is drawn from `[0, 2^(n+1))`, capped at `max_sleep`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    base_sleep: Duration,
    max_retries: u32,
    max_sleep: Duration,
}

impl RetryPolicy {
    pub fn new(base_sleep: Duration, max_retries: u32, max_sleep: Duration) -> Self {
        let max_retries = if max_retries > MAX_RETRIES_LIMIT {
            warn!(
                "max_retries too large ({}), clamping to {}",
                max_retries, MAX_RETRIES_LIMIT
            );
            MAX_RETRIES_LIMIT
        } else {
            max_retries
        };
        Self {
            base_sleep,
            max_retries,
            max_sleep,
        }
    }

    pub fn from_settings(settings: &RetrySettings) -> Self {
        Self::new(
            settings.base_sleep(),
            settings.max_retries,
            settings.max_sleep(),
        )
    }

    /// A policy that never retries
    pub fn none() -> Self {
        Self::new(Duration::ZERO, 0, Duration::ZERO)
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Whether another attempt is allowed after `retry_count` retries.
    pub fn allows_retry(&self, retry_count: u32) -> bool {
        retry_count < self.max_retries
    }

    pub fn sleep_for(&self, retry_count: u32) -> Duration {
        let shift = retry_count.min(MAX_RETRIES_LIMIT) + 1;
        let factor = rand::rng().random_range(0..(1u64 << shift)).max(1);
        let sleep = self
            .base_sleep
            .checked_mul(u32::try_from(factor).unwrap_or(u32::MAX))
            .unwrap_or(self.max_sleep);
        sleep.min(self.max_sleep)
    }

    /// Run `op` until it succeeds, fails with a non-connection error, or the
    /// retries are exhausted.
    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut retry_count = 0;
        loop {
            match op().await {
                Err(e) if e.is_connection() && self.allows_retry(retry_count) => {
                    let sleep = self.sleep_for(retry_count);
                    warn!(
                        "{} failed: {}, retrying in {:?} ({}/{})",
                        what,
                        e,
                        sleep,
                        retry_count + 1,
                        self.max_retries
                    );
                    tokio::time::sleep(sleep).await;
                    retry_count += 1;
                }
                result => return result,
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_settings(&RetrySettings::default())
    }
}

/// A coordination client that retries idempotent operations on connection loss.
pub struct RetryingClient<C> {
    inner: C,
    policy: RetryPolicy,
}

impl<C> RetryingClient<C>
where
    C: CoordinationClient,
{
    pub fn new(inner: C, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }
}

#[async_trait]
impl<C> CoordinationClient for RetryingClient<C>
where
    C: CoordinationClient,
{
    fn session_id(&self) -> SessionId {
        self.inner.session_id()
    }

    async fn create_ephemeral_sequential(&self, path_prefix: &str) -> Result<String> {
        self.inner.create_ephemeral_sequential(path_prefix).await
    }

    async fn list_children(&self, root: &str) -> Result<Vec<String>> {
        self.policy
            .run("list_children", || self.inner.list_children(root))
            .await
    }

    async fn watch_on_delete(&self, path: &str, watcher: Arc<dyn Watcher>) -> Result<()> {
        self.policy
            .run("watch_on_delete", || {
                self.inner.watch_on_delete(path, watcher.clone())
            })
            .await
    }

    // Cleanup after a finished wait; a failure only leaves an inactive watch behind.
    async fn remove_watch(&self, path: &str, watcher: &Arc<dyn Watcher>) -> Result<bool> {
        self.inner.remove_watch(path, watcher).await
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.policy.run("delete", || self.inner.delete(path)).await
    }

    fn subscribe_session_events(&self, listener: Arc<dyn SessionListener>) {
        self.inner.subscribe_session_events(listener)
    }
}
