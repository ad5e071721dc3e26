//! The coordination client contract consumed by the lock core

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::listener::{SessionListener, Watcher};
use crate::model::SessionId;

/// Session-backed hierarchical store (ZooKeeper-like).
///
/// Every node created through a client is ephemeral and owned by that
/// client's session: it disappears when the session expires or is closed.
#[async_trait]
pub trait CoordinationClient: Send + Sync {
    /// Identity of the session this client operates under
    fn session_id(&self) -> SessionId;

    /// Create an ephemeral node named `path_prefix` followed by a zero-padded
    /// sequence number unique and increasing within the parent; returns the
    /// full path.
    ///
    /// Fails with `Connection` or `SessionExpired`.
    async fn create_ephemeral_sequential(&self, path_prefix: &str) -> Result<String>;

    /// Names (not paths) of the children of `root`. An absent root has no children.
    async fn list_children(&self, root: &str) -> Result<Vec<String>>;

    /// Register a one-shot watch fired when `path` is deleted.
    ///
    /// Fails with `NoSuchNode` when the node is already absent; callers must
    /// treat that as an immediate fire.
    async fn watch_on_delete(&self, path: &str, watcher: Arc<dyn Watcher>) -> Result<()>;

    /// Unregister a watch before it fires. Returns whether it was still pending.
    async fn remove_watch(&self, path: &str, watcher: &Arc<dyn Watcher>) -> Result<bool>;

    /// Delete a node. Fails with `NoSuchNode` when absent.
    async fn delete(&self, path: &str) -> Result<()>;

    /// Subscribe to session transitions. The current state is delivered as
    /// the first event (nothing while the session has never connected).
    fn subscribe_session_events(&self, listener: Arc<dyn SessionListener>);
}

#[async_trait]
impl<C> CoordinationClient for Arc<C>
where
    C: CoordinationClient + ?Sized,
{
    fn session_id(&self) -> SessionId {
        (**self).session_id()
    }

    async fn create_ephemeral_sequential(&self, path_prefix: &str) -> Result<String> {
        (**self).create_ephemeral_sequential(path_prefix).await
    }

    async fn list_children(&self, root: &str) -> Result<Vec<String>> {
        (**self).list_children(root).await
    }

    async fn watch_on_delete(&self, path: &str, watcher: Arc<dyn Watcher>) -> Result<()> {
        (**self).watch_on_delete(path, watcher).await
    }

    async fn remove_watch(&self, path: &str, watcher: &Arc<dyn Watcher>) -> Result<bool> {
        (**self).remove_watch(path, watcher).await
    }

    async fn delete(&self, path: &str) -> Result<()> {
        (**self).delete(path).await
    }

    fn subscribe_session_events(&self, listener: Arc<dyn SessionListener>) {
        (**self).subscribe_session_events(listener)
    }
}
