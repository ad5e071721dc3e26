//! In-process coordination service
//!
//! A ZooKeeper-like store kept in memory: per-parent sequence counters,
//! session-owned ephemeral nodes, one-shot delete watches, and a session
//! lifecycle that can be driven explicitly (suspend, resume, expire, close).
//! With a session timeout configured, a suspended session that is not resumed
//! in time expires on its own, as a ZooKeeper session would.
//! Watch and session notifications are delivered in order by a dedicated
//! dispatcher task, never on the caller's task.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use turnstile_common::{SessionSettings, path};

use crate::client::CoordinationClient;
use crate::error::{CoordinationError, Result};
use crate::listener::{SessionListener, Watcher};
use crate::model::{SessionEvent, SessionId, WatchedEvent};

/// Server-side view of a session
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionStatus {
    /// Created but never connected
    Disconnected,
    Connected,
    /// Connection lost, session still alive
    Suspended,
    /// Expired or closed; terminal
    Expired,
}

struct NodeEntry {
    owner: SessionId,
}

struct WatchEntry {
    session: SessionId,
    watcher: Arc<dyn Watcher>,
}

struct SessionEntry {
    status: SessionStatus,
    ever_connected: bool,
    /// Bumped on every suspension so a stale expiry timer can tell it lost
    suspensions: u64,
    listeners: Vec<Arc<dyn SessionListener>>,
    ephemerals: BTreeSet<String>,
}

impl SessionEntry {
    fn new(status: SessionStatus) -> Self {
        Self {
            status,
            ever_connected: status == SessionStatus::Connected,
            suspensions: 0,
            listeners: Vec::new(),
            ephemerals: BTreeSet::new(),
        }
    }
}

enum Notification {
    Watch {
        watcher: Arc<dyn Watcher>,
        event: WatchedEvent,
    },
    Session {
        listeners: Vec<Arc<dyn SessionListener>>,
        event: SessionEvent,
    },
}

#[derive(Default)]
struct StoreState {
    /// parent path -> child name -> node
    children: HashMap<String, BTreeMap<String, NodeEntry>>,
    /// parent path -> next sequence number
    sequences: HashMap<String, u64>,
    /// node path -> pending one-shot watches
    watches: HashMap<String, Vec<WatchEntry>>,
    sessions: HashMap<SessionId, SessionEntry>,
}

impl StoreState {
    fn check_session(&self, session: SessionId) -> Result<()> {
        match self.sessions.get(&session).map(|s| s.status) {
            Some(SessionStatus::Connected) => Ok(()),
            Some(SessionStatus::Disconnected) => Err(CoordinationError::Connection(format!(
                "session {} not connected yet",
                session
            ))),
            Some(SessionStatus::Suspended) => Err(CoordinationError::Connection(format!(
                "connection loss for session {}",
                session
            ))),
            Some(SessionStatus::Expired) | None => Err(CoordinationError::SessionExpired(session)),
        }
    }

    fn exists(&self, node_path: &str) -> bool {
        self.children
            .get(path::parent(node_path))
            .is_some_and(|nodes| nodes.contains_key(path::node_name(node_path)))
    }

    /// Remove a node and queue its delete watches. Returns false if absent.
    fn remove_node(&mut self, node_path: &str, out: &mut Vec<Notification>) -> bool {
        let parent = path::parent(node_path);
        let Some(nodes) = self.children.get_mut(parent) else {
            return false;
        };
        let Some(entry) = nodes.remove(path::node_name(node_path)) else {
            return false;
        };
        if nodes.is_empty() {
            self.children.remove(parent);
        }
        if let Some(session) = self.sessions.get_mut(&entry.owner) {
            session.ephemerals.remove(node_path);
        }
        for watch in self.watches.remove(node_path).unwrap_or_default() {
            out.push(Notification::Watch {
                watcher: watch.watcher,
                event: WatchedEvent::NodeDeleted(node_path.to_string()),
            });
        }
        true
    }

    /// Terminate a session: drop its ephemerals (firing watches held by
    /// others) and discard the watches it registered itself.
    fn end_session(&mut self, session: SessionId, out: &mut Vec<Notification>) -> bool {
        let ephemerals = match self.sessions.get_mut(&session) {
            Some(entry) if entry.status != SessionStatus::Expired => {
                entry.status = SessionStatus::Expired;
                std::mem::take(&mut entry.ephemerals)
            }
            _ => return false,
        };
        for node_path in &ephemerals {
            self.remove_node(node_path, out);
        }
        for watches in self.watches.values_mut() {
            watches.retain(|w| w.session != session);
        }
        self.watches.retain(|_, watches| !watches.is_empty());
        if let Some(entry) = self.sessions.get(&session) {
            out.push(Notification::Session {
                listeners: entry.listeners.clone(),
                event: SessionEvent::Expired,
            });
        }
        true
    }
}

struct Inner {
    state: Mutex<StoreState>,
    notify_tx: mpsc::UnboundedSender<Notification>,
    next_session: AtomicU64,
    session_timeout: Option<Duration>,
}

impl Inner {
    fn dispatch(&self, notifications: Vec<Notification>) {
        for notification in notifications {
            if self.notify_tx.send(notification).is_err() {
                warn!("Notification dispatcher stopped, dropping notification");
                break;
            }
        }
    }
}

/// In-memory coordination service shared by any number of sessions.
///
/// Must be created inside a Tokio runtime: construction spawns the
/// notification dispatcher.
#[derive(Clone)]
pub struct MemoryCoordinationService {
    inner: Arc<Inner>,
}

impl MemoryCoordinationService {
    /// A service whose suspended sessions live until resumed or expired explicitly.
    pub fn new() -> Self {
        Self::build(None)
    }

    /// A service that expires sessions suspended for longer than `timeout`.
    pub fn with_session_timeout(timeout: Duration) -> Self {
        Self::build(Some(timeout))
    }

    pub fn from_settings(settings: &SessionSettings) -> Self {
        Self::with_session_timeout(settings.timeout())
    }

    fn build(session_timeout: Option<Duration>) -> Self {
        let (notify_tx, notify_rx) = mpsc::unbounded_channel();
        tokio::spawn(Self::run_dispatcher(notify_rx));
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(StoreState::default()),
                notify_tx,
                next_session: AtomicU64::new(1),
                session_timeout,
            }),
        }
    }

    pub fn session_timeout(&self) -> Option<Duration> {
        self.inner.session_timeout
    }

    async fn run_dispatcher(mut rx: mpsc::UnboundedReceiver<Notification>) {
        while let Some(notification) = rx.recv().await {
            match notification {
                Notification::Watch { watcher, event } => watcher.process(event),
                Notification::Session { listeners, event } => {
                    for listener in listeners {
                        listener.on_session_event(event);
                    }
                }
            }
        }
        debug!("Notification dispatcher stopped");
    }

    /// Open a new, connected session.
    pub fn connect(&self) -> MemoryClient {
        self.open_session(SessionStatus::Connected)
    }

    /// Open a session that stays disconnected until `resume` is called.
    pub fn connect_deferred(&self) -> MemoryClient {
        self.open_session(SessionStatus::Disconnected)
    }

    fn open_session(&self, status: SessionStatus) -> MemoryClient {
        let session = SessionId(self.inner.next_session.fetch_add(1, Ordering::Relaxed));
        self.inner
            .state
            .lock()
            .sessions
            .insert(session, SessionEntry::new(status));
        debug!("Opened session {} ({:?})", session, status);
        MemoryClient {
            service: self.clone(),
            session,
        }
    }

    /// Simulate connection loss. Returns false unless the session was connected.
    pub fn suspend(&self, session: SessionId) -> bool {
        let mut epoch = 0;
        let suspended = self.transition(session, |entry| {
            (entry.status == SessionStatus::Connected).then(|| {
                entry.status = SessionStatus::Suspended;
                entry.suspensions += 1;
                epoch = entry.suspensions;
                SessionEvent::Suspended
            })
        });
        if suspended && let Some(timeout) = self.inner.session_timeout {
            Self::schedule_expiry(Arc::downgrade(&self.inner), session, epoch, timeout);
        }
        suspended
    }

    fn schedule_expiry(inner: Weak<Inner>, session: SessionId, epoch: u64, timeout: Duration) {
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let Some(inner) = inner.upgrade() else {
                return;
            };
            let mut out = Vec::new();
            let mut state = inner.state.lock();
            let lapsed = state.sessions.get(&session).is_some_and(|entry| {
                entry.status == SessionStatus::Suspended && entry.suspensions == epoch
            });
            if lapsed && state.end_session(session, &mut out) {
                warn!(
                    "Session {} not resumed within {:?}, expired",
                    session, timeout
                );
                drop(state);
                inner.dispatch(out);
            }
        });
    }

    /// Establish or re-establish the connection of a live session.
    pub fn resume(&self, session: SessionId) -> bool {
        self.transition(session, |entry| match entry.status {
            SessionStatus::Disconnected | SessionStatus::Suspended => {
                let event = if entry.ever_connected {
                    SessionEvent::Reconnected
                } else {
                    SessionEvent::Connected
                };
                entry.status = SessionStatus::Connected;
                entry.ever_connected = true;
                Some(event)
            }
            _ => None,
        })
    }

    fn transition<F>(&self, session: SessionId, f: F) -> bool
    where
        F: FnOnce(&mut SessionEntry) -> Option<SessionEvent>,
    {
        let mut state = self.inner.state.lock();
        let Some(entry) = state.sessions.get_mut(&session) else {
            return false;
        };
        let Some(event) = f(entry) else {
            return false;
        };
        info!("Session {} -> {}", session, event);
        let notification = Notification::Session {
            listeners: entry.listeners.clone(),
            event,
        };
        self.inner.dispatch(vec![notification]);
        true
    }

    /// Expire a session: its ephemeral nodes are deleted (firing watches) and
    /// its listeners receive `Expired`. Returns false if already ended.
    pub fn expire(&self, session: SessionId) -> bool {
        let mut out = Vec::new();
        let mut state = self.inner.state.lock();
        let ended = state.end_session(session, &mut out);
        if ended {
            info!("Session {} expired", session);
        }
        self.inner.dispatch(out);
        ended
    }

    /// Child names of `root`, sorted.
    pub fn children(&self, root: &str) -> Vec<String> {
        self.inner
            .state
            .lock()
            .children
            .get(root)
            .map(|nodes| nodes.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn exists(&self, node_path: &str) -> bool {
        self.inner.state.lock().exists(node_path)
    }

    /// Number of pending watches on `node_path`.
    pub fn watch_count(&self, node_path: &str) -> usize {
        self.inner
            .state
            .lock()
            .watches
            .get(node_path)
            .map_or(0, Vec::len)
    }

    pub fn session_status(&self, session: SessionId) -> Option<SessionStatus> {
        self.inner
            .state
            .lock()
            .sessions
            .get(&session)
            .map(|s| s.status)
    }
}

impl Default for MemoryCoordinationService {
    fn default() -> Self {
        Self::new()
    }
}

/// A session on a `MemoryCoordinationService`.
#[derive(Clone)]
pub struct MemoryClient {
    service: MemoryCoordinationService,
    session: SessionId,
}

impl fmt::Debug for MemoryClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryClient")
            .field("session", &self.session)
            .finish()
    }
}

impl MemoryClient {
    pub fn service(&self) -> &MemoryCoordinationService {
        &self.service
    }

    /// Close the session. Ephemeral nodes are removed as on expiry.
    pub fn close(&self) -> bool {
        self.service.expire(self.session)
    }
}

#[async_trait]
impl CoordinationClient for MemoryClient {
    fn session_id(&self) -> SessionId {
        self.session
    }

    async fn create_ephemeral_sequential(&self, path_prefix: &str) -> Result<String> {
        let inner = &self.service.inner;
        let mut state = inner.state.lock();
        state.check_session(self.session)?;

        let parent = path::parent(path_prefix).to_string();
        let sequence = {
            let next = state.sequences.entry(parent.clone()).or_insert(0);
            let current = *next;
            *next += 1;
            current
        };
        let name = path::sequential_name(path::node_name(path_prefix), sequence);
        let node_path = path::join(&parent, &name);

        state
            .children
            .entry(parent)
            .or_default()
            .insert(name, NodeEntry { owner: self.session });
        if let Some(entry) = state.sessions.get_mut(&self.session) {
            entry.ephemerals.insert(node_path.clone());
        }
        debug!("Session {} created {}", self.session, node_path);
        Ok(node_path)
    }

    async fn list_children(&self, root: &str) -> Result<Vec<String>> {
        let state = self.service.inner.state.lock();
        state.check_session(self.session)?;
        Ok(state
            .children
            .get(root)
            .map(|nodes| nodes.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn watch_on_delete(&self, node_path: &str, watcher: Arc<dyn Watcher>) -> Result<()> {
        let mut state = self.service.inner.state.lock();
        state.check_session(self.session)?;
        if !state.exists(node_path) {
            return Err(CoordinationError::NoSuchNode(node_path.to_string()));
        }
        let entries = state.watches.entry(node_path.to_string()).or_default();
        entries.retain(|w| w.watcher.is_active());
        entries.push(WatchEntry {
            session: self.session,
            watcher,
        });
        Ok(())
    }

    async fn remove_watch(&self, node_path: &str, watcher: &Arc<dyn Watcher>) -> Result<bool> {
        let mut state = self.service.inner.state.lock();
        state.check_session(self.session)?;
        let Some(entries) = state.watches.get_mut(node_path) else {
            return Ok(false);
        };
        let before = entries.len();
        entries.retain(|w| !Arc::ptr_eq(&w.watcher, watcher));
        let removed = entries.len() < before;
        if entries.is_empty() {
            state.watches.remove(node_path);
        }
        Ok(removed)
    }

    async fn delete(&self, node_path: &str) -> Result<()> {
        let inner = &self.service.inner;
        let mut out = Vec::new();
        let mut state = inner.state.lock();
        state.check_session(self.session)?;
        if !state.remove_node(node_path, &mut out) {
            return Err(CoordinationError::NoSuchNode(node_path.to_string()));
        }
        debug!("Session {} deleted {}", self.session, node_path);
        inner.dispatch(out);
        Ok(())
    }

    fn subscribe_session_events(&self, listener: Arc<dyn SessionListener>) {
        let inner = &self.service.inner;
        let mut state = inner.state.lock();
        let Some(entry) = state.sessions.get_mut(&self.session) else {
            return;
        };
        entry.listeners.push(listener.clone());
        let current = match entry.status {
            SessionStatus::Disconnected => None,
            SessionStatus::Connected => Some(SessionEvent::Connected),
            SessionStatus::Suspended => Some(SessionEvent::Suspended),
            SessionStatus::Expired => Some(SessionEvent::Expired),
        };
        if let Some(event) = current {
            inner.dispatch(vec![Notification::Session {
                listeners: vec![listener],
                event,
            }]);
        }
    }
}
