//! Session availability gate
//!
//! Mirrors the coordination session's state from its asynchronous
//! notifications and lets lock attempts wait, with a deadline, for a
//! connected session.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{info, warn};
use turnstile_coordination::{CoordinationClient, SessionEvent, SessionId, SessionListener};

use crate::error::{LockError, Result};

/// Deadline used when a timeout is too large to represent
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// `timeout` from now, saturating at a far-future instant.
pub(crate) fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout).unwrap_or_else(|| now + FAR_FUTURE)
}

/// Session state as seen by the lock manager
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connected,
    /// Connection lost; owned nodes may still exist
    Suspended,
    /// Terminal: every owned node is gone
    Expired,
}

impl SessionState {
    fn from_event(event: SessionEvent) -> Self {
        match event {
            SessionEvent::Connected | SessionEvent::Reconnected => SessionState::Connected,
            SessionEvent::Suspended => SessionState::Suspended,
            SessionEvent::Expired => SessionState::Expired,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connected => "connected",
            SessionState::Suspended => "suspended",
            SessionState::Expired => "expired",
        };
        f.write_str(s)
    }
}

pub struct SessionGate {
    session_id: SessionId,
    state: watch::Sender<SessionState>,
}

impl fmt::Debug for SessionGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionGate")
            .field("session_id", &self.session_id)
            .field("state", &self.state())
            .finish()
    }
}

impl SessionGate {
    /// A detached gate starting in `Disconnected`. Feed it with `on_session_event`.
    pub fn new(session_id: SessionId) -> Self {
        let (state, _) = watch::channel(SessionState::Disconnected);
        Self { session_id, state }
    }

    /// Create a gate subscribed to `client`'s session notifications.
    pub fn attach(client: &dyn CoordinationClient) -> Arc<Self> {
        let gate = Arc::new(Self::new(client.session_id()));
        client.subscribe_session_events(gate.clone());
        gate
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub async fn await_connected(&self, timeout: Duration) -> Result<()> {
        self.await_connected_until(deadline_after(timeout)).await
    }

    /// Wait until the session is connected.
    ///
    /// Fails with `SessionExpired` as soon as the session is expired and with
    /// `SessionUnavailable` once `deadline` passes.
    pub async fn await_connected_until(&self, deadline: Instant) -> Result<()> {
        let mut rx = self.state.subscribe();
        let waited = tokio::time::timeout_at(deadline, async {
            rx.wait_for(|s| matches!(s, SessionState::Connected | SessionState::Expired))
                .await
                .map(|s| *s)
        })
        .await;

        match waited {
            Ok(Ok(SessionState::Connected)) => Ok(()),
            Ok(Ok(_)) => Err(LockError::SessionExpired),
            Ok(Err(_)) | Err(_) => Err(LockError::SessionUnavailable),
        }
    }

    /// Resolves once the session has expired.
    pub async fn wait_for_expiry(&self) {
        let mut rx = self.state.subscribe();
        if rx.wait_for(|s| *s == SessionState::Expired).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

impl SessionListener for SessionGate {
    fn on_session_event(&self, event: SessionEvent) {
        let next = SessionState::from_event(event);
        let changed = self.state.send_if_modified(|current| {
            if *current == SessionState::Expired || *current == next {
                return false;
            }
            *current = next;
            true
        });
        if !changed {
            return;
        }

        match event {
            SessionEvent::Connected => info!("Session {} connected", self.session_id),
            SessionEvent::Reconnected => info!("Session {} reconnected", self.session_id),
            SessionEvent::Suspended => warn!(
                "Session {} suspended, lock operations will fail until reconnected",
                self.session_id
            ),
            SessionEvent::Expired => warn!(
                "Session {} expired, owned lock nodes are gone",
                self.session_id
            ),
        }
    }
}
