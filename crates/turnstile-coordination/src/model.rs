//! Session and watch notification types

use std::fmt;

/// Identity of a coordination session
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

/// Session transitions delivered by a coordination client
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionEvent {
    /// First successful connection
    Connected,
    /// Connection lost; the session (and its ephemeral nodes) may still be alive
    Suspended,
    /// A suspended connection was re-established within the session timeout
    Reconnected,
    /// The session is gone together with every ephemeral node it owned
    Expired,
}

impl SessionEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionEvent::Connected => "CONNECTED",
            SessionEvent::Suspended => "SUSPENDED",
            SessionEvent::Reconnected => "RECONNECTED",
            SessionEvent::Expired => "EXPIRED",
        }
    }
}

impl fmt::Display for SessionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Event delivered to a one-shot watch
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WatchedEvent {
    NodeDeleted(String),
}

impl WatchedEvent {
    pub fn path(&self) -> &str {
        match self {
            WatchedEvent::NodeDeleted(path) => path,
        }
    }
}
