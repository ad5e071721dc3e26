//! Watch and session listener traits

use crate::model::{SessionEvent, WatchedEvent};

/// Receiver of a one-shot watch notification.
///
/// Called from the client's notification task, never from the thread that
/// registered the watch.
pub trait Watcher: Send + Sync + 'static {
    fn process(&self, event: WatchedEvent);

    /// Whether anyone still waits for this watch. Services may discard
    /// inactive watches before they fire.
    fn is_active(&self) -> bool {
        true
    }
}

/// Receiver of session state transitions.
pub trait SessionListener: Send + Sync + 'static {
    fn on_session_event(&self, event: SessionEvent);
}

/// A watcher that invokes a closure.
pub struct FnWatcher<F>
where
    F: Fn(WatchedEvent) + Send + Sync + 'static,
{
    f: F,
}

impl<F> FnWatcher<F>
where
    F: Fn(WatchedEvent) + Send + Sync + 'static,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> Watcher for FnWatcher<F>
where
    F: Fn(WatchedEvent) + Send + Sync + 'static,
{
    fn process(&self, event: WatchedEvent) {
        (self.f)(event);
    }
}

/// A session listener that invokes a closure.
pub struct FnSessionListener<F>
where
    F: Fn(SessionEvent) + Send + Sync + 'static,
{
    f: F,
}

impl<F> FnSessionListener<F>
where
    F: Fn(SessionEvent) + Send + Sync + 'static,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> SessionListener for FnSessionListener<F>
where
    F: Fn(SessionEvent) + Send + Sync + 'static,
{
    fn on_session_event(&self, event: SessionEvent) {
        (self.f)(event);
    }
}
