//! Single-fire wait point bridging a delete watch into an awaiting attempt

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::time::Instant;
use turnstile_coordination::{WatchedEvent, Watcher};

use crate::session::SessionGate;

/// How a wait ended
#[derive(Debug, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The watched node was deleted (or was already gone)
    Signalled(WatchedEvent),
    /// The gate was dropped without firing, e.g. the service discarded the watch
    Abandoned,
    TimedOut,
    SessionExpired,
}

/// Watch target handed to the coordination client.
///
/// Only the first `signal` is delivered; later ones are no-ops.
pub struct WaitGate {
    tx: Mutex<Option<oneshot::Sender<WatchedEvent>>>,
}

/// The waiting side of an armed `WaitGate`
#[derive(Debug)]
pub struct WaitToken {
    rx: oneshot::Receiver<WatchedEvent>,
}

impl WaitGate {
    pub fn arm() -> (Arc<WaitGate>, WaitToken) {
        let (tx, rx) = oneshot::channel();
        let gate = Arc::new(WaitGate {
            tx: Mutex::new(Some(tx)),
        });
        (gate, WaitToken { rx })
    }

    /// Wake the waiter. Returns true only for the delivering call.
    pub fn signal(&self, event: WatchedEvent) -> bool {
        match self.tx.lock().take() {
            Some(tx) => tx.send(event).is_ok(),
            None => false,
        }
    }

    pub fn is_fired(&self) -> bool {
        self.tx.lock().is_none()
    }
}

impl Watcher for WaitGate {
    fn process(&self, event: WatchedEvent) {
        self.signal(event);
    }

    /// False once fired or once the token went away.
    fn is_active(&self) -> bool {
        self.tx.lock().as_ref().is_some_and(|tx| !tx.is_closed())
    }
}

impl WaitToken {
    /// Wait for the signal, session expiry, or `deadline`, whichever comes
    /// first. A signal already delivered wins over an elapsed deadline.
    pub async fn wait(self, deadline: Instant, session: &SessionGate) -> WaitOutcome {
        let mut rx = self.rx;
        tokio::select! {
            biased;
            fired = &mut rx => match fired {
                Ok(event) => WaitOutcome::Signalled(event),
                Err(_) => WaitOutcome::Abandoned,
            },
            _ = session.wait_for_expiry() => WaitOutcome::SessionExpired,
            _ = tokio::time::sleep_until(deadline) => WaitOutcome::TimedOut,
        }
    }
}
