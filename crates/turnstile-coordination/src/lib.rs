//! Turnstile Coordination - the session-backed store the lock core talks to
//!
//! This crate provides:
//! - The `CoordinationClient` contract (ephemeral-sequential create, children
//!   listing, one-shot delete watches, delete, session notifications)
//! - Watch and session listener traits
//! - `MemoryCoordinationService`, an in-process ZooKeeper-like store
//! - `RetryPolicy` and `RetryingClient` for transient connection failures

pub mod client;
pub mod error;
pub mod listener;
pub mod memory;
pub mod model;
pub mod retry;

pub use client::CoordinationClient;
pub use error::{CoordinationError, Result};
pub use listener::{FnSessionListener, FnWatcher, SessionListener, Watcher};
pub use memory::{MemoryClient, MemoryCoordinationService, SessionStatus};
pub use model::{SessionEvent, SessionId, WatchedEvent};
pub use retry::{RetryPolicy, RetryingClient};
