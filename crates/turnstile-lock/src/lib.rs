//! Turnstile Lock - sequential distributed lock
//!
//! This crate provides:
//! - `LockManager`: FIFO mutual exclusion built from ephemeral sequential
//!   nodes, predecessor-only watches and session tracking
//! - `LockHandle`: ownership of an acquired lock
//! - `SessionGate`: waits for a connected session and observes expiry
//! - `WaitGate`: single-fire wait point fed by delete watches
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use turnstile_coordination::MemoryCoordinationService;
//! use turnstile_lock::LockManager;
//!
//! # async fn run() -> turnstile_lock::Result<()> {
//! let service = MemoryCoordinationService::new();
//! let manager = LockManager::new(Arc::new(service.connect()));
//!
//! let handle = manager.acquire("orders", Duration::from_secs(5)).await?;
//! // critical section
//! manager.release(handle).await?;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod handle;
pub mod manager;
pub mod metrics;
pub mod ordering;
pub mod session;
pub mod wait_gate;

pub use error::{LockError, Result};
pub use handle::LockHandle;
pub use manager::LockManager;
pub use session::{SessionGate, SessionState};
pub use wait_gate::{WaitGate, WaitOutcome, WaitToken};
