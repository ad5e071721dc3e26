//! Turnstile Common - Shared types, configuration, and utilities
//!
//! This crate provides the foundational pieces used across all Turnstile components:
//! - Error types and error codes
//! - Layered configuration (defaults, file, environment)
//! - Lock path construction and sequence-suffix parsing
//! - Tracing initialisation

pub mod config;
pub mod error;
pub mod logging;
pub mod path;

// Re-exports for convenience
pub use config::{LockSettings, RetrySettings, SessionSettings, TurnstileConfig};
pub use error::{ErrorCode, TurnstileError};
pub use path::{is_valid_lock_key, lock_root, node_prefix, parse_sequence};

/// Default root under which every lock key gets its own child root
pub const DEFAULT_LOCKS_ROOT: &str = "/locks";

/// Name prefix of the ephemeral sequential nodes created under a lock root
pub const NODE_PREFIX: &str = "lock-";

/// Width of the zero-padded sequence suffix appended by the coordination service
pub const SEQUENCE_WIDTH: usize = 10;

/// Default end-to-end budget for a single acquisition attempt
pub const DEFAULT_ACQUIRE_TIMEOUT_MS: u64 = 30_000;

/// Default budget for waiting on a connected session
pub const DEFAULT_CONNECTION_TIMEOUT_MS: u64 = 30_000;

/// Default session timeout requested from the coordination service
pub const DEFAULT_SESSION_TIMEOUT_MS: u64 = 30_000;

/// Environment variable prefix for configuration overrides
pub const ENV_PREFIX: &str = "TURNSTILE";
