//! Lock error taxonomy

use turnstile_common::TurnstileError;
use turnstile_common::error::{
    ErrorCode, ILLEGAL_ARGUMENT, LOCK_CONNECTION_ERROR, LOCK_INTERNAL_ERROR, LOCK_SESSION_EXPIRED,
    LOCK_SESSION_UNAVAILABLE, LOCK_TIMED_OUT,
};
use turnstile_coordination::CoordinationError;

/// Failure of a lock operation
#[derive(Debug, thiserror::Error)]
pub enum LockError {
    /// No connected session within the allotted time
    #[error("no connected session available")]
    SessionUnavailable,

    /// Transient failure talking to the coordination service
    #[error("connection error: {0}")]
    Connection(String),

    /// The session ended; any node it owned is gone
    #[error("session expired")]
    SessionExpired,

    /// The acquisition budget elapsed; the attempt's node has been removed
    #[error("timed out acquiring lock")]
    TimedOut,

    #[error("illegal argument: {0}")]
    IllegalArgument(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl LockError {
    pub fn error_code(&self) -> ErrorCode<'static> {
        match self {
            LockError::SessionUnavailable => LOCK_SESSION_UNAVAILABLE,
            LockError::Connection(_) => LOCK_CONNECTION_ERROR,
            LockError::SessionExpired => LOCK_SESSION_EXPIRED,
            LockError::TimedOut => LOCK_TIMED_OUT,
            LockError::IllegalArgument(_) => ILLEGAL_ARGUMENT,
            LockError::Internal(_) => LOCK_INTERNAL_ERROR,
        }
    }

    /// Whether the same call may succeed if simply tried again.
    ///
    /// `SessionExpired` is excluded: retrying needs a fresh session.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LockError::SessionUnavailable | LockError::Connection(_) | LockError::TimedOut
        )
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, LockError::TimedOut)
    }

    /// Short label used for metrics and logs
    pub fn kind(&self) -> &'static str {
        match self {
            LockError::SessionUnavailable => "session_unavailable",
            LockError::Connection(_) => "connection",
            LockError::SessionExpired => "session_expired",
            LockError::TimedOut => "timed_out",
            LockError::IllegalArgument(_) => "illegal_argument",
            LockError::Internal(_) => "internal",
        }
    }
}

impl From<CoordinationError> for LockError {
    fn from(value: CoordinationError) -> Self {
        match value {
            CoordinationError::Connection(msg) => LockError::Connection(msg),
            CoordinationError::SessionExpired(_) => LockError::SessionExpired,
            CoordinationError::NoSuchNode(path) => {
                LockError::Internal(format!("unexpected missing node {}", path))
            }
            CoordinationError::Other(e) => LockError::Internal(e.to_string()),
        }
    }
}

impl From<TurnstileError> for LockError {
    fn from(value: TurnstileError) -> Self {
        match value {
            TurnstileError::IllegalArgument(msg) => LockError::IllegalArgument(msg),
            other => LockError::Internal(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, LockError>;
