//! Coordination client error types

use crate::model::SessionId;

/// Error type for coordination service operations
#[derive(Debug, thiserror::Error)]
pub enum CoordinationError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("session {0} expired")]
    SessionExpired(SessionId),

    #[error("no such node: {0}")]
    NoSuchNode(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl CoordinationError {
    /// Transient failures that may succeed when retried on the same session.
    pub fn is_connection(&self) -> bool {
        matches!(self, CoordinationError::Connection(_))
    }
}

pub type Result<T> = std::result::Result<T, CoordinationError>;
