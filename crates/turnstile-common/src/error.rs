//! Error types and error codes for Turnstile
//!
//! This module defines:
//! - `TurnstileError`: argument and configuration failures shared by all crates
//! - `ErrorCode`: Structured error codes attached to every lock failure class

use serde::{Deserialize, Serialize};

/// Shared error types
#[derive(thiserror::Error, Debug)]
pub enum TurnstileError {
    #[error("caused: {0}")]
    IllegalArgument(String),

    #[error("configuration error: {0}")]
    ConfigError(String),

    #[error("internal error: {0}")]
    InternalError(String),
}

impl From<config::ConfigError> for TurnstileError {
    fn from(value: config::ConfigError) -> Self {
        TurnstileError::ConfigError(value.to_string())
    }
}

impl TurnstileError {
    pub fn error_code(&self) -> ErrorCode<'static> {
        match self {
            TurnstileError::IllegalArgument(_) => ILLEGAL_ARGUMENT,
            TurnstileError::ConfigError(_) => CONFIG_ERROR,
            TurnstileError::InternalError(_) => LOCK_INTERNAL_ERROR,
        }
    }
}

/// Error code structure
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorCode<'a> {
    pub code: i32,
    pub message: &'a str,
}

pub const SUCCESS: ErrorCode<'static> = ErrorCode {
    code: 0,
    message: "success",
};

pub const ILLEGAL_ARGUMENT: ErrorCode<'static> = ErrorCode {
    code: 10000,
    message: "illegal argument",
};

pub const CONFIG_ERROR: ErrorCode<'static> = ErrorCode {
    code: 10001,
    message: "configuration error",
};

// Lock error codes
pub const LOCK_SESSION_UNAVAILABLE: ErrorCode<'static> = ErrorCode {
    code: 30001,
    message: "no connected session within timeout",
};

pub const LOCK_CONNECTION_ERROR: ErrorCode<'static> = ErrorCode {
    code: 30002,
    message: "coordination service connection error",
};

pub const LOCK_SESSION_EXPIRED: ErrorCode<'static> = ErrorCode {
    code: 30003,
    message: "session expired, lock node ownership lost",
};

pub const LOCK_TIMED_OUT: ErrorCode<'static> = ErrorCode {
    code: 30004,
    message: "lock acquisition timed out",
};

pub const LOCK_INTERNAL_ERROR: ErrorCode<'static> = ErrorCode {
    code: 30005,
    message: "lock internal error",
};
