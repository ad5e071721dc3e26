//! Configuration management for Turnstile
//!
//! Settings are layered with the `config` crate: built-in defaults, then an
//! optional file (YAML, TOML, JSON by extension), then `TURNSTILE_*`
//! environment variables using `__` as the nesting separator
//! (e.g. `TURNSTILE_LOCK__ROOT=/app/locks`).

use std::path::Path;
use std::time::Duration;

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::error::TurnstileError;
use crate::{
    DEFAULT_ACQUIRE_TIMEOUT_MS, DEFAULT_CONNECTION_TIMEOUT_MS, DEFAULT_LOCKS_ROOT,
    DEFAULT_SESSION_TIMEOUT_MS, ENV_PREFIX,
};

/// Top-level configuration
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TurnstileConfig {
    pub lock: LockSettings,
    pub session: SessionSettings,
    pub retry: RetrySettings,
}

/// Lock manager settings
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockSettings {
    /// Root under which each lock key gets its own child root
    pub root: String,
    /// Optional namespace prepended to every path
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Default end-to-end acquisition budget
    pub acquire_timeout_ms: u64,
    /// Default budget for waiting on a connected session
    pub connection_timeout_ms: u64,
}

impl Default for LockSettings {
    fn default() -> Self {
        Self {
            root: DEFAULT_LOCKS_ROOT.to_string(),
            namespace: None,
            acquire_timeout_ms: DEFAULT_ACQUIRE_TIMEOUT_MS,
            connection_timeout_ms: DEFAULT_CONNECTION_TIMEOUT_MS,
        }
    }
}

/// Session settings handed to coordination client implementations
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    pub timeout_ms: u64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_SESSION_TIMEOUT_MS,
        }
    }
}

/// Exponential backoff settings for idempotent coordination operations
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Initial amount of time to wait between retries
    pub base_sleep_ms: u64,
    /// Max number of times to retry
    pub max_retries: u32,
    /// Max time to sleep on each retry
    pub max_sleep_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            base_sleep_ms: 1000,
            max_retries: 10,
            max_sleep_ms: u32::MAX as u64,
        }
    }
}

impl TurnstileConfig {
    /// Load defaults overlaid with `TURNSTILE_*` environment variables.
    pub fn load() -> Result<Self, TurnstileError> {
        Self::build(None, Self::environment())
    }

    /// Load defaults, then `path`, then `TURNSTILE_*` environment variables.
    pub fn load_from(path: &Path) -> Result<Self, TurnstileError> {
        Self::build(Some(path), Self::environment())
    }

    fn environment() -> Environment {
        Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true)
    }

    fn build(path: Option<&Path>, env: Environment) -> Result<Self, TurnstileError> {
        let mut builder = Config::builder().add_source(Config::try_from(&Self::default())?);
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }
        let config: Self = builder.add_source(env).build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the lock manager cannot work with.
    pub fn validate(&self) -> Result<(), TurnstileError> {
        let root = &self.lock.root;
        if !root.starts_with('/') || (root.len() > 1 && root.ends_with('/')) {
            return Err(TurnstileError::ConfigError(format!(
                "lock.root must be an absolute path without trailing slash, got '{}'",
                root
            )));
        }
        if let Some(ns) = &self.lock.namespace
            && (ns.is_empty() || ns.contains('/'))
        {
            return Err(TurnstileError::ConfigError(format!(
                "lock.namespace must be a single non-empty segment, got '{}'",
                ns
            )));
        }
        if self.retry.base_sleep_ms > self.retry.max_sleep_ms {
            return Err(TurnstileError::ConfigError(
                "retry.base_sleep_ms must not exceed retry.max_sleep_ms".to_string(),
            ));
        }
        Ok(())
    }

    /// Effective lock base path, namespace included.
    pub fn locks_base(&self) -> String {
        match &self.lock.namespace {
            Some(ns) if self.lock.root == "/" => format!("/{}", ns),
            Some(ns) => format!("/{}{}", ns, self.lock.root),
            None => self.lock.root.clone(),
        }
    }
}

impl LockSettings {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }
}

impl SessionSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl RetrySettings {
    pub fn base_sleep(&self) -> Duration {
        Duration::from_millis(self.base_sleep_ms)
    }

    pub fn max_sleep(&self) -> Duration {
        Duration::from_millis(self.max_sleep_ms)
    }
}
