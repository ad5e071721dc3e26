//! Tracing initialisation
//!
//! Installs a console layer filtered by `RUST_LOG` when set, otherwise by the
//! configured level. Calling it more than once is harmless: the first
//! subscriber wins.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt};

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Console log level used when `RUST_LOG` is unset
    pub level: Level,
    /// Emit ANSI colours
    pub ansi: bool,
    /// Route output through the test writer (captured by `cargo test`)
    pub test_writer: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            ansi: true,
            test_writer: false,
        }
    }
}

impl LoggingConfig {
    /// Create from `TURNSTILE_LOG_LEVEL` / `TURNSTILE_LOG_ANSI`.
    pub fn from_env() -> Self {
        let level = std::env::var("TURNSTILE_LOG_LEVEL")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(Level::INFO);

        let ansi = std::env::var("TURNSTILE_LOG_ANSI")
            .map(|v| v.to_lowercase() != "false" && v != "0")
            .unwrap_or(true);

        Self {
            level,
            ansi,
            test_writer: false,
        }
    }

    /// Configuration suited to integration tests.
    pub fn for_tests() -> Self {
        Self {
            level: Level::DEBUG,
            ansi: false,
            test_writer: true,
        }
    }
}

/// Install the global subscriber. Returns `false` when one was already set.
pub fn init_tracing(config: &LoggingConfig) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.to_string()));

    let layer: Box<dyn Layer<Registry> + Send + Sync> = if config.test_writer {
        fmt::layer()
            .with_ansi(config.ansi)
            .with_target(true)
            .with_test_writer()
            .with_filter(filter)
            .boxed()
    } else {
        fmt::layer()
            .with_ansi(config.ansi)
            .with_target(true)
            .with_filter(filter)
            .boxed()
    };

    Registry::default().with(layer).try_init().is_ok()
}
