//! Logging subsystem
//!
//! Structured logging via tracing with support for JSON (production) and
//! plaintext (development) output formats.
//!
//! # Environment Variables
//!
//! - `DESKGATE_LOG` - Primary log level/filter (takes precedence)
//! - `RUST_LOG` - Fallback log level/filter

use std::io;
use std::sync::OnceLock;

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Guard to track if logging has been initialized
static INIT_GUARD: OnceLock<()> = OnceLock::new();

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// JSON format for production (structured logs)
    Json,
    /// Human-readable plaintext for development
    #[default]
    Plaintext,
}

/// Configuration for the logging subsystem
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Output format (JSON or plaintext)
    pub format: LogFormat,
    /// Default log level when no env filter is set
    pub default_level: Level,
}

impl LogConfig {
    /// Development setup: plaintext, INFO.
    pub fn development() -> Self {
        LogConfig {
            format: LogFormat::Plaintext,
            default_level: Level::INFO,
        }
    }

    /// Production setup: JSON, INFO.
    pub fn production() -> Self {
        LogConfig {
            format: LogFormat::Json,
            default_level: Level::INFO,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self::development()
    }
}

/// Initialize the global tracing subscriber.
///
/// Idempotent: subsequent calls after a successful init are no-ops, so tests
/// can call this freely.
pub fn init_logging(config: LogConfig) -> Result<(), io::Error> {
    if INIT_GUARD.get().is_some() {
        return Ok(());
    }

    let filter = EnvFilter::try_from_env("DESKGATE_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(config.default_level.to_string()));

    let layer = match config.format {
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .with_writer(io::stdout)
            .boxed(),
        LogFormat::Plaintext => tracing_subscriber::fmt::layer()
            .compact()
            .with_writer(io::stdout)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(layer)
        .try_init()
        .map_err(|e| io::Error::other(e.to_string()))?;

    let _ = INIT_GUARD.set(());
    Ok(())
}
