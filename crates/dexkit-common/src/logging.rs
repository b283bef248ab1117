//! Logging setup for the Dexwave binaries and tests.
//!
//! Two shapes of output: pretty for interactive runs, single-line JSON
//! when harness output is captured. The filter resolves in order: an
//! explicit spec on the config, then `RUST_LOG`, then the configured
//! level.

use tracing::Level;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable output for interactive runs.
    #[default]
    Pretty,
    /// Single-line JSON for captured output.
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Level used when no filter spec applies.
    pub level: Level,
    /// Output format.
    pub format: LogFormat,
    /// Filter spec overriding `RUST_LOG` (e.g. "dexkit_sw=debug").
    pub filter: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: LogFormat::Pretty,
            filter: None,
        }
    }
}

impl LogConfig {
    /// JSON output for log collection.
    pub fn production() -> Self {
        Self {
            format: LogFormat::Json,
            ..Default::default()
        }
    }

    /// Set an explicit filter spec.
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    fn env_filter(&self) -> EnvFilter {
        match self.filter {
            Some(ref spec) => EnvFilter::try_new(spec)
                .unwrap_or_else(|_| EnvFilter::new(self.level.to_string())),
            None => EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(self.level.to_string())),
        }
    }
}

/// Initialize the global subscriber with the given configuration.
pub fn init_logging(config: LogConfig) {
    let filter = config.env_filter();

    match config.format {
        LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_target(true))
                .init();
        }
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json())
                .init();
        }
    }
}
