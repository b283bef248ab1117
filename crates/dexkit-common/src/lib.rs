//! # Dexkit Common
//!
//! Common utilities, error types, and logging configuration for the Dexwave
//! offline-first catalog client.
//!
//! ## Features
//!
//! - Unified error type shared across the worker and application crates
//! - Logging configuration and setup
//! - Retry delay schedule and timeout utilities
//! - Cancellation signal shared by fan-out fetches
//! - Named join strategies (best-effort vs fail-fast)

use std::time::Duration;
use thiserror::Error;

pub mod cancel;
pub mod join;
pub mod logging;
pub mod retry;

pub use cancel::{cancel_pair, CancelHandle, CancelSignal};
pub use join::{join_all_or_fail, join_all_settled};
pub use logging::{init_logging, LogConfig, LogFormat};
pub use retry::{with_timeout, RetryConfig};

/// Unified error type for Dexwave.
#[derive(Error, Debug)]
pub enum DexError {
    /// Network-related errors.
    #[error("Network error: {0}")]
    Network(String),

    /// Timeout errors.
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// Cancelled operation.
    #[error("Operation cancelled")]
    Cancelled,

    /// Resource not found.
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Invalid argument.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// I/O errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl DexError {
    /// Create a network error.
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network(message.into())
    }

    /// Create a not-found error.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    /// Create an invalid-argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    /// Check if this error represents a cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Result type alias using [`DexError`].
pub type DexResult<T> = Result<T, DexError>;
