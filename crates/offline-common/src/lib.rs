//! # Offline Common
//!
//! Shared plumbing for the offline site worker crates.
//!
//! ## Features
//!
//! - Workspace-wide error type with optional sources
//! - `tracing` subscriber setup driven by [`LogConfig`]
//! - Retry with exponential backoff and timeout helpers

use std::time::Duration;
use thiserror::Error;

pub mod logging;
pub mod retry;

pub use logging::{init_logging, try_init_logging, LogConfig, LogFormat};
pub use retry::{retry_with_backoff, with_timeout, RetryConfig};

/// Error shared by every crate in the workspace.
#[derive(Error, Debug)]
pub enum OfflineError {
    /// Rejected or unreadable configuration.
    #[error("Config error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// Unknown scope, cache, or worker.
    #[error("Not found: {0}")]
    NotFound(String),
}

impl OfflineError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            source: None,
        }
    }

    pub fn config_with_source<E: std::error::Error + Send + Sync + 'static>(
        message: impl Into<String>,
        source: E,
    ) -> Self {
        Self::Config {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Whether a retry could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, OfflineError::Timeout(_) | OfflineError::Io(_))
    }
}

/// Result type alias for workspace operations.
pub type Result<T> = std::result::Result<T, OfflineError>;

/// Extension trait for Option.
pub trait OptionExt<T> {
    /// Convert None to a NotFound error.
    fn ok_or_not_found(self, resource: impl Into<String>) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_not_found(self, resource: impl Into<String>) -> Result<T> {
        self.ok_or_else(|| OfflineError::NotFound(resource.into()))
    }
}
