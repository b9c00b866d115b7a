//! The network seam used by the install and fetch handlers.

use crate::request::{FetchRequest, FetchResponse};
use async_trait::async_trait;
use thiserror::Error;

/// Transport-level fetch failures.
///
/// An HTTP error status is not a `NetworkError`; it arrives as a normal
/// [`FetchResponse`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NetworkError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Protocol error: {0}")]
    Protocol(String),
}

/// Something that can perform a live fetch.
#[async_trait]
pub trait Network: Send + Sync {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, NetworkError>;
}

