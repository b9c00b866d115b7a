//! # Offline Service Worker
//!
//! Cache-backed fetch interception for a small static site.
//!
//! ## Features
//!
//! - **Install**: pre-cache a fixed asset manifest into one named cache,
//!   all-or-nothing
//! - **Fetch**: answer from the cache when possible, otherwise from the
//!   network, and refresh the cached copy in the background
//! - **Lifecycle**: registration, install, activation, and supersession of
//!   worker versions
//!
//! ## Architecture
//!
//! ```text
//! ServiceWorkerContainer
//!     └── ServiceWorkerRegistration (per scope)
//!             ├── installing / waiting / active (ServiceWorker)
//!             └── FetchInterceptor
//!                     ├── WorkerConfig (cache name, manifest, refresh policy)
//!                     ├── Caches ── Cache ── RequestKey → CacheEntry
//!                     └── dyn Network
//! ```

use thiserror::Error;

pub mod cache;
pub mod config;
pub mod interceptor;
pub mod lifecycle;
pub mod network;
pub mod request;

pub use cache::{Cache, CacheEntry, CacheError, CacheHandle, CacheStorage, Caches};
pub use config::{Manifest, RefreshPolicy, WorkerConfig, DEFAULT_CACHE_NAME};
pub use interceptor::{FetchInterceptor, FetchOutcome, RefreshError, RefreshHandle, RefreshResult};
pub use lifecycle::{
    ServiceWorker, ServiceWorkerContainer, ServiceWorkerEvent, ServiceWorkerId,
    ServiceWorkerRegistration, ServiceWorkerState,
};
pub use network::{Network, NetworkError};
pub use request::{FetchRequest, FetchResponse, RequestKey};

/// Errors that can occur in service worker operations.
#[derive(Error, Debug)]
pub enum ServiceWorkerError {
    #[error("Registration failed: {0}")]
    RegistrationFailed(String),

    #[error("Install failed: {0}")]
    InstallFailed(#[source] CacheError),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("State error: {0}")]
    StateError(String),

    #[error(transparent)]
    Common(#[from] offline_common::OfflineError),
}

impl ServiceWorkerError {
    /// Whether retrying the same operation could succeed.
    ///
    /// Transport failures are transient; a manifest asset answering with an
    /// error status is not.
    pub fn is_retryable(&self) -> bool {
        match self {
            ServiceWorkerError::InstallFailed(CacheError::Network { .. }) => true,
            ServiceWorkerError::Network(_) => true,
            ServiceWorkerError::Common(e) => e.is_retryable(),
            _ => false,
        }
    }
}
