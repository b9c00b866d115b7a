//! Install and fetch handling for one worker version.

use crate::cache::{CacheError, Caches};
use crate::config::{RefreshPolicy, WorkerConfig};
use crate::network::{Network, NetworkError};
use crate::request::{FetchRequest, FetchResponse, RequestKey};
use crate::ServiceWorkerError;
use http::StatusCode;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Why a background refresh did not update the cache.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RefreshError {
    #[error("refresh fetch failed: {0}")]
    Network(#[from] NetworkError),

    #[error("refresh could not be stored: {0}")]
    Cache(#[from] CacheError),

    #[error("refresh request is not bound to the intercepted request")]
    UnboundRequest,

    #[error("refresh task aborted: {0}")]
    Aborted(String),
}

/// Outcome of the refresh path of one intercepted request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshResult {
    /// The cache entry was overwritten with a fresh response.
    Updated { key: RequestKey, status: StatusCode },
    /// No refresh was attempted.
    Skipped,
    Failed(RefreshError),
}

/// Detached refresh task.
///
/// Dropping the handle does not cancel the task.
#[derive(Debug)]
pub struct RefreshHandle {
    task: Option<JoinHandle<RefreshResult>>,
}

impl RefreshHandle {
    pub(crate) fn skipped() -> Self {
        Self { task: None }
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Wait for the refresh to finish and return its captured result.
    pub async fn wait(self) -> RefreshResult {
        match self.task {
            None => RefreshResult::Skipped,
            Some(task) => task
                .await
                .unwrap_or_else(|e| RefreshResult::Failed(RefreshError::Aborted(e.to_string()))),
        }
    }
}

/// Result of intercepting one request.
#[derive(Debug)]
pub struct FetchOutcome {
    /// What the page receives.
    pub response: Result<FetchResponse, ServiceWorkerError>,

    /// The independent refresh path.
    pub refresh: RefreshHandle,
}

impl FetchOutcome {
    /// An outcome produced without any worker involvement.
    pub(crate) fn passthrough(response: Result<FetchResponse, NetworkError>) -> Self {
        Self {
            response: response.map_err(ServiceWorkerError::from),
            refresh: RefreshHandle::skipped(),
        }
    }
}

/// The cache-backed fetch interceptor of one worker version.
pub struct FetchInterceptor {
    config: Arc<WorkerConfig>,
    caches: Caches,
    network: Arc<dyn Network>,
}

impl fmt::Debug for FetchInterceptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchInterceptor")
            .field("config", &self.config)
            .field("caches", &self.caches)
            .finish_non_exhaustive()
    }
}

impl FetchInterceptor {
    pub fn new(config: WorkerConfig, caches: Caches, network: Arc<dyn Network>) -> Self {
        Self {
            config: Arc::new(config),
            caches,
            network,
        }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Pre-cache the manifest into the named cache.
    ///
    /// Resolves once every asset is stored. Fails without storing anything
    /// if any asset cannot be fetched or answers with a non-2xx status.
    pub async fn handle_install(&self) -> Result<usize, ServiceWorkerError> {
        let urls = self
            .config
            .resolved_manifest()
            .map_err(ServiceWorkerError::InstallFailed)?;

        let cache = self.caches.open(&self.config.cache_name).await;
        match cache.add_all(self.network.as_ref(), &urls).await {
            Ok(count) => {
                info!(cache = %cache.name(), assets = count, "Manifest pre-cached");
                Ok(count)
            }
            Err(e) => {
                warn!(cache = %cache.name(), error = %e, "Pre-cache failed");
                Err(ServiceWorkerError::InstallFailed(e))
            }
        }
    }

    /// Intercept one request.
    ///
    /// The response comes from the named cache when present, otherwise from
    /// the network. The refresh path is dispatched as a detached task and
    /// never delays or alters the response.
    pub async fn handle_fetch(&self, request: FetchRequest) -> FetchOutcome {
        let cache = self.caches.open(&self.config.cache_name).await;
        let cached = cache.match_request(&request).await;

        let refresh = self.spawn_refresh(request.clone());

        let response = match cached {
            Some(response) => {
                debug!(key = %request.key(), "Cache hit");
                Ok(response)
            }
            None => {
                debug!(
                    key = %request.key(),
                    navigation = request.is_navigation,
                    "Cache miss, fetching"
                );
                self.network.fetch(&request).await.map_err(ServiceWorkerError::from)
            }
        };

        FetchOutcome { response, refresh }
    }

    fn spawn_refresh(&self, request: FetchRequest) -> RefreshHandle {
        if self.config.refresh == RefreshPolicy::Disabled {
            return RefreshHandle::skipped();
        }

        let policy = self.config.refresh;
        let caches = self.caches.clone();
        let cache_name = self.config.cache_name.clone();
        let network = self.network.clone();

        let task = tokio::spawn(async move {
            let result = refresh(policy, caches, &cache_name, network.as_ref(), request).await;
            if let RefreshResult::Failed(ref e) = result {
                debug!(cache = %cache_name, error = %e, "Background refresh failed");
            }
            result
        });

        RefreshHandle { task: Some(task) }
    }
}

async fn refresh(
    policy: RefreshPolicy,
    caches: Caches,
    cache_name: &str,
    network: &dyn Network,
    request: FetchRequest,
) -> RefreshResult {
    let cache = caches.open(cache_name).await;

    let request = match policy {
        RefreshPolicy::Background => request,
        RefreshPolicy::UnboundRequest => return RefreshResult::Failed(RefreshError::UnboundRequest),
        RefreshPolicy::Disabled => return RefreshResult::Skipped,
    };

    let outcome = async {
        let response = network.fetch(&request).await?;
        let status = response.status;
        cache.put(&request, response).await?;
        Ok::<_, RefreshError>(status)
    }
    .await;

    match outcome {
        Ok(status) => {
            debug!(cache = %cache_name, key = %request.key(), %status, "Cache refreshed");
            RefreshResult::Updated {
                key: request.key(),
                status,
            }
        }
        Err(e) => RefreshResult::Failed(e),
    }
}
