//! Named request/response caches.
//!
//! [`CacheStorage`] and [`Cache`] are the plain in-memory store. [`Caches`]
//! shares a store between tasks and hands out [`CacheHandle`]s, the async
//! face the install and fetch handlers work through.

use crate::network::{Network, NetworkError};
use crate::request::{FetchRequest, FetchResponse, RequestKey};
use hashbrown::{HashMap, HashSet};
use http::{Method, StatusCode};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, trace};
use url::Url;

/// Errors raised by cache operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    #[error("Request method {0} cannot be cached")]
    UnsupportedMethod(Method),

    #[error("Partial response for {0} cannot be cached")]
    PartialResponse(String),

    #[error("{url} answered with status {status}")]
    BadStatus { url: String, status: StatusCode },

    #[error("Duplicate request in batch: {0}")]
    DuplicateRequest(String),

    #[error("Fetching {url} failed: {source}")]
    Network {
        url: String,
        #[source]
        source: NetworkError,
    },

    #[error("Invalid manifest entry {entry:?}: {reason}")]
    InvalidUrl { entry: String, reason: String },
}

// ==================== Cache ====================

/// A cached request/response pair.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Request identity.
    pub key: RequestKey,

    /// Stored response.
    pub response: FetchResponse,

    /// Cached at timestamp (ms since epoch).
    pub cached_at: u64,
}

/// A cache instance.
#[derive(Debug, Default)]
pub struct Cache {
    /// Cache name.
    pub name: String,

    /// Cached entries.
    entries: HashMap<RequestKey, CacheEntry>,
}

impl Cache {
    /// Create a new cache.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            entries: HashMap::new(),
        }
    }

    /// Match a request.
    pub fn match_request(&self, request: &FetchRequest) -> Option<&CacheEntry> {
        self.entries.get(&request.key())
    }

    /// Match a `GET` for `url`.
    pub fn match_url(&self, url: &Url) -> Option<&CacheEntry> {
        self.entries.get(&RequestKey::new(&Method::GET, url))
    }

    /// Store a response, replacing any entry with the same key.
    ///
    /// Returns the replaced entry.
    pub fn put(
        &mut self,
        request: &FetchRequest,
        response: FetchResponse,
    ) -> Result<Option<CacheEntry>, CacheError> {
        check_storable(request, &response)?;
        Ok(self.insert(request.key(), response))
    }

    /// Store a batch of responses. Either every pair is stored or none is.
    pub fn put_all(&mut self, batch: Vec<(FetchRequest, FetchResponse)>) -> Result<(), CacheError> {
        let mut seen = HashSet::with_capacity(batch.len());
        for (request, response) in &batch {
            check_storable(request, response)?;
            let key = request.key();
            if !seen.insert(key.clone()) {
                return Err(CacheError::DuplicateRequest(key.to_string()));
            }
        }

        for (request, response) in batch {
            self.insert(request.key(), response);
        }
        Ok(())
    }

    /// Delete entry.
    pub fn delete(&mut self, request: &FetchRequest) -> bool {
        self.entries.remove(&request.key()).is_some()
    }

    /// Get all keys.
    pub fn keys(&self) -> Vec<&RequestKey> {
        self.entries.keys().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn insert(&mut self, key: RequestKey, mut response: FetchResponse) -> Option<CacheEntry> {
        response.from_cache = false;
        let entry = CacheEntry {
            key: key.clone(),
            response,
            cached_at: now_millis(),
        };
        self.entries.insert(key, entry)
    }
}

fn check_storable(request: &FetchRequest, response: &FetchResponse) -> Result<(), CacheError> {
    if request.method != Method::GET {
        return Err(CacheError::UnsupportedMethod(request.method.clone()));
    }
    if response.status == StatusCode::PARTIAL_CONTENT {
        return Err(CacheError::PartialResponse(request.url.to_string()));
    }
    Ok(())
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

// ==================== Cache Storage ====================

/// All named caches of one origin.
#[derive(Debug, Default)]
pub struct CacheStorage {
    caches: HashMap<String, Cache>,
}

impl CacheStorage {
    /// Create new cache storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a cache (creates if doesn't exist).
    pub fn open(&mut self, name: &str) -> &mut Cache {
        self.caches
            .entry(name.to_string())
            .or_insert_with(|| Cache::new(name))
    }

    /// Borrow a cache without creating it.
    pub fn get(&self, name: &str) -> Option<&Cache> {
        self.caches.get(name)
    }

    /// Check if cache exists.
    pub fn has(&self, name: &str) -> bool {
        self.caches.contains_key(name)
    }

    /// Delete a cache.
    pub fn delete(&mut self, name: &str) -> bool {
        self.caches.remove(name).is_some()
    }

    /// Get all cache names.
    pub fn keys(&self) -> Vec<&str> {
        self.caches.keys().map(|s| s.as_str()).collect()
    }
}

// ==================== Shared access ====================

/// Shared cache storage (the `caches` global).
#[derive(Debug, Clone, Default)]
pub struct Caches {
    inner: Arc<RwLock<CacheStorage>>,
}

impl Caches {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a cache, creating it if absent.
    pub async fn open(&self, name: &str) -> CacheHandle {
        self.inner.write().await.open(name);
        CacheHandle {
            storage: self.inner.clone(),
            name: name.to_string(),
        }
    }

    pub async fn has(&self, name: &str) -> bool {
        self.inner.read().await.has(name)
    }

    /// Delete a cache and all its entries.
    pub async fn delete(&self, name: &str) -> bool {
        self.inner.write().await.delete(name)
    }

    pub async fn keys(&self) -> Vec<String> {
        self.inner
            .read()
            .await
            .keys()
            .into_iter()
            .map(str::to_string)
            .collect()
    }
}

/// Handle to one named cache.
///
/// Writes through a handle recreate the cache if it was deleted meanwhile.
#[derive(Debug, Clone)]
pub struct CacheHandle {
    storage: Arc<RwLock<CacheStorage>>,
    name: String,
}

impl CacheHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Look up a stored response.
    pub async fn match_request(&self, request: &FetchRequest) -> Option<FetchResponse> {
        let storage = self.storage.read().await;
        storage
            .get(&self.name)
            .and_then(|cache| cache.match_request(request))
            .map(|entry| entry.response.replayed())
    }

    /// Store one response, overwriting any previous entry for the request.
    pub async fn put(
        &self,
        request: &FetchRequest,
        response: FetchResponse,
    ) -> Result<(), CacheError> {
        let replaced = self
            .storage
            .write()
            .await
            .open(&self.name)
            .put(request, response)?;
        trace!(
            cache = %self.name,
            key = %request.key(),
            previous_cached_at = ?replaced.map(|entry| entry.cached_at),
            "Cache put"
        );
        Ok(())
    }

    /// Fetch every URL in order and store the responses.
    ///
    /// All-or-nothing: a transport failure or a non-2xx status on any URL
    /// fails the call and leaves the cache untouched.
    pub async fn add_all(&self, network: &dyn Network, urls: &[Url]) -> Result<usize, CacheError> {
        let requests: Vec<FetchRequest> = urls.iter().cloned().map(FetchRequest::get).collect();

        let mut seen = HashSet::with_capacity(requests.len());
        for request in &requests {
            let key = request.key();
            if !seen.insert(key.clone()) {
                return Err(CacheError::DuplicateRequest(key.to_string()));
            }
        }

        let mut staged = Vec::with_capacity(requests.len());
        for request in requests {
            let response = network
                .fetch(&request)
                .await
                .map_err(|source| CacheError::Network {
                    url: request.url.to_string(),
                    source,
                })?;

            if !response.is_success() {
                return Err(CacheError::BadStatus {
                    url: request.url.to_string(),
                    status: response.status,
                });
            }

            debug!(
                cache = %self.name,
                url = %request.url,
                status = %response.status,
                "Asset fetched"
            );
            staged.push((request, response));
        }

        let count = staged.len();
        self.storage.write().await.open(&self.name).put_all(staged)?;
        Ok(count)
    }

    pub async fn delete(&self, request: &FetchRequest) -> bool {
        match self.storage.write().await.caches.get_mut(&self.name) {
            Some(cache) => cache.delete(request),
            None => false,
        }
    }

    pub async fn keys(&self) -> Vec<RequestKey> {
        let storage = self.storage.read().await;
        storage
            .get(&self.name)
            .map(|cache| cache.keys().into_iter().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn len(&self) -> usize {
        let storage = self.storage.read().await;
        storage.get(&self.name).map(Cache::len).unwrap_or(0)
    }
}
