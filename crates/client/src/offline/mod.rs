//! Offline response cache.
//!
//! Routes same-origin `GET` requests through a pair of versioned caches:
//!
//! | Request                     | Strategy                                        |
//! |-----------------------------|-------------------------------------------------|
//! | non-GET or cross-origin     | straight to the network, never cached           |
//! | `/api/*`                    | network only, synthetic 503 JSON when offline   |
//! | `Accept: text/html`         | network first, then cache, then offline page    |
//! | static asset extensions     | cache first, refreshed in the background        |
//! | anything else               | network first, then cache                       |
//!
//! Successful page and default responses land in the dynamic cache; static
//! assets and precached paths land in the static cache.

mod fetcher;
mod storage;

pub use fetcher::{Fetcher, HttpFetcher, NetworkError, OfflineRequest, OfflineResponse, ResponseSource};
pub use storage::CacheStorage;

use std::sync::Arc;

use reqwest::Method;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::config::OfflineConfig;

const STATIC_EXTENSIONS: &[&str] = &[
    "js", "css", "png", "jpg", "jpeg", "gif", "svg", "woff", "woff2", "ttf", "eot",
];

/// Errors from [`OfflineCache::install`].
#[derive(Debug, Error)]
pub enum OfflineError {
    #[error(transparent)]
    Network(#[from] NetworkError),

    /// A precached path answered with a non-success status.
    #[error("precache of {url} failed with status {status}")]
    Status { url: String, status: u16 },

    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

/// How a request is served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Passthrough,
    NetworkOnly,
    PageNetworkFirst,
    CacheFirst,
    NetworkFirst,
}

/// Pick the strategy for `request` issued from `origin`.
#[must_use]
pub fn classify(request: &OfflineRequest, origin: &Url) -> Strategy {
    if request.method != Method::GET || request.url.origin() != origin.origin() {
        return Strategy::Passthrough;
    }

    let path = request.url.path();
    if path.starts_with("/api") {
        Strategy::NetworkOnly
    } else if request.accepts_html() {
        Strategy::PageNetworkFirst
    } else if is_static_asset(path) {
        Strategy::CacheFirst
    } else {
        Strategy::NetworkFirst
    }
}

fn is_static_asset(path: &str) -> bool {
    path.rsplit_once('.')
        .is_some_and(|(_, ext)| STATIC_EXTENSIONS.contains(&ext))
}

/// Versioned response cache in front of a [`Fetcher`].
#[derive(Clone)]
pub struct OfflineCache {
    inner: Arc<OfflineCacheInner>,
}

struct OfflineCacheInner {
    storage: CacheStorage,
    fetcher: Arc<dyn Fetcher>,
    origin: Url,
    config: OfflineConfig,
}

impl OfflineCache {
    /// Create a cache serving `origin`.
    #[must_use]
    pub fn new(fetcher: Arc<dyn Fetcher>, origin: Url, config: OfflineConfig) -> Self {
        Self::with_storage(fetcher, origin, config, CacheStorage::new())
    }

    /// Create a cache over existing storage, e.g. one left by an older version.
    #[must_use]
    pub fn with_storage(
        fetcher: Arc<dyn Fetcher>,
        origin: Url,
        config: OfflineConfig,
        storage: CacheStorage,
    ) -> Self {
        Self {
            inner: Arc::new(OfflineCacheInner {
                storage,
                fetcher,
                origin,
                config,
            }),
        }
    }

    /// The underlying named caches.
    #[must_use]
    pub fn storage(&self) -> &CacheStorage {
        &self.inner.storage
    }

    /// Precache the configured paths into the static cache.
    ///
    /// All or nothing: if any path fails, nothing is stored.
    ///
    /// # Errors
    ///
    /// Returns the first network failure or non-success status.
    #[instrument(skip(self))]
    pub async fn install(&self) -> Result<usize, OfflineError> {
        let mut fetched = Vec::with_capacity(self.inner.config.precache.len());
        for path in &self.inner.config.precache {
            let url = self.inner.origin.join(path)?;
            let response = self.inner.fetcher.fetch(&OfflineRequest::get(url.clone())).await?;
            if !response.is_success() {
                return Err(OfflineError::Status {
                    url: url.into(),
                    status: response.status,
                });
            }
            fetched.push((url, response));
        }

        let cache = self.inner.storage.open(&self.inner.config.static_cache());
        let count = fetched.len();
        for (url, response) in fetched {
            cache.insert(url.into(), response).await;
        }
        info!(count, "Precached static assets");
        Ok(count)
    }

    /// Delete every cache that is not the current static or dynamic cache.
    /// Returns the names deleted.
    #[instrument(skip(self))]
    pub fn activate(&self) -> Vec<String> {
        let keep = [self.inner.config.static_cache(), self.inner.config.dynamic_cache()];
        let stale: Vec<String> = self
            .inner
            .storage
            .keys()
            .into_iter()
            .filter(|name| !keep.contains(name))
            .collect();

        for name in &stale {
            self.inner.storage.delete(name);
        }
        if !stale.is_empty() {
            info!(deleted = ?stale, "Removed stale caches");
        }
        stale
    }

    /// Serve `request` according to its [`Strategy`].
    ///
    /// # Errors
    ///
    /// Returns `NetworkError` only when the network fails and the strategy
    /// has nothing to fall back on.
    #[instrument(skip(self, request), fields(url = %request.url))]
    pub async fn fetch(&self, request: &OfflineRequest) -> Result<OfflineResponse, NetworkError> {
        let strategy = classify(request, &self.inner.origin);
        debug!(?strategy, "Routing request");

        match strategy {
            Strategy::Passthrough => self.inner.fetcher.fetch(request).await,
            Strategy::NetworkOnly => Ok(self.network_only(request).await),
            Strategy::PageNetworkFirst => Ok(self.page_network_first(request).await),
            Strategy::CacheFirst => self.cache_first(request).await,
            Strategy::NetworkFirst => self.network_first(request).await,
        }
    }

    async fn network_only(&self, request: &OfflineRequest) -> OfflineResponse {
        match self.inner.fetcher.fetch(request).await {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "API request failed offline");
                fallback(503, "application/json", r#"{"error":"Network error"}"#)
            }
        }
    }

    async fn page_network_first(&self, request: &OfflineRequest) -> OfflineResponse {
        match self.network_and_store(request).await {
            Ok(response) => response,
            Err(e) => {
                debug!(error = %e, "Page fetch failed, trying cache");
                if let Some(cached) = self.inner.storage.match_any(request.url.as_str()).await {
                    return cached.from_cache();
                }
                if let Ok(page) = self.inner.origin.join(&self.inner.config.offline_page)
                    && let Some(cached) = self.inner.storage.match_any(page.as_str()).await
                {
                    return cached.from_cache();
                }
                fallback(503, "text/plain", "Offline")
            }
        }
    }

    async fn cache_first(&self, request: &OfflineRequest) -> Result<OfflineResponse, NetworkError> {
        if let Some(cached) = self.inner.storage.match_any(request.url.as_str()).await {
            let this = self.clone();
            let request = request.clone();
            tokio::spawn(async move {
                match this.inner.fetcher.fetch(&request).await {
                    Ok(fresh) if fresh.is_success() => {
                        this.static_cache().insert(request.url.into(), fresh).await;
                    }
                    Ok(_) => {}
                    Err(e) => debug!(error = %e, "Background revalidation failed"),
                }
            });
            return Ok(cached.from_cache());
        }

        let response = self.inner.fetcher.fetch(request).await?;
        if response.is_success() {
            self.static_cache()
                .insert(request.url.to_string(), response.clone())
                .await;
        }
        Ok(response)
    }

    async fn network_first(&self, request: &OfflineRequest) -> Result<OfflineResponse, NetworkError> {
        match self.network_and_store(request).await {
            Ok(response) => Ok(response),
            Err(e) => self
                .inner
                .storage
                .match_any(request.url.as_str())
                .await
                .map(OfflineResponse::from_cache)
                .ok_or(e),
        }
    }

    /// Fetch, keeping a copy of successful responses in the dynamic cache.
    async fn network_and_store(&self, request: &OfflineRequest) -> Result<OfflineResponse, NetworkError> {
        let response = self.inner.fetcher.fetch(request).await?;
        if response.is_success() {
            self.inner
                .storage
                .open(&self.inner.config.dynamic_cache())
                .insert(request.url.to_string(), response.clone())
                .await;
        }
        Ok(response)
    }

    fn static_cache(&self) -> moka::future::Cache<String, OfflineResponse> {
        self.inner.storage.open(&self.inner.config.static_cache())
    }
}

fn fallback(status: u16, content_type: &str, body: &str) -> OfflineResponse {
    OfflineResponse {
        status,
        content_type: Some(content_type.to_string()),
        body: body.as_bytes().to_vec(),
        source: ResponseSource::Fallback,
    }
}
