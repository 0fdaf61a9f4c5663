//! Request classification and the offline strategies behind each route.
//!
//! Every outbound request is matched against a fixed [`RouteTable`]. Static
//! assets are served cache-first, searches are memoized by body hash, and
//! library mutations are queued while offline and answered optimistically.

use std::sync::Arc;

use anyhow::anyhow;
use reqwest::{Method, Url};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::adapters::{Connectivity, Network, RetryScheduler};
use crate::config::ResolvedConfig;
use crate::core::cache::{
    content_hash, CacheError, ResponseCache, APP_SHELL_CACHE, SEARCH_CACHE, STATIC_ASSET_CACHE,
};
use crate::core::queue_store::{QueueStore, QueueStoreError};
use crate::domain::search::queued_search_body;
use crate::domain::{HttpRequest, HttpResponse, LibraryEntry, QueueName, RequestMode, RetryIntent};

/// Key under which the app shell is precached
pub const APP_SHELL_KEY: &str = "/index.html";

/// Errors surfaced to the caller of [`NetworkInterceptor::handle`]
#[derive(Error, Debug)]
pub enum InterceptError {
    #[error("Offline and no cached response for {url}")]
    Offline { url: String },

    #[error("Network error: {0:#}")]
    Network(#[source] anyhow::Error),

    #[error("Invalid save payload: {0}")]
    InvalidPayload(#[source] serde_json::Error),

    #[error("Queue store error: {0}")]
    Queue(#[from] QueueStoreError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),
}

/// What the interceptor does with a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    StaticAsset,
    Search,
    Save,
    /// DELETE of a library entry, carrying its cursor
    Remove { cursor: String },
    Navigation,
    PassThrough,
}

/// Fixed rule table mapping (method, URL) to a [`Route`]
#[derive(Debug, Clone)]
pub struct RouteTable {
    asset_patterns: Vec<glob::Pattern>,
    search_url: Url,
    api_url: Url,
}

impl RouteTable {
    pub fn new(asset_patterns: Vec<glob::Pattern>, search_url: Url, api_url: Url) -> Self {
        Self {
            asset_patterns,
            search_url,
            api_url,
        }
    }

    pub fn from_config(config: &ResolvedConfig) -> Result<Self, glob::PatternError> {
        let patterns = config
            .assets
            .patterns
            .iter()
            .map(|pattern| glob::Pattern::new(pattern))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self::new(
            patterns,
            config.endpoints.search_url.clone(),
            config.endpoints.api_url.clone(),
        ))
    }

    pub fn search_url(&self) -> &Url {
        &self.search_url
    }

    pub fn api_url(&self) -> &Url {
        &self.api_url
    }

    /// `<api>/<cursor>`, with the cursor as a single encoded path segment
    pub fn remove_url(&self, cursor: &str) -> anyhow::Result<Url> {
        let mut url = self.api_url.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow!("API URL cannot carry a path: {}", self.api_url))?
            .pop_if_empty()
            .push(cursor);
        Ok(url)
    }

    pub fn classify(&self, request: &HttpRequest) -> Route {
        if request.mode == RequestMode::Navigate && request.method == Method::GET {
            return Route::Navigation;
        }

        let url = &request.url;
        match request.method {
            Method::GET if self.is_static_asset(url) => Route::StaticAsset,
            Method::POST if url == &self.search_url => Route::Search,
            Method::POST if self.same_origin(url) && self.is_api_root(url.path()) => Route::Save,
            Method::DELETE if self.same_origin(url) => match self.cursor_from(url.path()) {
                Some(cursor) => Route::Remove { cursor },
                None => Route::PassThrough,
            },
            _ => Route::PassThrough,
        }
    }

    fn is_static_asset(&self, url: &Url) -> bool {
        self.asset_patterns
            .iter()
            .any(|pattern| pattern.matches(url.as_str()))
    }

    fn same_origin(&self, url: &Url) -> bool {
        url.origin() == self.api_url.origin()
    }

    fn api_path(&self) -> &str {
        self.api_url.path().trim_end_matches('/')
    }

    fn is_api_root(&self, path: &str) -> bool {
        path.trim_end_matches('/') == self.api_path()
    }

    /// `<api>/<...>/<cursor>` yields the last non-empty segment, decoded
    fn cursor_from(&self, path: &str) -> Option<String> {
        let rest = path.strip_prefix(self.api_path())?.strip_prefix('/')?;
        let segment = rest.rsplit('/').find(|segment| !segment.is_empty())?;
        urlencoding::decode(segment).ok().map(|cursor| cursor.into_owned())
    }
}

/// Sits between the client and the network
pub struct NetworkInterceptor {
    routes: RouteTable,
    network: Arc<dyn Network>,
    connectivity: Arc<dyn Connectivity>,
    scheduler: Arc<dyn RetryScheduler>,
    cache: Arc<ResponseCache>,
    queues: Arc<QueueStore>,
}

impl NetworkInterceptor {
    pub fn new(
        routes: RouteTable,
        network: Arc<dyn Network>,
        connectivity: Arc<dyn Connectivity>,
        scheduler: Arc<dyn RetryScheduler>,
        cache: Arc<ResponseCache>,
        queues: Arc<QueueStore>,
    ) -> Self {
        Self {
            routes,
            network,
            connectivity,
            scheduler,
            cache,
            queues,
        }
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    /// Answer `request` according to its route and the current connectivity
    #[instrument(skip(self, request), fields(method = %request.method, url = %request.url))]
    pub async fn handle(&self, request: HttpRequest) -> Result<HttpResponse, InterceptError> {
        let route = self.routes.classify(&request);
        let online = self.connectivity.is_online();
        debug!(?route, online, "Classified request");

        match route {
            Route::StaticAsset => self.cache_first(request, online).await,
            Route::Search => self.search(request, online).await,
            Route::Save if !online => self.defer_save(&request).await,
            Route::Remove { cursor } if !online => self.defer_remove(cursor).await,
            Route::Navigation => self.navigation(request, online).await,
            Route::Save | Route::Remove { .. } | Route::PassThrough => {
                self.forward(&request).await
            }
        }
    }

    async fn forward(&self, request: &HttpRequest) -> Result<HttpResponse, InterceptError> {
        self.network
            .send(request)
            .await
            .map_err(InterceptError::Network)
    }

    async fn cache_first(
        &self,
        request: HttpRequest,
        online: bool,
    ) -> Result<HttpResponse, InterceptError> {
        let key = request.url.as_str();

        if let Some(cached) = self.cache.get(STATIC_ASSET_CACHE, key)? {
            debug!(key, "Static asset served from cache");
            return Ok(cached);
        }

        if !online {
            return Err(InterceptError::Offline {
                url: key.to_string(),
            });
        }

        let response = self.forward(&request).await?;
        if response.is_success() {
            // Caching is best-effort; the response is returned either way
            if let Err(e) = self.cache.put(STATIC_ASSET_CACHE, key, &response) {
                warn!(key, error = %e, "Failed to cache static asset");
            }
        }
        Ok(response)
    }

    async fn search(
        &self,
        request: HttpRequest,
        online: bool,
    ) -> Result<HttpResponse, InterceptError> {
        let hash = content_hash(&request.body);

        if online {
            let response = self.forward(&request).await?;
            if response.is_success() {
                if let Err(e) = self.cache.put(SEARCH_CACHE, &hash, &response) {
                    warn!(%hash, error = %e, "Failed to cache search response");
                }
            }
            return Ok(response);
        }

        if let Some(cached) = self.cache.get(SEARCH_CACHE, &hash)? {
            debug!(%hash, "Offline search served from cache");
            return Ok(cached);
        }

        let body = queued_search_body(&request.body);
        self.queues.enqueue(QueueName::SearchRetry, body).await?;
        self.register(QueueName::SearchRetry).await;

        info!(%hash, "Search deferred until back online");
        Ok(HttpResponse::deferred_retry(QueueName::SearchRetry))
    }

    async fn defer_save(&self, request: &HttpRequest) -> Result<HttpResponse, InterceptError> {
        let entry: LibraryEntry = request.json().map_err(InterceptError::InvalidPayload)?;
        let payload = serde_json::to_value(&entry).map_err(InterceptError::InvalidPayload)?;

        self.queues.enqueue(QueueName::Save, payload).await?;
        self.register(QueueName::Save).await;

        info!(cursor = %entry.cursor, "Save queued until back online");
        Ok(HttpResponse::ok())
    }

    async fn defer_remove(&self, cursor: String) -> Result<HttpResponse, InterceptError> {
        self.queues
            .enqueue(QueueName::Remove, Value::String(cursor.clone()))
            .await?;
        self.register(QueueName::Remove).await;

        info!(%cursor, "Remove queued until back online");
        Ok(HttpResponse::ok())
    }

    async fn navigation(
        &self,
        request: HttpRequest,
        online: bool,
    ) -> Result<HttpResponse, InterceptError> {
        if let Some(shell) = self.cache.get(APP_SHELL_CACHE, APP_SHELL_KEY)? {
            return Ok(shell);
        }

        if !online {
            return Err(InterceptError::Offline {
                url: request.url.to_string(),
            });
        }

        self.forward(&request).await
    }

    /// The operation is already durable; a lost registration only delays it
    /// until the next wake-up for that queue.
    async fn register(&self, queue: QueueName) {
        if let Err(e) = self.scheduler.register(RetryIntent::for_queue(queue)).await {
            warn!(%queue, error = %e, "Failed to register retry intent");
        }
    }
}
