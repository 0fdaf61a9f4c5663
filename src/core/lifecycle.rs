//! The background execution context.
//!
//! [`OfflineWorker`] owns the caches, the queue store, the interceptor and
//! the coordinator. It is built once per process from the resolved
//! configuration and the injected adapters, and exposes the lifecycle steps
//! (`install`, `activate`) alongside the fetch and wake-up entry points.

use std::sync::Arc;

use anyhow::{Context, Result};
use reqwest::Url;
use tracing::{info, instrument, warn};

use crate::adapters::{Connectivity, Network, RetryScheduler};
use crate::config::ResolvedConfig;
use crate::core::cache::{
    CachePolicy, ResponseCache, APP_SHELL_CACHE, KNOWN_CACHES, STATIC_ASSET_CACHE,
};
use crate::core::coordinator::{DrainOutcome, SyncCoordinator, SyncError};
use crate::core::interceptor::{InterceptError, NetworkInterceptor, Route, RouteTable};
use crate::core::notifier::ClientNotifier;
use crate::core::queue_store::QueueStore;
use crate::domain::{HttpRequest, HttpResponse, RetryIntent};

/// Adapters the worker talks to the outside world through
pub struct Adapters {
    pub network: Arc<dyn Network>,
    pub connectivity: Arc<dyn Connectivity>,
    pub scheduler: Arc<dyn RetryScheduler>,
}

pub struct OfflineWorker {
    interceptor: NetworkInterceptor,
    coordinator: Arc<SyncCoordinator>,
    network: Arc<dyn Network>,
    connectivity: Arc<dyn Connectivity>,
    cache: Arc<ResponseCache>,
    queues: Arc<QueueStore>,
    notifier: Arc<ClientNotifier>,
    precache_urls: Vec<String>,
}

impl OfflineWorker {
    /// Open the on-disk caches and queue log under the configured home
    pub async fn open(config: &ResolvedConfig, adapters: Adapters) -> Result<Self> {
        let cache = ResponseCache::open(&config.cache_db_path()).with_context(|| {
            format!("Failed to open cache at {}", config.cache_db_path().display())
        })?;
        let queues = QueueStore::open(config.queue_log_path())
            .await
            .with_context(|| {
                format!("Failed to open queue log at {}", config.queue_log_path().display())
            })?;

        Self::from_parts(config, Arc::new(cache), Arc::new(queues), adapters)
    }

    /// Assemble a worker around already opened stores
    pub fn from_parts(
        config: &ResolvedConfig,
        cache: Arc<ResponseCache>,
        queues: Arc<QueueStore>,
        adapters: Adapters,
    ) -> Result<Self> {
        cache.set_policy(
            STATIC_ASSET_CACHE,
            CachePolicy::static_assets(config.assets.max_entries, config.assets.quota_bytes),
        )?;

        let routes = RouteTable::from_config(config).context("Invalid asset pattern")?;
        let notifier = Arc::new(ClientNotifier::new());

        let coordinator = Arc::new(SyncCoordinator::new(
            routes.clone(),
            Arc::clone(&adapters.network),
            Arc::clone(&queues),
            Arc::clone(&cache),
            Arc::clone(&notifier),
        ));

        let interceptor = NetworkInterceptor::new(
            routes,
            Arc::clone(&adapters.network),
            Arc::clone(&adapters.connectivity),
            adapters.scheduler,
            Arc::clone(&cache),
            Arc::clone(&queues),
        );

        Ok(Self {
            interceptor,
            coordinator,
            network: adapters.network,
            connectivity: adapters.connectivity,
            cache,
            queues,
            notifier,
            precache_urls: config.precache_urls.clone(),
        })
    }

    /// Fetch every precache URL and store it. Fails on the first URL that
    /// cannot be fetched with a 200.
    ///
    /// Asset URLs go to the static-asset cache keyed by URL; everything else
    /// is app shell keyed by path.
    #[instrument(skip(self))]
    pub async fn install(&self) -> Result<usize> {
        let routes = self.interceptor.routes();

        for raw in &self.precache_urls {
            let url = Url::parse(raw).with_context(|| format!("Invalid precache URL: {}", raw))?;
            let request = HttpRequest::get(url.clone());

            let response = self
                .network
                .send(&request)
                .await
                .with_context(|| format!("Failed to precache {}", url))?;
            if !response.is_success() {
                anyhow::bail!("Failed to precache {}: {}", url, response.status);
            }

            let (cache, key) = match routes.classify(&request) {
                Route::StaticAsset => (STATIC_ASSET_CACHE, url.to_string()),
                _ => (APP_SHELL_CACHE, url.path().to_string()),
            };
            self.cache.put(cache, &key, &response)?;
        }

        info!(count = self.precache_urls.len(), "Precache complete");
        Ok(self.precache_urls.len())
    }

    /// Delete every cache this version does not own. Returns their names.
    #[instrument(skip(self))]
    pub fn activate(&self) -> Result<Vec<String>> {
        let mut removed = Vec::new();

        for name in self.cache.cache_names()? {
            if KNOWN_CACHES.contains(&name.as_str()) {
                continue;
            }
            let entries = self.cache.delete_cache(&name)?;
            warn!(cache = %name, entries, "Deleted outdated cache");
            removed.push(name);
        }

        Ok(removed)
    }

    /// Route a client request through the interceptor
    pub async fn handle_fetch(&self, request: HttpRequest) -> Result<HttpResponse, InterceptError> {
        self.interceptor.handle(request).await
    }

    /// Deliver a retry wake-up to the coordinator
    pub async fn handle_wake(&self, intent: &RetryIntent) -> Result<DrainOutcome, SyncError> {
        self.coordinator.on_wake(intent).await
    }

    pub fn routes(&self) -> &RouteTable {
        self.interceptor.routes()
    }

    pub fn coordinator(&self) -> Arc<SyncCoordinator> {
        Arc::clone(&self.coordinator)
    }

    pub fn connectivity(&self) -> Arc<dyn Connectivity> {
        Arc::clone(&self.connectivity)
    }

    pub fn notifier(&self) -> &ClientNotifier {
        &self.notifier
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    pub fn queues(&self) -> &QueueStore {
        &self.queues
    }
}
