//! Core offline-resilience logic.
//!
//! This module contains:
//! - ResponseCache: Named, persistent response caches
//! - QueueStore: Durable queues of deferred operations
//! - NetworkInterceptor: Request classification and offline strategies
//! - SyncCoordinator: Queue draining on retry wake-ups
//! - ClientNotifier: Publish/subscribe to foreground clients
//! - SyncWorker / OfflineWorker: Hosting and lifecycle

pub mod cache;
pub mod coordinator;
pub mod interceptor;
pub mod lifecycle;
pub mod notifier;
pub mod queue_store;
pub mod worker;

// Re-export commonly used types
pub use cache::{
    content_hash, CacheError, CachePolicy, ResponseCache, APP_SHELL_CACHE, KNOWN_CACHES,
    SEARCH_CACHE, STATIC_ASSET_CACHE,
};
pub use coordinator::{DrainOutcome, SyncCoordinator, SyncError};
pub use interceptor::{InterceptError, NetworkInterceptor, Route, RouteTable, APP_SHELL_KEY};
pub use lifecycle::{Adapters, OfflineWorker};
pub use notifier::{ClientNotifier, SubscriptionHandle};
pub use queue_store::{QueueEvent, QueueEventType, QueueStore, QueueStoreError};
pub use worker::{RetryPolicy, SyncWorker};
