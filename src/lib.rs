//! offsync - Offline-resilient request layer
//!
//! Keeps a search-and-library client usable while the device is offline.
//!
//! # Architecture
//!
//! Every outbound request passes through the network interceptor:
//! - Immutable assets are served cache-first
//! - Search responses are memoized by a hash of the request body
//! - Saves and removes made offline are written to durable queues and
//!   answered optimistically
//!
//! When connectivity returns, retry wake-ups drain each queue in order,
//! stopping at the first failure, and successful search retries are
//! broadcast to subscribed clients.
//!
//! # Modules
//!
//! - `adapters`: Network, connectivity and retry-scheduling seams
//! - `core`: Caches, queue store, interceptor, coordinator, workers
//! - `domain`: Requests, responses, queues, library entries
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Save while offline, then replay
//! offsync save --cursor abc123 --lottie-url ... --json-url ... --author Ana --offline
//! offsync sync save
//!
//! # Inspect pending work
//! offsync status
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;

// Re-export main types at crate root for convenience
pub use core::{
    ClientNotifier, DrainOutcome, NetworkInterceptor, OfflineWorker, QueueStore, ResponseCache,
    SyncCoordinator, SyncWorker,
};
pub use domain::{ClientMessage, HttpRequest, HttpResponse, LibraryEntry, QueueName, RetryIntent};
