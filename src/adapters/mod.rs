//! Adapter interfaces for the host platform and the remote API.
//!
//! The offline layer never talks to the outside world directly. It goes
//! through these traits so the network, the connectivity signal and the
//! retry facility can be swapped per host (and faked in tests).

pub mod connectivity;
pub mod http;
pub mod scheduler;

use anyhow::Result;
use async_trait::async_trait;

use crate::domain::{HttpRequest, HttpResponse, RetryIntent};

// Re-export the default implementations
pub use connectivity::ManualConnectivity;
pub use http::ReqwestNetwork;
pub use scheduler::{ChannelScheduler, IntentReceiver};

/// Outbound network boundary
#[async_trait]
pub trait Network: Send + Sync {
    /// Send a request and return the full response.
    ///
    /// Non-2xx statuses are responses, not errors. An `Err` means the request
    /// never produced a response (DNS, connect, TLS, timeout).
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse>;
}

/// Point-in-time connectivity signal
pub trait Connectivity: Send + Sync {
    fn is_online(&self) -> bool;
}

/// Host facility for deferred wake-ups
#[async_trait]
pub trait RetryScheduler: Send + Sync {
    /// Ask for a future wake-up carrying `intent`
    async fn register(&self, intent: RetryIntent) -> Result<()>;
}
