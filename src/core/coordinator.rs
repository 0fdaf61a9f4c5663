//! Sync coordinator: drains one queue per retry wake-up.
//!
//! A drain snapshots the queue and replays each item in order through the
//! real network. A 200 removes that item; anything else stops the drain,
//! leaving the failing item and everything after it for the next wake-up.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

use crate::adapters::Network;
use crate::core::cache::{content_hash, ResponseCache, SEARCH_CACHE};
use crate::core::interceptor::RouteTable;
use crate::core::notifier::ClientNotifier;
use crate::core::queue_store::{QueueStore, QueueStoreError};
use crate::domain::search::replayed_search_body;
use crate::domain::{ClientMessage, HttpRequest, HttpResponse, QueueName, RetryIntent};

/// Errors that abort a wake-up before any replay happens
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Unknown retry intent: {0}")]
    UnknownIntent(String),

    #[error("Queue store error: {0}")]
    Queue(#[from] QueueStoreError),
}

/// Result of one drain
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Nothing was queued; no network call was made
    Empty,

    /// Every item was replayed successfully
    Completed { replayed: usize },

    /// Replay stopped at the first failure
    Halted {
        replayed: usize,
        remaining: usize,
        error: String,
    },

    /// Another drain of the same queue is in progress
    AlreadyDraining,
}

impl DrainOutcome {
    pub fn replayed(&self) -> usize {
        match self {
            Self::Completed { replayed } | Self::Halted { replayed, .. } => *replayed,
            Self::Empty | Self::AlreadyDraining => 0,
        }
    }

    pub fn is_halted(&self) -> bool {
        matches!(self, Self::Halted { .. })
    }
}

/// Marks a queue as draining until dropped
struct DrainGuard<'a> {
    active: &'a Mutex<HashSet<QueueName>>,
    queue: QueueName,
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        match self.active.lock() {
            Ok(mut active) => {
                active.remove(&self.queue);
            }
            Err(poisoned) => {
                poisoned.into_inner().remove(&self.queue);
            }
        }
    }
}

/// How one queued item is sent again
enum Replay {
    Request(HttpRequest),
    /// The item can never succeed and is dropped
    Malformed(String),
}

pub struct SyncCoordinator {
    routes: RouteTable,
    network: Arc<dyn Network>,
    queues: Arc<QueueStore>,
    cache: Arc<ResponseCache>,
    notifier: Arc<ClientNotifier>,
    draining: Mutex<HashSet<QueueName>>,
}

impl SyncCoordinator {
    pub fn new(
        routes: RouteTable,
        network: Arc<dyn Network>,
        queues: Arc<QueueStore>,
        cache: Arc<ResponseCache>,
        notifier: Arc<ClientNotifier>,
    ) -> Self {
        Self {
            routes,
            network,
            queues,
            cache,
            notifier,
            draining: Mutex::new(HashSet::new()),
        }
    }

    /// Handle a wake-up delivered for `intent`
    pub async fn on_wake(&self, intent: &RetryIntent) -> Result<DrainOutcome, SyncError> {
        let queue = intent
            .queue()
            .ok_or_else(|| SyncError::UnknownIntent(intent.name.clone()))?;
        self.drain(queue).await
    }

    /// Replay every pending item of `queue` in order, stopping at the first
    /// failure
    #[instrument(skip(self), fields(queue = %queue))]
    pub async fn drain(&self, queue: QueueName) -> Result<DrainOutcome, SyncError> {
        let Some(_guard) = self.try_begin(queue) else {
            debug!("Drain already in progress");
            return Ok(DrainOutcome::AlreadyDraining);
        };

        let items = self.queues.peek_all(queue).await?;
        if items.is_empty() {
            debug!("Queue empty, nothing to replay");
            return Ok(DrainOutcome::Empty);
        }

        info!(pending = items.len(), "Draining queue");
        let mut replayed = 0;
        let mut outcome = None;

        for (index, item) in items.iter().enumerate() {
            let request = match self.replay_request(queue, item) {
                Replay::Request(request) => request,
                Replay::Malformed(reason) => {
                    error!(%reason, "Dropping malformed queued item");
                    self.queues.remove(queue, item).await?;
                    continue;
                }
            };

            let failure = match self.network.send(&request).await {
                Ok(response) if response.is_success() => {
                    self.queues.remove(queue, item).await?;
                    replayed += 1;
                    if queue == QueueName::SearchRetry {
                        self.complete_search(&request, &response);
                    }
                    continue;
                }
                Ok(response) => format!("{} {}", response.status, response.status_text),
                Err(e) => format!("{:#}", e),
            };

            let remaining = items.len() - index;
            warn!(replayed, remaining, error = %failure, "Replay failed, halting drain");
            outcome = Some(DrainOutcome::Halted {
                replayed,
                remaining,
                error: failure,
            });
            break;
        }

        if replayed > 0 {
            match self.queues.compact().await {
                Ok(kept) => debug!(kept, "Compacted queue log"),
                Err(e) => warn!(error = %e, "Failed to compact queue log"),
            }
        }

        let outcome = outcome.unwrap_or(DrainOutcome::Completed { replayed });
        if !outcome.is_halted() {
            info!(replayed, "Queue drained");
        }
        Ok(outcome)
    }

    /// Queues with a drain currently running
    pub fn draining(&self) -> Vec<QueueName> {
        match self.draining.lock() {
            Ok(active) => active.iter().copied().collect(),
            Err(poisoned) => poisoned.into_inner().iter().copied().collect(),
        }
    }

    fn try_begin(&self, queue: QueueName) -> Option<DrainGuard<'_>> {
        let inserted = match self.draining.lock() {
            Ok(mut active) => active.insert(queue),
            Err(poisoned) => poisoned.into_inner().insert(queue),
        };

        inserted.then_some(DrainGuard {
            active: &self.draining,
            queue,
        })
    }

    fn replay_request(&self, queue: QueueName, item: &Value) -> Replay {
        match queue {
            QueueName::Save => {
                match HttpRequest::post(self.routes.api_url().clone(), Vec::new()).with_json(item) {
                    Ok(request) => Replay::Request(request),
                    Err(e) => Replay::Malformed(e.to_string()),
                }
            }
            QueueName::Remove => match item.as_str() {
                Some(cursor) => match self.routes.remove_url(cursor) {
                    Ok(url) => Replay::Request(HttpRequest::delete(url)),
                    Err(e) => Replay::Malformed(format!("{:#}", e)),
                },
                None => Replay::Malformed(format!("remove item is not a cursor: {}", item)),
            },
            QueueName::SearchRetry => match replayed_search_body(item) {
                Some(body) => Replay::Request(
                    HttpRequest::post(self.routes.search_url().clone(), body)
                        .with_header("Content-Type", "application/json"),
                ),
                None => Replay::Malformed(format!("search item is not a request body: {}", item)),
            },
        }
    }

    fn complete_search(&self, request: &HttpRequest, response: &HttpResponse) {
        let hash = content_hash(&request.body);
        if let Err(e) = self.cache.put(SEARCH_CACHE, &hash, response) {
            warn!(%hash, error = %e, "Failed to cache replayed search");
        }

        let message = ClientMessage::SearchRetryResult {
            payload: search_payload(response),
        };
        let delivered = self.notifier.publish(&message);
        debug!(%hash, delivered, "Notified clients of search result");
    }
}

/// The `data` member of a GraphQL response, else the whole body
fn search_payload(response: &HttpResponse) -> Value {
    match response.json::<Value>() {
        Ok(Value::Object(mut body)) => match body.remove("data") {
            Some(data) => data,
            None => Value::Object(body),
        },
        Ok(other) => other,
        Err(_) => Value::String(response.text().into_owned()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_search_payload_prefers_data() {
        let response = HttpResponse::ok()
            .with_body(r#"{"data":{"searchPublicAnimations":{"totalCount":1}}}"#);
        assert_eq!(
            search_payload(&response),
            json!({ "searchPublicAnimations": { "totalCount": 1 } })
        );

        let response = HttpResponse::ok().with_body(r#"{"errors":[]}"#);
        assert_eq!(search_payload(&response), json!({ "errors": [] }));

        let response = HttpResponse::ok().with_body("plain");
        assert_eq!(search_payload(&response), json!("plain"));
    }

    #[test]
    fn test_outcome_replayed_count() {
        assert_eq!(DrainOutcome::Empty.replayed(), 0);
        assert_eq!(DrainOutcome::Completed { replayed: 3 }.replayed(), 3);

        let halted = DrainOutcome::Halted {
            replayed: 1,
            remaining: 2,
            error: "500 Internal Server Error".to_string(),
        };
        assert_eq!(halted.replayed(), 1);
        assert!(halted.is_halted());
    }
}
