//! Sync worker: turns retry registrations into coordinator wake-ups.
//!
//! Registrations are coalesced per queue, held until the device is online,
//! and delivered to the [`SyncCoordinator`]. A queue whose drain halted is
//! signalled again after an exponential backoff.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::adapters::{Connectivity, IntentReceiver};
use crate::core::coordinator::{DrainOutcome, SyncCoordinator};
use crate::domain::{QueueName, RetryIntent};

/// Backoff for re-signalling a queue whose drain halted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Delay before the first re-signal in milliseconds
    #[serde(default = "default_initial_delay")]
    pub initial_delay_ms: u64,

    /// Maximum delay between re-signals in milliseconds
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    /// Backoff multiplier (delay *= multiplier after each failure)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// How often connectivity is re-checked while offline
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
}

fn default_initial_delay() -> u64 {
    1000
}
fn default_max_delay() -> u64 {
    60_000
}
fn default_backoff_multiplier() -> f64 {
    2.0
}
fn default_poll_interval() -> u64 {
    1000
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay(),
            max_delay_ms: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            poll_interval_ms: default_poll_interval(),
        }
    }
}

impl RetryPolicy {
    /// Calculate delay after a given number of consecutive failures (1-indexed)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::from_millis(self.initial_delay_ms.min(self.max_delay_ms));
        }

        let delay =
            self.initial_delay_ms as f64 * self.backoff_multiplier.powi((attempt - 1) as i32);

        let capped = delay.min(self.max_delay_ms as f64) as u64;
        Duration::from_millis(capped)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Long-running host for retry intents
pub struct SyncWorker {
    coordinator: Arc<SyncCoordinator>,
    connectivity: Arc<dyn Connectivity>,
    policy: RetryPolicy,
}

impl SyncWorker {
    pub fn new(
        coordinator: Arc<SyncCoordinator>,
        connectivity: Arc<dyn Connectivity>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            coordinator,
            connectivity,
            policy,
        }
    }

    /// Process registrations until every scheduler is dropped and nothing is
    /// left to deliver.
    ///
    /// Queues that are still failing when the channel closes stay in the
    /// durable store for the next process.
    pub async fn run(self, mut intents: IntentReceiver) {
        let mut pending: Vec<QueueName> = Vec::new();
        let mut failures: HashMap<QueueName, u32> = HashMap::new();

        info!("Sync worker started");
        loop {
            if pending.is_empty() {
                match intents.recv().await {
                    Some(intent) => accept(&mut pending, &intent),
                    None => break,
                }
            }
            for intent in intents.drain_pending() {
                accept(&mut pending, &intent);
            }

            if !self.connectivity.is_online() {
                debug!(pending = pending.len(), "Offline, holding wake-ups");
                tokio::time::sleep(self.policy.poll_interval()).await;
                continue;
            }

            let mut backoff: Option<Duration> = None;
            for queue in std::mem::take(&mut pending) {
                if self.deliver(queue).await {
                    failures.remove(&queue);
                    continue;
                }

                let attempt = failures.entry(queue).or_insert(0);
                *attempt += 1;
                let delay = self.policy.delay_for_attempt(*attempt);
                debug!(%queue, attempt = *attempt, ?delay, "Re-signalling halted queue");

                backoff = Some(backoff.map_or(delay, |current| current.min(delay)));
                pending.push(queue);
            }

            if let Some(delay) = backoff {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    intent = intents.recv() => match intent {
                        Some(intent) => accept(&mut pending, &intent),
                        None => break,
                    },
                }
            }
        }

        if !pending.is_empty() {
            warn!(?pending, "Sync worker stopping with undelivered queues");
        }
        info!("Sync worker stopped");
    }

    /// Deliver one wake-up. Returns false if the queue needs another signal.
    async fn deliver(&self, queue: QueueName) -> bool {
        match self.coordinator.drain(queue).await {
            Ok(DrainOutcome::Halted { remaining, .. }) => {
                debug!(%queue, remaining, "Drain halted");
                false
            }
            Ok(_) => true,
            Err(e) => {
                error!(%queue, error = %e, "Drain failed");
                false
            }
        }
    }
}

fn accept(pending: &mut Vec<QueueName>, intent: &RetryIntent) {
    match intent.queue() {
        Some(queue) if !pending.contains(&queue) => pending.push(queue),
        Some(_) => {}
        None => warn!(intent = %intent, "Ignoring unknown retry intent"),
    }
}
