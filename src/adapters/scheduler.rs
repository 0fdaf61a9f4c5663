//! In-process retry scheduler.
//!
//! Registrations are pushed onto a channel; whoever owns the receiving end
//! (the sync worker, or the CLI) decides when to deliver the wake-up.

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;

use super::RetryScheduler;
use crate::domain::RetryIntent;

/// Scheduler that forwards registrations over an unbounded channel
#[derive(Debug, Clone)]
pub struct ChannelScheduler {
    sender: mpsc::UnboundedSender<RetryIntent>,
}

/// Receiving end of a [`ChannelScheduler`]
#[derive(Debug)]
pub struct IntentReceiver {
    receiver: mpsc::UnboundedReceiver<RetryIntent>,
}

impl ChannelScheduler {
    pub fn new() -> (Self, IntentReceiver) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, IntentReceiver { receiver })
    }
}

#[async_trait]
impl RetryScheduler for ChannelScheduler {
    async fn register(&self, intent: RetryIntent) -> Result<()> {
        self.sender
            .send(intent)
            .map_err(|e| anyhow::anyhow!("Retry scheduler is closed, dropped intent '{}'", e.0))
    }
}

impl IntentReceiver {
    /// Wait for the next registration. `None` once every scheduler is dropped.
    pub async fn recv(&mut self) -> Option<RetryIntent> {
        self.receiver.recv().await
    }

    /// Take every registration currently buffered
    pub fn drain_pending(&mut self) -> Vec<RetryIntent> {
        let mut intents = Vec::new();
        while let Ok(intent) = self.receiver.try_recv() {
            intents.push(intent);
        }
        intents
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::QueueName;

    #[tokio::test]
    async fn test_registrations_are_delivered_in_order() {
        let (scheduler, mut receiver) = ChannelScheduler::new();

        scheduler.register(RetryIntent::for_queue(QueueName::Save)).await.unwrap();
        scheduler.register(RetryIntent::for_queue(QueueName::Remove)).await.unwrap();

        let pending = receiver.drain_pending();
        assert_eq!(
            pending,
            vec![
                RetryIntent::for_queue(QueueName::Save),
                RetryIntent::for_queue(QueueName::Remove),
            ]
        );
        assert!(receiver.drain_pending().is_empty());
    }

    #[tokio::test]
    async fn test_register_fails_when_receiver_dropped() {
        let (scheduler, receiver) = ChannelScheduler::new();
        drop(receiver);

        assert!(scheduler.register(RetryIntent::new("save")).await.is_err());
    }
}
