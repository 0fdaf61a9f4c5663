//! Publish/subscribe channel to foreground clients.
//!
//! Delivery is best-effort: a message reaches the handlers subscribed at the
//! moment it is published and nobody else. Late subscribers pick up fresh
//! data through their next ordinary fetch.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::domain::ClientMessage;

type Handler = Arc<dyn Fn(&ClientMessage) + Send + Sync>;

/// Identifies one subscription for later removal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(Uuid);

/// Broadcasts messages to every currently subscribed client
#[derive(Default)]
pub struct ClientNotifier {
    handlers: RwLock<HashMap<SubscriptionHandle, Handler>>,
}

impl ClientNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler invoked for every subsequent publish
    pub fn subscribe<F>(&self, handler: F) -> SubscriptionHandle
    where
        F: Fn(&ClientMessage) + Send + Sync + 'static,
    {
        let handle = SubscriptionHandle(Uuid::new_v4());
        match self.handlers.write() {
            Ok(mut handlers) => {
                handlers.insert(handle, Arc::new(handler));
            }
            Err(poisoned) => {
                poisoned.into_inner().insert(handle, Arc::new(handler));
            }
        }
        handle
    }

    /// Subscribe with a channel instead of a callback
    pub fn subscribe_channel(&self) -> (SubscriptionHandle, mpsc::UnboundedReceiver<ClientMessage>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let handle = self.subscribe(move |message| {
            // A closed receiver just means the client went away
            let _ = sender.send(message.clone());
        });
        (handle, receiver)
    }

    /// Remove a subscription. Returns false if it was already gone.
    pub fn unsubscribe(&self, handle: SubscriptionHandle) -> bool {
        match self.handlers.write() {
            Ok(mut handlers) => handlers.remove(&handle).is_some(),
            Err(poisoned) => poisoned.into_inner().remove(&handle).is_some(),
        }
    }

    /// Deliver `message` to every current subscriber. Returns how many were
    /// reached.
    pub fn publish(&self, message: &ClientMessage) -> usize {
        // Snapshot so handlers may (un)subscribe without deadlocking
        let handlers: Vec<Handler> = match self.handlers.read() {
            Ok(handlers) => handlers.values().cloned().collect(),
            Err(poisoned) => {
                warn!("Notifier lock poisoned, delivering from last known subscribers");
                poisoned.into_inner().values().cloned().collect()
            }
        };

        for handler in &handlers {
            handler(message);
        }

        debug!(kind = message.kind(), delivered = handlers.len(), "Published client message");
        handlers.len()
    }

    pub fn subscriber_count(&self) -> usize {
        self.handlers.read().map_or(0, |handlers| handlers.len())
    }
}
