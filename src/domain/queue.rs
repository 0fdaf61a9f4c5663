//! Queue identities and the retry intents that wake them up.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The independent queues of deferred operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QueueName {
    /// Latest unanswered search (singleton)
    SearchRetry,

    /// Library saves, in order
    Save,

    /// Library removals, in order
    Remove,
}

impl QueueName {
    pub const ALL: [QueueName; 3] = [QueueName::SearchRetry, QueueName::Save, QueueName::Remove];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SearchRetry => "search-retry",
            Self::Save => "save",
            Self::Remove => "remove",
        }
    }

    /// Singleton queues keep only the most recent payload
    pub fn is_singleton(&self) -> bool {
        matches!(self, Self::SearchRetry)
    }
}

impl fmt::Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("Unknown queue: {0} (expected search-retry, save or remove)")]
pub struct UnknownQueue(pub String);

impl FromStr for QueueName {
    type Err = UnknownQueue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        QueueName::ALL
            .into_iter()
            .find(|queue| queue.as_str() == s)
            .ok_or_else(|| UnknownQueue(s.to_string()))
    }
}

/// A named wake-up request registered with the host.
///
/// Intent names are queue names, so a wake-up identifies exactly the queue
/// to drain.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RetryIntent {
    pub name: String,
}

impl RetryIntent {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn for_queue(queue: QueueName) -> Self {
        Self::new(queue.as_str())
    }

    /// The queue this intent drains, if the name is one we own
    pub fn queue(&self) -> Option<QueueName> {
        self.name.parse().ok()
    }
}

impl fmt::Display for RetryIntent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}
