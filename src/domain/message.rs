//! Messages broadcast to foreground client contexts.

use serde::{Deserialize, Serialize};

/// A message delivered to every subscribed client.
///
/// Serialized as `{ "kind": "search-retry-result", "payload": ... }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ClientMessage {
    /// A search deferred while offline has now been answered
    SearchRetryResult { payload: serde_json::Value },
}

impl ClientMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SearchRetryResult { .. } => "search-retry-result",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_shape() {
        let message = ClientMessage::SearchRetryResult {
            payload: serde_json::json!({ "searchPublicAnimations": { "edges": [] } }),
        };

        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["kind"], "search-retry-result");
        assert_eq!(json["kind"], message.kind());
        assert!(json["payload"]["searchPublicAnimations"].is_object());
    }
}
