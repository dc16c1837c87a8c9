//! Cross-context change notification.
//!
//! Engines on the same namespace publish JSON messages through a transport
//! and translate received peer messages into local `remote:*` events.
//! Delivery is best-effort: a lagging subscriber loses the oldest messages
//! and nobody retries. Self-delivery is suppressed by comparing `origin_id`.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::meta::ItemMeta;

/// Capacity of the in-process hub before lagging peers drop messages.
const HUB_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BroadcastKind {
    Set,
    Remove,
    Clear,
    Import,
}

/// The wire message exchanged between peer contexts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastMessage {
    #[serde(rename = "type")]
    pub kind: BroadcastKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<ItemMeta>,
    pub origin_id: String,
}

impl BroadcastMessage {
    pub fn new(kind: BroadcastKind, key: Option<String>, origin_id: &str) -> Self {
        Self {
            kind,
            key,
            meta: None,
            origin_id: origin_id.to_string(),
        }
    }
}

/// A transport that carries namespace messages between contexts.
///
/// The transport need not suppress self-delivery; subscribers filter by
/// `origin_id` regardless.
pub trait BroadcastTransport: Send + Sync {
    /// Publish a serialized message to all peers. Best-effort.
    fn publish(&self, message: &str);
    /// Subscribe to the peer message stream.
    fn subscribe(&self) -> broadcast::Receiver<String>;
}

/// In-process transport connecting engines that share one backing store,
/// the moral equivalent of peer tabs sharing host storage.
pub struct LocalBroadcastHub {
    tx: broadcast::Sender<String>,
}

impl LocalBroadcastHub {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(HUB_CAPACITY);
        Self { tx }
    }
}

impl Default for LocalBroadcastHub {
    fn default() -> Self {
        Self::new()
    }
}

impl BroadcastTransport for LocalBroadcastHub {
    fn publish(&self, message: &str) {
        let _ = self.tx.send(message.to_string());
    }

    fn subscribe(&self) -> broadcast::Receiver<String> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_hub_delivers_to_subscribers() {
        let hub = LocalBroadcastHub::new();
        let mut rx = hub.subscribe();
        let msg = BroadcastMessage::new(BroadcastKind::Set, Some("k".into()), "origin-1");
        hub.publish(&serde_json::to_string(&msg).unwrap());
        let received: BroadcastMessage =
            serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(received.kind, BroadcastKind::Set);
        assert_eq!(received.key.as_deref(), Some("k"));
        assert_eq!(received.origin_id, "origin-1");
    }

    #[test]
    fn test_publish_without_subscribers_is_silent() {
        let hub = LocalBroadcastHub::new();
        hub.publish("{}");
    }

    #[test]
    fn test_wire_format() {
        let msg = BroadcastMessage::new(BroadcastKind::Remove, Some("user".into()), "o");
        let text = serde_json::to_string(&msg).unwrap();
        assert!(text.contains("\"type\":\"REMOVE\""));
        assert!(text.contains("\"key\":\"user\""));
        // Absent meta is omitted entirely.
        assert!(!text.contains("\"meta\""));
    }

    #[test]
    fn test_clear_message_has_no_key() {
        let msg = BroadcastMessage::new(BroadcastKind::Clear, None, "o");
        let text = serde_json::to_string(&msg).unwrap();
        assert!(!text.contains("\"key\""));
        let back: BroadcastMessage = serde_json::from_str(&text).unwrap();
        assert_eq!(back.kind, BroadcastKind::Clear);
        assert!(back.key.is_none());
    }
}
