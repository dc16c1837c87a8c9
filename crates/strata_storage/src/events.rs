//! Local change events exposed to callers.
//!
//! Delivery is lossy by design: events go out over a bounded broadcast
//! channel, a subscriber that lags loses the oldest events, and a send with
//! no subscribers is simply dropped. A misbehaving subscriber can therefore
//! never abort an engine operation.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Capacity of the subscriber channel before lagging readers drop events.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// An engine change event. `Remote*` variants are re-emissions of events
/// that originated in a peer context and arrived over the broadcast bridge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    Set { key: String },
    Get { key: String },
    Remove { key: String },
    Clear,
    Import { entries: usize },
    Migrate { migrated: usize },
    RemoteSet { key: String },
    RemoteRemove { key: String },
    RemoteClear,
    RemoteImport,
}

impl EngineEvent {
    /// The caller-facing event name.
    pub fn name(&self) -> &'static str {
        match self {
            EngineEvent::Set { .. } => "set",
            EngineEvent::Get { .. } => "get",
            EngineEvent::Remove { .. } => "remove",
            EngineEvent::Clear => "clear",
            EngineEvent::Import { .. } => "import",
            EngineEvent::Migrate { .. } => "migrate",
            EngineEvent::RemoteSet { .. } => "remote:set",
            EngineEvent::RemoteRemove { .. } => "remote:remove",
            EngineEvent::RemoteClear => "remote:clear",
            EngineEvent::RemoteImport => "remote:import",
        }
    }
}

/// Fan-out of engine events to any number of subscribers.
pub struct EventBus {
    tx: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }

    /// Emit an event. Never fails; an empty subscriber set drops it.
    pub fn emit(&self, event: EngineEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscriber_receives_events() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        bus.emit(EngineEvent::Set { key: "a".into() });
        bus.emit(EngineEvent::Remove { key: "a".into() });
        assert_eq!(rx.recv().await.unwrap(), EngineEvent::Set { key: "a".into() });
        assert_eq!(
            rx.recv().await.unwrap(),
            EngineEvent::Remove { key: "a".into() }
        );
    }

    #[test]
    fn test_emit_without_subscribers_is_silent() {
        let bus = EventBus::new();
        bus.emit(EngineEvent::Clear);
    }

    #[test]
    fn test_event_names() {
        assert_eq!(EngineEvent::Set { key: "k".into() }.name(), "set");
        assert_eq!(EngineEvent::RemoteSet { key: "k".into() }.name(), "remote:set");
        assert_eq!(EngineEvent::RemoteClear.name(), "remote:clear");
        assert_eq!(EngineEvent::Migrate { migrated: 0 }.name(), "migrate");
    }
}
