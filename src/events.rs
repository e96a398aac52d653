use serde::Serialize;
use tokio::sync::broadcast;

/// Outbound notification for the UI layer. Serialized onto the `pipe`
/// stdout stream as one NDJSON envelope per event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "port", content = "data", rename_all = "camelCase")]
pub enum BridgeEvent {
    /// Archive serialization progress, 0 to 100.
    DownloadProgress(u8),
    /// Subsystem failure surfaced toward the UI.
    Error(String),
}

/// Broadcast fan-out for [`BridgeEvent`]. Publishing never blocks and
/// never fails; events published with no live subscribers are dropped.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<BridgeEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn publish<E: Into<BridgeEvent>>(&self, event: E) {
        let _ = self.tx.send(event.into());
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BridgeEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
