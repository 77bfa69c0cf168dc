//! UI event hub
//!
//! Fire-and-forget fan-out to browser listeners. Delivery is best-effort:
//! a listener that is absent or lagging simply misses events and reconciles
//! by re-fetching the command list.

use kalirelay_protocol::UiEvent;
use tokio::sync::broadcast;
use tracing::debug;

const CHANNEL_CAPACITY: usize = 256;

#[derive(Clone)]
pub struct EventHub {
    tx: broadcast::Sender<UiEvent>,
}

impl EventHub {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Publish an event to all current subscribers
    pub fn publish(&self, event: UiEvent) {
        // Err means no subscribers; that is fine
        if let Err(e) = self.tx.send(event) {
            debug!("No UI listeners for event: {:?}", e.0);
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<UiEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}
