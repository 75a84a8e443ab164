use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, warn};

use crate::traits::EventSink;
use crate::types::FlowEvent;

/// Fans lifecycle events out to any number of listeners.
///
/// Emitting never blocks. A listener that falls more than `capacity` events
/// behind loses the oldest ones and keeps going.
pub struct EventBus {
    tx: broadcast::Sender<FlowEvent>,
}

impl EventBus {
    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> EventStream {
        EventStream {
            rx: self.tx.subscribe(),
        }
    }

    pub fn listener_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_capacity(256)
    }
}

impl EventSink for EventBus {
    fn emit(&self, event: FlowEvent) {
        // No listeners is fine; the event is simply dropped.
        let _ = self.tx.send(event);
    }
}

/// One listener's view of an [`EventBus`].
pub struct EventStream {
    rx: broadcast::Receiver<FlowEvent>,
}

impl EventStream {
    /// Next event, or `None` once the bus is gone.
    pub async fn next(&mut self) -> Option<FlowEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Event listener fell behind, dropped events");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: FlowEvent) {}
}

/// Forwards events into the tracing log at debug level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: FlowEvent) {
        debug!(event = event.name(), payload = %event.payload(), "Lifecycle event");
    }
}
