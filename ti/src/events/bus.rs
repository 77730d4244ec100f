//! Event Bus - pub/sub channel between the index and its host
//!
//! Uses a tokio broadcast channel so the orchestrator, repository and any
//! number of host listeners observe the same ordered stream.

use tokio::sync::broadcast;
use tracing::debug;

use super::types::IndexEvent;

/// Default channel capacity (events)
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Central event bus for index activity
///
/// Cheap to clone; every clone emits into the same channel.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<IndexEvent>,
}

impl EventBus {
    /// Create a new event bus with the given capacity
    pub fn new(capacity: usize) -> Self {
        debug!(capacity, "EventBus::new: creating event bus");
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Create a new event bus with default capacity
    pub fn with_default_capacity() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Emit an event to all subscribers
    ///
    /// Fire-and-forget: with no subscribers the event is dropped, and a slow
    /// subscriber loses the oldest events once the channel is full.
    pub fn emit(&self, event: IndexEvent) {
        debug!(event_type = event.event_type(), "EventBus::emit");
        let _ = self.tx.send(event);
    }

    /// Subscribe to events emitted after this call
    pub fn subscribe(&self) -> broadcast::Receiver<IndexEvent> {
        debug!("EventBus::subscribe: new subscriber");
        self.tx.subscribe()
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}
