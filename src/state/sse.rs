use serde::Serialize;
use tokio::sync::broadcast;
use tracing::warn;

use crate::dto::sse::ServerEvent;

/// Broadcast hub feeding the status SSE stream.
pub struct SseHub {
    sender: broadcast::Sender<ServerEvent>,
}

impl SseHub {
    /// Hub backed by a Tokio broadcast channel with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _receiver) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Register a subscriber for subsequent events.
    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.sender.subscribe()
    }

    /// Number of connected subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Serialize `payload` as a named event and fan it out. Delivery is best effort.
    pub fn publish<T: Serialize>(&self, name: &str, payload: &T) {
        match ServerEvent::json(Some(name.to_string()), payload) {
            Ok(event) => {
                let _ = self.sender.send(event);
            }
            Err(err) => warn!(event = name, error = %err, "failed to encode SSE event"),
        }
    }
}
