//! Exit events and their delivery.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Size of the broadcast channel for exit events.
const EVENT_BUFFER_SIZE: usize = 256;

/// Published exactly once when a monitored process is observed to exit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExitEvent {
    /// When the exit was observed.
    pub timestamp: DateTime<Utc>,
    /// Container the process belonged to.
    pub container_id: String,
    /// The exited process.
    pub process_id: String,
    /// Numeric exit status.
    pub exit_status: u32,
}

/// Topic an exit event for this container/process pair is published on.
/// Stable and collision-free per container.
pub fn process_exit_topic(container_id: &str, process_id: &str) -> String {
    format!("{container_id}.{process_id}")
}

/// Destination for exit events.
///
/// Publishing is fire-and-forget: a sink must not fail the publishing task,
/// and delivery to slow or absent consumers is the sink's concern.
pub trait EventSink: Send + Sync {
    /// Publish one event on the given topic.
    fn publish(&self, topic: &str, event: ExitEvent);
}

/// In-process [`EventSink`] backed by a broadcast channel.
///
/// Subscribers receive events as `(topic, event)` tuples. Publishing with no
/// live subscribers drops the event.
pub struct EventHub {
    event_tx: broadcast::Sender<(String, ExitEvent)>,
}

impl EventHub {
    /// Create a new hub.
    pub fn new() -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_BUFFER_SIZE);
        Self { event_tx }
    }

    /// Subscribe to all events published through this hub.
    pub fn subscribe(&self) -> broadcast::Receiver<(String, ExitEvent)> {
        self.event_tx.subscribe()
    }
}

impl EventSink for EventHub {
    fn publish(&self, topic: &str, event: ExitEvent) {
        // send only fails when there are no subscribers
        let _ = self.event_tx.send((topic.to_string(), event));
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}
