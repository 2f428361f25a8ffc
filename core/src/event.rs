use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Event key type
pub type EventKey = String;

/// Event payload
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EventPayload {
    Empty,
    String(String),
}

/// Build event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildEvent {
    /// Event key (e.g., "build.started", "directive.applied")
    pub key: EventKey,

    /// Id of the build that emitted the event
    pub build_id: String,

    /// Directive position the event refers to
    pub position: Option<usize>,

    /// Event payload
    pub payload: EventPayload,

    /// Timestamp
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl BuildEvent {
    /// Create a new event
    pub fn new(
        key: impl Into<String>,
        build_id: impl Into<String>,
        position: Option<usize>,
        payload: EventPayload,
    ) -> Self {
        Self {
            key: key.into(),
            build_id: build_id.into(),
            position,
            payload,
            timestamp: chrono::Utc::now(),
        }
    }

    /// Create an event with no payload
    pub fn empty(key: impl Into<String>, build_id: impl Into<String>, position: Option<usize>) -> Self {
        Self::new(key, build_id, position, EventPayload::Empty)
    }

    /// Create an event with a string payload
    pub fn with_string(
        key: impl Into<String>,
        build_id: impl Into<String>,
        position: Option<usize>,
        message: impl Into<String>,
    ) -> Self {
        Self::new(key, build_id, position, EventPayload::String(message.into()))
    }
}

/// Event emitter
#[derive(Clone)]
pub struct EventEmitter {
    sender: Arc<broadcast::Sender<BuildEvent>>,
}

impl EventEmitter {
    /// Create a new event emitter
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Emit an event. Events without subscribers are dropped.
    pub fn emit(&self, event: BuildEvent) {
        let _ = self.sender.send(event);
    }

    /// Subscribe to events
    pub fn subscribe(&self) -> broadcast::Receiver<BuildEvent> {
        self.sender.subscribe()
    }

}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new(256)
    }
}

/// Event catalog - predefined event keys
pub mod events {
    pub const BUILD_STARTED: &str = "build.started";
    pub const BUILD_COMPLETED: &str = "build.completed";
    pub const BUILD_FAILED: &str = "build.failed";
    pub const BUILD_CANCELLED: &str = "build.cancelled";

    pub const DIRECTIVE_APPLYING: &str = "directive.applying";
    pub const DIRECTIVE_APPLIED: &str = "directive.applied";

    pub const INSTALL_DEFERRED: &str = "install.deferred";
    pub const INSTALL_COMPLETED: &str = "install.completed";
}
