//! Notifications from the core to whatever front end is attached.

use serde::Serialize;
use tokio::sync::broadcast;

use murmur_shared::types::{ContactId, MessageId};

use crate::contact::Stage;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CoreEvent {
    ContactAdded { contact: ContactId },
    /// The contact moved to a new handshake stage.
    HandshakeProgress { contact: ContactId, stage: Stage },
    MessageReceived { contact: ContactId, message: MessageId },
    MessagesDelivered { contact: ContactId, count: usize },
    HistoryCleared { contact: ContactId },
    /// Something the user should see, e.g. storage corruption.
    Error { message: String },
}

/// Destination for [`CoreEvent`]s.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: CoreEvent);
}

/// Fan-out sink over a tokio broadcast channel. Slow subscribers lose the
/// oldest events, never block the core.
#[derive(Clone)]
pub struct BroadcastSink {
    tx: broadcast::Sender<CoreEvent>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CoreEvent> {
        self.tx.subscribe()
    }
}

impl Default for BroadcastSink {
    fn default() -> Self {
        Self::new(256)
    }
}

impl EventSink for BroadcastSink {
    fn emit(&self, event: CoreEvent) {
        // No subscribers is not an error.
        if self.tx.send(event).is_err() {
            tracing::trace!("event dropped, no subscribers");
        }
    }
}
