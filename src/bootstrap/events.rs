use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

use crate::listener::CloseReason;

/// Listener lifecycle events
#[derive(Debug, Clone)]
pub enum Event {
    /// Accept loop is running
    ListenerStarted { address: SocketAddr },

    /// Accept loop exited and all tasks were joined
    ListenerStopped,

    /// Connection accepted and registered
    SessionOpened { index: usize, peer: SocketAddr },

    /// One command/response cycle finished draining
    TurnCompleted {
        index: usize,
        chunks: usize,
        bytes: usize,
    },

    /// Session deregistered
    SessionClosed {
        index: usize,
        peer: SocketAddr,
        reason: CloseReason,
    },

    /// Payload written to a parked connection
    PayloadInjected { index: usize, bytes: usize },
}

/// Internal event bus for listener lifecycle
///
/// Uses broadcast channels to allow multiple subscribers.
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    /// Create a new event bus
    pub fn new(capacity: usize) -> Arc<Self> {
        let (tx, _) = broadcast::channel(capacity);
        Arc::new(Self { tx })
    }

    /// Publish an event
    pub fn publish(&self, event: Event) {
        debug!(event = ?event, "publishing event");
        // Ignore send errors (no subscribers)
        let _ = self.tx.send(event);
    }

    /// Subscribe to events
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    /// Get number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        let (tx, _) = broadcast::channel(256);
        Self { tx }
    }
}

/// Shared event bus type
pub type SharedBus = Arc<EventBus>;
