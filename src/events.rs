//! Client event emission
//!
//! Everything the embedding application needs to observe (session
//! connected, plugin attached, room joined, feed list changes, errors)
//! flows through one unbounded channel of typed events.

use crate::plugin::feeds::FeedSnapshot;
use log::debug;
use tokio::sync::mpsc;

/// Events delivered to the embedding application
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// Gateway session established
    Connected,
    /// Both plugin handles exist and are routable
    Attached { plugin: String },
    /// Publisher joined the room
    Joined { plugin: String },
    /// Subscriber handle joined its feeds
    Subscribed { plugin: String },
    /// Feed bookkeeping changed; presentation should resync its views
    FeedsSynced { feeds: Vec<FeedSnapshot> },
    /// A single feed's surface needs a refresh (resolution change)
    ViewRefresh { feed_id: u64 },
    /// Transport closed by the remote end
    Closed { code: u16, reason: String },
    /// Non-fatal error from the gateway, a plugin, or the transport
    Error { message: String },
}

/// Sending half of the client event channel
#[derive(Clone)]
pub struct EventSender {
    tx: mpsc::UnboundedSender<ClientEvent>,
}

impl EventSender {
    /// Create a connected sender/receiver pair
    pub fn channel() -> (EventSender, mpsc::UnboundedReceiver<ClientEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (EventSender { tx }, rx)
    }

    /// Emit an event. A dropped receiver makes this a no-op.
    pub fn emit(&self, event: ClientEvent) {
        if self.tx.send(event).is_err() {
            debug!("Event receiver dropped, discarding event");
        }
    }

    /// Emit an error event
    pub fn error(&self, message: impl Into<String>) {
        self.emit(ClientEvent::Error {
            message: message.into(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn emits_in_order() {
        let (tx, mut rx) = EventSender::channel();
        tx.emit(ClientEvent::Connected);
        tx.error("boom");

        assert!(matches!(rx.recv().await, Some(ClientEvent::Connected)));
        match rx.recv().await {
            Some(ClientEvent::Error { message }) => assert_eq!(message, "boom"),
            other => panic!("Expected error event, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn dropped_receiver_is_a_noop() {
        let (tx, rx) = EventSender::channel();
        drop(rx);
        tx.emit(ClientEvent::Connected);
    }
}
