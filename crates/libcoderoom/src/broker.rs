use std::sync::Arc;

use coderoom_protocol::{ParticipantId, ServerMessage};
use tokio::sync::broadcast;
use tracing::warn;

/// One published event plus the participant it must not be echoed to.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub skip: Option<ParticipantId>,
    pub message: Arc<ServerMessage>,
}

/// Per-session fan-out channel.
///
/// Publishing never blocks: a subscriber that falls more than `capacity`
/// events behind loses the overflow and keeps going from the oldest retained
/// event.
#[derive(Debug)]
pub struct EventBus {
    tx: broadcast::Sender<Envelope>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish to every subscriber except `skip`. Returns the receiver count.
    pub fn publish(&self, message: ServerMessage, skip: Option<&str>) -> usize {
        let envelope = Envelope {
            skip: skip.map(str::to_string),
            message: Arc::new(message),
        };
        self.tx.send(envelope).unwrap_or(0)
    }

    pub fn subscribe(&self, participant_id: impl Into<ParticipantId>) -> Subscription {
        Subscription {
            participant_id: participant_id.into(),
            rx: self.tx.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// A participant's view of a session's event stream.
#[derive(Debug)]
pub struct Subscription {
    participant_id: ParticipantId,
    rx: broadcast::Receiver<Envelope>,
}

impl Subscription {
    pub fn participant_id(&self) -> &str {
        &self.participant_id
    }

    /// Next event addressed to this participant, or `None` once the session is gone.
    pub async fn recv(&mut self) -> Option<Arc<ServerMessage>> {
        loop {
            match self.rx.recv().await {
                Ok(envelope) => {
                    if envelope.skip.as_deref() == Some(self.participant_id.as_str()) {
                        continue;
                    }
                    return Some(envelope.message);
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(participant_id = %self.participant_id, skipped, "subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking variant used by tests and drain loops.
    pub fn try_recv(&mut self) -> Option<Arc<ServerMessage>> {
        loop {
            match self.rx.try_recv() {
                Ok(envelope) => {
                    if envelope.skip.as_deref() == Some(self.participant_id.as_str()) {
                        continue;
                    }
                    return Some(envelope.message);
                }
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    warn!(participant_id = %self.participant_id, skipped, "subscriber lagged");
                }
                Err(_) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deleted(path: &str) -> ServerMessage {
        ServerMessage::ItemDeleted {
            path: path.to_string(),
        }
    }

    #[tokio::test]
    async fn skip_hides_event_from_originator_only() {
        let bus = EventBus::new(8);
        let mut alice = bus.subscribe("alice");
        let mut bob = bus.subscribe("bob");

        assert_eq!(bus.publish(deleted("a"), Some("alice")), 2);
        bus.publish(deleted("b"), None);

        assert_eq!(*alice.recv().await.expect("recv event"), deleted("b"));
        assert_eq!(*bob.recv().await.expect("recv event"), deleted("a"));
        assert_eq!(*bob.recv().await.expect("recv event"), deleted("b"));
        assert!(alice.try_recv().is_none());
    }

    #[tokio::test]
    async fn lagging_subscriber_keeps_receiving() {
        let bus = EventBus::new(2);
        let mut slow = bus.subscribe("slow");
        for i in 0..5 {
            bus.publish(deleted(&i.to_string()), None);
        }
        assert_eq!(*slow.recv().await.expect("recv event"), deleted("3"));
        assert_eq!(*slow.recv().await.expect("recv event"), deleted("4"));
    }

    #[tokio::test]
    async fn closed_bus_ends_subscription() {
        let bus = EventBus::new(4);
        let mut sub = bus.subscribe("p");
        bus.publish(deleted("last"), None);
        drop(bus);
        assert_eq!(*sub.recv().await.expect("recv event"), deleted("last"));
        assert!(sub.recv().await.is_none());
    }

    #[test]
    fn publish_without_subscribers_is_harmless() {
        let bus = EventBus::new(4);
        assert_eq!(bus.publish(deleted("x"), None), 0);
        assert_eq!(bus.subscriber_count(), 0);
    }
}
