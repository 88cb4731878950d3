//! Event system for real-time state notifications
//!
//! Session and control state changes are broadcast here and picked up by
//! WebSocket clients.

pub mod types;

pub use types::SystemEvent;

use tokio::sync::broadcast;

/// Event channel capacity (ring buffer size)
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Broadcast bus for system events
///
/// A subscriber that falls more than `EVENT_CHANNEL_CAPACITY` events behind
/// receives `Lagged` and misses the overwritten events.
pub struct EventBus {
    tx: broadcast::Sender<SystemEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Publish an event; dropped silently when nobody listens
    pub fn publish(&self, event: SystemEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SystemEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_subscribe() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.publish(SystemEvent::DirectionChanged {
            direction: "LEFT".to_string(),
        });

        let event = rx.recv().await.unwrap();
        assert!(matches!(event, SystemEvent::DirectionChanged { .. }));
    }

    #[tokio::test]
    async fn test_multiple_subscribers() {
        let bus = EventBus::new();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        assert_eq!(bus.subscriber_count(), 2);

        bus.publish(SystemEvent::SessionError {
            room_id: "room".to_string(),
            message: "boom".to_string(),
        });

        assert!(matches!(
            rx1.recv().await.unwrap(),
            SystemEvent::SessionError { .. }
        ));
        assert!(matches!(
            rx2.recv().await.unwrap(),
            SystemEvent::SessionError { .. }
        ));
    }

    #[test]
    fn test_publish_without_subscribers() {
        let bus = EventBus::new();
        bus.publish(SystemEvent::DirectionChanged {
            direction: "STOP".to_string(),
        });
        assert_eq!(bus.subscriber_count(), 0);
    }
}
