//! Event bus for commitboard using tokio::broadcast
//!
//! Provides a publish-subscribe mechanism for dashboard updates.

use crate::stats::StatsMode;
use tokio::sync::broadcast;

/// Events emitted by the metrics layer
#[derive(Debug, Clone)]
pub enum DataEvent {
    /// Dashboard metrics were recomputed or re-read
    MetricsUpdated,
    /// Stats switched between summary and raw recomputation
    StatsModeChanged(StatsMode),
    /// A storage scan finished (or was served from cache)
    StorageScanned,
    /// The live alert list changed
    AlertsUpdated,
    /// The user's alert configuration changed
    AlertConfigChanged,
    /// A listener reported a non-benign error
    ListenerError(String),
    /// A user signed in and components were activated
    SessionStarted(String),
    /// The user signed out and components were torn down
    SessionEnded,
}

/// Event bus for broadcasting data events
///
/// Uses tokio::broadcast for multi-consumer support.
pub struct EventBus {
    sender: broadcast::Sender<DataEvent>,
}

impl EventBus {
    /// Create a new event bus with specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Create with default capacity (256 events)
    pub fn default_capacity() -> Self {
        Self::new(256)
    }

    /// Publish an event to all subscribers
    pub fn publish(&self, event: DataEvent) {
        // Ignore send errors (no subscribers)
        let _ = self.sender.send(event);
    }

    /// Subscribe to receive events
    pub fn subscribe(&self) -> broadcast::Receiver<DataEvent> {
        self.sender.subscribe()
    }

    /// Get current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::default_capacity()
    }
}

impl Clone for EventBus {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_event_bus_publish_subscribe() {
        let bus = EventBus::default_capacity();
        let mut rx = bus.subscribe();

        bus.publish(DataEvent::MetricsUpdated);
        bus.publish(DataEvent::SessionStarted("uid-1".to_string()));

        let event1 = rx.recv().await.unwrap();
        assert!(matches!(event1, DataEvent::MetricsUpdated));

        let event2 = rx.recv().await.unwrap();
        assert!(matches!(event2, DataEvent::SessionStarted(id) if id == "uid-1"));
    }

    #[tokio::test]
    async fn test_event_bus_multiple_subscribers() {
        let bus = EventBus::default_capacity();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        assert_eq!(bus.subscriber_count(), 2);

        bus.publish(DataEvent::StatsModeChanged(StatsMode::Fallback));

        let e1 = rx1.recv().await.unwrap();
        let e2 = rx2.recv().await.unwrap();

        assert!(matches!(e1, DataEvent::StatsModeChanged(StatsMode::Fallback)));
        assert!(matches!(e2, DataEvent::StatsModeChanged(StatsMode::Fallback)));
    }

    #[test]
    fn test_event_bus_no_subscribers_ok() {
        let bus = EventBus::default_capacity();
        bus.publish(DataEvent::SessionEnded);
    }
}
