//! Event bus for orchestrator lifecycle events
//!
//! Provides pub/sub messaging using Tokio broadcast channels. Publishing
//! never blocks the orchestrator; slow subscribers lag and lose the oldest
//! events instead.

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

use super::types::{EventId, SwarmEvent};

/// Channel capacity for broadcast
const CHANNEL_CAPACITY: usize = 256;

/// Error type for event bus operations
#[derive(Debug, thiserror::Error)]
pub enum EventBusError {
    #[error("Event bus capacity must be greater than zero")]
    ZeroCapacity,
}

/// Result type for event bus operations
pub type EventBusResult<T> = Result<T, EventBusError>;

/// Shared reference to EventBus
pub type SharedEventBus = Arc<EventBus>;

/// Event bus backed by a broadcast channel
pub struct EventBus {
    /// Broadcast sender for publishing events
    sender: broadcast::Sender<SwarmEvent>,
}

impl EventBus {
    /// Create a new event bus with the default capacity
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    /// Create an event bus buffering up to `capacity` events per subscriber
    pub fn with_capacity(capacity: usize) -> EventBusResult<Self> {
        if capacity == 0 {
            return Err(EventBusError::ZeroCapacity);
        }
        let (sender, _) = broadcast::channel(capacity);
        Ok(Self { sender })
    }

    /// Create a shared reference to this event bus
    pub fn shared(self) -> SharedEventBus {
        Arc::new(self)
    }

    /// Publish an event to all subscribers, returning its id
    pub fn publish(&self, event: SwarmEvent) -> EventId {
        let event_id = SwarmEvent::new_id();
        let event_type = event.event_type();

        // No receivers is fine
        match self.sender.send(event) {
            Ok(count) => debug!(event_type, %event_id, receivers = count, "Event published"),
            Err(_) => debug!(event_type, %event_id, "Event published (no receivers)"),
        }
        event_id
    }

    /// Subscribe to receive events
    pub fn subscribe(&self) -> broadcast::Receiver<SwarmEvent> {
        self.sender.subscribe()
    }

    /// Get the number of current subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Event filter for selective subscription
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    /// Filter by worker endpoint
    pub worker: Option<String>,
    /// Filter by event types
    pub event_types: Option<Vec<String>>,
}

impl EventFilter {
    /// Create a new empty filter (matches all events)
    pub fn new() -> Self {
        Self::default()
    }

    /// Filter by worker endpoint; events without a worker still pass
    pub fn worker(mut self, worker: &str) -> Self {
        self.worker = Some(worker.to_string());
        self
    }

    /// Filter by event types
    pub fn types(mut self, event_types: Vec<&str>) -> Self {
        self.event_types = Some(event_types.into_iter().map(String::from).collect());
        self
    }

    /// Check if an event matches this filter
    pub fn matches(&self, event: &SwarmEvent) -> bool {
        if let (Some(wanted), Some(worker)) = (&self.worker, event.worker()) {
            if wanted != worker {
                return false;
            }
        }

        if let Some(ref types) = self.event_types {
            if !types.iter().any(|t| t == event.event_type()) {
                return false;
            }
        }

        true
    }
}

/// Filtered event receiver that only yields matching events
pub struct FilteredReceiver {
    receiver: broadcast::Receiver<SwarmEvent>,
    filter: EventFilter,
}

impl FilteredReceiver {
    /// Create a new filtered receiver
    pub fn new(receiver: broadcast::Receiver<SwarmEvent>, filter: EventFilter) -> Self {
        Self { receiver, filter }
    }

    /// Receive the next matching event
    pub async fn recv(&mut self) -> Result<SwarmEvent, broadcast::error::RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.filter.matches(&event) {
                return Ok(event);
            }
        }
    }
}

/// Extension trait for subscribing with filters
pub trait EventBusExt {
    /// Subscribe with a filter
    fn subscribe_filtered(&self, filter: EventFilter) -> FilteredReceiver;
}

impl EventBusExt for EventBus {
    fn subscribe_filtered(&self, filter: EventFilter) -> FilteredReceiver {
        FilteredReceiver::new(self.subscribe(), filter)
    }
}

impl EventBusExt for SharedEventBus {
    fn subscribe_filtered(&self, filter: EventFilter) -> FilteredReceiver {
        FilteredReceiver::new(self.subscribe(), filter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn ready(worker: &str) -> SwarmEvent {
        SwarmEvent::WorkerReady {
            worker: worker.to_string(),
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_publish_subscribe() {
        let bus = EventBus::new();
        let mut receiver = bus.subscribe();

        let id = bus.publish(ready("h:1"));
        assert!(!id.is_empty());

        let received = receiver.recv().await.unwrap();
        assert_eq!(received.event_type(), "worker_ready");
    }

    #[tokio::test]
    async fn test_multiple_subscribers() {
        let bus = EventBus::new().shared();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        assert_eq!(bus.subscriber_count(), 2);

        bus.publish(SwarmEvent::CandidatesCleared {
            timestamp: Utc::now(),
        });

        let e1 = rx1.recv().await.unwrap();
        let e2 = rx2.recv().await.unwrap();

        assert_eq!(e1.event_type(), e2.event_type());
    }

    #[test]
    fn test_publish_without_subscribers() {
        let bus = EventBus::new();
        bus.publish(ready("h:1"));
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_zero_capacity_rejected() {
        assert!(matches!(
            EventBus::with_capacity(0),
            Err(EventBusError::ZeroCapacity)
        ));
        assert!(EventBus::with_capacity(4).is_ok());
    }

    #[test]
    fn test_event_filter() {
        let filter = EventFilter::new()
            .worker("h:1")
            .types(vec!["worker_ready", "candidates_cleared"]);

        assert!(filter.matches(&ready("h:1")));
        assert!(!filter.matches(&ready("h:2")));
        assert!(filter.matches(&SwarmEvent::CandidatesCleared {
            timestamp: Utc::now()
        }));
        assert!(!filter.matches(&SwarmEvent::CandidatesGathered {
            count: 1,
            timestamp: Utc::now()
        }));
    }

    #[tokio::test]
    async fn test_filtered_receiver() {
        let bus = EventBus::new().shared();
        let filter = EventFilter::new().worker("target:1");
        let mut filtered = bus.subscribe_filtered(filter);

        let publisher = bus.clone();
        tokio::spawn(async move {
            publisher.publish(ready("other:1"));
            publisher.publish(ready("target:1"));
        });

        let event = filtered.recv().await.unwrap();
        assert_eq!(event.worker(), Some("target:1"));
    }
}
