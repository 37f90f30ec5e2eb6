//! Internal event bus for station lifecycle notifications.
//!
//! Used by the Scenario Runner's `wait-for` step and by anything else that
//! needs to observe station/connector transitions without polling the
//! store. Distinct from the Logging Pipeline's per-message fan-out
//! (`logging::MessageLoggingPipeline`), which exists purely for observed
//! OCPP frames.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tracing::{debug, warn};

const DEFAULT_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
pub enum StationEvent {
    Connected {
        station_id: String,
        timestamp: DateTime<Utc>,
    },
    Disconnected {
        station_id: String,
        error: Option<String>,
        timestamp: DateTime<Utc>,
    },
    Registered {
        station_id: String,
        timestamp: DateTime<Utc>,
    },
    ConnectorStateChanged {
        station_id: String,
        connector_id: u32,
        state: String,
        timestamp: DateTime<Utc>,
    },
    TransactionStarted {
        station_id: String,
        connector_id: u32,
        transaction_id: String,
        timestamp: DateTime<Utc>,
    },
    TransactionEnded {
        station_id: String,
        connector_id: u32,
        transaction_id: String,
        timestamp: DateTime<Utc>,
    },
}

impl StationEvent {
    pub fn station_id(&self) -> &str {
        match self {
            Self::Connected { station_id, .. }
            | Self::Disconnected { station_id, .. }
            | Self::Registered { station_id, .. }
            | Self::ConnectorStateChanged { station_id, .. }
            | Self::TransactionStarted { station_id, .. }
            | Self::TransactionEnded { station_id, .. } => station_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connected { .. } => "connected",
            Self::Disconnected { .. } => "disconnected",
            Self::Registered { .. } => "registered",
            Self::ConnectorStateChanged { .. } => "connector_state_changed",
            Self::TransactionStarted { .. } => "transaction_started",
            Self::TransactionEnded { .. } => "transaction_ended",
        }
    }
}

#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<StationEvent>,
    subscriber_count: Arc<AtomicUsize>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            subscriber_count: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn publish(&self, event: StationEvent) {
        let kind = event.kind();
        let station_id = event.station_id().to_string();
        match self.sender.send(event) {
            Ok(count) => debug!(station_id, kind, subscribers = count, "event published"),
            Err(_) => debug!(station_id, kind, "event published, no subscribers"),
        }
    }

    pub fn subscribe(&self) -> EventSubscriber {
        self.subscriber_count.fetch_add(1, Ordering::SeqCst);
        EventSubscriber {
            receiver: self.sender.subscribe(),
            subscriber_count: self.subscriber_count.clone(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscriber_count.load(Ordering::SeqCst)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

pub struct EventSubscriber {
    receiver: broadcast::Receiver<StationEvent>,
    subscriber_count: Arc<AtomicUsize>,
}

impl EventSubscriber {
    pub async fn recv(&mut self) -> Option<StationEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("event subscriber lagged, {} events missed", n);
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

impl Drop for EventSubscriber {
    fn drop(&mut self) {
        self.subscriber_count.fetch_sub(1, Ordering::SeqCst);
    }
}

pub type SharedEventBus = Arc<EventBus>;

pub fn create_event_bus() -> SharedEventBus {
    Arc::new(EventBus::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_subscribe_roundtrip() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe();

        bus.publish(StationEvent::Connected {
            station_id: "CP-001".into(),
            timestamp: Utc::now(),
        });

        let event = tokio::time::timeout(std::time::Duration::from_millis(100), sub.recv())
            .await
            .expect("timeout")
            .expect("no event");
        assert_eq!(event.kind(), "connected");
        assert_eq!(event.station_id(), "CP-001");
    }

    #[test]
    fn subscriber_count_tracks_drops() {
        let bus = EventBus::new();
        assert_eq!(bus.subscriber_count(), 0);
        let a = bus.subscribe();
        let b = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);
        drop(a);
        assert_eq!(bus.subscriber_count(), 1);
        drop(b);
    }
}
