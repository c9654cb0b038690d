//! # Orchestration Event Stream
//!
//! Health changes, scaling actions and circuit transitions are published as
//! [`OrchestrationEvent`]s for an external logging or alerting collaborator.
//!
//! Events fan out over a `tokio::sync::broadcast` channel and the most recent
//! ones are retained in a bounded buffer for administrative queries. Publishing
//! never blocks and never fails: with no subscribers the event is only buffered
//! and logged.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};
use tracing::{info, warn};

/// Kind of orchestration event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    ServiceRegistered,
    ServiceDeregistered,
    InstanceHealthChanged,
    ProbeFailed,
    ScaledUp,
    ScaledDown,
    ScaleFailed,
    CircuitOpened,
    CircuitHalfOpened,
    CircuitClosed,
}

impl EventType {
    /// Whether the event signals degradation
    pub fn is_warning(&self) -> bool {
        matches!(
            self,
            EventType::ProbeFailed | EventType::ScaleFailed | EventType::CircuitOpened
        )
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EventType::ServiceRegistered => "service_registered",
            EventType::ServiceDeregistered => "service_deregistered",
            EventType::InstanceHealthChanged => "instance_health_changed",
            EventType::ProbeFailed => "probe_failed",
            EventType::ScaledUp => "scaled_up",
            EventType::ScaledDown => "scaled_down",
            EventType::ScaleFailed => "scale_failed",
            EventType::CircuitOpened => "circuit_opened",
            EventType::CircuitHalfOpened => "circuit_half_opened",
            EventType::CircuitClosed => "circuit_closed",
        };
        write!(f, "{}", name)
    }
}

/// One orchestration event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestrationEvent {
    pub service_name: String,
    pub instance_id: Option<String>,
    pub event_type: EventType,
    pub timestamp: DateTime<Utc>,
    pub details: String,
}

impl OrchestrationEvent {
    /// Create a service-level event stamped with the current time
    pub fn service(service_name: impl Into<String>, event_type: EventType, details: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            instance_id: None,
            event_type,
            timestamp: Utc::now(),
            details: details.into(),
        }
    }

    /// Create an instance-level event stamped with the current time
    pub fn instance(
        service_name: impl Into<String>,
        instance_id: impl Into<String>,
        event_type: EventType,
        details: impl Into<String>,
    ) -> Self {
        Self {
            instance_id: Some(instance_id.into()),
            ..Self::service(service_name, event_type, details)
        }
    }
}

/// Type alias for event receivers
pub type EventReceiver = broadcast::Receiver<OrchestrationEvent>;

/// Broadcast bus plus a bounded history of recent events
#[derive(Debug)]
pub struct EventBus {
    sender: broadcast::Sender<OrchestrationEvent>,
    recent: Mutex<VecDeque<OrchestrationEvent>>,
    capacity: usize,
}

impl EventBus {
    /// Create a bus retaining up to `capacity` events
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            recent: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Publish an event to subscribers, the history buffer and the log
    pub fn publish(&self, event: OrchestrationEvent) {
        if event.event_type.is_warning() {
            warn!(
                service = %event.service_name,
                instance_id = event.instance_id.as_deref().unwrap_or("-"),
                event_type = %event.event_type,
                details = %event.details,
                "Orchestration event"
            );
        } else {
            info!(
                service = %event.service_name,
                instance_id = event.instance_id.as_deref().unwrap_or("-"),
                event_type = %event.event_type,
                details = %event.details,
                "Orchestration event"
            );
        }

        {
            let mut recent = self.recent.lock();
            if recent.len() == self.capacity {
                recent.pop_front();
            }
            recent.push_back(event.clone());
        }

        // An error only means nobody is subscribed right now
        let _ = self.sender.send(event);
    }

    /// Subscribe to future events
    pub fn subscribe(&self) -> EventReceiver {
        self.sender.subscribe()
    }

    /// Future events as a stream; events missed by a lagging consumer are skipped
    pub fn stream(&self) -> impl Stream<Item = OrchestrationEvent> {
        BroadcastStream::new(self.sender.subscribe()).filter_map(|item| item.ok())
    }

    /// Up to `limit` most recent events, oldest first
    pub fn recent_events(&self, limit: usize) -> Vec<OrchestrationEvent> {
        let recent = self.recent.lock();
        let skip = recent.len().saturating_sub(limit);
        recent.iter().skip(skip).cloned().collect()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_reaches_subscriber() {
        let bus = EventBus::new(16);
        let mut receiver = bus.subscribe();

        bus.publish(OrchestrationEvent::instance(
            "pricing",
            "pricing-1",
            EventType::InstanceHealthChanged,
            "healthy -> unhealthy",
        ));

        let event = receiver.recv().await.unwrap();
        assert_eq!(event.service_name, "pricing");
        assert_eq!(event.instance_id.as_deref(), Some("pricing-1"));
        assert_eq!(event.event_type, EventType::InstanceHealthChanged);
    }

    #[test]
    fn test_publish_without_subscribers_is_buffered() {
        let bus = EventBus::new(3);
        for i in 0..5 {
            bus.publish(OrchestrationEvent::service("svc", EventType::ScaledUp, format!("event {}", i)));
        }

        let recent = bus.recent_events(10);
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].details, "event 2");
        assert_eq!(recent[2].details, "event 4");

        let last_two = bus.recent_events(2);
        assert_eq!(last_two[0].details, "event 3");
    }

    #[tokio::test]
    async fn test_event_stream() {
        let bus = EventBus::new(8);
        let mut stream = Box::pin(bus.stream());
        bus.publish(OrchestrationEvent::service("svc", EventType::CircuitOpened, "3 failures"));

        let event = stream.next().await.unwrap();
        assert_eq!(event.event_type, EventType::CircuitOpened);
    }
}
