// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Event Bus Implementation - Pub/Sub for Coordination Events
//
// In-process event streaming using tokio broadcast channels. The webhook
// dispatcher and log tailing subscribe here; coordination services publish.
// Events are not persisted.

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::domain::events::CoordinationEvent;

/// Event bus for publishing and subscribing to coordination events
#[derive(Clone)]
pub struct EventBus {
    sender: Arc<broadcast::Sender<CoordinationEvent>>,
}

impl EventBus {
    /// Capacity determines how many events a slow receiver may fall behind
    /// before it starts losing the oldest ones
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn with_default_capacity() -> Self {
        Self::new(1000)
    }

    /// Never blocks and never fails the caller
    pub fn publish(&self, event: CoordinationEvent) {
        debug!(event = event.kind(), "Publishing event");

        if self.sender.send(event).is_err() {
            debug!("No subscribers listening to event");
        }
    }

    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver {
            receiver: self.sender.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

/// Receiver for all coordination events
pub struct EventReceiver {
    receiver: broadcast::Receiver<CoordinationEvent>,
}

impl EventReceiver {
    pub async fn recv(&mut self) -> Result<CoordinationEvent, EventBusError> {
        self.receiver.recv().await.map_err(|e| match e {
            broadcast::error::RecvError::Closed => EventBusError::Closed,
            broadcast::error::RecvError::Lagged(n) => {
                warn!("Event receiver lagged by {} events", n);
                EventBusError::Lagged(n)
            }
        })
    }

    pub fn try_recv(&mut self) -> Result<CoordinationEvent, EventBusError> {
        self.receiver.try_recv().map_err(|e| match e {
            broadcast::error::TryRecvError::Empty => EventBusError::Empty,
            broadcast::error::TryRecvError::Closed => EventBusError::Closed,
            broadcast::error::TryRecvError::Lagged(n) => {
                warn!("Event receiver lagged by {} events", n);
                EventBusError::Lagged(n)
            }
        })
    }
}

/// Errors that can occur when receiving events
#[derive(Debug, thiserror::Error)]
pub enum EventBusError {
    #[error("Event bus is closed")]
    Closed,

    #[error("No events available")]
    Empty,

    #[error("Receiver lagged by {0} events (events were dropped)")]
    Lagged(u64),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::agent::AgentId;

    #[tokio::test]
    async fn test_event_bus_publish_subscribe() {
        let event_bus = EventBus::new(10);
        let mut receiver = event_bus.subscribe();

        let agent_id = AgentId::parse("agent-1").unwrap();
        event_bus.publish(CoordinationEvent::AgentRegistered {
            agent_id: agent_id.clone(),
            at: 1,
        });

        match receiver.recv().await.unwrap() {
            CoordinationEvent::AgentRegistered { agent_id: id, .. } => assert_eq!(id, agent_id),
            other => panic!("Wrong event type received: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_silent() {
        let event_bus = EventBus::new(4);
        assert_eq!(event_bus.subscriber_count(), 0);
        event_bus.publish(CoordinationEvent::SalvageDismissed {
            agent_id: AgentId::parse("gone").unwrap(),
            at: 5,
        });
    }

    #[tokio::test]
    async fn test_lagging_receiver_reports_lag() {
        let event_bus = EventBus::new(2);
        let mut receiver = event_bus.subscribe();

        for at in 0..5 {
            event_bus.publish(CoordinationEvent::AgentUnregistered {
                agent_id: AgentId::parse("a").unwrap(),
                at,
            });
        }

        assert!(matches!(receiver.try_recv(), Err(EventBusError::Lagged(3))));
        assert!(receiver.try_recv().is_ok());
    }
}
