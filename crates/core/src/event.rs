//! Lifecycle event system: decoupled observation of the runtime.
//!
//! Events are published when an agent is registered, destroyed or
//! unregistered, and when one of its actions is rejected or cannot be
//! scheduled. Watches observe *values*; these events observe the machinery.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::action::SendKind;
use crate::id::AgentId;

/// All lifecycle events in the runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// An agent's drain callback was added to the registry
    Registered {
        agent_id: AgentId,
        timestamp: DateTime<Utc>,
    },

    /// An agent stopped accepting actions
    Destroyed {
        agent_id: AgentId,
        pending: usize,
        timestamp: DateTime<Utc>,
    },

    /// A destroyed agent finished draining and left the registry
    Unregistered {
        agent_id: AgentId,
        timestamp: DateTime<Utc>,
    },

    /// The validator refused the state an action produced
    ActionRejected {
        agent_id: AgentId,
        kind: SendKind,
        timestamp: DateTime<Utc>,
    },

    /// A drain could not be handed to any lane
    ScheduleFailed {
        agent_id: AgentId,
        reason: String,
        timestamp: DateTime<Utc>,
    },
}

impl AgentEvent {
    /// The agent this event concerns.
    pub fn agent_id(&self) -> AgentId {
        match self {
            AgentEvent::Registered { agent_id, .. }
            | AgentEvent::Destroyed { agent_id, .. }
            | AgentEvent::Unregistered { agent_id, .. }
            | AgentEvent::ActionRejected { agent_id, .. }
            | AgentEvent::ScheduleFailed { agent_id, .. } => *agent_id,
        }
    }
}

/// A broadcast-based event bus for lifecycle events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub. Publishing is
/// synchronous and never blocks, so lane threads publish directly.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Arc<AgentEvent>>,
    enabled: bool,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            enabled: true,
        }
    }

    /// A bus that drops every event. Subscribers never receive anything.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::new(1)
        }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: AgentEvent) {
        if !self.enabled {
            return;
        }
        // Ignore send errors (no subscribers = that's fine)
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<AgentEvent>> {
        self.sender.subscribe()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("enabled", &self.enabled)
            .field("subscribers", &self.sender.receiver_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn event_bus_publish_subscribe() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        let id = AgentId::new();

        bus.publish(AgentEvent::ActionRejected {
            agent_id: id,
            kind: SendKind::Solo,
            timestamp: Utc::now(),
        });

        let event = rx.recv().await.unwrap();
        match event.as_ref() {
            AgentEvent::ActionRejected { agent_id, kind, .. } => {
                assert_eq!(*agent_id, id);
                assert_eq!(*kind, SendKind::Solo);
            }
            _ => panic!("Expected ActionRejected event"),
        }
    }

    #[test]
    fn event_bus_no_subscribers_doesnt_panic() {
        let bus = EventBus::new(16);
        bus.publish(AgentEvent::Registered {
            agent_id: AgentId::new(),
            timestamp: Utc::now(),
        });
    }

    #[test]
    fn disabled_bus_delivers_nothing() {
        let bus = EventBus::disabled();
        let mut rx = bus.subscribe();
        bus.publish(AgentEvent::Unregistered {
            agent_id: AgentId::new(),
            timestamp: Utc::now(),
        });
        assert!(rx.try_recv().is_err());
        assert!(!bus.is_enabled());
    }

    #[test]
    fn event_serializes_with_type_tag() {
        let id = AgentId::new();
        let event = AgentEvent::Destroyed {
            agent_id: id,
            pending: 2,
            timestamp: Utc::now(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"destroyed\""));
        assert!(json.contains(&id.to_string()));
        assert_eq!(event.agent_id(), id);
    }
}
