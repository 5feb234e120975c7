//! Router event feed
//!
//! Push-style observability over a Tokio broadcast channel. Slow
//! subscribers lag and lose old events; the router never waits on them.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;

use crate::fingerprint::RoutingKey;
use crate::store::PromotionState;
use crate::tiers::{EscalationReason, Tier};

/// Channel capacity for broadcast
const CHANNEL_CAPACITY: usize = 256;

/// Shared reference to EventBus
pub type SharedEventBus = Arc<EventBus>;

/// Why an entry left the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvictionCause {
    Expired,
    Idle,
    MaxAge,
    Collision,
}

/// Events published by the router and its pattern store
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RouterEvent {
    DispatchCompleted {
        correlation_id: String,
        routing_key: RoutingKey,
        tier: Tier,
        confidence: f32,
        latency_ms: f64,
    },
    DispatchFailed {
        correlation_id: String,
        kind: String,
        message: String,
    },
    Escalated {
        correlation_id: String,
        from: Tier,
        to: Tier,
        reason: EscalationReason,
    },
    PatternStored {
        routing_key: RoutingKey,
        source_tier: Option<Tier>,
        state: PromotionState,
    },
    Promoted {
        routing_key: RoutingKey,
        hits_in_window: usize,
    },
    Invalidated {
        routing_key: RoutingKey,
    },
    Evicted {
        routing_key: RoutingKey,
        cause: EvictionCause,
    },
    CollisionDetected {
        routing_key: RoutingKey,
    },
}

impl RouterEvent {
    /// Stable label matching the serialized `event` tag.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::DispatchCompleted { .. } => "dispatch_completed",
            Self::DispatchFailed { .. } => "dispatch_failed",
            Self::Escalated { .. } => "escalated",
            Self::PatternStored { .. } => "pattern_stored",
            Self::Promoted { .. } => "promoted",
            Self::Invalidated { .. } => "invalidated",
            Self::Evicted { .. } => "evicted",
            Self::CollisionDetected { .. } => "collision_detected",
        }
    }
}

/// Broadcast bus for [`RouterEvent`]s
#[derive(Debug)]
pub struct EventBus {
    sender: broadcast::Sender<RouterEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(CHANNEL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Create a shared reference to this event bus
    pub fn shared(self) -> SharedEventBus {
        Arc::new(self)
    }

    /// Publish to all current subscribers. Returns how many received it.
    pub fn publish(&self, event: RouterEvent) -> usize {
        let event_type = event.event_type();
        match self.sender.send(event) {
            Ok(count) => {
                trace!(event_type, receivers = count, "event published");
                count
            }
            // No receivers is fine
            Err(_) => 0,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RouterEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
