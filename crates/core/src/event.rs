//! Domain event system — decoupled observation of the turn pipeline.
//!
//! Events are published when something interesting happens in the engine.
//! Subscribers (tests, future telemetry) can react without coupling.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

/// All domain events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DomainEvent {
    /// A new inbound message entered the pipeline.
    MessageReceived {
        channel: String,
        author_id: String,
        timestamp: DateTime<Utc>,
    },

    /// An auto-reply rule short-circuited the turn.
    AutoReplied {
        channel: String,
        rule_id: String,
        timestamp: DateTime<Utc>,
    },

    /// A prompt was assembled for the inference runtime.
    PromptAssembled {
        channel: String,
        prompt_tokens: usize,
        truncated: bool,
        search_used: bool,
        timestamp: DateTime<Utc>,
    },

    /// An exchange was recorded in the store.
    ExchangeRecorded {
        channel: String,
        request_message_id: String,
        response_message_id: String,
        timestamp: DateTime<Utc>,
    },

    /// A turn failed and a degraded reply was delivered.
    TurnDegraded {
        channel: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },
}

/// A broadcast-based event bus for domain events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub.
pub struct EventBus {
    sender: broadcast::Sender<Arc<DomainEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: DomainEvent) {
        // Ignore send errors (no subscribers = that's fine)
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DomainEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
