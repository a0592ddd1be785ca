//! Domain events: observable milestones of a turn.
//!
//! Agents publish events as they work; anything interested (a UI progress
//! indicator, a log sink, a test) subscribes without being wired into the
//! reasoning loop itself.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::error::ToolErrorKind;

/// All domain events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DomainEvent {
    /// The completion service answered one loop iteration.
    CompletionReceived {
        agent: String,
        iteration: u32,
        tool_calls: usize,
        tokens_used: Option<u32>,
        timestamp: DateTime<Utc>,
    },

    /// A capability was invoked (successfully or not).
    ToolExecuted {
        agent: String,
        tool_name: String,
        success: bool,
        error_kind: Option<ToolErrorKind>,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// An agent's loop hit its iteration bound.
    IterationLimitReached {
        agent: String,
        iterations: u32,
        timestamp: DateTime<Utc>,
    },

    /// A coordinator turn finished and was persisted.
    TurnCompleted {
        session_id: String,
        iterations: usize,
        tool_calls: usize,
        timestamp: DateTime<Utc>,
    },

    /// A turn was aborted.
    TurnFailed {
        session_id: String,
        error_message: String,
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
        // No subscribers is fine.
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
