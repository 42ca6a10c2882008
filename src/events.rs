//! Typed event bus for scheduler coordination.
//!
//! Replaces string-topic observer registration with a closed event enum
//! broadcast over a tokio channel. Publishing never blocks and never fails;
//! an event with no subscribers is simply dropped.

use tokio::sync::broadcast;

use crate::auth::LoginStatus;

/// Default capacity of the broadcast channel.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Events flowing between trackers, the auth gate, the scheduler,
/// and the sync runner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// A tracker's score changed (increment or non-zero reset).
    ScoreChanged { collection: String, score: u32 },
    /// Login status changed.
    AuthStatusChanged(LoginStatus),
    /// Scheduler decided to start a sync attempt.
    SyncAttemptStarted,
    /// Scheduler observed the end of a sync attempt it started.
    SyncAttemptFinished,
    /// The runner completed a sync cycle.
    SyncFinished,
    /// The runner reported a cycle that failed after starting.
    SyncStartFailed { reason: String },
}

/// Broadcast bus shared by all components.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SyncEvent>,
}

impl EventBus {
    /// Create a new bus with the default capacity.
    pub fn new() -> Self {
        Self::with_capacity(EVENT_CHANNEL_CAPACITY)
    }

    /// Create a new bus with a custom capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: SyncEvent) {
        // Ignore send errors (no subscribers is fine)
        let _ = self.tx.send(event);
    }

    /// Get a receiver for events.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.tx.subscribe()
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
