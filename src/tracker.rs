//! Per-collection score tracking.
//!
//! Each data collection owns a [`ScoreTracker`] that accumulates a numeric
//! urgency score. Severity of an individual change is policy, not tracker
//! logic: callers pick one of the increment constants below.

use std::sync::Mutex;

use crate::events::{EventBus, SyncEvent};
use crate::scheduler::SINGLE_DEVICE_THRESHOLD;

/// Score increment for a minor change (e.g. a visit count update).
pub const SCORE_INCREMENT_SMALL: u32 = 1;

/// Score increment for a substantial change (e.g. a record added or removed).
pub const SCORE_INCREMENT_MEDIUM: u32 = 10;

/// Score increment for a change that must sync promptly. One more than the
/// single-device threshold, so a single very-large change crosses either
/// threshold tier on its own.
pub const SCORE_INCREMENT_XLARGE: u32 = SINGLE_DEVICE_THRESHOLD + 1;

/// Accumulating urgency score for one data collection.
///
/// Increments serialize through a per-tracker lock, so concurrent producers
/// may bump the same tracker. Every change publishes `ScoreChanged` on the
/// bus after the mutation; a reset of an already-zero tracker publishes
/// nothing.
#[derive(Debug)]
pub struct ScoreTracker {
    id: String,
    score: Mutex<u32>,
    bus: EventBus,
}

impl ScoreTracker {
    /// Create a tracker with score 0.
    pub fn new(id: impl Into<String>, bus: EventBus) -> Self {
        Self {
            id: id.into(),
            score: Mutex::new(0),
            bus,
        }
    }

    /// Collection id this tracker reports for.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Current score.
    pub fn score(&self) -> u32 {
        *self.score.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Add `delta` to the score and publish the new value.
    ///
    /// Returns the score after the increment. The event is published while
    /// the lock is held so observed values are never reordered.
    pub fn bump(&self, delta: u32) -> u32 {
        let mut score = self.score.lock().unwrap_or_else(|e| e.into_inner());
        *score = score.saturating_add(delta);
        let new_score = *score;

        log::trace!("score for '{}' bumped by {} to {}", self.id, delta, new_score);
        self.bus.publish(SyncEvent::ScoreChanged {
            collection: self.id.clone(),
            score: new_score,
        });

        new_score
    }

    /// Reset the score to 0.
    ///
    /// Idempotent: resetting an already-zero tracker publishes no event, so
    /// post-sync cleanup cannot re-arm the scheduler with stale noise.
    pub fn reset(&self) {
        let mut score = self.score.lock().unwrap_or_else(|e| e.into_inner());
        if *score == 0 {
            return;
        }
        *score = 0;

        log::trace!("score for '{}' reset", self.id);
        self.bus.publish(SyncEvent::ScoreChanged {
            collection: self.id.clone(),
            score: 0,
        });
    }
}
