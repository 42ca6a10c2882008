//! Syncsched - a score-driven synchronization scheduler
//!
//! Syncsched coalesces change notifications from per-collection score
//! trackers and decides, under threshold and authentication constraints,
//! when to initiate a synchronization cycle.

pub mod auth;
pub mod config;
pub mod error;
pub mod events;
pub mod registry;
pub mod scheduler;
pub mod tracker;

pub use error::{Result, SyncschedError};
