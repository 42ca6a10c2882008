//! Collection registry - trackers and their enabled state.
//!
//! Maps collection ids to score trackers. The `"clients"` tracker (device
//! list changes) exists outside the normal registration flow: it is created
//! with the registry, always counts toward the aggregate, and cannot be
//! registered, disabled, or unregistered through the normal paths.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use crate::error::{Result, SyncschedError};
use crate::events::EventBus;
use crate::tracker::ScoreTracker;

/// Id of the fixed device-list tracker.
pub const CLIENTS_COLLECTION: &str = "clients";

#[derive(Debug)]
struct Entry {
    tracker: Arc<ScoreTracker>,
    enabled: bool,
}

/// Registry of score trackers keyed by collection id.
#[derive(Debug)]
pub struct CollectionRegistry {
    bus: EventBus,
    clients: Arc<ScoreTracker>,
    entries: Mutex<BTreeMap<String, Entry>>,
}

impl CollectionRegistry {
    /// Create a registry containing only the `"clients"` tracker.
    pub fn new(bus: EventBus) -> Self {
        let clients = Arc::new(ScoreTracker::new(CLIENTS_COLLECTION, bus.clone()));
        Self {
            bus,
            clients,
            entries: Mutex::new(BTreeMap::new()),
        }
    }

    /// Register a new collection and return its tracker.
    ///
    /// New collections start enabled. Fails with `DuplicateCollection` if
    /// the id is already present or is the reserved `"clients"` id.
    pub fn register(&self, id: &str) -> Result<Arc<ScoreTracker>> {
        if id == CLIENTS_COLLECTION {
            return Err(SyncschedError::DuplicateCollection(id.to_string()));
        }

        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if entries.contains_key(id) {
            return Err(SyncschedError::DuplicateCollection(id.to_string()));
        }

        let tracker = Arc::new(ScoreTracker::new(id, self.bus.clone()));
        entries.insert(
            id.to_string(),
            Entry {
                tracker: tracker.clone(),
                enabled: true,
            },
        );

        log::debug!("registered collection '{id}'");
        Ok(tracker)
    }

    /// Look up a tracker by collection id.
    pub fn get(&self, id: &str) -> Result<Arc<ScoreTracker>> {
        if id == CLIENTS_COLLECTION {
            return Ok(self.clients.clone());
        }

        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries
            .get(id)
            .map(|entry| entry.tracker.clone())
            .ok_or_else(|| SyncschedError::CollectionNotFound(id.to_string()))
    }

    /// Toggle whether a collection's score counts toward the aggregate.
    ///
    /// Disabled trackers keep accumulating score internally. The `"clients"`
    /// tracker is always enabled; attempts to toggle it are ignored.
    pub fn set_enabled(&self, id: &str, enabled: bool) -> Result<()> {
        if id == CLIENTS_COLLECTION {
            log::warn!("'{CLIENTS_COLLECTION}' is always enabled; ignoring");
            return Ok(());
        }

        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let entry = entries
            .get_mut(id)
            .ok_or_else(|| SyncschedError::CollectionNotFound(id.to_string()))?;
        entry.enabled = enabled;
        Ok(())
    }

    /// Whether a collection currently counts toward the aggregate.
    pub fn is_enabled(&self, id: &str) -> Result<bool> {
        if id == CLIENTS_COLLECTION {
            return Ok(true);
        }

        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries
            .get(id)
            .map(|entry| entry.enabled)
            .ok_or_else(|| SyncschedError::CollectionNotFound(id.to_string()))
    }

    /// Remove a collection and return its tracker.
    ///
    /// The `"clients"` tracker is outside the normal registration flow and
    /// reports `CollectionNotFound` here.
    pub fn unregister(&self, id: &str) -> Result<Arc<ScoreTracker>> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries
            .remove(id)
            .map(|entry| entry.tracker)
            .ok_or_else(|| SyncschedError::CollectionNotFound(id.to_string()))
    }

    /// The fixed device-list tracker.
    pub fn clients(&self) -> Arc<ScoreTracker> {
        self.clients.clone()
    }

    /// Registered collection ids, in order.
    pub fn collection_ids(&self) -> Vec<String> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.keys().cloned().collect()
    }

    /// Sum of the clients score and every enabled collection's score.
    pub fn aggregate_score(&self) -> u32 {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let collections: u32 = entries
            .values()
            .filter(|entry| entry.enabled)
            .map(|entry| entry.tracker.score())
            .sum();
        collections.saturating_add(self.clients.score())
    }

    /// Reset every tracker (enabled or not) to 0, including clients.
    pub fn reset_all(&self) {
        self.clients.reset();
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        for entry in entries.values() {
            entry.tracker.reset();
        }
    }
}
