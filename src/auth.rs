//! Authentication gate consulted by the scheduler.
//!
//! The gate only reflects login state; the actual login flow is an external
//! collaborator. The scheduler treats every status other than `Succeeded`
//! uniformly as "do not sync".

use std::sync::RwLock;

use crate::events::{EventBus, SyncEvent};

/// Current login status as reported by the authentication flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginStatus {
    /// No login attempted, or the user signed out.
    LoggedOut,
    /// Login succeeded; syncing is permitted.
    Succeeded,
    /// Credentials were rejected by the server.
    FailedRejected,
    /// Login could not complete due to a network error.
    FailedNetwork,
}

impl LoginStatus {
    /// Whether this status permits syncing.
    pub fn is_succeeded(&self) -> bool {
        matches!(self, LoginStatus::Succeeded)
    }
}

/// Readable login state, updated by the external authentication flow.
///
/// Status changes are published on the event bus so the scheduler can react
/// (retry accumulated score on success, start over on sign-out).
#[derive(Debug)]
pub struct AuthGate {
    status: RwLock<LoginStatus>,
    bus: EventBus,
}

impl AuthGate {
    /// Create a gate in the logged-out state.
    pub fn new(bus: EventBus) -> Self {
        Self {
            status: RwLock::new(LoginStatus::LoggedOut),
            bus,
        }
    }

    /// Current login status.
    pub fn status(&self) -> LoginStatus {
        *self.status.read().unwrap_or_else(|e| e.into_inner())
    }

    /// Record a status change reported by the authentication flow.
    ///
    /// Publishes `AuthStatusChanged` only when the value actually changes.
    pub fn set_status(&self, status: LoginStatus) {
        let changed = {
            let mut current = self.status.write().unwrap_or_else(|e| e.into_inner());
            let changed = *current != status;
            *current = status;
            changed
        };

        if changed {
            log::debug!("login status changed to {status:?}");
            self.bus.publish(SyncEvent::AuthStatusChanged(status));
        }
    }
}
