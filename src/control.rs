//! State machine for interactive controls (bookmark toggles, submissions)
//! and the registry of controls with a request in flight.

use std::collections::HashSet;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlState {
    Idle,
    Pending,
    Applied,
    Reverted,
}

/// One control's value. The committed value only changes on
/// [`ToggleControl::confirm`], i.e. after the store accepted the write.
#[derive(Debug, Clone)]
pub struct ToggleControl<T> {
    state: ControlState,
    committed: T,
    requested: Option<T>,
    error: Option<String>,
}

impl<T: Clone> ToggleControl<T> {
    pub fn new(current: T) -> Self {
        Self {
            state: ControlState::Idle,
            committed: current,
            requested: None,
            error: None,
        }
    }

    /// Moves to `Pending`. Returns false if a change is already pending.
    pub fn begin(&mut self, target: T) -> bool {
        if self.state == ControlState::Pending {
            return false;
        }
        self.state = ControlState::Pending;
        self.requested = Some(target);
        self.error = None;
        true
    }

    pub fn confirm(&mut self) {
        if let Some(value) = self.requested.take() {
            self.committed = value;
            self.state = ControlState::Applied;
        }
    }

    pub fn revert(&mut self, message: impl Into<String>) {
        self.requested = None;
        self.state = ControlState::Reverted;
        self.error = Some(message.into());
    }

    pub fn state(&self) -> ControlState {
        self.state
    }

    pub fn value(&self) -> &T {
        &self.committed
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }
}

/// Keys of controls whose request has not finished yet. A key is held by
/// an [`InFlightGuard`] and released when the guard drops.
#[derive(Debug, Default)]
pub struct InFlightControls {
    keys: Mutex<HashSet<String>>,
}

impl InFlightControls {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_acquire(&self, key: impl Into<String>) -> Option<InFlightGuard<'_>> {
        let key = key.into();
        let mut keys = self.keys.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        if !keys.insert(key.clone()) {
            warn!(key = %key, "Control already in flight");
            return None;
        }

        debug!(key = %key, "Control acquired");
        Some(InFlightGuard {
            registry: self,
            key,
        })
    }

    #[cfg(test)]
    pub fn is_in_flight(&self, key: &str) -> bool {
        self.keys
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains(key)
    }
}

pub struct InFlightGuard<'a> {
    registry: &'a InFlightControls,
    key: String,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        let mut keys = self
            .registry
            .keys
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        keys.remove(&self.key);
    }
}

pub fn control_key(user_id: &str, scope: &str, resource_id: &str) -> String {
    format!("{user_id}:{scope}:{resource_id}")
}
