//! The Grabbable-State Ledger.
//!
//! Stores the latest grab-eligibility report per device and answers "is this
//! device currently safe to grab".  Reports travel over datagrams and may
//! arrive reordered or duplicated, so every update is gated on the report
//! sequence: a report whose sequence is not strictly greater than the stored
//! one is ignored.
//!
//! The ledger knows nothing about sessions.  Its owner calls [`clear`] at
//! every session boundary (the grabber's socket being bound afresh), after
//! which every device is unknown again.
//!
//! [`clear`]: GrabbableStateLedger::clear

use std::collections::HashMap;

use super::device::DeviceId;
use super::grabbable::{GrabbableState, GrabbableStatus};

/// Latest authoritative [`GrabbableState`] per device.
#[derive(Debug, Default)]
pub struct GrabbableStateLedger {
    states: HashMap<DeviceId, GrabbableState>,
}

impl GrabbableStateLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `state` unless a report with an equal or higher sequence is
    /// already stored for the same device.
    ///
    /// Returns `true` when the stored record changed.  Stale reports are an
    /// expected consequence of reordering and are ignored without logging.
    ///
    /// ```rust
    /// use grabd_core::{DeviceId, GrabbableState, GrabbableStateLedger, GrabbableStatus};
    ///
    /// let mut ledger = GrabbableStateLedger::new();
    /// let device = DeviceId(7);
    /// assert!(ledger.update(GrabbableState::new(device, GrabbableStatus::Grabbable, 2)));
    /// assert!(!ledger.update(GrabbableState::new(device, GrabbableStatus::Grabbable, 2)));
    /// ```
    pub fn update(&mut self, state: GrabbableState) -> bool {
        match self.states.get(&state.device_id) {
            Some(stored) if state.sequence <= stored.sequence => false,
            _ => {
                self.states.insert(state.device_id, state);
                true
            }
        }
    }

    /// Returns the authoritative record for `device_id`, or `None` if the
    /// device is unknown.
    pub fn get(&self, device_id: DeviceId) -> Option<GrabbableState> {
        self.states.get(&device_id).copied()
    }

    /// Whether `device_id` may be grabbed now.  Unknown devices may not.
    pub fn is_grabbable(&self, device_id: DeviceId) -> bool {
        self.get(device_id)
            .map(|state| state.status.is_grabbable())
            .unwrap_or(false)
    }

    /// Current verdict for `device_id`, `None` meaning unknown.
    pub fn status(&self, device_id: DeviceId) -> Option<GrabbableStatus> {
        self.get(device_id).map(|state| state.status)
    }

    /// Drops the record of a device that has been detached.
    pub fn remove(&mut self, device_id: DeviceId) -> Option<GrabbableState> {
        self.states.remove(&device_id)
    }

    /// Forgets everything.  Called at each session boundary.
    pub fn clear(&mut self) {
        self.states.clear();
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}
