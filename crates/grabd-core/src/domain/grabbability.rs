//! Derives grab-eligibility verdicts from observed input.
//!
//! A device must not be seized while something on it is held down: the OS
//! would never see the matching release, leaving a key repeating or a
//! modifier or drag stuck.  [`GrabbabilityTracker`] keeps the set of
//! [`PressedKey`]s per device and emits a fresh [`GrabbableState`] whenever
//! the verdict for that device changes.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use super::device::{DeviceId, PressedKey};
use super::grabbable::{GrabbableState, GrabbableStatus, UngrabbableReason};
use crate::protocol::sequence::ReportSequence;

/// One observed input transition on a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservedInput {
    pub device_id: DeviceId,
    pub key: PressedKey,
    pub pressed: bool,
}

#[derive(Debug, Default)]
struct DeviceInputState {
    pressed: HashSet<PressedKey>,
    status: Option<GrabbableStatus>,
}

impl DeviceInputState {
    fn verdict(&self) -> GrabbableStatus {
        let mut reason: Option<UngrabbableReason> = None;
        for key in &self.pressed {
            let candidate = match key {
                PressedKey::Key(code) if !code.is_modifier() => UngrabbableReason::KeyRepeating,
                PressedKey::Key(_) => UngrabbableReason::ModifierKeyPressed,
                PressedKey::Button(_) => UngrabbableReason::PointingButtonPressed,
            };
            reason = Some(match reason {
                Some(current) if rank(current) <= rank(candidate) => current,
                _ => candidate,
            });
        }
        match reason {
            Some(reason) => GrabbableStatus::Ungrabbable(reason),
            None => GrabbableStatus::Grabbable,
        }
    }
}

/// Lower rank wins when several things are held at once.
fn rank(reason: UngrabbableReason) -> u8 {
    match reason {
        UngrabbableReason::KeyRepeating => 0,
        UngrabbableReason::ModifierKeyPressed => 1,
        UngrabbableReason::PointingButtonPressed => 2,
        UngrabbableReason::Permanent | UngrabbableReason::None => 3,
    }
}

/// Per-device pressed-key bookkeeping plus report numbering.
#[derive(Debug, Default)]
pub struct GrabbabilityTracker {
    devices: HashMap<DeviceId, DeviceInputState>,
    sequence: ReportSequence,
}

impl GrabbabilityTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts tracking a device with nothing pressed and returns its first
    /// report.
    pub fn device_attached(&mut self, device_id: DeviceId) -> GrabbableState {
        let state = self.devices.entry(device_id).or_default();
        state.pressed.clear();
        state.status = Some(GrabbableStatus::Grabbable);
        GrabbableState::new(device_id, GrabbableStatus::Grabbable, self.sequence.next())
    }

    /// Stops tracking a device.
    pub fn device_detached(&mut self, device_id: DeviceId) {
        self.devices.remove(&device_id);
    }

    /// Applies one input transition.  Returns a report only when the device's
    /// verdict changed.  Input from an untracked device starts tracking it.
    pub fn observe(&mut self, input: ObservedInput) -> Option<GrabbableState> {
        let state = self.devices.entry(input.device_id).or_default();
        if input.pressed {
            state.pressed.insert(input.key);
        } else {
            state.pressed.remove(&input.key);
        }

        let verdict = state.verdict();
        if state.status == Some(verdict) {
            return None;
        }
        state.status = Some(verdict);
        Some(GrabbableState::new(
            input.device_id,
            verdict,
            self.sequence.next(),
        ))
    }

    /// Fresh reports for every tracked device, each with a new sequence.
    ///
    /// Sent after (re)connecting to the grabber, whose ledger starts empty.
    pub fn snapshot(&self) -> Vec<GrabbableState> {
        let mut ids: Vec<DeviceId> = self.devices.keys().copied().collect();
        ids.sort();
        ids.into_iter()
            .filter_map(|id| {
                let state = self.devices.get(&id)?;
                Some(GrabbableState::new(id, state.verdict(), self.sequence.next()))
            })
            .collect()
    }

    pub fn status(&self, device_id: DeviceId) -> Option<GrabbableStatus> {
        self.devices.get(&device_id).and_then(|state| state.status)
    }
}
