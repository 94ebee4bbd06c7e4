//! The Device-Grab Mode State Machine.
//!
//! Two modes, `Observing` and `Grabbing`, plus an orthogonal suspend flag.
//!
//! ```text
//!             enter_grabbing(ledger)
//!  Observing ───────────────────────▶ Grabbing
//!      ▲                                  │
//!      └──────── enter_observing() ───────┘
//!           (unconditional, no ledger)
//! ```
//!
//! Entering `Grabbing` seizes only those attached devices the ledger reports
//! as grabbable; ungrabbable and unknown devices stay free until a later
//! report for that device arrives ([`DeviceGrabController::reevaluate`]).
//!
//! Leaving `Grabbing` releases every seized device immediately.  That path
//! takes no ledger argument at all, so it cannot be held back by stale or
//! missing grab-eligibility data.

use std::collections::BTreeMap;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};

use super::device::{DeviceId, LedState};
use super::ledger::GrabbableStateLedger;

/// Errors raised by a [`DeviceSeizer`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SeizeError {
    /// The device disappeared before it could be seized.
    #[error("{0} is no longer attached")]
    DeviceGone(DeviceId),

    /// The platform refused exclusive access.
    #[error("failed to seize {device_id}: {reason}")]
    Refused { device_id: DeviceId, reason: String },
}

/// Exclusive-access control over physical devices.
///
/// Implemented by the HID layer in production and by
/// [`RecordingSeizer`](super::recording::RecordingSeizer) in tests.
pub trait DeviceSeizer: Send + Sync {
    /// Takes exclusive ownership of the device's raw input.
    fn seize(&self, device_id: DeviceId) -> Result<(), SeizeError>;

    /// Gives the device back to normal OS input routing.  Must not fail.
    fn release(&self, device_id: DeviceId);

    /// Writes the caps lock LED of a seized keyboard.
    fn set_caps_lock_led(&self, device_id: DeviceId, state: LedState);
}

/// Current grab mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrabMode {
    Observing,
    Grabbing,
}

/// Owns the grab mode and which attached devices are seized.
pub struct DeviceGrabController {
    seizer: Arc<dyn DeviceSeizer>,
    mode: GrabMode,
    suspended: bool,
    /// Attached devices mapped to whether they are currently seized.
    devices: BTreeMap<DeviceId, bool>,
    caps_lock_led: Option<LedState>,
}

impl DeviceGrabController {
    /// Creates a controller in `Observing` mode with no attached devices.
    pub fn new(seizer: Arc<dyn DeviceSeizer>) -> Self {
        Self {
            seizer,
            mode: GrabMode::Observing,
            suspended: false,
            devices: BTreeMap::new(),
            caps_lock_led: None,
        }
    }

    pub fn mode(&self) -> GrabMode {
        self.mode
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended
    }

    pub fn is_attached(&self, device_id: DeviceId) -> bool {
        self.devices.contains_key(&device_id)
    }

    pub fn is_grabbed(&self, device_id: DeviceId) -> bool {
        self.devices.get(&device_id).copied().unwrap_or(false)
    }

    /// Devices currently seized, in id order.
    pub fn grabbed_devices(&self) -> Vec<DeviceId> {
        self.devices
            .iter()
            .filter_map(|(id, grabbed)| grabbed.then_some(*id))
            .collect()
    }

    /// Switches to `Grabbing` and seizes every attached device the ledger
    /// reports as grabbable.  Does nothing beyond the mode change while
    /// suspended.
    pub fn enter_grabbing(&mut self, ledger: &GrabbableStateLedger) {
        if self.mode != GrabMode::Grabbing {
            info!(devices = self.devices.len(), "entering grabbing mode");
        }
        self.mode = GrabMode::Grabbing;
        self.reevaluate_all(ledger);
    }

    /// Switches to `Observing`, releasing every seized device.
    pub fn enter_observing(&mut self) {
        if self.mode != GrabMode::Observing {
            info!("entering observing mode");
        }
        self.mode = GrabMode::Observing;
        self.release_all();
    }

    /// Re-checks a single device after a grab-eligibility report.
    ///
    /// A grabbable device is seized if it is not already; a device that turned
    /// ungrabbable is released.  No other device is touched.
    pub fn reevaluate(&mut self, device_id: DeviceId, ledger: &GrabbableStateLedger) {
        let Some(grabbed) = self.devices.get(&device_id).copied() else {
            debug!(%device_id, "report for a device that is not attached");
            return;
        };
        if self.mode != GrabMode::Grabbing || self.suspended {
            return;
        }

        match (grabbed, ledger.is_grabbable(device_id)) {
            (false, true) => self.seize(device_id),
            (true, false) => {
                info!(%device_id, status = ?ledger.status(device_id), "releasing device that became ungrabbable");
                self.release(device_id);
            }
            _ => {}
        }
    }

    /// Registers a newly attached device and evaluates it.
    pub fn device_attached(&mut self, device_id: DeviceId, ledger: &GrabbableStateLedger) {
        self.devices.entry(device_id).or_insert(false);
        self.reevaluate(device_id, ledger);
    }

    /// Forgets a detached device, releasing it first if seized.
    pub fn device_detached(&mut self, device_id: DeviceId) {
        if self.devices.remove(&device_id) == Some(true) {
            self.seizer.release(device_id);
        }
    }

    /// Pauses grab attempts without changing the mode.
    pub fn suspend(&mut self) {
        if !self.suspended {
            info!("grabbing suspended");
        }
        self.suspended = true;
    }

    /// Lifts the suspension and re-evaluates as if entering the current mode.
    pub fn resume(&mut self, ledger: &GrabbableStateLedger) {
        if self.suspended {
            info!("grabbing resumed");
        }
        self.suspended = false;
        if self.mode == GrabMode::Grabbing {
            self.reevaluate_all(ledger);
        }
    }

    /// Applies the caps lock LED state to every seized device and remembers it
    /// for devices seized later.
    pub fn set_caps_lock_led(&mut self, state: LedState) {
        self.caps_lock_led = Some(state);
        for device_id in self.grabbed_devices() {
            self.seizer.set_caps_lock_led(device_id, state);
        }
    }

    fn reevaluate_all(&mut self, ledger: &GrabbableStateLedger) {
        let ids: Vec<DeviceId> = self.devices.keys().copied().collect();
        for device_id in ids {
            self.reevaluate(device_id, ledger);
        }
    }

    fn seize(&mut self, device_id: DeviceId) {
        match self.seizer.seize(device_id) {
            Ok(()) => {
                info!(%device_id, "device grabbed");
                self.devices.insert(device_id, true);
                if let Some(led) = self.caps_lock_led {
                    self.seizer.set_caps_lock_led(device_id, led);
                }
            }
            Err(e) => warn!(%device_id, error = %e, "grab failed; waiting for next report"),
        }
    }

    fn release(&mut self, device_id: DeviceId) {
        self.seizer.release(device_id);
        self.devices.insert(device_id, false);
    }

    fn release_all(&mut self) {
        for (device_id, grabbed) in self.devices.iter_mut() {
            if *grabbed {
                self.seizer.release(*device_id);
                *grabbed = false;
                info!(%device_id, "device released");
            }
        }
    }
}
