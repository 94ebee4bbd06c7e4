//! Recording [`DeviceSeizer`] for tests.
//!
//! Performs no device I/O.  Every call is appended to a `Mutex<Vec<..>>` so
//! tests can assert on exactly which devices were seized, released or had
//! their LED written, and in what order.
//!
//! ```rust
//! use std::sync::Arc;
//! use grabd_core::domain::recording::RecordingSeizer;
//! use grabd_core::{DeviceGrabController, DeviceSeizer};
//!
//! let seizer = Arc::new(RecordingSeizer::new());
//! let grab = DeviceGrabController::new(Arc::clone(&seizer) as Arc<dyn DeviceSeizer>);
//! assert!(seizer.seized().is_empty());
//! # drop(grab);
//! ```

use std::sync::Mutex;

use super::device::{DeviceId, LedState};
use super::grab_mode::{DeviceSeizer, SeizeError};

#[derive(Default)]
pub struct RecordingSeizer {
    seized: Mutex<Vec<DeviceId>>,
    released: Mutex<Vec<DeviceId>>,
    leds: Mutex<Vec<(DeviceId, LedState)>>,
    /// When `true`, every `seize` returns [`SeizeError::Refused`].
    pub should_fail: bool,
}

impl RecordingSeizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// A seizer whose `seize` always fails.
    pub fn failing() -> Self {
        Self {
            should_fail: true,
            ..Self::default()
        }
    }

    pub fn seized(&self) -> Vec<DeviceId> {
        self.seized.lock().map(|v| v.clone()).unwrap_or_default()
    }

    pub fn released(&self) -> Vec<DeviceId> {
        self.released.lock().map(|v| v.clone()).unwrap_or_default()
    }

    pub fn leds(&self) -> Vec<(DeviceId, LedState)> {
        self.leds.lock().map(|v| v.clone()).unwrap_or_default()
    }
}

impl DeviceSeizer for RecordingSeizer {
    fn seize(&self, device_id: DeviceId) -> Result<(), SeizeError> {
        if self.should_fail {
            return Err(SeizeError::Refused {
                device_id,
                reason: "simulated failure".to_string(),
            });
        }
        if let Ok(mut seized) = self.seized.lock() {
            seized.push(device_id);
        }
        Ok(())
    }

    fn release(&self, device_id: DeviceId) {
        if let Ok(mut released) = self.released.lock() {
            released.push(device_id);
        }
    }

    fn set_caps_lock_led(&self, device_id: DeviceId, state: LedState) {
        if let Ok(mut leds) = self.leds.lock() {
            leds.push((device_id, state));
        }
    }
}
