//! Device identity and the input primitives the grab logic reasons about.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque identifier of an attached input device.
///
/// Unique for the lifetime of the device's connection to the host and never
/// reused while the device remains attached.  The same value is used by the
/// observer, the grabber and on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(pub u64);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "device#{}", self.0)
    }
}

/// A keyboard key, identified by its USB HID usage ID (page 0x07).
///
/// Only the modifier range is interpreted here; every other usage is carried
/// through untouched to the remapping engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeyCode(pub u32);

impl KeyCode {
    pub const A: KeyCode = KeyCode(0x04);
    pub const CAPS_LOCK: KeyCode = KeyCode(0x39);
    pub const ESCAPE: KeyCode = KeyCode(0x29);
    pub const LEFT_CONTROL: KeyCode = KeyCode(0xE0);
    pub const LEFT_SHIFT: KeyCode = KeyCode(0xE1);
    pub const RIGHT_GUI: KeyCode = KeyCode(0xE7);

    /// Returns `true` for the eight HID modifier usages (0xE0 to 0xE7).
    ///
    /// ```rust
    /// use grabd_core::KeyCode;
    ///
    /// assert!(KeyCode::LEFT_SHIFT.is_modifier());
    /// assert!(!KeyCode::A.is_modifier());
    /// ```
    pub fn is_modifier(self) -> bool {
        (Self::LEFT_CONTROL.0..=Self::RIGHT_GUI.0).contains(&self.0)
    }
}

/// A pointing-device button, numbered from 1 (primary).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PointingButton(pub u32);

/// Something currently held down on a device.
///
/// Keys and buttons live in separate namespaces, so a key and a button with
/// the same numeric value are distinct entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PressedKey {
    Key(KeyCode),
    Button(PointingButton),
}

/// Caps lock LED state written to grabbed keyboards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum LedState {
    Off = 0,
    On = 1,
}

impl From<bool> for LedState {
    fn from(on: bool) -> Self {
        if on {
            LedState::On
        } else {
            LedState::Off
        }
    }
}

impl TryFrom<u8> for LedState {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, u8> {
        match value {
            0 => Ok(LedState::Off),
            1 => Ok(LedState::On),
            other => Err(other),
        }
    }
}
