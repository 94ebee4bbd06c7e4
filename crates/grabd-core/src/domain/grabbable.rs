//! Per-device grab-eligibility verdicts.

use serde::{Deserialize, Serialize};

use super::device::DeviceId;

/// Why a device must not be grabbed right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum UngrabbableReason {
    /// Unknown or unspecified reason.
    None = 0,
    /// A non-modifier key is held; grabbing now would leave it auto-repeating.
    KeyRepeating = 1,
    /// A modifier is held; grabbing now would leave it stuck for the OS.
    ModifierKeyPressed = 2,
    /// A pointing button is held mid-drag.
    PointingButtonPressed = 3,
    /// The device must never be grabbed (e.g. excluded by policy).
    Permanent = 4,
}

impl TryFrom<u8> for UngrabbableReason {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, u8> {
        match value {
            0 => Ok(Self::None),
            1 => Ok(Self::KeyRepeating),
            2 => Ok(Self::ModifierKeyPressed),
            3 => Ok(Self::PointingButtonPressed),
            4 => Ok(Self::Permanent),
            other => Err(other),
        }
    }
}

/// The verdict part of a [`GrabbableState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrabbableStatus {
    Grabbable,
    Ungrabbable(UngrabbableReason),
}

impl GrabbableStatus {
    pub fn is_grabbable(self) -> bool {
        matches!(self, GrabbableStatus::Grabbable)
    }
}

/// One grab-eligibility report for one device.
///
/// For a given `device_id` only the report with the highest `sequence` seen so
/// far is authoritative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrabbableState {
    pub device_id: DeviceId,
    pub status: GrabbableStatus,
    pub sequence: u64,
}

impl GrabbableState {
    pub fn new(device_id: DeviceId, status: GrabbableStatus, sequence: u64) -> Self {
        Self {
            device_id,
            status,
            sequence,
        }
    }
}
