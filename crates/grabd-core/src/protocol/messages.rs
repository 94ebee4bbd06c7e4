//! All grabd IPC message types.
//!
//! Byte 0 of every datagram is an [`OperationType`].  Two families share that
//! tag space:
//!
//! - **Fixed records**: packed, native-endian, exact length.  The sender and
//!   receiver are on the same host and built from the same tree, so there is
//!   no version field.
//! - **Structured payloads**: self-describing JSON objects carrying an
//!   `"operation_type"` key.  Receivers skip operations they do not know.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::domain::device::{KeyCode, LedState};
use crate::domain::grabbable::GrabbableState;

// ── Operation codes ───────────────────────────────────────────────────────────

/// Operation code carried in byte 0 of a fixed record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OperationType {
    None = 0,
    Connect = 1,
    GrabbableStateChanged = 2,
    CapsLockStateChanged = 3,
    ConnectConsoleUserServer = 4,
    SystemPreferencesUpdated = 5,
    SetCapsLockLedState = 6,
    ClearSimpleModifications = 7,
    AddSimpleModification = 8,
    FrontmostApplicationChanged = 9,
    InputSourceChanged = 10,
    ShellCommandExecution = 11,
    SelectInputSource = 12,
    SetNotificationMessage = 13,
}

impl TryFrom<u8> for OperationType {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, u8> {
        Ok(match value {
            0 => Self::None,
            1 => Self::Connect,
            2 => Self::GrabbableStateChanged,
            3 => Self::CapsLockStateChanged,
            4 => Self::ConnectConsoleUserServer,
            5 => Self::SystemPreferencesUpdated,
            6 => Self::SetCapsLockLedState,
            7 => Self::ClearSimpleModifications,
            8 => Self::AddSimpleModification,
            9 => Self::FrontmostApplicationChanged,
            10 => Self::InputSourceChanged,
            11 => Self::ShellCommandExecution,
            12 => Self::SelectInputSource,
            13 => Self::SetNotificationMessage,
            other => return Err(other),
        })
    }
}

impl OperationType {
    /// Whether this operation travels as a structured payload.
    pub fn is_structured(self) -> bool {
        matches!(
            self,
            Self::FrontmostApplicationChanged
                | Self::InputSourceChanged
                | Self::ShellCommandExecution
                | Self::SelectInputSource
                | Self::SetNotificationMessage
        )
    }
}

// ── Fixed-record payloads ─────────────────────────────────────────────────────

/// Which peer role sent a `connect`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum ConnectFrom {
    /// The per-user session process.
    ConsoleUserServer = 1,
    /// The unprivileged device-observation process.
    Observer = 2,
}

impl TryFrom<u8> for ConnectFrom {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, u8> {
        match value {
            1 => Ok(Self::ConsoleUserServer),
            2 => Ok(Self::Observer),
            other => Err(other),
        }
    }
}

/// `connect`: a peer announcing itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectMessage {
    pub pid: i32,
    pub connect_from: ConnectFrom,
}

/// `connect_console_user_server`: the per-user process announcing itself and
/// the configuration it wants applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectConsoleUserServerMessage {
    pub pid: i32,
    pub configuration_path: PathBuf,
}

/// Host keyboard and pointing preferences relevant to remapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemPreferences {
    pub use_fkeys_as_standard_function_keys: bool,
    pub scroll_direction_is_natural: bool,
    pub keyboard_type: u32,
    pub initial_key_repeat_milliseconds: u32,
    pub key_repeat_milliseconds: u32,
}

impl Default for SystemPreferences {
    fn default() -> Self {
        Self {
            use_fkeys_as_standard_function_keys: false,
            scroll_direction_is_natural: true,
            keyboard_type: 0,
            initial_key_repeat_milliseconds: 500,
            key_repeat_milliseconds: 83,
        }
    }
}

/// `add_simple_modification`: a one-to-one key substitution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimpleModification {
    pub from_key: KeyCode,
    pub to_key: KeyCode,
}

// ── Structured payloads ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrontmostApplication {
    #[serde(default)]
    pub bundle_identifier: String,
    #[serde(default)]
    pub file_path: String,
}

/// Properties of the active keyboard input source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputSourceProperties {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_source_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_mode_id: Option<String>,
}

/// Pattern used to pick an input source; unset fields match anything.
pub type InputSourceSpecifier = InputSourceProperties;

// ── Top-level message ─────────────────────────────────────────────────────────

/// Every message exchanged between grabd processes.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Connect(ConnectMessage),
    GrabbableStateChanged(GrabbableState),
    CapsLockStateChanged(bool),
    ConnectConsoleUserServer(ConnectConsoleUserServerMessage),
    SystemPreferencesUpdated(SystemPreferences),
    SetCapsLockLedState(LedState),
    ClearSimpleModifications,
    AddSimpleModification(SimpleModification),
    FrontmostApplicationChanged(FrontmostApplication),
    InputSourceChanged(InputSourceProperties),
    ShellCommandExecution(String),
    SelectInputSource(Vec<InputSourceSpecifier>),
    SetNotificationMessage(String),
}

impl Message {
    pub fn operation_type(&self) -> OperationType {
        match self {
            Message::Connect(_) => OperationType::Connect,
            Message::GrabbableStateChanged(_) => OperationType::GrabbableStateChanged,
            Message::CapsLockStateChanged(_) => OperationType::CapsLockStateChanged,
            Message::ConnectConsoleUserServer(_) => OperationType::ConnectConsoleUserServer,
            Message::SystemPreferencesUpdated(_) => OperationType::SystemPreferencesUpdated,
            Message::SetCapsLockLedState(_) => OperationType::SetCapsLockLedState,
            Message::ClearSimpleModifications => OperationType::ClearSimpleModifications,
            Message::AddSimpleModification(_) => OperationType::AddSimpleModification,
            Message::FrontmostApplicationChanged(_) => OperationType::FrontmostApplicationChanged,
            Message::InputSourceChanged(_) => OperationType::InputSourceChanged,
            Message::ShellCommandExecution(_) => OperationType::ShellCommandExecution,
            Message::SelectInputSource(_) => OperationType::SelectInputSource,
            Message::SetNotificationMessage(_) => OperationType::SetNotificationMessage,
        }
    }
}
