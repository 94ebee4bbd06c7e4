//! Codec for grabd IPC datagrams.
//!
//! Fixed records (sizes include the operation byte; integers native-endian):
//! ```text
//! connect                      [op][connect_from:1][pid:4]                         6
//! grabbable_state_changed      [op][device_id:8][state:1][reason:1][sequence:8]   19
//! caps_lock_state_changed      [op][state:1]                                       2
//! connect_console_user_server  [op][pid:4][configuration_path:1024]             1029
//! system_preferences_updated   [op][preferences:14]...                          >=15
//! set_caps_lock_led_state      [op][led:1]                                         2
//! clear_simple_modifications   [op]                                                1
//! add_simple_modification      [op][from_key:4][to_key:4]                          9
//! ```
//!
//! Structured payloads are JSON objects tagged with `"operation_type"`.
//! [`decode_message`] tries the structured decoder first; any failure there
//! just means "not a structured payload" and decoding continues with the fixed
//! record named by byte 0.  Every fixed record is length-checked before a
//! single field is read.

use std::path::{Path, PathBuf};

use bincode::Options;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::device::{DeviceId, KeyCode, LedState};
use crate::domain::grabbable::{GrabbableState, GrabbableStatus, UngrabbableReason};
use crate::protocol::messages::{
    ConnectConsoleUserServerMessage, ConnectFrom, ConnectMessage, FrontmostApplication,
    InputSourceProperties, InputSourceSpecifier, Message, OperationType, SimpleModification,
    SystemPreferences,
};

/// Capacity of the NUL-padded configuration path field, terminator included.
pub const CONFIGURATION_PATH_CAPACITY: usize = 1024;

/// Encoded size of [`SystemPreferences`] inside `system_preferences_updated`.
pub const SYSTEM_PREFERENCES_SIZE: usize = 14;

pub const CONNECT_SIZE: usize = 1 + 1 + 4;
pub const GRABBABLE_STATE_CHANGED_SIZE: usize = 1 + 8 + 1 + 1 + 8;
pub const CAPS_LOCK_STATE_CHANGED_SIZE: usize = 2;
pub const CONNECT_CONSOLE_USER_SERVER_SIZE: usize = 1 + 4 + CONFIGURATION_PATH_CAPACITY;
pub const SYSTEM_PREFERENCES_UPDATED_SIZE: usize = 1 + SYSTEM_PREFERENCES_SIZE;
pub const SET_CAPS_LOCK_LED_STATE_SIZE: usize = 2;
pub const CLEAR_SIMPLE_MODIFICATIONS_SIZE: usize = 1;
pub const ADD_SIMPLE_MODIFICATION_SIZE: usize = 1 + 4 + 4;

const STATE_GRABBABLE: u8 = 1;
const STATE_UNGRABBABLE: u8 = 2;

/// Errors that can occur while encoding or decoding a datagram.
#[derive(Debug, Error, PartialEq)]
pub enum ProtocolError {
    /// The datagram carried no bytes at all.
    #[error("empty datagram")]
    Empty,

    /// A fixed record whose length does not match its operation.
    #[error("bad size for {operation:?}: expected {expected} bytes, got {actual}")]
    BadSize {
        operation: OperationType,
        expected: usize,
        actual: usize,
    },

    /// Byte 0 is not a known operation code.  Dispatchers skip these silently.
    #[error("unknown operation type: {0}")]
    Unknown(u8),

    /// The length was right but a field value was not.
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// A message could not be serialized.
    #[error("failed to encode message: {0}")]
    Encode(String),
}

/// JSON shape of the structured family.
#[derive(Serialize, Deserialize)]
#[serde(tag = "operation_type", rename_all = "snake_case")]
enum StructuredPayload {
    FrontmostApplicationChanged {
        frontmost_application: FrontmostApplication,
    },
    InputSourceChanged {
        input_source_properties: InputSourceProperties,
    },
    ShellCommandExecution {
        shell_command: String,
    },
    SelectInputSource {
        input_source_specifiers: Vec<InputSourceSpecifier>,
    },
    SetNotificationMessage {
        message: String,
    },
}

impl From<StructuredPayload> for Message {
    fn from(payload: StructuredPayload) -> Self {
        match payload {
            StructuredPayload::FrontmostApplicationChanged {
                frontmost_application,
            } => Message::FrontmostApplicationChanged(frontmost_application),
            StructuredPayload::InputSourceChanged {
                input_source_properties,
            } => Message::InputSourceChanged(input_source_properties),
            StructuredPayload::ShellCommandExecution { shell_command } => {
                Message::ShellCommandExecution(shell_command)
            }
            StructuredPayload::SelectInputSource {
                input_source_specifiers,
            } => Message::SelectInputSource(input_source_specifiers),
            StructuredPayload::SetNotificationMessage { message } => {
                Message::SetNotificationMessage(message)
            }
        }
    }
}

fn preferences_options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_native_endian()
        .allow_trailing_bytes()
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Encodes `message` into one datagram.
///
/// # Errors
///
/// Returns [`ProtocolError::Encode`] if a payload cannot be serialized.
///
/// # Examples
///
/// ```rust
/// use grabd_core::protocol::{decode_message, encode_message, Message};
///
/// let bytes = encode_message(&Message::CapsLockStateChanged(true)).unwrap();
/// assert_eq!(bytes, vec![3, 1]);
/// assert_eq!(decode_message(&bytes).unwrap(), Message::CapsLockStateChanged(true));
/// ```
pub fn encode_message(message: &Message) -> Result<Vec<u8>, ProtocolError> {
    let op = message.operation_type() as u8;
    let buf = match message {
        Message::Connect(connect) => {
            let mut buf = Vec::with_capacity(CONNECT_SIZE);
            buf.push(op);
            buf.push(connect.connect_from as u8);
            buf.extend_from_slice(&connect.pid.to_ne_bytes());
            buf
        }
        Message::GrabbableStateChanged(state) => {
            let (code, reason) = match state.status {
                GrabbableStatus::Grabbable => (STATE_GRABBABLE, UngrabbableReason::None),
                GrabbableStatus::Ungrabbable(reason) => (STATE_UNGRABBABLE, reason),
            };
            let mut buf = Vec::with_capacity(GRABBABLE_STATE_CHANGED_SIZE);
            buf.push(op);
            buf.extend_from_slice(&state.device_id.0.to_ne_bytes());
            buf.push(code);
            buf.push(reason as u8);
            buf.extend_from_slice(&state.sequence.to_ne_bytes());
            buf
        }
        Message::CapsLockStateChanged(on) => vec![op, u8::from(*on)],
        Message::ConnectConsoleUserServer(connect) => {
            let mut buf = Vec::with_capacity(CONNECT_CONSOLE_USER_SERVER_SIZE);
            buf.push(op);
            buf.extend_from_slice(&connect.pid.to_ne_bytes());
            write_fixed_path(&mut buf, &connect.configuration_path);
            buf
        }
        Message::SystemPreferencesUpdated(preferences) => {
            let blob = preferences_options()
                .serialize(preferences)
                .map_err(|e| ProtocolError::Encode(e.to_string()))?;
            let mut buf = Vec::with_capacity(1 + blob.len());
            buf.push(op);
            buf.extend_from_slice(&blob);
            buf
        }
        Message::SetCapsLockLedState(led) => vec![op, *led as u8],
        Message::ClearSimpleModifications => vec![op],
        Message::AddSimpleModification(modification) => {
            let mut buf = Vec::with_capacity(ADD_SIMPLE_MODIFICATION_SIZE);
            buf.push(op);
            buf.extend_from_slice(&modification.from_key.0.to_ne_bytes());
            buf.extend_from_slice(&modification.to_key.0.to_ne_bytes());
            buf
        }
        Message::FrontmostApplicationChanged(_)
        | Message::InputSourceChanged(_)
        | Message::ShellCommandExecution(_)
        | Message::SelectInputSource(_)
        | Message::SetNotificationMessage(_) => encode_structured(message)?,
    };
    Ok(buf)
}

/// Decodes one datagram.
///
/// Never reads outside `bytes` and never panics on hostile input.
///
/// # Errors
///
/// - [`ProtocolError::Unknown`] for an operation code this build does not know.
/// - [`ProtocolError::BadSize`] when a fixed record has the wrong length.
/// - [`ProtocolError::MalformedPayload`] when a field value is invalid.
pub fn decode_message(bytes: &[u8]) -> Result<Message, ProtocolError> {
    if bytes.is_empty() {
        return Err(ProtocolError::Empty);
    }
    if let Ok(payload) = serde_json::from_slice::<StructuredPayload>(bytes) {
        return Ok(payload.into());
    }

    let op = OperationType::try_from(bytes[0]).map_err(ProtocolError::Unknown)?;
    match op {
        OperationType::Connect => {
            require_len(bytes, op, CONNECT_SIZE)?;
            let connect_from = ConnectFrom::try_from(bytes[1]).map_err(|v| {
                ProtocolError::MalformedPayload(format!("unknown connect_from {v}"))
            })?;
            Ok(Message::Connect(ConnectMessage {
                pid: read_i32(bytes, 2),
                connect_from,
            }))
        }
        OperationType::GrabbableStateChanged => {
            require_len(bytes, op, GRABBABLE_STATE_CHANGED_SIZE)?;
            let reason = UngrabbableReason::try_from(bytes[10]).map_err(|v| {
                ProtocolError::MalformedPayload(format!("unknown ungrabbable reason {v}"))
            })?;
            let status = match bytes[9] {
                STATE_GRABBABLE => GrabbableStatus::Grabbable,
                STATE_UNGRABBABLE => GrabbableStatus::Ungrabbable(reason),
                v => {
                    return Err(ProtocolError::MalformedPayload(format!(
                        "unknown grabbable state {v}"
                    )))
                }
            };
            Ok(Message::GrabbableStateChanged(GrabbableState {
                device_id: DeviceId(read_u64(bytes, 1)),
                status,
                sequence: read_u64(bytes, 11),
            }))
        }
        OperationType::CapsLockStateChanged => {
            require_len(bytes, op, CAPS_LOCK_STATE_CHANGED_SIZE)?;
            Ok(Message::CapsLockStateChanged(bytes[1] != 0))
        }
        OperationType::ConnectConsoleUserServer => {
            require_len(bytes, op, CONNECT_CONSOLE_USER_SERVER_SIZE)?;
            Ok(Message::ConnectConsoleUserServer(
                ConnectConsoleUserServerMessage {
                    pid: read_i32(bytes, 1),
                    configuration_path: read_fixed_path(&bytes[5..]),
                },
            ))
        }
        OperationType::SystemPreferencesUpdated => {
            if bytes.len() < SYSTEM_PREFERENCES_UPDATED_SIZE {
                return Err(ProtocolError::BadSize {
                    operation: op,
                    expected: SYSTEM_PREFERENCES_UPDATED_SIZE,
                    actual: bytes.len(),
                });
            }
            let preferences: SystemPreferences = preferences_options()
                .deserialize(&bytes[1..])
                .map_err(|e| ProtocolError::MalformedPayload(e.to_string()))?;
            Ok(Message::SystemPreferencesUpdated(preferences))
        }
        OperationType::SetCapsLockLedState => {
            require_len(bytes, op, SET_CAPS_LOCK_LED_STATE_SIZE)?;
            let led = LedState::try_from(bytes[1]).map_err(|v| {
                ProtocolError::MalformedPayload(format!("unknown led state {v}"))
            })?;
            Ok(Message::SetCapsLockLedState(led))
        }
        OperationType::ClearSimpleModifications => {
            require_len(bytes, op, CLEAR_SIMPLE_MODIFICATIONS_SIZE)?;
            Ok(Message::ClearSimpleModifications)
        }
        OperationType::AddSimpleModification => {
            require_len(bytes, op, ADD_SIMPLE_MODIFICATION_SIZE)?;
            Ok(Message::AddSimpleModification(SimpleModification {
                from_key: KeyCode(read_u32(bytes, 1)),
                to_key: KeyCode(read_u32(bytes, 5)),
            }))
        }
        OperationType::None => Err(ProtocolError::MalformedPayload(
            "operation type none carries no message".to_string(),
        )),
        structured => Err(ProtocolError::MalformedPayload(format!(
            "{structured:?} requires a structured payload"
        ))),
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn encode_structured(message: &Message) -> Result<Vec<u8>, ProtocolError> {
    let payload = match message {
        Message::FrontmostApplicationChanged(app) => {
            StructuredPayload::FrontmostApplicationChanged {
                frontmost_application: app.clone(),
            }
        }
        Message::InputSourceChanged(properties) => StructuredPayload::InputSourceChanged {
            input_source_properties: properties.clone(),
        },
        Message::ShellCommandExecution(command) => StructuredPayload::ShellCommandExecution {
            shell_command: command.clone(),
        },
        Message::SelectInputSource(specifiers) => StructuredPayload::SelectInputSource {
            input_source_specifiers: specifiers.clone(),
        },
        Message::SetNotificationMessage(text) => StructuredPayload::SetNotificationMessage {
            message: text.clone(),
        },
        other => {
            return Err(ProtocolError::Encode(format!(
                "{:?} is not a structured message",
                other.operation_type()
            )))
        }
    };
    serde_json::to_vec(&payload).map_err(|e| ProtocolError::Encode(e.to_string()))
}

fn require_len(bytes: &[u8], operation: OperationType, expected: usize) -> Result<(), ProtocolError> {
    if bytes.len() != expected {
        return Err(ProtocolError::BadSize {
            operation,
            expected,
            actual: bytes.len(),
        });
    }
    Ok(())
}

// Callers have already checked the length with `require_len`.
fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&bytes[offset..offset + 4]);
    u32::from_ne_bytes(raw)
}

fn read_i32(bytes: &[u8], offset: usize) -> i32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&bytes[offset..offset + 4]);
    i32::from_ne_bytes(raw)
}

fn read_u64(bytes: &[u8], offset: usize) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&bytes[offset..offset + 8]);
    u64::from_ne_bytes(raw)
}

/// Writes `path` as a NUL-padded field of [`CONFIGURATION_PATH_CAPACITY`]
/// bytes, truncating at a character boundary so a terminator always fits.
fn write_fixed_path(buf: &mut Vec<u8>, path: &Path) {
    let text = path.to_string_lossy();
    let mut end = text.len().min(CONFIGURATION_PATH_CAPACITY - 1);
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    buf.extend_from_slice(&text.as_bytes()[..end]);
    buf.resize(buf.len() + CONFIGURATION_PATH_CAPACITY - end, 0);
}

/// Reads a NUL-terminated path from a fixed field.  A field with no
/// terminator ends at its capacity.
fn read_fixed_path(field: &[u8]) -> PathBuf {
    let field = &field[..field.len().min(CONFIGURATION_PATH_CAPACITY)];
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    PathBuf::from(String::from_utf8_lossy(&field[..end]).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(message: Message) {
        let bytes = encode_message(&message).expect("encode");
        let decoded = decode_message(&bytes).expect("decode");
        assert_eq!(decoded, message);
    }

    #[test]
    fn test_fixed_records_have_documented_sizes() {
        let cases = [
            (
                Message::Connect(ConnectMessage {
                    pid: 1,
                    connect_from: ConnectFrom::Observer,
                }),
                CONNECT_SIZE,
            ),
            (
                Message::GrabbableStateChanged(GrabbableState::new(
                    DeviceId(1),
                    GrabbableStatus::Grabbable,
                    1,
                )),
                GRABBABLE_STATE_CHANGED_SIZE,
            ),
            (
                Message::ConnectConsoleUserServer(ConnectConsoleUserServerMessage {
                    pid: 1,
                    configuration_path: PathBuf::from("/a"),
                }),
                CONNECT_CONSOLE_USER_SERVER_SIZE,
            ),
            (
                Message::SystemPreferencesUpdated(SystemPreferences::default()),
                SYSTEM_PREFERENCES_UPDATED_SIZE,
            ),
            (Message::ClearSimpleModifications, 1),
        ];

        for (message, size) in cases {
            let bytes = encode_message(&message).expect("encode");
            assert_eq!(bytes.len(), size, "{:?}", message.operation_type());
        }
    }

    #[test]
    fn test_grabbable_state_round_trip_preserves_reason_and_sequence() {
        round_trip(Message::GrabbableStateChanged(GrabbableState::new(
            DeviceId(0xDEAD_BEEF),
            GrabbableStatus::Ungrabbable(UngrabbableReason::ModifierKeyPressed),
            u64::MAX - 1,
        )));
    }

    #[test]
    fn test_short_grabbable_state_is_bad_size() {
        // Arrange: a valid record missing its last byte.
        let bytes = encode_message(&Message::GrabbableStateChanged(GrabbableState::new(
            DeviceId(1),
            GrabbableStatus::Grabbable,
            3,
        )))
        .expect("encode");

        // Act
        let result = decode_message(&bytes[..bytes.len() - 1]);

        // Assert
        assert_eq!(
            result,
            Err(ProtocolError::BadSize {
                operation: OperationType::GrabbableStateChanged,
                expected: GRABBABLE_STATE_CHANGED_SIZE,
                actual: GRABBABLE_STATE_CHANGED_SIZE - 1,
            })
        );
    }

    #[test]
    fn test_every_truncation_of_every_fixed_record_is_rejected_without_panic() {
        let messages = [
            Message::Connect(ConnectMessage {
                pid: 77,
                connect_from: ConnectFrom::ConsoleUserServer,
            }),
            Message::GrabbableStateChanged(GrabbableState::new(
                DeviceId(9),
                GrabbableStatus::Grabbable,
                9,
            )),
            Message::ConnectConsoleUserServer(ConnectConsoleUserServerMessage {
                pid: 5,
                configuration_path: PathBuf::from("/etc/grabd/profile.json"),
            }),
            Message::SystemPreferencesUpdated(SystemPreferences::default()),
            Message::AddSimpleModification(SimpleModification {
                from_key: KeyCode::CAPS_LOCK,
                to_key: KeyCode::ESCAPE,
            }),
        ];

        for message in messages {
            let bytes = encode_message(&message).expect("encode");
            for len in 1..bytes.len() {
                assert!(
                    decode_message(&bytes[..len]).is_err(),
                    "{:?} truncated to {len} bytes must not decode",
                    message.operation_type()
                );
            }
        }
    }

    #[test]
    fn test_oversized_fixed_record_is_bad_size() {
        let result = decode_message(&[OperationType::CapsLockStateChanged as u8, 1, 0]);

        assert!(matches!(result, Err(ProtocolError::BadSize { actual: 3, .. })));
    }

    #[test]
    fn test_system_preferences_tolerates_trailing_bytes() {
        // Arrange
        let preferences = SystemPreferences {
            use_fkeys_as_standard_function_keys: true,
            scroll_direction_is_natural: false,
            keyboard_type: 40,
            initial_key_repeat_milliseconds: 250,
            key_repeat_milliseconds: 30,
        };
        let mut bytes =
            encode_message(&Message::SystemPreferencesUpdated(preferences)).expect("encode");
        bytes.extend_from_slice(&[0xAA; 8]);

        // Act
        let decoded = decode_message(&bytes);

        // Assert
        assert_eq!(decoded, Ok(Message::SystemPreferencesUpdated(preferences)));
    }

    #[test]
    fn test_unterminated_path_is_cut_at_capacity() {
        // Arrange: a path field with no NUL anywhere.
        let mut bytes = vec![OperationType::ConnectConsoleUserServer as u8];
        bytes.extend_from_slice(&42i32.to_ne_bytes());
        bytes.extend(std::iter::repeat(b'x').take(CONFIGURATION_PATH_CAPACITY));

        // Act
        let decoded = decode_message(&bytes).expect("decode");

        // Assert
        let Message::ConnectConsoleUserServer(connect) = decoded else {
            panic!("unexpected message {decoded:?}");
        };
        assert_eq!(connect.pid, 42);
        assert_eq!(
            connect.configuration_path.as_os_str().len(),
            CONFIGURATION_PATH_CAPACITY
        );
    }

    #[test]
    fn test_long_path_is_truncated_on_a_char_boundary() {
        // Arrange: multi-byte characters straddling the capacity.
        let long: String = std::iter::repeat('é').take(CONFIGURATION_PATH_CAPACITY).collect();
        let message = Message::ConnectConsoleUserServer(ConnectConsoleUserServerMessage {
            pid: 1,
            configuration_path: PathBuf::from(&long),
        });

        // Act
        let bytes = encode_message(&message).expect("encode");
        let decoded = decode_message(&bytes).expect("decode");

        // Assert
        assert_eq!(bytes.len(), CONNECT_CONSOLE_USER_SERVER_SIZE);
        let Message::ConnectConsoleUserServer(connect) = decoded else {
            panic!("unexpected message {decoded:?}");
        };
        let text = connect.configuration_path.to_string_lossy().into_owned();
        assert!(text.len() < CONFIGURATION_PATH_CAPACITY);
        assert!(long.starts_with(&text));
    }

    #[test]
    fn test_unknown_operation_code_is_reported() {
        assert_eq!(decode_message(&[0xF0, 1, 2]), Err(ProtocolError::Unknown(0xF0)));
    }

    #[test]
    fn test_unknown_structured_operation_falls_through_to_unknown() {
        let bytes = br#"{"operation_type":"something_newer","value":1}"#;

        assert_eq!(decode_message(bytes), Err(ProtocolError::Unknown(b'{')));
    }

    #[test]
    fn test_structured_payloads_round_trip() {
        round_trip(Message::FrontmostApplicationChanged(FrontmostApplication {
            bundle_identifier: "org.example.editor".to_string(),
            file_path: "/usr/bin/editor".to_string(),
        }));
        round_trip(Message::InputSourceChanged(InputSourceProperties {
            language: Some("en".to_string()),
            input_source_id: Some("us".to_string()),
            input_mode_id: None,
        }));
        round_trip(Message::SelectInputSource(vec![InputSourceSpecifier {
            language: Some("^fr$".to_string()),
            ..Default::default()
        }]));
        round_trip(Message::ShellCommandExecution("open -a Terminal".to_string()));
        round_trip(Message::SetNotificationMessage(String::new()));
    }

    #[test]
    fn test_structured_wire_shape_is_tagged_json() {
        let bytes =
            encode_message(&Message::ShellCommandExecution("true".to_string())).expect("encode");

        let value: serde_json::Value = serde_json::from_slice(&bytes).expect("json");

        assert_eq!(value["operation_type"], "shell_command_execution");
        assert_eq!(value["shell_command"], "true");
    }

    #[test]
    fn test_structured_opcode_without_json_is_malformed() {
        let result = decode_message(&[OperationType::ShellCommandExecution as u8]);

        assert!(matches!(result, Err(ProtocolError::MalformedPayload(_))));
    }

    #[test]
    fn test_invalid_field_values_are_malformed() {
        assert!(matches!(
            decode_message(&[OperationType::SetCapsLockLedState as u8, 9]),
            Err(ProtocolError::MalformedPayload(_))
        ));
        assert!(matches!(
            decode_message(&[OperationType::Connect as u8, 9, 0, 0, 0, 0]),
            Err(ProtocolError::MalformedPayload(_))
        ));
    }

    #[test]
    fn test_empty_buffer_is_rejected() {
        assert_eq!(decode_message(&[]), Err(ProtocolError::Empty));
    }
}
