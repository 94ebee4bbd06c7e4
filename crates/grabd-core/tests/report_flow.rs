//! Integration tests for the path a grab-eligibility report takes.
//!
//! Observed input → tracker → datagram → decode → ledger → grab controller,
//! all through the public API, the way the observer and grabber processes
//! use it.

use std::sync::Arc;

use grabd_core::domain::recording::RecordingSeizer;
use grabd_core::{
    decode_message, encode_message, DeviceGrabController, DeviceId, DeviceSeizer,
    GrabbabilityTracker, GrabbableState, GrabbableStateLedger, GrabbableStatus, KeyCode,
    Message, ObservedInput, PressedKey, ProtocolError,
};

const KEYBOARD: DeviceId = DeviceId(0x1000_0001);

/// Encodes a report on the observer side and applies it on the grabber side.
fn deliver(report: GrabbableState, ledger: &mut GrabbableStateLedger) -> bool {
    let bytes = encode_message(&Message::GrabbableStateChanged(report)).expect("encode");
    match decode_message(&bytes).expect("decode") {
        Message::GrabbableStateChanged(state) => ledger.update(state),
        other => panic!("unexpected message {other:?}"),
    }
}

#[test]
fn test_held_key_defers_grab_until_release_report() {
    // Arrange
    let mut tracker = GrabbabilityTracker::new();
    let mut ledger = GrabbableStateLedger::new();
    let seizer = Arc::new(RecordingSeizer::new());
    let mut grab = DeviceGrabController::new(Arc::clone(&seizer) as Arc<dyn DeviceSeizer>);

    deliver(tracker.device_attached(KEYBOARD), &mut ledger);
    let down = tracker
        .observe(ObservedInput {
            device_id: KEYBOARD,
            key: PressedKey::Key(KeyCode::A),
            pressed: true,
        })
        .expect("key down changes the verdict");
    deliver(down, &mut ledger);
    grab.device_attached(KEYBOARD, &ledger);

    // Act: enter grabbing while the key is held.
    grab.enter_grabbing(&ledger);

    // Assert
    assert!(!grab.is_grabbed(KEYBOARD));

    // Act: the key is released.
    let up = tracker
        .observe(ObservedInput {
            device_id: KEYBOARD,
            key: PressedKey::Key(KeyCode::A),
            pressed: false,
        })
        .expect("key up changes the verdict");
    assert!(deliver(up, &mut ledger));
    grab.reevaluate(KEYBOARD, &ledger);

    // Assert
    assert!(grab.is_grabbed(KEYBOARD));
    assert_eq!(seizer.seized(), vec![KEYBOARD]);
}

#[test]
fn test_reordered_delivery_keeps_newest_report() {
    // Arrange: two reports delivered newest first.
    let mut tracker = GrabbabilityTracker::new();
    let mut ledger = GrabbableStateLedger::new();
    let attached = tracker.device_attached(KEYBOARD);
    let pressed = tracker
        .observe(ObservedInput {
            device_id: KEYBOARD,
            key: PressedKey::Key(KeyCode::LEFT_SHIFT),
            pressed: true,
        })
        .expect("modifier down changes the verdict");

    // Act
    assert!(deliver(pressed, &mut ledger));
    let applied = deliver(attached, &mut ledger);

    // Assert
    assert!(!applied, "older report must be ignored");
    assert_eq!(ledger.get(KEYBOARD), Some(pressed));
    assert!(!ledger.is_grabbable(KEYBOARD));
}

#[test]
fn test_grabbable_record_uses_native_endian_layout() {
    // Arrange
    let report = GrabbableState::new(KEYBOARD, GrabbableStatus::Grabbable, 7);

    // Act
    let bytes = encode_message(&Message::GrabbableStateChanged(report)).expect("encode");

    // Assert
    assert_eq!(bytes[0], 2);
    assert_eq!(&bytes[1..9], &KEYBOARD.0.to_ne_bytes());
    assert_eq!(bytes[9], 1, "grabbable");
    assert_eq!(&bytes[11..19], &7u64.to_ne_bytes());
}

#[test]
fn test_truncated_report_never_reaches_ledger() {
    // Arrange
    let ledger = GrabbableStateLedger::new();
    let bytes = encode_message(&Message::GrabbableStateChanged(GrabbableState::new(
        KEYBOARD,
        GrabbableStatus::Grabbable,
        1,
    )))
    .expect("encode");

    // Act
    let result = decode_message(&bytes[..10]);

    // Assert
    assert!(matches!(result, Err(ProtocolError::BadSize { .. })));
    assert!(ledger.is_empty());
}
