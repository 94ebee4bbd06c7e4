//! # grabd-core
//!
//! Shared library for the grabd daemon suite: the IPC wire protocol and the
//! state that decides when the privileged grabber may take exclusive hold of
//! a physical keyboard or pointing device.
//!
//! grabd runs as three processes that share no memory:
//!
//! - the **grabber** (privileged) seizes devices and feeds the remapping engine,
//! - the **session** agent (per user) supplies configuration and session state,
//! - the **observer** (unprivileged) watches devices and reports whether each
//!   one is currently safe to grab.
//!
//! They talk over local datagram sockets.  This crate owns everything that is
//! pure logic: message encoding ([`protocol`]) and the ledger and grab-mode
//! state machine ([`domain`]).  It has no sockets, no threads and no OS calls.

pub mod domain;
pub mod protocol;

pub use domain::device::{DeviceId, KeyCode, LedState, PointingButton, PressedKey};
pub use domain::grab_mode::{DeviceGrabController, DeviceSeizer, GrabMode, SeizeError};
pub use domain::grabbability::{GrabbabilityTracker, ObservedInput};
pub use domain::grabbable::{GrabbableState, GrabbableStatus, UngrabbableReason};
pub use domain::ledger::GrabbableStateLedger;
pub use protocol::codec::{decode_message, encode_message, ProtocolError};
pub use protocol::messages::Message;
