//! IPC protocol: message types, the datagram codec and report numbering.

pub mod codec;
pub mod messages;
pub mod sequence;

pub use codec::{decode_message, encode_message, ProtocolError};
pub use messages::*;
pub use sequence::ReportSequence;
