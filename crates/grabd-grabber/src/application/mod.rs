//! Application layer of the privileged grabber.
//!
//! # What lives here (for beginners)
//!
//! Everything that decides *what* the grabber does, expressed against traits
//! so it can be driven from unit tests without sockets, processes or devices.
//!
//! - **`arbitrator`** – the single actor that owns the grab-eligibility ledger
//!   and the grab mode, tracks the one per-user session peer and dispatches
//!   every message the grabber receives.
//!
//! - **`remapping`** – the seam to the remapping engine and the built-in
//!   one-to-one key substitution engine.
//!
//! - **`recording`** – in-memory implementations of the arbitrator's traits
//!   that record every call, for tests.

pub mod arbitrator;
pub mod recording;
pub mod remapping;
