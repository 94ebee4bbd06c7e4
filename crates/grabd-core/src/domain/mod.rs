//! Pure grab-arbitration state with no OS or socket dependencies.
//!
//! - **`device`** – device ids, key codes, pressed keys, LED state.
//! - **`grabbable`** – per-device grab-eligibility verdicts.
//! - **`ledger`** – the latest verdict per device, ordered by report sequence.
//! - **`grab_mode`** – the observing/grabbing controller and the seizer seam.
//! - **`grabbability`** – derives verdicts from observed key and button state.
//! - **`recording`** – a recording seizer for tests.

pub mod device;
pub mod grab_mode;
pub mod grabbability;
pub mod grabbable;
pub mod ledger;
pub mod recording;
