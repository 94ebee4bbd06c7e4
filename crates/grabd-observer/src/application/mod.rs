//! Application layer of the device observer.
//!
//! - **`agent`** – turns observed device input into grab-eligibility reports
//!   and caps lock changes for the grabber, and re-sends the full picture
//!   whenever the channel (re)connects.

pub mod agent;
