//! Application layer of the per-user session agent.
//!
//! - **`agent`** – the actor that keeps the grabber informed: it announces
//!   this session and its remapping configuration whenever the channel
//!   (re)connects, forwards session-state changes, and hands the grabber's
//!   requests to [`SessionActions`](actions::SessionActions).
//!
//! - **`actions`** – the seam for the things the grabber may ask a user
//!   session to do.

pub mod actions;
pub mod agent;
