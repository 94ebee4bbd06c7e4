//! Observation feed: JSON lines on standard input.
//!
//! The device layer (an evdev reader, a udev monitor, or a test script)
//! writes one [`Observation`] per line:
//!
//! ```text
//! {"kind":"attached","device_id":3}
//! {"kind":"input","device_id":3,"key":{"key":57},"pressed":true}
//! {"kind":"input","device_id":4,"key":{"button":1},"pressed":false}
//! {"kind":"caps_lock","on":true}
//! {"kind":"detached","device_id":3}
//! ```
//!
//! Bad lines are logged and skipped.  End of input ends the feed.

use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::application::agent::{Observation, ObserverEvent};

/// Parses one line; blank lines yield `None`.
pub fn parse_observation(line: &str) -> Result<Option<Observation>, serde_json::Error> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    serde_json::from_str(line).map(Some)
}

/// Forwards every observation read from `reader` into the agent's mailbox.
/// Returns the number of observations forwarded.
pub async fn pump<R>(reader: R, events: mpsc::Sender<ObserverEvent>) -> usize
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut forwarded = 0;
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                debug!(forwarded, "observation feed ended");
                return forwarded;
            }
            Err(e) => {
                warn!(error = %e, "observation feed read failed");
                return forwarded;
            }
        };
        match parse_observation(&line) {
            Ok(Some(observation)) => {
                if events.send(observation.into()).await.is_err() {
                    return forwarded;
                }
                forwarded += 1;
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "skipping malformed observation"),
        }
    }
}
