//! Report sequence numbers for grab-eligibility reports.
//!
//! The grabber's ledger discards any report whose sequence is not strictly
//! greater than the one it already holds for the device.  A producer therefore
//! needs a counter that never goes backwards, not even on overflow: unlike a
//! wrapping message counter, [`ReportSequence`] saturates at `u64::MAX`.

use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe, strictly increasing report counter.  The first value is 1.
///
/// ```rust
/// use grabd_core::protocol::ReportSequence;
///
/// let sequence = ReportSequence::new();
/// assert_eq!(sequence.next(), 1);
/// assert_eq!(sequence.next(), 2);
/// ```
#[derive(Debug)]
pub struct ReportSequence {
    last: AtomicU64,
}

impl ReportSequence {
    pub fn new() -> Self {
        Self {
            last: AtomicU64::new(0),
        }
    }

    /// Returns the next sequence value.
    pub fn next(&self) -> u64 {
        let previous = self
            .last
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| {
                Some(n.saturating_add(1))
            })
            .unwrap_or(u64::MAX);
        previous.saturating_add(1)
    }

    /// The last value handed out, 0 if none.
    pub fn last(&self) -> u64 {
        self.last.load(Ordering::Relaxed)
    }
}

impl Default for ReportSequence {
    fn default() -> Self {
        Self::new()
    }
}
