//! The `time` command's wall-clock anchor (spec.md §4.5, §9).
//!
//! `time = <epoch>` stores the epoch together with the monotonic
//! instant it was set; `time` (query) reports that epoch advanced by
//! however much monotonic time has since elapsed, so repeated queries
//! return a plausibly advancing clock without depending on the system
//! clock beyond the single reading taken at set-time.

use std::sync::Mutex;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

struct Anchor {
    epoch: i64,
    set_at: Instant,
}

/// Shared, server-wide time anchor (one instance, not per-connection —
/// spec.md §4.5 says "the connection's (or server's)" and a single
/// shared anchor is the simpler, sufficient reading).
pub struct TimeAnchor {
    inner: Mutex<Anchor>,
}

impl TimeAnchor {
    /// Anchors to the real system clock at construction time.
    pub fn new() -> Self {
        let epoch = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs() as i64).unwrap_or(0);
        Self { inner: Mutex::new(Anchor { epoch, set_at: Instant::now() }) }
    }

    /// `time = <epoch>`: re-anchors the clock to `epoch` as of now.
    pub fn set(&self, epoch: i64) {
        let mut anchor = self.inner.lock().expect("time anchor mutex poisoned");
        anchor.epoch = epoch;
        anchor.set_at = Instant::now();
    }

    /// `time` (query): the anchored epoch advanced by elapsed
    /// monotonic time since it was last set.
    pub fn query(&self) -> i64 {
        let anchor = self.inner.lock().expect("time anchor mutex poisoned");
        anchor.epoch + anchor.set_at.elapsed().as_secs() as i64
    }
}

impl Default for TimeAnchor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_after_set_returns_the_set_value_immediately() {
        let anchor = TimeAnchor::new();
        anchor.set(1_700_000_000);
        assert_eq!(anchor.query(), 1_700_000_000);
    }

    #[test]
    fn query_advances_monotonically_after_set() {
        let anchor = TimeAnchor::new();
        anchor.set(1_700_000_000);
        std::thread::sleep(std::time::Duration::from_millis(1100));
        assert!(anchor.query() >= 1_700_000_001);
    }
}
