//! Suppresses repeat views of the same (viewer, subject) pair.
//!
//! The window is fixed from the first accepted view; suppressed calls do not
//! extend it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use viewtrack_core::Clock;

/// Expired entries are swept on access once the map grows past this size.
const SWEEP_THRESHOLD: usize = 4096;

pub struct DebounceGate {
    window_ms: i64,
    clock: Arc<dyn Clock>,
    entries: Mutex<HashMap<(String, String), i64>>,
}

impl DebounceGate {
    pub fn new(window: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            window_ms: i64::try_from(window.as_millis()).unwrap_or(i64::MAX),
            clock,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// True if this view should be recorded.
    pub fn should_emit(&self, viewer_id: &str, subject_id: &str) -> bool {
        if self.window_ms == 0 {
            return true;
        }

        let now = self.clock.now_millis();
        let mut entries = self.entries.lock();
        if entries.len() >= SWEEP_THRESHOLD {
            entries.retain(|_, expiry| *expiry > now);
        }

        let key = (viewer_id.to_string(), subject_id.to_string());
        match entries.get(&key) {
            Some(&expiry) if now < expiry => false,
            _ => {
                entries.insert(key, now.saturating_add(self.window_ms));
                true
            }
        }
    }

    /// Drop entries expired at `now_millis`; returns how many were removed.
    pub fn prune(&self, now_millis: i64) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, expiry| *expiry > now_millis);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use viewtrack_core::ManualClock;

    fn gate(clock: &ManualClock, window_ms: u64) -> DebounceGate {
        DebounceGate::new(Duration::from_millis(window_ms), Arc::new(clock.clone()))
    }

    #[test]
    fn repeats_inside_window_are_suppressed() {
        let clock = ManualClock::new(0);
        let gate = gate(&clock, 5_000);

        assert!(gate.should_emit("u1", "p1"));
        clock.advance_millis(4_999);
        assert!(!gate.should_emit("u1", "p1"));
        assert!(gate.should_emit("u1", "p2"));
        assert!(gate.should_emit("u2", "p1"));
    }

    #[test]
    fn suppressed_calls_do_not_extend_window() {
        let clock = ManualClock::new(0);
        let gate = gate(&clock, 5_000);

        assert!(gate.should_emit("u1", "p1"));
        clock.advance_millis(3_000);
        assert!(!gate.should_emit("u1", "p1"));
        clock.advance_millis(2_000);
        assert!(gate.should_emit("u1", "p1"));
    }

    #[test]
    fn prune_removes_expired_entries() {
        let clock = ManualClock::new(0);
        let gate = gate(&clock, 1_000);
        gate.should_emit("u1", "p1");
        clock.advance_millis(500);
        gate.should_emit("u1", "p2");

        assert_eq!(gate.prune(1_000), 1);
        assert_eq!(gate.len(), 1);
        assert_eq!(gate.prune(1_500), 1);
        assert!(gate.is_empty());
    }

    #[test]
    fn zero_window_never_suppresses() {
        let clock = ManualClock::new(0);
        let gate = gate(&clock, 0);
        assert!(gate.should_emit("u1", "p1"));
        assert!(gate.should_emit("u1", "p1"));
        assert!(gate.is_empty());
    }
}
