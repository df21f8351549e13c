//! Injectable wall clock.
//!
//! Debounce windows, flush deadlines and aggregate timestamps all read time
//! through [`Clock`] so tests can drive them with a [`ManualClock`].

use std::sync::Arc;

use parking_lot::Mutex;

pub trait Clock: Send + Sync {
    /// Milliseconds since the Unix epoch.
    fn now_millis(&self) -> i64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// Clock that only moves when told to. Clones share the same time.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<i64>>,
}

impl ManualClock {
    pub fn new(start_millis: i64) -> Self {
        Self {
            now: Arc::new(Mutex::new(start_millis)),
        }
    }

    pub fn advance_millis(&self, millis: i64) {
        *self.now.lock() += millis;
    }

    pub fn advance(&self, duration: std::time::Duration) {
        self.advance_millis(duration.as_millis() as i64);
    }

    pub fn set(&self, millis: i64) {
        *self.now.lock() = millis;
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> i64 {
        *self.now.lock()
    }
}
