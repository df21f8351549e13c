//! Size and time flush triggers.
//!
//! The scheduler holds at most one armed deadline. It does not own a timer;
//! the tracker polls it from a ticker.

use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Queue reached the batch size; any armed deadline was cleared.
    FlushNow,
    /// A deadline was armed by this call.
    TimerArmed { deadline_millis: i64 },
    /// A deadline was already armed.
    Waiting,
}

#[derive(Debug, Clone)]
pub struct BatchScheduler {
    batch_size: usize,
    interval_ms: i64,
    deadline: Option<i64>,
}

impl BatchScheduler {
    pub fn new(batch_size: usize, interval: Duration) -> Self {
        Self {
            batch_size: batch_size.max(1),
            interval_ms: i64::try_from(interval.as_millis()).unwrap_or(i64::MAX),
            deadline: None,
        }
    }

    /// Decide what to do after an enqueue left `queue_len` events pending.
    pub fn on_enqueue(&mut self, queue_len: usize, now_millis: i64) -> Decision {
        if queue_len >= self.batch_size {
            self.deadline = None;
            return Decision::FlushNow;
        }
        match self.deadline {
            Some(_) => Decision::Waiting,
            None => Decision::TimerArmed {
                deadline_millis: self.arm(now_millis),
            },
        }
    }

    /// Arm a deadline unless one is already set. Returns the active deadline.
    pub fn arm_if_idle(&mut self, now_millis: i64) -> i64 {
        match self.deadline {
            Some(deadline) => deadline,
            None => self.arm(now_millis),
        }
    }

    /// True exactly once when the armed deadline has passed.
    pub fn poll(&mut self, now_millis: i64) -> bool {
        match self.deadline {
            Some(deadline) if now_millis >= deadline => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }

    pub fn clear(&mut self) {
        self.deadline = None;
    }

    pub fn deadline(&self) -> Option<i64> {
        self.deadline
    }

    fn arm(&mut self, now_millis: i64) -> i64 {
        let deadline = now_millis.saturating_add(self.interval_ms);
        self.deadline = Some(deadline);
        deadline
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_enqueue_arms_one_deadline() {
        let mut scheduler = BatchScheduler::new(10, Duration::from_secs(60));
        assert_eq!(
            scheduler.on_enqueue(1, 1_000),
            Decision::TimerArmed {
                deadline_millis: 61_000
            }
        );
        assert_eq!(scheduler.on_enqueue(2, 5_000), Decision::Waiting);
        assert_eq!(scheduler.deadline(), Some(61_000));
    }

    #[test]
    fn size_trigger_clears_deadline() {
        let mut scheduler = BatchScheduler::new(3, Duration::from_secs(60));
        scheduler.on_enqueue(1, 0);
        scheduler.on_enqueue(2, 0);
        assert_eq!(scheduler.on_enqueue(3, 0), Decision::FlushNow);
        assert_eq!(scheduler.deadline(), None);
    }

    #[test]
    fn poll_fires_once() {
        let mut scheduler = BatchScheduler::new(10, Duration::from_millis(100));
        scheduler.on_enqueue(1, 0);
        assert!(!scheduler.poll(99));
        assert!(scheduler.poll(100));
        assert!(!scheduler.poll(200));
    }

    #[test]
    fn arm_if_idle_keeps_existing_deadline() {
        let mut scheduler = BatchScheduler::new(10, Duration::from_millis(100));
        assert_eq!(scheduler.arm_if_idle(0), 100);
        assert_eq!(scheduler.arm_if_idle(50), 100);
        scheduler.clear();
        assert_eq!(scheduler.arm_if_idle(50), 150);
    }
}
