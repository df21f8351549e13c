//! View-event queueing and flushing.
//!
//! Events pass a debounce gate, land in a durable local queue and are
//! flushed to the aggregate writer when the batch fills up, when the flush
//! interval elapses, or through the unload transport on shutdown.

use std::time::Duration;

pub mod debounce;
mod error;
pub mod queue;
pub mod scheduler;
mod tracker;
pub mod transport;

pub use debounce::DebounceGate;
pub use error::{ErrorCode, QueueError, TransportError};
pub use queue::{DurableQueue, OpendalQueueStore, QueueSnapshot, QueueStore};
pub use scheduler::{BatchScheduler, Decision};
pub use tracker::{
    FlushOutcome, RecordOutcome, Ticker, TrackerStats, UnloadOutcome, ViewTracker,
};
pub use transport::{
    BeaconStatus, DisabledTransport, HttpBeaconTransport, UnloadTransport, MAX_BEACON_BYTES,
};

#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Pending events that trigger an immediate flush.
    pub batch_size: usize,
    pub flush_interval: Duration,
    pub debounce_window: Duration,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            flush_interval: Duration::from_secs(60),
            debounce_window: Duration::from_secs(5),
        }
    }
}
