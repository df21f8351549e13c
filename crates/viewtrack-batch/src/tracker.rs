// View tracker: debounce, durable enqueue, scheduled flushing and recovery.
//
// Flush lifecycle:
// 1. Clear any armed deadline and drain the queue into the in-flight list
// 2. Process every drained event concurrently through the aggregate writer
// 3. Acknowledge delivered events and requeue failures at the head
// 4. Re-arm the time trigger if anything is still pending

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn, Span};
use viewtrack_core::{Clock, ViewEvent};
use viewtrack_writer::AggregateWriter;

use crate::debounce::DebounceGate;
use crate::queue::{DurableQueue, QueueStore};
use crate::scheduler::{BatchScheduler, Decision};
use crate::transport::{BeaconStatus, UnloadTransport};
use crate::TrackerConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordOutcome {
    /// Ids were unusable; nothing was queued.
    Rejected,
    /// Same pair seen inside the debounce window.
    Debounced,
    Queued { len: usize },
    /// The enqueue hit the batch size and triggered a flush.
    Flushed(FlushOutcome),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    Empty,
    /// Another flush was running; the time trigger was re-armed.
    Busy,
    Completed { delivered: usize, failed: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnloadOutcome {
    Empty,
    /// Handed off to the unload transport.
    Sent { events: usize },
    /// Transport unavailable; events are back in local storage.
    WrittenBack { events: usize },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackerStats {
    pub recorded: u64,
    pub debounced: u64,
    pub rejected: u64,
    pub flushes: u64,
    pub delivered: u64,
    pub failed: u64,
    pub pending: usize,
    pub degraded: bool,
}

#[derive(Default)]
struct Counters {
    recorded: AtomicU64,
    debounced: AtomicU64,
    rejected: AtomicU64,
    flushes: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
}

/// Background driver of the time trigger.
pub struct Ticker {
    stop: Arc<Notify>,
    handle: JoinHandle<()>,
}

impl Ticker {
    /// Stop ticking, letting an in-progress flush settle first.
    pub async fn shutdown(self) {
        self.stop.notify_one();
        if let Err(err) = self.handle.await {
            warn!(error = %err, "Flush ticker ended abnormally");
        }
    }
}

pub struct ViewTracker {
    clock: Arc<dyn Clock>,
    gate: DebounceGate,
    queue: DurableQueue,
    scheduler: Mutex<BatchScheduler>,
    writer: Arc<AggregateWriter>,
    transport: Arc<dyn UnloadTransport>,
    flush_guard: tokio::sync::Mutex<()>,
    counters: Counters,
}

impl ViewTracker {
    /// Open the queue and arm the time trigger for any events left over
    /// from a previous run.
    pub async fn open(
        config: TrackerConfig,
        clock: Arc<dyn Clock>,
        queue_store: Arc<dyn QueueStore>,
        writer: Arc<AggregateWriter>,
        transport: Arc<dyn UnloadTransport>,
    ) -> Self {
        let queue = DurableQueue::open(queue_store).await;
        let mut scheduler = BatchScheduler::new(config.batch_size, config.flush_interval);

        let restored = queue.len().await;
        if restored > 0 {
            let deadline = scheduler.arm_if_idle(clock.now_millis());
            info!(restored, deadline, "Restored pending view events");
        }

        Self {
            gate: DebounceGate::new(config.debounce_window, Arc::clone(&clock)),
            clock,
            queue,
            scheduler: Mutex::new(scheduler),
            writer,
            transport,
            flush_guard: tokio::sync::Mutex::new(()),
            counters: Counters::default(),
        }
    }

    /// Record that `viewer_id` looked at `subject_id`. Never fails; the
    /// outcome is informational.
    pub async fn record_view(&self, viewer_id: &str, subject_id: &str) -> RecordOutcome {
        let now = self.clock.now_millis();
        let event = ViewEvent::new(viewer_id, subject_id, now);

        if let Err(err) = event.validate() {
            debug!(error = %err, "Ignoring view with invalid ids");
            self.counters.rejected.fetch_add(1, Ordering::Relaxed);
            return RecordOutcome::Rejected;
        }

        if !self.gate.should_emit(viewer_id, subject_id) {
            self.counters.debounced.fetch_add(1, Ordering::Relaxed);
            return RecordOutcome::Debounced;
        }

        let len = self.queue.enqueue(event).await;
        self.counters.recorded.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("viewtrack.views.recorded").increment(1);

        let decision = self.scheduler.lock().on_enqueue(len, now);
        match decision {
            Decision::FlushNow => RecordOutcome::Flushed(self.flush().await),
            Decision::TimerArmed { deadline_millis } => {
                debug!(len, deadline_millis, "Flush timer armed");
                RecordOutcome::Queued { len }
            }
            Decision::Waiting => RecordOutcome::Queued { len },
        }
    }

    /// Process everything pending. Never runs twice at once.
    #[tracing::instrument(
        name = "tracker.flush",
        skip(self),
        fields(
            events = tracing::field::Empty,
            delivered = tracing::field::Empty,
            failed = tracing::field::Empty,
        )
    )]
    pub async fn flush(&self) -> FlushOutcome {
        let Ok(_guard) = self.flush_guard.try_lock() else {
            let deadline = self.scheduler.lock().arm_if_idle(self.clock.now_millis());
            debug!(deadline, "Flush already running; deferring to next cycle");
            return FlushOutcome::Busy;
        };

        self.scheduler.lock().clear();
        let events = self.queue.drain_all().await;
        if events.is_empty() {
            return FlushOutcome::Empty;
        }

        let started = Instant::now();
        let total = events.len();
        Span::current().record("events", total);

        let report = self.writer.process_batch(events).await;
        let delivered = report.delivered.len();
        let failed = report.failed.len();

        let mut settled = report.delivered;
        settled.extend(report.rejected);
        self.queue.settle(&settled, report.failed).await;

        self.counters.flushes.fetch_add(1, Ordering::Relaxed);
        self.counters
            .delivered
            .fetch_add(delivered as u64, Ordering::Relaxed);
        self.counters
            .failed
            .fetch_add(failed as u64, Ordering::Relaxed);
        metrics::counter!("viewtrack.flush.processed").increment(delivered as u64);
        metrics::counter!("viewtrack.flush.failed").increment(failed as u64);
        metrics::histogram!("viewtrack.flush.latency_ms")
            .record(started.elapsed().as_secs_f64() * 1000.0);

        Span::current().record("delivered", delivered);
        Span::current().record("failed", failed);

        if !self.queue.is_empty().await {
            let deadline = self.scheduler.lock().arm_if_idle(self.clock.now_millis());
            debug!(deadline, "Events still pending after flush");
        }

        if failed > 0 {
            warn!(total, delivered, failed, "Flush completed with failures; requeued");
        } else {
            info!(total, delivered, "Flush completed");
        }

        FlushOutcome::Completed { delivered, failed }
    }

    /// Fire the time trigger if its deadline has passed.
    pub async fn tick(&self) -> Option<FlushOutcome> {
        let now = self.clock.now_millis();
        self.gate.prune(now);
        let due = self.scheduler.lock().poll(now);
        if due {
            Some(self.flush().await)
        } else {
            None
        }
    }

    /// Hand pending events to the unload transport, or write them back for
    /// the next run when it is unavailable.
    #[tracing::instrument(name = "tracker.unload", skip(self))]
    pub async fn flush_on_unload(&self) -> UnloadOutcome {
        self.scheduler.lock().clear();
        let events = self.queue.drain_all().await;
        if events.is_empty() {
            return UnloadOutcome::Empty;
        }
        let count = events.len();

        let status = match serde_json::to_vec(&events) {
            Ok(json) => self.transport.send_best_effort(Bytes::from(json)),
            Err(err) => {
                warn!(error = %err, "Failed to encode unload payload");
                Ok(BeaconStatus::Unavailable)
            }
        };

        match status {
            Ok(BeaconStatus::Accepted) => {
                self.queue.acknowledge(&events).await;
                info!(events = count, "Unload beacon handed off");
                UnloadOutcome::Sent { events: count }
            }
            Ok(BeaconStatus::Unavailable) => {
                self.queue.requeue_front(events).await;
                info!(events = count, "Unload transport unavailable; events kept locally");
                UnloadOutcome::WrittenBack { events: count }
            }
            Err(err) => {
                warn!(error = %err, code = err.code(), "Unload beacon refused; events kept locally");
                self.queue.requeue_front(events).await;
                UnloadOutcome::WrittenBack { events: count }
            }
        }
    }

    /// Drive [`tick`](Self::tick) every `period` until [`Ticker::shutdown`].
    pub fn spawn_ticker(self: &Arc<Self>, period: Duration) -> Ticker {
        let tracker = Arc::clone(self);
        let stop = Arc::new(Notify::new());
        let stopped = Arc::clone(&stop);
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                // Only the wait is raced against the stop signal; a flush
                // started by a tick always runs to completion.
                tokio::select! {
                    _ = interval.tick() => {}
                    _ = stopped.notified() => break,
                }
                tracker.tick().await;
            }
        });
        Ticker { stop, handle }
    }

    /// Wait until no flush is running.
    pub async fn wait_flush_idle(&self) {
        let _guard = self.flush_guard.lock().await;
    }

    pub fn transport(&self) -> &Arc<dyn UnloadTransport> {
        &self.transport
    }

    pub fn queue(&self) -> &DurableQueue {
        &self.queue
    }

    pub fn flush_deadline(&self) -> Option<i64> {
        self.scheduler.lock().deadline()
    }

    pub async fn stats(&self) -> TrackerStats {
        TrackerStats {
            recorded: self.counters.recorded.load(Ordering::Relaxed),
            debounced: self.counters.debounced.load(Ordering::Relaxed),
            rejected: self.counters.rejected.load(Ordering::Relaxed),
            flushes: self.counters.flushes.load(Ordering::Relaxed),
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            pending: self.queue.len().await,
            degraded: self.queue.is_degraded(),
        }
    }
}
