// Transactional aggregate updates for view events.
//
// Each event touches four documents in one transaction: the viewer's
// per-subject detail, the viewer summary, the subject's per-viewer detail
// and the subject summary. Summary "unique" counters only move when the
// matching detail document was absent inside the same transaction.

use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use tracing::{debug, warn, Span};
use viewtrack_core::{AggregateKey, Clock, EventKeys, Increment, ViewEvent};

use crate::error::{Result, WriterError};
use crate::store::{AggregateStore, Transaction};

pub const DEFAULT_MAX_TRANSACTION_ATTEMPTS: u32 = 5;

/// Outcome of processing a batch concurrently.
///
/// All three lists keep the input's relative order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub delivered: Vec<ViewEvent>,
    /// Transient failures; these should be retried later.
    pub failed: Vec<ViewEvent>,
    /// Events that can never be written (bad ids). Retrying is pointless.
    pub rejected: Vec<ViewEvent>,
}

impl BatchReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

pub struct AggregateWriter {
    store: Arc<dyn AggregateStore>,
    clock: Arc<dyn Clock>,
    max_attempts: u32,
}

impl AggregateWriter {
    pub fn new(store: Arc<dyn AggregateStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            max_attempts: DEFAULT_MAX_TRANSACTION_ATTEMPTS,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Apply one event, re-running the transaction on conflicts.
    #[tracing::instrument(
        name = "aggregate.process",
        skip(self, event),
        fields(
            viewer = %event.viewer_id,
            subject = %event.subject_id,
            attempts = tracing::field::Empty,
        )
    )]
    pub async fn process(&self, event: &ViewEvent) -> Result<()> {
        event.validate()?;
        let keys = EventKeys::for_event(event);

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.try_process(&keys).await {
                Ok(()) => {
                    Span::current().record("attempts", attempt);
                    return Ok(());
                }
                Err(err) if err.is_retryable() && attempt < self.max_attempts => {
                    debug!(attempt, error = %err, "transaction conflicted, retrying");
                    metrics::counter!("viewtrack.aggregate.conflicts").increment(1);
                }
                Err(err) => {
                    Span::current().record("attempts", attempt);
                    return Err(err);
                }
            }
        }
    }

    async fn try_process(&self, keys: &EventKeys) -> Result<()> {
        let mut txn = self.store.begin().await?;

        let viewer_subject = txn.get(&keys.viewer_subject).await?;
        let viewer_summary = txn.get(&keys.viewer_summary).await?;
        let subject_viewer = txn.get(&keys.subject_viewer).await?;
        let subject_summary = txn.get(&keys.subject_summary).await?;

        let now = self.clock.now_millis();
        let view = Increment::view(now);

        upsert(
            txn.as_mut(),
            &keys.viewer_subject,
            viewer_subject.is_some(),
            view,
        )?;
        upsert(
            txn.as_mut(),
            &keys.viewer_summary,
            viewer_summary.is_some(),
            view.with_unique(viewer_subject.is_none()),
        )?;
        upsert(
            txn.as_mut(),
            &keys.subject_viewer,
            subject_viewer.is_some(),
            view,
        )?;
        upsert(
            txn.as_mut(),
            &keys.subject_summary,
            subject_summary.is_some(),
            view.with_unique(subject_viewer.is_none()),
        )?;

        txn.commit().await
    }

    /// Process every event concurrently and wait for all of them.
    ///
    /// A failing event never aborts the others.
    #[tracing::instrument(name = "aggregate.process_batch", skip(self, events), fields(events = events.len()))]
    pub async fn process_batch(&self, events: Vec<ViewEvent>) -> BatchReport {
        let started = Instant::now();
        let results = join_all(events.iter().map(|event| self.process(event))).await;

        let mut report = BatchReport::default();
        for (event, result) in events.into_iter().zip(results) {
            match result {
                Ok(()) => report.delivered.push(event),
                Err(err @ WriterError::InvalidKey { .. }) => {
                    warn!(error = %err, code = err.code(), "dropping event with invalid ids");
                    report.rejected.push(event);
                }
                Err(err) => {
                    warn!(
                        error = %err,
                        code = err.code(),
                        viewer = %event.viewer_id,
                        subject = %event.subject_id,
                        "aggregate update failed"
                    );
                    report.failed.push(event);
                }
            }
        }

        metrics::counter!("viewtrack.aggregate.committed").increment(report.delivered.len() as u64);
        metrics::counter!("viewtrack.aggregate.failed").increment(report.failed.len() as u64);
        metrics::histogram!("viewtrack.aggregate.batch_ms")
            .record(started.elapsed().as_secs_f64() * 1000.0);

        report
    }
}

fn upsert(
    txn: &mut dyn Transaction,
    key: &AggregateKey,
    exists: bool,
    delta: Increment,
) -> Result<()> {
    if exists {
        txn.increment(key.clone(), delta)
    } else {
        txn.create(key.clone(), key.initial_record(delta.at_millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryAggregateStore;
    use std::sync::atomic::{AtomicU32, Ordering};
    use viewtrack_core::{AggregateRecord, Collection, ManualClock};

    fn writer(store: &MemoryAggregateStore, clock: &ManualClock) -> AggregateWriter {
        AggregateWriter::new(Arc::new(store.clone()), Arc::new(clock.clone()))
    }

    #[tokio::test]
    async fn counts_views_and_unique_pairs() {
        let store = MemoryAggregateStore::new();
        let clock = ManualClock::new(1_000);
        let writer = writer(&store, &clock);

        for _ in 0..3 {
            writer.process(&ViewEvent::new("u1", "p1", 0)).await.unwrap();
            clock.advance_millis(10);
        }
        writer.process(&ViewEvent::new("u2", "p1", 0)).await.unwrap();
        writer.process(&ViewEvent::new("u1", "p2", 0)).await.unwrap();

        let keys = EventKeys::new("u1", "p1");
        let detail = store.get(&keys.viewer_subject).await.unwrap().unwrap();
        let detail = detail.as_viewer_subject().unwrap();
        assert_eq!(detail.view_count, 3);
        assert_eq!(detail.first_viewed, 1_000);
        assert_eq!(detail.last_viewed, 1_020);

        let subject = store.get(&keys.subject_summary).await.unwrap().unwrap();
        let subject = subject.as_subject_summary().unwrap();
        assert_eq!(subject.total_views, 4);
        assert_eq!(subject.unique_viewers, 2);

        let viewer = store.get(&keys.viewer_summary).await.unwrap().unwrap();
        let viewer = viewer.as_viewer_summary().unwrap();
        assert_eq!(viewer.total_views, 4);
        assert_eq!(viewer.unique_subjects_viewed, 2);
    }

    #[tokio::test]
    async fn conflicts_are_retried() {
        let store = MemoryAggregateStore::new();
        let writer = writer(&store, &ManualClock::new(0));

        store.inject_conflicts(2);
        writer.process(&ViewEvent::new("u1", "p1", 0)).await.unwrap();
        assert_eq!(store.commit_count(), 1);
    }

    #[tokio::test]
    async fn conflicts_give_up_after_max_attempts() {
        let store = MemoryAggregateStore::new();
        let writer = writer(&store, &ManualClock::new(0)).with_max_attempts(3);

        store.inject_conflicts(3);
        let err = writer
            .process(&ViewEvent::new("u1", "p1", 0))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "E101");
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn unavailable_store_is_not_retried() {
        let store = MemoryAggregateStore::new();
        let writer = writer(&store, &ManualClock::new(0));

        store.fail_subject("p1");
        let err = writer
            .process(&ViewEvent::new("u1", "p1", 0))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "E102");
    }

    #[tokio::test]
    async fn batch_isolates_failures_and_keeps_order() {
        let store = MemoryAggregateStore::new();
        let writer = writer(&store, &ManualClock::new(0));
        store.fail_subject("bad");

        let events = vec![
            ViewEvent::new("u1", "bad", 1),
            ViewEvent::new("u1", "p1", 2),
            ViewEvent::new("u2", "bad", 3),
            ViewEvent::new("u3", "p2", 4),
            ViewEvent::new("", "p3", 5),
        ];
        let report = writer.process_batch(events.clone()).await;

        assert_eq!(report.delivered, vec![events[1].clone(), events[3].clone()]);
        assert_eq!(report.failed, vec![events[0].clone(), events[2].clone()]);
        assert_eq!(report.rejected, vec![events[4].clone()]);
        assert!(!report.is_complete());
    }

    /// Store whose transactions yield at every read and before commit, so
    /// concurrent transactions interleave even on a single-threaded runtime.
    struct InterleavingStore {
        inner: MemoryAggregateStore,
        conflicts: Arc<AtomicU32>,
    }

    struct InterleavingTransaction {
        inner: Box<dyn Transaction>,
        conflicts: Arc<AtomicU32>,
    }

    #[async_trait::async_trait]
    impl AggregateStore for InterleavingStore {
        async fn begin(&self) -> Result<Box<dyn Transaction>> {
            Ok(Box::new(InterleavingTransaction {
                inner: self.inner.begin().await?,
                conflicts: Arc::clone(&self.conflicts),
            }))
        }

        async fn get(&self, key: &AggregateKey) -> Result<Option<AggregateRecord>> {
            self.inner.get(key).await
        }

        async fn list(&self, collection: &Collection) -> Result<Vec<(String, AggregateRecord)>> {
            self.inner.list(collection).await
        }
    }

    #[async_trait::async_trait]
    impl Transaction for InterleavingTransaction {
        async fn get(&mut self, key: &AggregateKey) -> Result<Option<AggregateRecord>> {
            tokio::task::yield_now().await;
            self.inner.get(key).await
        }

        fn create(&mut self, key: AggregateKey, record: AggregateRecord) -> Result<()> {
            self.inner.create(key, record)
        }

        fn increment(&mut self, key: AggregateKey, delta: Increment) -> Result<()> {
            self.inner.increment(key, delta)
        }

        async fn commit(self: Box<Self>) -> Result<()> {
            tokio::task::yield_now().await;
            let this = *self;
            let result = this.inner.commit().await;
            if matches!(result, Err(ref err) if err.is_retryable()) {
                this.conflicts.fetch_add(1, Ordering::SeqCst);
            }
            result
        }
    }

    #[tokio::test]
    async fn interleaved_first_views_count_unique_once() {
        let store = MemoryAggregateStore::new();
        let conflicts = Arc::new(AtomicU32::new(0));
        let interleaving = InterleavingStore {
            inner: store.clone(),
            conflicts: Arc::clone(&conflicts),
        };
        let writer = AggregateWriter::new(Arc::new(interleaving), Arc::new(ManualClock::new(0)))
            .with_max_attempts(10);

        let events = vec![ViewEvent::new("u1", "p1", 0); 8];
        let report = writer.process_batch(events).await;

        assert!(conflicts.load(Ordering::SeqCst) > 0);
        assert_eq!(report.delivered.len(), 8);
        assert!(report.failed.is_empty());

        let keys = EventKeys::new("u1", "p1");
        let subject = store.get(&keys.subject_summary).await.unwrap().unwrap();
        let subject = subject.as_subject_summary().unwrap();
        assert_eq!(subject.total_views, report.delivered.len() as u64);
        assert_eq!(subject.unique_viewers, 1);

        let viewer = store.get(&keys.viewer_summary).await.unwrap().unwrap();
        let viewer = viewer.as_viewer_summary().unwrap();
        assert_eq!(viewer.total_views, 8);
        assert_eq!(viewer.unique_subjects_viewed, 1);
    }

    #[tokio::test]
    async fn interleaved_views_with_few_attempts_never_overcount() {
        let store = MemoryAggregateStore::new();
        let interleaving = InterleavingStore {
            inner: store.clone(),
            conflicts: Arc::new(AtomicU32::new(0)),
        };
        let writer = AggregateWriter::new(Arc::new(interleaving), Arc::new(ManualClock::new(0)))
            .with_max_attempts(2);

        let report = writer
            .process_batch(vec![ViewEvent::new("u1", "p1", 0); 8])
            .await;
        assert_eq!(report.delivered.len() + report.failed.len(), 8);
        assert!(!report.failed.is_empty());

        let keys = EventKeys::new("u1", "p1");
        let subject = store.get(&keys.subject_summary).await.unwrap().unwrap();
        let subject = subject.as_subject_summary().unwrap();
        assert_eq!(subject.total_views, report.delivered.len() as u64);
        assert_eq!(subject.unique_viewers, 1);
    }
}
