// Durable local queue of pending view events.
//
// Every mutation rewrites the persisted snapshot before returning. Drained
// events are kept in a persisted in-flight list until the flush settles, so a
// crash mid-flush replays them on the next open. Storage failures never reach
// callers: the queue keeps working in memory and logs the degradation.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use opendal::{services, Operator};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use viewtrack_core::ViewEvent;

use crate::error::QueueError;

pub const SNAPSHOT_VERSION: u32 = 1;

/// Byte-level persistence for the queue snapshot.
#[async_trait]
pub trait QueueStore: Send + Sync {
    async fn save(&self, bytes: Vec<u8>) -> Result<(), QueueError>;
    async fn load(&self) -> Result<Option<Vec<u8>>, QueueError>;
    async fn clear(&self) -> Result<(), QueueError>;
}

/// Queue snapshot stored as a single object through OpenDAL.
#[derive(Clone)]
pub struct OpendalQueueStore {
    operator: Operator,
    key: String,
}

impl OpendalQueueStore {
    pub fn new(operator: Operator, key: impl Into<String>) -> Self {
        Self {
            operator,
            key: key.into(),
        }
    }

    /// Filesystem-backed store rooted at `root`.
    pub fn fs(root: &str, key: impl Into<String>) -> Result<Self, QueueError> {
        let key = key.into();
        let builder = services::Fs::default().root(root);
        let operator = Operator::new(builder)
            .map_err(|e| QueueError::storage(key.clone(), e))?
            .finish();
        Ok(Self::new(operator, key))
    }

    pub fn memory(key: impl Into<String>) -> Result<Self, QueueError> {
        let key = key.into();
        let operator = Operator::new(services::Memory::default())
            .map_err(|e| QueueError::storage(key.clone(), e))?
            .finish();
        Ok(Self::new(operator, key))
    }
}

#[async_trait]
impl QueueStore for OpendalQueueStore {
    async fn save(&self, bytes: Vec<u8>) -> Result<(), QueueError> {
        self.operator
            .write(&self.key, bytes)
            .await
            .map_err(|e| QueueError::storage(self.key.clone(), e))?;
        Ok(())
    }

    async fn load(&self) -> Result<Option<Vec<u8>>, QueueError> {
        match self.operator.read(&self.key).await {
            Ok(buffer) => Ok(Some(buffer.to_vec())),
            Err(e) if e.kind() == opendal::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(QueueError::storage(self.key.clone(), e)),
        }
    }

    async fn clear(&self) -> Result<(), QueueError> {
        match self.operator.delete(&self.key).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == opendal::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(QueueError::storage(self.key.clone(), e)),
        }
    }
}

/// Persisted form of the queue.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueSnapshot {
    pub version: u32,
    #[serde(default)]
    pub pending: Vec<ViewEvent>,
    #[serde(default)]
    pub in_flight: Vec<ViewEvent>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StoredSnapshot {
    Current(QueueSnapshot),
    /// Bare event array written by older clients.
    Legacy(Vec<ViewEvent>),
}

impl QueueSnapshot {
    pub fn decode(bytes: &[u8]) -> Result<Self, QueueError> {
        let stored: StoredSnapshot =
            serde_json::from_slice(bytes).map_err(QueueError::serialization)?;
        Ok(match stored {
            StoredSnapshot::Current(snapshot) => snapshot,
            StoredSnapshot::Legacy(pending) => QueueSnapshot {
                version: SNAPSHOT_VERSION,
                pending,
                in_flight: Vec::new(),
            },
        })
    }

    pub fn encode(&self) -> Result<Vec<u8>, QueueError> {
        serde_json::to_vec(self).map_err(QueueError::serialization)
    }
}

#[derive(Debug, Default)]
struct QueueState {
    pending: VecDeque<ViewEvent>,
    in_flight: Vec<ViewEvent>,
}

impl QueueState {
    fn is_empty(&self) -> bool {
        self.pending.is_empty() && self.in_flight.is_empty()
    }

    fn snapshot(&self) -> QueueSnapshot {
        QueueSnapshot {
            version: SNAPSHOT_VERSION,
            pending: self.pending.iter().cloned().collect(),
            in_flight: self.in_flight.clone(),
        }
    }

    /// Drop one in-flight occurrence of each settled event.
    fn settle_in_flight(&mut self, events: &[ViewEvent]) {
        for event in events {
            if let Some(pos) = self.in_flight.iter().position(|e| e == event) {
                self.in_flight.remove(pos);
            }
        }
    }

    fn push_front_all(&mut self, events: Vec<ViewEvent>) {
        for event in events.into_iter().rev() {
            self.pending.push_front(event);
        }
    }
}

pub struct DurableQueue {
    store: Arc<dyn QueueStore>,
    state: Mutex<QueueState>,
    degraded: AtomicBool,
    /// A stored snapshot exists that could not be read at open. It is left
    /// untouched until a later load succeeds and merges it.
    unread: AtomicBool,
}

impl DurableQueue {
    /// Rehydrate from `store`. Never fails: unreadable or malformed state
    /// yields an empty queue.
    pub async fn open(store: Arc<dyn QueueStore>) -> Self {
        let mut degraded = false;
        let mut recovered = false;
        let mut state = QueueState::default();

        match store.load().await {
            Ok(Some(bytes)) => match QueueSnapshot::decode(&bytes) {
                Ok(snapshot) => {
                    state.pending = snapshot.pending.into();
                    if !snapshot.in_flight.is_empty() {
                        info!(
                            recovered = snapshot.in_flight.len(),
                            "Recovering events from an interrupted flush"
                        );
                        state.push_front_all(snapshot.in_flight);
                        recovered = true;
                    }
                }
                Err(err) => {
                    warn!(error = %err, code = err.code(), "Discarding malformed queue snapshot");
                    if let Err(err) = store.clear().await {
                        warn!(error = %err, "Failed to clear malformed queue snapshot");
                    }
                }
            },
            Ok(None) => {}
            Err(err) => {
                warn!(
                    error = %err,
                    code = err.code(),
                    "Queue storage unreadable; starting empty and keeping stored snapshot"
                );
                degraded = true;
            }
        }

        debug!(pending = state.pending.len(), "Queue opened");
        let queue = Self {
            store,
            state: Mutex::new(state),
            degraded: AtomicBool::new(degraded),
            unread: AtomicBool::new(degraded),
        };

        // Rewrite so recovered in-flight events are stored as pending.
        if recovered {
            let mut state = queue.state.lock().await;
            queue.persist(&mut state).await;
            drop(state);
        }
        queue
    }

    /// Append an event; returns the new pending length.
    pub async fn enqueue(&self, event: ViewEvent) -> usize {
        let mut state = self.state.lock().await;
        state.pending.push_back(event);
        self.persist(&mut state).await;
        state.pending.len()
    }

    /// Take every pending event, recording them as in-flight.
    pub async fn drain_all(&self) -> Vec<ViewEvent> {
        let mut state = self.state.lock().await;
        if state.pending.is_empty() {
            return Vec::new();
        }
        let events: Vec<ViewEvent> = state.pending.drain(..).collect();
        state.in_flight.extend(events.iter().cloned());
        self.persist(&mut state).await;
        events
    }

    /// Put events back at the head, ahead of anything enqueued since the drain.
    pub async fn requeue_front(&self, events: Vec<ViewEvent>) {
        let mut state = self.state.lock().await;
        state.settle_in_flight(&events);
        state.push_front_all(events);
        self.persist(&mut state).await;
    }

    /// Forget in-flight events that were delivered.
    pub async fn acknowledge(&self, events: &[ViewEvent]) {
        let mut state = self.state.lock().await;
        state.settle_in_flight(events);
        self.persist(&mut state).await;
    }

    /// Acknowledge `delivered` and requeue `failed` in one persisted step.
    pub async fn settle(&self, delivered: &[ViewEvent], failed: Vec<ViewEvent>) {
        let mut state = self.state.lock().await;
        state.settle_in_flight(delivered);
        state.settle_in_flight(&failed);
        state.push_front_all(failed);
        self.persist(&mut state).await;
    }

    /// Number of pending (not in-flight) events.
    pub async fn len(&self) -> usize {
        self.state.lock().await.pending.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn in_flight_len(&self) -> usize {
        self.state.lock().await.in_flight.len()
    }

    pub async fn snapshot(&self) -> QueueSnapshot {
        self.state.lock().await.snapshot()
    }

    /// Whether the last persistence attempt failed.
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Relaxed)
    }

    async fn persist(&self, state: &mut QueueState) {
        if self.unread.load(Ordering::Relaxed) && !self.merge_unread(state).await {
            metrics::counter!("viewtrack.queue.persist_failures").increment(1);
            debug!("Stored snapshot still unreadable; not overwriting it");
            return;
        }

        let result = if state.is_empty() {
            self.store.clear().await
        } else {
            match state.snapshot().encode() {
                Ok(bytes) => self.store.save(bytes).await,
                Err(err) => Err(err),
            }
        };

        match result {
            Ok(()) => {
                if self.degraded.swap(false, Ordering::Relaxed) {
                    info!("Queue persistence restored");
                }
            }
            Err(err) => {
                metrics::counter!("viewtrack.queue.persist_failures").increment(1);
                if !self.degraded.swap(true, Ordering::Relaxed) {
                    warn!(
                        error = %err,
                        code = err.code(),
                        "Queue persistence failed; continuing in memory"
                    );
                } else {
                    debug!(error = %err, "Queue persistence still failing");
                }
            }
        }
    }

    /// Retry reading a snapshot that was unreadable at open and put its
    /// events ahead of everything queued since. Returns false while the
    /// store still cannot be read.
    async fn merge_unread(&self, state: &mut QueueState) -> bool {
        match self.store.load().await {
            Ok(Some(bytes)) => match QueueSnapshot::decode(&bytes) {
                Ok(snapshot) => {
                    let mut stored = snapshot.in_flight;
                    stored.extend(snapshot.pending);
                    info!(restored = stored.len(), "Merged previously unreadable queue snapshot");
                    state.push_front_all(stored);
                }
                Err(err) => {
                    warn!(error = %err, code = err.code(), "Discarding malformed queue snapshot");
                }
            },
            Ok(None) => {}
            Err(err) => {
                self.degraded.store(true, Ordering::Relaxed);
                debug!(error = %err, "Queue storage still unreadable");
                return false;
            }
        }
        self.unread.store(false, Ordering::Relaxed);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(n: i64) -> ViewEvent {
        ViewEvent::new(format!("u{}", n), "p1", n)
    }

    fn memory_store() -> Arc<OpendalQueueStore> {
        Arc::new(OpendalQueueStore::memory("analyticsQueue.json").unwrap())
    }

    /// Store whose operations can be switched to fail.
    #[derive(Default)]
    struct FlakyStore {
        failing: AtomicBool,
        failing_loads: AtomicBool,
        saved: parking_lot::Mutex<Option<Vec<u8>>>,
    }

    #[async_trait]
    impl QueueStore for FlakyStore {
        async fn save(&self, bytes: Vec<u8>) -> Result<(), QueueError> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(QueueError::storage(
                    "q",
                    opendal::Error::new(opendal::ErrorKind::Unexpected, "quota exceeded"),
                ));
            }
            *self.saved.lock() = Some(bytes);
            Ok(())
        }

        async fn load(&self) -> Result<Option<Vec<u8>>, QueueError> {
            if self.failing_loads.load(Ordering::SeqCst) {
                return Err(QueueError::storage(
                    "q",
                    opendal::Error::new(opendal::ErrorKind::Unexpected, "connection reset"),
                ));
            }
            Ok(self.saved.lock().clone())
        }

        async fn clear(&self) -> Result<(), QueueError> {
            *self.saved.lock() = None;
            Ok(())
        }
    }

    #[tokio::test]
    async fn enqueue_is_persisted_before_returning() {
        let store = memory_store();
        let queue = DurableQueue::open(store.clone()).await;
        assert_eq!(queue.enqueue(event(1)).await, 1);
        assert_eq!(queue.enqueue(event(2)).await, 2);

        let reopened = DurableQueue::open(store).await;
        assert_eq!(reopened.snapshot().await.pending, vec![event(1), event(2)]);
    }

    #[tokio::test]
    async fn requeue_goes_ahead_of_new_events() {
        let queue = DurableQueue::open(memory_store()).await;
        queue.enqueue(event(1)).await;
        queue.enqueue(event(2)).await;

        let drained = queue.drain_all().await;
        assert!(queue.is_empty().await);
        assert_eq!(queue.in_flight_len().await, 2);

        queue.enqueue(event(3)).await;
        queue.requeue_front(drained).await;

        let snapshot = queue.snapshot().await;
        assert_eq!(snapshot.pending, vec![event(1), event(2), event(3)]);
        assert!(snapshot.in_flight.is_empty());
    }

    #[tokio::test]
    async fn settle_acknowledges_and_requeues_together() {
        let store = memory_store();
        let queue = DurableQueue::open(store.clone()).await;
        for n in 1..=3 {
            queue.enqueue(event(n)).await;
        }
        let drained = queue.drain_all().await;

        queue
            .settle(&[drained[0].clone(), drained[2].clone()], vec![drained[1].clone()])
            .await;

        let reopened = DurableQueue::open(store).await;
        let snapshot = reopened.snapshot().await;
        assert_eq!(snapshot.pending, vec![event(2)]);
        assert!(snapshot.in_flight.is_empty());
    }

    #[tokio::test]
    async fn drained_and_acknowledged_queue_reopens_empty() {
        let store = memory_store();
        let queue = DurableQueue::open(store.clone()).await;
        queue.enqueue(event(1)).await;
        let drained = queue.drain_all().await;
        queue.acknowledge(&drained).await;

        assert!(store.load().await.unwrap().is_none());
        assert!(DurableQueue::open(store).await.is_empty().await);
    }

    #[tokio::test]
    async fn crash_mid_flush_recovers_in_flight_at_head() {
        let store = memory_store();
        let queue = DurableQueue::open(store.clone()).await;
        queue.enqueue(event(1)).await;
        queue.enqueue(event(2)).await;
        let _drained = queue.drain_all().await;
        queue.enqueue(event(3)).await;
        drop(queue);

        let reopened = DurableQueue::open(store.clone()).await;
        let snapshot = reopened.snapshot().await;
        assert_eq!(snapshot.pending, vec![event(1), event(2), event(3)]);
        assert!(snapshot.in_flight.is_empty());

        let stored = QueueSnapshot::decode(&store.load().await.unwrap().unwrap()).unwrap();
        assert!(stored.in_flight.is_empty());
        assert_eq!(stored.pending.len(), 3);
    }

    #[tokio::test]
    async fn malformed_snapshot_starts_empty_and_is_cleared() {
        let store = memory_store();
        store.save(b"{not json".to_vec()).await.unwrap();

        let queue = DurableQueue::open(store.clone()).await;
        assert!(queue.is_empty().await);
        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn legacy_array_snapshot_is_accepted() {
        let store = memory_store();
        let legacy = br#"[{"userId":"u1","productId":"p1","timestamp":1700000000000}]"#;
        store.save(legacy.to_vec()).await.unwrap();

        let queue = DurableQueue::open(store).await;
        assert_eq!(
            queue.snapshot().await.pending,
            vec![ViewEvent::new("u1", "p1", 1_700_000_000_000)]
        );
    }

    #[tokio::test]
    async fn persistence_failure_keeps_queue_working_in_memory() {
        let store = Arc::new(FlakyStore::default());
        let queue = DurableQueue::open(store.clone()).await;
        queue.enqueue(event(1)).await;

        store.failing.store(true, Ordering::SeqCst);
        assert_eq!(queue.enqueue(event(2)).await, 2);
        assert!(queue.is_degraded());
        assert_eq!(queue.len().await, 2);

        store.failing.store(false, Ordering::SeqCst);
        queue.enqueue(event(3)).await;
        assert!(!queue.is_degraded());

        let reopened = DurableQueue::open(store).await;
        assert_eq!(reopened.len().await, 3);
    }

    #[tokio::test]
    async fn unreadable_snapshot_is_kept_and_merged_once_readable() {
        let store = Arc::new(FlakyStore::default());
        DurableQueue::open(store.clone()).await.enqueue(event(1)).await;
        let stored = store.saved.lock().clone();

        store.failing_loads.store(true, Ordering::SeqCst);
        let queue = DurableQueue::open(store.clone()).await;
        assert!(queue.is_empty().await);
        assert!(queue.is_degraded());

        queue.enqueue(event(2)).await;
        assert_eq!(*store.saved.lock(), stored);

        store.failing_loads.store(false, Ordering::SeqCst);
        queue.enqueue(event(3)).await;
        assert!(!queue.is_degraded());
        assert_eq!(
            queue.snapshot().await.pending,
            vec![event(1), event(2), event(3)]
        );

        let reopened = DurableQueue::open(store).await;
        assert_eq!(reopened.len().await, 3);
    }

    #[tokio::test]
    async fn fs_store_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_str().unwrap();

        let queue = DurableQueue::open(Arc::new(OpendalQueueStore::fs(root, "q.json").unwrap())).await;
        queue.enqueue(event(7)).await;
        drop(queue);

        assert!(dir.path().join("q.json").exists());
        let reopened =
            DurableQueue::open(Arc::new(OpendalQueueStore::fs(root, "q.json").unwrap())).await;
        assert_eq!(reopened.snapshot().await.pending, vec![event(7)]);
    }
}
