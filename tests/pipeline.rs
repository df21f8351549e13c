// End-to-end: filesystem-backed queue, restarts and aggregate queries

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use viewtrack_batch::{
    DisabledTransport, FlushOutcome, OpendalQueueStore, QueueSnapshot, TrackerConfig,
    UnloadOutcome, ViewTracker,
};
use viewtrack_core::ManualClock;
use viewtrack_writer::{AggregateWriter, AnalyticsQueries, MemoryAggregateStore};

const START: i64 = 1_700_000_000_000;
const QUEUE_KEY: &str = "analyticsQueue.json";

struct Node {
    dir: TempDir,
    clock: ManualClock,
    store: MemoryAggregateStore,
}

impl Node {
    fn new() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
            clock: ManualClock::new(START),
            store: MemoryAggregateStore::new(),
        }
    }

    /// Open a tracker over the same queue directory and aggregate store,
    /// as a fresh process would.
    async fn boot(&self) -> ViewTracker {
        let root = self.dir.path().to_string_lossy().to_string();
        let queue_store = Arc::new(OpendalQueueStore::fs(&root, QUEUE_KEY).unwrap());
        let clock = Arc::new(self.clock.clone());
        let writer = Arc::new(AggregateWriter::new(
            Arc::new(self.store.clone()),
            clock.clone(),
        ));
        ViewTracker::open(
            TrackerConfig::default(),
            clock,
            queue_store,
            writer,
            Arc::new(DisabledTransport),
        )
        .await
    }

    fn queries(&self) -> AnalyticsQueries {
        AnalyticsQueries::new(Arc::new(self.store.clone()))
    }

    fn snapshot_on_disk(&self) -> Option<QueueSnapshot> {
        let path = self.dir.path().join(QUEUE_KEY);
        std::fs::read(path)
            .ok()
            .map(|bytes| QueueSnapshot::decode(&bytes).unwrap())
    }
}

#[tokio::test]
async fn views_survive_a_crash_and_flush_after_restart() {
    let node = Node::new();

    {
        let tracker = node.boot().await;
        tracker.record_view("alice", "lamp").await;
        tracker.record_view("alice", "desk").await;
        tracker.record_view("bob", "lamp").await;
        // Dropped without flushing.
    }

    let on_disk = node.snapshot_on_disk().unwrap();
    assert_eq!(on_disk.pending.len(), 3);
    assert!(node.store.is_empty());

    let tracker = node.boot().await;
    assert_eq!(tracker.queue().len().await, 3);
    assert!(tracker.flush_deadline().is_some());

    node.clock.advance(Duration::from_secs(60));
    let outcome = tracker.tick().await;
    assert_eq!(
        outcome,
        Some(FlushOutcome::Completed {
            delivered: 3,
            failed: 0
        })
    );

    let queries = node.queries();
    let lamp = queries.get_subject_summary("lamp").await.unwrap().unwrap();
    assert_eq!(lamp.total_views, 2);
    assert_eq!(lamp.unique_viewers, 2);

    let alice = queries.get_viewer_summary("alice").await.unwrap().unwrap();
    assert_eq!(alice.total_views, 2);
    assert_eq!(alice.unique_subjects_viewed, 2);

    assert!(tracker.queue().is_empty().await);
    assert!(node.snapshot_on_disk().is_none());
}

#[tokio::test]
async fn shutdown_without_beacon_keeps_events_for_next_run() {
    let node = Node::new();

    let tracker = node.boot().await;
    tracker.record_view("carol", "chair").await;
    assert_eq!(
        tracker.flush_on_unload().await,
        UnloadOutcome::WrittenBack { events: 1 }
    );
    drop(tracker);

    let tracker = node.boot().await;
    assert_eq!(tracker.queue().len().await, 1);
    assert_eq!(
        tracker.flush().await,
        FlushOutcome::Completed {
            delivered: 1,
            failed: 0
        }
    );

    let history = node
        .queries()
        .get_viewer_history("carol", 10)
        .await
        .unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].subject_id, "chair");
}

#[tokio::test]
async fn store_outage_keeps_failed_views_on_disk() {
    let node = Node::new();
    node.store.fail_subject("desk");

    let tracker = node.boot().await;
    tracker.record_view("dave", "lamp").await;
    tracker.record_view("dave", "desk").await;
    assert_eq!(
        tracker.flush().await,
        FlushOutcome::Completed {
            delivered: 1,
            failed: 1
        }
    );

    let on_disk = node.snapshot_on_disk().unwrap();
    assert_eq!(on_disk.pending.len(), 1);
    assert_eq!(on_disk.pending[0].subject_id, "desk");
    drop(tracker);

    node.store.heal_all();
    let tracker = node.boot().await;
    tracker.flush().await;

    let desk = node
        .queries()
        .get_subject_summary("desk")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(desk.total_views, 1);
    assert!(node.snapshot_on_disk().is_none());
}
