// In-process aggregate store with optimistic transactions.
//
// Used by the server binary and by tests. Fault injection hooks let tests
// simulate an unreachable store for selected subjects and force conflicts.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use viewtrack_core::{AggregateKey, AggregateRecord, Collection, Increment};

use crate::error::{Result, WriterError};
use crate::store::{AggregateStore, Transaction};

#[derive(Debug, Clone)]
struct Versioned {
    version: u64,
    record: AggregateRecord,
}

#[derive(Debug, Default)]
struct Inner {
    docs: BTreeMap<AggregateKey, Versioned>,
    next_version: u64,
    commits: u64,
    failing_subjects: HashSet<String>,
    forced_conflicts: u32,
}

/// Shared, clonable handle to an in-memory document store.
#[derive(Debug, Clone, Default)]
pub struct MemoryAggregateStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryAggregateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every commit touching `subject_id` fail as unavailable.
    pub fn fail_subject(&self, subject_id: impl Into<String>) {
        self.inner.lock().failing_subjects.insert(subject_id.into());
    }

    pub fn heal_subject(&self, subject_id: &str) {
        self.inner.lock().failing_subjects.remove(subject_id);
    }

    pub fn heal_all(&self) {
        self.inner.lock().failing_subjects.clear();
    }

    /// Fail the next `count` commits with a conflict.
    pub fn inject_conflicts(&self, count: u32) {
        self.inner.lock().forced_conflicts = count;
    }

    /// Number of successful commits so far.
    pub fn commit_count(&self) -> u64 {
        self.inner.lock().commits
    }

    pub fn len(&self) -> usize {
        self.inner.lock().docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl AggregateStore for MemoryAggregateStore {
    async fn begin(&self) -> Result<Box<dyn Transaction>> {
        Ok(Box::new(MemoryTransaction {
            inner: Arc::clone(&self.inner),
            reads: HashMap::new(),
            writes: Vec::new(),
        }))
    }

    async fn get(&self, key: &AggregateKey) -> Result<Option<AggregateRecord>> {
        Ok(self.inner.lock().docs.get(key).map(|doc| doc.record))
    }

    async fn list(&self, collection: &Collection) -> Result<Vec<(String, AggregateRecord)>> {
        let inner = self.inner.lock();
        Ok(inner
            .docs
            .iter()
            .filter(|(key, _)| key.collection() == *collection)
            .map(|(key, doc)| (key.doc_id().to_string(), doc.record))
            .collect())
    }
}

#[derive(Debug, Clone, Copy)]
enum StagedWrite {
    Create(AggregateRecord),
    Increment(Increment),
}

struct MemoryTransaction {
    inner: Arc<Mutex<Inner>>,
    /// Version observed per key; `None` means the document was absent.
    reads: HashMap<AggregateKey, Option<u64>>,
    writes: Vec<(AggregateKey, StagedWrite)>,
}

impl MemoryTransaction {
    fn stage(&mut self, key: AggregateKey, write: StagedWrite) -> Result<()> {
        if let StagedWrite::Create(ref record) = write {
            if !key.matches(record) {
                return Err(WriterError::write_rejected(
                    key.path(),
                    "record kind does not match key",
                ));
            }
        }
        self.writes.push((key, write));
        Ok(())
    }
}

#[async_trait]
impl Transaction for MemoryTransaction {
    async fn get(&mut self, key: &AggregateKey) -> Result<Option<AggregateRecord>> {
        if !self.writes.is_empty() {
            return Err(WriterError::write_rejected(
                key.path(),
                "reads must happen before writes in a transaction",
            ));
        }
        let doc = self.inner.lock().docs.get(key).cloned();
        self.reads
            .insert(key.clone(), doc.as_ref().map(|doc| doc.version));
        Ok(doc.map(|doc| doc.record))
    }

    fn create(&mut self, key: AggregateKey, record: AggregateRecord) -> Result<()> {
        self.stage(key, StagedWrite::Create(record))
    }

    fn increment(&mut self, key: AggregateKey, delta: Increment) -> Result<()> {
        self.stage(key, StagedWrite::Increment(delta))
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let MemoryTransaction {
            inner,
            reads,
            writes,
        } = *self;
        let mut inner = inner.lock();

        let touched = reads.keys().chain(writes.iter().map(|(key, _)| key));
        for key in touched {
            if let Some(subject) = subject_of(key) {
                if inner.failing_subjects.contains(subject) {
                    return Err(WriterError::store_unavailable(format!(
                        "commit touching {} refused",
                        key
                    )));
                }
            }
        }

        if inner.forced_conflicts > 0 {
            inner.forced_conflicts -= 1;
            let path = writes
                .first()
                .map(|(key, _)| key.path())
                .unwrap_or_default();
            return Err(WriterError::conflict(path));
        }

        for (key, observed) in &reads {
            let current = inner.docs.get(key).map(|doc| doc.version);
            if current != *observed {
                return Err(WriterError::conflict(key.path()));
            }
        }

        // Stage into a scratch map first so a rejected write leaves nothing applied.
        let mut staged: BTreeMap<AggregateKey, AggregateRecord> = BTreeMap::new();
        for (key, write) in writes {
            let current = staged
                .get(&key)
                .copied()
                .or_else(|| inner.docs.get(&key).map(|doc| doc.record));
            let next = match (write, current) {
                (StagedWrite::Create(record), None) => record,
                (StagedWrite::Create(_), Some(_)) => {
                    return Err(WriterError::conflict(key.path()));
                }
                (StagedWrite::Increment(delta), Some(mut record)) => {
                    record.apply(&delta);
                    record
                }
                (StagedWrite::Increment(_), None) => {
                    return Err(WriterError::write_rejected(
                        key.path(),
                        "cannot increment a missing document",
                    ));
                }
            };
            staged.insert(key, next);
        }

        for (key, record) in staged {
            inner.next_version += 1;
            let version = inner.next_version;
            inner.docs.insert(key, Versioned { version, record });
        }
        inner.commits += 1;
        Ok(())
    }
}

fn subject_of(key: &AggregateKey) -> Option<&str> {
    match key {
        AggregateKey::ViewerSubject { subject_id, .. }
        | AggregateKey::SubjectViewer { subject_id, .. }
        | AggregateKey::SubjectSummary { subject_id } => Some(subject_id),
        AggregateKey::ViewerSummary { .. } => None,
    }
}
