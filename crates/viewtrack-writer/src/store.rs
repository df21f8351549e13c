//! Remote aggregate document store abstraction.
//!
//! A transaction buffers its writes locally and the store validates on
//! commit that nothing it read has changed since (optimistic concurrency).
//! Reads must precede writes within one transaction.

use async_trait::async_trait;
use viewtrack_core::{AggregateKey, AggregateRecord, Collection, Increment};

use crate::error::Result;

#[async_trait]
pub trait AggregateStore: Send + Sync {
    /// Start a new read-then-write transaction.
    async fn begin(&self) -> Result<Box<dyn Transaction>>;

    /// Read a single document outside of any transaction.
    async fn get(&self, key: &AggregateKey) -> Result<Option<AggregateRecord>>;

    /// All documents of a collection as `(doc_id, record)` pairs, unordered.
    async fn list(&self, collection: &Collection) -> Result<Vec<(String, AggregateRecord)>>;
}

#[async_trait]
pub trait Transaction: Send {
    /// Read a document and register it for conflict detection.
    async fn get(&mut self, key: &AggregateKey) -> Result<Option<AggregateRecord>>;

    /// Stage creation of a document that must not exist at commit.
    fn create(&mut self, key: AggregateKey, record: AggregateRecord) -> Result<()>;

    /// Stage an increment of a document that must exist at commit.
    fn increment(&mut self, key: AggregateKey, delta: Increment) -> Result<()>;

    /// Apply every staged write atomically, or none of them.
    async fn commit(self: Box<Self>) -> Result<()>;
}
