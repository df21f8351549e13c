//! Aggregate writer for viewtrack.
//!
//! Turns view events into transactional counter updates against an
//! [`AggregateStore`] and exposes the read-side [`AnalyticsQueries`].

mod error;
mod memory;
pub mod queries;
mod store;
mod write;

pub use error::{ErrorCode, Result, WriterError};
pub use memory::MemoryAggregateStore;
pub use queries::{AnalyticsQueries, HistoryEntry, TopViewer, TrendingSubject};
pub use store::{AggregateStore, Transaction};
pub use write::{AggregateWriter, BatchReport, DEFAULT_MAX_TRANSACTION_ATTEMPTS};
