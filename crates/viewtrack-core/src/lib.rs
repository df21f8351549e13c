//! Core types shared by every viewtrack crate.
//!
//! A [`ViewEvent`] is the unit that flows through the local queue; the four
//! [`AggregateRecord`] variants are the denormalized counter documents that
//! each event updates in the remote store.

pub mod aggregate;
pub mod clock;
pub mod event;

pub use aggregate::{
    AggregateKey, AggregateRecord, Collection, EventKeys, Increment, SubjectSummary,
    SubjectViewerDetail, ViewerSubjectDetail, ViewerSummary,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use event::{validate_id, InvalidId, ViewEvent};
