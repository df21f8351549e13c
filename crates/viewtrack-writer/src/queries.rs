//! Read-only queries over the aggregate documents.

use std::cmp::Reverse;
use std::sync::Arc;

use serde::Serialize;
use viewtrack_core::{
    validate_id, AggregateKey, Collection, SubjectSummary, SubjectViewerDetail, ViewerSubjectDetail,
    ViewerSummary,
};

use crate::error::Result;
use crate::store::AggregateStore;

pub const DEFAULT_HISTORY_LIMIT: usize = 20;
pub const DEFAULT_TOP_VIEWERS_LIMIT: usize = 10;
pub const DEFAULT_TRENDING_LIMIT: usize = 10;
pub const DEFAULT_RECENT_LIMIT: usize = 10;
pub const DEFAULT_RECENT_DAYS: u32 = 30;

const MILLIS_PER_DAY: i64 = 24 * 60 * 60 * 1000;

/// Start of the "recently viewed" window ending at `now_millis`.
pub fn recent_window_start(now_millis: i64, days: u32) -> i64 {
    now_millis - i64::from(days) * MILLIS_PER_DAY
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryEntry {
    #[serde(rename = "subjectId")]
    pub subject_id: String,
    #[serde(flatten)]
    pub detail: ViewerSubjectDetail,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TopViewer {
    #[serde(rename = "viewerId")]
    pub viewer_id: String,
    #[serde(flatten)]
    pub detail: SubjectViewerDetail,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrendingSubject {
    #[serde(rename = "subjectId")]
    pub subject_id: String,
    #[serde(flatten)]
    pub summary: SubjectSummary,
}

#[derive(Clone)]
pub struct AnalyticsQueries {
    store: Arc<dyn AggregateStore>,
}

impl AnalyticsQueries {
    pub fn new(store: Arc<dyn AggregateStore>) -> Self {
        Self { store }
    }

    pub async fn get_subject_summary(&self, subject_id: &str) -> Result<Option<SubjectSummary>> {
        validate_id("subject_id", subject_id)?;
        let key = AggregateKey::SubjectSummary {
            subject_id: subject_id.to_string(),
        };
        let record = self.store.get(&key).await?;
        Ok(record.and_then(|r| r.as_subject_summary().copied()))
    }

    pub async fn get_viewer_summary(&self, viewer_id: &str) -> Result<Option<ViewerSummary>> {
        validate_id("viewer_id", viewer_id)?;
        let key = AggregateKey::ViewerSummary {
            viewer_id: viewer_id.to_string(),
        };
        let record = self.store.get(&key).await?;
        Ok(record.and_then(|r| r.as_viewer_summary().copied()))
    }

    /// Subjects a viewer looked at, most recent first.
    pub async fn get_viewer_history(
        &self,
        viewer_id: &str,
        limit: usize,
    ) -> Result<Vec<HistoryEntry>> {
        self.history_since(viewer_id, i64::MIN, limit).await
    }

    /// History restricted to views at or after `since_millis`.
    pub async fn get_recently_viewed(
        &self,
        viewer_id: &str,
        since_millis: i64,
        limit: usize,
    ) -> Result<Vec<HistoryEntry>> {
        self.history_since(viewer_id, since_millis, limit).await
    }

    async fn history_since(
        &self,
        viewer_id: &str,
        since_millis: i64,
        limit: usize,
    ) -> Result<Vec<HistoryEntry>> {
        validate_id("viewer_id", viewer_id)?;
        let docs = self
            .store
            .list(&Collection::ViewerHistory {
                viewer_id: viewer_id.to_string(),
            })
            .await?;

        let mut entries: Vec<HistoryEntry> = docs
            .into_iter()
            .filter_map(|(subject_id, record)| {
                record.as_viewer_subject().map(|detail| HistoryEntry {
                    subject_id,
                    detail: *detail,
                })
            })
            .filter(|entry| entry.detail.last_viewed >= since_millis)
            .collect();
        entries.sort_by(|a, b| {
            b.detail
                .last_viewed
                .cmp(&a.detail.last_viewed)
                .then_with(|| a.subject_id.cmp(&b.subject_id))
        });
        entries.truncate(limit);
        Ok(entries)
    }

    /// Viewers of a subject ordered by how often they looked at it.
    pub async fn get_top_viewers(&self, subject_id: &str, limit: usize) -> Result<Vec<TopViewer>> {
        validate_id("subject_id", subject_id)?;
        let docs = self
            .store
            .list(&Collection::SubjectViewers {
                subject_id: subject_id.to_string(),
            })
            .await?;

        let mut viewers: Vec<TopViewer> = docs
            .into_iter()
            .filter_map(|(viewer_id, record)| {
                record.as_subject_viewer().map(|detail| TopViewer {
                    viewer_id,
                    detail: *detail,
                })
            })
            .collect();
        viewers.sort_by_key(|v| (Reverse(v.detail.view_count), v.viewer_id.clone()));
        viewers.truncate(limit);
        Ok(viewers)
    }

    /// Subjects with the most total views.
    pub async fn get_trending(&self, limit: usize) -> Result<Vec<TrendingSubject>> {
        let docs = self.store.list(&Collection::SubjectSummaries).await?;

        let mut subjects: Vec<TrendingSubject> = docs
            .into_iter()
            .filter_map(|(subject_id, record)| {
                record.as_subject_summary().map(|summary| TrendingSubject {
                    subject_id,
                    summary: *summary,
                })
            })
            .collect();
        subjects.sort_by_key(|s| (Reverse(s.summary.total_views), s.subject_id.clone()));
        subjects.truncate(limit);
        Ok(subjects)
    }
}
