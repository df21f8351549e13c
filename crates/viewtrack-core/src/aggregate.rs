// Aggregate counter documents and the keys they live under.
//
// Every view event touches exactly four documents:
//   users/{viewer}/analytics/products/{subject}   ViewerSubjectDetail
//   users/{viewer}/analytics/summary              ViewerSummary
//   products/{subject}/analytics/users/{viewer}   SubjectViewerDetail
//   products/{subject}/analytics/summary          SubjectSummary

use serde::{Deserialize, Serialize};

use crate::event::ViewEvent;

/// Per-(viewer, subject) view history entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewerSubjectDetail {
    pub view_count: u64,
    pub first_viewed: i64,
    pub last_viewed: i64,
}

/// Per-viewer activity summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewerSummary {
    pub total_views: u64,
    #[serde(alias = "uniqueProductsViewed")]
    pub unique_subjects_viewed: u64,
    pub last_activity: i64,
}

/// Per-(subject, viewer) entry used for "top viewers".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectViewerDetail {
    pub view_count: u64,
    pub last_viewed: i64,
}

/// Per-subject view summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectSummary {
    pub total_views: u64,
    pub unique_viewers: u64,
    pub last_viewed: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AggregateRecord {
    ViewerSubject(ViewerSubjectDetail),
    ViewerSummary(ViewerSummary),
    SubjectViewer(SubjectViewerDetail),
    SubjectSummary(SubjectSummary),
}

/// Delta applied to an existing record.
///
/// `unique` only affects the two summary variants; detail records ignore it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Increment {
    pub views: u64,
    pub unique: u64,
    pub at_millis: i64,
}

impl Increment {
    pub fn view(at_millis: i64) -> Self {
        Self {
            views: 1,
            unique: 0,
            at_millis,
        }
    }

    pub fn with_unique(mut self, first_time: bool) -> Self {
        self.unique = u64::from(first_time);
        self
    }
}

impl AggregateRecord {
    /// Apply an increment in place. Activity timestamps never move backwards,
    /// so commits landing out of order keep the latest value.
    pub fn apply(&mut self, delta: &Increment) {
        match self {
            AggregateRecord::ViewerSubject(d) => {
                d.view_count += delta.views;
                d.last_viewed = d.last_viewed.max(delta.at_millis);
            }
            AggregateRecord::ViewerSummary(s) => {
                s.total_views += delta.views;
                s.unique_subjects_viewed += delta.unique;
                s.last_activity = s.last_activity.max(delta.at_millis);
            }
            AggregateRecord::SubjectViewer(d) => {
                d.view_count += delta.views;
                d.last_viewed = d.last_viewed.max(delta.at_millis);
            }
            AggregateRecord::SubjectSummary(s) => {
                s.total_views += delta.views;
                s.unique_viewers += delta.unique;
                s.last_viewed = s.last_viewed.max(delta.at_millis);
            }
        }
    }

    pub fn as_viewer_subject(&self) -> Option<&ViewerSubjectDetail> {
        match self {
            AggregateRecord::ViewerSubject(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_viewer_summary(&self) -> Option<&ViewerSummary> {
        match self {
            AggregateRecord::ViewerSummary(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_subject_viewer(&self) -> Option<&SubjectViewerDetail> {
        match self {
            AggregateRecord::SubjectViewer(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_subject_summary(&self) -> Option<&SubjectSummary> {
        match self {
            AggregateRecord::SubjectSummary(s) => Some(s),
            _ => None,
        }
    }
}

/// Address of one aggregate document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AggregateKey {
    ViewerSubject {
        viewer_id: String,
        subject_id: String,
    },
    ViewerSummary {
        viewer_id: String,
    },
    SubjectViewer {
        subject_id: String,
        viewer_id: String,
    },
    SubjectSummary {
        subject_id: String,
    },
}

/// A queryable group of documents sharing a parent.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Collection {
    /// `users/{viewer}/analytics/products`
    ViewerHistory { viewer_id: String },
    /// `products/{subject}/analytics/users`
    SubjectViewers { subject_id: String },
    /// Every subject summary, used for trending.
    SubjectSummaries,
    /// Every viewer summary.
    ViewerSummaries,
}

impl AggregateKey {
    /// Document path in the remote store.
    pub fn path(&self) -> String {
        match self {
            AggregateKey::ViewerSubject {
                viewer_id,
                subject_id,
            } => format!("users/{}/analytics/products/{}", viewer_id, subject_id),
            AggregateKey::ViewerSummary { viewer_id } => {
                format!("users/{}/analytics/summary", viewer_id)
            }
            AggregateKey::SubjectViewer {
                subject_id,
                viewer_id,
            } => format!("products/{}/analytics/users/{}", subject_id, viewer_id),
            AggregateKey::SubjectSummary { subject_id } => {
                format!("products/{}/analytics/summary", subject_id)
            }
        }
    }

    /// Id of the document within its collection.
    pub fn doc_id(&self) -> &str {
        match self {
            AggregateKey::ViewerSubject { subject_id, .. } => subject_id,
            AggregateKey::ViewerSummary { viewer_id } => viewer_id,
            AggregateKey::SubjectViewer { viewer_id, .. } => viewer_id,
            AggregateKey::SubjectSummary { subject_id } => subject_id,
        }
    }

    pub fn collection(&self) -> Collection {
        match self {
            AggregateKey::ViewerSubject { viewer_id, .. } => Collection::ViewerHistory {
                viewer_id: viewer_id.clone(),
            },
            AggregateKey::ViewerSummary { .. } => Collection::ViewerSummaries,
            AggregateKey::SubjectViewer { subject_id, .. } => Collection::SubjectViewers {
                subject_id: subject_id.clone(),
            },
            AggregateKey::SubjectSummary { .. } => Collection::SubjectSummaries,
        }
    }

    /// The record created when this document does not exist yet.
    pub fn initial_record(&self, at_millis: i64) -> AggregateRecord {
        match self {
            AggregateKey::ViewerSubject { .. } => {
                AggregateRecord::ViewerSubject(ViewerSubjectDetail {
                    view_count: 1,
                    first_viewed: at_millis,
                    last_viewed: at_millis,
                })
            }
            AggregateKey::ViewerSummary { .. } => AggregateRecord::ViewerSummary(ViewerSummary {
                total_views: 1,
                unique_subjects_viewed: 1,
                last_activity: at_millis,
            }),
            AggregateKey::SubjectViewer { .. } => {
                AggregateRecord::SubjectViewer(SubjectViewerDetail {
                    view_count: 1,
                    last_viewed: at_millis,
                })
            }
            AggregateKey::SubjectSummary { .. } => {
                AggregateRecord::SubjectSummary(SubjectSummary {
                    total_views: 1,
                    unique_viewers: 1,
                    last_viewed: at_millis,
                })
            }
        }
    }

    /// Whether `record` is the variant stored under this key.
    pub fn matches(&self, record: &AggregateRecord) -> bool {
        matches!(
            (self, record),
            (
                AggregateKey::ViewerSubject { .. },
                AggregateRecord::ViewerSubject(_)
            ) | (
                AggregateKey::ViewerSummary { .. },
                AggregateRecord::ViewerSummary(_)
            ) | (
                AggregateKey::SubjectViewer { .. },
                AggregateRecord::SubjectViewer(_)
            ) | (
                AggregateKey::SubjectSummary { .. },
                AggregateRecord::SubjectSummary(_)
            )
        )
    }
}

impl std::fmt::Display for AggregateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.path())
    }
}

/// The four keys derived from one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventKeys {
    pub viewer_subject: AggregateKey,
    pub viewer_summary: AggregateKey,
    pub subject_viewer: AggregateKey,
    pub subject_summary: AggregateKey,
}

impl EventKeys {
    pub fn for_event(event: &ViewEvent) -> Self {
        Self::new(&event.viewer_id, &event.subject_id)
    }

    pub fn new(viewer_id: &str, subject_id: &str) -> Self {
        Self {
            viewer_subject: AggregateKey::ViewerSubject {
                viewer_id: viewer_id.to_string(),
                subject_id: subject_id.to_string(),
            },
            viewer_summary: AggregateKey::ViewerSummary {
                viewer_id: viewer_id.to_string(),
            },
            subject_viewer: AggregateKey::SubjectViewer {
                subject_id: subject_id.to_string(),
                viewer_id: viewer_id.to_string(),
            },
            subject_summary: AggregateKey::SubjectSummary {
                subject_id: subject_id.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_render_store_paths() {
        let keys = EventKeys::new("u1", "p7");
        assert_eq!(keys.viewer_subject.path(), "users/u1/analytics/products/p7");
        assert_eq!(keys.viewer_summary.path(), "users/u1/analytics/summary");
        assert_eq!(keys.subject_viewer.path(), "products/p7/analytics/users/u1");
        assert_eq!(keys.subject_summary.path(), "products/p7/analytics/summary");
        assert_eq!(keys.subject_viewer.doc_id(), "u1");
        assert_eq!(
            keys.viewer_subject.collection(),
            Collection::ViewerHistory {
                viewer_id: "u1".into()
            }
        );
    }

    #[test]
    fn initial_records_start_at_one() {
        let keys = EventKeys::new("u1", "p1");
        let summary = keys.subject_summary.initial_record(100);
        assert_eq!(
            summary,
            AggregateRecord::SubjectSummary(SubjectSummary {
                total_views: 1,
                unique_viewers: 1,
                last_viewed: 100,
            })
        );
        assert!(keys.subject_summary.matches(&summary));
        assert!(!keys.viewer_summary.matches(&summary));

        let detail = keys.viewer_subject.initial_record(100);
        let detail = detail.as_viewer_subject().unwrap();
        assert_eq!(detail.first_viewed, detail.last_viewed);
    }

    #[test]
    fn increments_respect_uniqueness_and_keep_latest_timestamp() {
        let mut record = EventKeys::new("u1", "p1").viewer_summary.initial_record(500);
        record.apply(&Increment::view(400).with_unique(false));
        record.apply(&Increment::view(900).with_unique(true));

        let summary = record.as_viewer_summary().unwrap();
        assert_eq!(summary.total_views, 3);
        assert_eq!(summary.unique_subjects_viewed, 2);
        assert_eq!(summary.last_activity, 900);
    }

    #[test]
    fn detail_records_ignore_unique_delta() {
        let mut record = EventKeys::new("u1", "p1").subject_viewer.initial_record(1);
        record.apply(&Increment::view(2).with_unique(true));
        assert_eq!(record.as_subject_viewer().unwrap().view_count, 2);
    }
}
