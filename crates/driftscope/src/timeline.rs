// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! # Resource Timelines - Status Over a Window
//!
//! Builds the per-resource view a timeline query returns: an ordered
//! sequence of contiguous status segments covering the resource's life
//! inside the query window, each carrying the reconstructed state at the
//! segment's start, plus the Kubernetes Events observed in the window.
//!
//! Segments are contiguous and non-overlapping (`segment[i].end ==
//! segment[i+1].start`), totally cover `[max(birth, t0), min(death, t1)]`,
//! and status transitions happen only at revision boundaries.

use crate::diff::apply_diff;
use crate::error::Result;
use crate::event::KubeEvent;
use crate::resolver::{ResolvedState, SnapshotResolver};
use crate::resource::{derive_status, ResourceRef, ResourceStatus};
use crate::revision::{RevisionEventType, TimeWindow};
use crate::store::RevisionStore;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// A contiguous interval sharing one derived status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSegment {
    /// Segment start (inclusive), nanoseconds.
    pub start_ns: i64,
    /// Segment end (exclusive, equals the next segment's start), nanoseconds.
    pub end_ns: i64,
    /// Derived status across the interval.
    pub status: ResourceStatus,
    /// Justification for the status.
    pub message: String,
    /// Reconstructed state at the segment's start.
    pub resource_data: Value,
}

/// One resource's derived history inside a query window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceTimeline {
    /// The resource identity.
    pub resource: ResourceRef,
    /// Ordered, contiguous status segments.
    pub segments: Vec<StatusSegment>,
    /// Events observed for the resource inside the window.
    pub events: Vec<KubeEvent>,
}

impl ResourceTimeline {
    /// Whether any segment is in a degraded state.
    #[must_use]
    pub fn is_problematic(&self) -> bool {
        self.segments.iter().any(|segment| {
            matches!(
                segment.status,
                ResourceStatus::Warning | ResourceStatus::Error | ResourceStatus::Terminating
            )
        })
    }
}

/// Builds [`ResourceTimeline`]s from the revision log.
pub struct TimelineBuilder {
    store: Arc<dyn RevisionStore>,
    resolver: Arc<SnapshotResolver>,
}

impl TimelineBuilder {
    /// A builder over `store` and `resolver`.
    #[must_use]
    pub fn new(store: Arc<dyn RevisionStore>, resolver: Arc<SnapshotResolver>) -> Self {
        Self { store, resolver }
    }

    /// Build the timeline for `uid` inside `window`, attaching `events`.
    ///
    /// Returns `None` when the resource's life does not intersect the
    /// window at all.
    pub async fn build(
        &self,
        uid: &str,
        window: TimeWindow,
        events: Vec<KubeEvent>,
    ) -> Result<Option<ResourceTimeline>> {
        window.validate()?;
        let Some(entry) = self.store.resource_entry(uid).await? else {
            return Ok(None);
        };
        if entry.created_ns > window.end_ns {
            return Ok(None);
        }
        if let Some(deleted_ns) = entry.deleted_ns {
            if deleted_ns <= window.start_ns {
                return Ok(None);
            }
        }

        let start_ns = entry.created_ns.max(window.start_ns);
        let end_ns = entry
            .deleted_ns
            .map_or(window.end_ns, |deleted| deleted.min(window.end_ns));

        let mut document = match self.resolver.state_at(uid, start_ns).await? {
            ResolvedState::Live { document, .. } => document,
            // Lifetime bounds said alive, the log says deleted: treat as
            // not-in-window rather than inventing a segment.
            ResolvedState::Terminated { .. } => return Ok(None),
        };

        let mut segments = Vec::new();
        let mut derived = derive_status(&entry.resource.kind, &document);
        let mut segment_start = start_ns;
        let mut segment_data = document.clone();

        let tail = if start_ns < end_ns {
            self.store
                .revisions_in(uid, TimeWindow::new(start_ns.saturating_add(1), end_ns))
                .await?
        } else {
            Vec::new()
        };
        for revision in &tail {
            if revision.event_type == RevisionEventType::Delete {
                break;
            }
            if let Some(full) = &revision.full_snapshot {
                document = full.clone();
            } else if let Some(diff) = &revision.diff {
                apply_diff(&mut document, diff, uid)?;
            }
            let next = derive_status(&entry.resource.kind, &document);
            if next.status != derived.status {
                segments.push(StatusSegment {
                    start_ns: segment_start,
                    end_ns: revision.timestamp_ns,
                    status: derived.status,
                    message: derived.message.clone(),
                    resource_data: segment_data.clone(),
                });
                segment_start = revision.timestamp_ns;
                segment_data = document.clone();
                derived = next;
            }
        }

        segments.push(StatusSegment {
            start_ns: segment_start,
            end_ns,
            status: derived.status,
            message: derived.message,
            resource_data: segment_data,
        });

        Ok(Some(ResourceTimeline {
            resource: entry.resource,
            segments,
            events,
        }))
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::DiffOp;
    use crate::revision::Revision;
    use crate::store::MemoryRevisionStore;
    use serde_json::json;

    fn pod(uid: &str, phase: &str) -> Value {
        json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": {"name": "web-0", "namespace": "prod", "uid": uid},
            "status": {"phase": phase}
        })
    }

    async fn builder_with(
        revisions: Vec<Revision>,
    ) -> (Arc<MemoryRevisionStore>, TimelineBuilder) {
        let store = Arc::new(MemoryRevisionStore::new());
        for revision in revisions {
            store.append(revision).await.unwrap();
        }
        let resolver = Arc::new(SnapshotResolver::new(
            Arc::clone(&store) as Arc<dyn RevisionStore>,
            16,
        ));
        let builder = TimelineBuilder::new(Arc::clone(&store) as Arc<dyn RevisionStore>, resolver);
        (store, builder)
    }

    #[tokio::test]
    async fn test_segments_contiguous_and_cover_window() {
        let (_store, builder) = builder_with(vec![
            Revision::create("u1", 100, pod("u1", "Pending")),
            Revision::update_with_diff(
                "u1",
                200,
                vec![DiffOp::replace(".status.phase", json!("Pending"), json!("Running"))],
            ),
            Revision::update_with_diff(
                "u1",
                300,
                vec![DiffOp::replace(".status.phase", json!("Running"), json!("Failed"))],
            ),
        ])
        .await;

        let timeline = builder
            .build("u1", TimeWindow::new(0, 400), Vec::new())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(timeline.segments.len(), 3);
        assert_eq!(timeline.segments[0].start_ns, 100);
        assert_eq!(timeline.segments[0].status, ResourceStatus::Warning);
        assert_eq!(timeline.segments[1].status, ResourceStatus::Ready);
        assert_eq!(timeline.segments[2].status, ResourceStatus::Error);
        assert_eq!(timeline.segments[2].end_ns, 400);
        for pair in timeline.segments.windows(2) {
            assert_eq!(pair[0].end_ns, pair[1].start_ns);
        }
        assert!(timeline.is_problematic());
    }

    #[tokio::test]
    async fn test_equal_status_revisions_merge() {
        let (_store, builder) = builder_with(vec![
            Revision::create("u1", 100, pod("u1", "Running")),
            Revision::update_with_diff(
                "u1",
                200,
                vec![DiffOp::add(".metadata.labels", json!({"a": "b"}))],
            ),
        ])
        .await;

        let timeline = builder
            .build("u1", TimeWindow::new(0, 400), Vec::new())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(timeline.segments.len(), 1);
        assert_eq!(timeline.segments[0].status, ResourceStatus::Ready);
        assert!(!timeline.is_problematic());
    }

    #[tokio::test]
    async fn test_deletion_caps_coverage() {
        let (_store, builder) = builder_with(vec![
            Revision::create("u1", 100, pod("u1", "Running")),
            Revision::delete("u1", 300, pod("u1", "Running")),
        ])
        .await;

        let timeline = builder
            .build("u1", TimeWindow::new(0, 1_000), Vec::new())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(timeline.segments.last().unwrap().end_ns, 300);
    }

    #[tokio::test]
    async fn test_window_clamps_segment_start() {
        let (_store, builder) = builder_with(vec![
            Revision::create("u1", 100, pod("u1", "Running")),
        ])
        .await;

        let timeline = builder
            .build("u1", TimeWindow::new(250, 400), Vec::new())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(timeline.segments[0].start_ns, 250);
        assert_eq!(timeline.segments[0].end_ns, 400);
    }

    #[tokio::test]
    async fn test_outside_window_is_none() {
        let (_store, builder) = builder_with(vec![
            Revision::create("u1", 500, pod("u1", "Running")),
        ])
        .await;
        assert!(builder
            .build("u1", TimeWindow::new(0, 400), Vec::new())
            .await
            .unwrap()
            .is_none());

        let (_store, builder) = builder_with(vec![
            Revision::create("u2", 100, pod("u2", "Running")),
            Revision::delete("u2", 200, pod("u2", "Running")),
        ])
        .await;
        assert!(builder
            .build("u2", TimeWindow::new(300, 400), Vec::new())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_unknown_uid_is_none() {
        let (_store, builder) = builder_with(Vec::new()).await;
        assert!(builder
            .build("ghost", TimeWindow::new(0, 400), Vec::new())
            .await
            .unwrap()
            .is_none());
    }
}
