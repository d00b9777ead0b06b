// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! # Revision Indexer - The Ingest Pipeline
//!
//! Converts the raw ingestion stream into an efficiently queryable per-uid
//! revision log. At ingest time, and never later, the indexer:
//!
//! - normalises snapshots (write-churn metadata fields stripped);
//! - derives the diff when an UPDATE arrives snapshot-only;
//! - promotes every Nth UPDATE to carry a full snapshot so point-in-time
//!   resolution replays a bounded number of diffs;
//! - scores change significance and stores it with the revision.
//!
//! Ingest errors are always reported to the caller; the indexer never drops
//! a revision silently. Out-of-order and conflicting revisions are rejected,
//! not reordered - ordering within a uid is the upstream watcher's job.

use crate::diff::{apply_diff, compute_diff, normalize_document};
use crate::error::{Error, Result};
use crate::resolver::{ResolvedState, SnapshotResolver};
use crate::revision::{Revision, RevisionEventType, TimeWindow};
use crate::significance::score_diff;
use crate::store::RevisionStore;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, trace};

/// Acknowledgement for one accepted revision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestAck {
    /// The uid the revision was appended under.
    pub uid: String,
    /// The accepted timestamp.
    pub timestamp_ns: i64,
}

/// Stream-driven writer side of the revision history.
pub struct RevisionIndexer {
    store: Arc<dyn RevisionStore>,
    resolver: Arc<SnapshotResolver>,
    snapshot_cadence: u32,
}

impl RevisionIndexer {
    /// An indexer writing through `store`, reconstructing prior state via
    /// `resolver`, promoting every `snapshot_cadence`-th UPDATE.
    #[must_use]
    pub fn new(
        store: Arc<dyn RevisionStore>,
        resolver: Arc<SnapshotResolver>,
        snapshot_cadence: u32,
    ) -> Self {
        Self {
            store,
            resolver,
            snapshot_cadence: snapshot_cadence.max(1),
        }
    }

    /// Ingest one revision.
    ///
    /// # Errors
    ///
    /// `OutOfOrder` when the timestamp is not strictly newer than the last
    /// stored one for the uid; `Conflict` when the uid is frozen by a
    /// DELETE; `InvalidArgument` for structurally bad revisions.
    pub async fn ingest(&self, mut revision: Revision) -> Result<IngestAck> {
        revision.validate()?;

        if let Some(snapshot) = revision.full_snapshot.as_mut() {
            normalize_document(snapshot);
        }

        let head = self.store.log_head(&revision.uid).await?;
        match head {
            None => {
                if revision.event_type != RevisionEventType::Create {
                    return Err(Error::InvalidArgument(format!(
                        "first revision for uid {} must be CREATE, got {}",
                        revision.uid, revision.event_type
                    )));
                }
            }
            Some(head) => {
                if head.deleted {
                    return Err(Error::Conflict {
                        uid: revision.uid.clone(),
                    });
                }
                if revision.timestamp_ns <= head.last_timestamp_ns {
                    return Err(Error::OutOfOrder {
                        uid: revision.uid.clone(),
                        timestamp_ns: revision.timestamp_ns,
                        last_timestamp_ns: head.last_timestamp_ns,
                    });
                }
                if revision.event_type == RevisionEventType::Update {
                    self.prepare_update(&mut revision, head.last_timestamp_ns, head.update_count)
                        .await?;
                }
            }
        }

        self.store.append(revision.clone()).await?;
        trace!(
            uid = revision.uid,
            ts = revision.timestamp_ns,
            event = %revision.event_type,
            "revision ingested"
        );

        if revision.event_type == RevisionEventType::Delete {
            self.resolver.invalidate(&revision.uid);
        }

        Ok(IngestAck {
            uid: revision.uid,
            timestamp_ns: revision.timestamp_ns,
        })
    }

    /// The ordered revision slice for `uid` inside `window`.
    pub async fn get_revisions(&self, uid: &str, window: TimeWindow) -> Result<Vec<Revision>> {
        self.store.revisions_in(uid, window).await
    }

    /// The nearest snapshot-carrying revision at or before `t`.
    pub async fn get_latest_snapshot_at_or_before(
        &self,
        uid: &str,
        t_ns: i64,
    ) -> Result<Option<Revision>> {
        self.store.latest_snapshot_at_or_before(uid, t_ns).await
    }

    /// Fill in diff, cadence snapshot, and significance for an UPDATE.
    async fn prepare_update(
        &self,
        revision: &mut Revision,
        last_timestamp_ns: i64,
        update_count: u32,
    ) -> Result<()> {
        let prior = self.prior_state(&revision.uid, last_timestamp_ns).await?;

        if revision.diff.is_none() {
            // Snapshot-only UPDATE: derive the diff against the prior state.
            let snapshot = revision
                .full_snapshot
                .as_ref()
                .ok_or_else(|| Error::InvalidArgument("UPDATE without payload".to_owned()))?;
            revision.diff = Some(compute_diff(&prior, snapshot));
        } else if revision.full_snapshot.is_none()
            && (update_count + 1) % self.snapshot_cadence == 0
        {
            // Cadence point: materialise the full document so later
            // resolutions replay from here.
            let diff = revision.diff.as_ref().map_or(&[][..], Vec::as_slice);
            let mut promoted = prior;
            apply_diff(&mut promoted, diff, &revision.uid).map_err(|err| {
                // The bad diff is the caller's, not the log's.
                Error::InvalidArgument(format!(
                    "UPDATE diff for {} does not apply to prior state: {err}",
                    revision.uid
                ))
            })?;
            debug!(
                uid = revision.uid,
                ts = revision.timestamp_ns,
                "promoting cadence snapshot"
            );
            revision.full_snapshot = Some(promoted);
        }

        let diff = revision.diff.as_ref().map_or(&[][..], Vec::as_slice);
        revision.significance = Some(score_diff(diff));
        Ok(())
    }

    async fn prior_state(&self, uid: &str, last_timestamp_ns: i64) -> Result<Value> {
        match self.resolver.state_at(uid, last_timestamp_ns).await? {
            ResolvedState::Live { document, .. } => Ok(document),
            ResolvedState::Terminated { .. } => Err(Error::Conflict {
                uid: uid.to_owned(),
            }),
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::DiffOp;
    use crate::store::MemoryRevisionStore;
    use serde_json::json;

    fn deployment(uid: &str, image: &str, replicas: i64) -> Value {
        json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {
                "name": "web", "namespace": "prod", "uid": uid,
                "resourceVersion": "999", "generation": 4
            },
            "spec": {
                "replicas": replicas,
                "template": {"spec": {"containers": [{"name": "app", "image": image}]}}
            }
        })
    }

    fn indexer_with(cadence: u32) -> (Arc<MemoryRevisionStore>, RevisionIndexer) {
        let store = Arc::new(MemoryRevisionStore::new());
        let resolver = Arc::new(SnapshotResolver::new(
            Arc::clone(&store) as Arc<dyn RevisionStore>,
            16,
        ));
        let indexer = RevisionIndexer::new(
            Arc::clone(&store) as Arc<dyn RevisionStore>,
            resolver,
            cadence,
        );
        (store, indexer)
    }

    #[tokio::test]
    async fn test_out_of_order_then_accept() {
        let (_store, indexer) = indexer_with(20);
        indexer
            .ingest(Revision::create("u1", 100, deployment("u1", "x:1", 2)))
            .await
            .unwrap();

        let err = indexer
            .ingest(Revision::update_with_diff("u1", 100, vec![]))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::OutOfOrder { .. }));

        let ack = indexer
            .ingest(Revision::update_with_diff(
                "u1",
                101,
                vec![DiffOp::replace(".spec.replicas", json!(2), json!(3))],
            ))
            .await
            .unwrap();
        assert_eq!(ack.timestamp_ns, 101);
    }

    #[tokio::test]
    async fn test_snapshot_only_update_gets_diff_and_significance() {
        let (store, indexer) = indexer_with(20);
        indexer
            .ingest(Revision::create("u1", 100, deployment("u1", "x:1", 2)))
            .await
            .unwrap();
        indexer
            .ingest(Revision::update_with_snapshot(
                "u1",
                200,
                deployment("u1", "x:2", 2),
            ))
            .await
            .unwrap();

        let revs = store
            .revisions_in("u1", TimeWindow::new(200, 200))
            .await
            .unwrap();
        let rev = &revs[0];
        let diff = rev.diff.as_ref().unwrap();
        assert!(diff
            .iter()
            .any(|op| op.path == ".spec.template.spec.containers.0.image"));
        let significance = rev.significance.as_ref().unwrap();
        assert!(significance.score >= 0.7);
        assert!(significance.reasons.contains(&"image change".to_owned()));
    }

    #[tokio::test]
    async fn test_normalisation_suppresses_churn_diffs() {
        let (store, indexer) = indexer_with(20);
        indexer
            .ingest(Revision::create("u1", 100, deployment("u1", "x:1", 2)))
            .await
            .unwrap();
        // Only resourceVersion/generation changed: normalised away.
        let mut next = deployment("u1", "x:1", 2);
        next["metadata"]["resourceVersion"] = json!("1000");
        next["metadata"]["generation"] = json!(5);
        indexer
            .ingest(Revision::update_with_snapshot("u1", 200, next))
            .await
            .unwrap();

        let revs = store
            .revisions_in("u1", TimeWindow::new(200, 200))
            .await
            .unwrap();
        assert!(revs[0].diff.as_ref().unwrap().is_empty());
        assert_eq!(revs[0].significance.as_ref().unwrap().score, 0.0);
    }

    #[tokio::test]
    async fn test_cadence_promotion() {
        let (store, indexer) = indexer_with(3);
        indexer
            .ingest(Revision::create("u1", 100, deployment("u1", "x:1", 0)))
            .await
            .unwrap();
        for i in 1..=6_i64 {
            indexer
                .ingest(Revision::update_with_diff(
                    "u1",
                    100 + i,
                    vec![DiffOp::replace(".spec.replicas", json!(i - 1), json!(i))],
                ))
                .await
                .unwrap();
        }

        let revs = store
            .revisions_in("u1", TimeWindow::new(0, 1_000))
            .await
            .unwrap();
        let snapshot_points: Vec<i64> = revs
            .iter()
            .filter(|rev| rev.has_snapshot())
            .map(|rev| rev.timestamp_ns)
            .collect();
        // CREATE plus every 3rd UPDATE.
        assert_eq!(snapshot_points, vec![100, 103, 106]);
        let promoted = revs.iter().find(|rev| rev.timestamp_ns == 103).unwrap();
        assert_eq!(
            promoted
                .full_snapshot
                .as_ref()
                .unwrap()
                .pointer("/spec/replicas"),
            Some(&json!(3))
        );
    }

    #[tokio::test]
    async fn test_delete_freezes_uid() {
        let (_store, indexer) = indexer_with(20);
        indexer
            .ingest(Revision::create("u1", 100, deployment("u1", "x:1", 2)))
            .await
            .unwrap();
        indexer
            .ingest(Revision::delete("u1", 200, deployment("u1", "x:1", 2)))
            .await
            .unwrap();
        let err = indexer
            .ingest(Revision::update_with_diff("u1", 300, vec![]))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Conflict { .. }));
    }

    #[tokio::test]
    async fn test_unknown_uid_must_create() {
        let (_store, indexer) = indexer_with(20);
        let err = indexer
            .ingest(Revision::update_with_diff("ghost", 100, vec![]))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }
}
