// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! # Revision Storage Contract
//!
//! The engine talks to durable storage through [`RevisionStore`]: an
//! append-only per-uid revision log with range scans, a latest-snapshot
//! lookup, and the namespace/name secondary indexes the query side needs.
//! Implementations are expected to make point reads and range scans
//! `O(log N)` and stream-friendly.
//!
//! [`MemoryRevisionStore`] is the in-process reference implementation used
//! by tests and single-node deployments: a DashMap of per-uid logs, each
//! guarded by its own RW lock so ingest serialises per uid while readers
//! proceed concurrently.
//!
//! Ordering and conflict rules are enforced here, inside the per-uid write
//! lock, so they hold under any interleaving:
//!
//! - a revision whose timestamp is not strictly newer than the last stored
//!   one is rejected with `OutOfOrder`;
//! - any revision after a DELETE is rejected with `Conflict` (a reused
//!   (kind, namespace, name) must arrive as a CREATE under a fresh uid).

use crate::error::{Error, Result};
use crate::resource::ResourceRef;
use crate::revision::{Revision, RevisionEventType, TimeWindow};
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::Arc;

/// Cheap summary of a uid's log tail, read before ingest work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogHead {
    /// Timestamp of the newest stored revision.
    pub last_timestamp_ns: i64,
    /// Whether the uid is frozen by a DELETE.
    pub deleted: bool,
    /// Number of UPDATE revisions stored so far (snapshot cadence input).
    pub update_count: u32,
}

/// A uid's identity plus its lifetime bounds, from the secondary index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceEntry {
    /// The resource identity.
    pub resource: ResourceRef,
    /// CREATE timestamp.
    pub created_ns: i64,
    /// DELETE timestamp, when the uid is frozen.
    pub deleted_ns: Option<i64>,
}

impl ResourceEntry {
    /// Whether the resource existed at `t`.
    #[must_use]
    pub fn alive_at(&self, t_ns: i64) -> bool {
        self.created_ns <= t_ns && self.deleted_ns.map_or(true, |deleted| deleted > t_ns)
    }
}

/// One uid's tenure of a (kind, namespace, name) slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UidEpoch {
    /// The uid that held the slot.
    pub uid: String,
    /// When it appeared.
    pub created_ns: i64,
    /// When it was deleted, if it was.
    pub deleted_ns: Option<i64>,
}

/// Append-only revision storage with per-uid logs and secondary indexes.
#[async_trait]
pub trait RevisionStore: Send + Sync {
    /// Append a revision under its uid, enforcing the ordering and conflict
    /// rules documented on the module.
    async fn append(&self, revision: Revision) -> Result<()>;

    /// The log tail summary for a uid, or `None` for an unknown uid.
    async fn log_head(&self, uid: &str) -> Result<Option<LogHead>>;

    /// The ordered revisions for `uid` inside `window` (inclusive bounds,
    /// clamped to what exists).
    async fn revisions_in(&self, uid: &str, window: TimeWindow) -> Result<Vec<Revision>>;

    /// The nearest revision at or before `t` that carries a full snapshot.
    async fn latest_snapshot_at_or_before(&self, uid: &str, t_ns: i64)
        -> Result<Option<Revision>>;

    /// Identity and lifetime for a uid, or `None` when unknown.
    async fn resource_entry(&self, uid: &str) -> Result<Option<ResourceEntry>>;

    /// All known entries, optionally restricted to one namespace.
    /// Cluster-scoped resources are returned only for the unrestricted call.
    async fn list_entries(&self, namespace: Option<&str>) -> Result<Vec<ResourceEntry>>;

    /// The uid succession of a (kind, namespace, name) slot, ordered by
    /// creation time. Feeds create/delete churn detection.
    async fn uid_epochs(&self, kind: &str, namespace: &str, name: &str) -> Result<Vec<UidEpoch>>;
}

/// Per-uid log guarded by its own RW lock.
#[derive(Debug)]
struct UidLog {
    revisions: Vec<Revision>,
    entry: ResourceEntry,
    update_count: u32,
}

/// In-memory [`RevisionStore`] reference implementation.
///
/// Suitable for tests and single-node use; the durable implementations live
/// behind the same trait.
#[derive(Debug, Default)]
pub struct MemoryRevisionStore {
    logs: DashMap<String, Arc<RwLock<UidLog>>>,
    name_index: DashMap<(String, String, String), Vec<UidEpoch>>,
}

impl MemoryRevisionStore {
    /// An empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn log_for(&self, uid: &str) -> Option<Arc<RwLock<UidLog>>> {
        self.logs.get(uid).map(|entry| Arc::clone(entry.value()))
    }
}

#[async_trait]
impl RevisionStore for MemoryRevisionStore {
    async fn append(&self, revision: Revision) -> Result<()> {
        revision.validate()?;

        if let Some(log) = self.log_for(&revision.uid) {
            let mut guard = log.write();
            let last = guard
                .revisions
                .last()
                .map(|rev| rev.timestamp_ns)
                .unwrap_or(i64::MIN);
            if guard.entry.deleted_ns.is_some() {
                return Err(Error::Conflict {
                    uid: revision.uid.clone(),
                });
            }
            if revision.timestamp_ns <= last {
                return Err(Error::OutOfOrder {
                    uid: revision.uid.clone(),
                    timestamp_ns: revision.timestamp_ns,
                    last_timestamp_ns: last,
                });
            }
            if revision.event_type == RevisionEventType::Create {
                return Err(Error::InvalidArgument(format!(
                    "duplicate CREATE for known uid {}",
                    revision.uid
                )));
            }
            if revision.event_type == RevisionEventType::Update {
                guard.update_count += 1;
            }
            if revision.event_type == RevisionEventType::Delete {
                guard.entry.deleted_ns = Some(revision.timestamp_ns);
                let key = (
                    guard.entry.resource.kind.clone(),
                    guard.entry.resource.namespace.clone(),
                    guard.entry.resource.name.clone(),
                );
                if let Some(mut epochs) = self.name_index.get_mut(&key) {
                    if let Some(epoch) = epochs
                        .iter_mut()
                        .find(|epoch| epoch.uid == revision.uid)
                    {
                        epoch.deleted_ns = Some(revision.timestamp_ns);
                    }
                }
            }
            guard.revisions.push(revision);
            return Ok(());
        }

        // Unknown uid: must open with CREATE so the secondary indexes have
        // an identity to record.
        if revision.event_type != RevisionEventType::Create {
            return Err(Error::InvalidArgument(format!(
                "first revision for uid {} must be CREATE, got {}",
                revision.uid, revision.event_type
            )));
        }
        let snapshot = revision
            .full_snapshot
            .as_ref()
            .ok_or_else(|| Error::InvalidArgument("CREATE without snapshot".to_owned()))?;
        let resource = ResourceRef::from_document(snapshot).ok_or_else(|| {
            Error::InvalidArgument(format!(
                "CREATE snapshot for uid {} carries no parseable identity",
                revision.uid
            ))
        })?;
        if resource.uid != revision.uid {
            return Err(Error::InvalidArgument(format!(
                "snapshot uid {} does not match revision uid {}",
                resource.uid, revision.uid
            )));
        }

        let key = (
            resource.kind.clone(),
            resource.namespace.clone(),
            resource.name.clone(),
        );
        self.name_index.entry(key).or_default().push(UidEpoch {
            uid: revision.uid.clone(),
            created_ns: revision.timestamp_ns,
            deleted_ns: None,
        });
        let log = UidLog {
            entry: ResourceEntry {
                resource,
                created_ns: revision.timestamp_ns,
                deleted_ns: None,
            },
            update_count: 0,
            revisions: vec![revision.clone()],
        };
        self.logs
            .insert(revision.uid.clone(), Arc::new(RwLock::new(log)));
        Ok(())
    }

    async fn log_head(&self, uid: &str) -> Result<Option<LogHead>> {
        Ok(self.log_for(uid).map(|log| {
            let guard = log.read();
            LogHead {
                last_timestamp_ns: guard
                    .revisions
                    .last()
                    .map(|rev| rev.timestamp_ns)
                    .unwrap_or(i64::MIN),
                deleted: guard.entry.deleted_ns.is_some(),
                update_count: guard.update_count,
            }
        }))
    }

    async fn revisions_in(&self, uid: &str, window: TimeWindow) -> Result<Vec<Revision>> {
        window.validate()?;
        Ok(self
            .log_for(uid)
            .map(|log| {
                let guard = log.read();
                let start = guard
                    .revisions
                    .partition_point(|rev| rev.timestamp_ns < window.start_ns);
                let end = guard
                    .revisions
                    .partition_point(|rev| rev.timestamp_ns <= window.end_ns);
                guard.revisions[start..end].to_vec()
            })
            .unwrap_or_default())
    }

    async fn latest_snapshot_at_or_before(
        &self,
        uid: &str,
        t_ns: i64,
    ) -> Result<Option<Revision>> {
        Ok(self.log_for(uid).and_then(|log| {
            let guard = log.read();
            let end = guard
                .revisions
                .partition_point(|rev| rev.timestamp_ns <= t_ns);
            guard.revisions[..end]
                .iter()
                .filter(|rev| rev.has_snapshot())
                .next_back()
                .cloned()
        }))
    }

    async fn resource_entry(&self, uid: &str) -> Result<Option<ResourceEntry>> {
        Ok(self.log_for(uid).map(|log| log.read().entry.clone()))
    }

    async fn list_entries(&self, namespace: Option<&str>) -> Result<Vec<ResourceEntry>> {
        let mut entries: Vec<ResourceEntry> = self
            .logs
            .iter()
            .map(|item| item.value().read().entry.clone())
            .filter(|entry| {
                namespace.map_or(true, |ns| entry.resource.namespace == ns)
            })
            .collect();
        entries.sort_by(|a, b| {
            (
                &a.resource.namespace,
                &a.resource.kind,
                &a.resource.name,
                &a.resource.uid,
            )
                .cmp(&(
                    &b.resource.namespace,
                    &b.resource.kind,
                    &b.resource.name,
                    &b.resource.uid,
                ))
        });
        Ok(entries)
    }

    async fn uid_epochs(&self, kind: &str, namespace: &str, name: &str) -> Result<Vec<UidEpoch>> {
        Ok(self
            .name_index
            .get(&(kind.to_owned(), namespace.to_owned(), name.to_owned()))
            .map(|epochs| epochs.clone())
            .unwrap_or_default())
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pod_snapshot(uid: &str, name: &str) -> serde_json::Value {
        json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": {"name": name, "namespace": "prod", "uid": uid},
            "spec": {"containers": [{"name": "app", "image": "web:1"}]}
        })
    }

    #[tokio::test]
    async fn test_append_and_scan() {
        let store = MemoryRevisionStore::new();
        store
            .append(Revision::create("u1", 100, pod_snapshot("u1", "web-0")))
            .await
            .unwrap();
        store
            .append(Revision::update_with_diff("u1", 200, vec![]))
            .await
            .unwrap();

        let all = store
            .revisions_in("u1", TimeWindow::new(0, 1_000))
            .await
            .unwrap();
        assert_eq!(all.len(), 2);

        let clamped = store
            .revisions_in("u1", TimeWindow::new(150, 1_000))
            .await
            .unwrap();
        assert_eq!(clamped.len(), 1);
        assert_eq!(clamped[0].timestamp_ns, 200);
    }

    #[tokio::test]
    async fn test_out_of_order_rejected() {
        let store = MemoryRevisionStore::new();
        store
            .append(Revision::create("u1", 100, pod_snapshot("u1", "web-0")))
            .await
            .unwrap();
        let err = store
            .append(Revision::update_with_diff("u1", 100, vec![]))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::OutOfOrder { last_timestamp_ns: 100, .. }));
    }

    #[tokio::test]
    async fn test_deleted_uid_is_frozen() {
        let store = MemoryRevisionStore::new();
        store
            .append(Revision::create("u1", 100, pod_snapshot("u1", "web-0")))
            .await
            .unwrap();
        store
            .append(Revision::delete("u1", 200, pod_snapshot("u1", "web-0")))
            .await
            .unwrap();
        let err = store
            .append(Revision::update_with_diff("u1", 300, vec![]))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Conflict { .. }));

        // Same name under a fresh uid starts a new timeline.
        store
            .append(Revision::create("u2", 300, pod_snapshot("u2", "web-0")))
            .await
            .unwrap();
        let epochs = store.uid_epochs("Pod", "prod", "web-0").await.unwrap();
        assert_eq!(epochs.len(), 2);
        assert_eq!(epochs[0].deleted_ns, Some(200));
        assert!(epochs[1].deleted_ns.is_none());
    }

    #[tokio::test]
    async fn test_first_revision_must_be_create() {
        let store = MemoryRevisionStore::new();
        let err = store
            .append(Revision::update_with_diff("ghost", 100, vec![]))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_latest_snapshot_lookup() {
        let store = MemoryRevisionStore::new();
        store
            .append(Revision::create("u1", 100, pod_snapshot("u1", "web-0")))
            .await
            .unwrap();
        store
            .append(Revision::update_with_diff("u1", 200, vec![]))
            .await
            .unwrap();
        store
            .append(Revision {
                full_snapshot: Some(pod_snapshot("u1", "web-0")),
                ..Revision::update_with_diff("u1", 300, vec![])
            })
            .await
            .unwrap();

        let at_250 = store
            .latest_snapshot_at_or_before("u1", 250)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(at_250.timestamp_ns, 100);

        let at_300 = store
            .latest_snapshot_at_or_before("u1", 300)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(at_300.timestamp_ns, 300);

        assert!(store
            .latest_snapshot_at_or_before("u1", 50)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_entries_sorted_and_alive() {
        let store = MemoryRevisionStore::new();
        store
            .append(Revision::create("u2", 100, pod_snapshot("u2", "zeta")))
            .await
            .unwrap();
        store
            .append(Revision::create("u1", 100, pod_snapshot("u1", "alpha")))
            .await
            .unwrap();

        let entries = store.list_entries(Some("prod")).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].resource.name, "alpha");
        assert!(entries[0].alive_at(100));
        assert!(!entries[0].alive_at(99));
    }
}
