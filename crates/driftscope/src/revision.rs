// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Revision records - one observed version of a resource at a timestamp.
//!
//! Revisions are append-only and immutable once stored. The first revision
//! for a uid and every Nth one after it carry a full snapshot so that
//! point-in-time resolution replays a bounded number of diffs; CREATE and
//! DELETE always carry one.

use crate::diff::DiffOp;
use crate::error::{Error, Result};
use crate::significance::Significance;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// An inclusive time window in nanoseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeWindow {
    /// Window start (inclusive).
    pub start_ns: i64,
    /// Window end (inclusive).
    pub end_ns: i64,
}

impl TimeWindow {
    /// A window from explicit bounds.
    #[must_use]
    pub fn new(start_ns: i64, end_ns: i64) -> Self {
        Self { start_ns, end_ns }
    }

    /// The lookback window ending at `end_ns`.
    #[must_use]
    pub fn lookback(end_ns: i64, lookback_ms: i64) -> Self {
        Self {
            start_ns: end_ns.saturating_sub(lookback_ms.saturating_mul(crate::constants::NANOS_PER_MILLI)),
            end_ns,
        }
    }

    /// Whether `ts` falls inside the window.
    #[must_use]
    pub fn contains(&self, ts_ns: i64) -> bool {
        ts_ns >= self.start_ns && ts_ns <= self.end_ns
    }

    /// Reject inverted windows.
    pub fn validate(&self) -> Result<()> {
        if self.end_ns < self.start_ns {
            return Err(Error::InvalidArgument(format!(
                "time window end {} precedes start {}",
                self.end_ns, self.start_ns
            )));
        }
        Ok(())
    }
}

/// What kind of lifecycle event a revision records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RevisionEventType {
    /// First observation of the uid.
    Create,
    /// A subsequent observed change.
    Update,
    /// The uid disappeared; freezes the uid.
    Delete,
}

impl std::fmt::Display for RevisionEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RevisionEventType::Create => write!(f, "CREATE"),
            RevisionEventType::Update => write!(f, "UPDATE"),
            RevisionEventType::Delete => write!(f, "DELETE"),
        }
    }
}

/// One observed version of a resource.
///
/// At least one of `full_snapshot` and `diff` is always present; which one
/// depends on the event type and the snapshot cadence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Revision {
    /// The resource uid this revision belongs to.
    pub uid: String,
    /// Observation timestamp, nanoseconds; strictly monotonic per uid.
    pub timestamp_ns: i64,
    /// Lifecycle event kind.
    pub event_type: RevisionEventType,
    /// Full document, when this revision is a snapshot point.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_snapshot: Option<Value>,
    /// Edit sequence against the previous revision's state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diff: Option<Vec<DiffOp>>,
    /// Significance attached to UPDATE revisions at ingest.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub significance: Option<Significance>,
}

impl Revision {
    /// A CREATE revision carrying the initial document.
    #[must_use]
    pub fn create(uid: impl Into<String>, timestamp_ns: i64, snapshot: Value) -> Self {
        Self {
            uid: uid.into(),
            timestamp_ns,
            event_type: RevisionEventType::Create,
            full_snapshot: Some(snapshot),
            diff: None,
            significance: None,
        }
    }

    /// An UPDATE revision carrying only a diff.
    #[must_use]
    pub fn update_with_diff(uid: impl Into<String>, timestamp_ns: i64, diff: Vec<DiffOp>) -> Self {
        Self {
            uid: uid.into(),
            timestamp_ns,
            event_type: RevisionEventType::Update,
            full_snapshot: None,
            diff: Some(diff),
            significance: None,
        }
    }

    /// An UPDATE revision carrying only a full snapshot; the indexer derives
    /// the diff at ingest.
    #[must_use]
    pub fn update_with_snapshot(
        uid: impl Into<String>,
        timestamp_ns: i64,
        snapshot: Value,
    ) -> Self {
        Self {
            uid: uid.into(),
            timestamp_ns,
            event_type: RevisionEventType::Update,
            full_snapshot: Some(snapshot),
            diff: None,
            significance: None,
        }
    }

    /// A DELETE revision carrying the final observed document.
    #[must_use]
    pub fn delete(uid: impl Into<String>, timestamp_ns: i64, last_snapshot: Value) -> Self {
        Self {
            uid: uid.into(),
            timestamp_ns,
            event_type: RevisionEventType::Delete,
            full_snapshot: Some(last_snapshot),
            diff: None,
            significance: None,
        }
    }

    /// Whether this revision is a snapshot point.
    #[must_use]
    pub fn has_snapshot(&self) -> bool {
        self.full_snapshot.is_some()
    }

    /// Structural validation applied before any ingest work.
    pub fn validate(&self) -> Result<()> {
        if self.uid.is_empty() {
            return Err(Error::InvalidArgument("revision has empty uid".to_owned()));
        }
        if self.timestamp_ns < 0 {
            return Err(Error::InvalidArgument(format!(
                "revision for {} has negative timestamp {}",
                self.uid, self.timestamp_ns
            )));
        }
        match self.event_type {
            RevisionEventType::Create | RevisionEventType::Delete => {
                if self.full_snapshot.is_none() {
                    return Err(Error::InvalidArgument(format!(
                        "{} revision for {} must carry a full snapshot",
                        self.event_type, self.uid
                    )));
                }
            }
            RevisionEventType::Update => {
                if self.full_snapshot.is_none() && self.diff.is_none() {
                    return Err(Error::InvalidArgument(format!(
                        "UPDATE revision for {} carries neither snapshot nor diff",
                        self.uid
                    )));
                }
            }
        }
        Ok(())
    }
}
