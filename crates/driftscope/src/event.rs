// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Kubernetes Event records and the per-uid event index.
//!
//! Events are the second ingest signal next to object revisions. The index
//! answers "which events touched this uid inside a window" for anomaly
//! detection and "what was the latest event" for graph nodes.

use crate::revision::TimeWindow;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// Kubernetes event type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KubeEventType {
    /// Informational event.
    Normal,
    /// Something is off; the usual precursor to an anomaly.
    Warning,
}

/// One (possibly deduplicated) Kubernetes Event observed for a resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KubeEvent {
    /// Uid of the involved object.
    pub involved_uid: String,
    /// Machine-readable reason (e.g. "BackOff", "FailedMount").
    pub reason: String,
    /// Human-readable note.
    pub note: String,
    /// Normal or Warning.
    pub event_type: KubeEventType,
    /// Occurrence count as reported by the cluster (deduplicated events).
    pub count: u32,
    /// First occurrence, nanoseconds.
    pub first_timestamp_ns: i64,
    /// Most recent occurrence, nanoseconds.
    pub last_timestamp_ns: i64,
}

impl KubeEvent {
    /// A warning event with a single occurrence.
    #[must_use]
    pub fn warning(
        involved_uid: impl Into<String>,
        reason: impl Into<String>,
        timestamp_ns: i64,
    ) -> Self {
        Self {
            involved_uid: involved_uid.into(),
            reason: reason.into(),
            note: String::new(),
            event_type: KubeEventType::Warning,
            count: 1,
            first_timestamp_ns: timestamp_ns,
            last_timestamp_ns: timestamp_ns,
        }
    }

    /// Set the note.
    #[must_use]
    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = note.into();
        self
    }

    /// Set the occurrence count.
    #[must_use]
    pub fn with_count(mut self, count: u32) -> Self {
        self.count = count;
        self
    }

    /// Whether any occurrence falls inside the window.
    #[must_use]
    pub fn overlaps(&self, window: TimeWindow) -> bool {
        self.first_timestamp_ns <= window.end_ns && self.last_timestamp_ns >= window.start_ns
    }
}

/// Process-wide index of events keyed by involved uid.
///
/// Writes come from the ingest task; reads from query tasks. Per-uid vectors
/// are kept ordered by `last_timestamp_ns`.
#[derive(Debug, Default)]
pub struct EventIndex {
    by_uid: DashMap<String, Vec<KubeEvent>>,
}

impl EventIndex {
    /// An empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an event under its involved uid.
    pub fn record(&self, event: KubeEvent) {
        let mut entry = self.by_uid.entry(event.involved_uid.clone()).or_default();
        let position = entry
            .iter()
            .rposition(|existing| existing.last_timestamp_ns <= event.last_timestamp_ns)
            .map_or(0, |p| p + 1);
        entry.insert(position, event);
    }

    /// Events for `uid` overlapping `window`, ordered by last occurrence.
    #[must_use]
    pub fn events_in(&self, uid: &str, window: TimeWindow) -> Vec<KubeEvent> {
        self.by_uid
            .get(uid)
            .map(|events| {
                events
                    .iter()
                    .filter(|event| event.overlaps(window))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// The most recent event for `uid` at or before `t`.
    #[must_use]
    pub fn latest(&self, uid: &str, t_ns: i64) -> Option<KubeEvent> {
        self.by_uid.get(uid).and_then(|events| {
            events
                .iter()
                .filter(|event| event.last_timestamp_ns <= t_ns)
                .next_back()
                .cloned()
        })
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_keeps_order() {
        let index = EventIndex::new();
        index.record(KubeEvent::warning("u1", "BackOff", 300));
        index.record(KubeEvent::warning("u1", "Pulled", 100));
        index.record(KubeEvent::warning("u1", "Started", 200));

        let events = index.events_in("u1", TimeWindow::new(0, 1_000));
        let reasons: Vec<&str> = events.iter().map(|e| e.reason.as_str()).collect();
        assert_eq!(reasons, vec!["Pulled", "Started", "BackOff"]);
    }

    #[test]
    fn test_window_filter() {
        let index = EventIndex::new();
        index.record(KubeEvent::warning("u1", "Old", 50));
        index.record(KubeEvent::warning("u1", "Recent", 500));

        let events = index.events_in("u1", TimeWindow::new(100, 1_000));
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].reason, "Recent");
    }

    #[test]
    fn test_deduplicated_event_overlaps_by_range() {
        let event = KubeEvent {
            involved_uid: "u1".into(),
            reason: "BackOff".into(),
            note: String::new(),
            event_type: KubeEventType::Warning,
            count: 7,
            first_timestamp_ns: 100,
            last_timestamp_ns: 900,
        };
        assert!(event.overlaps(TimeWindow::new(400, 500)));
        assert!(!event.overlaps(TimeWindow::new(901, 1_000)));
    }

    #[test]
    fn test_latest_respects_bound() {
        let index = EventIndex::new();
        index.record(KubeEvent::warning("u1", "First", 100));
        index.record(KubeEvent::warning("u1", "Second", 200));

        assert_eq!(index.latest("u1", 150).unwrap().reason, "First");
        assert_eq!(index.latest("u1", 250).unwrap().reason, "Second");
        assert!(index.latest("u1", 50).is_none());
        assert!(index.latest("other", 250).is_none());
    }
}
