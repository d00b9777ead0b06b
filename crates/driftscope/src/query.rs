// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! # Query Contracts - What the RPC Layer Speaks
//!
//! Request and response shapes for the three read contracts (timeline,
//! namespace graph, causal graph), the opaque versioned paging cursors, and
//! the cooperative cancellation handle every query runs under.
//!
//! Cursors are base64-wrapped JSON stamped with the engine's algorithm
//! version; a cursor minted by a different version is rejected as
//! `InvalidArgument` rather than silently misinterpreted.

use crate::anomaly::Anomaly;
use crate::constants::{ALGORITHM_VERSION, DEFAULT_PAGE_SIZE};
use crate::error::{Error, Result};
use crate::graph::{CausalGraph, GraphEdge, GraphNode};
use crate::rank::CausalPath;
use crate::resource::ResourceRef;
use crate::revision::{Revision, TimeWindow};
use crate::timeline::ResourceTimeline;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

// ============================================================================
// Cooperative cancellation
// ============================================================================

/// Deadline plus cancellation flag, checked at paged work boundaries.
///
/// Interruption is never an error: the observing component returns its
/// partial result flagged `truncated` with a resumable cursor.
#[derive(Debug, Clone, Default)]
pub struct QueryControl {
    deadline: Option<Instant>,
    cancelled: Arc<AtomicBool>,
}

impl QueryControl {
    /// A control that never interrupts.
    #[must_use]
    pub fn unbounded() -> Self {
        Self::default()
    }

    /// A control that interrupts after `timeout`.
    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            deadline: Some(Instant::now() + timeout),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Request cooperative cancellation.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    /// Whether the query should stop at the next checkpoint.
    #[must_use]
    pub fn is_interrupted(&self) -> bool {
        if self.cancelled.load(Ordering::Relaxed) {
            return true;
        }
        self.deadline
            .map_or(false, |deadline| Instant::now() >= deadline)
    }
}

// ============================================================================
// Paging
// ============================================================================

/// Page bounds for a paged query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    /// Maximum items per page.
    pub page_size: usize,
    /// Cursor from the previous page, when resuming.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            cursor: None,
        }
    }
}

/// Paging metadata attached to every chunked response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageMetadata {
    /// Total matching items, when cheaply known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_count: Option<u64>,
    /// Whether more pages exist.
    pub has_more: bool,
    /// Cursor for the next page.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
    /// True when a deadline, not exhaustion, ended this page.
    pub truncated: bool,
}

/// The engine-internal cursor payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CursorPayload {
    /// Timeline paging: the last emitted (namespace, kind, name, uid) key.
    Timeline {
        /// Last emitted ordering key.
        last: (String, String, String, String),
    },
    /// Namespace-graph paging: count of nodes already emitted for the
    /// deterministic node ordering.
    NamespaceGraph {
        /// The namespace being paged.
        namespace: String,
        /// The query instant, for staleness checks.
        timestamp_ns: i64,
        /// Nodes already emitted.
        emitted: usize,
    },
    /// Causal expansion resume point: visited uids plus the pending BFS
    /// frontier.
    CausalFrontier {
        /// The symptom uid.
        uid: String,
        /// The failure timestamp.
        timestamp_ns: i64,
        /// Uids already visited.
        visited: Vec<String>,
        /// Pending (uid, depth) frontier entries.
        frontier: Vec<(String, usize)>,
    },
}

/// Seal a cursor payload into an opaque string.
pub fn encode_cursor(payload: &CursorPayload) -> Result<String> {
    #[derive(Serialize)]
    struct Envelope<'a> {
        v: &'a str,
        payload: &'a CursorPayload,
    }
    let json = serde_json::to_vec(&Envelope {
        v: ALGORITHM_VERSION,
        payload,
    })?;
    Ok(URL_SAFE_NO_PAD.encode(json))
}

/// Open an opaque cursor string.
///
/// # Errors
///
/// `InvalidArgument` when the cursor is not valid base64/JSON or was minted
/// by a different algorithm version.
pub fn decode_cursor(cursor: &str) -> Result<CursorPayload> {
    #[derive(Deserialize)]
    struct Envelope {
        v: String,
        payload: CursorPayload,
    }
    let bytes = URL_SAFE_NO_PAD
        .decode(cursor)
        .map_err(|err| Error::InvalidArgument(format!("undecodable cursor: {err}")))?;
    let envelope: Envelope = serde_json::from_slice(&bytes)
        .map_err(|err| Error::InvalidArgument(format!("malformed cursor: {err}")))?;
    if envelope.v != ALGORITHM_VERSION {
        return Err(Error::InvalidArgument(format!(
            "cursor from algorithm version '{}', this engine is '{}'",
            envelope.v, ALGORITHM_VERSION
        )));
    }
    Ok(envelope.payload)
}

// ============================================================================
// Timeline query
// ============================================================================

/// Resource filter for timeline queries. Empty vectors mean "any".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelineFilter {
    /// Restrict to these namespaces.
    #[serde(default)]
    pub namespaces: Vec<String>,
    /// Restrict to these kinds.
    #[serde(default)]
    pub kinds: Vec<String>,
    /// Restrict to one API group.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_group: Option<String>,
    /// Restrict to one API version.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Keep only resources with a degraded segment in the window.
    #[serde(default)]
    pub problematic_only: bool,
    /// Keep only resources whose name contains this substring.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name_substring: Option<String>,
}

impl TimelineFilter {
    /// Identity-level match (the `problematic_only` half is applied after
    /// the timeline is built).
    #[must_use]
    pub fn matches_ref(&self, resource: &ResourceRef) -> bool {
        if !self.namespaces.is_empty() && !self.namespaces.contains(&resource.namespace) {
            return false;
        }
        if !self.kinds.is_empty() && !self.kinds.contains(&resource.kind) {
            return false;
        }
        if let Some(group) = &self.api_group {
            if group != &resource.api_group {
                return false;
            }
        }
        if let Some(version) = &self.version {
            if version != &resource.version {
                return false;
            }
        }
        if let Some(needle) = &self.name_substring {
            if !resource.name.contains(needle.as_str()) {
                return false;
            }
        }
        true
    }
}

/// A timeline query: window, filter, page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelineQuery {
    /// The query window.
    pub window: TimeWindow,
    /// Resource filter.
    #[serde(default)]
    pub filter: TimelineFilter,
    /// Page bounds.
    #[serde(default)]
    pub page: PageRequest,
}

/// One chunk of a timeline response stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineChunk {
    /// Timelines ordered by (namespace, kind, name, uid).
    pub resources: Vec<ResourceTimeline>,
    /// Paging metadata.
    pub metadata: PageMetadata,
}

// ============================================================================
// Namespace-graph query
// ============================================================================

/// A namespace topology query at an instant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceGraphQuery {
    /// The namespace to assemble.
    pub namespace: String,
    /// The instant to assemble it at (nanoseconds).
    pub timestamp_ns: i64,
    /// Run anomaly detection per node.
    #[serde(default)]
    pub include_anomalies: bool,
    /// Enrich high-severity nodes with causal paths.
    #[serde(default)]
    pub include_causal_paths: bool,
    /// Lookback for anomaly and causal enrichment (milliseconds).
    pub lookback_ms: i64,
    /// Spine depth bound for causal enrichment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_depth: Option<usize>,
    /// Page bounds.
    #[serde(default)]
    pub page: PageRequest,
}

/// Metadata attached to graph responses.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphQueryMetadata {
    /// Nodes in this page.
    pub node_count: usize,
    /// Edges in this page.
    pub edge_count: usize,
    /// Whether more pages exist.
    pub has_more: bool,
    /// Cursor for the next page.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
    /// True when a deadline ended this page early.
    pub truncated: bool,
    /// Wall-clock execution time of this page.
    pub query_execution_ms: u64,
}

/// One page of a namespace graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamespaceGraphResponse {
    /// Nodes in deterministic order.
    pub nodes: Vec<GraphNode>,
    /// Edges whose later endpoint lands in this page.
    pub edges: Vec<GraphEdge>,
    /// Anomalies for this page's nodes, when requested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anomalies: Option<Vec<Anomaly>>,
    /// Causal paths for high-severity nodes, when requested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub causal_paths: Option<Vec<CausalPath>>,
    /// Metadata.
    pub metadata: GraphQueryMetadata,
}

// ============================================================================
// Causal-graph query (symptom mode)
// ============================================================================

/// How much revision payload a causal response carries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotFormat {
    /// Revisions carry only their diff.
    #[default]
    Diff,
    /// Revisions carry their full snapshot too.
    Full,
}

/// A root-cause query for one observed failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CausalGraphQuery {
    /// The failing resource.
    pub resource_uid: String,
    /// When the failure was observed (nanoseconds).
    pub failure_timestamp_ns: i64,
    /// Lookback window (milliseconds); engine default when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lookback_ms: Option<i64>,
    /// Spine depth bound; engine default when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_depth: Option<usize>,
    /// Drop paths scoring below this confidence.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_confidence: Option<f64>,
    /// Revision payload format.
    #[serde(default)]
    pub format: SnapshotFormat,
    /// Resume cursor from a truncated response.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
}

/// One spine entry of the incident, with its triggering revision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CausalChainStep {
    /// Position on the spine (0 = symptom).
    pub step: usize,
    /// The step's resource.
    pub resource: ResourceRef,
    /// The revision that put this step on the spine.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub triggering_revision: Option<Revision>,
    /// That revision's significance.
    pub significance: f64,
}

/// The incident view: symptom, graph, spine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Incident {
    /// The observed symptom.
    pub observed_symptom: ResourceRef,
    /// The assembled causal graph.
    pub graph: CausalGraph,
    /// The spine with triggering revisions, step 0 first.
    pub causal_chain: Vec<CausalChainStep>,
}

/// Metadata attached to causal responses.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CausalQueryMetadata {
    /// The engine algorithm version (also stamped into cursors).
    pub algorithm_version: String,
    /// Wall-clock execution time.
    pub query_execution_ms: u64,
    /// Resume cursor, present iff the build was truncated by its deadline.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

/// The causal-graph query response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CausalGraphResponse {
    /// The incident view.
    pub incident: Incident,
    /// Ranked candidate paths; empty when none could be built.
    pub paths: Vec<CausalPath>,
    /// Set when `paths` is empty, explaining why.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
    /// Metadata.
    pub metadata: CausalQueryMetadata,
}
