// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)
// DriftScope - Kubernetes Change and Incident Intelligence

// Unit tests assert on known float constants (weights, thresholds).
#![cfg_attr(test, allow(clippy::float_cmp))]

//! # DriftScope
//!
//! A Kubernetes change-and-incident intelligence engine: it ingests a
//! continuous stream of cluster object revisions and Kubernetes Events,
//! preserves a time-indexed history of every resource, and answers three
//! classes of questions over it:
//!
//! - **Timeline**: what did the cluster look like across a time window
//!   ([`Engine::timeline_query`])
//! - **Topology**: what is the causal graph of a namespace at an instant,
//!   with anomalies and candidate root causes
//!   ([`Engine::namespace_graph_query`])
//! - **Root cause**: given an observed failure, the ranked causal chain
//!   that most likely explains it ([`Engine::causal_graph_query`])
//!
//! ## Architecture
//!
//! Data flows through six cooperating components behind one [`Engine`]
//! handle:
//!
//! - [`indexer::RevisionIndexer`] - per-uid revision logs with diffs and
//!   significance, computed once at ingest
//! - [`resolver::SnapshotResolver`] - point-in-time state reconstruction
//!   (snapshot + diff replay, LRU-cached)
//! - [`relationships::RelationshipExtractor`] - typed edges from owner
//!   references, label selectors, and well-known spec fields
//! - [`anomaly::AnomalyDetector`] - a closed behavioural taxonomy with
//!   isolated rules
//! - [`causal::CausalGraphBuilder`] - bounded backward expansion from a
//!   symptom into a spine plus side nodes
//! - [`rank::PathRanker`] - explainable weighted ranking of candidate
//!   root-cause paths
//!
//! ## Example
//!
//! ```rust,no_run
//! use driftscope::{Engine, EngineConfig, Revision};
//! use serde_json::json;
//!
//! # async fn example() -> driftscope::Result<()> {
//! let engine = Engine::with_memory_store(EngineConfig::default());
//!
//! engine.ingest(Revision::create("pod-uid", 1_000, json!({
//!     "apiVersion": "v1",
//!     "kind": "Pod",
//!     "metadata": {"name": "web-0", "namespace": "prod", "uid": "pod-uid"},
//! }))).await?;
//!
//! let state = engine.state_at("pod-uid", 2_000).await?;
//! # let _ = state;
//! # Ok(())
//! # }
//! ```

pub mod anomaly;
pub mod causal;
pub mod config;
pub mod constants;
pub mod diff;
pub mod engine;
pub mod error;
pub mod event;
pub mod graph;
pub mod indexer;
pub mod query;
pub mod rank;
pub mod relationships;
pub mod resolver;
pub mod resource;
pub mod revision;
pub mod selector;
pub mod significance;
pub mod store;
pub mod timeline;

pub use anomaly::{Anomaly, AnomalyCategory, AnomalySeverity, AnomalyType};
pub use config::EngineConfig;
pub use diff::{DiffOp, DiffOpKind};
pub use engine::Engine;
pub use error::{Error, ErrorKind, Result};
pub use event::{KubeEvent, KubeEventType};
pub use graph::{CausalGraph, EdgeCategory, GraphEdge, GraphNode, RelationshipType, SpineStep};
pub use indexer::IngestAck;
pub use query::{
    CausalGraphQuery, CausalGraphResponse, NamespaceGraphQuery, NamespaceGraphResponse,
    PageRequest, QueryControl, SnapshotFormat, TimelineChunk, TimelineFilter, TimelineQuery,
};
pub use rank::{CausalPath, RankerWeights, RankingBreakdown};
pub use resolver::ResolvedState;
pub use resource::{ResourceRef, ResourceStatus};
pub use revision::{Revision, RevisionEventType, TimeWindow};
pub use significance::Significance;
pub use store::{MemoryRevisionStore, RevisionStore};
pub use timeline::{ResourceTimeline, StatusSegment};
