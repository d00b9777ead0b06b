// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! # Graph Model - Typed Topology at an Instant
//!
//! Nodes and edges produced fresh per query, plus the arena the causal
//! builder expands into. Resource relationships are a DAG in the common case
//! but can contain apparent cycles (a Service selects Pods owned by the
//! Deployment the Service fronts), so the arena is an index-based petgraph
//! adjacency structure with a uid map - never back-references between owned
//! nodes.

use crate::anomaly::Anomaly;
use crate::event::KubeEvent;
use crate::resource::{ResourceRef, ResourceStatus};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::collections::HashMap;

/// The typed relationship an edge records.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelationshipType {
    /// `from` owns `to` via an owner reference on `to`.
    Owns,
    /// `from`'s label selector matches `to`'s labels.
    Selects,
    /// `from`'s spec names `to` in a well-known field.
    References,
    /// Controller-style ownership (`ownerReferences[*].controller == true`);
    /// a refinement emitted alongside `Owns`.
    Manages,
    /// `from` is the Node `to` (a Pod) is scheduled on.
    ScheduledOn,
    /// `from` (a Service) groups `to` (an EndpointSlice).
    MemberOf,
}

impl RelationshipType {
    /// The fixed category of this relationship.
    #[must_use]
    pub fn category(self) -> EdgeCategory {
        match self {
            RelationshipType::Owns
            | RelationshipType::ScheduledOn
            | RelationshipType::MemberOf => EdgeCategory::Ownership,
            RelationshipType::Selects
            | RelationshipType::References
            | RelationshipType::Manages => EdgeCategory::CauseIntroducing,
        }
    }
}

impl std::fmt::Display for RelationshipType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RelationshipType::Owns => write!(f, "OWNS"),
            RelationshipType::Selects => write!(f, "SELECTS"),
            RelationshipType::References => write!(f, "REFERENCES"),
            RelationshipType::Manages => write!(f, "MANAGES"),
            RelationshipType::ScheduledOn => write!(f, "SCHEDULED_ON"),
            RelationshipType::MemberOf => write!(f, "MEMBER_OF"),
        }
    }
}

/// Whether traversing an edge can propagate change.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EdgeCategory {
    /// Structural containment; does not introduce change by itself.
    Ownership,
    /// Traversal can propagate change; causal expansion follows these.
    CauseIntroducing,
}

/// A directed, typed edge. `from` is the source of control or reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphEdge {
    /// Deterministic edge id (stable across rebuilds of the same instant).
    pub id: String,
    /// Source uid.
    pub from_uid: String,
    /// Target uid.
    pub to_uid: String,
    /// The typed relationship.
    pub relationship_type: RelationshipType,
    /// The relationship's category.
    pub edge_category: EdgeCategory,
}

impl GraphEdge {
    /// An edge with the category implied by its relationship type.
    #[must_use]
    pub fn new(
        from_uid: impl Into<String>,
        to_uid: impl Into<String>,
        relationship_type: RelationshipType,
    ) -> Self {
        let from_uid = from_uid.into();
        let to_uid = to_uid.into();
        Self {
            id: format!("{from_uid}:{relationship_type}:{to_uid}"),
            from_uid,
            to_uid,
            relationship_type,
            edge_category: relationship_type.category(),
        }
    }

    /// The de-duplication key: (from, to, relationship type).
    #[must_use]
    pub fn key(&self) -> (String, String, RelationshipType) {
        (
            self.from_uid.clone(),
            self.to_uid.clone(),
            self.relationship_type,
        )
    }
}

/// Collapse duplicate edges by (from, to, type).
///
/// When the same pair arrives under both categories, CAUSE_INTRODUCING wins.
/// The result is sorted for deterministic output.
#[must_use]
pub fn dedupe_edges(edges: Vec<GraphEdge>) -> Vec<GraphEdge> {
    let mut by_key: HashMap<(String, String, RelationshipType), GraphEdge> = HashMap::new();
    for edge in edges {
        match by_key.entry(edge.key()) {
            std::collections::hash_map::Entry::Vacant(slot) => {
                slot.insert(edge);
            }
            std::collections::hash_map::Entry::Occupied(mut slot) => {
                if edge.edge_category == EdgeCategory::CauseIntroducing {
                    slot.get_mut().edge_category = EdgeCategory::CauseIntroducing;
                }
            }
        }
    }
    let mut edges: Vec<GraphEdge> = by_key.into_values().collect();
    edges.sort_by(|a, b| a.key().cmp(&b.key()));
    edges
}

/// A resource as seen by a graph query at one instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    /// The resource identity.
    pub resource: ResourceRef,
    /// Derived status at the query instant.
    pub status: ResourceStatus,
    /// Justification for the status.
    pub status_message: String,
    /// Labels at the query instant.
    pub labels: BTreeMap<String, String>,
    /// Most recent Kubernetes Event at or before the query instant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_event: Option<KubeEvent>,
    /// Anomalies detected for this node in the query window.
    pub anomalies: Vec<Anomaly>,
    /// Whether the resource lives outside any namespace.
    pub is_cluster_scoped: bool,
}

/// One step on the causal spine. Step 0 is the observed symptom; higher
/// steps are earlier causes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpineStep {
    /// Uid of the spine node.
    pub uid: String,
    /// Position on the spine (0 = symptom).
    pub step: usize,
    /// The triggering revision's timestamp, when one qualified.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub triggering_ts_ns: Option<i64>,
    /// The triggering revision's significance score.
    pub significance: f64,
    /// The triggering revision's significance reasons.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub triggering_reasons: Vec<String>,
}

/// The assembled result of a causal or namespace graph query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CausalGraph {
    /// All nodes: spine plus side attachments.
    pub nodes: Vec<GraphNode>,
    /// All edges among the nodes.
    pub edges: Vec<GraphEdge>,
    /// The observed symptom, in symptom mode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_symptom: Option<ResourceRef>,
    /// Spine steps ordered by step number (0 first).
    pub spine: Vec<SpineStep>,
    /// The lookback the graph was built under (milliseconds).
    pub lookback_ms: i64,
    /// When the graph was built (nanoseconds since the epoch).
    pub built_at_ns: i64,
    /// True when a deadline cut the build short; pair with the returned
    /// cursor to resume.
    pub truncated: bool,
}

impl CausalGraph {
    /// Node lookup by uid.
    #[must_use]
    pub fn node(&self, uid: &str) -> Option<&GraphNode> {
        self.nodes.iter().find(|node| node.resource.uid == uid)
    }

    /// The uids on the spine, ordered by step.
    #[must_use]
    pub fn spine_uids(&self) -> Vec<&str> {
        self.spine.iter().map(|step| step.uid.as_str()).collect()
    }
}

/// Mutable arena the causal builder expands into: petgraph adjacency plus a
/// uid index. Flattened into a [`CausalGraph`] once expansion finishes.
#[derive(Debug, Default)]
pub struct GraphArena {
    graph: DiGraph<GraphNode, GraphEdge>,
    by_uid: HashMap<String, NodeIndex>,
}

impl GraphArena {
    /// An empty arena.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a node unless its uid is already present. Returns the index
    /// either way.
    pub fn add_node(&mut self, node: GraphNode) -> NodeIndex {
        if let Some(index) = self.by_uid.get(&node.resource.uid) {
            return *index;
        }
        let uid = node.resource.uid.clone();
        let index = self.graph.add_node(node);
        self.by_uid.insert(uid, index);
        index
    }

    /// Whether a uid is already in the arena.
    #[must_use]
    pub fn contains(&self, uid: &str) -> bool {
        self.by_uid.contains_key(uid)
    }

    /// Node access by uid.
    #[must_use]
    pub fn node(&self, uid: &str) -> Option<&GraphNode> {
        self.by_uid.get(uid).map(|index| &self.graph[*index])
    }

    /// Mutable node access by uid.
    pub fn node_mut(&mut self, uid: &str) -> Option<&mut GraphNode> {
        self.by_uid
            .get(uid)
            .copied()
            .map(move |index| &mut self.graph[index])
    }

    /// Insert an edge when both endpoints are present and the (from, to,
    /// type) key is new. Returns whether the edge was inserted.
    pub fn add_edge(&mut self, edge: GraphEdge) -> bool {
        let (Some(&from), Some(&to)) = (
            self.by_uid.get(&edge.from_uid),
            self.by_uid.get(&edge.to_uid),
        ) else {
            return false;
        };
        let duplicate = self
            .graph
            .edges_connecting(from, to)
            .any(|existing| existing.weight().relationship_type == edge.relationship_type);
        if duplicate {
            return false;
        }
        self.graph.add_edge(from, to, edge);
        true
    }

    /// Uids with an edge of `category` pointing *into* `uid`.
    #[must_use]
    pub fn predecessors(&self, uid: &str, category: EdgeCategory) -> Vec<String> {
        let Some(&index) = self.by_uid.get(uid) else {
            return Vec::new();
        };
        let mut uids: Vec<String> = self
            .graph
            .edges_directed(index, Direction::Incoming)
            .filter(|edge| edge.weight().edge_category == category)
            .map(|edge| self.graph[edge.source()].resource.uid.clone())
            .collect();
        uids.sort();
        uids.dedup();
        uids
    }

    /// Flatten into deterministic node and edge lists.
    #[must_use]
    pub fn into_parts(self) -> (Vec<GraphNode>, Vec<GraphEdge>) {
        let (nodes, edges) = self.graph.into_nodes_edges();
        let mut nodes: Vec<GraphNode> = nodes.into_iter().map(|n| n.weight).collect();
        nodes.sort_by(|a, b| {
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
        let mut edges: Vec<GraphEdge> = edges.into_iter().map(|e| e.weight).collect();
        edges.sort_by(|a, b| a.key().cmp(&b.key()));
        (nodes, edges)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#[cfg(test)]
mod tests {
    use super::*;

    fn node(uid: &str, kind: &str) -> GraphNode {
        GraphNode {
            resource: ResourceRef {
                api_group: String::new(),
                version: "v1".into(),
                kind: kind.into(),
                namespace: "prod".into(),
                name: uid.into(),
                uid: uid.into(),
            },
            status: ResourceStatus::Ready,
            status_message: String::new(),
            labels: BTreeMap::new(),
            latest_event: None,
            anomalies: Vec::new(),
            is_cluster_scoped: false,
        }
    }

    #[test]
    fn test_category_mapping() {
        assert_eq!(RelationshipType::Owns.category(), EdgeCategory::Ownership);
        assert_eq!(
            RelationshipType::ScheduledOn.category(),
            EdgeCategory::Ownership
        );
        assert_eq!(
            RelationshipType::MemberOf.category(),
            EdgeCategory::Ownership
        );
        assert_eq!(
            RelationshipType::Selects.category(),
            EdgeCategory::CauseIntroducing
        );
        assert_eq!(
            RelationshipType::References.category(),
            EdgeCategory::CauseIntroducing
        );
        assert_eq!(
            RelationshipType::Manages.category(),
            EdgeCategory::CauseIntroducing
        );
    }

    #[test]
    fn test_dedupe_collapses_and_sorts() {
        let edges = vec![
            GraphEdge::new("b", "c", RelationshipType::Owns),
            GraphEdge::new("a", "b", RelationshipType::Owns),
            GraphEdge::new("a", "b", RelationshipType::Owns),
        ];
        let deduped = dedupe_edges(edges);
        assert_eq!(deduped.len(), 2);
        assert_eq!(deduped[0].from_uid, "a");
    }

    #[test]
    fn test_dedupe_cause_introducing_wins() {
        let mut ownership = GraphEdge::new("a", "b", RelationshipType::Selects);
        ownership.edge_category = EdgeCategory::Ownership;
        let cause = GraphEdge::new("a", "b", RelationshipType::Selects);
        let deduped = dedupe_edges(vec![ownership, cause]);
        assert_eq!(deduped.len(), 1);
        assert_eq!(deduped[0].edge_category, EdgeCategory::CauseIntroducing);
    }

    #[test]
    fn test_arena_cycle_safe_predecessors() {
        let mut arena = GraphArena::new();
        arena.add_node(node("svc", "Service"));
        arena.add_node(node("pod", "Pod"));
        // Apparent cycle: service selects pod, pod references service config.
        assert!(arena.add_edge(GraphEdge::new("svc", "pod", RelationshipType::Selects)));
        assert!(arena.add_edge(GraphEdge::new("pod", "svc", RelationshipType::References)));
        // Duplicate insert is refused.
        assert!(!arena.add_edge(GraphEdge::new("svc", "pod", RelationshipType::Selects)));

        assert_eq!(
            arena.predecessors("pod", EdgeCategory::CauseIntroducing),
            vec!["svc".to_owned()]
        );
        assert_eq!(
            arena.predecessors("svc", EdgeCategory::CauseIntroducing),
            vec!["pod".to_owned()]
        );
    }

    #[test]
    fn test_arena_edge_requires_endpoints() {
        let mut arena = GraphArena::new();
        arena.add_node(node("a", "Pod"));
        assert!(!arena.add_edge(GraphEdge::new("a", "ghost", RelationshipType::Owns)));
    }

    #[test]
    fn test_into_parts_deterministic() {
        let build = || {
            let mut arena = GraphArena::new();
            arena.add_node(node("z", "Pod"));
            arena.add_node(node("a", "Service"));
            arena.add_edge(GraphEdge::new("a", "z", RelationshipType::Selects));
            arena.into_parts()
        };
        assert_eq!(build(), build());
        let (nodes, _) = build();
        assert_eq!(nodes[0].resource.kind, "Pod");
    }
}
