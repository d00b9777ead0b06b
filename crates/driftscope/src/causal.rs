// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! # Causal Graph Builder - From Symptom to Spine
//!
//! Assembles the graph a root-cause query is answered over. In symptom mode
//! the builder expands backward from the failing resource along
//! cause-introducing edges, breadth-first, promoting predecessors whose
//! revisions were significant inside the lookback onto the *spine* and
//! attaching everything else as *side nodes*. In namespace mode it assembles
//! the full topology of a namespace at an instant with per-node anomalies.
//!
//! Expansion is bounded by depth and lookback, cycle-safe through a
//! visited-uid set, and cooperative: the cancellation control is checked at
//! every frontier expansion, and interruption yields a partial graph marked
//! `truncated` plus a resumable frontier cursor. Pages resumed from such a
//! cursor never re-emit nodes or edges: an edge is emitted exactly in the
//! page where its second endpoint is first visited.

use crate::anomaly::{Anomaly, AnomalyDetector, DetectorContext};
use crate::error::{Error, Result};
use crate::event::EventIndex;
use crate::graph::{
    CausalGraph, EdgeCategory, GraphArena, GraphEdge, GraphNode, SpineStep,
};
use crate::query::{CursorPayload, QueryControl};
use crate::relationships::RelationshipExtractor;
use crate::resolver::{ResolvedState, SnapshotResolver};
use crate::resource::{derive_status, ResourceDocument, ResourceStatus};
use crate::revision::{Revision, TimeWindow};
use crate::store::RevisionStore;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tracing::{debug, warn};

/// Parameters for a symptom-mode build.
#[derive(Debug, Clone, PartialEq)]
pub struct SymptomSpec {
    /// The failing resource.
    pub uid: String,
    /// The failure instant (nanoseconds).
    pub t_ns: i64,
    /// Lookback for predecessor candidacy (milliseconds).
    pub lookback_ms: i64,
    /// Spine depth bound.
    pub max_depth: usize,
    /// Minimum revision significance for spine candidacy.
    pub min_significance: f64,
    /// Temporal slack between adjacent spine steps (milliseconds).
    pub temporal_slack_ms: i64,
}

impl SymptomSpec {
    fn validate(&self) -> Result<()> {
        if self.uid.is_empty() {
            return Err(Error::InvalidArgument("empty symptom uid".to_owned()));
        }
        if self.lookback_ms < 0 {
            return Err(Error::InvalidArgument(format!(
                "negative lookback {}ms",
                self.lookback_ms
            )));
        }
        Ok(())
    }
}

/// A finished (or truncated) symptom-mode build.
#[derive(Debug, Clone)]
pub struct BuildOutcome {
    /// The assembled graph.
    pub graph: CausalGraph,
    /// Resume point, present iff the build was truncated.
    pub cursor: Option<CursorPayload>,
}

/// Namespace topology plus detection results, before paging.
#[derive(Debug, Clone)]
pub struct NamespaceAssembly {
    /// Documents alive at the instant (namespace plus reachable
    /// cluster-scoped resources).
    pub documents: Vec<ResourceDocument>,
    /// Materialised nodes in deterministic order.
    pub nodes: Vec<GraphNode>,
    /// Deduplicated edges in deterministic order.
    pub edges: Vec<GraphEdge>,
    /// True when a deadline cut assembly short.
    pub truncated: bool,
}

/// Builds causal and namespace graphs over the revision history.
pub struct CausalGraphBuilder {
    store: Arc<dyn RevisionStore>,
    resolver: Arc<SnapshotResolver>,
    events: Arc<EventIndex>,
    extractor: RelationshipExtractor,
    detector: AnomalyDetector,
}

impl CausalGraphBuilder {
    /// A builder over the engine's shared handles.
    #[must_use]
    pub fn new(
        store: Arc<dyn RevisionStore>,
        resolver: Arc<SnapshotResolver>,
        events: Arc<EventIndex>,
        detector: AnomalyDetector,
    ) -> Self {
        Self {
            store,
            resolver,
            events,
            extractor: RelationshipExtractor::new(),
            detector,
        }
    }

    // ========================================================================
    // Symptom mode
    // ========================================================================

    /// Build the causal graph for one observed failure.
    ///
    /// `resume` continues a truncated build; its uid and timestamp must
    /// match this query's.
    pub async fn build_symptom_graph(
        &self,
        spec: &SymptomSpec,
        control: &QueryControl,
        resume: Option<&CursorPayload>,
    ) -> Result<BuildOutcome> {
        spec.validate()?;
        let window = TimeWindow::lookback(spec.t_ns, spec.lookback_ms);
        let slack_ns = spec
            .temporal_slack_ms
            .saturating_mul(crate::constants::NANOS_PER_MILLI);

        let entry = self
            .store
            .resource_entry(&spec.uid)
            .await?
            .ok_or_else(|| Error::NotFound {
                uid: spec.uid.clone(),
                timestamp_ns: spec.t_ns,
            })?;

        // Assemble the namespace context once: documents, edges, anomalies.
        let documents = self
            .namespace_documents(&entry.resource.namespace, spec.t_ns, control)
            .await?
            .0;
        let edges_all = self.extractor.extract(&documents);
        let anomalies_by_uid = self.detect_anomalies(&documents, &edges_all, window).await?;

        let mut arena = GraphArena::new();
        for doc in &documents {
            arena.add_node(self.materialize_node(doc, spec.t_ns, &anomalies_by_uid));
        }
        for edge in &edges_all {
            arena.add_edge(edge.clone());
        }
        // The symptom may already be gone at t; resolve its last live state.
        if !arena.contains(&spec.uid) {
            let node = self.terminated_symptom_node(spec, &anomalies_by_uid).await?;
            arena.add_node(node);
        }

        // BFS state, fresh or resumed.
        let mut prior_visited: HashSet<String> = HashSet::new();
        let mut visited: HashSet<String> = HashSet::new();
        let mut frontier: VecDeque<(String, usize)> = VecDeque::new();
        let mut spine: HashMap<String, SpineStep> = HashMap::new();
        match resume {
            Some(CursorPayload::CausalFrontier {
                uid,
                timestamp_ns,
                visited: resumed_visited,
                frontier: resumed_frontier,
            }) => {
                if uid != &spec.uid || *timestamp_ns != spec.t_ns {
                    return Err(Error::InvalidArgument(
                        "cursor does not match this causal query".to_owned(),
                    ));
                }
                prior_visited.extend(resumed_visited.iter().cloned());
                visited.extend(resumed_visited.iter().cloned());
                frontier.extend(resumed_frontier.iter().cloned());
                // Spine membership is recomputed for resumed uids as they
                // are re-expanded from the frontier; already-finished spine
                // nodes keep their numbering through re-derivation below.
                for (uid, _) in resumed_frontier {
                    spine.entry(uid.clone()).or_insert_with(|| SpineStep {
                        uid: uid.clone(),
                        step: 0,
                        triggering_ts_ns: None,
                        significance: 0.0,
                        triggering_reasons: Vec::new(),
                    });
                }
            }
            Some(_) => {
                return Err(Error::InvalidArgument(
                    "cursor kind does not match this causal query".to_owned(),
                ));
            }
            None => {
                visited.insert(spec.uid.clone());
                frontier.push_back((spec.uid.clone(), 0));
                let trigger = self.latest_revision_in(&spec.uid, window).await?;
                spine.insert(spec.uid.clone(), symptom_step(&spec.uid, trigger.as_ref()));
            }
        }

        // Breadth-first backward expansion along cause-introducing edges.
        let mut truncated = false;
        while let Some((current_uid, depth)) = frontier.pop_front() {
            if control.is_interrupted() {
                frontier.push_front((current_uid, depth));
                truncated = true;
                break;
            }
            if depth >= spec.max_depth {
                continue;
            }
            let current_trigger_ns = spine
                .get(&current_uid)
                .and_then(|step| step.triggering_ts_ns)
                .unwrap_or(spec.t_ns);

            for predecessor_uid in arena.predecessors(&current_uid, EdgeCategory::CauseIntroducing)
            {
                if visited.contains(&predecessor_uid) {
                    continue;
                }
                visited.insert(predecessor_uid.clone());

                let revisions = self
                    .store
                    .revisions_in(&predecessor_uid, window)
                    .await
                    .map_err(escalate_fatal)?;
                // Most recent qualifying revision, within the slack bound of
                // the successor's trigger: causes precede effects, give or
                // take epsilon.
                let qualifying = revisions
                    .iter()
                    .filter(|rev| {
                        rev.significance
                            .as_ref()
                            .map_or(false, |sig| sig.score >= spec.min_significance)
                            && rev.timestamp_ns <= current_trigger_ns.saturating_add(slack_ns)
                    })
                    .next_back();

                if let Some(revision) = qualifying {
                    debug!(
                        uid = predecessor_uid,
                        ts = revision.timestamp_ns,
                        "spine candidate"
                    );
                    spine.insert(
                        predecessor_uid.clone(),
                        SpineStep {
                            uid: predecessor_uid.clone(),
                            step: 0,
                            triggering_ts_ns: Some(revision.timestamp_ns),
                            significance: revision
                                .significance
                                .as_ref()
                                .map_or(0.0, |sig| sig.score),
                            triggering_reasons: revision
                                .significance
                                .as_ref()
                                .map_or_else(Vec::new, |sig| sig.reasons.clone()),
                        },
                    );
                    frontier.push_back((predecessor_uid, depth + 1));
                }
                // A predecessor without a qualifying revision stays as a
                // side node: visited, emitted, never expanded.
            }
        }

        // Side attachments: every neighbour of a spine node that is not
        // itself on the spine.
        if !truncated {
            for edge in &edges_all {
                let spine_from = spine.contains_key(&edge.from_uid);
                let spine_to = spine.contains_key(&edge.to_uid);
                if spine_from && !visited.contains(&edge.to_uid) {
                    visited.insert(edge.to_uid.clone());
                }
                if spine_to && !visited.contains(&edge.from_uid) {
                    visited.insert(edge.from_uid.clone());
                }
            }
        }

        // Emit: nodes newly visited this page, edges whose second endpoint
        // was visited this page.
        let mut nodes: Vec<GraphNode> = visited
            .iter()
            .filter(|uid| !prior_visited.contains(*uid))
            .filter_map(|uid| arena.node(uid).cloned())
            .collect();
        nodes.sort_by(|a, b| a.resource.uid.cmp(&b.resource.uid));
        let edges: Vec<GraphEdge> = edges_all
            .iter()
            .filter(|edge| visited.contains(&edge.from_uid) && visited.contains(&edge.to_uid))
            .filter(|edge| {
                !(prior_visited.contains(&edge.from_uid)
                    && prior_visited.contains(&edge.to_uid))
            })
            .cloned()
            .collect();

        let spine_steps = number_spine(&spec.uid, spine);
        let cursor = truncated.then(|| CursorPayload::CausalFrontier {
            uid: spec.uid.clone(),
            timestamp_ns: spec.t_ns,
            visited: {
                let mut sorted: Vec<String> = visited.iter().cloned().collect();
                sorted.sort_unstable();
                sorted
            },
            frontier: frontier.iter().cloned().collect(),
        });

        let symptom_ref = arena
            .node(&spec.uid)
            .map(|node| node.resource.clone())
            .unwrap_or_else(|| entry.resource.clone());

        Ok(BuildOutcome {
            graph: CausalGraph {
                nodes,
                edges,
                observed_symptom: Some(symptom_ref),
                spine: spine_steps,
                lookback_ms: spec.lookback_ms,
                built_at_ns: chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default(),
                truncated,
            },
            cursor,
        })
    }

    // ========================================================================
    // Namespace mode
    // ========================================================================

    /// Assemble the full topology of a namespace at `t`, with anomalies
    /// when requested.
    pub async fn assemble_namespace(
        &self,
        namespace: &str,
        t_ns: i64,
        lookback_ms: i64,
        include_anomalies: bool,
        control: &QueryControl,
    ) -> Result<NamespaceAssembly> {
        if namespace.is_empty() {
            return Err(Error::InvalidArgument("empty namespace".to_owned()));
        }
        if lookback_ms < 0 {
            return Err(Error::InvalidArgument(format!(
                "negative lookback {lookback_ms}ms"
            )));
        }
        let window = TimeWindow::lookback(t_ns, lookback_ms);

        let (documents, truncated) = self.namespace_documents(namespace, t_ns, control).await?;
        let edges = self.extractor.extract(&documents);

        // Cluster-scoped resources stay only when an edge reaches them.
        let connected: HashSet<&str> = edges
            .iter()
            .flat_map(|edge| [edge.from_uid.as_str(), edge.to_uid.as_str()])
            .collect();
        let documents: Vec<ResourceDocument> = documents
            .into_iter()
            .filter(|doc| {
                !doc.resource.is_cluster_scoped() || connected.contains(doc.resource.uid.as_str())
            })
            .collect();

        let anomalies_by_uid = if include_anomalies {
            self.detect_anomalies(&documents, &edges, window).await?
        } else {
            HashMap::new()
        };

        let mut arena = GraphArena::new();
        for doc in &documents {
            arena.add_node(self.materialize_node(doc, t_ns, &anomalies_by_uid));
        }
        for edge in edges {
            arena.add_edge(edge);
        }
        let (nodes, edges) = arena.into_parts();

        Ok(NamespaceAssembly {
            documents,
            nodes,
            edges,
            truncated,
        })
    }

    // ========================================================================
    // Shared plumbing
    // ========================================================================

    /// Documents alive at `t`: the namespace's resources plus every
    /// cluster-scoped resource (filtered to reachable ones by the callers
    /// that need it). The bool reports deadline truncation.
    async fn namespace_documents(
        &self,
        namespace: &str,
        t_ns: i64,
        control: &QueryControl,
    ) -> Result<(Vec<ResourceDocument>, bool)> {
        let mut entries = self.store.list_entries(Some(namespace)).await?;
        let cluster_scoped = self
            .store
            .list_entries(None)
            .await?
            .into_iter()
            .filter(|entry| entry.resource.is_cluster_scoped());
        entries.extend(cluster_scoped);

        let mut documents = Vec::new();
        let mut truncated = false;
        for entry in entries {
            if control.is_interrupted() {
                truncated = true;
                break;
            }
            if !entry.alive_at(t_ns) {
                continue;
            }
            match self.resolver.try_document_at(&entry.resource.uid, t_ns).await {
                Ok(Some(doc)) => documents.push(doc),
                Ok(None) => {}
                Err(err) if err.is_fatal() => return Err(escalate_fatal(err)),
                Err(err) => {
                    warn!(uid = entry.resource.uid, %err, "skipping unresolvable resource");
                }
            }
        }
        Ok((documents, truncated))
    }

    /// Run the detector across the document set, grouped by uid.
    async fn detect_anomalies(
        &self,
        documents: &[ResourceDocument],
        edges: &[GraphEdge],
        window: TimeWindow,
    ) -> Result<HashMap<String, Vec<Anomaly>>> {
        let mut events_by_uid = HashMap::new();
        let mut revisions_by_uid = HashMap::new();
        let mut epochs_by_slot = HashMap::new();
        for doc in documents {
            let uid = doc.resource.uid.clone();
            events_by_uid.insert(uid.clone(), self.events.events_in(&uid, window));
            revisions_by_uid.insert(uid.clone(), self.store.revisions_in(&uid, window).await?);
            let slot = (
                doc.resource.kind.clone(),
                doc.resource.namespace.clone(),
                doc.resource.name.clone(),
            );
            if !epochs_by_slot.contains_key(&slot) {
                let epochs = self
                    .store
                    .uid_epochs(&slot.0, &slot.1, &slot.2)
                    .await?;
                epochs_by_slot.insert(slot, epochs);
            }
        }

        let context = DetectorContext {
            window,
            documents,
            edges,
            events_by_uid,
            revisions_by_uid,
            epochs_by_slot,
        };
        let mut grouped: HashMap<String, Vec<Anomaly>> = HashMap::new();
        for anomaly in self.detector.detect_all(&context) {
            grouped
                .entry(anomaly.node.uid.clone())
                .or_default()
                .push(anomaly);
        }
        Ok(grouped)
    }

    fn materialize_node(
        &self,
        doc: &ResourceDocument,
        t_ns: i64,
        anomalies_by_uid: &HashMap<String, Vec<Anomaly>>,
    ) -> GraphNode {
        let derived = derive_status(&doc.resource.kind, &doc.document);
        GraphNode {
            resource: doc.resource.clone(),
            status: derived.status,
            status_message: derived.message,
            labels: doc.labels(),
            latest_event: self.events.latest(&doc.resource.uid, t_ns),
            anomalies: anomalies_by_uid
                .get(&doc.resource.uid)
                .cloned()
                .unwrap_or_default(),
            is_cluster_scoped: doc.resource.is_cluster_scoped(),
        }
    }

    /// The symptom node when the resource is already deleted at t: its last
    /// live document, forced to Terminating.
    async fn terminated_symptom_node(
        &self,
        spec: &SymptomSpec,
        anomalies_by_uid: &HashMap<String, Vec<Anomaly>>,
    ) -> Result<GraphNode> {
        let deleted_at_ns = match self.resolver.state_at(&spec.uid, spec.t_ns).await? {
            ResolvedState::Terminated { deleted_at_ns } => deleted_at_ns,
            ResolvedState::Live { .. } => {
                // Alive but outside the namespace set; resolve directly.
                return match self.resolver.try_document_at(&spec.uid, spec.t_ns).await? {
                    Some(doc) => Ok(self.materialize_node(&doc, spec.t_ns, anomalies_by_uid)),
                    None => Err(Error::NotFound {
                        uid: spec.uid.clone(),
                        timestamp_ns: spec.t_ns,
                    }),
                };
            }
        };
        let doc = self
            .resolver
            .try_document_at(&spec.uid, deleted_at_ns.saturating_sub(1))
            .await?
            .ok_or_else(|| Error::NotFound {
                uid: spec.uid.clone(),
                timestamp_ns: spec.t_ns,
            })?;
        let mut node = self.materialize_node(&doc, spec.t_ns, anomalies_by_uid);
        node.status = ResourceStatus::Terminating;
        node.status_message = format!("deleted at {deleted_at_ns}");
        Ok(node)
    }

    async fn latest_revision_in(
        &self,
        uid: &str,
        window: TimeWindow,
    ) -> Result<Option<Revision>> {
        Ok(self
            .store
            .revisions_in(uid, window)
            .await?
            .into_iter()
            .next_back())
    }
}

/// The symptom's spine entry (step 0).
fn symptom_step(uid: &str, trigger: Option<&Revision>) -> SpineStep {
    SpineStep {
        uid: uid.to_owned(),
        step: 0,
        triggering_ts_ns: trigger.map(|rev| rev.timestamp_ns),
        significance: trigger
            .and_then(|rev| rev.significance.as_ref())
            .map_or(0.0, |sig| sig.score),
        triggering_reasons: trigger
            .and_then(|rev| rev.significance.as_ref())
            .map_or_else(Vec::new, |sig| sig.reasons.clone()),
    }
}

/// Assign spine step numbers: symptom 0, then by triggering-revision
/// recency (earliest trigger = highest step).
fn number_spine(symptom_uid: &str, spine: HashMap<String, SpineStep>) -> Vec<SpineStep> {
    let mut steps: Vec<SpineStep> = spine.into_values().collect();
    let symptom_index = steps.iter().position(|step| step.uid == symptom_uid);
    let symptom = symptom_index.map(|index| steps.remove(index));

    steps.sort_by(|a, b| {
        let a_ts = a.triggering_ts_ns.unwrap_or(i64::MIN);
        let b_ts = b.triggering_ts_ns.unwrap_or(i64::MIN);
        b_ts.cmp(&a_ts).then_with(|| a.uid.cmp(&b.uid))
    });

    let mut numbered = Vec::with_capacity(steps.len() + 1);
    if let Some(mut symptom) = symptom {
        symptom.step = 0;
        numbered.push(symptom);
    }
    for (offset, mut step) in steps.into_iter().enumerate() {
        step.step = offset + 1;
        numbered.push(step);
    }
    numbered
}

/// Resolution failures observed mid-build: fatal invariant breaks become
/// `Internal` for the caller, everything else passes through.
fn escalate_fatal(err: Error) -> Error {
    if matches!(err, Error::DiffCorruption { .. }) {
        Error::internal(format!("stored revision corruption: {err}"))
    } else {
        err
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::anomaly::AnomalyDetectorConfig;
    use crate::diff::DiffOp;
    use crate::indexer::RevisionIndexer;
    use crate::store::MemoryRevisionStore;
    use serde_json::{json, Value};

    const SEC: i64 = crate::constants::NANOS_PER_SECOND;

    struct Fixture {
        indexer: RevisionIndexer,
        builder: CausalGraphBuilder,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryRevisionStore::new());
        let resolver = Arc::new(SnapshotResolver::new(
            Arc::clone(&store) as Arc<dyn RevisionStore>,
            64,
        ));
        let events = Arc::new(EventIndex::new());
        let indexer = RevisionIndexer::new(
            Arc::clone(&store) as Arc<dyn RevisionStore>,
            Arc::clone(&resolver),
            20,
        );
        let builder = CausalGraphBuilder::new(
            store as Arc<dyn RevisionStore>,
            resolver,
            events,
            AnomalyDetector::new(AnomalyDetectorConfig::default()),
        );
        Fixture { indexer, builder }
    }

    fn deployment_doc(image: &str) -> Value {
        json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {"name": "web", "namespace": "prod", "uid": "dep-1"},
            "spec": {
                "replicas": 1,
                "selector": {"matchLabels": {"app": "web"}},
                "template": {"spec": {"containers": [{"name": "app", "image": image}]}}
            },
            "status": {"readyReplicas": 1}
        })
    }

    fn rs_doc() -> Value {
        json!({
            "apiVersion": "apps/v1",
            "kind": "ReplicaSet",
            "metadata": {
                "name": "web-abc", "namespace": "prod", "uid": "rs-1",
                "ownerReferences": [{"apiVersion": "apps/v1", "kind": "Deployment",
                                      "name": "web", "uid": "dep-1", "controller": true}]
            },
            "spec": {"replicas": 1},
            "status": {"readyReplicas": 1}
        })
    }

    fn pod_doc(waiting_reason: Option<&str>) -> Value {
        let state = match waiting_reason {
            Some(reason) => json!({"waiting": {"reason": reason}}),
            None => json!({"running": {}}),
        };
        json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": {
                "name": "web-abc-0", "namespace": "prod", "uid": "pod-1",
                "labels": {"app": "web"},
                "ownerReferences": [{"apiVersion": "apps/v1", "kind": "ReplicaSet",
                                      "name": "web-abc", "uid": "rs-1", "controller": true}]
            },
            "spec": {"containers": [{"name": "app", "image": "web:1"}]},
            "status": {
                "phase": "Running",
                "containerStatuses": [{"name": "app", "ready": waiting_reason.is_none(),
                                        "restartCount": 3, "state": state}]
            }
        })
    }

    /// CREATEs at t=10s, an image rollout on the deployment at t=340s, pod
    /// starts crashing afterwards; query at t=400s.
    async fn seed_rollout(fixture: &Fixture) {
        let rev = |uid: &str, ts: i64, doc: Value| Revision::create(uid, ts, doc);
        fixture
            .indexer
            .ingest(rev("dep-1", 10 * SEC, deployment_doc("web:1")))
            .await
            .unwrap();
        fixture.indexer.ingest(rev("rs-1", 11 * SEC, rs_doc())).await.unwrap();
        fixture
            .indexer
            .ingest(rev("pod-1", 12 * SEC, pod_doc(None)))
            .await
            .unwrap();
        fixture
            .indexer
            .ingest(Revision::update_with_diff(
                "dep-1",
                340 * SEC,
                vec![DiffOp::replace(
                    ".spec.template.spec.containers.0.image",
                    json!("web:1"),
                    json!("web:2"),
                )],
            ))
            .await
            .unwrap();
        fixture
            .indexer
            .ingest(Revision::update_with_snapshot(
                "pod-1",
                350 * SEC,
                pod_doc(Some("CrashLoopBackOff")),
            ))
            .await
            .unwrap();
    }

    fn spec() -> SymptomSpec {
        SymptomSpec {
            uid: "pod-1".into(),
            t_ns: 400 * SEC,
            lookback_ms: 30 * 60 * 1000,
            max_depth: 5,
            min_significance: 0.25,
            temporal_slack_ms: 30_000,
        }
    }

    #[tokio::test]
    async fn test_rollout_spine() {
        let fixture = fixture();
        seed_rollout(&fixture).await;

        let outcome = fixture
            .builder
            .build_symptom_graph(&spec(), &QueryControl::unbounded(), None)
            .await
            .unwrap();
        let graph = outcome.graph;
        assert!(!graph.truncated);
        assert!(outcome.cursor.is_none());

        // Spine: pod (symptom, step 0) <- rs <- deployment.
        let spine_uids = graph.spine_uids();
        assert_eq!(spine_uids[0], "pod-1");
        assert!(spine_uids.contains(&"rs-1") || spine_uids.contains(&"dep-1"));
        let dep_step = graph
            .spine
            .iter()
            .find(|step| step.uid == "dep-1")
            .expect("deployment on spine");
        assert!(dep_step.triggering_reasons.contains(&"image change".to_owned()));
        assert_eq!(dep_step.triggering_ts_ns, Some(340 * SEC));

        // The symptom node carries its crash anomaly.
        let symptom = graph.node("pod-1").unwrap();
        assert!(!symptom.anomalies.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_symptom_is_not_found() {
        let fixture = fixture();
        seed_rollout(&fixture).await;
        let err = fixture
            .builder
            .build_symptom_graph(
                &SymptomSpec {
                    uid: "ghost".into(),
                    ..spec()
                },
                &QueryControl::unbounded(),
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_negative_lookback_rejected() {
        let fixture = fixture();
        let err = fixture
            .builder
            .build_symptom_graph(
                &SymptomSpec {
                    lookback_ms: -5,
                    ..spec()
                },
                &QueryControl::unbounded(),
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_depth_bound_limits_spine() {
        let fixture = fixture();
        seed_rollout(&fixture).await;
        let outcome = fixture
            .builder
            .build_symptom_graph(
                &SymptomSpec {
                    max_depth: 0,
                    ..spec()
                },
                &QueryControl::unbounded(),
                None,
            )
            .await
            .unwrap();
        // Depth 0 forbids any expansion: the spine is the symptom alone.
        assert_eq!(outcome.graph.spine_uids(), vec!["pod-1"]);
    }

    #[tokio::test]
    async fn test_interrupted_build_returns_cursor() {
        let fixture = fixture();
        seed_rollout(&fixture).await;
        let control = QueryControl::unbounded();
        control.cancel();
        let outcome = fixture
            .builder
            .build_symptom_graph(&spec(), &control, None)
            .await
            .unwrap();
        assert!(outcome.graph.truncated);
        let cursor = outcome.cursor.expect("truncated build carries a cursor");
        match &cursor {
            CursorPayload::CausalFrontier { uid, frontier, .. } => {
                assert_eq!(uid, "pod-1");
                assert!(!frontier.is_empty());
            }
            other => panic!("unexpected cursor {other:?}"),
        }

        // Resuming with an unbounded control finishes the build; pages are
        // disjoint on nodes.
        let resumed = fixture
            .builder
            .build_symptom_graph(&spec(), &QueryControl::unbounded(), Some(&cursor))
            .await
            .unwrap();
        assert!(!resumed.graph.truncated);
        let first_page: HashSet<String> = outcome
            .graph
            .nodes
            .iter()
            .map(|n| n.resource.uid.clone())
            .collect();
        for node in &resumed.graph.nodes {
            assert!(!first_page.contains(&node.resource.uid));
        }
    }

    #[tokio::test]
    async fn test_mismatched_cursor_rejected() {
        let fixture = fixture();
        seed_rollout(&fixture).await;
        let cursor = CursorPayload::CausalFrontier {
            uid: "someone-else".into(),
            timestamp_ns: 1,
            visited: Vec::new(),
            frontier: Vec::new(),
        };
        let err = fixture
            .builder
            .build_symptom_graph(&spec(), &QueryControl::unbounded(), Some(&cursor))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_namespace_assembly() {
        let fixture = fixture();
        seed_rollout(&fixture).await;
        let assembly = fixture
            .builder
            .assemble_namespace("prod", 400 * SEC, 30 * 60 * 1000, true, &QueryControl::unbounded())
            .await
            .unwrap();
        assert!(!assembly.truncated);
        assert_eq!(assembly.nodes.len(), 3);
        // Ownership chain yields OWNS+MANAGES pairs.
        assert!(assembly.edges.len() >= 4);
        // The crashing pod carries anomalies.
        let pod = assembly
            .nodes
            .iter()
            .find(|node| node.resource.uid == "pod-1")
            .unwrap();
        assert!(!pod.anomalies.is_empty());
        assert_eq!(pod.status, ResourceStatus::Error);
    }

    #[tokio::test]
    async fn test_namespace_rebuild_is_deterministic() {
        let fixture = fixture();
        seed_rollout(&fixture).await;
        let first = fixture
            .builder
            .assemble_namespace("prod", 400 * SEC, 60_000, true, &QueryControl::unbounded())
            .await
            .unwrap();
        let second = fixture
            .builder
            .assemble_namespace("prod", 400 * SEC, 60_000, true, &QueryControl::unbounded())
            .await
            .unwrap();
        assert_eq!(first.nodes, second.nodes);
        assert_eq!(first.edges, second.edges);
    }
}
