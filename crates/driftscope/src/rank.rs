// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! # Path Ranking - Explainable Root-Cause Candidates
//!
//! Enumerates candidate root-cause paths over a symptom-mode causal graph
//! and ranks them by an explainable weighted score. Every factor is
//! normalised to `[0, 1]` and reported in the ranking breakdown, so a
//! caller can always answer "why is this candidate first".
//!
//! The ranker is deterministic: given the same graph and weights, the
//! ordering and every score are a pure function of the input. It never
//! fails - an empty graph yields an empty path list.

use crate::anomaly::AnomalySeverity;
use crate::constants::{
    DEFAULT_TEMPORAL_TAU_SECS, DEFAULT_WEIGHT_ANOMALY_DENSITY, DEFAULT_WEIGHT_CHANGE_MAGNITUDE,
    DEFAULT_WEIGHT_PROXIMITY, DEFAULT_WEIGHT_SEVERITY, DEFAULT_WEIGHT_TEMPORAL, NANOS_PER_SECOND,
};
use crate::graph::{CausalGraph, EdgeCategory, GraphNode, RelationshipType, SpineStep};
use crate::resource::ResourceRef;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Ranking weights. The defaults are reproducible configuration, not code.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RankerWeights {
    /// Weight of the temporal factor.
    pub temporal: f64,
    /// Weight of the severity factor.
    pub severity: f64,
    /// Weight of the proximity factor.
    pub proximity: f64,
    /// Weight of the change-magnitude factor.
    pub change_magnitude: f64,
    /// Weight of the anomaly-density factor.
    pub anomaly_density: f64,
}

impl Default for RankerWeights {
    fn default() -> Self {
        Self {
            temporal: DEFAULT_WEIGHT_TEMPORAL,
            severity: DEFAULT_WEIGHT_SEVERITY,
            proximity: DEFAULT_WEIGHT_PROXIMITY,
            change_magnitude: DEFAULT_WEIGHT_CHANGE_MAGNITUDE,
            anomaly_density: DEFAULT_WEIGHT_ANOMALY_DENSITY,
        }
    }
}

/// The per-factor breakdown behind a confidence score.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RankingBreakdown {
    /// `exp(-dt/tau)` between the root's triggering revision and the
    /// symptom's first failure.
    pub temporal_score: f64,
    /// Max anomaly severity on the path, mapped onto `[0, 1]`.
    pub severity_score: f64,
    /// `1 / (1 + effective causal distance)`.
    pub proximity_score: f64,
    /// Max revision significance on the path.
    pub change_magnitude_score: f64,
    /// Anomalies per step, clamped to 1.
    pub anomaly_density: f64,
    /// Total anomalies on the path.
    pub anomaly_count: u32,
    /// CAUSE_INTRODUCING hops between root and symptom.
    pub effective_causal_distance: u32,
}

/// One node on a candidate path, root first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CausalPathStep {
    /// The step's resource.
    pub resource: ResourceRef,
    /// Relationship to the next step (absent on the symptom).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relationship_to_next: Option<RelationshipType>,
    /// The step's triggering revision timestamp, when one qualified.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub triggering_ts_ns: Option<i64>,
    /// The step's triggering revision significance.
    pub significance: f64,
}

/// A ranked candidate explanation from a root to the observed symptom.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CausalPath {
    /// Deterministic path id.
    pub id: String,
    /// The candidate root.
    pub candidate_root: ResourceRef,
    /// Steps from root to symptom.
    pub steps: Vec<CausalPathStep>,
    /// Weighted confidence in `[0, 1]`.
    pub confidence_score: f64,
    /// Factor breakdown.
    pub ranking: RankingBreakdown,
    /// Templated human-readable explanation.
    pub explanation: String,
}

/// Ranks candidate paths over a symptom-mode causal graph.
#[derive(Debug, Clone)]
pub struct PathRanker {
    weights: RankerWeights,
    tau_secs: f64,
}

impl Default for PathRanker {
    fn default() -> Self {
        Self::new(RankerWeights::default(), DEFAULT_TEMPORAL_TAU_SECS)
    }
}

impl PathRanker {
    /// A ranker with explicit weights and temporal decay constant.
    #[must_use]
    pub fn new(weights: RankerWeights, tau_secs: f64) -> Self {
        Self { weights, tau_secs }
    }

    /// Enumerate and rank every maximal spine walk ending at the symptom.
    #[must_use]
    pub fn rank(&self, graph: &CausalGraph) -> Vec<CausalPath> {
        let Some(symptom) = &graph.observed_symptom else {
            return Vec::new();
        };
        if graph.spine.is_empty() {
            return Vec::new();
        }

        let steps_by_uid: HashMap<&str, &SpineStep> = graph
            .spine
            .iter()
            .map(|step| (step.uid.as_str(), step))
            .collect();

        // Spine adjacency: cause-introducing edges between spine nodes,
        // pointing in the direction change propagates.
        let mut outgoing: HashMap<&str, Vec<(&str, RelationshipType)>> = HashMap::new();
        let mut has_incoming: HashSet<&str> = HashSet::new();
        for edge in &graph.edges {
            if edge.edge_category != EdgeCategory::CauseIntroducing {
                continue;
            }
            let (from, to) = (edge.from_uid.as_str(), edge.to_uid.as_str());
            if !steps_by_uid.contains_key(from) || !steps_by_uid.contains_key(to) {
                continue;
            }
            outgoing
                .entry(from)
                .or_default()
                .push((to, edge.relationship_type));
            has_incoming.insert(to);
        }
        for targets in outgoing.values_mut() {
            targets.sort();
        }

        let mut roots: Vec<&str> = graph
            .spine
            .iter()
            .map(|step| step.uid.as_str())
            .filter(|uid| !has_incoming.contains(uid) && *uid != symptom.uid)
            .collect();
        roots.sort_unstable();

        let mut paths = Vec::new();
        for root in roots {
            let mut walk = vec![(root, None)];
            let mut visited: HashSet<&str> = HashSet::new();
            visited.insert(root);
            self.enumerate(
                graph,
                &steps_by_uid,
                &outgoing,
                &symptom.uid,
                &mut walk,
                &mut visited,
                &mut paths,
            );
        }

        paths.sort_by(|a, b| {
            b.confidence_score
                .total_cmp(&a.confidence_score)
                .then_with(|| b.ranking.severity_score.total_cmp(&a.ranking.severity_score))
                .then_with(|| {
                    a.ranking
                        .effective_causal_distance
                        .cmp(&b.ranking.effective_causal_distance)
                })
                .then_with(|| {
                    let a_ts = a.steps.first().and_then(|s| s.triggering_ts_ns).unwrap_or(i64::MAX);
                    let b_ts = b.steps.first().and_then(|s| s.triggering_ts_ns).unwrap_or(i64::MAX);
                    a_ts.cmp(&b_ts)
                })
                .then_with(|| a.candidate_root.uid.cmp(&b.candidate_root.uid))
        });
        paths
    }

    #[allow(clippy::too_many_arguments)]
    fn enumerate<'a>(
        &self,
        graph: &CausalGraph,
        steps_by_uid: &HashMap<&str, &SpineStep>,
        outgoing: &HashMap<&'a str, Vec<(&'a str, RelationshipType)>>,
        symptom_uid: &str,
        walk: &mut Vec<(&'a str, Option<RelationshipType>)>,
        visited: &mut HashSet<&'a str>,
        paths: &mut Vec<CausalPath>,
    ) {
        let (current, _) = walk[walk.len() - 1];
        if current == symptom_uid {
            paths.push(self.score_walk(graph, steps_by_uid, walk));
            return;
        }
        let Some(targets) = outgoing.get(current) else {
            return;
        };
        for &(next, relationship) in targets {
            if !visited.insert(next) {
                continue;
            }
            // Record the relationship on the step we are leaving.
            let index = walk.len() - 1;
            walk[index].1 = Some(relationship);
            walk.push((next, None));
            self.enumerate(graph, steps_by_uid, outgoing, symptom_uid, walk, visited, paths);
            walk.pop();
            walk[index].1 = None;
            visited.remove(next);
        }
    }

    fn score_walk(
        &self,
        graph: &CausalGraph,
        steps_by_uid: &HashMap<&str, &SpineStep>,
        walk: &[(&str, Option<RelationshipType>)],
    ) -> CausalPath {
        let nodes: Vec<&GraphNode> = walk
            .iter()
            .filter_map(|(uid, _)| graph.node(uid))
            .collect();

        let anomaly_count: u32 = nodes.iter().map(|node| node.anomalies.len() as u32).sum();
        let severity_score = nodes
            .iter()
            .flat_map(|node| node.anomalies.iter())
            .map(|anomaly| severity_weight(anomaly.severity))
            .fold(0.0_f64, f64::max);

        let effective_causal_distance = walk.len().saturating_sub(1) as u32;
        let proximity_score = 1.0 / (1.0 + f64::from(effective_causal_distance));

        let change_magnitude_score = walk
            .iter()
            .filter_map(|(uid, _)| steps_by_uid.get(uid))
            .map(|step| step.significance)
            .fold(0.0_f64, f64::max);

        let root_step = walk.first().and_then(|(uid, _)| steps_by_uid.get(uid));
        let temporal_score = match (
            root_step.and_then(|step| step.triggering_ts_ns),
            symptom_first_failure(graph),
        ) {
            (Some(root_ts), Some(failure_ts)) => {
                let dt_secs =
                    (failure_ts.saturating_sub(root_ts)).max(0) as f64 / NANOS_PER_SECOND as f64;
                (-dt_secs / self.tau_secs).exp()
            }
            _ => 0.0,
        };

        let anomaly_density =
            (f64::from(anomaly_count) / walk.len().max(1) as f64).clamp(0.0, 1.0);

        let ranking = RankingBreakdown {
            temporal_score,
            severity_score,
            proximity_score,
            change_magnitude_score,
            anomaly_density,
            anomaly_count,
            effective_causal_distance,
        };
        let confidence_score = (self.weights.temporal * temporal_score
            + self.weights.severity * severity_score
            + self.weights.proximity * proximity_score
            + self.weights.change_magnitude * change_magnitude_score
            + self.weights.anomaly_density * anomaly_density)
            .clamp(0.0, 1.0);

        let steps: Vec<CausalPathStep> = walk
            .iter()
            .map(|(uid, relationship)| {
                let spine_step = steps_by_uid.get(uid);
                CausalPathStep {
                    resource: graph
                        .node(uid)
                        .map(|node| node.resource.clone())
                        .unwrap_or_default(),
                    relationship_to_next: *relationship,
                    triggering_ts_ns: spine_step.and_then(|step| step.triggering_ts_ns),
                    significance: spine_step.map_or(0.0, |step| step.significance),
                }
            })
            .collect();

        let candidate_root = steps
            .first()
            .map(|step| step.resource.clone())
            .unwrap_or_default();
        let explanation = self.explain(&candidate_root, &steps, steps_by_uid, &ranking);
        let id = walk
            .iter()
            .map(|(uid, _)| *uid)
            .collect::<Vec<&str>>()
            .join(">");

        CausalPath {
            id,
            candidate_root,
            steps,
            confidence_score,
            ranking,
            explanation,
        }
    }

    fn explain(
        &self,
        root: &ResourceRef,
        steps: &[CausalPathStep],
        steps_by_uid: &HashMap<&str, &SpineStep>,
        ranking: &RankingBreakdown,
    ) -> String {
        let mut explanation = format!("{} is the likely root cause", root);

        if let Some(spine_step) = steps_by_uid.get(root.uid.as_str()) {
            if !spine_step.triggering_reasons.is_empty() {
                let all = spine_step.triggering_reasons.join(", ");
                explanation.push_str(&format!(" ({all})"));
            }
        }
        if let (Some(first), Some(second)) = (steps.first(), steps.get(1)) {
            if let Some(relationship) = first.relationship_to_next {
                explanation.push_str(&format!(
                    "; it {} {}",
                    relationship_verb(relationship),
                    second.resource
                ));
            }
        }
        explanation.push_str(&format!(
            "; dominant factor: {}",
            self.dominant_factor(ranking)
        ));
        explanation
    }

    fn dominant_factor(&self, ranking: &RankingBreakdown) -> String {
        let contributions = [
            ("temporal proximity", self.weights.temporal * ranking.temporal_score),
            ("anomaly severity", self.weights.severity * ranking.severity_score),
            ("causal proximity", self.weights.proximity * ranking.proximity_score),
            (
                "change magnitude",
                self.weights.change_magnitude * ranking.change_magnitude_score,
            ),
            (
                "anomaly density",
                self.weights.anomaly_density * ranking.anomaly_density,
            ),
        ];
        let (name, value) = contributions
            .iter()
            .fold(("temporal proximity", f64::MIN), |best, &(name, value)| {
                if value > best.1 {
                    (name, value)
                } else {
                    best
                }
            });
        format!("{name} ({value:.2})")
    }
}

fn severity_weight(severity: AnomalySeverity) -> f64 {
    match severity {
        AnomalySeverity::Low => 0.25,
        AnomalySeverity::Medium => 0.5,
        AnomalySeverity::High => 0.75,
        AnomalySeverity::Critical => 1.0,
    }
}

/// The symptom's first failure instant: the earliest anomaly seen on the
/// symptom node, falling back to its spine step's triggering revision.
fn symptom_first_failure(graph: &CausalGraph) -> Option<i64> {
    let symptom = graph.observed_symptom.as_ref()?;
    let from_anomalies = graph
        .node(&symptom.uid)
        .and_then(|node| node.anomalies.iter().map(|a| a.first_seen_ns).min());
    from_anomalies.or_else(|| {
        graph
            .spine
            .iter()
            .find(|step| step.uid == symptom.uid)
            .and_then(|step| step.triggering_ts_ns)
    })
}

fn relationship_verb(relationship: RelationshipType) -> &'static str {
    match relationship {
        RelationshipType::Owns => "owns",
        RelationshipType::Selects => "selects",
        RelationshipType::References => "is referenced by",
        RelationshipType::Manages => "manages",
        RelationshipType::ScheduledOn => "schedules",
        RelationshipType::MemberOf => "groups",
    }
}
