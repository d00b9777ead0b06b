// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! # Anomaly Detection - Classifying Recent Behaviour
//!
//! Classifies each node's recent behaviour into zero or more [`Anomaly`]
//! records over a bounded taxonomy. Inputs per node are the reconstructed
//! state at the query instant, the Kubernetes Events for the node inside the
//! lookback window, and the significance-scored revisions in the same window.
//!
//! ## Key Concepts
//!
//! - **Severity** is the max of the event-type, rate, and duration signals.
//! - **Count** sums the cluster-reported event counts plus the distinct
//!   revision bumps inside the window.
//! - **Critical** is reserved: it requires a lifecycle-terminating signal or
//!   repeated error-level signals in the window.
//!
//! Detection is best-effort: every rule runs isolated, and a rule that
//! panics is logged and contributes nothing rather than corrupting the
//! result.

use crate::event::KubeEvent;
use crate::graph::{GraphEdge, RelationshipType};
use crate::relationships::named_references;
use crate::resource::{ResourceDocument, ResourceRef};
use crate::revision::{Revision, TimeWindow};
use crate::store::UidEpoch;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::warn;

/// The coarse grouping of an anomaly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnomalyCategory {
    /// Workload health (crashes, image pulls, probes, replicas).
    Workload,
    /// Service networking (endpoints, selectors, policies).
    Network,
    /// Volumes and claims.
    Storage,
    /// Configuration references and drift.
    Config,
    /// Lifecycle pathologies (stuck deletion, churn).
    Lifecycle,
}

impl std::fmt::Display for AnomalyCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AnomalyCategory::Workload => write!(f, "workload"),
            AnomalyCategory::Network => write!(f, "network"),
            AnomalyCategory::Storage => write!(f, "storage"),
            AnomalyCategory::Config => write!(f, "config"),
            AnomalyCategory::Lifecycle => write!(f, "lifecycle"),
        }
    }
}

/// The closed anomaly tag set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AnomalyType {
    /// Container restarting in a backoff loop.
    CrashLoopBackOff,
    /// Image cannot be pulled.
    ImagePullBackOff,
    /// Container killed by the OOM killer.
    #[serde(rename = "OOMKilled")]
    OomKilled,
    /// Readiness probe failing.
    ReadinessFailing,
    /// Liveness probe failing.
    LivenessFailing,
    /// Fewer ready replicas than desired.
    ReplicasUnavailable,
    /// Service has no ready endpoints.
    EndpointsEmpty,
    /// Service selector matches no pods.
    ServiceSelectorDrift,
    /// A deny-all ingress policy isolates the pod.
    NetworkPolicyIsolation,
    /// PersistentVolumeClaim not bound.
    #[serde(rename = "PVCBindingFailed")]
    PvcBindingFailed,
    /// Volume mount or attach failing.
    VolumeMountFailed,
    /// A referenced ConfigMap does not exist.
    ConfigMapMissing,
    /// A referenced Secret does not exist.
    SecretMissing,
    /// A referenced ConfigMap/Secret changed inside the lookback.
    ConfigDrift,
    /// Deletion requested but not completing.
    StuckTerminating,
    /// The same (kind, namespace, name) churned through several uids.
    RepeatedCreateDelete,
}

impl AnomalyType {
    /// The category this tag belongs to.
    #[must_use]
    pub fn category(self) -> AnomalyCategory {
        match self {
            AnomalyType::CrashLoopBackOff
            | AnomalyType::ImagePullBackOff
            | AnomalyType::OomKilled
            | AnomalyType::ReadinessFailing
            | AnomalyType::LivenessFailing
            | AnomalyType::ReplicasUnavailable => AnomalyCategory::Workload,
            AnomalyType::EndpointsEmpty
            | AnomalyType::ServiceSelectorDrift
            | AnomalyType::NetworkPolicyIsolation => AnomalyCategory::Network,
            AnomalyType::PvcBindingFailed | AnomalyType::VolumeMountFailed => {
                AnomalyCategory::Storage
            }
            AnomalyType::ConfigMapMissing
            | AnomalyType::SecretMissing
            | AnomalyType::ConfigDrift => AnomalyCategory::Config,
            AnomalyType::StuckTerminating | AnomalyType::RepeatedCreateDelete => {
                AnomalyCategory::Lifecycle
            }
        }
    }
}

impl std::fmt::Display for AnomalyType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tag = match self {
            AnomalyType::CrashLoopBackOff => "CrashLoopBackOff",
            AnomalyType::ImagePullBackOff => "ImagePullBackOff",
            AnomalyType::OomKilled => "OOMKilled",
            AnomalyType::ReadinessFailing => "ReadinessFailing",
            AnomalyType::LivenessFailing => "LivenessFailing",
            AnomalyType::ReplicasUnavailable => "ReplicasUnavailable",
            AnomalyType::EndpointsEmpty => "EndpointsEmpty",
            AnomalyType::ServiceSelectorDrift => "ServiceSelectorDrift",
            AnomalyType::NetworkPolicyIsolation => "NetworkPolicyIsolation",
            AnomalyType::PvcBindingFailed => "PVCBindingFailed",
            AnomalyType::VolumeMountFailed => "VolumeMountFailed",
            AnomalyType::ConfigMapMissing => "ConfigMapMissing",
            AnomalyType::SecretMissing => "SecretMissing",
            AnomalyType::ConfigDrift => "ConfigDrift",
            AnomalyType::StuckTerminating => "StuckTerminating",
            AnomalyType::RepeatedCreateDelete => "RepeatedCreateDelete",
        };
        write!(f, "{tag}")
    }
}

/// Severity, ordered.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum AnomalySeverity {
    /// Notable, not yet concerning.
    Low,
    /// Degraded; should be investigated.
    Medium,
    /// Failing.
    High,
    /// Failing with a lifecycle-terminating or repeated error signal.
    Critical,
}

impl std::fmt::Display for AnomalySeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AnomalySeverity::Low => write!(f, "low"),
            AnomalySeverity::Medium => write!(f, "medium"),
            AnomalySeverity::High => write!(f, "high"),
            AnomalySeverity::Critical => write!(f, "critical"),
        }
    }
}

/// One classified behavioural finding for a node over a window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Anomaly {
    /// The node the finding is attached to.
    pub node: ResourceRef,
    /// Coarse grouping.
    pub category: AnomalyCategory,
    /// The closed tag.
    pub anomaly_type: AnomalyType,
    /// Ordered severity.
    pub severity: AnomalySeverity,
    /// Human-readable summary.
    pub summary: String,
    /// Free-form supporting detail.
    pub details: HashMap<String, Value>,
    /// Earliest contributing signal.
    pub first_seen_ns: i64,
    /// Latest contributing signal.
    pub last_seen_ns: i64,
    /// Event counts plus revision bumps inside the window.
    pub count: u32,
}

impl Anomaly {
    /// A finding with its category derived from the tag and the seen-window
    /// collapsed to one instant.
    #[must_use]
    pub fn new(
        node: ResourceRef,
        anomaly_type: AnomalyType,
        severity: AnomalySeverity,
        summary: impl Into<String>,
        seen_ns: i64,
    ) -> Self {
        Self {
            node,
            category: anomaly_type.category(),
            anomaly_type,
            severity,
            summary: summary.into(),
            details: HashMap::new(),
            first_seen_ns: seen_ns,
            last_seen_ns: seen_ns,
            count: 1,
        }
    }

    /// Add a supporting detail.
    #[must_use]
    pub fn with_detail(mut self, key: impl Into<String>, value: Value) -> Self {
        self.details.insert(key.into(), value);
        self
    }

    /// Set the contributing-signal bounds.
    #[must_use]
    pub fn with_seen_window(mut self, first_ns: i64, last_ns: i64) -> Self {
        self.first_seen_ns = first_ns;
        self.last_seen_ns = last_ns;
        self
    }

    /// Set the signal count.
    #[must_use]
    pub fn with_count(mut self, count: u32) -> Self {
        self.count = count;
        self
    }
}

/// Tunables for the detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyDetectorConfig {
    /// Deletion older than this counts as stuck (milliseconds).
    pub stuck_terminating_threshold_ms: i64,
    /// Uid churns within the lookback that count as cycling.
    pub churn_threshold: usize,
    /// Signal count at which a rate is considered failing.
    pub high_rate_threshold: u32,
    /// Repeated error-level signals needed before Critical is allowed.
    pub repeated_error_threshold: u32,
}

impl Default for AnomalyDetectorConfig {
    fn default() -> Self {
        Self {
            stuck_terminating_threshold_ms: crate::constants::DEFAULT_STUCK_TERMINATING_THRESHOLD_MS,
            churn_threshold: crate::constants::DEFAULT_CHURN_THRESHOLD,
            high_rate_threshold: 3,
            repeated_error_threshold: 3,
        }
    }
}

impl AnomalyDetectorConfig {
    /// Defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the stuck-terminating threshold.
    #[must_use]
    pub fn with_stuck_terminating_threshold_ms(mut self, threshold_ms: i64) -> Self {
        self.stuck_terminating_threshold_ms = threshold_ms;
        self
    }

    /// Set the churn threshold.
    #[must_use]
    pub fn with_churn_threshold(mut self, threshold: usize) -> Self {
        self.churn_threshold = threshold;
        self
    }
}

/// Everything the rules can see during one detection pass.
pub struct DetectorContext<'a> {
    /// The lookback window.
    pub window: TimeWindow,
    /// Documents alive at the query instant.
    pub documents: &'a [ResourceDocument],
    /// Edges extracted over the same document set.
    pub edges: &'a [GraphEdge],
    /// Events inside the window, keyed by involved uid.
    pub events_by_uid: HashMap<String, Vec<KubeEvent>>,
    /// Revisions inside the window, keyed by uid.
    pub revisions_by_uid: HashMap<String, Vec<Revision>>,
    /// Uid succession per (kind, namespace, name) slot.
    pub epochs_by_slot: HashMap<(String, String, String), Vec<UidEpoch>>,
}

impl DetectorContext<'_> {
    fn events(&self, uid: &str) -> &[KubeEvent] {
        self.events_by_uid.get(uid).map_or(&[], Vec::as_slice)
    }

    fn revisions(&self, uid: &str) -> &[Revision] {
        self.revisions_by_uid.get(uid).map_or(&[], Vec::as_slice)
    }

    fn document(&self, uid: &str) -> Option<&ResourceDocument> {
        self.documents.iter().find(|doc| doc.resource.uid == uid)
    }

    fn edge_targets(&self, from_uid: &str, relationship: RelationshipType) -> Vec<&str> {
        self.edges
            .iter()
            .filter(|edge| edge.from_uid == from_uid && edge.relationship_type == relationship)
            .map(|edge| edge.to_uid.as_str())
            .collect()
    }
}

/// Aggregated signal evidence for one finding.
struct SignalWindow {
    count: u32,
    first_ns: i64,
    last_ns: i64,
}

/// Sum event counts and revision bumps, bounding the seen window.
fn signal_window(
    events: &[KubeEvent],
    revisions: &[Revision],
    fallback_ns: i64,
) -> SignalWindow {
    let mut count = 0;
    let mut first_ns = i64::MAX;
    let mut last_ns = i64::MIN;
    for event in events {
        count += event.count;
        first_ns = first_ns.min(event.first_timestamp_ns);
        last_ns = last_ns.max(event.last_timestamp_ns);
    }
    for revision in revisions {
        count += 1;
        first_ns = first_ns.min(revision.timestamp_ns);
        last_ns = last_ns.max(revision.timestamp_ns);
    }
    if first_ns == i64::MAX {
        first_ns = fallback_ns;
        last_ns = fallback_ns;
    }
    SignalWindow {
        count,
        first_ns,
        last_ns,
    }
}

/// One registered detection rule.
struct DetectionRule {
    name: &'static str,
    run: fn(&AnomalyDetectorConfig, &DetectorContext<'_>, &ResourceDocument) -> Vec<Anomaly>,
}

/// Classifies node behaviour against the closed taxonomy.
pub struct AnomalyDetector {
    config: AnomalyDetectorConfig,
    rules: Vec<DetectionRule>,
}

impl Default for AnomalyDetector {
    fn default() -> Self {
        Self::new(AnomalyDetectorConfig::default())
    }
}

impl AnomalyDetector {
    /// A detector with the full rule set registered.
    #[must_use]
    pub fn new(config: AnomalyDetectorConfig) -> Self {
        Self {
            config,
            rules: vec![
                DetectionRule { name: "container_states", run: container_state_rule },
                DetectionRule { name: "probes", run: probe_rule },
                DetectionRule { name: "replicas", run: replicas_rule },
                DetectionRule { name: "endpoints", run: endpoints_rule },
                DetectionRule { name: "selector_drift", run: selector_drift_rule },
                DetectionRule { name: "network_policy", run: network_policy_rule },
                DetectionRule { name: "storage", run: storage_rule },
                DetectionRule { name: "config_references", run: config_reference_rule },
                DetectionRule { name: "config_drift", run: config_drift_rule },
                DetectionRule { name: "stuck_terminating", run: stuck_terminating_rule },
                DetectionRule { name: "create_delete_churn", run: churn_rule },
            ],
        }
    }

    /// Detect anomalies for one node. Each rule runs isolated; a panicking
    /// rule is logged and skipped.
    #[must_use]
    pub fn detect(&self, context: &DetectorContext<'_>, doc: &ResourceDocument) -> Vec<Anomaly> {
        let mut anomalies = Vec::new();
        for rule in &self.rules {
            let outcome = catch_unwind(AssertUnwindSafe(|| {
                (rule.run)(&self.config, context, doc)
            }));
            match outcome {
                Ok(mut found) => anomalies.append(&mut found),
                Err(_) => {
                    warn!(
                        rule = rule.name,
                        uid = doc.resource.uid,
                        "detection rule panicked; skipping"
                    );
                }
            }
        }
        anomalies
    }

    /// Detect anomalies for every document in the context.
    #[must_use]
    pub fn detect_all(&self, context: &DetectorContext<'_>) -> Vec<Anomaly> {
        context
            .documents
            .iter()
            .flat_map(|doc| self.detect(context, doc))
            .collect()
    }
}

// ============================================================================
// Workload rules
// ============================================================================

/// Events that corroborate container backoff loops.
const BACKOFF_EVENT_REASONS: &[&str] = &["BackOff", "CrashLoopBackOff", "Failed"];

fn container_state_rule(
    config: &AnomalyDetectorConfig,
    context: &DetectorContext<'_>,
    doc: &ResourceDocument,
) -> Vec<Anomaly> {
    if doc.resource.kind != "Pod" {
        return Vec::new();
    }
    let Some(statuses) = doc
        .document
        .pointer("/status/containerStatuses")
        .and_then(Value::as_array)
    else {
        return Vec::new();
    };

    let mut anomalies = Vec::new();
    for status in statuses {
        let container = status.get("name").and_then(Value::as_str).unwrap_or("");
        let waiting = status
            .pointer("/state/waiting/reason")
            .and_then(Value::as_str);
        let restart_count = status
            .get("restartCount")
            .and_then(Value::as_u64)
            .unwrap_or(0) as u32;

        if let Some(reason) = waiting {
            let tag = match reason {
                "CrashLoopBackOff" => Some(AnomalyType::CrashLoopBackOff),
                "ImagePullBackOff" | "ErrImagePull" => Some(AnomalyType::ImagePullBackOff),
                _ => None,
            };
            if let Some(tag) = tag {
                let related: Vec<KubeEvent> = context
                    .events(&doc.resource.uid)
                    .iter()
                    .filter(|event| BACKOFF_EVENT_REASONS.contains(&event.reason.as_str()))
                    .cloned()
                    .collect();
                let signals =
                    signal_window(&related, context.revisions(&doc.resource.uid), context.window.end_ns);
                // Backoff loops are failing outright; a high recurrence rate
                // alone never promotes past High (no terminating signal).
                let severity = AnomalySeverity::High;
                anomalies.push(
                    Anomaly::new(
                        doc.resource.clone(),
                        tag,
                        severity,
                        format!("container '{container}' waiting: {reason}"),
                        signals.last_ns,
                    )
                    .with_seen_window(signals.first_ns, signals.last_ns)
                    .with_count(signals.count.max(1))
                    .with_detail("container", Value::String(container.to_owned()))
                    .with_detail("restartCount", Value::from(restart_count)),
                );
            }
        }

        if status
            .pointer("/lastState/terminated/reason")
            .and_then(Value::as_str)
            == Some("OOMKilled")
        {
            let signals = signal_window(
                context.events(&doc.resource.uid),
                context.revisions(&doc.resource.uid),
                context.window.end_ns,
            );
            // Repeated OOM kills are terminating signals: Critical territory.
            let severity = if restart_count >= config.repeated_error_threshold {
                AnomalySeverity::Critical
            } else {
                AnomalySeverity::High
            };
            anomalies.push(
                Anomaly::new(
                    doc.resource.clone(),
                    AnomalyType::OomKilled,
                    severity,
                    format!("container '{container}' terminated: OOMKilled"),
                    signals.last_ns,
                )
                .with_seen_window(signals.first_ns, signals.last_ns)
                .with_count(signals.count.max(restart_count).max(1))
                .with_detail("container", Value::String(container.to_owned())),
            );
        }
    }
    anomalies
}

fn probe_rule(
    config: &AnomalyDetectorConfig,
    context: &DetectorContext<'_>,
    doc: &ResourceDocument,
) -> Vec<Anomaly> {
    if doc.resource.kind != "Pod" {
        return Vec::new();
    }
    let mut anomalies = Vec::new();
    for (needle, tag, base) in [
        ("Readiness probe failed", AnomalyType::ReadinessFailing, AnomalySeverity::Medium),
        ("Liveness probe failed", AnomalyType::LivenessFailing, AnomalySeverity::High),
    ] {
        let related: Vec<KubeEvent> = context
            .events(&doc.resource.uid)
            .iter()
            .filter(|event| event.reason == "Unhealthy" && event.note.contains(needle))
            .cloned()
            .collect();
        if related.is_empty() {
            continue;
        }
        let signals = signal_window(&related, &[], context.window.end_ns);
        let severity = if signals.count >= config.high_rate_threshold {
            base.max(AnomalySeverity::High)
        } else {
            base
        };
        anomalies.push(
            Anomaly::new(
                doc.resource.clone(),
                tag,
                severity,
                format!("{needle} {}x in window", signals.count),
                signals.last_ns,
            )
            .with_seen_window(signals.first_ns, signals.last_ns)
            .with_count(signals.count),
        );
    }
    anomalies
}

fn replicas_rule(
    _config: &AnomalyDetectorConfig,
    context: &DetectorContext<'_>,
    doc: &ResourceDocument,
) -> Vec<Anomaly> {
    if !matches!(
        doc.resource.kind.as_str(),
        "Deployment" | "ReplicaSet" | "StatefulSet"
    ) {
        return Vec::new();
    }
    let desired = doc
        .document
        .pointer("/spec/replicas")
        .and_then(Value::as_i64)
        .unwrap_or(1);
    let ready = doc
        .document
        .pointer("/status/readyReplicas")
        .and_then(Value::as_i64)
        .unwrap_or(0);
    if desired == 0 || ready >= desired {
        return Vec::new();
    }
    let signals = signal_window(
        context.events(&doc.resource.uid),
        context.revisions(&doc.resource.uid),
        context.window.end_ns,
    );
    let severity = if ready == 0 {
        AnomalySeverity::High
    } else {
        AnomalySeverity::Medium
    };
    vec![Anomaly::new(
        doc.resource.clone(),
        AnomalyType::ReplicasUnavailable,
        severity,
        format!("{ready}/{desired} replicas ready"),
        signals.last_ns,
    )
    .with_seen_window(signals.first_ns, signals.last_ns)
    .with_count(signals.count.max(1))
    .with_detail("desired", Value::from(desired))
    .with_detail("ready", Value::from(ready))]
}

// ============================================================================
// Network rules
// ============================================================================

fn service_selector(doc: &ResourceDocument) -> Option<crate::selector::LabelSelector> {
    let raw = doc.document.pointer("/spec/selector")?;
    let selector = crate::selector::LabelSelector::parse(raw).ok()?;
    if selector.is_empty() {
        None
    } else {
        Some(selector)
    }
}

fn endpoints_rule(
    _config: &AnomalyDetectorConfig,
    context: &DetectorContext<'_>,
    doc: &ResourceDocument,
) -> Vec<Anomaly> {
    if doc.resource.kind != "Service" || service_selector(doc).is_none() {
        return Vec::new();
    }
    let slice_uids = context.edge_targets(&doc.resource.uid, RelationshipType::MemberOf);
    let has_endpoints = slice_uids.iter().any(|uid| {
        context.document(uid).is_some_and(|slice| {
            slice
                .document
                .get("endpoints")
                .and_then(Value::as_array)
                .is_some_and(|endpoints| !endpoints.is_empty())
        })
    });
    if has_endpoints {
        return Vec::new();
    }
    vec![Anomaly::new(
        doc.resource.clone(),
        AnomalyType::EndpointsEmpty,
        AnomalySeverity::High,
        "service has no ready endpoints",
        context.window.end_ns,
    )
    .with_detail("endpointSlices", Value::from(slice_uids.len()))]
}

fn selector_drift_rule(
    _config: &AnomalyDetectorConfig,
    context: &DetectorContext<'_>,
    doc: &ResourceDocument,
) -> Vec<Anomaly> {
    if doc.resource.kind != "Service" {
        return Vec::new();
    }
    let Some(selector) = service_selector(doc) else {
        return Vec::new();
    };
    let selects_pod = context
        .edge_targets(&doc.resource.uid, RelationshipType::Selects)
        .iter()
        .any(|uid| {
            context
                .document(uid)
                .is_some_and(|target| target.resource.kind == "Pod")
        });
    if selects_pod {
        return Vec::new();
    }
    vec![Anomaly::new(
        doc.resource.clone(),
        AnomalyType::ServiceSelectorDrift,
        AnomalySeverity::High,
        "service selector matches no pods",
        context.window.end_ns,
    )
    .with_detail(
        "selector",
        serde_json::to_value(&selector).unwrap_or(Value::Null),
    )]
}

fn network_policy_rule(
    _config: &AnomalyDetectorConfig,
    context: &DetectorContext<'_>,
    doc: &ResourceDocument,
) -> Vec<Anomaly> {
    if doc.resource.kind != "Pod" {
        return Vec::new();
    }
    // A policy that selects this pod, declares Ingress, and allows nothing.
    let isolating = context.edges.iter().find(|edge| {
        edge.to_uid == doc.resource.uid
            && edge.relationship_type == RelationshipType::Selects
            && context.document(&edge.from_uid).is_some_and(|policy| {
                policy.resource.kind == "NetworkPolicy"
                    && policy
                        .document
                        .pointer("/spec/policyTypes")
                        .and_then(Value::as_array)
                        .is_some_and(|types| types.iter().any(|t| t == "Ingress"))
                    && policy
                        .document
                        .pointer("/spec/ingress")
                        .and_then(Value::as_array)
                        .map_or(true, Vec::is_empty)
            })
    });
    let Some(edge) = isolating else {
        return Vec::new();
    };
    let policy_name = context
        .document(&edge.from_uid)
        .map(|policy| policy.resource.name.clone())
        .unwrap_or_default();
    vec![Anomaly::new(
        doc.resource.clone(),
        AnomalyType::NetworkPolicyIsolation,
        AnomalySeverity::Medium,
        format!("ingress denied by NetworkPolicy '{policy_name}'"),
        context.window.end_ns,
    )
    .with_detail("policy", Value::String(policy_name))]
}

// ============================================================================
// Storage rules
// ============================================================================

const MOUNT_FAILURE_REASONS: &[&str] = &["FailedMount", "FailedAttachVolume", "FailedMapVolume"];

fn storage_rule(
    config: &AnomalyDetectorConfig,
    context: &DetectorContext<'_>,
    doc: &ResourceDocument,
) -> Vec<Anomaly> {
    let mut anomalies = Vec::new();

    if doc.resource.kind == "PersistentVolumeClaim" {
        let phase = doc
            .document
            .pointer("/status/phase")
            .and_then(Value::as_str)
            .unwrap_or("");
        if phase == "Pending" || phase == "Lost" {
            let related: Vec<KubeEvent> = context
                .events(&doc.resource.uid)
                .iter()
                .filter(|event| {
                    event.reason == "ProvisioningFailed" || event.reason == "FailedBinding"
                })
                .cloned()
                .collect();
            let signals = signal_window(&related, &[], context.window.end_ns);
            let severity = if phase == "Lost" {
                AnomalySeverity::High
            } else if signals.count >= config.high_rate_threshold {
                AnomalySeverity::High
            } else {
                AnomalySeverity::Medium
            };
            anomalies.push(
                Anomaly::new(
                    doc.resource.clone(),
                    AnomalyType::PvcBindingFailed,
                    severity,
                    format!("claim is {phase}"),
                    signals.last_ns,
                )
                .with_seen_window(signals.first_ns, signals.last_ns)
                .with_count(signals.count.max(1)),
            );
        }
    }

    if doc.resource.kind == "Pod" {
        let related: Vec<KubeEvent> = context
            .events(&doc.resource.uid)
            .iter()
            .filter(|event| MOUNT_FAILURE_REASONS.contains(&event.reason.as_str()))
            .cloned()
            .collect();
        if !related.is_empty() {
            let signals = signal_window(&related, &[], context.window.end_ns);
            anomalies.push(
                Anomaly::new(
                    doc.resource.clone(),
                    AnomalyType::VolumeMountFailed,
                    AnomalySeverity::High,
                    format!("volume mount failing ({}x)", signals.count),
                    signals.last_ns,
                )
                .with_seen_window(signals.first_ns, signals.last_ns)
                .with_count(signals.count),
            );
        }
    }

    anomalies
}

// ============================================================================
// Config rules
// ============================================================================

fn config_reference_rule(
    _config: &AnomalyDetectorConfig,
    context: &DetectorContext<'_>,
    doc: &ResourceDocument,
) -> Vec<Anomaly> {
    let mut anomalies = Vec::new();
    for (target_kind, name) in named_references(doc) {
        let tag = match target_kind {
            "ConfigMap" => AnomalyType::ConfigMapMissing,
            "Secret" => AnomalyType::SecretMissing,
            _ => continue,
        };
        let exists = context.documents.iter().any(|candidate| {
            candidate.resource.kind == target_kind
                && candidate.resource.namespace == doc.resource.namespace
                && candidate.resource.name == name
        });
        if exists {
            continue;
        }
        anomalies.push(
            Anomaly::new(
                doc.resource.clone(),
                tag,
                AnomalySeverity::High,
                format!("referenced {target_kind} '{name}' not found"),
                context.window.end_ns,
            )
            .with_detail("name", Value::String(name)),
        );
    }
    anomalies
}

fn config_drift_rule(
    _config: &AnomalyDetectorConfig,
    context: &DetectorContext<'_>,
    doc: &ResourceDocument,
) -> Vec<Anomaly> {
    let mut anomalies = Vec::new();
    for target_uid in context.edge_targets(&doc.resource.uid, RelationshipType::References) {
        let Some(target) = context.document(target_uid) else {
            continue;
        };
        if target.resource.kind != "ConfigMap" && target.resource.kind != "Secret" {
            continue;
        }
        let changed: Vec<&Revision> = context
            .revisions(target_uid)
            .iter()
            .filter(|rev| rev.diff.as_ref().is_some_and(|diff| !diff.is_empty()))
            .collect();
        if changed.is_empty() {
            continue;
        }
        let first = changed.iter().map(|rev| rev.timestamp_ns).min().unwrap_or(0);
        let last = changed.iter().map(|rev| rev.timestamp_ns).max().unwrap_or(0);
        anomalies.push(
            Anomaly::new(
                doc.resource.clone(),
                AnomalyType::ConfigDrift,
                AnomalySeverity::Medium,
                format!(
                    "referenced {} '{}' changed {}x in window",
                    target.resource.kind,
                    target.resource.name,
                    changed.len()
                ),
                last,
            )
            .with_seen_window(first, last)
            .with_count(changed.len() as u32)
            .with_detail("target", Value::String(target.resource.uid.clone())),
        );
    }
    anomalies
}

// ============================================================================
// Lifecycle rules
// ============================================================================

fn stuck_terminating_rule(
    config: &AnomalyDetectorConfig,
    context: &DetectorContext<'_>,
    doc: &ResourceDocument,
) -> Vec<Anomaly> {
    let Some(raw) = doc.deletion_timestamp() else {
        return Vec::new();
    };
    let Ok(requested) = chrono::DateTime::parse_from_rfc3339(raw) else {
        warn!(
            uid = doc.resource.uid,
            raw, "unparseable deletionTimestamp; skipping stuck-terminating check"
        );
        return Vec::new();
    };
    let requested_ns = requested
        .timestamp_nanos_opt()
        .unwrap_or(context.window.end_ns);
    let elapsed_ms =
        (context.window.end_ns - requested_ns) / crate::constants::NANOS_PER_MILLI;
    if elapsed_ms <= config.stuck_terminating_threshold_ms {
        return Vec::new();
    }
    // Deletion is a terminating signal, so long-stuck deletion may go
    // Critical.
    let severity = if elapsed_ms > config.stuck_terminating_threshold_ms * 2 {
        AnomalySeverity::Critical
    } else {
        AnomalySeverity::High
    };
    vec![Anomaly::new(
        doc.resource.clone(),
        AnomalyType::StuckTerminating,
        severity,
        format!("terminating for {elapsed_ms}ms"),
        context.window.end_ns,
    )
    .with_seen_window(requested_ns, context.window.end_ns)
    .with_detail("elapsedMs", Value::from(elapsed_ms))]
}

fn churn_rule(
    config: &AnomalyDetectorConfig,
    context: &DetectorContext<'_>,
    doc: &ResourceDocument,
) -> Vec<Anomaly> {
    let slot = (
        doc.resource.kind.clone(),
        doc.resource.namespace.clone(),
        doc.resource.name.clone(),
    );
    let Some(epochs) = context.epochs_by_slot.get(&slot) else {
        return Vec::new();
    };
    let churned: Vec<&UidEpoch> = epochs
        .iter()
        .filter(|epoch| context.window.contains(epoch.created_ns))
        .collect();
    if churned.len() < config.churn_threshold {
        return Vec::new();
    }
    let first = churned.iter().map(|e| e.created_ns).min().unwrap_or(0);
    let last = churned.iter().map(|e| e.created_ns).max().unwrap_or(0);
    // Each churn is a delete+create pair: a terminating signal.
    let severity = if churned.len() >= config.churn_threshold * 2 {
        AnomalySeverity::Critical
    } else {
        AnomalySeverity::High
    };
    vec![Anomaly::new(
        doc.resource.clone(),
        AnomalyType::RepeatedCreateDelete,
        severity,
        format!("{} uid churns in window", churned.len()),
        last,
    )
    .with_seen_window(first, last)
    .with_count(churned.len() as u32)]
}

#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::KubeEvent;
    use serde_json::json;

    fn crashing_pod() -> ResourceDocument {
        ResourceDocument::new(json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": {"name": "web-0", "namespace": "prod", "uid": "pod-1"},
            "status": {
                "phase": "Running",
                "containerStatuses": [{
                    "name": "app",
                    "ready": false,
                    "restartCount": 5,
                    "state": {"waiting": {"reason": "CrashLoopBackOff"}}
                }]
            }
        }))
        .unwrap()
    }

    fn context_with<'a>(
        documents: &'a [ResourceDocument],
        edges: &'a [GraphEdge],
        events: Vec<KubeEvent>,
    ) -> DetectorContext<'a> {
        let mut events_by_uid: HashMap<String, Vec<KubeEvent>> = HashMap::new();
        for event in events {
            events_by_uid
                .entry(event.involved_uid.clone())
                .or_default()
                .push(event);
        }
        DetectorContext {
            window: TimeWindow::new(0, 300_000_000_000),
            documents,
            edges,
            events_by_uid,
            revisions_by_uid: HashMap::new(),
            epochs_by_slot: HashMap::new(),
        }
    }

    #[test]
    fn test_crashloop_classification() {
        let docs = vec![crashing_pod()];
        let events: Vec<KubeEvent> = (0..4)
            .map(|i| KubeEvent::warning("pod-1", "BackOff", 10_000_000_000 * (i + 1)))
            .collect();
        let context = context_with(&docs, &[], events);
        let anomalies = AnomalyDetector::default().detect(&context, &docs[0]);

        let crash = anomalies
            .iter()
            .find(|a| a.anomaly_type == AnomalyType::CrashLoopBackOff)
            .unwrap();
        assert_eq!(crash.category, AnomalyCategory::Workload);
        assert_eq!(crash.severity, AnomalySeverity::High);
        assert!(crash.count >= 4);
        assert!(crash.first_seen_ns <= crash.last_seen_ns);
    }

    #[test]
    fn test_oom_killed_critical_requires_repeats() {
        let mk = |restarts: u32| {
            ResourceDocument::new(json!({
                "apiVersion": "v1",
                "kind": "Pod",
                "metadata": {"name": "web-0", "namespace": "prod", "uid": "pod-1"},
                "status": {"containerStatuses": [{
                    "name": "app",
                    "restartCount": restarts,
                    "lastState": {"terminated": {"reason": "OOMKilled"}}
                }]}
            }))
            .unwrap()
        };
        let docs = vec![mk(1)];
        let context = context_with(&docs, &[], Vec::new());
        let anomalies = AnomalyDetector::default().detect(&context, &docs[0]);
        assert_eq!(
            anomalies
                .iter()
                .find(|a| a.anomaly_type == AnomalyType::OomKilled)
                .unwrap()
                .severity,
            AnomalySeverity::High
        );

        let docs = vec![mk(4)];
        let context = context_with(&docs, &[], Vec::new());
        let anomalies = AnomalyDetector::default().detect(&context, &docs[0]);
        assert_eq!(
            anomalies
                .iter()
                .find(|a| a.anomaly_type == AnomalyType::OomKilled)
                .unwrap()
                .severity,
            AnomalySeverity::Critical
        );
    }

    #[test]
    fn test_replicas_unavailable() {
        let docs = vec![ResourceDocument::new(json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {"name": "web", "namespace": "prod", "uid": "dep-1"},
            "spec": {"replicas": 3},
            "status": {"readyReplicas": 0}
        }))
        .unwrap()];
        let context = context_with(&docs, &[], Vec::new());
        let anomalies = AnomalyDetector::default().detect(&context, &docs[0]);
        let finding = anomalies
            .iter()
            .find(|a| a.anomaly_type == AnomalyType::ReplicasUnavailable)
            .unwrap();
        assert_eq!(finding.severity, AnomalySeverity::High);
    }

    #[test]
    fn test_selector_drift_and_empty_endpoints() {
        let docs = vec![ResourceDocument::new(json!({
            "apiVersion": "v1",
            "kind": "Service",
            "metadata": {"name": "web", "namespace": "prod", "uid": "svc-1"},
            "spec": {"selector": {"app": "web"}}
        }))
        .unwrap()];
        // No SELECTS or MEMBER_OF edges at all.
        let context = context_with(&docs, &[], Vec::new());
        let anomalies = AnomalyDetector::default().detect(&context, &docs[0]);
        assert!(anomalies
            .iter()
            .any(|a| a.anomaly_type == AnomalyType::ServiceSelectorDrift));
        assert!(anomalies
            .iter()
            .any(|a| a.anomaly_type == AnomalyType::EndpointsEmpty
                && a.category == AnomalyCategory::Network));
    }

    #[test]
    fn test_missing_configmap() {
        let docs = vec![ResourceDocument::new(json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": {"name": "web-0", "namespace": "prod", "uid": "pod-1"},
            "spec": {"containers": [{
                "name": "app",
                "envFrom": [{"configMapRef": {"name": "absent-config"}}]
            }]}
        }))
        .unwrap()];
        let context = context_with(&docs, &[], Vec::new());
        let anomalies = AnomalyDetector::default().detect(&context, &docs[0]);
        let finding = anomalies
            .iter()
            .find(|a| a.anomaly_type == AnomalyType::ConfigMapMissing)
            .unwrap();
        assert_eq!(finding.category, AnomalyCategory::Config);
        assert!(finding.summary.contains("absent-config"));
    }

    #[test]
    fn test_stuck_terminating_goes_critical() {
        let docs = vec![ResourceDocument::new(json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": {
                "name": "web-0", "namespace": "prod", "uid": "pod-1",
                "deletionTimestamp": "1970-01-01T00:00:10Z"
            }
        }))
        .unwrap()];
        // Window ends at +300s, deletion requested at +10s: 290s elapsed,
        // more than twice the 60s threshold configured below.
        let detector = AnomalyDetector::new(
            AnomalyDetectorConfig::new().with_stuck_terminating_threshold_ms(60_000),
        );
        let context = context_with(&docs, &[], Vec::new());
        let anomalies = detector.detect(&context, &docs[0]);
        let finding = anomalies
            .iter()
            .find(|a| a.anomaly_type == AnomalyType::StuckTerminating)
            .unwrap();
        assert_eq!(finding.category, AnomalyCategory::Lifecycle);
        assert_eq!(finding.severity, AnomalySeverity::Critical);
    }

    #[test]
    fn test_churn_detection() {
        let docs = vec![crashing_pod()];
        let mut context = context_with(&docs, &[], Vec::new());
        context.epochs_by_slot.insert(
            ("Pod".into(), "prod".into(), "web-0".into()),
            (0..3)
                .map(|i| UidEpoch {
                    uid: format!("pod-{i}"),
                    created_ns: 1_000 * (i + 1),
                    deleted_ns: if i < 2 { Some(1_500 * (i + 1)) } else { None },
                })
                .collect(),
        );
        let anomalies = AnomalyDetector::default().detect(&context, &docs[0]);
        let finding = anomalies
            .iter()
            .find(|a| a.anomaly_type == AnomalyType::RepeatedCreateDelete)
            .unwrap();
        assert_eq!(finding.count, 3);
        assert_eq!(finding.severity, AnomalySeverity::High);
    }

    #[test]
    fn test_rule_isolation_on_panic() {
        fn panicking_rule(
            _: &AnomalyDetectorConfig,
            _: &DetectorContext<'_>,
            _: &ResourceDocument,
        ) -> Vec<Anomaly> {
            panic!("rule bug");
        }
        let mut detector = AnomalyDetector::default();
        detector.rules.insert(
            0,
            DetectionRule {
                name: "broken",
                run: panicking_rule,
            },
        );
        let docs = vec![crashing_pod()];
        let context = context_with(&docs, &[], Vec::new());
        // The broken rule is swallowed; the container rule still fires.
        let anomalies = detector.detect(&context, &docs[0]);
        assert!(anomalies
            .iter()
            .any(|a| a.anomaly_type == AnomalyType::CrashLoopBackOff));
    }

    #[test]
    fn test_severity_ordering() {
        assert!(AnomalySeverity::Critical > AnomalySeverity::High);
        assert!(AnomalySeverity::High > AnomalySeverity::Medium);
        assert!(AnomalySeverity::Medium > AnomalySeverity::Low);
    }

    #[test]
    fn test_tag_wire_names() {
        assert_eq!(
            serde_json::to_string(&AnomalyType::OomKilled).unwrap(),
            "\"OOMKilled\""
        );
        assert_eq!(
            serde_json::to_string(&AnomalyType::PvcBindingFailed).unwrap(),
            "\"PVCBindingFailed\""
        );
        assert_eq!(AnomalyType::OomKilled.to_string(), "OOMKilled");
    }
}
