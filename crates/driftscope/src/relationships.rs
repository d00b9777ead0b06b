// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! # Relationship Extractor - Typed Edges From Resource State
//!
//! Derives the typed edges among a set of resource documents valid at one
//! instant: ownership, label selection, spec references, scheduling, and
//! service membership.
//!
//! Edge derivation is a registered-rules list: each rule is a plain function
//! over the extraction context, so the rule set extends without inheritance.
//! A malformed selector or owner reference is logged and skipped - extraction
//! never fails the enclosing query. Unknown kinds take the generic path
//! (owner references and labels only).
//!
//! The recognised REFERENCES fields are a closed table
//! ([`POD_SPEC_REFERENCE_FIELDS`], [`INGRESS_REFERENCE_FIELDS`]); kinds
//! outside the table contribute no REFERENCES edges.

use crate::graph::{dedupe_edges, GraphEdge, RelationshipType};
use crate::resource::ResourceDocument;
use crate::selector::LabelSelector;
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, warn};

/// A spec field that names another resource.
#[derive(Debug, Clone, Copy)]
pub struct ReferenceField {
    /// Wildcard dotted path (`*` matches every array element).
    pub path: &'static str,
    /// Kind of the referenced resource.
    pub target_kind: &'static str,
}

/// Reference fields rooted at a pod spec. Workload kinds reach these through
/// their pod-template prefix; see [`pod_spec_prefix`].
pub const POD_SPEC_REFERENCE_FIELDS: &[ReferenceField] = &[
    ReferenceField { path: "volumes.*.configMap.name", target_kind: "ConfigMap" },
    ReferenceField { path: "volumes.*.secret.secretName", target_kind: "Secret" },
    ReferenceField { path: "volumes.*.projected.sources.*.configMap.name", target_kind: "ConfigMap" },
    ReferenceField { path: "volumes.*.projected.sources.*.secret.name", target_kind: "Secret" },
    ReferenceField { path: "volumes.*.persistentVolumeClaim.claimName", target_kind: "PersistentVolumeClaim" },
    ReferenceField { path: "containers.*.envFrom.*.configMapRef.name", target_kind: "ConfigMap" },
    ReferenceField { path: "containers.*.envFrom.*.secretRef.name", target_kind: "Secret" },
    ReferenceField { path: "containers.*.env.*.valueFrom.configMapKeyRef.name", target_kind: "ConfigMap" },
    ReferenceField { path: "containers.*.env.*.valueFrom.secretKeyRef.name", target_kind: "Secret" },
    ReferenceField { path: "initContainers.*.envFrom.*.configMapRef.name", target_kind: "ConfigMap" },
    ReferenceField { path: "initContainers.*.envFrom.*.secretRef.name", target_kind: "Secret" },
    ReferenceField { path: "initContainers.*.env.*.valueFrom.configMapKeyRef.name", target_kind: "ConfigMap" },
    ReferenceField { path: "initContainers.*.env.*.valueFrom.secretKeyRef.name", target_kind: "Secret" },
    ReferenceField { path: "imagePullSecrets.*.name", target_kind: "Secret" },
    ReferenceField { path: "serviceAccountName", target_kind: "ServiceAccount" },
];

/// Reference fields rooted at an Ingress document.
pub const INGRESS_REFERENCE_FIELDS: &[ReferenceField] = &[
    ReferenceField { path: "spec.defaultBackend.service.name", target_kind: "Service" },
    ReferenceField { path: "spec.rules.*.http.paths.*.backend.service.name", target_kind: "Service" },
    ReferenceField { path: "spec.tls.*.secretName", target_kind: "Secret" },
];

/// Where a kind's pod spec lives, for kinds that embed one.
#[must_use]
pub fn pod_spec_prefix(kind: &str) -> Option<&'static str> {
    match kind {
        "Pod" => Some("spec"),
        "Deployment" | "ReplicaSet" | "StatefulSet" | "DaemonSet" | "Job" => {
            Some("spec.template.spec")
        }
        "CronJob" => Some("spec.jobTemplate.spec.template.spec"),
        _ => None,
    }
}

/// Kinds carrying a label selector, with the selector's location.
fn selector_pointer(kind: &str) -> Option<&'static str> {
    match kind {
        "Service" => Some("/spec/selector"),
        "Deployment" | "ReplicaSet" | "DaemonSet" | "StatefulSet" => Some("/spec/selector"),
        "NetworkPolicy" => Some("/spec/podSelector"),
        _ => None,
    }
}

/// Lookup structures shared by every rule during one extraction pass.
pub struct ExtractionContext<'a> {
    documents: &'a [ResourceDocument],
    by_uid: HashMap<&'a str, &'a ResourceDocument>,
    by_kind_name: HashMap<(&'a str, &'a str, &'a str), &'a str>,
}

impl<'a> ExtractionContext<'a> {
    /// Build the lookups over one document set.
    #[must_use]
    pub fn new(documents: &'a [ResourceDocument]) -> Self {
        let mut by_uid = HashMap::new();
        let mut by_kind_name = HashMap::new();
        for doc in documents {
            by_uid.insert(doc.resource.uid.as_str(), doc);
            by_kind_name.insert(
                (
                    doc.resource.kind.as_str(),
                    doc.resource.namespace.as_str(),
                    doc.resource.name.as_str(),
                ),
                doc.resource.uid.as_str(),
            );
        }
        Self {
            documents,
            by_uid,
            by_kind_name,
        }
    }

    fn contains_uid(&self, uid: &str) -> bool {
        self.by_uid.contains_key(uid)
    }

    fn uid_of(&self, kind: &str, namespace: &str, name: &str) -> Option<&str> {
        self.by_kind_name.get(&(kind, namespace, name)).copied()
    }
}

/// One registered derivation rule.
struct ExtractionRule {
    name: &'static str,
    run: fn(&ExtractionContext<'_>, &ResourceDocument) -> Vec<GraphEdge>,
}

/// Derives typed edges from a set of documents valid at one instant.
pub struct RelationshipExtractor {
    rules: Vec<ExtractionRule>,
}

impl Default for RelationshipExtractor {
    fn default() -> Self {
        Self {
            rules: vec![
                ExtractionRule { name: "owner_references", run: owner_reference_edges },
                ExtractionRule { name: "label_selectors", run: selector_edges },
                ExtractionRule { name: "spec_references", run: reference_edges },
                ExtractionRule { name: "scheduled_on", run: scheduled_on_edges },
                ExtractionRule { name: "service_membership", run: member_of_edges },
            ],
        }
    }
}

impl RelationshipExtractor {
    /// An extractor with the full rule set registered.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Run every rule across the document set and collapse duplicates.
    ///
    /// Idempotent: the same input always yields the same edge set, sorted.
    #[must_use]
    pub fn extract(&self, documents: &[ResourceDocument]) -> Vec<GraphEdge> {
        let context = ExtractionContext::new(documents);
        let mut edges = Vec::new();
        for rule in &self.rules {
            for doc in documents {
                let mut produced = (rule.run)(&context, doc);
                debug!(
                    rule = rule.name,
                    uid = doc.resource.uid,
                    count = produced.len(),
                    "rule produced edges"
                );
                edges.append(&mut produced);
            }
        }
        dedupe_edges(edges)
    }
}

/// OWNS (and the MANAGES refinement) from `metadata.ownerReferences`.
fn owner_reference_edges(
    context: &ExtractionContext<'_>,
    dependent: &ResourceDocument,
) -> Vec<GraphEdge> {
    let owners = dependent.owner_references();
    let raw_count = dependent.raw_owner_reference_count();
    if owners.len() < raw_count {
        warn!(
            uid = dependent.resource.uid,
            skipped = raw_count - owners.len(),
            "skipping malformed owner references"
        );
    }

    let mut edges = Vec::new();
    for owner in owners {
        if !context.contains_uid(&owner.uid) {
            // Owner outside the queried set; the edge has nowhere to land.
            continue;
        }
        edges.push(GraphEdge::new(
            owner.uid.clone(),
            dependent.resource.uid.clone(),
            RelationshipType::Owns,
        ));
        if owner.controller {
            edges.push(GraphEdge::new(
                owner.uid,
                dependent.resource.uid.clone(),
                RelationshipType::Manages,
            ));
        }
    }
    edges
}

/// SELECTS from label-selector fields.
fn selector_edges(context: &ExtractionContext<'_>, source: &ResourceDocument) -> Vec<GraphEdge> {
    let Some(pointer) = selector_pointer(&source.resource.kind) else {
        return Vec::new();
    };
    let Some(raw) = source.document.pointer(pointer) else {
        return Vec::new();
    };
    let selector = match LabelSelector::parse(raw) {
        Ok(selector) => selector,
        Err(err) => {
            warn!(
                uid = source.resource.uid,
                kind = source.resource.kind,
                %err,
                "skipping malformed selector"
            );
            return Vec::new();
        }
    };
    // A Service with an empty selector map is selector-less: it selects
    // nothing. An empty NetworkPolicy podSelector selects the namespace.
    if selector.is_empty() && source.resource.kind == "Service" {
        return Vec::new();
    }

    let mut edges = Vec::new();
    for target in context.documents {
        if target.resource.uid == source.resource.uid {
            continue;
        }
        let namespace_ok = source.resource.is_cluster_scoped()
            || source.resource.namespace == target.resource.namespace;
        if !namespace_ok {
            continue;
        }
        if selector.matches(&target.labels()) {
            edges.push(GraphEdge::new(
                source.resource.uid.clone(),
                target.resource.uid.clone(),
                RelationshipType::Selects,
            ));
        }
    }
    edges
}

/// Every (kind, name) a document names through the closed reference table.
/// Whether the named target actually exists is the caller's concern: edge
/// derivation resolves them, missing-reference anomaly detection does not.
#[must_use]
pub fn named_references(source: &ResourceDocument) -> Vec<(&'static str, String)> {
    let mut named: Vec<(&'static str, String)> = Vec::new();

    if let Some(prefix) = pod_spec_prefix(&source.resource.kind) {
        if let Some(pod_spec) = walk_single(&source.document, prefix) {
            for field in POD_SPEC_REFERENCE_FIELDS {
                for name in collect_strings(pod_spec, field.path) {
                    named.push((field.target_kind, name));
                }
            }
        }
    }
    if source.resource.kind == "Ingress" {
        for field in INGRESS_REFERENCE_FIELDS {
            for name in collect_strings(&source.document, field.path) {
                named.push((field.target_kind, name));
            }
        }
    }
    named
}

/// REFERENCES from the closed field table.
fn reference_edges(context: &ExtractionContext<'_>, source: &ResourceDocument) -> Vec<GraphEdge> {
    let mut edges = Vec::new();
    for (target_kind, name) in named_references(source) {
        let Some(target_uid) =
            context.uid_of(target_kind, &source.resource.namespace, &name)
        else {
            continue;
        };
        edges.push(GraphEdge::new(
            source.resource.uid.clone(),
            target_uid,
            RelationshipType::References,
        ));
    }
    edges
}

/// SCHEDULED_ON: Node -> Pod via `spec.nodeName`.
fn scheduled_on_edges(context: &ExtractionContext<'_>, pod: &ResourceDocument) -> Vec<GraphEdge> {
    if pod.resource.kind != "Pod" {
        return Vec::new();
    }
    let Some(node_name) = pod
        .document
        .pointer("/spec/nodeName")
        .and_then(Value::as_str)
    else {
        return Vec::new();
    };
    let Some(node_uid) = context.uid_of("Node", "", node_name) else {
        return Vec::new();
    };
    vec![GraphEdge::new(
        node_uid,
        pod.resource.uid.clone(),
        RelationshipType::ScheduledOn,
    )]
}

/// MEMBER_OF: Service -> EndpointSlice via owner reference or the
/// `kubernetes.io/service-name` label.
fn member_of_edges(context: &ExtractionContext<'_>, slice: &ResourceDocument) -> Vec<GraphEdge> {
    if slice.resource.kind != "EndpointSlice" {
        return Vec::new();
    }
    for owner in slice.owner_references() {
        if owner.kind == "Service" && context.contains_uid(&owner.uid) {
            return vec![GraphEdge::new(
                owner.uid,
                slice.resource.uid.clone(),
                RelationshipType::MemberOf,
            )];
        }
    }
    let service_name = slice
        .labels()
        .get("kubernetes.io/service-name")
        .cloned();
    if let Some(name) = service_name {
        if let Some(service_uid) =
            context.uid_of("Service", &slice.resource.namespace, &name)
        {
            return vec![GraphEdge::new(
                service_uid,
                slice.resource.uid.clone(),
                RelationshipType::MemberOf,
            )];
        }
    }
    Vec::new()
}

/// Walk a non-wildcard dotted path.
fn walk_single<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut cursor = value;
    for segment in path.split('.') {
        cursor = cursor.get(segment)?;
    }
    Some(cursor)
}

/// Collect every string at a wildcard dotted path.
fn collect_strings(value: &Value, path: &str) -> Vec<String> {
    let segments: Vec<&str> = path.split('.').collect();
    let mut out = Vec::new();
    collect_strings_inner(value, &segments, &mut out);
    out
}

fn collect_strings_inner(value: &Value, segments: &[&str], out: &mut Vec<String>) {
    let Some((head, rest)) = segments.split_first() else {
        if let Some(s) = value.as_str() {
            out.push(s.to_owned());
        }
        return;
    };
    if *head == "*" {
        if let Some(items) = value.as_array() {
            for item in items {
                collect_strings_inner(item, rest, out);
            }
        }
        return;
    }
    if let Some(next) = value.get(head) {
        collect_strings_inner(next, rest, out);
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::EdgeCategory;
    use serde_json::json;

    fn doc(value: Value) -> ResourceDocument {
        ResourceDocument::new(value).unwrap()
    }

    fn deployment() -> ResourceDocument {
        doc(json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {"name": "web", "namespace": "prod", "uid": "dep-1"},
            "spec": {
                "selector": {"matchLabels": {"app": "web"}},
                "template": {"spec": {"containers": [{"name": "app", "image": "web:1"}]}}
            }
        }))
    }

    fn pod_owned_by(owner_uid: &str, controller: bool) -> ResourceDocument {
        doc(json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": {
                "name": "web-abc", "namespace": "prod", "uid": "pod-1",
                "labels": {"app": "web"},
                "ownerReferences": [{
                    "apiVersion": "apps/v1", "kind": "ReplicaSet", "name": "web-rs",
                    "uid": owner_uid, "controller": controller
                }]
            },
            "spec": {"containers": [{"name": "app", "image": "web:1"}]}
        }))
    }

    #[test]
    fn test_controller_owner_emits_owns_and_manages() {
        let owner = doc(json!({
            "apiVersion": "apps/v1",
            "kind": "ReplicaSet",
            "metadata": {"name": "web-rs", "namespace": "prod", "uid": "rs-1"},
            "spec": {}
        }));
        let docs = vec![owner, pod_owned_by("rs-1", true)];
        let edges = RelationshipExtractor::new().extract(&docs);

        let owner_edges: Vec<&GraphEdge> = edges
            .iter()
            .filter(|e| e.from_uid == "rs-1" && e.to_uid == "pod-1")
            .collect();
        assert_eq!(owner_edges.len(), 2);
        assert!(owner_edges
            .iter()
            .any(|e| e.relationship_type == RelationshipType::Owns
                && e.edge_category == EdgeCategory::Ownership));
        assert!(owner_edges
            .iter()
            .any(|e| e.relationship_type == RelationshipType::Manages
                && e.edge_category == EdgeCategory::CauseIntroducing));
    }

    #[test]
    fn test_non_controller_owner_emits_owns_only() {
        let owner = doc(json!({
            "apiVersion": "apps/v1",
            "kind": "ReplicaSet",
            "metadata": {"name": "web-rs", "namespace": "prod", "uid": "rs-1"},
            "spec": {}
        }));
        let docs = vec![owner, pod_owned_by("rs-1", false)];
        let edges = RelationshipExtractor::new().extract(&docs);
        assert!(edges
            .iter()
            .all(|e| e.relationship_type != RelationshipType::Manages));
    }

    #[test]
    fn test_selector_match_same_namespace_only() {
        let service = doc(json!({
            "apiVersion": "v1",
            "kind": "Service",
            "metadata": {"name": "web", "namespace": "prod", "uid": "svc-1"},
            "spec": {"selector": {"app": "web"}}
        }));
        let matching = doc(json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": {"name": "web-1", "namespace": "prod", "uid": "pod-1",
                          "labels": {"app": "web"}},
            "spec": {}
        }));
        let other_ns = doc(json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": {"name": "web-2", "namespace": "dev", "uid": "pod-2",
                          "labels": {"app": "web"}},
            "spec": {}
        }));
        let unlabeled = doc(json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": {"name": "api-1", "namespace": "prod", "uid": "pod-3"},
            "spec": {}
        }));

        let edges =
            RelationshipExtractor::new().extract(&[service, matching, other_ns, unlabeled]);
        let selects: Vec<&GraphEdge> = edges
            .iter()
            .filter(|e| e.relationship_type == RelationshipType::Selects)
            .collect();
        assert_eq!(selects.len(), 1);
        assert_eq!(selects[0].to_uid, "pod-1");
        assert_eq!(selects[0].edge_category, EdgeCategory::CauseIntroducing);
    }

    #[test]
    fn test_selectorless_service_selects_nothing() {
        let service = doc(json!({
            "apiVersion": "v1",
            "kind": "Service",
            "metadata": {"name": "external", "namespace": "prod", "uid": "svc-1"},
            "spec": {"selector": {}}
        }));
        let pod = doc(json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": {"name": "web-1", "namespace": "prod", "uid": "pod-1",
                          "labels": {"app": "web"}},
            "spec": {}
        }));
        let edges = RelationshipExtractor::new().extract(&[service, pod]);
        assert!(edges.is_empty());
    }

    #[test]
    fn test_malformed_selector_skipped_not_fatal() {
        let service = doc(json!({
            "apiVersion": "v1",
            "kind": "Service",
            "metadata": {"name": "bad", "namespace": "prod", "uid": "svc-1"},
            "spec": {"selector": {"app": 42}}
        }));
        let pod = doc(json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": {"name": "web-1", "namespace": "prod", "uid": "pod-1",
                          "labels": {"app": "web"},
                          "ownerReferences": [{"kind": "Service", "name": "bad", "uid": "svc-1"}]},
            "spec": {}
        }));
        let edges = RelationshipExtractor::new().extract(&[service, pod]);
        // The owner-reference rule still ran.
        assert!(edges
            .iter()
            .any(|e| e.relationship_type == RelationshipType::Owns));
        assert!(edges
            .iter()
            .all(|e| e.relationship_type != RelationshipType::Selects));
    }

    #[test]
    fn test_workload_references_through_pod_template() {
        let config = doc(json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {"name": "web-config", "namespace": "prod", "uid": "cm-1"},
            "data": {}
        }));
        let secret = doc(json!({
            "apiVersion": "v1",
            "kind": "Secret",
            "metadata": {"name": "web-tls", "namespace": "prod", "uid": "sec-1"},
            "data": {}
        }));
        let deployment = doc(json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {"name": "web", "namespace": "prod", "uid": "dep-1"},
            "spec": {
                "template": {"spec": {
                    "containers": [{
                        "name": "app",
                        "envFrom": [{"configMapRef": {"name": "web-config"}}]
                    }],
                    "volumes": [{"name": "tls", "secret": {"secretName": "web-tls"}}]
                }}
            }
        }));

        let edges = RelationshipExtractor::new().extract(&[config, secret, deployment]);
        let references: Vec<(&str, &str)> = edges
            .iter()
            .filter(|e| e.relationship_type == RelationshipType::References)
            .map(|e| (e.from_uid.as_str(), e.to_uid.as_str()))
            .collect();
        assert!(references.contains(&("dep-1", "cm-1")));
        assert!(references.contains(&("dep-1", "sec-1")));
    }

    #[test]
    fn test_unknown_kind_contributes_no_references() {
        let config = doc(json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {"name": "web-config", "namespace": "prod", "uid": "cm-1"}
        }));
        let custom = doc(json!({
            "apiVersion": "example.io/v1",
            "kind": "Widget",
            "metadata": {"name": "w", "namespace": "prod", "uid": "w-1"},
            "spec": {"template": {"spec": {
                "containers": [{"envFrom": [{"configMapRef": {"name": "web-config"}}]}]
            }}}
        }));
        let edges = RelationshipExtractor::new().extract(&[config, custom]);
        assert!(edges
            .iter()
            .all(|e| e.relationship_type != RelationshipType::References));
    }

    #[test]
    fn test_scheduled_on() {
        let node = doc(json!({
            "apiVersion": "v1",
            "kind": "Node",
            "metadata": {"name": "node-a", "uid": "node-1"},
            "spec": {}
        }));
        let pod = doc(json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": {"name": "web-1", "namespace": "prod", "uid": "pod-1"},
            "spec": {"nodeName": "node-a"}
        }));
        let edges = RelationshipExtractor::new().extract(&[node, pod]);
        let scheduled: Vec<&GraphEdge> = edges
            .iter()
            .filter(|e| e.relationship_type == RelationshipType::ScheduledOn)
            .collect();
        assert_eq!(scheduled.len(), 1);
        assert_eq!(scheduled[0].from_uid, "node-1");
        assert_eq!(scheduled[0].to_uid, "pod-1");
        assert_eq!(scheduled[0].edge_category, EdgeCategory::Ownership);
    }

    #[test]
    fn test_member_of_via_label() {
        let service = doc(json!({
            "apiVersion": "v1",
            "kind": "Service",
            "metadata": {"name": "web", "namespace": "prod", "uid": "svc-1"},
            "spec": {}
        }));
        let slice = doc(json!({
            "apiVersion": "discovery.k8s.io/v1",
            "kind": "EndpointSlice",
            "metadata": {"name": "web-xyz", "namespace": "prod", "uid": "eps-1",
                          "labels": {"kubernetes.io/service-name": "web"}}
        }));
        let edges = RelationshipExtractor::new().extract(&[service, slice]);
        assert!(edges.iter().any(|e| {
            e.relationship_type == RelationshipType::MemberOf
                && e.from_uid == "svc-1"
                && e.to_uid == "eps-1"
        }));
    }

    #[test]
    fn test_extraction_is_idempotent() {
        let owner = doc(json!({
            "apiVersion": "apps/v1",
            "kind": "ReplicaSet",
            "metadata": {"name": "web-rs", "namespace": "prod", "uid": "rs-1"},
            "spec": {"selector": {"matchLabels": {"app": "web"}}}
        }));
        let docs = vec![owner, pod_owned_by("rs-1", true), deployment()];
        let extractor = RelationshipExtractor::new();
        assert_eq!(extractor.extract(&docs), extractor.extract(&docs));
    }
}
