// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! # Resource Model - Identity and Observed State
//!
//! The immutable identity of a Kubernetes object ([`ResourceRef`]), the raw
//! observed document ([`ResourceDocument`]), and the status classification
//! derived from a document at a point in time.
//!
//! ## Key Concepts
//!
//! - **uid** is the only stable identity: (kind, namespace, name) can be
//!   reused after a deletion, but always with a fresh uid.
//! - **Status** is derived, never stored: the same document always classifies
//!   to the same [`ResourceStatus`].

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Immutable identity of a Kubernetes object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceRef {
    /// API group ("" for the core group).
    pub api_group: String,
    /// API version within the group (e.g. "v1").
    pub version: String,
    /// Object kind (e.g. "Deployment").
    pub kind: String,
    /// Namespace; empty for cluster-scoped objects.
    pub namespace: String,
    /// Object name.
    pub name: String,
    /// Globally unique, stable object uid.
    pub uid: String,
}

impl ResourceRef {
    /// Parse identity out of a full resource document.
    ///
    /// Returns `None` when the document lacks `kind`, `metadata.name`, or
    /// `metadata.uid`.
    #[must_use]
    pub fn from_document(document: &Value) -> Option<Self> {
        let kind = document.get("kind")?.as_str()?.to_owned();
        let api_version = document
            .get("apiVersion")
            .and_then(Value::as_str)
            .unwrap_or("v1");
        let (api_group, version) = match api_version.split_once('/') {
            Some((group, version)) => (group.to_owned(), version.to_owned()),
            None => (String::new(), api_version.to_owned()),
        };
        let metadata = document.get("metadata")?;
        Some(Self {
            api_group,
            version,
            kind,
            namespace: metadata
                .get("namespace")
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_owned(),
            name: metadata.get("name")?.as_str()?.to_owned(),
            uid: metadata.get("uid")?.as_str()?.to_owned(),
        })
    }

    /// Whether the object lives outside any namespace.
    #[must_use]
    pub fn is_cluster_scoped(&self) -> bool {
        self.namespace.is_empty()
    }

    /// The `group/version` string this object was observed under.
    #[must_use]
    pub fn api_version(&self) -> String {
        if self.api_group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.api_group, self.version)
        }
    }
}

impl std::fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.namespace.is_empty() {
            write!(f, "{}/{}", self.kind, self.name)
        } else {
            write!(f, "{}/{}/{}", self.namespace, self.kind, self.name)
        }
    }
}

/// A parsed `metadata.ownerReferences` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerReference {
    /// Owner apiVersion as recorded on the dependent.
    pub api_version: String,
    /// Owner kind.
    pub kind: String,
    /// Owner name.
    pub name: String,
    /// Owner uid.
    pub uid: String,
    /// True when the owner is the managing controller.
    pub controller: bool,
}

impl OwnerReference {
    /// Parse a single owner-reference entry; `None` when it lacks the
    /// fields an edge can be derived from.
    #[must_use]
    pub fn from_value(value: &Value) -> Option<Self> {
        Some(Self {
            api_version: value
                .get("apiVersion")
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_owned(),
            kind: value.get("kind")?.as_str()?.to_owned(),
            name: value.get("name")?.as_str()?.to_owned(),
            uid: value.get("uid")?.as_str()?.to_owned(),
            controller: value
                .get("controller")
                .and_then(Value::as_bool)
                .unwrap_or(false),
        })
    }
}

/// A resource document valid at some instant, paired with its identity.
///
/// Produced by the snapshot resolver; consumed by relationship extraction,
/// anomaly detection, and the graph builders. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceDocument {
    /// The object's identity.
    pub resource: ResourceRef,
    /// The full reconstructed document.
    pub document: Value,
}

impl ResourceDocument {
    /// Pair a document with its parsed identity.
    ///
    /// Returns `None` when the document carries no usable identity.
    #[must_use]
    pub fn new(document: Value) -> Option<Self> {
        let resource = ResourceRef::from_document(&document)?;
        Some(Self { resource, document })
    }

    /// `metadata.labels` as an ordered map; empty when absent.
    #[must_use]
    pub fn labels(&self) -> BTreeMap<String, String> {
        string_map(self.document.pointer("/metadata/labels"))
    }

    /// Parsed, well-formed owner references. Malformed entries are skipped;
    /// callers that care about skips inspect the raw array themselves.
    #[must_use]
    pub fn owner_references(&self) -> Vec<OwnerReference> {
        self.document
            .pointer("/metadata/ownerReferences")
            .and_then(Value::as_array)
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(OwnerReference::from_value)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// The raw `metadata.ownerReferences` array length (including malformed
    /// entries), for log-and-skip accounting.
    #[must_use]
    pub fn raw_owner_reference_count(&self) -> usize {
        self.document
            .pointer("/metadata/ownerReferences")
            .and_then(Value::as_array)
            .map_or(0, Vec::len)
    }

    /// `metadata.deletionTimestamp` when set (RFC 3339 string).
    #[must_use]
    pub fn deletion_timestamp(&self) -> Option<&str> {
        self.document
            .pointer("/metadata/deletionTimestamp")
            .and_then(Value::as_str)
    }

    /// Derived status of this document.
    #[must_use]
    pub fn status(&self) -> DerivedStatus {
        derive_status(&self.resource.kind, &self.document)
    }
}

/// Coarse health classification of a resource at an instant.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum ResourceStatus {
    /// Operating normally.
    Ready,
    /// Degraded but functioning (progressing, partially available).
    Warning,
    /// Failing.
    Error,
    /// Deletion in progress.
    Terminating,
    /// Health cannot be determined from the document.
    #[default]
    Unknown,
}

impl std::fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceStatus::Ready => write!(f, "Ready"),
            ResourceStatus::Warning => write!(f, "Warning"),
            ResourceStatus::Error => write!(f, "Error"),
            ResourceStatus::Terminating => write!(f, "Terminating"),
            ResourceStatus::Unknown => write!(f, "Unknown"),
        }
    }
}

/// A status classification plus the message that justified it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DerivedStatus {
    /// The classification.
    pub status: ResourceStatus,
    /// Human-readable justification (condition message, waiting reason, ...).
    pub message: String,
}

impl DerivedStatus {
    fn new(status: ResourceStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

/// Container waiting reasons that classify the whole pod as failing.
const POD_ERROR_WAITING_REASONS: &[&str] = &[
    "CrashLoopBackOff",
    "ImagePullBackOff",
    "ErrImagePull",
    "CreateContainerError",
    "RunContainerError",
    "OOMKilled",
];

/// Derive the status of a resource document.
///
/// Terminating always wins: a set `metadata.deletionTimestamp` overrides any
/// per-kind classification. Kinds without specific logic fall back to the
/// generic `status.conditions` walk, then to `Unknown`.
#[must_use]
pub fn derive_status(kind: &str, document: &Value) -> DerivedStatus {
    if let Some(ts) = document
        .pointer("/metadata/deletionTimestamp")
        .and_then(Value::as_str)
    {
        return DerivedStatus::new(
            ResourceStatus::Terminating,
            format!("deletion requested at {ts}"),
        );
    }

    match kind {
        "Pod" => pod_status(document),
        "Deployment" | "ReplicaSet" | "StatefulSet" => replica_workload_status(document),
        "DaemonSet" => daemonset_status(document),
        "Job" => job_status(document),
        "PersistentVolumeClaim" => pvc_status(document),
        "Node" => node_status(document),
        "Service" | "ConfigMap" | "Secret" | "ServiceAccount" | "EndpointSlice" => {
            DerivedStatus::new(ResourceStatus::Ready, "")
        }
        _ => generic_condition_status(document),
    }
}

fn pod_status(document: &Value) -> DerivedStatus {
    // Container-level failures outrank a healthy-looking phase.
    if let Some(statuses) = document
        .pointer("/status/containerStatuses")
        .and_then(Value::as_array)
    {
        for cs in statuses {
            if let Some(reason) = cs
                .pointer("/state/waiting/reason")
                .and_then(Value::as_str)
            {
                if POD_ERROR_WAITING_REASONS.contains(&reason) {
                    return DerivedStatus::new(
                        ResourceStatus::Error,
                        format!("container waiting: {reason}"),
                    );
                }
                return DerivedStatus::new(
                    ResourceStatus::Warning,
                    format!("container waiting: {reason}"),
                );
            }
            if let Some(reason) = cs
                .pointer("/lastState/terminated/reason")
                .and_then(Value::as_str)
            {
                if reason == "OOMKilled" {
                    return DerivedStatus::new(
                        ResourceStatus::Error,
                        "container terminated: OOMKilled",
                    );
                }
            }
        }
    }

    match document.pointer("/status/phase").and_then(Value::as_str) {
        Some("Running") => {
            let all_ready = document
                .pointer("/status/containerStatuses")
                .and_then(Value::as_array)
                .map_or(true, |statuses| {
                    statuses
                        .iter()
                        .all(|cs| cs.get("ready").and_then(Value::as_bool).unwrap_or(false))
                });
            if all_ready {
                DerivedStatus::new(ResourceStatus::Ready, "")
            } else {
                DerivedStatus::new(ResourceStatus::Warning, "running with unready containers")
            }
        }
        Some("Succeeded") => DerivedStatus::new(ResourceStatus::Ready, "completed"),
        Some("Pending") => DerivedStatus::new(ResourceStatus::Warning, "pending scheduling"),
        Some("Failed") => DerivedStatus::new(ResourceStatus::Error, "pod failed"),
        Some(other) => DerivedStatus::new(ResourceStatus::Unknown, format!("phase {other}")),
        None => DerivedStatus::new(ResourceStatus::Unknown, "no status.phase"),
    }
}

fn replica_workload_status(document: &Value) -> DerivedStatus {
    let desired = document
        .pointer("/spec/replicas")
        .and_then(Value::as_i64)
        .unwrap_or(1);
    let ready = document
        .pointer("/status/readyReplicas")
        .and_then(Value::as_i64)
        .unwrap_or(0);
    if desired == 0 {
        return DerivedStatus::new(ResourceStatus::Ready, "scaled to zero");
    }
    if ready >= desired {
        return DerivedStatus::new(ResourceStatus::Ready, "");
    }
    if ready == 0 {
        return DerivedStatus::new(
            ResourceStatus::Error,
            format!("0/{desired} replicas ready"),
        );
    }
    DerivedStatus::new(
        ResourceStatus::Warning,
        format!("{ready}/{desired} replicas ready"),
    )
}

fn daemonset_status(document: &Value) -> DerivedStatus {
    let desired = document
        .pointer("/status/desiredNumberScheduled")
        .and_then(Value::as_i64)
        .unwrap_or(0);
    let ready = document
        .pointer("/status/numberReady")
        .and_then(Value::as_i64)
        .unwrap_or(0);
    if desired == 0 || ready >= desired {
        DerivedStatus::new(ResourceStatus::Ready, "")
    } else if ready == 0 {
        DerivedStatus::new(ResourceStatus::Error, format!("0/{desired} pods ready"))
    } else {
        DerivedStatus::new(
            ResourceStatus::Warning,
            format!("{ready}/{desired} pods ready"),
        )
    }
}

fn job_status(document: &Value) -> DerivedStatus {
    if let Some(conditions) = document
        .pointer("/status/conditions")
        .and_then(Value::as_array)
    {
        for condition in conditions {
            let kind = condition.get("type").and_then(Value::as_str).unwrap_or("");
            let true_ = condition.get("status").and_then(Value::as_str) == Some("True");
            if kind == "Failed" && true_ {
                let message = condition
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("job failed");
                return DerivedStatus::new(ResourceStatus::Error, message);
            }
            if kind == "Complete" && true_ {
                return DerivedStatus::new(ResourceStatus::Ready, "completed");
            }
        }
    }
    if document.pointer("/status/active").and_then(Value::as_i64).unwrap_or(0) > 0 {
        return DerivedStatus::new(ResourceStatus::Ready, "running");
    }
    DerivedStatus::new(ResourceStatus::Unknown, "")
}

fn pvc_status(document: &Value) -> DerivedStatus {
    match document.pointer("/status/phase").and_then(Value::as_str) {
        Some("Bound") => DerivedStatus::new(ResourceStatus::Ready, ""),
        Some("Pending") => DerivedStatus::new(ResourceStatus::Warning, "waiting to bind"),
        Some("Lost") => DerivedStatus::new(ResourceStatus::Error, "volume lost"),
        _ => DerivedStatus::new(ResourceStatus::Unknown, ""),
    }
}

fn node_status(document: &Value) -> DerivedStatus {
    if let Some(conditions) = document
        .pointer("/status/conditions")
        .and_then(Value::as_array)
    {
        for condition in conditions {
            if condition.get("type").and_then(Value::as_str) == Some("Ready") {
                return match condition.get("status").and_then(Value::as_str) {
                    Some("True") => DerivedStatus::new(ResourceStatus::Ready, ""),
                    Some("False") => DerivedStatus::new(ResourceStatus::Error, "node not ready"),
                    _ => DerivedStatus::new(ResourceStatus::Unknown, "node readiness unknown"),
                };
            }
        }
    }
    DerivedStatus::new(ResourceStatus::Unknown, "")
}

fn generic_condition_status(document: &Value) -> DerivedStatus {
    let Some(conditions) = document
        .pointer("/status/conditions")
        .and_then(Value::as_array)
    else {
        return DerivedStatus::new(ResourceStatus::Unknown, "");
    };
    for condition in conditions {
        let kind = condition.get("type").and_then(Value::as_str).unwrap_or("");
        if kind == "Ready" || kind == "Available" {
            return match condition.get("status").and_then(Value::as_str) {
                Some("True") => DerivedStatus::new(ResourceStatus::Ready, ""),
                Some("False") => {
                    let message = condition
                        .get("message")
                        .and_then(Value::as_str)
                        .unwrap_or("condition false");
                    DerivedStatus::new(ResourceStatus::Error, message)
                }
                _ => DerivedStatus::new(ResourceStatus::Unknown, ""),
            };
        }
    }
    DerivedStatus::new(ResourceStatus::Unknown, "")
}

/// Read a JSON object of string values into an ordered map.
pub(crate) fn string_map(value: Option<&Value>) -> BTreeMap<String, String> {
    value
        .and_then(Value::as_object)
        .map(|map| {
            map.iter()
                .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_owned())))
                .collect()
        })
        .unwrap_or_default()
}
