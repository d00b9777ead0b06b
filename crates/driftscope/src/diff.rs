// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! # Structural Diffs Over Resource Documents
//!
//! Computes minimal ordered edit sequences between two observed versions of a
//! resource document and replays them during point-in-time resolution.
//!
//! ## Path model
//!
//! Paths are dotted with a leading dot; array elements use index segments
//! (`.spec.template.spec.containers.0.image`). Two engine rules keep replay
//! unambiguous:
//!
//! - An object containing a key that itself contains a dot (labels,
//!   annotations) is treated as atomic: the differ emits one `replace` of the
//!   whole map instead of descending.
//! - Arrays are recursed element-wise only when both sides have equal length;
//!   a length change emits one `replace` of the whole array, so replay never
//!   has to reason about insertion shifts.
//!
//! ## Replay semantics
//!
//! `remove` of a path that no longer exists is a no-op. `add` or `replace`
//! under a missing parent is a [`DiffCorruption`](crate::Error::DiffCorruption):
//! a stored revision no longer matches the state it was recorded against,
//! which is a fatal invariant break, not a recoverable condition.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Fields stripped before diffing; they churn on every write without
/// carrying behavioural signal.
const NORMALIZED_METADATA_FIELDS: &[&str] = &["managedFields", "resourceVersion", "generation"];

/// The kind of edit a [`DiffOp`] performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiffOpKind {
    /// Insert a value at a path that did not exist.
    Add,
    /// Replace the value at an existing path.
    Replace,
    /// Remove the value at a path.
    Remove,
}

impl std::fmt::Display for DiffOpKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DiffOpKind::Add => write!(f, "add"),
            DiffOpKind::Replace => write!(f, "replace"),
            DiffOpKind::Remove => write!(f, "remove"),
        }
    }
}

/// One edit at a dotted path, with the old and new values where they exist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiffOp {
    /// The edit kind.
    pub op: DiffOpKind,
    /// Dotted path with a leading dot (e.g. `.spec.replicas`).
    pub path: String,
    /// Value before the edit (`replace`, `remove`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old: Option<Value>,
    /// Value after the edit (`add`, `replace`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new: Option<Value>,
}

impl DiffOp {
    /// An `add` op.
    #[must_use]
    pub fn add(path: impl Into<String>, new: Value) -> Self {
        Self {
            op: DiffOpKind::Add,
            path: path.into(),
            old: None,
            new: Some(new),
        }
    }

    /// A `replace` op.
    #[must_use]
    pub fn replace(path: impl Into<String>, old: Value, new: Value) -> Self {
        Self {
            op: DiffOpKind::Replace,
            path: path.into(),
            old: Some(old),
            new: Some(new),
        }
    }

    /// A `remove` op.
    #[must_use]
    pub fn remove(path: impl Into<String>, old: Value) -> Self {
        Self {
            op: DiffOpKind::Remove,
            path: path.into(),
            old: Some(old),
            new: None,
        }
    }
}

/// One segment of a parsed dotted path.
#[derive(Debug, Clone, PartialEq, Eq)]
enum PathSegment {
    Key(String),
    Index(usize),
}

fn parse_path(path: &str) -> Vec<PathSegment> {
    path.strip_prefix('.')
        .unwrap_or(path)
        .split('.')
        .filter(|s| !s.is_empty())
        .map(|s| match s.parse::<usize>() {
            Ok(index) => PathSegment::Index(index),
            Err(_) => PathSegment::Key(s.to_owned()),
        })
        .collect()
}

/// Strip write-churn metadata fields in place before diffing or storing.
pub fn normalize_document(document: &mut Value) {
    if let Some(metadata) = document.get_mut("metadata").and_then(Value::as_object_mut) {
        for field in NORMALIZED_METADATA_FIELDS {
            metadata.remove(*field);
        }
    }
}

/// Compute the ordered edit sequence turning `old` into `new`.
///
/// The result is deterministic: object keys are visited in sorted order and
/// array elements in index order.
#[must_use]
pub fn compute_diff(old: &Value, new: &Value) -> Vec<DiffOp> {
    let mut ops = Vec::new();
    diff_value(old, new, "", &mut ops);
    ops
}

fn diff_value(old: &Value, new: &Value, path: &str, ops: &mut Vec<DiffOp>) {
    match (old, new) {
        (Value::Object(old_map), Value::Object(new_map)) => {
            let atomic = old_map.keys().chain(new_map.keys()).any(|k| k.contains('.'));
            if atomic {
                if old_map != new_map {
                    ops.push(DiffOp::replace(path_or_root(path), old.clone(), new.clone()));
                }
                return;
            }
            for (key, old_value) in old_map {
                let child = join_key(path, key);
                match new_map.get(key) {
                    Some(new_value) => diff_value(old_value, new_value, &child, ops),
                    None => ops.push(DiffOp::remove(child, old_value.clone())),
                }
            }
            for (key, new_value) in new_map {
                if !old_map.contains_key(key) {
                    ops.push(DiffOp::add(join_key(path, key), new_value.clone()));
                }
            }
        }
        (Value::Array(old_items), Value::Array(new_items)) => {
            if old_items.len() != new_items.len() {
                if old != new {
                    ops.push(DiffOp::replace(path_or_root(path), old.clone(), new.clone()));
                }
                return;
            }
            for (index, (old_item, new_item)) in
                old_items.iter().zip(new_items.iter()).enumerate()
            {
                diff_value(old_item, new_item, &join_index(path, index), ops);
            }
        }
        _ => {
            if old != new {
                ops.push(DiffOp::replace(path_or_root(path), old.clone(), new.clone()));
            }
        }
    }
}

fn join_key(path: &str, key: &str) -> String {
    format!("{path}.{key}")
}

fn join_index(path: &str, index: usize) -> String {
    format!("{path}.{index}")
}

fn path_or_root(path: &str) -> String {
    if path.is_empty() {
        ".".to_owned()
    } else {
        path.to_owned()
    }
}

/// Apply an edit sequence to a document in place.
///
/// `uid` is error context only. See the module docs for the tolerance rules.
pub fn apply_diff(document: &mut Value, ops: &[DiffOp], uid: &str) -> Result<()> {
    for op in ops {
        apply_op(document, op, uid)?;
    }
    Ok(())
}

fn apply_op(document: &mut Value, op: &DiffOp, uid: &str) -> Result<()> {
    let segments = parse_path(&op.path);
    if segments.is_empty() {
        // Whole-document edit.
        return match op.op {
            DiffOpKind::Add | DiffOpKind::Replace => {
                *document = required_new(op, uid)?.clone();
                Ok(())
            }
            DiffOpKind::Remove => {
                *document = Value::Null;
                Ok(())
            }
        };
    }

    let (last, parents) = segments.split_last().unwrap_or((&segments[0], &[]));
    let mut cursor = document;
    for segment in parents {
        let next = match segment {
            PathSegment::Key(key) => cursor.get_mut(key.as_str()),
            PathSegment::Index(index) => cursor.get_mut(*index),
        };
        match next {
            Some(value) => cursor = value,
            None if op.op == DiffOpKind::Remove => return Ok(()),
            None => {
                return Err(Error::DiffCorruption {
                    uid: uid.to_owned(),
                    path: op.path.clone(),
                    detail: format!("missing parent for {} op", op.op),
                })
            }
        }
    }

    match (&op.op, last) {
        (DiffOpKind::Remove, PathSegment::Key(key)) => {
            if let Some(map) = cursor.as_object_mut() {
                map.remove(key.as_str());
            }
            Ok(())
        }
        (DiffOpKind::Remove, PathSegment::Index(index)) => {
            if let Some(items) = cursor.as_array_mut() {
                if *index < items.len() {
                    items.remove(*index);
                }
            }
            Ok(())
        }
        (DiffOpKind::Add | DiffOpKind::Replace, PathSegment::Key(key)) => {
            let new = required_new(op, uid)?.clone();
            match cursor.as_object_mut() {
                Some(map) => {
                    map.insert(key.clone(), new);
                    Ok(())
                }
                None => Err(Error::DiffCorruption {
                    uid: uid.to_owned(),
                    path: op.path.clone(),
                    detail: "parent is not an object".to_owned(),
                }),
            }
        }
        (DiffOpKind::Add | DiffOpKind::Replace, PathSegment::Index(index)) => {
            let new = required_new(op, uid)?.clone();
            match cursor.as_array_mut() {
                Some(items) if *index < items.len() => {
                    items[*index] = new;
                    Ok(())
                }
                Some(items) if *index == items.len() && op.op == DiffOpKind::Add => {
                    items.push(new);
                    Ok(())
                }
                Some(items) => Err(Error::DiffCorruption {
                    uid: uid.to_owned(),
                    path: op.path.clone(),
                    detail: format!("index {index} out of bounds (len {})", items.len()),
                }),
                None => Err(Error::DiffCorruption {
                    uid: uid.to_owned(),
                    path: op.path.clone(),
                    detail: "parent is not an array".to_owned(),
                }),
            }
        }
    }
}

fn required_new<'a>(op: &'a DiffOp, uid: &str) -> Result<&'a Value> {
    op.new.as_ref().ok_or_else(|| Error::DiffCorruption {
        uid: uid.to_owned(),
        path: op.path.clone(),
        detail: format!("{} op carries no new value", op.op),
    })
}

#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_scalar_replace() {
        let old = json!({"spec": {"replicas": 2}});
        let new = json!({"spec": {"replicas": 3}});
        let ops = compute_diff(&old, &new);
        assert_eq!(
            ops,
            vec![DiffOp::replace(".spec.replicas", json!(2), json!(3))]
        );
    }

    #[test]
    fn test_add_and_remove() {
        let old = json!({"spec": {"a": 1}});
        let new = json!({"spec": {"b": 2}});
        let ops = compute_diff(&old, &new);
        assert_eq!(ops.len(), 2);
        assert!(ops.contains(&DiffOp::remove(".spec.a", json!(1))));
        assert!(ops.contains(&DiffOp::add(".spec.b", json!(2))));
    }

    #[test]
    fn test_array_index_paths() {
        let old = json!({"spec": {"containers": [{"image": "x:1"}]}});
        let new = json!({"spec": {"containers": [{"image": "x:2"}]}});
        let ops = compute_diff(&old, &new);
        assert_eq!(
            ops,
            vec![DiffOp::replace(
                ".spec.containers.0.image",
                json!("x:1"),
                json!("x:2")
            )]
        );
    }

    #[test]
    fn test_array_length_change_is_atomic() {
        let old = json!({"spec": {"ports": [80]}});
        let new = json!({"spec": {"ports": [80, 443]}});
        let ops = compute_diff(&old, &new);
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].op, DiffOpKind::Replace);
        assert_eq!(ops[0].path, ".spec.ports");
    }

    #[test]
    fn test_dotted_keys_are_atomic() {
        let old = json!({"metadata": {"labels": {"app.kubernetes.io/name": "web"}}});
        let new = json!({"metadata": {"labels": {"app.kubernetes.io/name": "api"}}});
        let ops = compute_diff(&old, &new);
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].path, ".metadata.labels");
    }

    #[test]
    fn test_roundtrip_apply() {
        let old = json!({
            "spec": {
                "replicas": 2,
                "template": {"spec": {"containers": [{"image": "x:1", "name": "app"}]}}
            },
            "status": {"readyReplicas": 2}
        });
        let new = json!({
            "spec": {
                "replicas": 3,
                "template": {"spec": {"containers": [{"image": "x:2", "name": "app"}]}},
                "paused": false
            },
            "status": {}
        });
        let ops = compute_diff(&old, &new);
        let mut replayed = old.clone();
        apply_diff(&mut replayed, &ops, "uid-1").unwrap();
        assert_eq!(replayed, new);
    }

    #[test]
    fn test_remove_missing_is_noop() {
        let mut doc = json!({"spec": {}});
        let ops = vec![DiffOp::remove(".spec.replicas", json!(2))];
        apply_diff(&mut doc, &ops, "uid-1").unwrap();
        assert_eq!(doc, json!({"spec": {}}));

        // Missing intermediate parent on a remove is also tolerated.
        let ops = vec![DiffOp::remove(".status.conditions.0", json!({}))];
        apply_diff(&mut doc, &ops, "uid-1").unwrap();
    }

    #[test]
    fn test_add_under_missing_parent_is_corruption() {
        let mut doc = json!({"spec": {}});
        let ops = vec![DiffOp::add(".status.phase", json!("Running"))];
        let err = apply_diff(&mut doc, &ops, "uid-1").unwrap_err();
        assert!(matches!(err, Error::DiffCorruption { .. }));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_normalize_strips_churn_fields() {
        let mut doc = json!({
            "metadata": {
                "name": "web",
                "resourceVersion": "12345",
                "generation": 7,
                "managedFields": [{"manager": "kubectl"}]
            }
        });
        normalize_document(&mut doc);
        assert_eq!(doc, json!({"metadata": {"name": "web"}}));
    }

    #[test]
    fn test_diff_deterministic_order() {
        let old = json!({"spec": {"b": 1, "a": 1, "c": 1}});
        let new = json!({"spec": {"b": 2, "a": 2, "c": 2}});
        let first = compute_diff(&old, &new);
        let second = compute_diff(&old, &new);
        assert_eq!(first, second);
        let paths: Vec<&str> = first.iter().map(|op| op.path.as_str()).collect();
        assert_eq!(paths, vec![".spec.a", ".spec.b", ".spec.c"]);
    }

    #[test]
    fn test_equal_documents_empty_diff() {
        let doc = json!({"spec": {"replicas": 1}});
        assert!(compute_diff(&doc, &doc).is_empty());
    }
}
