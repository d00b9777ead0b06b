// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Kubernetes label-selector grammar.
//!
//! Implements the full selector semantics: `matchLabels` is an AND over
//! exact matches, `matchExpressions` supports `In`, `NotIn`, `Exists`, and
//! `DoesNotExist`. An empty selector matches everything (the vacuous AND);
//! whether an *absent* selector means "nothing" is the caller's per-kind
//! decision.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// A `matchExpressions` operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SelectorOperator {
    /// Label value must be one of the listed values.
    In,
    /// Label value must not be any of the listed values (absent keys pass).
    NotIn,
    /// Label key must be present.
    Exists,
    /// Label key must be absent.
    DoesNotExist,
}

/// One `matchExpressions` requirement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectorRequirement {
    /// Label key the requirement applies to.
    pub key: String,
    /// The operator.
    pub operator: SelectorOperator,
    /// Values for `In`/`NotIn`; empty for the existence operators.
    pub values: Vec<String>,
}

impl SelectorRequirement {
    fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        let value = labels.get(&self.key);
        match self.operator {
            SelectorOperator::In => value.is_some_and(|v| self.values.iter().any(|c| c == v)),
            SelectorOperator::NotIn => !value.is_some_and(|v| self.values.iter().any(|c| c == v)),
            SelectorOperator::Exists => value.is_some(),
            SelectorOperator::DoesNotExist => value.is_none(),
        }
    }
}

/// A parsed label selector.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelSelector {
    /// Exact-match requirements, ANDed.
    pub match_labels: BTreeMap<String, String>,
    /// Expression requirements, ANDed with the above.
    pub match_expressions: Vec<SelectorRequirement>,
}

impl LabelSelector {
    /// Parse either selector shape: the full
    /// `{matchLabels, matchExpressions}` form used by workloads and network
    /// policies, or the bare equality map used by Service.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for structurally malformed selectors (non-string
    /// values, unknown operators, `In`/`NotIn` without values). Callers log
    /// and skip - a bad selector never fails the enclosing query.
    pub fn parse(value: &Value) -> Result<Self> {
        let Some(map) = value.as_object() else {
            return Err(Error::InvalidArgument("selector is not an object".to_owned()));
        };
        if map.contains_key("matchLabels") || map.contains_key("matchExpressions") {
            Self::parse_full(value)
        } else {
            Self::parse_bare(value)
        }
    }

    fn parse_bare(value: &Value) -> Result<Self> {
        let Some(map) = value.as_object() else {
            return Err(Error::InvalidArgument(
                "label map is not an object".to_owned(),
            ));
        };
        let mut match_labels = BTreeMap::new();
        for (key, raw) in map {
            let Some(v) = raw.as_str() else {
                return Err(Error::InvalidArgument(format!(
                    "selector value for key '{key}' is not a string"
                )));
            };
            match_labels.insert(key.clone(), v.to_owned());
        }
        Ok(Self {
            match_labels,
            match_expressions: Vec::new(),
        })
    }

    fn parse_full(value: &Value) -> Result<Self> {
        let mut selector = Self::default();
        if let Some(raw) = value.get("matchLabels") {
            selector.match_labels = Self::parse_bare(raw)?.match_labels;
        }

        if let Some(expressions) = value.get("matchExpressions") {
            let Some(entries) = expressions.as_array() else {
                return Err(Error::InvalidArgument(
                    "matchExpressions is not an array".to_owned(),
                ));
            };
            for entry in entries {
                selector.match_expressions.push(parse_requirement(entry)?);
            }
        }
        Ok(selector)
    }

    /// Whether the selector has no requirements at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.match_labels.is_empty() && self.match_expressions.is_empty()
    }

    /// Whether `labels` satisfies every requirement.
    #[must_use]
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.match_labels
            .iter()
            .all(|(key, value)| labels.get(key) == Some(value))
            && self
                .match_expressions
                .iter()
                .all(|requirement| requirement.matches(labels))
    }
}

fn parse_requirement(entry: &Value) -> Result<SelectorRequirement> {
    let key = entry
        .get("key")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::InvalidArgument("matchExpressions entry without key".to_owned()))?;
    let operator = match entry.get("operator").and_then(Value::as_str) {
        Some("In") => SelectorOperator::In,
        Some("NotIn") => SelectorOperator::NotIn,
        Some("Exists") => SelectorOperator::Exists,
        Some("DoesNotExist") => SelectorOperator::DoesNotExist,
        other => {
            return Err(Error::InvalidArgument(format!(
                "unknown selector operator {other:?} for key '{key}'"
            )))
        }
    };
    let values: Vec<String> = entry
        .get("values")
        .and_then(Value::as_array)
        .map(|vals| {
            vals.iter()
                .filter_map(Value::as_str)
                .map(str::to_owned)
                .collect()
        })
        .unwrap_or_default();
    if matches!(operator, SelectorOperator::In | SelectorOperator::NotIn) && values.is_empty() {
        return Err(Error::InvalidArgument(format!(
            "selector operator for key '{key}' requires values"
        )));
    }
    Ok(SelectorRequirement {
        key: key.to_owned(),
        operator,
        values,
    })
}
