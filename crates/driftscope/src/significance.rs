// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! # Change Significance - How Much a Revision Matters
//!
//! Scores an UPDATE revision's diff into a `[0, 1]` estimate of how likely
//! the change is to matter for downstream behaviour, with the evidence that
//! produced the score. Computed once at ingest and stored with the revision;
//! the causal graph builder uses it to decide which predecessors earn a spot
//! on the spine.
//!
//! The score is a clamped sum, so it is monotone in both the number and the
//! weight of changed paths: adding a changed path never lowers it.

use crate::constants::{
    SIGNIFICANCE_HIGH_SIGNAL_BONUS, SIGNIFICANCE_WEIGHT_METADATA, SIGNIFICANCE_WEIGHT_OTHER,
    SIGNIFICANCE_WEIGHT_SPEC, SIGNIFICANCE_WEIGHT_STATUS,
};
use crate::diff::DiffOp;
use serde::{Deserialize, Serialize};

/// Path segments whose presence in a diff signals a high-impact change,
/// paired with the reason string they contribute.
const HIGH_SIGNAL_FIELDS: &[(&str, &str)] = &[
    ("image", "image change"),
    ("replicas", "replicas change"),
    ("selector", "selector change"),
    ("resources", "resources change"),
    ("nodeName", "nodeName change"),
];

/// A scored judgement of how much a revision's diff matters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Significance {
    /// Clamped `[0, 1]` score.
    pub score: f64,
    /// Ordered, de-duplicated evidence strings.
    pub reasons: Vec<String>,
}

impl Significance {
    /// Whether the score clears a spine-candidacy threshold.
    #[must_use]
    pub fn is_at_least(&self, threshold: f64) -> bool {
        self.score >= threshold
    }
}

/// Score a diff.
///
/// Each op contributes the weight of its top-level prefix (`.spec` 0.5,
/// `.status` 0.3, `.metadata` 0.15, anything else 0.05); each distinct
/// high-signal field touched adds a 0.2 bonus. The sum is clamped to 1.
#[must_use]
pub fn score_diff(ops: &[DiffOp]) -> Significance {
    let mut score = 0.0;
    let mut reasons: Vec<String> = Vec::new();

    for op in ops {
        let (weight, reason) = match first_segment(&op.path) {
            "spec" => (SIGNIFICANCE_WEIGHT_SPEC, "spec change"),
            "status" => (SIGNIFICANCE_WEIGHT_STATUS, "status change"),
            "metadata" => (SIGNIFICANCE_WEIGHT_METADATA, "metadata change"),
            _ => (SIGNIFICANCE_WEIGHT_OTHER, "document change"),
        };
        score += weight;
        push_reason(&mut reasons, reason);
    }

    for (field, reason) in HIGH_SIGNAL_FIELDS {
        let touched = ops
            .iter()
            .any(|op| op.path.split('.').any(|segment| segment == *field));
        if touched {
            score += SIGNIFICANCE_HIGH_SIGNAL_BONUS;
            push_reason(&mut reasons, reason);
        }
    }

    Significance {
        score: score.clamp(0.0, 1.0),
        reasons,
    }
}

fn first_segment(path: &str) -> &str {
    path.strip_prefix('.')
        .unwrap_or(path)
        .split('.')
        .next()
        .unwrap_or("")
}

fn push_reason(reasons: &mut Vec<String>, reason: &str) {
    if !reasons.iter().any(|r| r == reason) {
        reasons.push(reason.to_owned());
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_empty_diff_scores_zero() {
        let sig = score_diff(&[]);
        assert_eq!(sig.score, 0.0);
        assert!(sig.reasons.is_empty());
    }

    #[test]
    fn test_image_change_scores_at_least_point_seven() {
        let ops = vec![DiffOp::replace(
            ".spec.template.spec.containers.0.image",
            json!("x:1"),
            json!("x:2"),
        )];
        let sig = score_diff(&ops);
        assert!(sig.score >= 0.7);
        assert!(sig.reasons.contains(&"spec change".to_owned()));
        assert!(sig.reasons.contains(&"image change".to_owned()));
    }

    #[test]
    fn test_status_only_change() {
        let ops = vec![DiffOp::replace(
            ".status.readyReplicas",
            json!(1),
            json!(2),
        )];
        let sig = score_diff(&ops);
        assert!((sig.score - 0.3).abs() < f64::EPSILON);
        assert_eq!(sig.reasons, vec!["status change".to_owned()]);
    }

    #[test]
    fn test_score_is_clamped() {
        let ops: Vec<DiffOp> = (0..10)
            .map(|i| DiffOp::replace(format!(".spec.field{i}"), json!(0), json!(i)))
            .collect();
        assert_eq!(score_diff(&ops).score, 1.0);
    }

    #[test]
    fn test_monotone_in_changed_paths() {
        let base = vec![DiffOp::replace(".metadata.annotations", json!({}), json!({"a": "b"}))];
        let mut more = base.clone();
        more.push(DiffOp::replace(".spec.replicas", json!(1), json!(2)));
        assert!(score_diff(&more).score >= score_diff(&base).score);
    }

    #[test]
    fn test_high_signal_bonus_counted_once_per_field() {
        let ops = vec![
            DiffOp::replace(".spec.containers.0.image", json!("a:1"), json!("a:2")),
            DiffOp::replace(".spec.containers.1.image", json!("b:1"), json!("b:2")),
        ];
        let sig = score_diff(&ops);
        // Two spec ops (1.0 clamped) - the bonus applies once.
        assert_eq!(sig.score, 1.0);
        assert_eq!(
            sig.reasons
                .iter()
                .filter(|r| r.as_str() == "image change")
                .count(),
            1
        );
    }

    #[test]
    fn test_reasons_are_ordered() {
        let ops = vec![
            DiffOp::replace(".status.phase", json!("Pending"), json!("Running")),
            DiffOp::replace(".spec.replicas", json!(1), json!(2)),
        ];
        let sig = score_diff(&ops);
        assert_eq!(
            sig.reasons,
            vec![
                "status change".to_owned(),
                "spec change".to_owned(),
                "replicas change".to_owned()
            ]
        );
    }
}
