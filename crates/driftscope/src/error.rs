// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Error types for DriftScope engine operations.
//!
//! Every failure surfaced to a caller carries a structured kind, never a raw
//! string: the RPC layer maps [`ErrorKind`] onto its own status codes.
//! `Truncated` is deliberately absent - a deadline expiry is a result flag
//! plus a resumable cursor, not an error.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Error types for DriftScope engine operations
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed query: unknown kind, negative lookback, cursor from a
    /// different algorithm version, or an invalid revision record.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The uid has no revision at or before the requested timestamp.
    #[error("Resource {uid} not found at or before {timestamp_ns}")]
    NotFound {
        /// The uid that could not be resolved.
        uid: String,
        /// The requested point in time (nanoseconds).
        timestamp_ns: i64,
    },

    /// Ingestion-only: the revision's timestamp is not strictly after the
    /// last stored timestamp for its uid. The caller may retry after
    /// reordering.
    #[error("Out-of-order revision for {uid}: {timestamp_ns} <= last {last_timestamp_ns}")]
    OutOfOrder {
        /// The uid the revision belongs to.
        uid: String,
        /// The rejected revision's timestamp (nanoseconds).
        timestamp_ns: i64,
        /// The last accepted timestamp for the uid (nanoseconds).
        last_timestamp_ns: i64,
    },

    /// Ingestion-only: the uid is frozen by a DELETE revision; a reused
    /// (kind, namespace, name) must arrive as a CREATE with a distinct uid.
    #[error("Conflicting revision for {uid}: uid is frozen by an earlier DELETE")]
    Conflict {
        /// The frozen uid.
        uid: String,
    },

    /// Fatal invariant break in stored revisions: a diff could not be
    /// replayed against the state it was recorded for. Queries observing
    /// this fail with `Internal` and an operator alert is surfaced.
    #[error("Diff corruption for {uid} at '{path}': {detail}")]
    DiffCorruption {
        /// The uid whose revision log is corrupt.
        uid: String,
        /// The dotted path the replay failed at.
        path: String,
        /// What went wrong at that path.
        detail: String,
    },

    /// Any unclassified failure. Carries a trace id for log correlation.
    #[error("Internal error [{trace_id}]: {message}")]
    Internal {
        /// Correlation id surfaced to the caller and logged server-side.
        trace_id: Uuid,
        /// Human-readable description.
        message: String,
    },

    /// JSON (de)serialization failure inside the engine.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Create an `Internal` error with a fresh trace id.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Error::Internal {
            trace_id: Uuid::new_v4(),
            message: message.into(),
        }
    }

    /// The structured kind carried to the RPC layer.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Error::NotFound { .. } => ErrorKind::NotFound,
            Error::OutOfOrder { .. } => ErrorKind::OutOfOrder,
            Error::Conflict { .. } => ErrorKind::Conflict,
            Error::DiffCorruption { .. } => ErrorKind::DiffCorruption,
            Error::Internal { .. } | Error::Serialization(_) => ErrorKind::Internal,
        }
    }

    /// Whether this error indicates a broken invariant that must be
    /// escalated rather than handled.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::DiffCorruption { .. } | Error::Internal { .. }
        )
    }
}

/// Stable error classification carried on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Malformed query or record.
    InvalidArgument,
    /// Uid unknown before the requested timestamp.
    NotFound,
    /// Revision not strictly newer than the last stored one.
    OutOfOrder,
    /// Uid frozen by an earlier DELETE.
    Conflict,
    /// Fatal stored-revision invariant break.
    DiffCorruption,
    /// Unclassified failure.
    Internal,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::InvalidArgument => write!(f, "invalid_argument"),
            ErrorKind::NotFound => write!(f, "not_found"),
            ErrorKind::OutOfOrder => write!(f, "out_of_order"),
            ErrorKind::Conflict => write!(f, "conflict"),
            ErrorKind::DiffCorruption => write!(f, "diff_corruption"),
            ErrorKind::Internal => write!(f, "internal"),
        }
    }
}

/// Result type for DriftScope engine operations
pub type Result<T> = std::result::Result<T, Error>;

#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_mapping() {
        assert_eq!(
            Error::InvalidArgument("bad".into()).kind(),
            ErrorKind::InvalidArgument
        );
        assert_eq!(
            Error::NotFound {
                uid: "u".into(),
                timestamp_ns: 1
            }
            .kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            Error::OutOfOrder {
                uid: "u".into(),
                timestamp_ns: 1,
                last_timestamp_ns: 2
            }
            .kind(),
            ErrorKind::OutOfOrder
        );
        assert_eq!(Error::Conflict { uid: "u".into() }.kind(), ErrorKind::Conflict);
        assert_eq!(Error::internal("boom").kind(), ErrorKind::Internal);
    }

    #[test]
    fn test_fatal_classification() {
        assert!(Error::DiffCorruption {
            uid: "u".into(),
            path: ".spec".into(),
            detail: "missing parent".into()
        }
        .is_fatal());
        assert!(Error::internal("boom").is_fatal());
        assert!(!Error::Conflict { uid: "u".into() }.is_fatal());
    }

    #[test]
    fn test_kind_display() {
        assert_eq!(ErrorKind::OutOfOrder.to_string(), "out_of_order");
        assert_eq!(ErrorKind::DiffCorruption.to_string(), "diff_corruption");
    }

    #[test]
    fn test_internal_carries_trace_id() {
        let err = Error::internal("boom");
        match err {
            Error::Internal { trace_id, message } => {
                assert!(!trace_id.is_nil());
                assert_eq!(message, "boom");
            }
            _ => panic!("expected Internal"),
        }
    }
}
