// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Shared constants and reproducible defaults for the DriftScope engine.
//!
//! Every tunable the engine exposes has its default value here so that
//! configuration stays reproducible across deployments: the same inputs with
//! the same defaults must produce byte-identical query results.

/// Nanoseconds per millisecond.
pub const NANOS_PER_MILLI: i64 = 1_000_000;

/// Nanoseconds per second.
pub const NANOS_PER_SECOND: i64 = 1_000_000_000;

/// Every Nth UPDATE revision is stored with a full snapshot to bound the
/// number of diffs replayed by a point-in-time resolution.
pub const DEFAULT_SNAPSHOT_CADENCE: u32 = 20;

/// Default lookback window for causal queries (30 minutes).
pub const DEFAULT_LOOKBACK_MS: i64 = 30 * 60 * 1000;

/// Default maximum spine depth for causal graph expansion.
pub const DEFAULT_MAX_DEPTH: usize = 5;

/// Revisions below this significance never promote a predecessor onto the
/// causal spine.
pub const DEFAULT_MIN_SIGNIFICANCE: f64 = 0.25;

/// Temporal slack between adjacent spine steps: candidates whose triggering
/// revisions land within this window of each other are both preserved.
pub const DEFAULT_TEMPORAL_SLACK_MS: i64 = 30_000;

/// Decay constant (seconds) for the temporal ranking factor `exp(-dt/tau)`.
pub const DEFAULT_TEMPORAL_TAU_SECS: f64 = 300.0;

/// Default ranking weight for the temporal factor.
pub const DEFAULT_WEIGHT_TEMPORAL: f64 = 0.30;

/// Default ranking weight for the severity factor.
pub const DEFAULT_WEIGHT_SEVERITY: f64 = 0.25;

/// Default ranking weight for the proximity factor.
pub const DEFAULT_WEIGHT_PROXIMITY: f64 = 0.20;

/// Default ranking weight for the change-magnitude factor.
pub const DEFAULT_WEIGHT_CHANGE_MAGNITUDE: f64 = 0.15;

/// Default ranking weight for the anomaly-density factor.
pub const DEFAULT_WEIGHT_ANOMALY_DENSITY: f64 = 0.10;

/// Capacity of the process-wide resolved-snapshot LRU cache.
pub const DEFAULT_SNAPSHOT_CACHE_CAPACITY: usize = 1024;

/// Maximum CPU work between cooperative cancellation checks (milliseconds).
pub const DEFAULT_CANCELLATION_CHECK_INTERVAL_MS: u64 = 50;

/// A resource with a deletion timestamp older than this is stuck terminating
/// (5 minutes).
pub const DEFAULT_STUCK_TERMINATING_THRESHOLD_MS: i64 = 5 * 60 * 1000;

/// Minimum uid churns of one (kind, namespace, name) within the lookback to
/// flag repeated create/delete cycling.
pub const DEFAULT_CHURN_THRESHOLD: usize = 3;

/// Default page size for paged queries.
pub const DEFAULT_PAGE_SIZE: usize = 100;

/// Version tag carried in paging cursors and causal-query metadata. Cursors
/// from a different version are rejected as invalid arguments.
pub const ALGORITHM_VERSION: &str = "dscausal-v1";

/// Path-prefix weight for changes under `.spec`.
pub const SIGNIFICANCE_WEIGHT_SPEC: f64 = 0.5;

/// Path-prefix weight for changes under `.status`.
pub const SIGNIFICANCE_WEIGHT_STATUS: f64 = 0.3;

/// Path-prefix weight for changes under `.metadata`.
pub const SIGNIFICANCE_WEIGHT_METADATA: f64 = 0.15;

/// Path-prefix weight for changes anywhere else.
pub const SIGNIFICANCE_WEIGHT_OTHER: f64 = 0.05;

/// Bonus added once per high-signal field (image, replicas, selector,
/// resources, nodeName) touched by a diff.
pub const SIGNIFICANCE_HIGH_SIGNAL_BONUS: f64 = 0.2;
