// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Engine configuration.
//!
//! Every constant the engine's behaviour depends on lives here with a
//! reproducible default, so two deployments with the same configuration
//! produce identical query results.

use crate::anomaly::AnomalyDetectorConfig;
use crate::constants::{
    DEFAULT_LOOKBACK_MS, DEFAULT_MAX_DEPTH, DEFAULT_MIN_SIGNIFICANCE,
    DEFAULT_SNAPSHOT_CACHE_CAPACITY, DEFAULT_SNAPSHOT_CADENCE, DEFAULT_TEMPORAL_SLACK_MS,
    DEFAULT_TEMPORAL_TAU_SECS,
};
use crate::rank::RankerWeights;
use serde::{Deserialize, Serialize};

/// Tunables for the whole engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Every Nth UPDATE is stored with a full snapshot.
    pub snapshot_cadence: u32,
    /// Capacity of the resolved-snapshot LRU cache.
    pub snapshot_cache_capacity: usize,
    /// Lookback for causal queries that do not specify one (milliseconds).
    pub default_lookback_ms: i64,
    /// Default spine depth bound.
    pub max_depth: usize,
    /// Minimum revision significance for spine candidacy.
    pub min_significance: f64,
    /// Temporal slack between adjacent spine steps (milliseconds).
    pub temporal_slack_ms: i64,
    /// Temporal decay constant for ranking (seconds).
    pub temporal_tau_secs: f64,
    /// Path-ranking weights.
    pub ranker_weights: RankerWeights,
    /// Anomaly-detection tunables.
    pub anomaly: AnomalyDetectorConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            snapshot_cadence: DEFAULT_SNAPSHOT_CADENCE,
            snapshot_cache_capacity: DEFAULT_SNAPSHOT_CACHE_CAPACITY,
            default_lookback_ms: DEFAULT_LOOKBACK_MS,
            max_depth: DEFAULT_MAX_DEPTH,
            min_significance: DEFAULT_MIN_SIGNIFICANCE,
            temporal_slack_ms: DEFAULT_TEMPORAL_SLACK_MS,
            temporal_tau_secs: DEFAULT_TEMPORAL_TAU_SECS,
            ranker_weights: RankerWeights::default(),
            anomaly: AnomalyDetectorConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the snapshot cadence.
    #[must_use]
    pub fn with_snapshot_cadence(mut self, cadence: u32) -> Self {
        self.snapshot_cadence = cadence.max(1);
        self
    }

    /// Set the default lookback.
    #[must_use]
    pub fn with_default_lookback_ms(mut self, lookback_ms: i64) -> Self {
        self.default_lookback_ms = lookback_ms;
        self
    }

    /// Set the spine depth bound.
    #[must_use]
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Set the spine-candidacy significance threshold.
    #[must_use]
    pub fn with_min_significance(mut self, min_significance: f64) -> Self {
        self.min_significance = min_significance.clamp(0.0, 1.0);
        self
    }

    /// Set the ranking weights.
    #[must_use]
    pub fn with_ranker_weights(mut self, weights: RankerWeights) -> Self {
        self.ranker_weights = weights;
        self
    }

    /// Set the anomaly tunables.
    #[must_use]
    pub fn with_anomaly(mut self, anomaly: AnomalyDetectorConfig) -> Self {
        self.anomaly = anomaly;
        self
    }
}
