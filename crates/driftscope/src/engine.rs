// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! # Engine - The One Handle The RPC Layer Holds
//!
//! Wires the revision store, resolver, indexer, builders, detector, and
//! ranker into a single explicit handle. The engine is constructed once at
//! process start from storage and passed to every caller - there are no
//! singletons. Each query runs under its own [`QueryControl`]; deadline
//! expiry always yields a partial, resumable result rather than an error.

use crate::causal::{CausalGraphBuilder, SymptomSpec};
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::event::{EventIndex, KubeEvent};
use crate::indexer::{IngestAck, RevisionIndexer};
use crate::query::{
    decode_cursor, encode_cursor, CausalChainStep, CausalGraphQuery, CausalGraphResponse,
    CausalQueryMetadata, CursorPayload, GraphQueryMetadata, Incident, NamespaceGraphQuery,
    NamespaceGraphResponse, PageMetadata, QueryControl, SnapshotFormat, TimelineChunk,
    TimelineQuery,
};
use crate::rank::{CausalPath, PathRanker};
use crate::resolver::{ResolvedState, SnapshotResolver};
use crate::revision::{Revision, TimeWindow};
use crate::store::{MemoryRevisionStore, RevisionStore};
use crate::timeline::TimelineBuilder;
use crate::anomaly::{AnomalyDetector, AnomalySeverity};
use crate::constants::ALGORITHM_VERSION;
use futures::Stream;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// The process-wide engine handle.
pub struct Engine {
    store: Arc<dyn RevisionStore>,
    resolver: Arc<SnapshotResolver>,
    events: Arc<EventIndex>,
    indexer: RevisionIndexer,
    timeline: TimelineBuilder,
    builder: CausalGraphBuilder,
    ranker: PathRanker,
    config: EngineConfig,
}

impl Engine {
    /// An engine over explicit storage.
    #[must_use]
    pub fn new(store: Arc<dyn RevisionStore>, config: EngineConfig) -> Self {
        let resolver = Arc::new(SnapshotResolver::new(
            Arc::clone(&store),
            config.snapshot_cache_capacity,
        ));
        let events = Arc::new(EventIndex::new());
        let indexer = RevisionIndexer::new(
            Arc::clone(&store),
            Arc::clone(&resolver),
            config.snapshot_cadence,
        );
        let timeline = TimelineBuilder::new(Arc::clone(&store), Arc::clone(&resolver));
        let builder = CausalGraphBuilder::new(
            Arc::clone(&store),
            Arc::clone(&resolver),
            Arc::clone(&events),
            AnomalyDetector::new(config.anomaly.clone()),
        );
        let ranker = PathRanker::new(config.ranker_weights, config.temporal_tau_secs);
        info!(algorithm_version = ALGORITHM_VERSION, "engine initialised");
        Self {
            store,
            resolver,
            events,
            indexer,
            timeline,
            builder,
            ranker,
            config,
        }
    }

    /// An engine over the in-memory reference store.
    #[must_use]
    pub fn with_memory_store(config: EngineConfig) -> Self {
        Self::new(Arc::new(MemoryRevisionStore::new()), config)
    }

    /// The underlying store handle.
    #[must_use]
    pub fn store(&self) -> Arc<dyn RevisionStore> {
        Arc::clone(&self.store)
    }

    // ========================================================================
    // Ingest contract
    // ========================================================================

    /// Ingest one object revision.
    pub async fn ingest(&self, revision: Revision) -> Result<IngestAck> {
        self.indexer.ingest(revision).await
    }

    /// Ingest one Kubernetes Event.
    pub fn ingest_event(&self, event: KubeEvent) {
        self.events.record(event);
    }

    /// Point-in-time resolution, exposed for callers that need raw state.
    pub async fn state_at(&self, uid: &str, t_ns: i64) -> Result<ResolvedState> {
        self.resolver.state_at(uid, t_ns).await
    }

    // ========================================================================
    // Timeline query
    // ========================================================================

    /// One page of a timeline query.
    pub async fn timeline_query(
        &self,
        query: &TimelineQuery,
        control: &QueryControl,
    ) -> Result<TimelineChunk> {
        query.window.validate()?;
        let page_size = query.page.page_size.max(1);

        let resume_after = match &query.page.cursor {
            Some(cursor) => match decode_cursor(cursor)? {
                CursorPayload::Timeline { last } => Some(last),
                _ => {
                    return Err(Error::InvalidArgument(
                        "cursor kind does not match a timeline query".to_owned(),
                    ))
                }
            },
            None => None,
        };

        let entries = self.store.list_entries(None).await?;
        let matching: Vec<_> = entries
            .iter()
            .filter(|entry| query.filter.matches_ref(&entry.resource))
            .collect();
        let total_count = matching.len() as u64;

        let mut resources = Vec::new();
        let mut last_examined = resume_after.clone();
        let mut exhausted = true;
        let mut truncated = false;
        for entry in &matching {
            let key = (
                entry.resource.namespace.clone(),
                entry.resource.kind.clone(),
                entry.resource.name.clone(),
                entry.resource.uid.clone(),
            );
            if let Some(after) = &resume_after {
                if key <= *after {
                    continue;
                }
            }
            if control.is_interrupted() {
                exhausted = false;
                truncated = true;
                break;
            }
            if resources.len() >= page_size {
                exhausted = false;
                break;
            }

            let events = self.events.events_in(&entry.resource.uid, query.window);
            let built = self
                .timeline
                .build(&entry.resource.uid, query.window, events)
                .await?;
            last_examined = Some(key);
            let Some(timeline) = built else {
                continue;
            };
            if query.filter.problematic_only && !timeline.is_problematic() {
                continue;
            }
            resources.push(timeline);
        }

        let has_more = !exhausted;
        let next_cursor = if has_more {
            last_examined
                .map(|last| encode_cursor(&CursorPayload::Timeline { last }))
                .transpose()?
        } else {
            None
        };

        Ok(TimelineChunk {
            resources,
            metadata: PageMetadata {
                total_count: Some(total_count),
                has_more,
                next_cursor,
                truncated,
            },
        })
    }

    /// The timeline result as a lazy stream of chunks, one storage pass per
    /// chunk, stopping at the first interruption.
    pub fn timeline_stream<'a>(
        &'a self,
        query: TimelineQuery,
        control: &'a QueryControl,
    ) -> impl Stream<Item = Result<TimelineChunk>> + 'a {
        async_stream::try_stream! {
            let mut page = query;
            loop {
                let chunk = self.timeline_query(&page, control).await?;
                let has_more = chunk.metadata.has_more;
                let next_cursor = chunk.metadata.next_cursor.clone();
                yield chunk;
                if !has_more {
                    break;
                }
                page.page.cursor = next_cursor;
            }
        }
    }

    // ========================================================================
    // Namespace-graph query
    // ========================================================================

    /// One page of a namespace topology query.
    pub async fn namespace_graph_query(
        &self,
        query: &NamespaceGraphQuery,
        control: &QueryControl,
    ) -> Result<NamespaceGraphResponse> {
        let started = Instant::now();
        let offset = match &query.page.cursor {
            Some(cursor) => match decode_cursor(cursor)? {
                CursorPayload::NamespaceGraph {
                    namespace,
                    timestamp_ns,
                    emitted,
                } => {
                    if namespace != query.namespace || timestamp_ns != query.timestamp_ns {
                        return Err(Error::InvalidArgument(
                            "cursor does not match this namespace query".to_owned(),
                        ));
                    }
                    emitted
                }
                _ => {
                    return Err(Error::InvalidArgument(
                        "cursor kind does not match a namespace query".to_owned(),
                    ))
                }
            },
            None => 0,
        };
        let limit = query.page.page_size.max(1);

        let assembly = self
            .builder
            .assemble_namespace(
                &query.namespace,
                query.timestamp_ns,
                query.lookback_ms,
                query.include_anomalies || query.include_causal_paths,
                control,
            )
            .await?;

        let end = (offset + limit).min(assembly.nodes.len());
        let page_nodes = assembly
            .nodes
            .get(offset..end)
            .unwrap_or_default()
            .to_vec();

        // An edge rides the page where its later-ordered endpoint lands, so
        // each edge is emitted exactly once and after both endpoints.
        let order: HashMap<&str, usize> = assembly
            .nodes
            .iter()
            .enumerate()
            .map(|(index, node)| (node.resource.uid.as_str(), index))
            .collect();
        let page_edges: Vec<_> = assembly
            .edges
            .iter()
            .filter(|edge| {
                match (
                    order.get(edge.from_uid.as_str()),
                    order.get(edge.to_uid.as_str()),
                ) {
                    (Some(&a), Some(&b)) => {
                        let later = a.max(b);
                        later >= offset && later < end
                    }
                    _ => false,
                }
            })
            .cloned()
            .collect();

        let anomalies = query.include_anomalies.then(|| {
            page_nodes
                .iter()
                .flat_map(|node| node.anomalies.iter().cloned())
                .collect::<Vec<_>>()
        });

        let mut causal_paths = None;
        let mut truncated = assembly.truncated;
        if query.include_causal_paths {
            let (paths, enrichment_truncated) = self
                .enrich_with_causal_paths(&page_nodes, query, control)
                .await?;
            truncated = truncated || enrichment_truncated;
            causal_paths = Some(paths);
        }

        let has_more = end < assembly.nodes.len();
        let next_cursor = if has_more {
            Some(encode_cursor(&CursorPayload::NamespaceGraph {
                namespace: query.namespace.clone(),
                timestamp_ns: query.timestamp_ns,
                emitted: end,
            })?)
        } else {
            None
        };

        Ok(NamespaceGraphResponse {
            metadata: GraphQueryMetadata {
                node_count: page_nodes.len(),
                edge_count: page_edges.len(),
                has_more,
                next_cursor,
                truncated,
                query_execution_ms: started.elapsed().as_millis() as u64,
            },
            nodes: page_nodes,
            edges: page_edges,
            anomalies,
            causal_paths,
        })
    }

    /// Symptom-mode enrichment for every page node at or above High
    /// severity, deduplicated by path id.
    async fn enrich_with_causal_paths(
        &self,
        page_nodes: &[crate::graph::GraphNode],
        query: &NamespaceGraphQuery,
        control: &QueryControl,
    ) -> Result<(Vec<CausalPath>, bool)> {
        let mut paths: Vec<CausalPath> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        for node in page_nodes {
            let worst = node.anomalies.iter().map(|a| a.severity).max();
            if worst < Some(AnomalySeverity::High) {
                continue;
            }
            if control.is_interrupted() {
                return Ok((paths, true));
            }
            let spec = SymptomSpec {
                uid: node.resource.uid.clone(),
                t_ns: query.timestamp_ns,
                lookback_ms: query.lookback_ms,
                max_depth: query.max_depth.unwrap_or(self.config.max_depth),
                min_significance: self.config.min_significance,
                temporal_slack_ms: self.config.temporal_slack_ms,
            };
            let outcome = self
                .builder
                .build_symptom_graph(&spec, control, None)
                .await?;
            debug!(
                symptom = node.resource.uid,
                spine = outcome.graph.spine.len(),
                "causal enrichment"
            );
            for path in self.ranker.rank(&outcome.graph) {
                if seen.insert(path.id.clone()) {
                    paths.push(path);
                }
            }
        }
        Ok((paths, false))
    }

    // ========================================================================
    // Causal-graph query (symptom mode)
    // ========================================================================

    /// Answer a root-cause query for one observed failure.
    pub async fn causal_graph_query(
        &self,
        query: &CausalGraphQuery,
        control: &QueryControl,
    ) -> Result<CausalGraphResponse> {
        let started = Instant::now();
        if let Some(min_confidence) = query.min_confidence {
            if !(0.0..=1.0).contains(&min_confidence) {
                return Err(Error::InvalidArgument(format!(
                    "min_confidence {min_confidence} outside [0, 1]"
                )));
            }
        }
        let resume = query.cursor.as_deref().map(decode_cursor).transpose()?;

        let spec = SymptomSpec {
            uid: query.resource_uid.clone(),
            t_ns: query.failure_timestamp_ns,
            lookback_ms: query.lookback_ms.unwrap_or(self.config.default_lookback_ms),
            max_depth: query.max_depth.unwrap_or(self.config.max_depth),
            min_significance: self.config.min_significance,
            temporal_slack_ms: self.config.temporal_slack_ms,
        };
        let outcome = self
            .builder
            .build_symptom_graph(&spec, control, resume.as_ref())
            .await?;

        let mut paths = self.ranker.rank(&outcome.graph);
        if let Some(min_confidence) = query.min_confidence {
            paths.retain(|path| path.confidence_score >= min_confidence);
        }

        let causal_chain = self.causal_chain(&outcome.graph, query.format).await?;

        let explanation = paths
            .is_empty()
            .then(|| "no causal chain found within lookback".to_owned());
        let next_cursor = outcome
            .cursor
            .as_ref()
            .map(encode_cursor)
            .transpose()?;
        let observed_symptom = outcome
            .graph
            .observed_symptom
            .clone()
            .ok_or_else(|| Error::internal("symptom-mode graph without a symptom"))?;

        Ok(CausalGraphResponse {
            incident: Incident {
                observed_symptom,
                graph: outcome.graph,
                causal_chain,
            },
            paths,
            explanation,
            metadata: CausalQueryMetadata {
                algorithm_version: ALGORITHM_VERSION.to_owned(),
                query_execution_ms: started.elapsed().as_millis() as u64,
                next_cursor,
            },
        })
    }

    /// Materialise the spine with its triggering revisions, honouring the
    /// requested payload format.
    async fn causal_chain(
        &self,
        graph: &crate::graph::CausalGraph,
        format: SnapshotFormat,
    ) -> Result<Vec<CausalChainStep>> {
        let mut chain = Vec::with_capacity(graph.spine.len());
        for step in &graph.spine {
            let resource = graph
                .node(&step.uid)
                .map(|node| node.resource.clone())
                .unwrap_or_default();
            let triggering_revision = match step.triggering_ts_ns {
                Some(ts) => self
                    .store
                    .revisions_in(&step.uid, TimeWindow::new(ts, ts))
                    .await?
                    .into_iter()
                    .next()
                    .map(|mut revision| {
                        if format == SnapshotFormat::Diff {
                            revision.full_snapshot = None;
                        }
                        revision
                    }),
                None => None,
            };
            chain.push(CausalChainStep {
                step: step.step,
                resource,
                triggering_revision,
                significance: step.significance,
            });
        }
        Ok(chain)
    }
}
