//! Semantic recall over a graph snapshot
//!
//! Ranking runs on a blocking thread against an immutable snapshot, bounded
//! by a timeout. Every failure mode yields an empty result.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::config::RecallConfig;
use crate::embedding::ManagedEmbedder;
use crate::error::{GraphError, Result};
use crate::graph::{GraphSnapshot, GraphView};
use crate::types::{Entity, EntityType, Lifecycle, RecencyBucket};

/// Filters applied before ranking
#[derive(Debug, Clone, PartialEq)]
pub struct RecallOptions {
    pub k: usize,
    /// Recency buckets eligible for recall
    pub windows: Vec<RecencyBucket>,
    /// Restrict to these types; `None` allows all
    pub types: Option<Vec<EntityType>>,
    pub min_confidence: f32,
}

impl Default for RecallOptions {
    fn default() -> Self {
        Self {
            k: 5,
            windows: vec![RecencyBucket::Now, RecencyBucket::Earlier],
            types: None,
            min_confidence: 0.3,
        }
    }
}

impl RecallOptions {
    pub fn from_config(config: &RecallConfig) -> Self {
        Self {
            k: config.top_k,
            min_confidence: config.min_confidence,
            ..Self::default()
        }
    }

    pub fn with_k(mut self, k: usize) -> Self {
        self.k = k;
        self
    }

    pub fn with_windows(mut self, windows: Vec<RecencyBucket>) -> Self {
        self.windows = windows;
        self
    }

    pub fn with_types(mut self, types: Vec<EntityType>) -> Self {
        self.types = Some(types);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecallHit {
    pub entity: Entity,
    pub score: f32,
}

/// Entities eligible for recall under `opts`, ephemeral ones never
pub fn candidates<'a, V>(view: &'a V, opts: &RecallOptions) -> Vec<&'a Entity>
where
    V: GraphView + ?Sized,
{
    view.entities()
        .filter(|e| e.lifecycle != Lifecycle::Ephemeral)
        .filter(|e| e.confidence >= opts.min_confidence)
        .filter(|e| opts.windows.contains(&e.recency_bucket))
        .filter(|e| {
            opts.types
                .as_ref()
                .map(|types| types.contains(&e.entity_type))
                .unwrap_or(true)
        })
        .collect()
}

fn recall_text(entity: &Entity) -> String {
    format!("{} {}", entity.name, entity.summary)
}

/// Rank eligible entities by similarity to `query`; stops early once
/// `cancelled` is set
pub fn rank<V>(
    embedder: &ManagedEmbedder,
    view: &V,
    query: &str,
    opts: &RecallOptions,
    cancelled: &AtomicBool,
) -> Result<Vec<RecallHit>>
where
    V: GraphView + ?Sized,
{
    let pool = candidates(view, opts);
    if pool.is_empty() || opts.k == 0 || query.trim().is_empty() {
        return Ok(Vec::new());
    }

    let query_vec = embedder.embed(query)?;
    let mut hits = Vec::with_capacity(pool.len());
    for entity in pool {
        if cancelled.load(Ordering::Relaxed) {
            return Err(GraphError::Internal("recall cancelled".to_string()));
        }
        let vector = embedder.embed(&recall_text(entity))?;
        hits.push(RecallHit {
            entity: entity.clone(),
            score: embedder.similarity(&query_vec, &vector)?,
        });
    }

    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.entity.id.cmp(&b.entity.id))
    });
    hits.truncate(opts.k);
    Ok(hits)
}

/// Similarity search layered over the graph.
///
/// Holds no graph state; callers pass a snapshot so ranking never contends
/// with mutations.
#[derive(Debug, Clone)]
pub struct SemanticRecall {
    embedder: Arc<ManagedEmbedder>,
    timeout: Duration,
}

impl SemanticRecall {
    pub fn new(embedder: Arc<ManagedEmbedder>, timeout: Duration) -> Self {
        Self { embedder, timeout }
    }

    pub fn from_config(config: &RecallConfig) -> Self {
        Self::new(
            Arc::new(ManagedEmbedder::from_config(config)),
            Duration::from_millis(config.timeout_ms),
        )
    }

    pub fn embedder(&self) -> &Arc<ManagedEmbedder> {
        &self.embedder
    }

    /// Synchronous ranking; failures degrade to no results
    pub fn recall_blocking<V>(&self, view: &V, query: &str, opts: &RecallOptions) -> Vec<RecallHit>
    where
        V: GraphView + ?Sized,
    {
        let never = AtomicBool::new(false);
        match rank(&self.embedder, view, query, opts, &never) {
            Ok(hits) => hits,
            Err(e) => {
                tracing::warn!(error = %e, "Semantic recall failed; returning no results");
                Vec::new()
            }
        }
    }

    /// Rank on a blocking thread, bounded by the configured timeout.
    ///
    /// On timeout the ranking thread is told to stop and the call returns
    /// empty.
    pub async fn recall(
        &self,
        snapshot: Arc<GraphSnapshot>,
        query: &str,
        opts: RecallOptions,
    ) -> Vec<RecallHit> {
        let cancelled = Arc::new(AtomicBool::new(false));
        let embedder = Arc::clone(&self.embedder);
        let flag = Arc::clone(&cancelled);
        let query = query.to_string();

        let task = tokio::task::spawn_blocking(move || {
            rank(&embedder, snapshot.as_ref(), &query, &opts, &flag)
        });

        let outcome = match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join)) => Err(GraphError::Internal(format!("recall task failed: {}", join))),
            Err(_) => {
                cancelled.store(true, Ordering::Relaxed);
                Err(GraphError::Timeout(self.timeout))
            }
        };

        match outcome {
            Ok(hits) => {
                tracing::debug!(hits = hits.len(), "Semantic recall complete");
                hits
            }
            Err(e) => {
                tracing::warn!(error = %e, "Semantic recall degraded to no results");
                Vec::new()
            }
        }
    }
}
