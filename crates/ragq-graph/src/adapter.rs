use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::debug;

use ragq_core::error::AdapterError;
use ragq_core::traits::ChunkStoreAdapter;
use ragq_core::types::{AdapterResponse, ChunkId, Filters, ScoredChunk};

use crate::graph::EntityGraph;

pub const GRAPH_ADAPTER: &str = "graph";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    /// Multiplier applied to chunks reached through a one-hop neighbour.
    pub hop_decay: f32,
    /// Edges lighter than this are not followed.
    pub min_edge_weight: f32,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self { hop_decay: 0.5, min_edge_weight: 0.0 }
    }
}

/// Entity lookup: entities named in the query score their chunks 1.0 each,
/// neighbours add `hop_decay * weight / heaviest_edge`. Scores sum per chunk.
pub struct GraphAdapter {
    name: String,
    graph: Arc<EntityGraph>,
    config: GraphConfig,
}

impl GraphAdapter {
    pub fn new(graph: Arc<EntityGraph>) -> Self {
        Self { name: GRAPH_ADAPTER.to_string(), graph, config: GraphConfig::default() }
    }

    pub fn with_config(mut self, config: GraphConfig) -> Self {
        self.config = config;
        self
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn score(&self, query: &str) -> BTreeMap<ChunkId, f32> {
        let seeds = self.graph.match_query(query);
        let seed_set: BTreeSet<_> = seeds.iter().copied().collect();
        let mut scores: BTreeMap<ChunkId, f32> = BTreeMap::new();
        for &seed in &seeds {
            for id in &self.graph.node(seed).chunk_ids {
                *scores.entry(id.clone()).or_default() += 1.0;
            }
            let neighbours: Vec<_> = self
                .graph
                .neighbors(seed)
                .into_iter()
                .filter(|(n, w)| !seed_set.contains(n) && *w > self.config.min_edge_weight)
                .collect();
            let heaviest = neighbours.iter().map(|(_, w)| *w).fold(0f32, f32::max);
            if heaviest <= 0.0 {
                continue;
            }
            for (n, w) in neighbours {
                let boost = self.config.hop_decay * w / heaviest;
                for id in &self.graph.node(n).chunk_ids {
                    *scores.entry(id.clone()).or_default() += boost;
                }
            }
        }
        debug!(adapter = %self.name, seeds = seeds.len(), chunks = scores.len(), "graph expansion");
        scores
    }
}

#[async_trait]
impl ChunkStoreAdapter for GraphAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn retrieve(&self, query: &str, top_k: usize, filters: &Filters) -> Result<AdapterResponse, AdapterError> {
        let mut hits: Vec<ScoredChunk> = self
            .score(query)
            .into_iter()
            .filter_map(|(id, score)| self.graph.chunk(&id).map(|c| (Arc::clone(c), score)))
            .filter(|(c, _)| filters.matches(c))
            .map(|(c, score)| ScoredChunk::new(c, score, self.name.as_str()))
            .collect();
        hits.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.chunk.id.cmp(&b.chunk.id)));
        hits.truncate(top_k);
        Ok(AdapterResponse::complete(hits))
    }
}
