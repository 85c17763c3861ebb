use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use ragq_core::error::AdapterError;
use ragq_core::traits::ChunkStoreAdapter;
use ragq_core::types::{AdapterResponse, Filters, ScoredChunk};

use crate::index::KeywordIndex;

pub const KEYWORD_ADAPTER: &str = "keyword";

/// [`ChunkStoreAdapter`] over a [`KeywordIndex`]. Searches run on the blocking
/// pool so a slow index cannot stall the orchestrator's other adapters.
pub struct KeywordAdapter {
    name: String,
    index: Arc<KeywordIndex>,
}

impl KeywordAdapter {
    pub fn new(index: Arc<KeywordIndex>) -> Self {
        Self { name: KEYWORD_ADAPTER.to_string(), index }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

#[async_trait]
impl ChunkStoreAdapter for KeywordAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn retrieve(&self, query: &str, top_k: usize, filters: &Filters) -> Result<AdapterResponse, AdapterError> {
        let index = Arc::clone(&self.index);
        let (q, f) = (query.to_string(), filters.clone());
        let hits = tokio::task::spawn_blocking(move || index.search(&q, top_k, &f))
            .await
            .map_err(|e| AdapterError::unavailable(&self.name, e))?
            .map_err(|e| AdapterError::unavailable(&self.name, e))?;
        let degraded = self.index.is_rebuilding();
        debug!(adapter = %self.name, hits = hits.len(), degraded, "keyword search");
        let hits = hits.into_iter().map(|(score, chunk)| ScoredChunk::new(Arc::new(chunk), score, self.name.as_str())).collect();
        Ok(AdapterResponse { hits, degraded })
    }
}
