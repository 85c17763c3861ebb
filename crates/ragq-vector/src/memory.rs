//! In-process vector store for small corpora and tests.
//!
//! Chunks inserted with [`MemoryVectorAdapter::insert_pending`] are held back
//! until [`MemoryVectorAdapter::backfill`] computes their embeddings; while any
//! are pending the adapter answers from the embedded subset and reports
//! itself degraded.
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;

use ragq_core::error::AdapterError;
use ragq_core::traits::{ChunkStoreAdapter, Embedder};
use ragq_core::types::{cosine_similarity, AdapterResponse, Chunk, Filters, ScoredChunk};

use crate::search::VECTOR_ADAPTER;

#[derive(Default)]
struct Store {
    ready: Vec<Arc<Chunk>>,
    pending: Vec<Chunk>,
}

pub struct MemoryVectorAdapter {
    name: String,
    embedder: Arc<dyn Embedder>,
    store: Arc<RwLock<Store>>,
}

impl MemoryVectorAdapter {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self { name: VECTOR_ADAPTER.to_string(), embedder, store: Arc::new(RwLock::new(Store::default())) }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    fn read(&self) -> RwLockReadGuard<'_, Store> {
        read_store(&self.store)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Store> {
        self.store.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Embed any chunk that arrives without a vector, then make all of them searchable.
    pub fn insert(&self, chunks: Vec<Chunk>) -> Result<usize> {
        let embedded = self.embed_missing(chunks)?;
        let n = embedded.len();
        self.write().ready.extend(embedded.into_iter().map(Arc::new));
        Ok(n)
    }

    /// Queue chunks whose embeddings will be computed later by [`Self::backfill`].
    pub fn insert_pending(&self, chunks: Vec<Chunk>) {
        self.write().pending.extend(chunks);
    }

    pub fn backfill(&self) -> Result<usize> {
        let pending = std::mem::take(&mut self.write().pending);
        match self.embed_missing(pending.clone()) {
            Ok(embedded) => {
                let n = embedded.len();
                self.write().ready.extend(embedded.into_iter().map(Arc::new));
                debug!(adapter = %self.name, chunks = n, "backfilled embeddings");
                Ok(n)
            }
            Err(e) => {
                self.write().pending.extend(pending);
                Err(e)
            }
        }
    }

    pub fn len(&self) -> usize {
        self.read().ready.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn pending(&self) -> usize {
        self.read().pending.len()
    }

    fn embed_missing(&self, mut chunks: Vec<Chunk>) -> Result<Vec<Chunk>> {
        let missing: Vec<usize> = chunks.iter().enumerate().filter(|(_, c)| c.embedding.is_none()).map(|(i, _)| i).collect();
        if missing.is_empty() {
            return Ok(chunks);
        }
        let texts: Vec<String> = missing.iter().map(|&i| chunks[i].text.clone()).collect();
        let vectors = self.embedder.embed_batch(&texts)?;
        if vectors.len() != texts.len() {
            return Err(anyhow!("embedder returned {} vectors for {} texts", vectors.len(), texts.len()));
        }
        for (i, v) in missing.into_iter().zip(vectors) {
            chunks[i].embedding = Some(v);
        }
        Ok(chunks)
    }
}

fn read_store(store: &RwLock<Store>) -> RwLockReadGuard<'_, Store> {
    store.read().unwrap_or_else(|e| e.into_inner())
}

fn rank(store: &Store, name: &str, query_vec: &[f32], top_k: usize, filters: &Filters) -> AdapterResponse {
    let mut scored: Vec<(f32, &Arc<Chunk>)> = store
        .ready
        .iter()
        .filter(|c| filters.matches(c))
        .filter_map(|c| c.embedding.as_deref().map(|e| (cosine_similarity(query_vec, e), c)))
        .collect();
    scored.sort_by(|a, b| b.0.total_cmp(&a.0).then_with(|| a.1.id.cmp(&b.1.id)));
    let hits = scored.into_iter().take(top_k).map(|(score, c)| ScoredChunk::new(Arc::clone(c), score, name)).collect();
    AdapterResponse { hits, degraded: !store.pending.is_empty() }
}

#[async_trait]
impl ChunkStoreAdapter for MemoryVectorAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn retrieve(&self, query: &str, top_k: usize, filters: &Filters) -> Result<AdapterResponse, AdapterError> {
        let name = self.name.clone();
        let embedder = Arc::clone(&self.embedder);
        let store = Arc::clone(&self.store);
        let query = query.to_string();
        let filters = filters.clone();
        // Embedding and the brute-force scan both run on the blocking pool.
        tokio::task::spawn_blocking(move || -> Result<AdapterResponse, AdapterError> {
            let query_vec = embedder
                .embed_batch(&[query])
                .map_err(|e| AdapterError::unavailable(&name, e))?
                .pop()
                .ok_or_else(|| AdapterError::unavailable(&name, "embedder returned no vector"))?;
            Ok(rank(&read_store(&store), &name, &query_vec, top_k, &filters))
        })
        .await
        .map_err(|e| AdapterError::unavailable(&self.name, e))?
    }
}
