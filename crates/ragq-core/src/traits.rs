use async_trait::async_trait;

use crate::error::{AdapterError, GenerationError};
use crate::types::{AdapterResponse, Filters, Generation, GenerationRequest};

/// Deterministic tokenization used for `Chunk::token_count` and budgets.
pub trait TokenCounter: Send + Sync {
    fn count(&self, text: &str) -> usize;
}

pub trait Embedder: Send + Sync {
    fn dim(&self) -> usize;
    fn max_len(&self) -> usize;
    fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>>;
}

/// One retrieval backend. Implementations must be read-only and apply
/// `filters` inside the backend query.
#[async_trait]
pub trait ChunkStoreAdapter: Send + Sync {
    /// Stable name used for fusion weights, source tags and logs.
    fn name(&self) -> &str;

    async fn retrieve(&self, query: &str, top_k: usize, filters: &Filters) -> Result<AdapterResponse, AdapterError>;
}

/// The external text-generation collaborator.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<Generation, GenerationError>;
}

/// Rewrites a normalized query before dispatch (synonyms, acronyms).
pub trait QueryExpander: Send + Sync {
    fn expand(&self, normalized: &str) -> String;
}

/// Supplied by the ingestion side; any corpus mutation must increase it.
pub trait CorpusVersionSource: Send + Sync {
    fn corpus_version(&self) -> u64;
}
