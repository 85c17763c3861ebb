//! Domain types used by adapters, the fusion ranker and the orchestrator.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use crate::traits::TokenCounter;

pub type ChunkId = String;
pub type Meta = BTreeMap<String, String>;

/// Well-known metadata keys consulted by [`Filters`].
pub const META_TENANT: &str = "tenant";
pub const META_DOC_TYPE: &str = "doc_type";
/// Unix seconds, stored as a decimal string.
pub const META_CREATED_AT: &str = "created_at";

/// Where a chunk lives inside its source document. `start`/`end` are byte
/// offsets into the extracted text.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceLocation {
    pub page: Option<u32>,
    pub start: usize,
    pub end: usize,
}

/// An immutable unit of retrievable text.
///
/// - `id`: stable chunk identifier; re-ingestion produces new ids
/// - `document_id`: identity of the parent document
/// - `token_count`: deterministic token count of `text`
/// - `embedding`: optional fixed-length vector
/// - `metadata`: tenant, document type, creation time and free-form keys
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: ChunkId,
    pub document_id: String,
    pub text: String,
    pub token_count: usize,
    pub source_location: SourceLocation,
    pub embedding: Option<Vec<f32>>,
    pub metadata: Meta,
}

impl Chunk {
    pub fn new(id: impl Into<ChunkId>, document_id: impl Into<String>, text: impl Into<String>, counter: &dyn TokenCounter) -> Self {
        let text = text.into();
        let token_count = counter.count(&text);
        Self {
            id: id.into(),
            document_id: document_id.into(),
            text,
            token_count,
            source_location: SourceLocation::default(),
            embedding: None,
            metadata: Meta::new(),
        }
    }

    pub fn with_location(mut self, location: SourceLocation) -> Self {
        self.source_location = location;
        self
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn tenant(&self) -> Option<&str> {
        self.metadata.get(META_TENANT).map(String::as_str)
    }

    pub fn doc_type(&self) -> Option<&str> {
        self.metadata.get(META_DOC_TYPE).map(String::as_str)
    }

    pub fn created_at(&self) -> Option<i64> {
        self.metadata.get(META_CREATED_AT).and_then(|v| v.parse().ok())
    }
}

/// Access and scope restrictions every adapter must apply.
///
/// Empty collections and `None` bounds mean "unrestricted". Date bounds are
/// inclusive unix seconds; a chunk without `created_at` never matches a
/// date-bounded filter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Filters {
    pub tenant: Option<String>,
    pub document_ids: Option<BTreeSet<String>>,
    pub doc_types: BTreeSet<String>,
    pub created_after: Option<i64>,
    pub created_before: Option<i64>,
}

impl Filters {
    pub fn for_tenant(tenant: impl Into<String>) -> Self {
        Self { tenant: Some(tenant.into()), ..Self::default() }
    }

    pub fn with_doc_type(mut self, doc_type: impl Into<String>) -> Self {
        self.doc_types.insert(doc_type.into());
        self
    }

    pub fn with_documents<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.document_ids = Some(ids.into_iter().map(Into::into).collect());
        self
    }

    pub fn created_between(mut self, after: Option<i64>, before: Option<i64>) -> Self {
        self.created_after = after;
        self.created_before = before;
        self
    }

    pub fn has_date_range(&self) -> bool {
        self.created_after.is_some() || self.created_before.is_some()
    }

    pub fn is_unrestricted(&self) -> bool {
        self.tenant.is_none() && self.document_ids.is_none() && self.doc_types.is_empty() && !self.has_date_range()
    }

    pub fn matches(&self, chunk: &Chunk) -> bool {
        if let Some(tenant) = &self.tenant {
            if chunk.tenant() != Some(tenant.as_str()) {
                return false;
            }
        }
        if let Some(ids) = &self.document_ids {
            if !ids.contains(&chunk.document_id) {
                return false;
            }
        }
        if !self.doc_types.is_empty() {
            match chunk.doc_type() {
                Some(t) if self.doc_types.contains(t) => {}
                _ => return false,
            }
        }
        if self.has_date_range() {
            let Some(ts) = chunk.created_at() else { return false };
            if self.created_after.is_some_and(|lo| ts < lo) {
                return false;
            }
            if self.created_before.is_some_and(|hi| ts > hi) {
                return false;
            }
        }
        true
    }
}

/// A chunk as returned by one adapter. `score` is only meaningful relative to
/// other hits from the same adapter.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk: Arc<Chunk>,
    pub score: f32,
    pub source_adapter: String,
}

impl ScoredChunk {
    pub fn new(chunk: Arc<Chunk>, score: f32, source_adapter: impl Into<String>) -> Self {
        Self { chunk, score, source_adapter: source_adapter.into() }
    }
}

/// One adapter's answer to `retrieve`. `degraded` marks a partial result set
/// from a backend that is reachable but not fully healthy.
#[derive(Debug, Clone, Default)]
pub struct AdapterResponse {
    pub hits: Vec<ScoredChunk>,
    pub degraded: bool,
}

impl AdapterResponse {
    pub fn complete(hits: Vec<ScoredChunk>) -> Self {
        Self { hits, degraded: false }
    }

    pub fn degraded(hits: Vec<ScoredChunk>) -> Self {
        Self { hits, degraded: true }
    }
}

/// A chunk after cross-adapter fusion.
#[derive(Debug, Clone)]
pub struct FusedResult {
    pub chunk: Arc<Chunk>,
    pub fused_score: f64,
    /// Adapters whose lists contained this chunk.
    pub sources: BTreeSet<String>,
    /// Lowest 1-indexed rank the chunk reached in any list.
    pub best_rank: usize,
    /// Ids of near-duplicate chunks folded into this one.
    pub duplicates: Vec<ChunkId>,
}

impl FusedResult {
    pub fn id(&self) -> &str {
        &self.chunk.id
    }

    pub fn token_count(&self) -> usize {
        self.chunk.token_count
    }
}

/// The bounded, ordered set of chunks handed to the generator.
#[derive(Debug, Clone, Default)]
pub struct ContextWindow {
    pub entries: Vec<FusedResult>,
    pub used_tokens: usize,
    pub budget: usize,
}

impl ContextWindow {
    pub fn empty(budget: usize) -> Self {
        Self { entries: Vec::new(), used_tokens: 0, budget }
    }

    pub fn residual(&self) -> usize {
        self.budget.saturating_sub(self.used_tokens)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn citations(&self) -> Vec<Citation> {
        self.entries.iter().map(|e| Citation::from(e.chunk.as_ref())).collect()
    }
}

/// Cache key for an answered query.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueryFingerprint(String);

impl QueryFingerprint {
    /// Hash every input that can change the answer. Fields are length-prefixed
    /// so adjacent values cannot collide by concatenation.
    pub fn compute(normalized_query: &str, filters: &Filters, token_budget: usize, config_version: &str, corpus_version: u64) -> Self {
        let mut hasher = blake3::Hasher::new();
        let filters_json = serde_json::to_string(filters).unwrap_or_default();
        for part in [normalized_query, filters_json.as_str(), config_version] {
            hasher.update(&(part.len() as u64).to_le_bytes());
            hasher.update(part.as_bytes());
        }
        hasher.update(&(token_budget as u64).to_le_bytes());
        hasher.update(&corpus_version.to_le_bytes());
        Self(hasher.finalize().to_hex().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for QueryFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    pub chunk_id: ChunkId,
    pub document_id: String,
    pub source_location: SourceLocation,
}

impl From<&Chunk> for Citation {
    fn from(c: &Chunk) -> Self {
        Self { chunk_id: c.id.clone(), document_id: c.document_id.clone(), source_location: c.source_location }
    }
}

/// A sentence of the answer and the citations (indices into
/// `AnsweredQuery::citations`) it draws from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claim {
    pub text: String,
    pub start: usize,
    pub end: usize,
    pub citations: Vec<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Attribution {
    /// The generator reported which passages each span used.
    Native,
    /// Every window citation is attached to the whole answer.
    Fallback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdapterFailure {
    pub adapter: String,
    pub error: String,
}

/// Non-fatal conditions attached to a successful answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Warning {
    PartialAdapterFailure { failures: Vec<AdapterFailure> },
    DegradedAdapter { adapter: String },
}

/// The final, immutable result of one orchestrator run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnsweredQuery {
    pub query: String,
    pub answer: String,
    pub citations: Vec<Citation>,
    pub claims: Vec<Claim>,
    pub attribution: Attribution,
    pub confidence: Confidence,
    pub warnings: Vec<Warning>,
    pub corpus_version: u64,
    pub fingerprint: QueryFingerprint,
}

impl AnsweredQuery {
    pub fn is_partial(&self) -> bool {
        self.warnings.iter().any(|w| matches!(w, Warning::PartialAdapterFailure { .. }))
    }

    pub fn cited_chunk_ids(&self) -> Vec<&str> {
        self.citations.iter().map(|c| c.chunk_id.as_str()).collect()
    }
}

/// A context passage as presented to the generation collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Passage {
    pub citation_id: ChunkId,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub query: String,
    pub passages: Vec<Passage>,
}

impl GenerationRequest {
    pub fn from_window(query: &str, window: &ContextWindow) -> Self {
        let passages = window
            .entries
            .iter()
            .map(|e| Passage { citation_id: e.chunk.id.clone(), text: e.chunk.text.clone() })
            .collect();
        Self { query: query.to_string(), passages }
    }
}

/// Byte span `[start, end)` of the generated text and the passages it used.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpanAttribution {
    pub start: usize,
    pub end: usize,
    pub chunk_ids: Vec<ChunkId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Generation {
    pub text: String,
    pub spans: Option<Vec<SpanAttribution>>,
}

impl Generation {
    pub fn unattributed(text: impl Into<String>) -> Self {
        Self { text: text.into(), spans: None }
    }
}

/// Cosine similarity; 0.0 for mismatched lengths or zero vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let (mut dot, mut na, mut nb) = (0f32, 0f32, 0f32);
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    dot / (na.sqrt() * nb.sqrt())
}
