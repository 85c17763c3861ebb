use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use ragq_core::config::EngineConfig;
use ragq_core::corpus::CorpusVersion;
use ragq_core::error::{AdapterError, GenerationError, QueryError};
use ragq_core::traits::{ChunkStoreAdapter, Embedder, Generator, TokenCounter};
use ragq_core::types::{
    AdapterResponse, AnsweredQuery, Attribution, Chunk, Filters, Generation, GenerationRequest, ScoredChunk, Warning, META_TENANT,
};
use ragq_hybrid::{ExtractiveGenerator, QueryEngine};
use ragq_vector::MemoryVectorAdapter;

struct Words;
impl TokenCounter for Words {
    fn count(&self, text: &str) -> usize {
        text.split_whitespace().count()
    }
}

fn chunk(id: &str, tenant: &str, text: &str) -> Arc<Chunk> {
    Arc::new(Chunk::new(id, id.split(':').next().unwrap_or(id), text, &Words).with_meta(META_TENANT, tenant))
}

/// Returns its chunks in order, optionally slow, failing, degraded, or
/// ignoring filters.
struct StubAdapter {
    name: &'static str,
    chunks: Vec<Arc<Chunk>>,
    delay: Duration,
    fail: bool,
    degraded: bool,
    honour_filters: bool,
}

impl StubAdapter {
    fn new(name: &'static str, chunks: Vec<Arc<Chunk>>) -> Self {
        Self { name, chunks, delay: Duration::ZERO, fail: false, degraded: false, honour_filters: true }
    }
    fn slow(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
    fn failing(mut self) -> Self {
        self.fail = true;
        self
    }
    fn degraded(mut self) -> Self {
        self.degraded = true;
        self
    }
    fn leaky(mut self) -> Self {
        self.honour_filters = false;
        self
    }
    fn arc(self) -> Arc<dyn ChunkStoreAdapter> {
        Arc::new(self)
    }
}

#[async_trait]
impl ChunkStoreAdapter for StubAdapter {
    fn name(&self) -> &str {
        self.name
    }

    async fn retrieve(&self, _query: &str, top_k: usize, filters: &Filters) -> Result<AdapterResponse, AdapterError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.fail {
            return Err(AdapterError::unavailable(self.name, "connection refused"));
        }
        let hits = self
            .chunks
            .iter()
            .filter(|c| !self.honour_filters || filters.matches(c))
            .take(top_k)
            .enumerate()
            .map(|(i, c)| ScoredChunk::new(Arc::clone(c), 1.0 / (i as f32 + 1.0), self.name))
            .collect();
        Ok(AdapterResponse { hits, degraded: self.degraded })
    }
}

/// Extractive answers, counting calls; fails the first `failures` calls and
/// sleeps `delay` before each.
struct ScriptedGenerator {
    calls: AtomicUsize,
    failures: usize,
    delay: Duration,
}

impl ScriptedGenerator {
    fn ok() -> Arc<Self> {
        Self::new(0, Duration::ZERO)
    }
    fn new(failures: usize, delay: Duration) -> Arc<Self> {
        Arc::new(Self { calls: AtomicUsize::new(0), failures, delay })
    }
    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<Generation, GenerationError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if n < self.failures {
            return Err(GenerationError::Failed(format!("attempt {} failed", n + 1)));
        }
        ExtractiveGenerator::default().generate(request).await
    }
}

fn config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.context.reserved_tokens = 0;
    config.retrieval.adapter_timeout_ms = 100;
    config.generation.timeout_ms = 1_000;
    config
}

fn corpus() -> (Vec<Arc<Chunk>>, Vec<Arc<Chunk>>) {
    let a = chunk("water:0", "acme", "Boil water for one minute. It kills pathogens.");
    let b = chunk("water:1", "acme", "Filter cloudy water before boiling. Cloth works.");
    let c = chunk("fire:0", "acme", "Keep tinder dry. Birch bark lights when damp.");
    (vec![Arc::clone(&a), Arc::clone(&b), c], vec![b])
}

fn engine_with(generator: Arc<ScriptedGenerator>, config: EngineConfig, adapters: Vec<Arc<dyn ChunkStoreAdapter>>) -> QueryEngine {
    let mut builder = QueryEngine::builder(generator, Arc::new(Words)).config(config);
    for a in adapters {
        builder = builder.adapter(a);
    }
    builder.build().expect("engine")
}

fn default_engine(generator: Arc<ScriptedGenerator>) -> QueryEngine {
    let (vector, keyword) = corpus();
    engine_with(generator, config(), vec![StubAdapter::new("vector", vector).arc(), StubAdapter::new("keyword", keyword).arc()])
}

#[tokio::test]
async fn answers_from_the_fused_window_with_citations() {
    let generator = ScriptedGenerator::ok();
    let engine = default_engine(Arc::clone(&generator));
    let answer = engine.answer("How do I purify water?", &Filters::default(), 1_000).await.expect("answer");

    // water:1 is ranked by both adapters and leads the window.
    assert!(answer.answer.starts_with("Filter cloudy water before boiling."));
    assert_eq!(answer.attribution, Attribution::Native);
    assert_eq!(answer.cited_chunk_ids(), vec!["water:1", "water:0", "fire:0"]);
    assert_eq!(answer.claims.len(), 3);
    assert!(answer.claims.iter().all(|c| c.citations.len() == 1));
    assert!(answer.warnings.is_empty());
    assert_eq!(answer.query, "How do I purify water?");
    assert_eq!(generator.calls(), 1);
}

#[tokio::test]
async fn repeated_question_is_served_from_cache() {
    let generator = ScriptedGenerator::ok();
    let engine = default_engine(Arc::clone(&generator));
    let first = engine.answer("purify water", &Filters::default(), 1_000).await.expect("answer");
    let second = engine.answer("  PURIFY   water ", &Filters::default(), 1_000).await.expect("answer");
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(generator.calls(), 1);
    let stats = engine.cache().stats();
    assert_eq!((stats.hits, stats.misses), (1, 1));

    engine.answer("purify water", &Filters::for_tenant("acme"), 1_000).await.expect("answer");
    engine.answer("purify water", &Filters::default(), 999).await.expect("answer");
    assert_eq!(generator.calls(), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_callers_share_one_computation() {
    let generator = ScriptedGenerator::new(0, Duration::from_millis(100));
    let engine = Arc::new(default_engine(Arc::clone(&generator)));
    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move { engine.answer("purify water", &Filters::default(), 1_000).await })
        })
        .collect();
    let mut answers = Vec::new();
    for t in tasks {
        answers.push(t.await.expect("join").expect("answer"));
    }
    assert_eq!(generator.calls(), 1);
    assert!(answers.iter().all(|a| Arc::ptr_eq(a, &answers[0])));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_callers_share_one_failure() {
    let generator = ScriptedGenerator::new(usize::MAX, Duration::from_millis(100));
    let engine = Arc::new(default_engine(Arc::clone(&generator)));
    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move { engine.answer("purify water", &Filters::default(), 1_000).await })
        })
        .collect();
    for t in tasks {
        let err = t.await.expect("join").unwrap_err();
        assert!(matches!(err, QueryError::GenerationFailed { attempts: 2, .. }), "{err:?}");
    }
    // one computation: first attempt plus one retry
    assert_eq!(generator.calls(), 2);
}

#[tokio::test]
async fn all_adapters_timing_out_means_no_context() {
    let (vector, keyword) = corpus();
    let engine = engine_with(
        ScriptedGenerator::ok(),
        config(),
        vec![
            StubAdapter::new("vector", vector).slow(Duration::from_secs(5)).arc(),
            StubAdapter::new("keyword", keyword).slow(Duration::from_secs(5)).arc(),
        ],
    );
    let err = engine.answer("purify water", &Filters::default(), 1_000).await.unwrap_err();
    assert!(matches!(err, QueryError::NoRelevantContext(_)), "{err:?}");
}

#[tokio::test]
async fn one_failing_adapter_yields_a_partial_answer() {
    let (vector, keyword) = corpus();
    let engine = engine_with(
        ScriptedGenerator::ok(),
        config(),
        vec![
            StubAdapter::new("vector", vector).arc(),
            StubAdapter::new("keyword", keyword).failing().arc(),
            StubAdapter::new("graph", vec![]).slow(Duration::from_secs(5)).arc(),
        ],
    );
    let answer = engine.answer("purify water", &Filters::default(), 1_000).await.expect("answer");
    assert!(answer.is_partial());
    let Some(Warning::PartialAdapterFailure { failures }) = answer.warnings.first() else {
        panic!("expected a partial failure warning, got {:?}", answer.warnings);
    };
    let failed: Vec<&str> = failures.iter().map(|f| f.adapter.as_str()).collect();
    assert_eq!(failed, vec!["keyword", "graph"]);
    assert!(failures[1].error.contains("timed out"));
    assert_eq!(answer.cited_chunk_ids()[0], "water:0");
}

/// Embeds queries slowly on the calling thread.
struct SlowEmbedder(Duration);

impl Embedder for SlowEmbedder {
    fn dim(&self) -> usize {
        8
    }
    fn max_len(&self) -> usize {
        usize::MAX
    }
    fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        std::thread::sleep(self.0);
        Ok(texts.iter().map(|_| vec![1.0; 8]).collect())
    }
}

/// Blocks its worker thread inside `retrieve` instead of awaiting.
struct BlockingAdapter(Duration);

#[async_trait]
impl ChunkStoreAdapter for BlockingAdapter {
    fn name(&self) -> &str {
        "graph"
    }

    async fn retrieve(&self, _query: &str, _top_k: usize, _filters: &Filters) -> Result<AdapterResponse, AdapterError> {
        std::thread::sleep(self.0);
        Ok(AdapterResponse::complete(vec![]))
    }
}

fn assert_timed_out(answer: &AnsweredQuery, adapter: &str) {
    let Some(Warning::PartialAdapterFailure { failures }) = answer.warnings.first() else {
        panic!("expected a partial failure warning, got {:?}", answer.warnings);
    };
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].adapter, adapter);
    assert!(failures[0].error.contains("timed out after 100ms"), "{}", failures[0].error);
}

#[tokio::test]
async fn slow_vector_embedding_hits_the_adapter_timeout() {
    let (chunks, keyword) = corpus();
    let vectors = MemoryVectorAdapter::new(Arc::new(SlowEmbedder(Duration::from_millis(600))));
    vectors
        .insert(chunks.iter().map(|c| c.as_ref().clone().with_embedding(vec![1.0; 8])).collect())
        .expect("insert");
    let engine = engine_with(
        ScriptedGenerator::ok(),
        config(),
        vec![Arc::new(vectors) as Arc<dyn ChunkStoreAdapter>, StubAdapter::new("keyword", keyword).arc()],
    );

    let started = Instant::now();
    let answer = engine.answer("purify water", &Filters::default(), 1_000).await.expect("answer");
    assert!(started.elapsed() < Duration::from_millis(500), "answer took {:?}", started.elapsed());
    assert_timed_out(&answer, "vector");
    assert_eq!(answer.cited_chunk_ids(), vec!["water:1"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn blocking_adapter_does_not_hold_up_the_others() {
    let (vector, keyword) = corpus();
    let engine = engine_with(
        ScriptedGenerator::ok(),
        config(),
        vec![
            StubAdapter::new("vector", vector).arc(),
            StubAdapter::new("keyword", keyword).arc(),
            Arc::new(BlockingAdapter(Duration::from_millis(600))) as Arc<dyn ChunkStoreAdapter>,
        ],
    );

    let started = Instant::now();
    let answer = engine.answer("purify water", &Filters::default(), 1_000).await.expect("answer");
    assert!(started.elapsed() < Duration::from_millis(500), "answer took {:?}", started.elapsed());
    assert_timed_out(&answer, "graph");
    assert_eq!(answer.cited_chunk_ids()[0], "water:1");
}

#[tokio::test]
async fn degraded_adapters_are_reported() {
    let (vector, keyword) = corpus();
    let engine = engine_with(
        ScriptedGenerator::ok(),
        config(),
        vec![StubAdapter::new("vector", vector).arc(), StubAdapter::new("keyword", keyword).degraded().arc()],
    );
    let answer = engine.answer("purify water", &Filters::default(), 1_000).await.expect("answer");
    assert!(!answer.is_partial());
    assert_eq!(answer.warnings, vec![Warning::DegradedAdapter { adapter: "keyword".into() }]);
}

#[tokio::test]
async fn generation_is_retried_once() {
    let generator = ScriptedGenerator::new(1, Duration::ZERO);
    let engine = default_engine(Arc::clone(&generator));
    engine.answer("purify water", &Filters::default(), 1_000).await.expect("answer");
    assert_eq!(generator.calls(), 2);

    let generator = ScriptedGenerator::new(2, Duration::ZERO);
    let engine = default_engine(Arc::clone(&generator));
    let err = engine.answer("purify water", &Filters::default(), 1_000).await.unwrap_err();
    assert_eq!(err, QueryError::GenerationFailed { attempts: 2, reason: "generation failed: attempt 2 failed".into() });
    assert_eq!(generator.calls(), 2);
}

#[tokio::test]
async fn slow_generation_times_out() {
    let mut cfg = config();
    cfg.generation.timeout_ms = 20;
    cfg.generation.retries = 0;
    let (vector, keyword) = corpus();
    let engine = engine_with(
        ScriptedGenerator::new(0, Duration::from_secs(5)),
        cfg,
        vec![StubAdapter::new("vector", vector).arc(), StubAdapter::new("keyword", keyword).arc()],
    );
    let err = engine.answer("purify water", &Filters::default(), 1_000).await.unwrap_err();
    assert!(matches!(&err, QueryError::GenerationFailed { attempts: 1, reason } if reason.contains("timed out")), "{err:?}");
}

#[tokio::test]
async fn oversized_top_chunk_is_budget_too_small() {
    let big = chunk("big:0", "acme", &"word ".repeat(500));
    let engine = engine_with(ScriptedGenerator::ok(), config(), vec![StubAdapter::new("vector", vec![big]).arc()]);
    let err = engine.answer("q", &Filters::default(), 100).await.unwrap_err();
    assert_eq!(err, QueryError::BudgetTooSmall { required: 501, budget: 100 });
}

#[tokio::test]
async fn reserved_and_query_tokens_come_off_the_budget() {
    let mut cfg = config();
    cfg.context.reserved_tokens = 50;
    let small = chunk("small:0", "acme", &"word ".repeat(40));
    let engine = engine_with(ScriptedGenerator::ok(), cfg, vec![StubAdapter::new("vector", vec![small]).arc()]);
    // 50 reserved + 2 query tokens + 40 chunk tokens
    let err = engine.answer("two words", &Filters::default(), 80).await.unwrap_err();
    assert_eq!(err, QueryError::BudgetTooSmall { required: 92, budget: 80 });
    assert!(engine.answer("two words", &Filters::default(), 92).await.is_ok());
}

#[tokio::test]
async fn post_filter_drops_chunks_outside_the_tenant() {
    let leaked = chunk("secret:0", "globex", "Globex vault codes. Never share.");
    let own = chunk("water:0", "acme", "Boil water for one minute.");
    let engine = engine_with(
        ScriptedGenerator::ok(),
        config(),
        vec![StubAdapter::new("vector", vec![leaked.clone(), own]).leaky().arc()],
    );
    let answer = engine.answer("codes", &Filters::for_tenant("acme"), 1_000).await.expect("answer");
    assert_eq!(answer.cited_chunk_ids(), vec!["water:0"]);
    assert!(!answer.answer.contains("Globex"));

    let only_leaks = engine_with(ScriptedGenerator::ok(), config(), vec![StubAdapter::new("vector", vec![leaked]).leaky().arc()]);
    let err = only_leaks.answer("codes", &Filters::for_tenant("acme"), 1_000).await.unwrap_err();
    assert!(matches!(err, QueryError::NoRelevantContext(_)));
}

#[tokio::test]
async fn blank_query_is_rejected() {
    let generator = ScriptedGenerator::ok();
    let engine = default_engine(Arc::clone(&generator));
    let err = engine.answer(" \n\t", &Filters::default(), 1_000).await.unwrap_err();
    assert!(matches!(err, QueryError::InvalidQuery(_)));
    assert_eq!(generator.calls(), 0);
}

#[tokio::test]
async fn corpus_version_bump_forces_recomputation() {
    let generator = ScriptedGenerator::ok();
    let corpus_version = Arc::new(CorpusVersion::new(1));
    let (vector, keyword) = corpus();
    let engine = QueryEngine::builder(generator.clone(), Arc::new(Words))
        .config(config())
        .corpus(corpus_version.clone())
        .adapter(StubAdapter::new("vector", vector).arc())
        .adapter(StubAdapter::new("keyword", keyword).arc())
        .build()
        .expect("engine");

    let before = engine.answer("purify water", &Filters::default(), 1_000).await.expect("answer");
    engine.answer("purify water", &Filters::default(), 1_000).await.expect("answer");
    assert_eq!(generator.calls(), 1);

    corpus_version.bump();
    let after = engine.answer("purify water", &Filters::default(), 1_000).await.expect("answer");
    assert_eq!(generator.calls(), 2);
    assert_eq!(after.corpus_version, 2);
    assert_ne!(before.fingerprint, after.fingerprint);
}

#[tokio::test]
async fn disabled_cache_gives_the_same_answer() {
    let mut cfg = config();
    cfg.cache.enabled = false;
    let (vector, keyword) = corpus();
    let generator = ScriptedGenerator::ok();
    let uncached = engine_with(
        Arc::clone(&generator),
        cfg,
        vec![StubAdapter::new("vector", vector).arc(), StubAdapter::new("keyword", keyword).arc()],
    );
    let cached = default_engine(ScriptedGenerator::ok());

    let a = uncached.answer("purify water", &Filters::default(), 1_000).await.expect("answer");
    let b = uncached.answer("purify water", &Filters::default(), 1_000).await.expect("answer");
    let c = cached.answer("purify water", &Filters::default(), 1_000).await.expect("answer");
    assert_eq!(generator.calls(), 2);
    assert_eq!(a.answer, b.answer);
    assert_eq!(a.answer, c.answer);
    assert_eq!(a.citations, c.citations);
}

#[test]
fn negative_weights_are_rejected_at_build_time() {
    let mut cfg = config();
    cfg.fusion.weights.insert("vector".into(), -0.5);
    assert!(QueryEngine::builder(ScriptedGenerator::ok(), Arc::new(Words)).config(cfg).build().is_err());
}
