//! One uncached answer: expand, retrieve concurrently, fuse, assemble,
//! generate, attribute.
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use tracing::{debug, info, warn};

use ragq_core::config::EngineConfig;
use ragq_core::error::{AdapterError, AssembleError, GenerationError, QueryError};
use ragq_core::traits::{ChunkStoreAdapter, Generator, QueryExpander, TokenCounter};
use ragq_core::types::{
    AdapterFailure, AnsweredQuery, Attribution, Confidence, ContextWindow, Filters, Generation, GenerationRequest,
    QueryFingerprint, ScoredChunk, Warning,
};

use crate::assemble::assemble;
use crate::attribution::{attribute, Attributed};
use crate::fusion::fuse;

/// Everything an answer needs besides the question itself.
pub struct QueryContext<'a> {
    pub query: &'a str,
    pub normalized: &'a str,
    pub filters: &'a Filters,
    pub token_budget: usize,
    pub corpus_version: u64,
    pub fingerprint: QueryFingerprint,
}

struct Retrieval {
    per_adapter: BTreeMap<String, Vec<ScoredChunk>>,
    failures: Vec<AdapterFailure>,
    degraded: Vec<String>,
}

pub struct Orchestrator {
    adapters: Vec<Arc<dyn ChunkStoreAdapter>>,
    generator: Arc<dyn Generator>,
    expander: Arc<dyn QueryExpander>,
    counter: Arc<dyn TokenCounter>,
    config: EngineConfig,
}

impl Orchestrator {
    pub fn new(
        adapters: Vec<Arc<dyn ChunkStoreAdapter>>,
        generator: Arc<dyn Generator>,
        expander: Arc<dyn QueryExpander>,
        counter: Arc<dyn TokenCounter>,
        config: EngineConfig,
    ) -> Self {
        Self { adapters, generator, expander, counter, config }
    }

    pub fn adapter_names(&self) -> Vec<&str> {
        self.adapters.iter().map(|a| a.name()).collect()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub async fn run(&self, ctx: QueryContext<'_>) -> Result<AnsweredQuery, QueryError> {
        let started = Instant::now();
        let expanded = self.expander.expand(ctx.normalized);
        if expanded != ctx.normalized {
            debug!(query = ctx.normalized, expanded = %expanded, "query expanded");
        }

        let Retrieval { mut per_adapter, failures, degraded } = self.retrieve(&expanded, ctx.filters).await?;

        if self.config.retrieval.post_filter {
            for (adapter, hits) in per_adapter.iter_mut() {
                let before = hits.len();
                hits.retain(|h| ctx.filters.matches(&h.chunk));
                let dropped = before - hits.len();
                if dropped > 0 {
                    warn!(adapter = %adapter, dropped, "post-filter removed out-of-scope chunks");
                }
            }
        }

        let fused = fuse(&per_adapter, &self.config.fusion);
        if fused.is_empty() {
            return Err(QueryError::NoRelevantContext("no chunks matched the query".into()));
        }

        let overhead = self.config.context.reserved_tokens + self.counter.count(ctx.query);
        let too_small = |required: usize| QueryError::BudgetTooSmall { required: required + overhead, budget: ctx.token_budget };
        let chunk_budget = match ctx.token_budget.checked_sub(overhead) {
            Some(b) if b > 0 => b,
            _ => return Err(too_small(fused[0].token_count())),
        };
        let window = assemble(&fused, chunk_budget, self.config.context.order)
            .map_err(|AssembleError::BudgetTooSmall { required, .. }| too_small(required))?;
        if window.is_empty() {
            return Err(QueryError::NoRelevantContext("context window is empty".into()));
        }

        let generation = self.generate(ctx.query, &window).await?;
        let attributed = attribute(&generation, &window);
        let confidence = confidence(&window, &attributed, !failures.is_empty() || !degraded.is_empty());

        let mut warnings = Vec::new();
        if !failures.is_empty() {
            warnings.push(Warning::PartialAdapterFailure { failures });
        }
        warnings.extend(degraded.into_iter().map(|adapter| Warning::DegradedAdapter { adapter }));

        info!(
            fingerprint = %ctx.fingerprint,
            chunks = window.len(),
            used_tokens = window.used_tokens,
            citations = attributed.citations.len(),
            attribution = ?attributed.mode,
            confidence = ?confidence,
            warnings = warnings.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "query answered"
        );

        Ok(AnsweredQuery {
            query: ctx.query.trim().to_string(),
            answer: generation.text,
            citations: attributed.citations,
            claims: attributed.claims,
            attribution: attributed.mode,
            confidence,
            warnings,
            corpus_version: ctx.corpus_version,
            fingerprint: ctx.fingerprint,
        })
    }

    async fn retrieve(&self, query: &str, filters: &Filters) -> Result<Retrieval, QueryError> {
        let timeout = self.config.retrieval.adapter_timeout();
        let top_k = self.config.retrieval.top_k;
        // One task per adapter; a task that outlives its timeout is aborted.
        let calls = self.adapters.iter().map(|adapter| {
            let name = adapter.name().to_string();
            let adapter = Arc::clone(adapter);
            let query = query.to_string();
            let filters = filters.clone();
            let started = Instant::now();
            let mut task = tokio::spawn(async move { adapter.retrieve(&query, top_k, &filters).await });
            async move {
                let outcome = match tokio::time::timeout(timeout, &mut task).await {
                    Ok(Ok(result)) => result,
                    Ok(Err(join)) => Err(AdapterError::unavailable(&name, join)),
                    Err(_) => {
                        task.abort();
                        Err(AdapterError::Timeout { adapter: name.clone(), after_ms: millis(timeout) })
                    }
                };
                (name, outcome, started.elapsed())
            }
        });

        let mut retrieval = Retrieval { per_adapter: BTreeMap::new(), failures: Vec::new(), degraded: Vec::new() };
        for (name, outcome, elapsed) in join_all(calls).await {
            match outcome {
                Ok(response) => {
                    debug!(
                        adapter = %name,
                        hits = response.hits.len(),
                        degraded = response.degraded,
                        elapsed_ms = millis(elapsed),
                        "adapter returned"
                    );
                    if response.degraded {
                        warn!(adapter = %name, "adapter returned a degraded result set");
                        retrieval.degraded.push(name.clone());
                    }
                    retrieval.per_adapter.insert(name, response.hits);
                }
                Err(e) => {
                    warn!(adapter = %name, error = %e, elapsed_ms = millis(elapsed), "adapter failed");
                    retrieval.failures.push(AdapterFailure { adapter: name, error: e.to_string() });
                }
            }
        }

        if retrieval.per_adapter.is_empty() {
            let reason = if self.adapters.is_empty() {
                "no adapters configured".to_string()
            } else {
                format!("all {} adapters failed", self.adapters.len())
            };
            return Err(QueryError::NoRelevantContext(reason));
        }
        Ok(retrieval)
    }

    async fn generate(&self, query: &str, window: &ContextWindow) -> Result<Generation, QueryError> {
        let request = GenerationRequest::from_window(query, window);
        let timeout = self.config.generation.timeout();
        let attempts = self.config.generation.retries + 1;
        let mut last_error = String::new();
        for attempt in 1..=attempts {
            let outcome = match tokio::time::timeout(timeout, self.generator.generate(&request)).await {
                Ok(result) => result,
                Err(_) => Err(GenerationError::Timeout { after_ms: millis(timeout) }),
            };
            match outcome {
                Ok(generation) => return Ok(generation),
                Err(e) => {
                    warn!(attempt, attempts, error = %e, "generation attempt failed");
                    last_error = e.to_string();
                }
            }
        }
        Err(QueryError::GenerationFailed { attempts, reason: last_error })
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// High: no adapter trouble, and either every window chunk was found by at
/// least two adapters or native attribution cites every claim. Low: adapter
/// trouble and no native attribution. Medium otherwise.
pub fn confidence(window: &ContextWindow, attributed: &Attributed, adapter_trouble: bool) -> Confidence {
    if adapter_trouble {
        return if attributed.mode == Attribution::Fallback { Confidence::Low } else { Confidence::Medium };
    }
    let corroborated = window.entries.iter().all(|e| e.sources.len() >= 2);
    let cited = attributed.mode == Attribution::Native && attributed.fully_cited();
    if corroborated || cited { Confidence::High } else { Confidence::Medium }
}
