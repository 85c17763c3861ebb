use std::sync::Arc;

use tracing::debug;

use ragq_core::config::EngineConfig;
use ragq_core::corpus::CorpusVersion;
use ragq_core::error::{QueryError, Result};
use ragq_core::traits::{ChunkStoreAdapter, CorpusVersionSource, Generator, QueryExpander, TokenCounter};
use ragq_core::types::{AnsweredQuery, Filters, QueryFingerprint};

use crate::cache::AnswerCache;
use crate::expand::{normalize_query, NoExpansion, SynonymExpander};
use crate::orchestrator::{Orchestrator, QueryContext};

/// Public entry point: the orchestrator behind the answer cache.
pub struct QueryEngine {
    orchestrator: Orchestrator,
    cache: AnswerCache,
    corpus: Arc<dyn CorpusVersionSource>,
    config_version: String,
}

pub struct QueryEngineBuilder {
    adapters: Vec<Arc<dyn ChunkStoreAdapter>>,
    generator: Arc<dyn Generator>,
    counter: Arc<dyn TokenCounter>,
    expander: Option<Arc<dyn QueryExpander>>,
    corpus: Option<Arc<dyn CorpusVersionSource>>,
    config: EngineConfig,
}

impl QueryEngineBuilder {
    pub fn adapter(mut self, adapter: Arc<dyn ChunkStoreAdapter>) -> Self {
        self.adapters.push(adapter);
        self
    }

    pub fn expander(mut self, expander: Arc<dyn QueryExpander>) -> Self {
        self.expander = Some(expander);
        self
    }

    pub fn corpus(mut self, corpus: Arc<dyn CorpusVersionSource>) -> Self {
        self.corpus = Some(corpus);
        self
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Result<QueryEngine> {
        self.config.validate()?;
        let expander: Arc<dyn QueryExpander> = match self.expander {
            Some(expander) => expander,
            None if self.config.expansion.enabled => Arc::new(SynonymExpander::from_config(&self.config.expansion)),
            None => Arc::new(NoExpansion),
        };
        let corpus: Arc<dyn CorpusVersionSource> = match self.corpus {
            Some(corpus) => corpus,
            None => Arc::new(CorpusVersion::new(0)),
        };

        let mut names: Vec<&str> = self.adapters.iter().map(|a| a.name()).collect();
        names.sort_unstable();
        let config_version = blake3::hash(format!("{}|{}", self.config.version(), names.join(",")).as_bytes()).to_hex()[..16].to_string();

        let cache = AnswerCache::new(&self.config.cache);
        let orchestrator = Orchestrator::new(self.adapters, self.generator, expander, self.counter, self.config);
        debug!(
            adapters = ?orchestrator.adapter_names(),
            config_version = %config_version,
            cache = cache.is_enabled(),
            "query engine ready"
        );
        Ok(QueryEngine { orchestrator, cache, corpus, config_version })
    }
}

impl QueryEngine {
    pub fn builder(generator: Arc<dyn Generator>, counter: Arc<dyn TokenCounter>) -> QueryEngineBuilder {
        QueryEngineBuilder { adapters: Vec::new(), generator, counter, expander: None, corpus: None, config: EngineConfig::default() }
    }

    pub fn cache(&self) -> &AnswerCache {
        &self.cache
    }

    pub fn config(&self) -> &EngineConfig {
        self.orchestrator.config()
    }

    /// Identifies the adapter set and every answer-shaping setting.
    pub fn config_version(&self) -> &str {
        &self.config_version
    }

    pub fn fingerprint(&self, query: &str, filters: &Filters, token_budget: usize) -> QueryFingerprint {
        QueryFingerprint::compute(&normalize_query(query), filters, token_budget, &self.config_version, self.corpus.corpus_version())
    }

    pub async fn answer(&self, query: &str, filters: &Filters, token_budget: usize) -> std::result::Result<Arc<AnsweredQuery>, QueryError> {
        let normalized = normalize_query(query);
        if normalized.is_empty() {
            return Err(QueryError::InvalidQuery("query is empty".into()));
        }
        let corpus_version = self.corpus.corpus_version();
        self.cache.observe_corpus_version(corpus_version);
        let fingerprint = QueryFingerprint::compute(&normalized, filters, token_budget, &self.config_version, corpus_version);

        let ctx = QueryContext { query, normalized: &normalized, filters, token_budget, corpus_version, fingerprint: fingerprint.clone() };
        self.cache.get_or_compute(fingerprint, self.orchestrator.run(ctx)).await
    }
}
