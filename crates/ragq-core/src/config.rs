//! Lightweight configuration loader, typed engine settings and path helpers.
//!
//! Uses Figment to merge `config.toml` + `config.<env>.toml` + `APP_*` env vars
//! (`APP_ENGINE__FUSION__RRF_K=30` overrides `engine.fusion.rrf_k`).
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

pub struct Config {
    figment: Figment,
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let env_name = env::var("RUST_ENV").unwrap_or_else(|_| "dev".to_string());

        let mut figment = Figment::new().merge(Toml::file("config.toml"));
        match env_name.as_str() {
            "dev" | "development" => figment = figment.merge(Toml::file("config.dev.toml")),
            "prod" | "production" => figment = figment.merge(Toml::file("config.prod.toml")),
            "test" | "testing" => figment = figment.merge(Toml::file("config.test.toml")),
            _ => {}
        }
        figment = figment.merge(Env::prefixed("APP_").split("__"));

        let config = Self { figment };
        config.validate_for_env(&env_name)?;
        Ok(config)
    }

    /// Build from an in-memory TOML document; used by tests and embedders of
    /// the engine that manage their own configuration files.
    pub fn from_toml_str(toml: &str) -> Self {
        Self { figment: Figment::new().merge(Toml::string(toml)) }
    }

    pub fn get<T>(&self, key: &str) -> anyhow::Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        self.figment
            .extract_inner(key)
            .map_err(|e| anyhow::anyhow!("Failed to get '{}': {}", key, e))
    }

    /// Like [`Config::get`] but falls back to `T::default()` when the key is absent.
    pub fn get_or_default<T>(&self, key: &str) -> anyhow::Result<T>
    where
        T: serde::de::DeserializeOwned + Default,
    {
        if self.figment.find_value(key).is_err() {
            return Ok(T::default());
        }
        self.get(key)
    }

    pub fn engine(&self) -> anyhow::Result<EngineConfig> {
        let engine: EngineConfig = self.get_or_default("engine")?;
        engine.validate()?;
        Ok(engine)
    }

    pub fn data(&self) -> anyhow::Result<DataConfig> {
        self.get_or_default("data")
    }

    fn validate_for_env(&self, env: &str) -> anyhow::Result<()> {
        match env {
            "prod" | "production" => {
                // Production must not silently run on the hashing embedder.
                let fake: bool = self.get_or_default("use_fake_embeddings")?;
                if fake {
                    anyhow::bail!("fake embeddings are not allowed in production");
                }
            }
            _ => {}
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Candidates requested from each adapter.
    pub top_k: usize,
    pub adapter_timeout_ms: u64,
    /// Re-check every hit against the request filters after retrieval.
    pub post_filter: bool,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self { top_k: 20, adapter_timeout_ms: 2_000, post_filter: true }
    }
}

impl RetrievalConfig {
    pub fn adapter_timeout(&self) -> Duration {
        Duration::from_millis(self.adapter_timeout_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DedupMethod {
    /// blake3 of whitespace-collapsed, lowercased text.
    ContentHash,
    /// Cosine similarity of embeddings at or above `embedding_threshold`.
    Embedding,
    Both,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    /// RRF smoothing constant.
    pub rrf_k: f64,
    /// Per-adapter weights; adapters not listed weigh 1.0.
    pub weights: BTreeMap<String, f64>,
    pub dedup: DedupMethod,
    pub embedding_threshold: f32,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self { rrf_k: 60.0, weights: BTreeMap::new(), dedup: DedupMethod::Both, embedding_threshold: 0.97 }
    }
}

impl FusionConfig {
    pub fn weight(&self, adapter: &str) -> f64 {
        self.weights.get(adapter).copied().unwrap_or(1.0)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowOrder {
    /// Fused score descending.
    #[default]
    Relevance,
    /// Grouped by document, then by position inside the document.
    Document,
    /// Newest `created_at` first.
    Recency,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    /// Tokens held back for system instructions around the context.
    pub reserved_tokens: usize,
    pub order: WindowOrder,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self { reserved_tokens: 256, order: WindowOrder::Relevance }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub timeout_ms: u64,
    /// Extra attempts after the first failure.
    pub retries: u32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self { timeout_ms: 30_000, retries: 1 }
    }
}

impl GenerationConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub ttl_secs: u64,
    pub max_entries: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { enabled: true, ttl_secs: 600, max_entries: 10_000 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExpansionConfig {
    pub enabled: bool,
    /// Lowercase term -> related terms appended to the query.
    pub synonyms: BTreeMap<String, Vec<String>>,
    pub max_terms: usize,
}

impl Default for ExpansionConfig {
    fn default() -> Self {
        let mut synonyms = BTreeMap::new();
        for (term, related) in [
            ("rag", &["retrieval", "augmented", "generation"][..]),
            ("llm", &["language", "model"]),
            ("db", &["database"]),
            ("auth", &["authentication", "authorization"]),
            ("kg", &["knowledge", "graph"]),
            ("ocr", &["optical", "character", "recognition"]),
            ("faq", &["frequently", "asked", "questions"]),
        ] {
            synonyms.insert(term.to_string(), related.iter().map(|s| s.to_string()).collect());
        }
        Self { enabled: true, synonyms, max_terms: 5 }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub retrieval: RetrievalConfig,
    pub fusion: FusionConfig,
    pub context: ContextConfig,
    pub generation: GenerationConfig,
    pub cache: CacheConfig,
    pub expansion: ExpansionConfig,
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.retrieval.top_k == 0 {
            return Err(Error::InvalidConfig("retrieval.top_k must be > 0".into()));
        }
        if self.retrieval.adapter_timeout_ms == 0 {
            return Err(Error::InvalidConfig("retrieval.adapter_timeout_ms must be > 0".into()));
        }
        if !(self.fusion.rrf_k.is_finite() && self.fusion.rrf_k > 0.0) {
            return Err(Error::InvalidConfig(format!("fusion.rrf_k must be a positive number, got {}", self.fusion.rrf_k)));
        }
        if let Some((name, w)) = self.fusion.weights.iter().find(|(_, w)| !(w.is_finite() && **w >= 0.0)) {
            return Err(Error::InvalidConfig(format!("fusion.weights.{name} must be >= 0, got {w}")));
        }
        if !(self.fusion.embedding_threshold > 0.0 && self.fusion.embedding_threshold <= 1.0) {
            return Err(Error::InvalidConfig(format!(
                "fusion.embedding_threshold must be in (0, 1], got {}",
                self.fusion.embedding_threshold
            )));
        }
        if self.generation.timeout_ms == 0 {
            return Err(Error::InvalidConfig("generation.timeout_ms must be > 0".into()));
        }
        if self.cache.enabled && self.cache.ttl_secs == 0 {
            return Err(Error::InvalidConfig("cache.ttl_secs must be > 0 when the cache is enabled".into()));
        }
        Ok(())
    }

    /// Version string of everything that shapes an answer. Cache settings are
    /// excluded: the cache never changes results.
    pub fn version(&self) -> String {
        let shaped = (&self.retrieval, &self.fusion, &self.context, &self.generation, &self.expansion);
        let bytes = serde_json::to_vec(&shaped).unwrap_or_default();
        blake3::hash(&bytes).to_hex()[..16].to_string()
    }
}

/// Locations used by the CLI when indexing and querying on-disk stores.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    pub raw_txt_dir: String,
    pub tantivy_index_dir: String,
    pub lancedb_dir: String,
    pub table: String,
    /// JSON snapshot of the entity graph.
    pub graph_path: String,
    pub tenant: Option<String>,
    pub max_chunk_tokens: usize,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            raw_txt_dir: "./data/txt".into(),
            tantivy_index_dir: "./data/indexes/tantivy".into(),
            lancedb_dir: "./data/indexes/lancedb".into(),
            table: "chunks".into(),
            graph_path: "./data/indexes/graph.json".into(),
            tenant: None,
            max_chunk_tokens: 400,
        }
    }
}

/// Expand a user-provided path string:
/// - Expands leading '~' to the user's home directory
/// - Expands ${VAR} and $VAR environment variables
/// - Returns a PathBuf without attempting to canonicalize
pub fn expand_path<S: AsRef<str>>(input: S) -> PathBuf {
    let s = input.as_ref();
    let expanded_env = shellexpand::env(s).unwrap_or(std::borrow::Cow::Borrowed(s));
    let expanded = shellexpand::tilde(&expanded_env);
    PathBuf::from(expanded.as_ref())
}

/// Resolve a possibly relative path against a given base directory after expansion.
/// If `p` is absolute, it's returned as-is; otherwise `base.join(p)` is returned.
pub fn resolve_with_base<S: AsRef<str>>(base: &Path, p: S) -> PathBuf {
    let p = expand_path(p);
    if p.is_absolute() { p } else { base.join(p) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_engine_section_uses_defaults() {
        let cfg = Config::from_toml_str("");
        let engine = cfg.engine().expect("engine");
        assert_eq!(engine.retrieval.top_k, 20);
        assert!((engine.fusion.rrf_k - 60.0).abs() < f64::EPSILON);
        assert_eq!(engine.context.order, WindowOrder::Relevance);
        assert_eq!(engine.generation.retries, 1);
    }

    #[test]
    fn partial_sections_merge_with_defaults() {
        let cfg = Config::from_toml_str(
            r#"
            [engine.fusion]
            rrf_k = 30.0
            dedup = "content_hash"
            [engine.fusion.weights]
            vector = 2.0
            [engine.context]
            order = "recency"
            "#,
        );
        let engine = cfg.engine().expect("engine");
        assert!((engine.fusion.rrf_k - 30.0).abs() < f64::EPSILON);
        assert_eq!(engine.fusion.dedup, DedupMethod::ContentHash);
        assert!((engine.fusion.weight("vector") - 2.0).abs() < f64::EPSILON);
        assert!((engine.fusion.weight("keyword") - 1.0).abs() < f64::EPSILON);
        assert_eq!(engine.context.order, WindowOrder::Recency);
        assert_eq!(engine.retrieval.top_k, 20);
    }

    #[test]
    fn negative_weight_is_rejected() {
        let cfg = Config::from_toml_str("[engine.fusion.weights]\ngraph = -1.0\n");
        assert!(cfg.engine().is_err());
    }

    #[test]
    fn version_ignores_cache_settings() {
        let a = EngineConfig::default();
        let mut b = EngineConfig::default();
        b.cache.ttl_secs = 5;
        assert_eq!(a.version(), b.version());
        b.fusion.rrf_k = 10.0;
        assert_ne!(a.version(), b.version());
    }

    #[test]
    fn relative_paths_resolve_against_base() {
        let base = Path::new("/srv/ragq");
        assert_eq!(resolve_with_base(base, "indexes"), PathBuf::from("/srv/ragq/indexes"));
        assert_eq!(resolve_with_base(base, "/abs"), PathBuf::from("/abs"));
    }
}
