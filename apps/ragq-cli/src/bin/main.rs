use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use ragq_core::config::{expand_path, Config, DataConfig};
use ragq_core::corpus::CorpusVersion;
use ragq_core::data_processor::{ChunkingConfig, DataProcessor};
use ragq_core::traits::{ChunkStoreAdapter, Embedder, TokenCounter};
use ragq_core::types::{Chunk, Filters};
use ragq_embed::{get_default_embedder, WordTokenCounter};
use ragq_graph::{EntityGraph, GraphAdapter, GraphConfig};
use ragq_hybrid::{ExtractiveGenerator, QueryEngine};
use ragq_text::{KeywordAdapter, KeywordIndex};
use ragq_vector::{LanceChunkWriter, LanceVectorAdapter};

const USAGE: &str = "Usage:
  ragq index [data_dir] [--limit N] [--tenant T]
  ragq ask \"<question>\" [--tenant T] [--type D]... [--budget N]";

const EMBED_BATCH: usize = 64;

#[derive(Debug, PartialEq)]
enum Command {
    Index { data_dir: Option<PathBuf>, limit: Option<usize>, tenant: Option<String> },
    Ask { question: String, filters: Filters, budget: usize },
}

fn parse_args(args: &[String]) -> Result<Command> {
    let Some((cmd, rest)) = args.split_first() else { bail!("{USAGE}") };
    let mut positional = Vec::new();
    let mut tenant = None;
    let mut doc_types = Vec::new();
    let mut limit = None;
    let mut budget = 2_000usize;
    let mut i = 0;
    while i < rest.len() {
        let flag = rest[i].as_str();
        if !flag.starts_with("--") {
            positional.push(rest[i].clone());
            i += 1;
            continue;
        }
        let value = rest.get(i + 1).with_context(|| format!("{flag} requires a value"))?;
        match flag {
            "--tenant" => tenant = Some(value.clone()),
            "--type" => doc_types.push(value.clone()),
            "--limit" => limit = Some(value.parse::<usize>().with_context(|| "--limit requires a number")?),
            "--budget" => budget = value.parse::<usize>().with_context(|| "--budget requires a number")?,
            _ => bail!("unknown flag {flag}\n{USAGE}"),
        }
        i += 2;
    }
    match cmd.as_str() {
        "index" => Ok(Command::Index { data_dir: positional.first().map(PathBuf::from), limit, tenant }),
        "ask" => {
            let question = positional.join(" ");
            if question.trim().is_empty() {
                bail!("ask needs a question\n{USAGE}");
            }
            let mut filters = Filters { tenant, ..Filters::default() };
            for t in doc_types {
                filters = filters.with_doc_type(t);
            }
            Ok(Command::Ask { question, filters, budget })
        }
        other => bail!("unknown command {other}\n{USAGE}"),
    }
}

fn corpus_version_path(data: &DataConfig) -> PathBuf {
    expand_path(&data.graph_path).with_file_name("corpus.version")
}

fn read_corpus_version(path: &Path) -> u64 {
    fs::read_to_string(path).ok().and_then(|s| s.trim().parse().ok()).unwrap_or(0)
}

fn embed_all(embedder: &dyn Embedder, chunks: Vec<Chunk>) -> Result<Vec<Chunk>> {
    let mut out = Vec::with_capacity(chunks.len());
    for batch in chunks.chunks(EMBED_BATCH) {
        let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
        let vectors = embedder.embed_batch(&texts)?;
        out.extend(batch.iter().cloned().zip(vectors).map(|(c, v)| c.with_embedding(v)));
    }
    Ok(out)
}

async fn index(config: &Config, data_dir: Option<PathBuf>, limit: Option<usize>, tenant: Option<String>) -> Result<()> {
    let data = config.data()?;
    let data_dir = data_dir.unwrap_or_else(|| expand_path(&data.raw_txt_dir));
    let tenant = tenant.or(data.tenant.clone());
    info!(dir = %data_dir.display(), tenant = ?tenant, "indexing");

    let counter: Arc<dyn TokenCounter> = Arc::new(WordTokenCounter);
    let processor = DataProcessor::new(counter)
        .with_chunking(ChunkingConfig { max_tokens: data.max_chunk_tokens, ..ChunkingConfig::default() })
        .with_tenant(tenant);
    let chunks = match limit {
        Some(n) => processor.process_directory_limited(&data_dir, n)?,
        None => processor.process_directory(&data_dir)?,
    };
    if chunks.is_empty() {
        warn!(dir = %data_dir.display(), "no .txt files found; nothing indexed");
        return Ok(());
    }

    let embedder = get_default_embedder()?;
    let chunks = tokio::task::block_in_place(|| embed_all(embedder.as_ref(), chunks))?;

    let tantivy_dir = expand_path(&data.tantivy_index_dir);
    let keyword = KeywordIndex::create_in_dir(tantivy_dir.clone())?;
    keyword.add_chunks(&chunks)?;
    info!(dir = %tantivy_dir.display(), docs = keyword.num_docs(), "keyword index written");

    let lancedb_dir = expand_path(&data.lancedb_dir);
    if lancedb_dir.exists() {
        fs::remove_dir_all(&lancedb_dir)?;
    }
    fs::create_dir_all(&lancedb_dir)?;
    let writer = LanceChunkWriter::new(&lancedb_dir.to_string_lossy(), &data.table, embedder.dim()).await?;
    writer.write(&chunks).await?;

    let mut graph = EntityGraph::new();
    for c in &chunks {
        graph.ingest(c.clone());
    }
    graph.save(&expand_path(&data.graph_path))?;

    let version_path = corpus_version_path(&data);
    let version = CorpusVersion::new(read_corpus_version(&version_path));
    let next = version.bump();
    fs::write(&version_path, next.to_string()).with_context(|| format!("writing {}", version_path.display()))?;
    info!(chunks = chunks.len(), entities = graph.entity_count(), corpus_version = next, "indexing complete");
    Ok(())
}

/// A missing or unreadable store leaves its adapter out of the engine.
fn keyword_adapter(dir: &Path) -> Option<Arc<dyn ChunkStoreAdapter>> {
    match KeywordIndex::open_in_dir(dir.to_path_buf()) {
        Ok(index) => Some(Arc::new(KeywordAdapter::new(Arc::new(index)))),
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "keyword index unavailable; continuing without it");
            None
        }
    }
}

fn graph_adapter(path: &Path, config: GraphConfig) -> Option<Arc<dyn ChunkStoreAdapter>> {
    match EntityGraph::load(path) {
        Ok(graph) => Some(Arc::new(GraphAdapter::new(Arc::new(graph)).with_config(config))),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "entity graph unavailable; continuing without it");
            None
        }
    }
}

async fn ask(config: &Config, question: &str, filters: &Filters, budget: usize) -> Result<()> {
    let data = config.data()?;
    let engine_config = config.engine()?;
    let graph_config: GraphConfig = config.get_or_default("graph")?;

    let embedder: Arc<dyn Embedder> = Arc::from(get_default_embedder()?);
    let vector = LanceVectorAdapter::new(&expand_path(&data.lancedb_dir).to_string_lossy(), &data.table, embedder).await?;
    let mut adapters: Vec<Arc<dyn ChunkStoreAdapter>> = Vec::new();
    adapters.push(Arc::new(vector));
    adapters.extend(keyword_adapter(&expand_path(&data.tantivy_index_dir)));
    adapters.extend(graph_adapter(&expand_path(&data.graph_path), graph_config));

    let corpus = Arc::new(CorpusVersion::new(read_corpus_version(&corpus_version_path(&data))));
    let mut builder = QueryEngine::builder(Arc::new(ExtractiveGenerator::default()), Arc::new(WordTokenCounter))
        .config(engine_config)
        .corpus(corpus);
    for adapter in adapters {
        builder = builder.adapter(adapter);
    }
    let engine = builder.build()?;

    let answer = engine.answer(question, filters, budget).await?;
    println!("{}", serde_json::to_string_pretty(answer.as_ref())?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = env::args().skip(1).collect();
    let command = parse_args(&args)?;
    let config = Config::load().map_err(|e| {
        eprintln!("Error loading config: {e}");
        e
    })?;
    match command {
        Command::Index { data_dir, limit, tenant } => index(&config, data_dir, limit, tenant).await,
        Command::Ask { question, filters, budget } => ask(&config, &question, &filters, budget).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(s: &[&str]) -> Vec<String> {
        s.iter().map(|a| a.to_string()).collect()
    }

    #[test]
    fn parses_ask_with_filters() {
        let argv = args(&["ask", "how", "to", "boil", "--tenant", "acme", "--type", "faq", "--type", "manual", "--budget", "500"]);
        let cmd = parse_args(&argv).unwrap();
        let expected = Filters::for_tenant("acme").with_doc_type("faq").with_doc_type("manual");
        assert_eq!(cmd, Command::Ask { question: "how to boil".into(), filters: expected, budget: 500 });
    }

    #[test]
    fn parses_index_defaults() {
        assert_eq!(parse_args(&args(&["index"])).unwrap(), Command::Index { data_dir: None, limit: None, tenant: None });
        assert_eq!(
            parse_args(&args(&["index", "./txt", "--limit", "3"])).unwrap(),
            Command::Index { data_dir: Some(PathBuf::from("./txt")), limit: Some(3), tenant: None }
        );
    }

    #[test]
    fn missing_stores_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        assert!(keyword_adapter(&dir.path().join("no-index")).is_none());
        assert!(graph_adapter(&dir.path().join("graph.json"), GraphConfig::default()).is_none());
    }

    #[test]
    fn existing_stores_become_adapters() {
        let dir = tempfile::tempdir().unwrap();
        let index_dir = dir.path().join("tantivy");
        KeywordIndex::create_in_dir(index_dir.clone()).unwrap();
        let keyword = keyword_adapter(&index_dir).unwrap();
        assert_eq!(keyword.name(), "keyword");

        let graph_path = dir.path().join("graph.json");
        EntityGraph::new().save(&graph_path).unwrap();
        assert_eq!(graph_adapter(&graph_path, GraphConfig::default()).unwrap().name(), "graph");
    }

    #[test]
    fn rejects_bad_input() {
        assert!(parse_args(&[]).is_err());
        assert!(parse_args(&args(&["ask"])).is_err());
        assert!(parse_args(&args(&["ask", "q", "--budget"])).is_err());
        assert!(parse_args(&args(&["ask", "q", "--budget", "lots"])).is_err());
        assert!(parse_args(&args(&["serve"])).is_err());
        assert!(parse_args(&args(&["ask", "q", "--verbose"])).is_err());
    }
}
