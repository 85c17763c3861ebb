//! Weighted reciprocal-rank fusion across adapters.
//!
//! Each adapter contributes `weight / (k + rank)` to every chunk it returned,
//! with ranks counted after dropping repeated ids inside that adapter's list.
//! Raw adapter scores are never compared.
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use tracing::debug;

use ragq_core::config::{DedupMethod, FusionConfig};
use ragq_core::types::{cosine_similarity, Chunk, FusedResult, ScoredChunk};

/// blake3 of the lowercased, whitespace-collapsed chunk text.
pub fn content_hash(text: &str) -> blake3::Hash {
    let normalized = text.split_whitespace().map(str::to_lowercase).collect::<Vec<_>>().join(" ");
    blake3::hash(normalized.as_bytes())
}

/// Final ordering: fused score desc, best rank asc, id asc.
pub fn fused_order(a: &FusedResult, b: &FusedResult) -> Ordering {
    b.fused_score
        .total_cmp(&a.fused_score)
        .then_with(|| a.best_rank.cmp(&b.best_rank))
        .then_with(|| a.chunk.id.cmp(&b.chunk.id))
}

pub fn fuse(per_adapter: &BTreeMap<String, Vec<ScoredChunk>>, config: &FusionConfig) -> Vec<FusedResult> {
    let mut by_id: BTreeMap<&str, FusedResult> = BTreeMap::new();

    for (adapter, hits) in per_adapter {
        let weight = config.weight(adapter);
        let mut seen = BTreeSet::new();
        let mut rank = 0usize;
        for hit in hits {
            if !seen.insert(hit.chunk.id.as_str()) {
                continue;
            }
            rank += 1;
            let contribution = weight / (config.rrf_k + rank as f64);
            let entry = by_id.entry(hit.chunk.id.as_str()).or_insert_with(|| FusedResult {
                chunk: Arc::clone(&hit.chunk),
                fused_score: 0.0,
                sources: BTreeSet::new(),
                best_rank: rank,
                duplicates: Vec::new(),
            });
            entry.fused_score += contribution;
            entry.sources.insert(adapter.clone());
            entry.best_rank = entry.best_rank.min(rank);
            // Adapters may materialize the same chunk differently; keep the
            // copy that carries an embedding for near-duplicate checks.
            if entry.chunk.embedding.is_none() && hit.chunk.embedding.is_some() {
                entry.chunk = Arc::clone(&hit.chunk);
            }
        }
    }

    let mut ranked: Vec<FusedResult> = by_id.into_values().collect();
    ranked.sort_by(fused_order);
    let unique = ranked.len();
    let fused = merge_near_duplicates(ranked, config);
    debug!(
        adapters = per_adapter.len(),
        candidates = per_adapter.values().map(Vec::len).sum::<usize>(),
        unique,
        fused = fused.len(),
        "fusion complete"
    );
    fused
}

/// Fold near-duplicates into the best-ranked member of their group. Input
/// must already be in [`fused_order`], so the survivor is always the one
/// with the higher fused score.
fn merge_near_duplicates(ranked: Vec<FusedResult>, config: &FusionConfig) -> Vec<FusedResult> {
    let by_hash = matches!(config.dedup, DedupMethod::ContentHash | DedupMethod::Both);
    let by_embedding = matches!(config.dedup, DedupMethod::Embedding | DedupMethod::Both);

    let mut kept: Vec<FusedResult> = Vec::with_capacity(ranked.len());
    let mut hashes: HashMap<blake3::Hash, usize> = HashMap::new();

    for candidate in ranked {
        let hash = by_hash.then(|| content_hash(&candidate.chunk.text));
        let survivor = hash
            .and_then(|h| hashes.get(&h).copied())
            .or_else(|| if by_embedding { embedding_match(&kept, &candidate.chunk, config.embedding_threshold) } else { None });
        match survivor {
            Some(i) => {
                let target = &mut kept[i];
                target.duplicates.push(candidate.chunk.id.clone());
                target.duplicates.extend(candidate.duplicates);
            }
            None => {
                if let Some(h) = hash {
                    hashes.insert(h, kept.len());
                }
                kept.push(candidate);
            }
        }
    }
    kept
}

fn embedding_match(kept: &[FusedResult], chunk: &Chunk, threshold: f32) -> Option<usize> {
    let embedding = chunk.embedding.as_deref()?;
    kept.iter().position(|k| {
        k.chunk
            .embedding
            .as_deref()
            .is_some_and(|other| cosine_similarity(embedding, other) >= threshold)
    })
}
