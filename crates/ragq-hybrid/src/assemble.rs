use std::cmp::Reverse;

use tracing::debug;

use ragq_core::config::WindowOrder;
use ragq_core::error::AssembleError;
use ragq_core::types::{ContextWindow, FusedResult};

/// Greedy budget fill in fused order: a chunk that does not fit is skipped
/// and smaller ones further down may still be taken. `token_budget` covers
/// chunk text only; callers subtract prompt overhead first.
pub fn assemble(results: &[FusedResult], token_budget: usize, order: WindowOrder) -> Result<ContextWindow, AssembleError> {
    let Some(top) = results.first() else { return Ok(ContextWindow::empty(token_budget)) };
    if top.token_count() > token_budget {
        return Err(AssembleError::BudgetTooSmall { required: top.token_count(), budget: token_budget });
    }

    let mut window = ContextWindow::empty(token_budget);
    for result in results {
        if window.used_tokens == token_budget {
            break;
        }
        if window.used_tokens + result.token_count() <= token_budget {
            window.used_tokens += result.token_count();
            window.entries.push(result.clone());
        }
    }

    match order {
        WindowOrder::Relevance => {}
        WindowOrder::Document => window.entries.sort_by(|a, b| {
            (&a.chunk.document_id, a.chunk.source_location.start, &a.chunk.id)
                .cmp(&(&b.chunk.document_id, b.chunk.source_location.start, &b.chunk.id))
        }),
        // Stable sort keeps relevance order among equal timestamps; undated chunks go last.
        WindowOrder::Recency => window.entries.sort_by_key(|e| Reverse(e.chunk.created_at().unwrap_or(i64::MIN))),
    }

    debug!(
        candidates = results.len(),
        selected = window.len(),
        used = window.used_tokens,
        budget = token_budget,
        "context assembled"
    );
    Ok(window)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ragq_core::types::{Chunk, SourceLocation, META_CREATED_AT};
    use std::collections::BTreeSet;
    use std::sync::Arc;

    fn fused(id: &str, doc: &str, tokens: usize, score: f64) -> FusedResult {
        let chunk = Chunk {
            id: id.into(),
            document_id: doc.into(),
            text: format!("text of {id}"),
            token_count: tokens,
            source_location: SourceLocation::default(),
            embedding: None,
            metadata: Default::default(),
        };
        FusedResult { chunk: Arc::new(chunk), fused_score: score, sources: BTreeSet::new(), best_rank: 1, duplicates: vec![] }
    }

    fn ids(w: &ContextWindow) -> Vec<&str> {
        w.entries.iter().map(FusedResult::id).collect()
    }

    #[test]
    fn skips_chunks_that_do_not_fit() {
        let results = vec![fused("c1", "d", 80, 0.3), fused("c2", "d", 30, 0.2), fused("c3", "d", 15, 0.1)];
        let w = assemble(&results, 100, WindowOrder::Relevance).expect("assemble");
        assert_eq!(ids(&w), vec!["c1", "c3"]);
        assert_eq!(w.used_tokens, 95);
        assert_eq!(w.residual(), 5);
    }

    #[test]
    fn oversized_top_chunk_is_an_error() {
        let results = vec![fused("big", "d", 500, 0.3), fused("small", "d", 10, 0.2)];
        assert_eq!(
            assemble(&results, 100, WindowOrder::Relevance).unwrap_err(),
            AssembleError::BudgetTooSmall { required: 500, budget: 100 }
        );
    }

    #[test]
    fn empty_input_gives_empty_window() {
        let w = assemble(&[], 100, WindowOrder::Relevance).expect("assemble");
        assert!(w.is_empty());
        assert_eq!(w.residual(), 100);
    }

    #[test]
    fn stops_once_budget_is_exact() {
        let results = vec![fused("a", "d", 60, 0.3), fused("b", "d", 40, 0.2), fused("c", "d", 0, 0.1)];
        let w = assemble(&results, 100, WindowOrder::Relevance).expect("assemble");
        assert_eq!(ids(&w), vec!["a", "b"]);
        assert_eq!(w.residual(), 0);
    }

    #[test]
    fn document_and_recency_orders() {
        let mut a = fused("a", "doc2", 10, 0.3);
        let mut b = fused("b", "doc1", 10, 0.2);
        let c = fused("c", "doc1", 10, 0.1);
        Arc::make_mut(&mut a.chunk).metadata.insert(META_CREATED_AT.into(), "100".into());
        Arc::make_mut(&mut b.chunk).metadata.insert(META_CREATED_AT.into(), "200".into());
        Arc::make_mut(&mut b.chunk).source_location.start = 50;
        let results = vec![a, b, c];

        let w = assemble(&results, 100, WindowOrder::Document).expect("assemble");
        assert_eq!(ids(&w), vec!["c", "b", "a"]);
        let w = assemble(&results, 100, WindowOrder::Recency).expect("assemble");
        assert_eq!(ids(&w), vec!["b", "a", "c"]);
    }
}
