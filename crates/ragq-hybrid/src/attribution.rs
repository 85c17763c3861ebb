//! Maps generated text back to the context chunks it was drawn from.
use std::collections::{BTreeSet, HashMap};

use ragq_core::types::{Attribution, Citation, Claim, ContextWindow, Generation};

/// Byte spans of the sentences in `text`, trimmed of surrounding whitespace.
/// A sentence ends after `.`, `!` or `?` followed by whitespace or the end.
pub fn split_sentences(text: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut start = 0usize;
    let mut chars = text.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        let at_boundary = matches!(c, '.' | '!' | '?') && chars.peek().map_or(true, |(_, next)| next.is_whitespace());
        if at_boundary {
            push_trimmed(text, start, i + c.len_utf8(), &mut spans);
            start = i + c.len_utf8();
        }
    }
    push_trimmed(text, start, text.len(), &mut spans);
    spans
}

fn push_trimmed(text: &str, start: usize, end: usize, spans: &mut Vec<(usize, usize)>) {
    let slice = &text[start..end];
    let lead = slice.len() - slice.trim_start().len();
    let trimmed = slice.trim();
    if !trimmed.is_empty() {
        spans.push((start + lead, start + lead + trimmed.len()));
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attributed {
    pub citations: Vec<Citation>,
    pub claims: Vec<Claim>,
    pub mode: Attribution,
}

impl Attributed {
    /// Every claim cites at least one chunk.
    pub fn fully_cited(&self) -> bool {
        !self.claims.is_empty() && self.claims.iter().all(|c| !c.citations.is_empty())
    }
}

/// Native attribution when the generator reported spans that reference
/// window chunks: each sentence cites the chunks of the spans it overlaps,
/// and only cited chunks are listed. Otherwise every window citation is
/// attached to the answer as a whole.
pub fn attribute(generation: &Generation, window: &ContextWindow) -> Attributed {
    native(generation, window).unwrap_or_else(|| fallback(&generation.text, window))
}

fn native(generation: &Generation, window: &ContextWindow) -> Option<Attributed> {
    let spans = generation.spans.as_ref().filter(|s| !s.is_empty())?;
    let position: HashMap<&str, usize> = window.entries.iter().enumerate().map(|(i, e)| (e.id(), i)).collect();

    let sentences = split_sentences(&generation.text);
    let mut per_sentence: Vec<BTreeSet<usize>> = Vec::with_capacity(sentences.len());
    let mut cited: BTreeSet<usize> = BTreeSet::new();
    for &(start, end) in &sentences {
        let refs: BTreeSet<usize> = spans
            .iter()
            .filter(|s| s.start < end && start < s.end)
            .flat_map(|s| s.chunk_ids.iter())
            .filter_map(|id| position.get(id.as_str()).copied())
            .collect();
        cited.extend(refs.iter().copied());
        per_sentence.push(refs);
    }
    if cited.is_empty() {
        return None;
    }

    // Renumber window positions into the compacted citation list.
    let renumber: HashMap<usize, usize> = cited.iter().enumerate().map(|(n, &pos)| (pos, n)).collect();
    let citations = cited.iter().map(|&pos| Citation::from(window.entries[pos].chunk.as_ref())).collect();
    let claims = sentences
        .into_iter()
        .zip(per_sentence)
        .map(|((start, end), refs)| Claim {
            text: generation.text[start..end].to_string(),
            start,
            end,
            citations: refs.iter().map(|p| renumber[p]).collect(),
        })
        .collect();
    Some(Attributed { citations, claims, mode: Attribution::Native })
}

fn fallback(text: &str, window: &ContextWindow) -> Attributed {
    let citations = window.citations();
    let mut claims = Vec::new();
    let lead = text.len() - text.trim_start().len();
    let body = text.trim();
    if !body.is_empty() {
        claims.push(Claim { text: body.to_string(), start: lead, end: lead + body.len(), citations: (0..citations.len()).collect() });
    }
    Attributed { citations, claims, mode: Attribution::Fallback }
}
