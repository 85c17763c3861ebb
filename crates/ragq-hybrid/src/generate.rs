use async_trait::async_trait;

use ragq_core::error::GenerationError;
use ragq_core::traits::Generator;
use ragq_core::types::{Generation, GenerationRequest, SpanAttribution};

use crate::attribution::split_sentences;

/// Offline generator: answers with the leading sentence of the first
/// `max_passages` passages and attributes each sentence to its passage.
pub struct ExtractiveGenerator {
    max_passages: usize,
}

impl ExtractiveGenerator {
    pub fn new(max_passages: usize) -> Self {
        Self { max_passages: max_passages.max(1) }
    }
}

impl Default for ExtractiveGenerator {
    fn default() -> Self {
        Self::new(3)
    }
}

#[async_trait]
impl Generator for ExtractiveGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<Generation, GenerationError> {
        let mut text = String::new();
        let mut spans = Vec::new();
        for passage in request.passages.iter().take(self.max_passages) {
            let Some(&(start, end)) = split_sentences(&passage.text).first() else { continue };
            if !text.is_empty() {
                text.push(' ');
            }
            let at = text.len();
            text.push_str(&passage.text[start..end]);
            spans.push(SpanAttribution { start: at, end: text.len(), chunk_ids: vec![passage.citation_id.clone()] });
        }
        if text.is_empty() {
            return Err(GenerationError::Failed("no passage text to extract from".into()));
        }
        Ok(Generation { text, spans: Some(spans) })
    }
}
