//! Turns a directory of `.txt` files into token-bounded [`Chunk`]s.
//!
//! Paragraphs (blank-line separated) become chunks; paragraphs over the
//! token limit are split into overlapping word windows. Byte offsets into
//! the file are kept as the chunk's source location.
use anyhow::Result;
use chrono::{DateTime, Utc};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use crate::traits::TokenCounter;
use crate::types::{Chunk, SourceLocation, META_CREATED_AT, META_DOC_TYPE, META_TENANT};

#[derive(Debug, Clone)]
pub struct ChunkingConfig {
    pub max_tokens: usize,
    pub overlap_percent: f32,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self { max_tokens: 500, overlap_percent: 0.2 }
    }
}

pub struct DataProcessor {
    chunking_config: ChunkingConfig,
    counter: Arc<dyn TokenCounter>,
    tenant: Option<String>,
}

impl DataProcessor {
    pub fn new(counter: Arc<dyn TokenCounter>) -> Self {
        Self { chunking_config: ChunkingConfig::default(), counter, tenant: None }
    }

    pub fn with_chunking(mut self, chunking_config: ChunkingConfig) -> Self {
        self.chunking_config = chunking_config;
        self
    }

    /// Stamp every produced chunk with this tenant.
    pub fn with_tenant(mut self, tenant: Option<String>) -> Self {
        self.tenant = tenant;
        self
    }

    pub fn process_directory(&self, data_dir: &Path) -> Result<Vec<Chunk>> {
        self.process_files(data_dir, self.list_txt_files(data_dir))
    }

    pub fn process_directory_limited(&self, data_dir: &Path, limit: usize) -> Result<Vec<Chunk>> {
        let mut files = self.list_txt_files(data_dir);
        if files.len() > limit {
            files.truncate(limit);
            info!(limit, "limited to first files");
        }
        self.process_files(data_dir, files)
    }

    fn process_files(&self, data_dir: &Path, files: Vec<PathBuf>) -> Result<Vec<Chunk>> {
        if files.is_empty() {
            info!(dir = %data_dir.display(), "no .txt files found");
            return Ok(vec![]);
        }
        let mut all_chunks = Vec::new();
        for (file_index, file_path) in files.iter().enumerate() {
            debug!(file = %file_path.display(), n = file_index + 1, total = files.len(), "processing file");
            let content = self.read_file_content(file_path)?;
            let doc_id = self.extract_doc_id(file_path, data_dir);
            let doc_type = self.get_facet_from_path(file_path, data_dir);
            let created_at = self.modified_at(file_path);
            let chunks = self.chunk_content(&content, &doc_id, &doc_type, created_at);
            all_chunks.extend(chunks);
        }
        info!(files = files.len(), chunks = all_chunks.len(), "processed directory");
        Ok(all_chunks)
    }

    fn read_file_content(&self, file_path: &Path) -> crate::error::Result<String> {
        match fs::read_to_string(file_path) {
            Ok(content) => Ok(content),
            Err(_) => Ok(String::from_utf8_lossy(&fs::read(file_path)?).to_string()),
        }
    }

    /// Relative path without extension, `/`-separated, so ids stay unique
    /// across folders.
    fn extract_doc_id(&self, file_path: &Path, data_dir: &Path) -> String {
        let relative = file_path.strip_prefix(data_dir).unwrap_or(file_path).with_extension("");
        relative.components().map(|c| c.as_os_str().to_string_lossy().to_string()).collect::<Vec<_>>().join("/")
    }

    fn get_facet_from_path(&self, file_path: &Path, data_dir: &Path) -> String {
        let relative_path = file_path.strip_prefix(data_dir).unwrap_or(file_path);
        match relative_path.parent().and_then(|p| p.to_str()) {
            Some(facet) if !facet.is_empty() => facet.to_string(),
            _ => "misc".to_string(),
        }
    }

    fn modified_at(&self, file_path: &Path) -> Option<i64> {
        let modified = fs::metadata(file_path).and_then(|m| m.modified()).ok()?;
        Some(DateTime::<Utc>::from(modified).timestamp())
    }

    fn chunk_content(&self, content: &str, doc_id: &str, doc_type: &str, created_at: Option<i64>) -> Vec<Chunk> {
        let mut pieces: Vec<(usize, usize)> = Vec::new();
        for (start, end) in paragraph_spans(content) {
            let paragraph = &content[start..end];
            if self.counter.count(paragraph) <= self.chunking_config.max_tokens {
                pieces.push((start, end));
            } else {
                pieces.extend(self.split_paragraph_with_overlap(paragraph).into_iter().map(|(s, e)| (start + s, start + e)));
            }
        }
        pieces
            .into_iter()
            .enumerate()
            .map(|(chunk_index, (start, end))| {
                let mut chunk = Chunk::new(format!("{}:{}", doc_id, chunk_index), doc_id, &content[start..end], self.counter.as_ref())
                    .with_location(SourceLocation { page: None, start, end })
                    .with_meta(META_DOC_TYPE, doc_type);
                if let Some(tenant) = &self.tenant {
                    chunk = chunk.with_meta(META_TENANT, tenant.clone());
                }
                if let Some(ts) = created_at {
                    chunk = chunk.with_meta(META_CREATED_AT, ts.to_string());
                }
                chunk
            })
            .collect()
    }

    /// Word windows over a paragraph, as byte spans relative to it.
    fn split_paragraph_with_overlap(&self, paragraph: &str) -> Vec<(usize, usize)> {
        let words = word_spans(paragraph);
        let words_per_chunk = ((self.chunking_config.max_tokens as f32 * 0.75) as usize).max(1);
        let overlap_words = ((words_per_chunk as f32 * self.chunking_config.overlap_percent) as usize).min(words_per_chunk - 1);
        let mut spans = Vec::new();
        let mut start = 0;
        while start < words.len() {
            let end = (start + words_per_chunk).min(words.len());
            spans.push((words[start].0, words[end - 1].1));
            if end >= words.len() {
                break;
            }
            start = end - overlap_words;
        }
        spans
    }

    fn list_txt_files(&self, root: &Path) -> Vec<PathBuf> {
        let mut txt_files = Vec::new();
        for entry in walkdir::WalkDir::new(root).into_iter().filter_map(|e| e.ok()).filter(|e| e.file_type().is_file()) {
            let path = entry.path();
            if path.extension().and_then(|s| s.to_str()) == Some("txt") {
                txt_files.push(path.to_path_buf());
            }
        }
        txt_files.sort();
        txt_files
    }
}

/// Trimmed, non-empty paragraph spans separated by blank lines.
fn paragraph_spans(content: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut offset = 0;
    for raw in content.split("\n\n") {
        let lead = raw.len() - raw.trim_start().len();
        let trimmed = raw.trim();
        if !trimmed.is_empty() {
            spans.push((offset + lead, offset + lead + trimmed.len()));
        }
        offset += raw.len() + 2;
    }
    spans
}

fn word_spans(text: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut start = None;
    for (i, ch) in text.char_indices() {
        match (ch.is_whitespace(), start) {
            (true, Some(s)) => {
                spans.push((s, i));
                start = None;
            }
            (false, None) => start = Some(i),
            _ => {}
        }
    }
    if let Some(s) = start {
        spans.push((s, text.len()));
    }
    spans
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paragraph_spans_skip_blank_blocks() {
        let text = "first para\n\n\n\n  second  \n\nthird";
        let spans = paragraph_spans(text);
        let parts: Vec<&str> = spans.iter().map(|&(s, e)| &text[s..e]).collect();
        assert_eq!(parts, vec!["first para", "second", "third"]);
    }

    #[test]
    fn word_spans_cover_words_only() {
        let text = " a bb  ccc ";
        let words: Vec<&str> = word_spans(text).iter().map(|&(s, e)| &text[s..e]).collect();
        assert_eq!(words, vec!["a", "bb", "ccc"]);
    }
}
