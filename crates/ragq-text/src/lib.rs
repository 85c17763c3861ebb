//! ragq-text
//!
//! Tantivy-based keyword retrieval: a chunk index with server-side filters
//! (`index`) and its `ChunkStoreAdapter` (`search`).
pub mod tantivy_utils;
pub mod index;
pub mod search;

pub use index::KeywordIndex;
pub use search::{KeywordAdapter, KEYWORD_ADAPTER};
