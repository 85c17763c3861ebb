//! ragq-hybrid
//!
//! The query path on top of the chunk store adapters:
//! - `expand`: query normalization and synonym expansion
//! - `fusion`: weighted reciprocal-rank fusion with near-duplicate folding
//! - `assemble`: token-budgeted context window
//! - `attribution`: sentence-level citation mapping
//! - `orchestrator`: one uncached answer end to end
//! - `cache`: single-flight answer cache
//! - `engine`: `QueryEngine`, the public entry point
pub mod expand;
pub mod fusion;
pub mod assemble;
pub mod attribution;
pub mod generate;
pub mod orchestrator;
pub mod cache;
pub mod engine;

pub use assemble::assemble;
pub use cache::{AnswerCache, CacheStats};
pub use engine::{QueryEngine, QueryEngineBuilder};
pub use expand::{normalize_query, NoExpansion, SynonymExpander};
pub use fusion::fuse;
pub use generate::ExtractiveGenerator;
pub use orchestrator::Orchestrator;
