//! ragq-graph
//!
//! Entity graph retrieval: chunks are reached through the entities they
//! mention and through entities co-mentioned with those.
pub mod graph;
pub mod adapter;

pub use adapter::{GraphAdapter, GraphConfig, GRAPH_ADAPTER};
pub use graph::{extract_entities, Entity, EntityGraph};
