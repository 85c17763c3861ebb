//! ragq-core
//!
//! Shared vocabulary of the query engine: chunk and answer types, access
//! filters, the error taxonomy, the collaborator traits, configuration and
//! the corpus version counter.

pub mod config;
pub mod corpus;
pub mod data_processor;
pub mod error;
pub mod traits;
pub mod types;
