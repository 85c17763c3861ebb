use std::fmt::Display;

use thiserror::Error;

/// Configuration and ingestion failures.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Per-backend retrieval failures. The orchestrator absorbs these and keeps
/// going with the remaining adapters.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AdapterError {
    #[error("adapter '{adapter}' unavailable: {reason}")]
    Unavailable { adapter: String, reason: String },

    #[error("adapter '{adapter}' timed out after {after_ms}ms")]
    Timeout { adapter: String, after_ms: u64 },
}

impl AdapterError {
    pub fn unavailable(adapter: &str, reason: impl Display) -> Self {
        Self::Unavailable { adapter: adapter.to_string(), reason: reason.to_string() }
    }

    pub fn adapter(&self) -> &str {
        match self {
            Self::Unavailable { adapter, .. } | Self::Timeout { adapter, .. } => adapter,
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AssembleError {
    #[error("token budget {budget} cannot hold the top-ranked chunk ({required} tokens)")]
    BudgetTooSmall { required: usize, budget: usize },
}

/// Failures reported by the generation collaborator.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GenerationError {
    #[error("generation failed: {0}")]
    Failed(String),

    #[error("generation timed out after {after_ms}ms")]
    Timeout { after_ms: u64 },
}

/// Errors surfaced by `answer`. Cloneable so that every cache waiter joined
/// on one computation receives the same failure.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QueryError {
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("no relevant context: {0}")]
    NoRelevantContext(String),

    #[error("token budget {budget} cannot hold the top-ranked chunk ({required} tokens)")]
    BudgetTooSmall { required: usize, budget: usize },

    #[error("generation failed after {attempts} attempt(s): {reason}")]
    GenerationFailed { attempts: u32, reason: String },
}

impl From<AssembleError> for QueryError {
    fn from(e: AssembleError) -> Self {
        match e {
            AssembleError::BudgetTooSmall { required, budget } => Self::BudgetTooSmall { required, budget },
        }
    }
}
