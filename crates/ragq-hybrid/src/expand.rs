//! Query normalization and expansion.
use std::collections::{BTreeMap, BTreeSet};

use ragq_core::config::ExpansionConfig;
use ragq_core::traits::QueryExpander;

/// Trim, lowercase and collapse internal whitespace.
pub fn normalize_query(query: &str) -> String {
    query.split_whitespace().map(str::to_lowercase).collect::<Vec<_>>().join(" ")
}

pub struct NoExpansion;

impl QueryExpander for NoExpansion {
    fn expand(&self, normalized: &str) -> String {
        normalized.to_string()
    }
}

/// Appends related terms for every known term in the query, at most
/// `max_terms` in total, skipping terms the query already contains.
pub struct SynonymExpander {
    synonyms: BTreeMap<String, Vec<String>>,
    max_terms: usize,
}

impl SynonymExpander {
    pub fn new(synonyms: BTreeMap<String, Vec<String>>, max_terms: usize) -> Self {
        let synonyms = synonyms
            .into_iter()
            .map(|(k, v)| (k.to_lowercase(), v.into_iter().map(|t| t.to_lowercase()).collect()))
            .collect();
        Self { synonyms, max_terms }
    }

    pub fn from_config(config: &ExpansionConfig) -> Self {
        Self::new(config.synonyms.clone(), config.max_terms)
    }
}

impl QueryExpander for SynonymExpander {
    fn expand(&self, normalized: &str) -> String {
        let words: Vec<&str> = normalized
            .split_whitespace()
            .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()))
            .filter(|w| !w.is_empty())
            .collect();
        let mut present: BTreeSet<&str> = words.iter().copied().collect();
        let mut extra: Vec<&str> = Vec::new();
        'outer: for word in &words {
            let Some(related) = self.synonyms.get(*word) else { continue };
            for term in related {
                if extra.len() >= self.max_terms {
                    break 'outer;
                }
                if present.insert(term.as_str()) {
                    extra.push(term);
                }
            }
        }
        if extra.is_empty() {
            normalized.to_string()
        } else {
            format!("{normalized} {}", extra.join(" "))
        }
    }
}
