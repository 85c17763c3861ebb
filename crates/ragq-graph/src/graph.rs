//! Entity co-occurrence graph over chunks.
//!
//! Nodes are named entities holding the ids of the chunks that mention them;
//! undirected edges carry an accumulated co-occurrence weight.
use anyhow::{Context, Result};
use petgraph::graph::{NodeIndex, UnGraph};
use petgraph::visit::EdgeRef;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use ragq_core::types::{Chunk, ChunkId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub name: String,
    pub chunk_ids: BTreeSet<ChunkId>,
}

#[derive(Default)]
pub struct EntityGraph {
    graph: UnGraph<Entity, f32>,
    by_key: HashMap<String, NodeIndex>,
    chunks: HashMap<ChunkId, Arc<Chunk>>,
}

#[derive(Serialize, Deserialize)]
struct Snapshot {
    chunks: Vec<Chunk>,
    entities: Vec<Entity>,
    edges: Vec<(usize, usize, f32)>,
}

/// Lookup key for an entity name: lowercased, whitespace collapsed.
pub fn entity_key(name: &str) -> String {
    name.split_whitespace().map(str::to_lowercase).collect::<Vec<_>>().join(" ")
}

const NOT_ENTITIES: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "but", "by", "do", "does", "for", "from", "he", "how", "i", "if", "in",
    "is", "it", "its", "my", "no", "not", "of", "on", "or", "our", "she", "so", "that", "the", "then", "there",
    "these", "they", "this", "to", "we", "what", "when", "where", "which", "who", "why", "with", "you", "your",
];

/// Runs of capitalized words, e.g. "Globex Fire Service". A run ends at
/// sentence or clause punctuation. Common function words never start a run.
pub fn extract_entities(text: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    let mut seen = BTreeSet::new();
    let mut run: Vec<&str> = Vec::new();

    let mut flush = |run: &mut Vec<&str>, out: &mut Vec<String>| {
        if !run.is_empty() {
            let name = run.join(" ");
            if seen.insert(entity_key(&name)) {
                out.push(name);
            }
            run.clear();
        }
    };

    for raw in text.split_whitespace() {
        let word = raw.trim_matches(|c: char| !c.is_alphanumeric());
        let capitalized = word.chars().next().is_some_and(char::is_uppercase) && word.chars().count() >= 2;
        let function_word = NOT_ENTITIES.contains(&word.to_lowercase().as_str());
        if capitalized && !(run.is_empty() && function_word) {
            run.push(word);
        } else {
            flush(&mut run, &mut out);
        }
        if raw.ends_with(|c: char| matches!(c, '.' | ',' | ';' | ':' | '!' | '?' | ')')) {
            flush(&mut run, &mut out);
        }
    }
    flush(&mut run, &mut out);
    out
}

impl EntityGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entity_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    pub fn add_entity(&mut self, name: &str) -> NodeIndex {
        let key = entity_key(name);
        if let Some(&idx) = self.by_key.get(&key) {
            return idx;
        }
        let idx = self.graph.add_node(Entity { name: name.trim().to_string(), chunk_ids: BTreeSet::new() });
        self.by_key.insert(key, idx);
        idx
    }

    /// Add `weight` to the edge between two entities, creating either as needed.
    pub fn link(&mut self, a: &str, b: &str, weight: f32) {
        let (ia, ib) = (self.add_entity(a), self.add_entity(b));
        if ia == ib {
            return;
        }
        match self.graph.find_edge(ia, ib) {
            Some(e) => {
                if let Some(w) = self.graph.edge_weight_mut(e) {
                    *w += weight;
                }
            }
            None => {
                self.graph.add_edge(ia, ib, weight);
            }
        }
    }

    pub fn attach_chunk(&mut self, entity: &str, chunk: Arc<Chunk>) {
        let idx = self.add_entity(entity);
        self.graph[idx].chunk_ids.insert(chunk.id.clone());
        self.chunks.entry(chunk.id.clone()).or_insert(chunk);
    }

    /// Attach a chunk to every entity it mentions and link the co-mentioned
    /// entities pairwise. Returns the number of entities found.
    pub fn ingest(&mut self, chunk: Chunk) -> usize {
        let names = extract_entities(&chunk.text);
        let chunk = Arc::new(chunk);
        for name in &names {
            self.attach_chunk(name, Arc::clone(&chunk));
        }
        for (i, a) in names.iter().enumerate() {
            for b in &names[i + 1..] {
                self.link(a, b, 1.0);
            }
        }
        names.len()
    }

    pub fn entity(&self, name: &str) -> Option<&Entity> {
        self.by_key.get(&entity_key(name)).map(|&idx| &self.graph[idx])
    }

    pub fn chunk(&self, id: &str) -> Option<&Arc<Chunk>> {
        self.chunks.get(id)
    }

    /// Entities whose name appears as a whole-word phrase in `query`, ordered by key.
    pub fn match_query(&self, query: &str) -> Vec<NodeIndex> {
        let words: Vec<String> = query
            .split_whitespace()
            .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase())
            .filter(|w| !w.is_empty())
            .collect();
        let mut matched: Vec<(&String, NodeIndex)> = self
            .by_key
            .iter()
            .filter(|(key, _)| {
                let phrase: Vec<&str> = key.split(' ').collect();
                !phrase.is_empty() && words.windows(phrase.len()).any(|w| w.iter().zip(&phrase).all(|(a, b)| a == b))
            })
            .map(|(k, &idx)| (k, idx))
            .collect();
        matched.sort();
        matched.into_iter().map(|(_, idx)| idx).collect()
    }

    /// Direct neighbours with their edge weights.
    pub fn neighbors(&self, idx: NodeIndex) -> Vec<(NodeIndex, f32)> {
        self.graph
            .edges(idx)
            .map(|e| {
                let other = if e.source() == idx { e.target() } else { e.source() };
                (other, *e.weight())
            })
            .collect()
    }

    pub(crate) fn node(&self, idx: NodeIndex) -> &Entity {
        &self.graph[idx]
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let mut chunks: Vec<Chunk> = self.chunks.values().map(|c| c.as_ref().clone()).collect();
        chunks.sort_by(|a, b| a.id.cmp(&b.id));
        let snapshot = Snapshot {
            chunks,
            entities: self.graph.node_indices().map(|i| self.graph[i].clone()).collect(),
            edges: self.graph.edge_references().map(|e| (e.source().index(), e.target().index(), *e.weight())).collect(),
        };
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        std::fs::write(path, serde_json::to_vec(&snapshot)?).with_context(|| format!("writing {}", path.display()))?;
        info!(path = %path.display(), entities = self.entity_count(), edges = self.edge_count(), "saved entity graph");
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
        let snapshot: Snapshot = serde_json::from_slice(&bytes)?;
        let mut graph = Self::new();
        for c in snapshot.chunks {
            graph.chunks.insert(c.id.clone(), Arc::new(c));
        }
        let mut nodes = Vec::with_capacity(snapshot.entities.len());
        for entity in snapshot.entities {
            let key = entity_key(&entity.name);
            let idx = graph.graph.add_node(entity);
            graph.by_key.insert(key, idx);
            nodes.push(idx);
        }
        for (a, b, w) in snapshot.edges {
            let (Some(&ia), Some(&ib)) = (nodes.get(a), nodes.get(b)) else {
                anyhow::bail!("edge ({a}, {b}) references a missing entity");
            };
            graph.graph.add_edge(ia, ib, w);
        }
        Ok(graph)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_capitalized_runs() {
        let names = extract_entities("The Globex Fire Service met Acme in Springfield. They agreed.");
        assert_eq!(names, vec!["Globex Fire Service", "Acme", "Springfield"]);
    }

    #[test]
    fn function_words_do_not_start_entities() {
        assert_eq!(extract_entities("What is Lance?"), vec!["Lance"]);
        assert!(extract_entities("all lowercase text").is_empty());
    }

    #[test]
    fn entities_are_case_insensitive_and_links_accumulate() {
        let mut g = EntityGraph::new();
        let a = g.add_entity("Acme");
        assert_eq!(g.add_entity("ACME"), a);
        g.link("Acme", "Globex", 1.0);
        g.link("globex", "acme", 2.0);
        let b = g.add_entity("Globex");
        assert_eq!(g.edge_count(), 1);
        assert_eq!(g.neighbors(a), vec![(b, 3.0)]);
    }

    #[test]
    fn query_matches_whole_phrases() {
        let mut g = EntityGraph::new();
        g.add_entity("Fire Service");
        g.add_entity("Acme");
        assert_eq!(g.match_query("who runs the fire service?").len(), 1);
        assert!(g.match_query("fire alarm").is_empty());
        assert!(g.match_query("acmes").is_empty());
    }
}
