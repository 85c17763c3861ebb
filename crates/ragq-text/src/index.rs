use anyhow::{anyhow, Result};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tantivy::collector::TopDocs;
use tantivy::query::{BooleanQuery, ConstScoreQuery, Occur, Query, QueryParser, TermQuery};
use tantivy::schema::{IndexRecordOption, Value};
use tantivy::{Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument, Term};
use tracing::{debug, info};

use ragq_core::types::{Chunk, Filters, Meta, SourceLocation};

use crate::tantivy_utils::{build_schema, register_tokenizer, ChunkFields};

const WRITER_HEAP_BYTES: usize = 50_000_000;

/// Tantivy full-text index over chunk text.
///
/// Documents go through [`KeywordIndex::stage`] and only become searchable on
/// [`KeywordIndex::commit`]. While staged documents are outstanding the index
/// reports itself as rebuilding and searches are flagged degraded.
pub struct KeywordIndex {
    index: Index,
    reader: IndexReader,
    fields: ChunkFields,
    writer: Mutex<Option<IndexWriter>>,
    pending: AtomicUsize,
}

impl KeywordIndex {
    pub fn create_in_ram() -> Result<Self> {
        Self::from_index(Index::create_in_ram(build_schema()))
    }

    /// Create a fresh on-disk index, wiping whatever was at `index_dir`.
    pub fn create_in_dir(index_dir: PathBuf) -> Result<Self> {
        if index_dir.exists() {
            std::fs::remove_dir_all(&index_dir)?;
        }
        std::fs::create_dir_all(&index_dir)?;
        Self::from_index(Index::create_in_dir(&index_dir, build_schema())?)
    }

    pub fn open_in_dir(index_dir: PathBuf) -> Result<Self> {
        let index = Index::open_in_dir(&index_dir).map_err(|e| anyhow!("open tantivy index at {}: {}", index_dir.display(), e))?;
        Self::from_index(index)
    }

    fn from_index(index: Index) -> Result<Self> {
        register_tokenizer(&index);
        let fields = ChunkFields::resolve(&index.schema())?;
        let reader = index.reader_builder().reload_policy(ReloadPolicy::Manual).try_into()?;
        Ok(Self { index, reader, fields, writer: Mutex::new(None), pending: AtomicUsize::new(0) })
    }

    pub fn add_chunks(&self, chunks: &[Chunk]) -> Result<()> {
        self.stage(chunks)?;
        self.commit()
    }

    /// Queue chunks for indexing without making them visible yet.
    pub fn stage(&self, chunks: &[Chunk]) -> Result<()> {
        let mut guard = self.writer.lock().map_err(|_| anyhow!("tantivy writer lock poisoned"))?;
        if guard.is_none() {
            *guard = Some(self.index.writer_with_num_threads(1, WRITER_HEAP_BYTES)?);
        }
        let writer = guard.as_mut().ok_or_else(|| anyhow!("tantivy writer unavailable"))?;
        for c in chunks {
            writer.add_document(self.to_document(c)?)?;
        }
        self.pending.fetch_add(chunks.len(), Ordering::AcqRel);
        Ok(())
    }

    pub fn commit(&self) -> Result<()> {
        let mut guard = self.writer.lock().map_err(|_| anyhow!("tantivy writer lock poisoned"))?;
        if let Some(writer) = guard.as_mut() {
            writer.commit()?;
            self.reader.reload()?;
            let committed = self.pending.swap(0, Ordering::AcqRel);
            info!(committed, docs = self.num_docs(), "keyword index committed");
        }
        Ok(())
    }

    pub fn is_rebuilding(&self) -> bool {
        self.pending.load(Ordering::Acquire) > 0
    }

    pub fn num_docs(&self) -> u64 {
        self.reader.searcher().num_docs()
    }

    fn to_document(&self, c: &Chunk) -> Result<TantivyDocument> {
        let f = &self.fields;
        let mut doc = TantivyDocument::default();
        doc.add_text(f.id, &c.id);
        doc.add_text(f.document_id, &c.document_id);
        doc.add_text(f.text, &c.text);
        if let Some(tenant) = c.tenant() {
            doc.add_text(f.tenant, tenant);
        }
        if let Some(doc_type) = c.doc_type() {
            doc.add_text(f.doc_type, doc_type);
        }
        if let Some(ts) = c.created_at() {
            doc.add_i64(f.created_at, ts);
        }
        doc.add_u64(f.token_count, c.token_count as u64);
        doc.add_i64(f.page, c.source_location.page.map(i64::from).unwrap_or(-1));
        doc.add_u64(f.loc_start, c.source_location.start as u64);
        doc.add_u64(f.loc_end, c.source_location.end as u64);
        doc.add_text(f.metadata, serde_json::to_string(&c.metadata)?);
        Ok(doc)
    }

    fn to_chunk(&self, doc: &TantivyDocument) -> Result<Chunk> {
        let f = &self.fields;
        let text_of = |field| doc.get_first(field).and_then(|v| v.as_str()).map(str::to_string);
        let u64_of = |field| doc.get_first(field).and_then(|v| v.as_u64()).unwrap_or(0);
        let id = text_of(f.id).ok_or_else(|| anyhow!("indexed chunk without id"))?;
        let metadata: Meta = match text_of(f.metadata) { Some(raw) => serde_json::from_str(&raw)?, None => Meta::new() };
        let page = doc.get_first(f.page).and_then(|v| v.as_i64()).and_then(|p| u32::try_from(p).ok());
        Ok(Chunk {
            id,
            document_id: text_of(f.document_id).unwrap_or_default(),
            text: text_of(f.text).unwrap_or_default(),
            token_count: u64_of(f.token_count) as usize,
            source_location: SourceLocation { page, start: u64_of(f.loc_start) as usize, end: u64_of(f.loc_end) as usize },
            embedding: None,
            metadata,
        })
    }

    /// BM25 search restricted by `filters` inside the index query.
    pub fn search(&self, query: &str, k: usize, filters: &Filters) -> Result<Vec<(f32, Chunk)>> {
        let searcher = self.reader.searcher();
        let qp = QueryParser::for_index(&self.index, vec![self.fields.text]);
        let (text_query, errors) = qp.parse_query_lenient(query);
        if !errors.is_empty() {
            debug!(errors = errors.len(), "lenient query parse dropped terms");
        }
        let mut clauses: Vec<(Occur, Box<dyn Query>)> = vec![(Occur::Must, text_query)];
        for filter in self.filter_clauses(filters)? {
            clauses.push((Occur::Must, Box::new(ConstScoreQuery::new(filter, 0.0))));
        }
        let top_docs = searcher.search(&BooleanQuery::new(clauses), &TopDocs::with_limit(k))?;
        let mut hits = Vec::with_capacity(top_docs.len());
        for (score, addr) in top_docs {
            let doc: TantivyDocument = searcher.doc(addr)?;
            hits.push((score, self.to_chunk(&doc)?));
        }
        Ok(hits)
    }

    fn filter_clauses(&self, filters: &Filters) -> Result<Vec<Box<dyn Query>>> {
        let f = &self.fields;
        let mut out: Vec<Box<dyn Query>> = Vec::new();
        if let Some(tenant) = &filters.tenant {
            out.push(term_query(f.tenant, tenant));
        }
        if !filters.doc_types.is_empty() {
            out.push(any_of(f.doc_type, filters.doc_types.iter()));
        }
        if let Some(ids) = &filters.document_ids {
            out.push(any_of(f.document_id, ids.iter()));
        }
        if filters.has_date_range() {
            let bound = |b: Option<i64>| b.map(|v| v.to_string()).unwrap_or_else(|| "*".to_string());
            let range = format!("created_at:[{} TO {}]", bound(filters.created_after), bound(filters.created_before));
            out.push(QueryParser::for_index(&self.index, vec![]).parse_query(&range)?);
        }
        Ok(out)
    }
}

fn term_query(field: tantivy::schema::Field, value: &str) -> Box<dyn Query> {
    Box::new(TermQuery::new(Term::from_field_text(field, value), IndexRecordOption::Basic))
}

/// Matches when `field` equals any of `values`; an empty set matches nothing.
fn any_of<'a>(field: tantivy::schema::Field, values: impl Iterator<Item = &'a String>) -> Box<dyn Query> {
    let should: Vec<(Occur, Box<dyn Query>)> = values.map(|v| (Occur::Should, term_query(field, v))).collect();
    Box::new(BooleanQuery::new(should))
}
