use anyhow::{anyhow, Result};
use arrow_array::cast::AsArray;
use arrow_array::{Array, FixedSizeListArray, Float32Array, Int32Array, Int64Array, RecordBatch, StringArray};
use async_trait::async_trait;
use futures::TryStreamExt;
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::{Connection, DistanceType};
use std::sync::Arc;
use tracing::debug;

use ragq_core::error::AdapterError;
use ragq_core::traits::{ChunkStoreAdapter, Embedder};
use ragq_core::types::{AdapterResponse, Chunk, Filters, Meta, ScoredChunk, SourceLocation};

use crate::schema::VECTOR_COLUMN;
use crate::table::{open_db, sql_quote};

pub const VECTOR_ADAPTER: &str = "vector";

/// Vector similarity over a LanceDB chunk table. Filters are pushed down as
/// an SQL predicate; rows whose embedding is still null count as backlog and
/// mark the response degraded.
pub struct LanceVectorAdapter {
    name: String,
    db: Connection,
    table_name: String,
    embedder: Arc<dyn Embedder>,
}

impl LanceVectorAdapter {
    pub async fn new(db_uri: &str, table_name: &str, embedder: Arc<dyn Embedder>) -> Result<Self> {
        let db = open_db(db_uri).await?;
        Ok(Self { name: VECTOR_ADAPTER.to_string(), db, table_name: table_name.to_string(), embedder })
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    async fn search(&self, query: &str, top_k: usize, filters: &Filters) -> Result<AdapterResponse> {
        let embedder = Arc::clone(&self.embedder);
        let text = query.to_string();
        let query_vec = tokio::task::spawn_blocking(move || embedder.embed_batch(&[text]))
            .await??
            .pop()
            .ok_or_else(|| anyhow!("embedder returned no vector"))?;

        let table = self.db.open_table(&self.table_name).execute().await?;
        let backlog = table.count_rows(Some(format!("{VECTOR_COLUMN} IS NULL"))).await?;
        let mut q = table.vector_search(query_vec)?.distance_type(DistanceType::Cosine).limit(top_k);
        if let Some(predicate) = filter_predicate(filters) {
            q = q.only_if(predicate);
        }
        let mut stream = q.execute().await?;

        let mut hits = Vec::new();
        while let Some(batch) = stream.try_next().await? {
            for i in 0..batch.num_rows() {
                let score = batch.column_by_name("_distance")
                    .and_then(|c| c.as_any().downcast_ref::<Float32Array>())
                    .map(|d| 1.0 - d.value(i))
                    .unwrap_or(0.0);
                hits.push(ScoredChunk::new(Arc::new(row_to_chunk(&batch, i)?), score, self.name.as_str()));
            }
        }
        debug!(adapter = %self.name, hits = hits.len(), backlog, "vector search");
        Ok(AdapterResponse { hits, degraded: backlog > 0 })
    }
}

#[async_trait]
impl ChunkStoreAdapter for LanceVectorAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn retrieve(&self, query: &str, top_k: usize, filters: &Filters) -> Result<AdapterResponse, AdapterError> {
        self.search(query, top_k, filters).await.map_err(|e| AdapterError::unavailable(&self.name, e))
    }
}

/// SQL predicate equivalent of [`Filters::matches`]; `None` when unrestricted.
pub fn filter_predicate(filters: &Filters) -> Option<String> {
    let mut parts = Vec::new();
    if let Some(tenant) = &filters.tenant {
        parts.push(format!("tenant = {}", sql_quote(tenant)));
    }
    if !filters.doc_types.is_empty() {
        let list: Vec<String> = filters.doc_types.iter().map(|t| sql_quote(t)).collect();
        parts.push(format!("doc_type IN ({})", list.join(", ")));
    }
    if let Some(ids) = &filters.document_ids {
        if ids.is_empty() {
            parts.push("FALSE".to_string());
        } else {
            let list: Vec<String> = ids.iter().map(|t| sql_quote(t)).collect();
            parts.push(format!("document_id IN ({})", list.join(", ")));
        }
    }
    if let Some(lo) = filters.created_after {
        parts.push(format!("created_at >= {lo}"));
    }
    if let Some(hi) = filters.created_before {
        parts.push(format!("created_at <= {hi}"));
    }
    if parts.is_empty() { None } else { Some(parts.join(" AND ")) }
}

fn str_col<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray> {
    batch.column_by_name(name).and_then(|c| c.as_any().downcast_ref::<StringArray>()).ok_or_else(|| anyhow!("column {name} missing"))
}

fn i64_col<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a Int64Array> {
    batch.column_by_name(name).and_then(|c| c.as_any().downcast_ref::<Int64Array>()).ok_or_else(|| anyhow!("column {name} missing"))
}

fn i32_col<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a Int32Array> {
    batch.column_by_name(name).and_then(|c| c.as_any().downcast_ref::<Int32Array>()).ok_or_else(|| anyhow!("column {name} missing"))
}

fn row_to_chunk(batch: &RecordBatch, i: usize) -> Result<Chunk> {
    let pages = i32_col(batch, "page")?;
    let metadata: Meta = serde_json::from_str(str_col(batch, "metadata")?.value(i))?;
    let embedding = batch
        .column_by_name(VECTOR_COLUMN)
        .and_then(|c| c.as_any().downcast_ref::<FixedSizeListArray>())
        .filter(|list| !list.is_null(i))
        .map(|list| list.value(i).as_primitive::<arrow_array::types::Float32Type>().values().to_vec());
    Ok(Chunk {
        id: str_col(batch, "id")?.value(i).to_string(),
        document_id: str_col(batch, "document_id")?.value(i).to_string(),
        text: str_col(batch, "text")?.value(i).to_string(),
        token_count: i32_col(batch, "token_count")?.value(i).max(0) as usize,
        source_location: SourceLocation {
            page: if pages.is_null(i) { None } else { u32::try_from(pages.value(i)).ok() },
            start: i64_col(batch, "loc_start")?.value(i).max(0) as usize,
            end: i64_col(batch, "loc_end")?.value(i).max(0) as usize,
        },
        embedding,
        metadata,
    })
}
