use anyhow::{ensure, Result};
use arrow_array::{FixedSizeListArray, Int32Array, Int64Array, RecordBatch, RecordBatchIterator, StringArray};
use indicatif::{ProgressBar, ProgressStyle};
use lancedb::Connection;
use std::sync::Arc;
use tracing::info;

use ragq_core::types::Chunk;

use crate::schema::build_chunk_schema;
use crate::table::{ensure_table, open_db, table_exists};

const BATCH_SIZE: usize = 1000;

/// Appends chunks (with or without embeddings) to a LanceDB table.
pub struct LanceChunkWriter {
    db: Connection,
    table_name: String,
    dim: i32,
}

impl LanceChunkWriter {
    pub async fn new(db_uri: &str, table_name: &str, dim: usize) -> Result<Self> {
        let db = open_db(db_uri).await?;
        let dim = i32::try_from(dim)?;
        ensure_table(&db, table_name, build_chunk_schema(dim)).await?;
        Ok(Self { db, table_name: table_name.to_string(), dim })
    }

    pub async fn write(&self, chunks: &[Chunk]) -> Result<usize> {
        if chunks.is_empty() {
            return Ok(0);
        }
        for c in chunks {
            if let Some(v) = &c.embedding {
                ensure!(v.len() as i32 == self.dim, "chunk {} has dim {}, table expects {}", c.id, v.len(), self.dim);
            }
        }
        let pb = ProgressBar::new(chunks.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} chunks ({percent}%)")?
                .progress_chars("#>-"),
        );
        for batch in chunks.chunks(BATCH_SIZE) {
            self.insert_batch(batch).await?;
            pb.inc(batch.len() as u64);
        }
        pb.finish_and_clear();
        info!(table = %self.table_name, chunks = chunks.len(), "wrote chunks to LanceDB");
        Ok(chunks.len())
    }

    async fn insert_batch(&self, chunks: &[Chunk]) -> Result<()> {
        let record_batch = self.to_record_batch(chunks)?;
        let schema = record_batch.schema();
        let reader = Box::new(RecordBatchIterator::new(vec![Ok(record_batch)].into_iter(), schema));
        if table_exists(&self.db, &self.table_name).await? {
            self.db.open_table(&self.table_name).execute().await?.add(reader).execute().await?;
        } else {
            self.db.create_table(&self.table_name, reader).execute().await?;
        }
        Ok(())
    }

    fn to_record_batch(&self, chunks: &[Chunk]) -> Result<RecordBatch> {
        let mut ids = Vec::new();
        let mut doc_ids = Vec::new();
        let mut texts = Vec::new();
        let mut token_counts = Vec::new();
        let mut pages = Vec::new();
        let mut starts = Vec::new();
        let mut ends = Vec::new();
        let mut tenants = Vec::new();
        let mut doc_types = Vec::new();
        let mut created = Vec::new();
        let mut metas = Vec::new();
        let mut vectors: Vec<Option<Vec<Option<f32>>>> = Vec::new();
        for c in chunks {
            ids.push(c.id.clone());
            doc_ids.push(c.document_id.clone());
            texts.push(c.text.clone());
            token_counts.push(c.token_count as i32);
            pages.push(c.source_location.page.map(|p| p as i32));
            starts.push(c.source_location.start as i64);
            ends.push(c.source_location.end as i64);
            tenants.push(c.tenant().map(str::to_string));
            doc_types.push(c.doc_type().map(str::to_string));
            created.push(c.created_at());
            metas.push(serde_json::to_string(&c.metadata)?);
            vectors.push(c.embedding.as_ref().map(|v| v.iter().map(|&x| Some(x)).collect()));
        }
        let record_batch = RecordBatch::try_new(build_chunk_schema(self.dim), vec![
            Arc::new(StringArray::from(ids)),
            Arc::new(StringArray::from(doc_ids)),
            Arc::new(StringArray::from(texts)),
            Arc::new(Int32Array::from(token_counts)),
            Arc::new(Int32Array::from(pages)),
            Arc::new(Int64Array::from(starts)),
            Arc::new(Int64Array::from(ends)),
            Arc::new(StringArray::from(tenants)),
            Arc::new(StringArray::from(doc_types)),
            Arc::new(Int64Array::from(created)),
            Arc::new(StringArray::from(metas)),
            Arc::new(FixedSizeListArray::from_iter_primitive::<arrow_array::types::Float32Type, _, _>(vectors.into_iter(), self.dim)),
        ])?;
        Ok(record_batch)
    }
}
