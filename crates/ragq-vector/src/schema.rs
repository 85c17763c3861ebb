//! Arrow schema of the chunk table.
use arrow_schema::{DataType, Field, Schema};
use std::sync::Arc;

pub const VECTOR_COLUMN: &str = "vector";

/// `vector` is nullable: rows written before their embedding is computed
/// carry a null and are reported as backlog by the adapter.
pub fn build_chunk_schema(dim: i32) -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new("id", DataType::Utf8, false),
        Field::new("document_id", DataType::Utf8, false),
        Field::new("text", DataType::Utf8, false),
        Field::new("token_count", DataType::Int32, false),
        Field::new("page", DataType::Int32, true),
        Field::new("loc_start", DataType::Int64, false),
        Field::new("loc_end", DataType::Int64, false),
        Field::new("tenant", DataType::Utf8, true),
        Field::new("doc_type", DataType::Utf8, true),
        Field::new("created_at", DataType::Int64, true),
        Field::new("metadata", DataType::Utf8, false),
        Field::new(VECTOR_COLUMN, DataType::FixedSizeList(Arc::new(Field::new("item", DataType::Float32, true)), dim), true),
    ]))
}
