use tantivy::schema::{Field, IndexRecordOption, Schema, TextFieldIndexing, TextOptions, FAST, INDEXED, STORED, STRING};
use tantivy::tokenizer::{LowerCaser, SimpleTokenizer, StopWordFilter, TextAnalyzer};
use tantivy::Index;

pub const TEXT_TOKENIZER: &str = "text_with_stopwords";

pub fn build_schema() -> Schema {
    let mut schema_builder = Schema::builder();
    schema_builder.add_text_field("id", STRING | STORED);
    schema_builder.add_text_field("document_id", STRING | STORED);
    let text_field_indexing =
        TextFieldIndexing::default().set_tokenizer(TEXT_TOKENIZER).set_index_option(IndexRecordOption::WithFreqsAndPositions);
    let text_options = TextOptions::default().set_indexing_options(text_field_indexing).set_stored();
    schema_builder.add_text_field("text", text_options);
    schema_builder.add_text_field("tenant", STRING);
    schema_builder.add_text_field("doc_type", STRING);
    schema_builder.add_i64_field("created_at", INDEXED | STORED | FAST);
    schema_builder.add_u64_field("token_count", STORED);
    schema_builder.add_i64_field("page", STORED);
    schema_builder.add_u64_field("loc_start", STORED);
    schema_builder.add_u64_field("loc_end", STORED);
    schema_builder.add_text_field("metadata", STORED);
    schema_builder.build()
}

/// Resolved field handles for [`build_schema`].
#[derive(Debug, Clone, Copy)]
pub struct ChunkFields {
    pub id: Field,
    pub document_id: Field,
    pub text: Field,
    pub tenant: Field,
    pub doc_type: Field,
    pub created_at: Field,
    pub token_count: Field,
    pub page: Field,
    pub loc_start: Field,
    pub loc_end: Field,
    pub metadata: Field,
}

impl ChunkFields {
    pub fn resolve(schema: &Schema) -> tantivy::Result<Self> {
        Ok(Self {
            id: schema.get_field("id")?,
            document_id: schema.get_field("document_id")?,
            text: schema.get_field("text")?,
            tenant: schema.get_field("tenant")?,
            doc_type: schema.get_field("doc_type")?,
            created_at: schema.get_field("created_at")?,
            token_count: schema.get_field("token_count")?,
            page: schema.get_field("page")?,
            loc_start: schema.get_field("loc_start")?,
            loc_end: schema.get_field("loc_end")?,
            metadata: schema.get_field("metadata")?,
        })
    }
}

pub fn register_tokenizer(index: &Index) {
    let stop_words = vec![
        "a", "an", "and", "are", "as", "at", "be", "by", "for", "from", "has", "he", "in", "is",
        "it", "its", "of", "on", "that", "the", "to", "was", "will", "with", "or", "but", "not",
        "this", "these", "they", "them", "their", "there", "then", "than", "so", "if", "when",
        "where", "why", "how", "what", "which", "who", "whom", "whose", "can", "could", "should",
        "would", "may", "might", "must", "shall", "do", "does", "did", "have", "had", "having",
    ];
    let tokenizer = TextAnalyzer::builder(SimpleTokenizer::default())
        .filter(LowerCaser)
        .filter(StopWordFilter::remove(stop_words.into_iter().map(|s| s.to_string())))
        .build();
    index.tokenizers().register(TEXT_TOKENIZER, tokenizer);
}
