//! ragq-vector
//!
//! Dense retrieval. `LanceVectorAdapter` searches a LanceDB chunk table written
//! by `LanceChunkWriter`; `MemoryVectorAdapter` keeps everything in process.
pub mod schema;
pub mod table;
pub mod writer;
pub mod search;
pub mod memory;

pub use memory::MemoryVectorAdapter;
pub use search::{filter_predicate, LanceVectorAdapter, VECTOR_ADAPTER};
pub use writer::LanceChunkWriter;
