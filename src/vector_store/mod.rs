//! Vector store clients and the records they hold.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub mod memory;
pub mod pinecone;

pub use memory::MemoryStore;
pub use pinecone::PineconeStore;

/// Provenance stored alongside each vector. Not used when answering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordMetadata {
    /// Source document path.
    pub source: String,
    /// Page the chunk came from.
    pub page: u32,
    /// Chunk position inside the page.
    pub chunk_id: usize,
}

/// A chunk and its embedding, as written to the store.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedRecord {
    /// Stable identifier; upserting the same id overwrites.
    pub id: String,
    /// Raw chunk text returned verbatim to callers.
    pub text: String,
    /// Embedding vector.
    pub values: Vec<f32>,
    /// Provenance.
    pub metadata: RecordMetadata,
}

/// A search hit.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredRecord {
    /// Record identifier.
    pub id: String,
    /// Stored chunk text.
    pub text: String,
    /// Similarity reported by the store (higher is closer).
    pub score: f32,
}

/// Nearest-neighbour index holding the document's chunks.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Writes all records as one logical batch; any rejected request fails the whole call.
    async fn upsert(&self, records: &[IndexedRecord]) -> Result<()>;

    /// Returns up to `top_k` records ordered by decreasing similarity.
    async fn query(&self, vector: &[f32], top_k: usize) -> Result<Vec<ScoredRecord>>;

    /// Number of records currently stored in the target namespace.
    async fn record_count(&self) -> Result<u64>;

    /// Fingerprint written after the last successful indexing run, if any.
    async fn read_marker(&self) -> Result<Option<String>>;

    /// Forgets any completion marker; called before records are overwritten.
    async fn clear_marker(&self) -> Result<()>;

    /// Records `fingerprint` as the completed index. Called only after every record is written;
    /// `dimension` is the vector length of those records.
    async fn write_marker(&self, fingerprint: &str, dimension: usize) -> Result<()>;
}
