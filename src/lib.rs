#![warn(missing_docs)]
//! Core library entry points for the pdfchat question-answering service.

pub mod api;
pub mod chunker;
pub mod config;
pub mod embedder;
pub mod error;
pub mod loader;
pub mod pipeline;
pub mod state;
pub mod vector_store;

pub use api::{answer_question, router, router_with_cors, AppState, FALLBACK_ANSWER};
pub use chunker::{Chunk, Chunker};
pub use config::{ChunkingControls, Cli, IndexingControls, ReindexPolicy};
pub use error::{ChatError, IndexError};
pub use loader::{AutoLoader, DocumentLoader, LoadError, Segment};
pub use pipeline::{IndexFingerprint, IndexReport, Indexer};
pub use state::{IndexHandle, IndexState};
pub use vector_store::{IndexedRecord, ScoredRecord, VectorStore};
