//! Startup configuration shared by the server binary and the indexing pipeline.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};

/// Default character window used when splitting document text.
pub const DEFAULT_CHUNK_SIZE: usize = 1000;
/// Default number of characters shared by adjacent windows.
pub const DEFAULT_CHUNK_OVERLAP: usize = 200;
/// Default number of embedding requests allowed in flight during indexing.
pub const DEFAULT_EMBED_CONCURRENCY: usize = 5;

/// Window size and overlap applied by the chunker.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChunkingControls {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl ChunkingControls {
    /// Builds chunking controls, rejecting an overlap that would stall the window.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        anyhow::ensure!(chunk_size > 0, "chunk size must be positive");
        anyhow::ensure!(
            chunk_overlap < chunk_size,
            "chunk overlap {} must be smaller than chunk size {}",
            chunk_overlap,
            chunk_size
        );
        Ok(Self {
            chunk_size,
            chunk_overlap,
        })
    }

    /// Maximum characters per chunk.
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Characters shared between neighbouring chunks.
    pub fn chunk_overlap(&self) -> usize {
        self.chunk_overlap
    }

    /// Distance between the starts of two consecutive windows.
    pub fn step(&self) -> usize {
        self.chunk_size - self.chunk_overlap
    }
}

impl Default for ChunkingControls {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

/// Whether a restart should embed the document again when the store already holds records.
#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum ReindexPolicy {
    /// Embed and upsert on every start.
    Always,
    /// Skip indexing only when the store's completion marker matches the current document,
    /// embedding model and chunk windows.
    IfStale,
}

/// Knobs that bound a single indexing run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndexingControls {
    document: PathBuf,
    chunking: ChunkingControls,
    max_concurrency: usize,
    reindex: ReindexPolicy,
}

impl IndexingControls {
    /// Constructs a new set of indexing controls.
    pub fn new(
        document: PathBuf,
        chunking: ChunkingControls,
        max_concurrency: usize,
        reindex: ReindexPolicy,
    ) -> Self {
        Self {
            document,
            chunking,
            max_concurrency: max_concurrency.max(1),
            reindex,
        }
    }

    /// Path of the single source document.
    pub fn document(&self) -> &PathBuf {
        &self.document
    }

    /// Chunk window configuration.
    pub fn chunking(&self) -> ChunkingControls {
        self.chunking
    }

    /// Upper bound on simultaneous embedding calls.
    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// Restart behaviour for an already populated store.
    pub fn reindex(&self) -> ReindexPolicy {
        self.reindex
    }
}

impl Default for IndexingControls {
    fn default() -> Self {
        Self {
            document: PathBuf::from("./envirotest.pdf"),
            chunking: ChunkingControls::default(),
            max_concurrency: DEFAULT_EMBED_CONCURRENCY,
            reindex: ReindexPolicy::IfStale,
        }
    }
}

/// Embedding backends understood by the server.
#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum EmbeddingProvider {
    /// Google Generative Language `embedContent`.
    Gemini,
    /// OpenAI-compatible `/embeddings`.
    Openai,
}

/// Vector store backends understood by the server.
#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum StoreBackend {
    /// Managed Pinecone index.
    Pinecone,
    /// In-process store; contents are lost on exit.
    Memory,
}

/// Command-line interface for the chat server.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "pdfchat-server",
    about = "Index one PDF into a vector store and answer questions with its closest chunk"
)]
pub struct Cli {
    /// Address to bind the HTTP server to (host:port).
    #[arg(long, env = "PDFCHAT_BIND", default_value = "0.0.0.0:3000")]
    pub bind: String,

    /// Document indexed at startup (.pdf, or plain text).
    #[arg(long, env = "PDFCHAT_DOCUMENT", default_value = "./envirotest.pdf")]
    pub document: PathBuf,

    /// Single origin allowed to call the API from a browser.
    #[arg(
        long,
        env = "PDFCHAT_ALLOWED_ORIGIN",
        default_value = "https://envio-frontend-ytj7.vercel.app"
    )]
    pub allowed_origin: String,

    /// Embedding backend used for both chunks and questions.
    #[arg(long, env = "PDFCHAT_EMBEDDING_PROVIDER", value_enum, default_value_t = EmbeddingProvider::Gemini)]
    pub embedding_provider: EmbeddingProvider,

    /// Google API key for Gemini embeddings.
    #[arg(long, env = "GEMINI_API_KEY")]
    pub gemini_api_key: Option<String>,

    /// Gemini embedding model identifier.
    #[arg(long, env = "PDFCHAT_GEMINI_MODEL", default_value = "text-embedding-004")]
    pub gemini_model: String,

    /// Base URL for the Generative Language API.
    #[arg(
        long,
        env = "PDFCHAT_GEMINI_BASE",
        default_value = "https://generativelanguage.googleapis.com/v1beta"
    )]
    pub gemini_base_url: String,

    /// OpenAI API key used when --embedding-provider openai.
    #[arg(long, env = "OPENAI_API_KEY")]
    pub openai_api_key: Option<String>,

    /// OpenAI embedding model identifier.
    #[arg(
        long,
        env = "PDFCHAT_OPENAI_MODEL",
        default_value = "text-embedding-3-small"
    )]
    pub openai_model: String,

    /// Optional embedding dimension override for OpenAI models.
    #[arg(long, env = "PDFCHAT_OPENAI_DIMENSIONS")]
    pub openai_dimensions: Option<usize>,

    /// Base URL for OpenAI-compatible endpoints.
    #[arg(
        long,
        env = "PDFCHAT_OPENAI_BASE",
        default_value = "https://api.openai.com/v1"
    )]
    pub openai_base_url: String,

    /// Vector store backend.
    #[arg(long, env = "PDFCHAT_STORE", value_enum, default_value_t = StoreBackend::Pinecone)]
    pub store: StoreBackend,

    /// Pinecone API key.
    #[arg(long, env = "PINECONE_API_KEY")]
    pub pinecone_api_key: Option<String>,

    /// Pinecone index name.
    #[arg(long, env = "PINECONE_INDEX_NAME")]
    pub pinecone_index: Option<String>,

    /// Pinecone index host; looked up through the control plane when unset.
    #[arg(long, env = "PINECONE_INDEX_HOST")]
    pub pinecone_host: Option<String>,

    /// Pinecone control-plane URL used to resolve the index host.
    #[arg(
        long,
        env = "PINECONE_CONTROL_PLANE",
        default_value = "https://api.pinecone.io"
    )]
    pub pinecone_control_plane: String,

    /// Pinecone namespace holding the document's records.
    #[arg(long, env = "PINECONE_NAMESPACE", default_value = "")]
    pub pinecone_namespace: String,

    /// Characters per chunk.
    #[arg(long, env = "PDFCHAT_CHUNK_SIZE", default_value_t = DEFAULT_CHUNK_SIZE)]
    pub chunk_size: usize,

    /// Characters shared by adjacent chunks.
    #[arg(long, env = "PDFCHAT_CHUNK_OVERLAP", default_value_t = DEFAULT_CHUNK_OVERLAP)]
    pub chunk_overlap: usize,

    /// Embedding requests allowed in flight while indexing.
    #[arg(long, env = "PDFCHAT_EMBED_CONCURRENCY", default_value_t = DEFAULT_EMBED_CONCURRENCY)]
    pub embed_concurrency: usize,

    /// Whether to re-embed the document when the store already holds a complete index of it.
    #[arg(long, env = "PDFCHAT_REINDEX", value_enum, default_value_t = ReindexPolicy::IfStale)]
    pub reindex: ReindexPolicy,

    /// Seconds before an outbound HTTP request is abandoned.
    #[arg(long, env = "PDFCHAT_REQUEST_TIMEOUT_SECS", default_value_t = 30)]
    pub request_timeout_secs: u64,
}

impl Cli {
    /// Converts the parsed CLI into `IndexingControls`.
    pub fn build_indexing_controls(&self) -> Result<IndexingControls> {
        let chunking = ChunkingControls::new(self.chunk_size, self.chunk_overlap)?;
        Ok(IndexingControls::new(
            self.document.clone(),
            chunking,
            self.embed_concurrency,
            self.reindex,
        ))
    }

    /// Parses the bind address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        self.bind
            .parse()
            .with_context(|| format!("invalid bind address {}", self.bind))
    }

    /// Timeout applied to every outbound HTTP client.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }
}
