use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use pdfchat::config::{EmbeddingProvider, StoreBackend};
use pdfchat::embedder::{Embedder, GeminiEmbedder, OpenAiEmbedder};
use pdfchat::vector_store::{MemoryStore, PineconeStore, VectorStore};
use pdfchat::{AppState, AutoLoader, Cli, IndexHandle, Indexer};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();
    let cli = Cli::parse();
    let controls = cli.build_indexing_controls()?;
    let addr = cli.bind_addr()?;

    let embedder = build_embedder(&cli)?;
    info!("embedding model configured: {}", embedder.model_name());
    // Pinecone host lookup happens inside the indexing task, after the listener is up.
    let store = build_store(&cli)?;

    let index = IndexHandle::new();
    let app = pdfchat::router_with_cors(
        AppState::new(index.clone(), Arc::clone(&embedder)),
        &cli.allowed_origin,
    )?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("pdfchat listening on http://{addr}");

    // Requests served before indexing finishes get the fallback answer.
    let indexer = Indexer::new(Arc::new(AutoLoader), embedder, store, controls);
    tokio::spawn(async move {
        match indexer.run(&index).await {
            Ok(report) if report.skipped => info!("index already populated; serving"),
            Ok(report) => info!(
                "indexed {} chunk(s) from {} segment(s)",
                report.chunks, report.segments
            ),
            Err(err) => error!("indexing failed; /chat will answer with the fallback: {:#}", err),
        }
    });

    axum::serve(listener, app)
        .await
        .context("server shutdown")?;
    Ok(())
}

fn init_tracing() {
    let filter = std::env::var("PDFCHAT_LOG")
        .map(EnvFilter::new)
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn build_embedder(cli: &Cli) -> Result<Arc<dyn Embedder>> {
    let timeout = cli.request_timeout();
    let embedder: Arc<dyn Embedder> = match cli.embedding_provider {
        EmbeddingProvider::Gemini => {
            let key = cli
                .gemini_api_key
                .clone()
                .ok_or_else(|| anyhow!("GEMINI_API_KEY must be set for the Gemini provider"))?;
            Arc::new(GeminiEmbedder::new(
                key,
                cli.gemini_base_url.clone(),
                cli.gemini_model.clone(),
                timeout,
            )?)
        }
        EmbeddingProvider::Openai => {
            let key = cli
                .openai_api_key
                .clone()
                .ok_or_else(|| anyhow!("OPENAI_API_KEY must be set for the OpenAI provider"))?;
            Arc::new(OpenAiEmbedder::new(
                key,
                cli.openai_base_url.clone(),
                cli.openai_model.clone(),
                cli.openai_dimensions,
                timeout,
            )?)
        }
    };
    Ok(embedder)
}

fn build_store(cli: &Cli) -> Result<Arc<dyn VectorStore>> {
    match cli.store {
        StoreBackend::Memory => Ok(Arc::new(MemoryStore::new())),
        StoreBackend::Pinecone => {
            let key = cli
                .pinecone_api_key
                .as_deref()
                .ok_or_else(|| anyhow!("PINECONE_API_KEY must be set for the Pinecone store"))?;
            let namespace = cli.pinecone_namespace.clone();
            let store = match &cli.pinecone_host {
                Some(host) => PineconeStore::new(key, host, namespace, cli.request_timeout())?,
                None => {
                    let index = cli.pinecone_index.as_deref().ok_or_else(|| {
                        anyhow!("PINECONE_INDEX_NAME or PINECONE_INDEX_HOST must be set")
                    })?;
                    PineconeStore::for_index(key, index, namespace, cli.request_timeout())?
                        .with_control_plane(&cli.pinecone_control_plane)
                }
            };
            info!("vector store: Pinecone at {}", store.describe());
            Ok(Arc::new(store))
        }
    }
}
