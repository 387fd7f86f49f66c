use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, Response};
use pdfchat::embedder::Embedder;
use pdfchat::vector_store::{IndexedRecord, ScoredRecord, VectorStore};

/// Embedder that maps known phrases onto fixed axes and counts calls.
#[derive(Default)]
pub struct KeywordEmbedder {
    pub calls: AtomicUsize,
}

impl KeywordEmbedder {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Embedder for KeywordEmbedder {
    fn model_name(&self) -> &str {
        "keyword-test"
    }

    async fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let lower = text.to_lowercase();
        let axis = |word: &str| if lower.contains(word) { 1.0 } else { 0.0 };
        Ok(vec![axis("boiling"), axis("soil"), axis("air"), 0.01])
    }
}

/// Embedder that always fails.
#[derive(Default)]
pub struct BrokenEmbedder;

#[async_trait]
impl Embedder for BrokenEmbedder {
    fn model_name(&self) -> &str {
        "broken"
    }

    async fn embed(&self, _text: &str) -> anyhow::Result<Vec<f32>> {
        anyhow::bail!("embedding endpoint returned 503")
    }
}

/// Store whose search always fails, counting calls.
#[derive(Default)]
pub struct FailingStore {
    pub queries: AtomicUsize,
}

#[async_trait]
impl VectorStore for FailingStore {
    async fn upsert(&self, _records: &[IndexedRecord]) -> anyhow::Result<()> {
        anyhow::bail!("index is read-only")
    }

    async fn query(&self, _vector: &[f32], _top_k: usize) -> anyhow::Result<Vec<ScoredRecord>> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        anyhow::bail!("vector store timeout talking to idx-secret.svc.pinecone.io")
    }

    async fn record_count(&self) -> anyhow::Result<u64> {
        Ok(0)
    }

    async fn read_marker(&self) -> anyhow::Result<Option<String>> {
        Ok(None)
    }

    async fn clear_marker(&self) -> anyhow::Result<()> {
        anyhow::bail!("index is read-only")
    }

    async fn write_marker(&self, _fingerprint: &str, _dimension: usize) -> anyhow::Result<()> {
        anyhow::bail!("index is read-only")
    }
}

pub fn chat_request(body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/chat")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .expect("request")
}

pub async fn json_body(response: Response<Body>) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read body");
    serde_json::from_slice(&bytes).expect("json body")
}
