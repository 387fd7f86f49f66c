//! Google Generative Language (Gemini) embedding client.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderValue, CONTENT_TYPE};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::Embedder;

/// Async client for the `models/{model}:embedContent` endpoint.
#[derive(Clone)]
pub struct GeminiEmbedder {
    client: Client,
    endpoint: String,
    model: String,
}

impl GeminiEmbedder {
    /// Builds a new Gemini embeddings client.
    ///
    /// # Arguments
    /// * `api_key` - Value for the `x-goog-api-key` header (usually from `GEMINI_API_KEY`)
    /// * `base_url` - API root, e.g. `https://generativelanguage.googleapis.com/v1beta`
    /// * `model` - Embedding model, with or without the `models/` prefix
    pub fn new(api_key: String, base_url: String, model: String, timeout: Duration) -> Result<Self> {
        anyhow::ensure!(!api_key.trim().is_empty(), "missing Gemini API key");
        anyhow::ensure!(!model.trim().is_empty(), "missing Gemini model name");
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            "x-goog-api-key",
            HeaderValue::from_str(api_key.trim()).context("invalid Gemini API key")?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .context("failed to build Gemini HTTP client")?;
        let model = qualified_model(&model);
        let endpoint = format!("{}/{}:embedContent", base_url.trim_end_matches('/'), model);
        Ok(Self {
            client,
            endpoint,
            model,
        })
    }

    /// Full URL requests are posted to.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl Embedder for GeminiEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let request = EmbedContentRequest {
            model: &self.model,
            content: Content {
                parts: [Part { text }],
            },
        };
        let resp = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .context("failed to call Gemini embedContent")?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp
                .text()
                .await
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            anyhow::bail!("Gemini embedding request failed ({}): {}", status, body);
        }
        let parsed: EmbedContentResponse = resp
            .json()
            .await
            .context("failed to parse Gemini embedding response")?;
        anyhow::ensure!(
            !parsed.embedding.values.is_empty(),
            "Gemini returned an empty embedding"
        );
        Ok(parsed.embedding.values)
    }
}

fn qualified_model(model: &str) -> String {
    let model = model.trim();
    if model.starts_with("models/") {
        model.to_string()
    } else {
        format!("models/{model}")
    }
}

#[derive(Serialize)]
struct EmbedContentRequest<'a> {
    model: &'a str,
    content: Content<'a>,
}

#[derive(Serialize)]
struct Content<'a> {
    parts: [Part<'a>; 1],
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbedContentResponse {
    embedding: ContentEmbedding,
}

#[derive(Debug, Deserialize)]
struct ContentEmbedding {
    values: Vec<f32>,
}
