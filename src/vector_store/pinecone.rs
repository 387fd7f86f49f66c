//! Pinecone REST client (data plane plus the lazy control-plane host lookup).

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use super::{IndexedRecord, RecordMetadata, ScoredRecord, VectorStore};

const CONTROL_PLANE_URL: &str = "https://api.pinecone.io";
const API_VERSION: &str = "2024-07";
/// Vectors sent per upsert request.
pub const UPSERT_BATCH: usize = 100;
// Pinecone reports the unnamed namespace under either key depending on API version.
const DEFAULT_NAMESPACE_KEYS: [&str; 2] = ["", "__default__"];
const MARKER_ID: &str = "pdfchat-index-marker";
const MARKER_NAMESPACE_SUFFIX: &str = "pdfchat-marker";

/// Client bound to one Pinecone index and namespace.
///
/// When only the index name is known, the data-plane host is looked up on first use, so a
/// control-plane outage surfaces as a failed store call rather than a failed startup.
pub struct PineconeStore {
    client: Client,
    index_name: Option<String>,
    control_plane: String,
    host: OnceCell<String>,
    namespace: String,
}

impl PineconeStore {
    /// Builds a client for an already known index host.
    pub fn new(api_key: &str, host: &str, namespace: String, timeout: Duration) -> Result<Self> {
        anyhow::ensure!(!host.trim().is_empty(), "missing Pinecone index host");
        Ok(Self {
            client: build_client(api_key, timeout)?,
            index_name: None,
            control_plane: CONTROL_PLANE_URL.to_string(),
            host: OnceCell::from(normalize_host(host)),
            namespace,
        })
    }

    /// Builds a client for `index_name`; the host is resolved by the first request.
    pub fn for_index(
        api_key: &str,
        index_name: &str,
        namespace: String,
        timeout: Duration,
    ) -> Result<Self> {
        anyhow::ensure!(!index_name.trim().is_empty(), "missing Pinecone index name");
        Ok(Self {
            client: build_client(api_key, timeout)?,
            index_name: Some(index_name.trim().to_string()),
            control_plane: CONTROL_PLANE_URL.to_string(),
            host: OnceCell::new(),
            namespace,
        })
    }

    /// Overrides the control-plane base URL used for the host lookup.
    pub fn with_control_plane(mut self, url: &str) -> Self {
        self.control_plane = url.trim_end_matches('/').to_string();
        self
    }

    /// Where the store points: the resolved host, or the index awaiting lookup.
    pub fn describe(&self) -> String {
        match (self.host.get(), &self.index_name) {
            (Some(host), _) => host.clone(),
            (None, Some(name)) => format!("index {name} (host resolved on first use)"),
            (None, None) => "<unconfigured>".to_string(),
        }
    }

    /// Data-plane base URL, looking it up through the control plane on first call.
    pub async fn host(&self) -> Result<&str> {
        self.host
            .get_or_try_init(|| self.lookup_host())
            .await
            .map(String::as_str)
    }

    async fn lookup_host(&self) -> Result<String> {
        let index_name = self
            .index_name
            .as_deref()
            .ok_or_else(|| anyhow!("Pinecone store has neither a host nor an index name"))?;
        let url = format!("{}/indexes/{}", self.control_plane, index_name);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("failed to describe Pinecone index {index_name}"))?;
        let description: IndexDescription = parse_json(resp, "describe index").await?;
        debug!("resolved Pinecone index {} to {}", index_name, description.host);
        Ok(normalize_host(&description.host))
    }

    fn marker_namespace(&self) -> String {
        if self.namespace.is_empty() {
            MARKER_NAMESPACE_SUFFIX.to_string()
        } else {
            format!("{}-{}", self.namespace, MARKER_NAMESPACE_SUFFIX)
        }
    }

    async fn post_upsert<V: Serialize>(&self, vectors: &[V], namespace: &str) -> Result<()> {
        let host = self.host().await?;
        let request = UpsertRequest { vectors, namespace };
        let resp = self
            .client
            .post(format!("{host}/vectors/upsert"))
            .json(&request)
            .send()
            .await
            .context("failed to call Pinecone upsert")?;
        let parsed: UpsertResponse = parse_json(resp, "upsert").await?;
        anyhow::ensure!(
            parsed.upserted_count as usize == vectors.len(),
            "Pinecone upserted {} of {} vectors",
            parsed.upserted_count,
            vectors.len()
        );
        Ok(())
    }
}

#[async_trait]
impl VectorStore for PineconeStore {
    async fn upsert(&self, records: &[IndexedRecord]) -> Result<()> {
        for (batch_no, batch) in records.chunks(UPSERT_BATCH).enumerate() {
            let vectors: Vec<PineconeVector<'_>> =
                batch.iter().map(PineconeVector::from).collect();
            self.post_upsert(&vectors, &self.namespace)
                .await
                .with_context(|| format!("upsert batch {} ({} vectors)", batch_no, batch.len()))?;
        }
        Ok(())
    }

    async fn query(&self, vector: &[f32], top_k: usize) -> Result<Vec<ScoredRecord>> {
        if top_k == 0 {
            return Ok(Vec::new());
        }
        let host = self.host().await?;
        let request = QueryRequest {
            vector,
            top_k,
            include_metadata: true,
            include_values: false,
            namespace: &self.namespace,
        };
        let resp = self
            .client
            .post(format!("{host}/query"))
            .json(&request)
            .send()
            .await
            .context("failed to call Pinecone query")?;
        let parsed: QueryResponse = parse_json(resp, "query").await?;
        Ok(parsed
            .matches
            .into_iter()
            .filter_map(|hit| match hit.metadata.and_then(|meta| meta.text) {
                Some(text) => Some(ScoredRecord {
                    id: hit.id,
                    text,
                    score: hit.score,
                }),
                None => {
                    warn!("Pinecone match {} has no text metadata; ignoring", hit.id);
                    None
                }
            })
            .collect())
    }

    async fn record_count(&self) -> Result<u64> {
        let host = self.host().await?;
        let resp = self
            .client
            .post(format!("{host}/describe_index_stats"))
            .json(&serde_json::json!({}))
            .send()
            .await
            .context("failed to call Pinecone describe_index_stats")?;
        let stats: IndexStats = parse_json(resp, "describe_index_stats").await?;
        Ok(stats.namespace_count(&self.namespace))
    }

    async fn read_marker(&self) -> Result<Option<String>> {
        let host = self.host().await?;
        let namespace = self.marker_namespace();
        let resp = self
            .client
            .get(format!("{host}/vectors/fetch"))
            .query(&[("ids", MARKER_ID), ("namespace", namespace.as_str())])
            .send()
            .await
            .context("failed to call Pinecone fetch")?;
        let fetched: FetchResponse = parse_json(resp, "fetch").await?;
        Ok(fetched
            .vectors
            .get(MARKER_ID)
            .and_then(|vector| vector.metadata.as_ref())
            .and_then(|meta| meta.fingerprint.clone()))
    }

    async fn clear_marker(&self) -> Result<()> {
        let host = self.host().await?;
        let namespace = self.marker_namespace();
        let request = DeleteRequest {
            ids: [MARKER_ID],
            namespace: &namespace,
        };
        let resp = self
            .client
            .post(format!("{host}/vectors/delete"))
            .json(&request)
            .send()
            .await
            .context("failed to call Pinecone delete")?;
        let _: serde_json::Value = parse_json(resp, "delete").await?;
        Ok(())
    }

    async fn write_marker(&self, fingerprint: &str, dimension: usize) -> Result<()> {
        anyhow::ensure!(dimension > 0, "marker needs a positive vector dimension");
        let marker = marker_vector(fingerprint, dimension);
        self.post_upsert(&[marker], &self.marker_namespace())
            .await
            .context("failed to write index marker")
    }
}

// Pinecone rejects all-zero dense vectors, so the marker carries a unit vector.
fn marker_vector(fingerprint: &str, dimension: usize) -> MarkerVector {
    let mut values = vec![0.0; dimension];
    values[0] = 1.0;
    MarkerVector {
        id: MARKER_ID,
        values,
        metadata: MarkerMetadata {
            fingerprint: Some(fingerprint.to_string()),
        },
    }
}

fn build_client(api_key: &str, timeout: Duration) -> Result<Client> {
    anyhow::ensure!(!api_key.trim().is_empty(), "missing Pinecone API key");
    let mut headers = HeaderMap::new();
    headers.insert(
        "Api-Key",
        HeaderValue::from_str(api_key.trim()).context("invalid Pinecone API key")?,
    );
    headers.insert(
        "X-Pinecone-API-Version",
        HeaderValue::from_static(API_VERSION),
    );
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    Client::builder()
        .timeout(timeout)
        .default_headers(headers)
        .build()
        .context("failed to build Pinecone HTTP client")
}

async fn parse_json<T: serde::de::DeserializeOwned>(resp: Response, operation: &str) -> Result<T> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp
            .text()
            .await
            .unwrap_or_else(|_| "<body unavailable>".to_string());
        return Err(anyhow!(
            "Pinecone {} request failed ({}): {}",
            operation,
            status,
            body
        ));
    }
    resp.json()
        .await
        .with_context(|| format!("failed to parse Pinecone {operation} response"))
}

fn normalize_host(host: &str) -> String {
    let host = host.trim().trim_end_matches('/');
    if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("https://{host}")
    }
}

#[derive(Debug, Deserialize)]
struct IndexDescription {
    host: String,
}

#[derive(Serialize)]
struct UpsertRequest<'a, V> {
    vectors: &'a [V],
    namespace: &'a str,
}

#[derive(Serialize)]
struct PineconeVector<'a> {
    id: &'a str,
    values: &'a [f32],
    metadata: VectorMetadata<'a>,
}

#[derive(Serialize)]
struct VectorMetadata<'a> {
    text: &'a str,
    #[serde(flatten)]
    provenance: &'a RecordMetadata,
}

impl<'a> From<&'a IndexedRecord> for PineconeVector<'a> {
    fn from(record: &'a IndexedRecord) -> Self {
        Self {
            id: &record.id,
            values: &record.values,
            metadata: VectorMetadata {
                text: &record.text,
                provenance: &record.metadata,
            },
        }
    }
}

#[derive(Serialize)]
struct MarkerVector {
    id: &'static str,
    values: Vec<f32>,
    metadata: MarkerMetadata,
}

#[derive(Debug, Serialize, Deserialize)]
struct MarkerMetadata {
    #[serde(default)]
    fingerprint: Option<String>,
}

#[derive(Serialize)]
struct DeleteRequest<'a> {
    ids: [&'a str; 1],
    namespace: &'a str,
}

#[derive(Debug, Deserialize)]
struct FetchResponse {
    #[serde(default)]
    vectors: HashMap<String, FetchedVector>,
}

#[derive(Debug, Deserialize)]
struct FetchedVector {
    #[serde(default)]
    metadata: Option<MarkerMetadata>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpsertResponse {
    #[serde(default)]
    upserted_count: u64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequest<'a> {
    vector: &'a [f32],
    top_k: usize,
    include_metadata: bool,
    include_values: bool,
    namespace: &'a str,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    matches: Vec<QueryMatch>,
}

#[derive(Debug, Deserialize)]
struct QueryMatch {
    id: String,
    #[serde(default)]
    score: f32,
    #[serde(default)]
    metadata: Option<MatchMetadata>,
}

#[derive(Debug, Deserialize)]
struct MatchMetadata {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IndexStats {
    #[serde(default)]
    namespaces: HashMap<String, NamespaceStats>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NamespaceStats {
    #[serde(default)]
    vector_count: u64,
}

impl IndexStats {
    fn namespace_count(&self, namespace: &str) -> u64 {
        if namespace.is_empty() {
            return DEFAULT_NAMESPACE_KEYS
                .iter()
                .filter_map(|key| self.namespaces.get(*key))
                .map(|ns| ns.vector_count)
                .sum();
        }
        self.namespaces
            .get(namespace)
            .map(|ns| ns.vector_count)
            .unwrap_or(0)
    }
}
