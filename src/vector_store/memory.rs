//! In-process vector store using brute-force cosine similarity.

use std::collections::BTreeMap;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{IndexedRecord, ScoredRecord, VectorStore};

/// Vector store kept in memory; contents vanish with the process.
#[derive(Default)]
pub struct MemoryStore {
    records: RwLock<BTreeMap<String, IndexedRecord>>,
    marker: RwLock<Option<String>>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorStore for MemoryStore {
    async fn upsert(&self, records: &[IndexedRecord]) -> Result<()> {
        if let Some(first) = records.first() {
            let dims = first.values.len();
            anyhow::ensure!(dims > 0, "record {} has an empty vector", first.id);
            if let Some(bad) = records.iter().find(|record| record.values.len() != dims) {
                anyhow::bail!(
                    "record {} has {} dimensions, expected {}",
                    bad.id,
                    bad.values.len(),
                    dims
                );
            }
        }
        let mut guard = self.records.write().await;
        for record in records {
            guard.insert(record.id.clone(), record.clone());
        }
        Ok(())
    }

    async fn query(&self, vector: &[f32], top_k: usize) -> Result<Vec<ScoredRecord>> {
        if top_k == 0 {
            return Ok(Vec::new());
        }
        let guard = self.records.read().await;
        let mut hits: Vec<ScoredRecord> = guard
            .values()
            .map(|record| ScoredRecord {
                id: record.id.clone(),
                text: record.text.clone(),
                score: cosine_similarity(vector, &record.values),
            })
            .collect();
        // BTreeMap iteration is id-ordered and the sort is stable, so ties resolve by id.
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(top_k);
        Ok(hits)
    }

    async fn record_count(&self) -> Result<u64> {
        Ok(self.records.read().await.len() as u64)
    }

    async fn read_marker(&self) -> Result<Option<String>> {
        Ok(self.marker.read().await.clone())
    }

    async fn clear_marker(&self) -> Result<()> {
        *self.marker.write().await = None;
        Ok(())
    }

    async fn write_marker(&self, fingerprint: &str, _dimension: usize) -> Result<()> {
        *self.marker.write().await = Some(fingerprint.to_string());
        Ok(())
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}
