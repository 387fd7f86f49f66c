//! Startup indexing: load, chunk, embed, upsert, then publish the store handle.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use crc32fast::Hasher as Crc32;
use futures_util::{stream, StreamExt, TryStreamExt};
use tracing::{debug, info, warn};

use crate::chunker::{Chunk, Chunker};
use crate::config::{ChunkingControls, IndexingControls, ReindexPolicy};
use crate::embedder::Embedder;
use crate::error::IndexError;
use crate::loader::{DocumentLoader, Segment};
use crate::state::IndexHandle;
use crate::vector_store::{IndexedRecord, RecordMetadata, VectorStore};

/// Counts describing a finished indexing run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexReport {
    /// Segments (pages) read from the document.
    pub segments: usize,
    /// Chunks embedded and written.
    pub chunks: usize,
    /// True when the store already held a complete index of this document and nothing was written.
    pub skipped: bool,
}

/// Runs the indexing pipeline against one document.
pub struct Indexer {
    loader: Arc<dyn DocumentLoader>,
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
    controls: IndexingControls,
}

impl Indexer {
    /// Wires the pipeline collaborators together.
    pub fn new(
        loader: Arc<dyn DocumentLoader>,
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn VectorStore>,
        controls: IndexingControls,
    ) -> Self {
        Self {
            loader,
            embedder,
            store,
            controls,
        }
    }

    /// Indexes the document and moves `handle` to `Ready` or `Failed`.
    ///
    /// The handle must be `Uninitialized`; otherwise the run is skipped.
    pub async fn run(&self, handle: &IndexHandle) -> Result<IndexReport, IndexError> {
        if !handle.begin_indexing().await {
            warn!("indexing already started for this process; skipping");
            return Ok(IndexReport {
                skipped: true,
                ..IndexReport::default()
            });
        }
        match self.index().await {
            Ok(report) => {
                handle.mark_ready(Arc::clone(&self.store)).await;
                Ok(report)
            }
            Err(err) => {
                handle.mark_failed(format!("{err:#}")).await;
                Err(err)
            }
        }
    }

    /// Performs the pipeline steps without touching any handle.
    pub async fn index(&self) -> Result<IndexReport, IndexError> {
        let document = self.controls.document();
        let segments = self.loader.load(document).await?;
        info!("document loaded: {} segment(s) from {:?}", segments.len(), document);

        let chunker = Chunker::new(self.controls.chunking());
        let chunks = chunker.split_segments(&segments);
        info!("chunking completed: {} chunk(s)", chunks.len());

        let fingerprint = IndexFingerprint::new(
            self.embedder.model_name(),
            &segments,
            chunks.len(),
            self.controls.chunking(),
        )
        .to_string();
        if self.controls.reindex() == ReindexPolicy::IfStale
            && self.is_current(&fingerprint, chunks.len()).await?
        {
            info!("store already holds a complete index of {:?}; skipping", document);
            return Ok(IndexReport {
                segments: segments.len(),
                chunks: chunks.len(),
                skipped: true,
            });
        }

        info!(
            "embedding with model {} ({} in flight max)",
            self.embedder.model_name(),
            self.controls.max_concurrency()
        );
        let records = self.embed_chunks(chunks).await?;

        // A partial write must never look complete to the next start.
        self.store
            .clear_marker()
            .await
            .map_err(IndexError::StoreWrite)?;
        self.store
            .upsert(&records)
            .await
            .map_err(IndexError::StoreWrite)?;
        if let Some(first) = records.first() {
            self.store
                .write_marker(&fingerprint, first.values.len())
                .await
                .map_err(IndexError::StoreWrite)?;
        }
        info!("data stored successfully: {} record(s)", records.len());

        Ok(IndexReport {
            segments: segments.len(),
            chunks: records.len(),
            skipped: false,
        })
    }

    async fn is_current(&self, fingerprint: &str, chunks: usize) -> Result<bool, IndexError> {
        let marker = self
            .store
            .read_marker()
            .await
            .map_err(IndexError::StoreRead)?;
        match marker {
            Some(marker) if marker == fingerprint => {
                let stored = self
                    .store
                    .record_count()
                    .await
                    .map_err(IndexError::StoreRead)?;
                debug!("marker matches; store holds {} of {} record(s)", stored, chunks);
                Ok(chunks > 0 && stored >= chunks as u64)
            }
            Some(marker) => {
                info!("stored index is stale ({}); re-indexing", marker);
                Ok(false)
            }
            None => Ok(false),
        }
    }

    async fn embed_chunks(&self, chunks: Vec<Chunk>) -> Result<Vec<IndexedRecord>, IndexError> {
        let embedder = self.embedder.as_ref();
        // `buffered` keeps document order; `try_collect` drops the in-flight calls on first error.
        stream::iter(chunks.into_iter().map(|chunk| async move {
            let id = record_id(&chunk);
            debug!("embedding chunk {}", id);
            let embedded = embedder.embed(&chunk.text).await;
            match embedded {
                Ok(values) => Ok(IndexedRecord {
                    id,
                    values,
                    metadata: RecordMetadata {
                        source: chunk.source.display().to_string(),
                        page: chunk.page,
                        chunk_id: chunk.chunk_id,
                    },
                    text: chunk.text,
                }),
                Err(source) => Err(IndexError::Embedding { chunk: id, source }),
            }
        }))
        .buffered(self.controls.max_concurrency())
        .try_collect()
        .await
    }
}

/// Identity of a complete index: embedding model, document content and chunk windows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexFingerprint {
    model: String,
    checksum: u32,
    chunks: usize,
    chunking: ChunkingControls,
}

impl IndexFingerprint {
    /// Fingerprints `segments` as they would be indexed with `model` and `chunking`.
    pub fn new(
        model: &str,
        segments: &[Segment],
        chunks: usize,
        chunking: ChunkingControls,
    ) -> Self {
        let mut hasher = Crc32::new();
        for segment in segments {
            hasher.update(&segment.page.to_le_bytes());
            hasher.update(segment.text.as_bytes());
        }
        Self {
            model: model.to_string(),
            checksum: hasher.finalize(),
            chunks,
            chunking,
        }
    }
}

impl fmt::Display for IndexFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "model={};crc32={:08x};chunks={};window={}/{}",
            self.model,
            self.checksum,
            self.chunks,
            self.chunking.chunk_size(),
            self.chunking.chunk_overlap()
        )
    }
}

/// Deterministic record id so re-running over the same document overwrites instead of duplicating.
pub fn record_id(chunk: &Chunk) -> String {
    format!(
        "{}-p{}-c{}",
        document_stem(&chunk.source),
        chunk.page,
        chunk.chunk_id
    )
}

fn document_stem(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .filter(|stem| !stem.is_empty())
        .unwrap_or_else(|| "document".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::LoadError;
    use crate::state::IndexState;
    use crate::vector_store::MemoryStore;
    use async_trait::async_trait;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    struct StaticLoader(Vec<Segment>);

    #[async_trait]
    impl DocumentLoader for StaticLoader {
        async fn load(&self, _path: &Path) -> Result<Vec<Segment>, LoadError> {
            Ok(self.0.clone())
        }
    }

    #[derive(Default)]
    struct TrackingEmbedder {
        calls: AtomicUsize,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        fail_on: Option<usize>,
        model: Option<&'static str>,
    }

    #[async_trait]
    impl Embedder for TrackingEmbedder {
        fn model_name(&self) -> &str {
            self.model.unwrap_or("tracking")
        }

        async fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            if self.fail_on == Some(call) {
                anyhow::bail!("embedding quota exceeded");
            }
            Ok(vec![text.len() as f32, 1.0])
        }
    }

    /// Memory store that writes upserts in fixed batches and can fail one batch once.
    struct BatchedStore {
        inner: MemoryStore,
        batch: usize,
        fail_batch: Option<usize>,
        failed: AtomicBool,
    }

    impl BatchedStore {
        fn failing_batch(batch: usize, fail_batch: usize) -> Self {
            Self {
                inner: MemoryStore::new(),
                batch,
                fail_batch: Some(fail_batch),
                failed: AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl VectorStore for BatchedStore {
        async fn upsert(&self, records: &[IndexedRecord]) -> anyhow::Result<()> {
            for (batch_no, batch) in records.chunks(self.batch).enumerate() {
                if self.fail_batch == Some(batch_no) && !self.failed.swap(true, Ordering::SeqCst) {
                    anyhow::bail!("upsert batch {} timed out", batch_no);
                }
                self.inner.upsert(batch).await?;
            }
            Ok(())
        }

        async fn query(
            &self,
            vector: &[f32],
            top_k: usize,
        ) -> anyhow::Result<Vec<crate::vector_store::ScoredRecord>> {
            self.inner.query(vector, top_k).await
        }

        async fn record_count(&self) -> anyhow::Result<u64> {
            self.inner.record_count().await
        }

        async fn read_marker(&self) -> anyhow::Result<Option<String>> {
            self.inner.read_marker().await
        }

        async fn clear_marker(&self) -> anyhow::Result<()> {
            self.inner.clear_marker().await
        }

        async fn write_marker(&self, fingerprint: &str, dimension: usize) -> anyhow::Result<()> {
            self.inner.write_marker(fingerprint, dimension).await
        }
    }

    fn segments(pages: usize, len: usize) -> Vec<Segment> {
        (1..=pages)
            .map(|page| Segment {
                source: PathBuf::from("envirotest.pdf"),
                page: page as u32,
                text: "x".repeat(len),
            })
            .collect()
    }

    fn controls(reindex: ReindexPolicy) -> IndexingControls {
        IndexingControls::new(
            PathBuf::from("envirotest.pdf"),
            ChunkingControls::default(),
            5,
            reindex,
        )
    }

    #[tokio::test]
    async fn never_exceeds_embedding_concurrency() {
        let embedder = Arc::new(TrackingEmbedder::default());
        let store = Arc::new(MemoryStore::new());
        let indexer = Indexer::new(
            Arc::new(StaticLoader(segments(40, 900))),
            embedder.clone(),
            store.clone(),
            controls(ReindexPolicy::Always),
        );
        let handle = IndexHandle::new();

        let report = indexer.run(&handle).await.expect("indexing succeeds");

        assert_eq!(report.chunks, 40);
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 40);
        assert!(embedder.peak.load(Ordering::SeqCst) <= 5);
        assert!(embedder.peak.load(Ordering::SeqCst) > 1);
        assert_eq!(store.record_count().await.unwrap(), 40);
        assert!(handle.ready_store().await.is_some());
    }

    #[tokio::test]
    async fn first_embedding_failure_aborts_run() {
        let embedder = Arc::new(TrackingEmbedder {
            fail_on: Some(2),
            ..TrackingEmbedder::default()
        });
        let store = Arc::new(MemoryStore::new());
        let indexer = Indexer::new(
            Arc::new(StaticLoader(segments(30, 500))),
            embedder.clone(),
            store.clone(),
            controls(ReindexPolicy::Always),
        );
        let handle = IndexHandle::new();

        let err = indexer.run(&handle).await.expect_err("indexing fails");

        assert!(matches!(err, IndexError::Embedding { .. }));
        assert!(embedder.calls.load(Ordering::SeqCst) < 30);
        assert_eq!(store.record_count().await.unwrap(), 0);
        assert!(matches!(handle.snapshot().await, IndexState::Failed(_)));
        assert!(handle.ready_store().await.is_none());
    }

    #[tokio::test]
    async fn load_failure_marks_handle_failed() {
        let indexer = Indexer::new(
            Arc::new(crate::loader::AutoLoader),
            Arc::new(TrackingEmbedder::default()),
            Arc::new(MemoryStore::new()),
            IndexingControls::new(
                PathBuf::from("/no/such/document.pdf"),
                ChunkingControls::default(),
                5,
                ReindexPolicy::Always,
            ),
        );
        let handle = IndexHandle::new();

        let err = indexer.run(&handle).await.expect_err("missing document");

        assert!(matches!(err, IndexError::Load(_)));
        assert_eq!(handle.snapshot().await.label(), "failed");
    }

    #[tokio::test]
    async fn populated_store_skips_reindex() {
        let store = Arc::new(MemoryStore::new());
        let first = Indexer::new(
            Arc::new(StaticLoader(segments(2, 100))),
            Arc::new(TrackingEmbedder::default()),
            store.clone(),
            controls(ReindexPolicy::IfStale),
        );
        first.index().await.expect("first run");

        let embedder = Arc::new(TrackingEmbedder::default());
        let second = Indexer::new(
            Arc::new(StaticLoader(segments(2, 100))),
            embedder.clone(),
            store.clone(),
            controls(ReindexPolicy::IfStale),
        );
        let handle = IndexHandle::new();
        let report = second.run(&handle).await.expect("second run");

        assert!(report.skipped);
        assert_eq!(report.chunks, 2);
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
        assert!(handle.ready_store().await.is_some());
    }

    #[tokio::test]
    async fn partial_write_is_redone_on_next_start() {
        let store = Arc::new(BatchedStore::failing_batch(2, 1));
        let first = Indexer::new(
            Arc::new(StaticLoader(segments(5, 100))),
            Arc::new(TrackingEmbedder::default()),
            store.clone(),
            controls(ReindexPolicy::IfStale),
        );
        let handle = IndexHandle::new();
        let err = first.run(&handle).await.expect_err("second batch fails");
        assert!(matches!(err, IndexError::StoreWrite(_)));
        assert_eq!(store.record_count().await.unwrap(), 2);
        assert_eq!(store.read_marker().await.unwrap(), None);
        assert_eq!(handle.snapshot().await.label(), "failed");

        let embedder = Arc::new(TrackingEmbedder::default());
        let second = Indexer::new(
            Arc::new(StaticLoader(segments(5, 100))),
            embedder.clone(),
            store.clone(),
            controls(ReindexPolicy::IfStale),
        );
        let handle = IndexHandle::new();
        let report = second.run(&handle).await.expect("rerun completes");
        assert!(!report.skipped);
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 5);
        assert_eq!(store.record_count().await.unwrap(), 5);
        assert!(store.read_marker().await.unwrap().is_some());

        let third = Indexer::new(
            Arc::new(StaticLoader(segments(5, 100))),
            Arc::new(TrackingEmbedder::default()),
            store.clone(),
            controls(ReindexPolicy::IfStale),
        );
        assert!(third.index().await.expect("third run").skipped);
    }

    #[tokio::test]
    async fn changed_model_or_document_forces_reindex() {
        let store = Arc::new(MemoryStore::new());
        let indexer = |pages: Vec<Segment>, embedder: Arc<TrackingEmbedder>| {
            Indexer::new(
                Arc::new(StaticLoader(pages)),
                embedder,
                store.clone(),
                controls(ReindexPolicy::IfStale),
            )
        };
        indexer(segments(2, 100), Arc::new(TrackingEmbedder::default()))
            .index()
            .await
            .expect("first run");

        let new_model = Arc::new(TrackingEmbedder {
            model: Some("tracking-v2"),
            ..TrackingEmbedder::default()
        });
        let report = indexer(segments(2, 100), new_model.clone())
            .index()
            .await
            .expect("model change");
        assert!(!report.skipped);
        assert_eq!(new_model.calls.load(Ordering::SeqCst), 2);

        let edited = Arc::new(TrackingEmbedder {
            model: Some("tracking-v2"),
            ..TrackingEmbedder::default()
        });
        let report = indexer(segments(2, 101), edited.clone())
            .index()
            .await
            .expect("document change");
        assert!(!report.skipped);
        assert_eq!(edited.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn fingerprint_tracks_model_content_and_windows() {
        let pages = segments(2, 10);
        let base = IndexFingerprint::new("m", &pages, 2, ChunkingControls::default());
        assert_eq!(
            base,
            IndexFingerprint::new("m", &pages, 2, ChunkingControls::default())
        );
        assert_ne!(
            base,
            IndexFingerprint::new("other", &pages, 2, ChunkingControls::default())
        );
        assert_ne!(
            base,
            IndexFingerprint::new("m", &segments(2, 11), 2, ChunkingControls::default())
        );
        let narrow = ChunkingControls::new(500, 100).unwrap();
        assert_ne!(base, IndexFingerprint::new("m", &pages, 2, narrow));
        assert!(base.to_string().starts_with("model=m;crc32="));
    }

    #[tokio::test]
    async fn reindex_always_overwrites_by_id() {
        let store = Arc::new(MemoryStore::new());
        for _ in 0..2 {
            let indexer = Indexer::new(
                Arc::new(StaticLoader(segments(3, 1_500))),
                Arc::new(TrackingEmbedder::default()),
                store.clone(),
                controls(ReindexPolicy::Always),
            );
            indexer.index().await.expect("run");
        }
        assert_eq!(store.record_count().await.unwrap(), 6);
    }

    #[tokio::test]
    async fn second_run_on_same_handle_is_skipped() {
        let indexer = Indexer::new(
            Arc::new(StaticLoader(segments(1, 10))),
            Arc::new(TrackingEmbedder::default()),
            Arc::new(MemoryStore::new()),
            controls(ReindexPolicy::Always),
        );
        let handle = IndexHandle::new();
        indexer.run(&handle).await.expect("first run");
        let report = indexer.run(&handle).await.expect("second run");
        assert!(report.skipped);
    }

    #[test]
    fn record_ids_are_stable() {
        let chunk = Chunk {
            source: PathBuf::from("./docs/envirotest.pdf"),
            page: 3,
            chunk_id: 2,
            text: String::new(),
            char_start: 0,
            char_end: 0,
        };
        assert_eq!(record_id(&chunk), "envirotest-p3-c2");
    }
}
