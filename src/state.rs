//! Process-wide handle to the vector store and its indexing lifecycle.

use std::fmt;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::vector_store::VectorStore;

/// Lifecycle of the shared store handle.
///
/// Only `Uninitialized -> Indexing -> Ready | Failed` transitions are accepted.
#[derive(Clone, Default)]
pub enum IndexState {
    /// Indexing has not started.
    #[default]
    Uninitialized,
    /// The pipeline is loading, embedding or writing.
    Indexing,
    /// The store is populated and may be queried.
    Ready(Arc<dyn VectorStore>),
    /// Indexing aborted; the reason is kept for `/status` and logs.
    Failed(String),
}

impl IndexState {
    /// Short lowercase label used in status payloads.
    pub fn label(&self) -> &'static str {
        match self {
            IndexState::Uninitialized => "uninitialized",
            IndexState::Indexing => "indexing",
            IndexState::Ready(_) => "ready",
            IndexState::Failed(_) => "failed",
        }
    }
}

impl fmt::Debug for IndexState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexState::Failed(reason) => f.debug_tuple("Failed").field(reason).finish(),
            other => f.write_str(other.label()),
        }
    }
}

/// Shared cell holding the [`IndexState`]; cloning shares the same cell.
#[derive(Clone, Default)]
pub struct IndexHandle {
    inner: Arc<RwLock<IndexState>>,
}

impl IndexHandle {
    /// Creates a handle in the `Uninitialized` state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a handle that is already `Ready` with the given store.
    pub fn ready(store: Arc<dyn VectorStore>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(IndexState::Ready(store))),
        }
    }

    /// The store to query, or `None` while the index is not usable.
    ///
    /// This is the only accessor the query path consults.
    pub async fn ready_store(&self) -> Option<Arc<dyn VectorStore>> {
        match &*self.inner.read().await {
            IndexState::Ready(store) => Some(Arc::clone(store)),
            _ => None,
        }
    }

    /// Snapshot of the current state.
    pub async fn snapshot(&self) -> IndexState {
        self.inner.read().await.clone()
    }

    /// Moves `Uninitialized -> Indexing`. Returns false if indexing already started.
    pub async fn begin_indexing(&self) -> bool {
        let mut guard = self.inner.write().await;
        if matches!(*guard, IndexState::Uninitialized) {
            *guard = IndexState::Indexing;
            true
        } else {
            false
        }
    }

    /// Moves `Indexing -> Ready`. Returns false from any other state.
    pub async fn mark_ready(&self, store: Arc<dyn VectorStore>) -> bool {
        let mut guard = self.inner.write().await;
        if matches!(*guard, IndexState::Indexing) {
            *guard = IndexState::Ready(store);
            true
        } else {
            false
        }
    }

    /// Moves `Indexing -> Failed`. Returns false from any other state.
    pub async fn mark_failed(&self, reason: impl Into<String>) -> bool {
        let mut guard = self.inner.write().await;
        if matches!(*guard, IndexState::Indexing) {
            *guard = IndexState::Failed(reason.into());
            true
        } else {
            false
        }
    }
}
