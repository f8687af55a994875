//! Vector index backends.
//!
//! One capability trait, [`VectorIndex`], abstracts the persistence layer so
//! ingestion and retrieval never branch on the backend kind; the only place
//! that knows about concrete adapters is the [`connect`] factory.
//!
//! ```text
//!                  ┌──────────────────┐
//!                  │ VectorIndex trait│
//!                  │ create / exists  │
//!                  │ delete / add     │
//!                  │ search / get     │
//!                  └────────┬─────────┘
//!                           │
//!              ┌────────────┴────────────┐
//!              ▼                         ▼
//!     ┌─────────────────┐      ┌─────────────────┐
//!     │   OpenSearch    │      │    Embedded     │
//!     │  (REST + knn)   │      │  (sqlite-vec)   │
//!     └─────────────────┘      └─────────────────┘
//! ```
//!
//! Contract invariants shared by all adapters:
//!
//! - `add_chunks` is order-preserving: the i-th returned id belongs to the
//!   i-th input chunk.
//! - `ensure_index` and `delete_index` are idempotent; deleting an absent
//!   index is a no-op, not an error.
//! - `search` returns hits carrying their stored embeddings so diversity
//!   selection can run backend-independently.

pub mod opensearch;
pub mod sqlite;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::BackendConfig;
use crate::types::{EmbeddedChunk, RagError, SearchHit, StoredChunk};

pub use opensearch::OpenSearchIndex;
pub use sqlite::SqliteVectorIndex;

/// Structured equality filter applied to chunk metadata during search.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldFilter {
    pub field: String,
    pub value: String,
}

impl FieldFilter {
    pub fn equals(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Restrict search to child-level chunks, the searchable embedding
    /// units.
    pub fn child_level() -> Self {
        Self::equals("doc_level", "child")
    }
}

/// Polymorphic capability over a named chunk collection with vectors.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Name of the collection this handle is bound to.
    fn index_name(&self) -> &str;

    /// Create the index if it does not exist. Idempotent.
    async fn ensure_index(&self) -> Result<(), RagError>;

    async fn index_exists(&self) -> Result<bool, RagError>;

    /// Drop the whole collection. Returns `false` when it was absent.
    async fn delete_index(&self) -> Result<bool, RagError>;

    /// Persist chunks with their embeddings, returning backend-assigned ids
    /// in input order.
    async fn add_chunks(&self, chunks: &[EmbeddedChunk]) -> Result<Vec<String>, RagError>;

    /// Nearest-neighbor search over stored embeddings, most similar first.
    async fn search(
        &self,
        query: &[f32],
        k: usize,
        filter: Option<&FieldFilter>,
    ) -> Result<Vec<SearchHit>, RagError>;

    /// Point lookup by id, projecting text and provenance metadata (not the
    /// vector). Unknown ids are [`RagError::NotFound`].
    async fn get_by_id(&self, id: &str) -> Result<StoredChunk, RagError>;

    /// Batch lookup preserving the order of `ids`. Backends without a
    /// native batch fetch fall back to point lookups.
    async fn get_by_ids(&self, ids: &[String]) -> Result<Vec<StoredChunk>, RagError> {
        let mut chunks = Vec::with_capacity(ids.len());
        for id in ids {
            chunks.push(self.get_by_id(id).await?);
        }
        Ok(chunks)
    }
}

/// Resolve a backend configuration into a live index handle.
///
/// This is the only place that maps backend kinds to adapters; everything
/// above it works in terms of `dyn VectorIndex`.
pub async fn connect(
    config: &BackendConfig,
    index_name: &str,
    dimensions: usize,
) -> Result<Arc<dyn VectorIndex>, RagError> {
    match config {
        BackendConfig::OpenSearch(cfg) => Ok(Arc::new(OpenSearchIndex::new(
            cfg.clone(),
            index_name,
            dimensions,
        )?)),
        BackendConfig::Embedded(cfg) => Ok(Arc::new(
            SqliteVectorIndex::open(&cfg.db_path, index_name, dimensions).await?,
        )),
    }
}
