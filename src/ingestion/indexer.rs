//! Two-pass chunking and persistence of a single document.
//!
//! Parent chunks are written first so their backend-assigned ids exist
//! before any child chunk referencing them is produced; this ordering is a
//! hard dependency, not an optimization. Child chunks go out in bounded
//! batches to respect backend payload limits.

use std::sync::Arc;

use tracing::{debug, info};

use crate::embeddings::EmbeddingProvider;
use crate::splitter::{SplitConfig, TextSplitter};
use crate::stores::VectorIndex;
use crate::types::{Chunk, Document, EmbeddedChunk, RagError};

/// Upper bound on chunks per backend write call.
pub const DEFAULT_CHILD_BATCH: usize = 2000;

/// Outcome of one ingestion call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IngestReport {
    /// Parents plus children persisted by this call.
    pub chunks_written: usize,
    pub parent_count: usize,
    pub child_count: usize,
}

/// Writes one document into a vector index as parent and child chunks.
pub struct Indexer {
    index: Arc<dyn VectorIndex>,
    embedder: Arc<dyn EmbeddingProvider>,
    parent_config: SplitConfig,
    child_config: SplitConfig,
    batch_size: usize,
}

impl Indexer {
    pub fn new(index: Arc<dyn VectorIndex>, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            index,
            embedder,
            parent_config: SplitConfig::parent(),
            child_config: SplitConfig::child(),
            batch_size: DEFAULT_CHILD_BATCH,
        }
    }

    #[must_use]
    pub fn with_parent_config(mut self, config: SplitConfig) -> Self {
        self.parent_config = config;
        self
    }

    #[must_use]
    pub fn with_child_config(mut self, config: SplitConfig) -> Self {
        self.child_config = config;
        self
    }

    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Ingest one document: ensure the index, write parents, then write
    /// children carrying their parent's id.
    ///
    /// If the parent write fails nothing else is attempted, so no orphan
    /// children can exist. A failure during the child phase surfaces as
    /// [`RagError::PartialIngest`] with the number of chunks persisted
    /// before the error; already-written batches are left in place.
    pub async fn ingest(&self, document: &Document) -> Result<IngestReport, RagError> {
        self.index.ensure_index().await?;

        let parent_splitter = TextSplitter::new(self.parent_config.clone());
        let parents: Vec<Chunk> = parent_splitter
            .split_document(document)
            .into_iter()
            .map(|span| Chunk::parent(span.text, &document.source, span.page))
            .collect();

        if parents.is_empty() {
            return Ok(IngestReport {
                chunks_written: 0,
                parent_count: 0,
                child_count: 0,
            });
        }

        let parent_texts: Vec<String> = parents.iter().map(|c| c.text.clone()).collect();
        let parent_vectors = self.embedder.embed_batch(&parent_texts).await?;
        let embedded_parents: Vec<EmbeddedChunk> = parents
            .iter()
            .cloned()
            .zip(parent_vectors)
            .map(|(chunk, embedding)| EmbeddedChunk { chunk, embedding })
            .collect();

        let parent_ids = self.index.add_chunks(&embedded_parents).await?;
        debug!(
            index = self.index.index_name(),
            parents = parent_ids.len(),
            "parent chunks written"
        );

        let child_splitter = TextSplitter::new(self.child_config.clone());
        let children: Vec<Chunk> = parents
            .iter()
            .zip(&parent_ids)
            .flat_map(|(parent, parent_id)| {
                child_splitter
                    .split_text(&parent.text)
                    .into_iter()
                    .map(move |span| {
                        Chunk::child(
                            span.text,
                            &parent.metadata.source,
                            parent.metadata.page,
                            parent_id,
                        )
                    })
            })
            .collect();

        let mut written = parent_ids.len();
        let mut child_count = 0usize;
        for batch in children.chunks(self.batch_size) {
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let result = async {
                let vectors = self.embedder.embed_batch(&texts).await?;
                let embedded: Vec<EmbeddedChunk> = batch
                    .iter()
                    .cloned()
                    .zip(vectors)
                    .map(|(chunk, embedding)| EmbeddedChunk { chunk, embedding })
                    .collect();
                self.index.add_chunks(&embedded).await
            }
            .await;

            match result {
                Ok(ids) => {
                    written += ids.len();
                    child_count += ids.len();
                }
                Err(err) => {
                    return Err(RagError::PartialIngest {
                        written,
                        detail: err.to_string(),
                    });
                }
            }
        }

        info!(
            index = self.index.index_name(),
            source = %document.source,
            parents = parent_ids.len(),
            children = child_count,
            "document ingested"
        );

        Ok(IngestReport {
            chunks_written: written,
            parent_count: parent_ids.len(),
            child_count,
        })
    }
}
