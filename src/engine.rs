//! The operation surface the surrounding gateway calls into.
//!
//! Three operations, all deriving the index name through the same pure
//! function so ingest, query, and reset can never disagree about which
//! collection a model maps to:
//!
//! - [`Engine::ingest`] — load files, chunk, embed, persist.
//! - [`Engine::reset_index`] — idempotent full drop of a model's index.
//! - [`Engine::query`] — the retrieval pipeline, JSON-serializable output.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;
use url::Url;

use crate::config::{BackendKind, Backends, Timeouts};
use crate::embeddings::{EmbeddingProvider, RemoteEmbeddingProvider};
use crate::ingestion::{DocumentLoader, Indexer, TextLoader};
use crate::rerank::HttpReranker;
use crate::retrieval::{Retriever, SearchParams};
use crate::stores::{self, VectorIndex};
use crate::types::{index_name_for_model, QueryResult, RagError};

/// Chat modes the engine answers; only retrieval-augmented search is
/// handled here.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueryMode {
    #[serde(rename = "RAG")]
    Rag,
}

/// Per-query settings passed by the caller.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SearchSettings {
    pub embedding_model: String,
    pub region: String,
    pub backend: BackendKind,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestSummary {
    pub chunks_written: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResetOutcome {
    pub deleted: bool,
}

/// Engine facade over the chunking/retrieval core.
pub struct Engine {
    backends: Backends,
    timeouts: Timeouts,
    search_params: SearchParams,
    loader: Arc<dyn DocumentLoader>,
    /// Caller-owned embedding capability; bypasses the remote provider.
    embedder_override: Option<Arc<dyn EmbeddingProvider>>,
    embedding_endpoint: Option<Url>,
    rerank_endpoint: Option<Url>,
}

impl Engine {
    pub fn new(backends: Backends) -> Self {
        Self {
            backends,
            timeouts: Timeouts::default(),
            search_params: SearchParams::default(),
            loader: Arc::new(TextLoader),
            embedder_override: None,
            embedding_endpoint: None,
            rerank_endpoint: None,
        }
    }

    #[must_use]
    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    #[must_use]
    pub fn with_search_params(mut self, params: SearchParams) -> Self {
        self.search_params = params;
        self
    }

    #[must_use]
    pub fn with_loader(mut self, loader: Arc<dyn DocumentLoader>) -> Self {
        self.loader = loader;
        self
    }

    /// Use a caller-provided embedding capability instead of invoking the
    /// hosted model.
    #[must_use]
    pub fn with_embedding_provider(mut self, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedder_override = Some(embedder);
        self
    }

    /// Route embedding invocations to an explicit endpoint (self-hosted
    /// gateway or test double).
    #[must_use]
    pub fn with_embedding_endpoint(mut self, endpoint: Url) -> Self {
        self.embedding_endpoint = Some(endpoint);
        self
    }

    /// Route rerank calls to an explicit endpoint.
    #[must_use]
    pub fn with_rerank_endpoint(mut self, endpoint: Url) -> Self {
        self.rerank_endpoint = Some(endpoint);
        self
    }

    fn embedder(&self, model: &str, region: &str) -> Result<Arc<dyn EmbeddingProvider>, RagError> {
        if let Some(embedder) = &self.embedder_override {
            return Ok(embedder.clone());
        }
        let provider = match &self.embedding_endpoint {
            Some(endpoint) => RemoteEmbeddingProvider::with_endpoint(model, endpoint.clone())?,
            None => RemoteEmbeddingProvider::for_model(model, region)?,
        };
        Ok(Arc::new(provider))
    }

    async fn index_for(
        &self,
        backend: BackendKind,
        model: &str,
        dimensions: usize,
    ) -> Result<Arc<dyn VectorIndex>, RagError> {
        let config = self.backends.resolve(backend)?;
        stores::connect(&config, &index_name_for_model(model), dimensions).await
    }

    /// Ingest `files` into the index derived from `model`.
    ///
    /// Documents are processed one at a time: parent writes must complete
    /// before child writes begin, and interleaving two documents on the
    /// same write path would break partial-failure accounting. A failure
    /// mid-run reports the total number of chunks persisted across all
    /// files before the error.
    pub async fn ingest(
        &self,
        files: &[PathBuf],
        model: &str,
        region: &str,
        backend: BackendKind,
    ) -> Result<IngestSummary, RagError> {
        let embedder = self.embedder(model, region)?;
        let index = self.index_for(backend, model, embedder.dimensions()).await?;
        let indexer = Indexer::new(index, embedder);

        let work = async {
            let mut total = 0usize;
            for file in files {
                let document = self.loader.load(file).await?;
                match indexer.ingest(&document).await {
                    Ok(report) => total += report.chunks_written,
                    Err(RagError::PartialIngest { written, detail }) => {
                        return Err(RagError::PartialIngest {
                            written: total + written,
                            detail,
                        });
                    }
                    Err(err) => return Err(err),
                }
            }
            Ok(total)
        };

        let chunks_written = deadline(self.timeouts.ingest, "ingestion", work).await?;
        info!(model, chunks_written, "ingestion complete");
        Ok(IngestSummary { chunks_written })
    }

    /// Drop the index derived from `model`. Idempotent: resetting an absent
    /// index reports `deleted: false` rather than failing.
    pub async fn reset_index(
        &self,
        model: &str,
        backend: BackendKind,
    ) -> Result<ResetOutcome, RagError> {
        let dimensions = match &self.embedder_override {
            Some(embedder) => embedder.dimensions(),
            None => crate::embeddings::embedding_dimensions(model)?,
        };
        let index = self.index_for(backend, model, dimensions).await?;
        let deleted = index.delete_index().await?;
        info!(model, deleted, "index reset");
        Ok(ResetOutcome { deleted })
    }

    /// Answer a query in RAG mode, returning parent chunks with source
    /// attribution, ready to serialize as a JSON array.
    pub async fn query(
        &self,
        text: &str,
        mode: QueryMode,
        settings: &SearchSettings,
        rerank_api_key: Option<&str>,
    ) -> Result<Vec<QueryResult>, RagError> {
        let QueryMode::Rag = mode;

        let embedder = self.embedder(&settings.embedding_model, &settings.region)?;
        let index = self
            .index_for(
                settings.backend,
                &settings.embedding_model,
                embedder.dimensions(),
            )
            .await?;

        let mut retriever = Retriever::new(index, embedder).with_params(self.search_params);
        if let Some(api_key) = rerank_api_key {
            let mut reranker = HttpReranker::new(api_key)?;
            if let Some(endpoint) = &self.rerank_endpoint {
                reranker = reranker.with_endpoint(endpoint.clone());
            }
            retriever = retriever.with_reranker(Arc::new(reranker));
        }

        deadline(self.timeouts.query, "query", retriever.search(text)).await
    }
}

/// Apply an end-to-end deadline to an operation path.
async fn deadline<T>(
    limit: Duration,
    operation: &str,
    work: impl std::future::Future<Output = Result<T, RagError>>,
) -> Result<T, RagError> {
    tokio::time::timeout(limit, work)
        .await
        .map_err(|_| {
            RagError::UpstreamUnavailable(format!(
                "{operation} exceeded its {}s deadline",
                limit.as_secs()
            ))
        })?
}
