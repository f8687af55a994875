//! Query-time retrieval: child-level search, diversity sampling, optional
//! reranking, and parent resolution.
//!
//! ```text
//! query text ──► embed ──► child-filtered knn (fetch_k)
//!                               │
//!                               ▼
//!                        mmr::select (k, λ)
//!                               │
//!                   optional reranker (reorder/drop)
//!                               │
//!                               ▼
//!          distinct parent_doc_id (best-child order, deduplicated)
//!                               │
//!                               ▼
//!                 parent fetch ──► QueryResult per parent
//! ```

pub mod mmr;

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::embeddings::EmbeddingProvider;
use crate::rerank::Reranker;
use crate::stores::{FieldFilter, VectorIndex};
use crate::types::{QueryResult, RagError, SearchHit};

/// Knobs for one retrieval pipeline.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SearchParams {
    /// Results selected by MMR.
    pub k: usize,
    /// Over-provisioned candidate pool fetched by pure similarity.
    pub fetch_k: usize,
    /// Relevance/diversity trade-off; 1.0 is pure similarity.
    pub lambda: f32,
}

impl Default for SearchParams {
    fn default() -> Self {
        Self {
            k: 5,
            fetch_k: 20,
            lambda: 0.5,
        }
    }
}

/// Answers one query against one index.
///
/// Retrieval is read-only and safe under unbounded concurrency; every call
/// is all-or-nothing; a failure never yields a partially populated result
/// list.
pub struct Retriever {
    index: Arc<dyn VectorIndex>,
    embedder: Arc<dyn EmbeddingProvider>,
    reranker: Option<Arc<dyn Reranker>>,
    params: SearchParams,
}

impl Retriever {
    pub fn new(index: Arc<dyn VectorIndex>, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            index,
            embedder,
            reranker: None,
            params: SearchParams::default(),
        }
    }

    #[must_use]
    pub fn with_reranker(mut self, reranker: Arc<dyn Reranker>) -> Self {
        self.reranker = Some(reranker);
        self
    }

    #[must_use]
    pub fn with_params(mut self, params: SearchParams) -> Self {
        self.params = params;
        self
    }

    /// Run the full retrieval pipeline for `query`.
    ///
    /// A missing index yields an empty result set, mirroring
    /// create-on-demand elsewhere; so does a reranker that drops every
    /// candidate. Both are deliberate: absence of matches is an answer,
    /// not a failure.
    pub async fn search(&self, query: &str) -> Result<Vec<QueryResult>, RagError> {
        if !self.index.index_exists().await? {
            debug!(index = self.index.index_name(), "index absent, empty result");
            return Ok(Vec::new());
        }

        let query_vector = self.embedder.embed(query).await?;
        let hits = self
            .index
            .search(
                &query_vector,
                self.params.fetch_k,
                Some(&FieldFilter::child_level()),
            )
            .await?;
        if hits.is_empty() {
            return Ok(Vec::new());
        }

        let vectors: Vec<Vec<f32>> = hits.iter().map(|hit| hit.embedding.clone()).collect();
        let order = mmr::select(&query_vector, &vectors, self.params.k, self.params.lambda);
        let candidates: Vec<&SearchHit> = order.iter().map(|&i| &hits[i]).collect();
        debug!(
            index = self.index.index_name(),
            pool = hits.len(),
            selected = candidates.len(),
            "diversity selection complete"
        );

        // (hit, score to report) in final rank order.
        let ranked: Vec<(&SearchHit, Option<f32>)> = match &self.reranker {
            Some(reranker) => {
                let documents: Vec<String> =
                    candidates.iter().map(|hit| hit.text.clone()).collect();
                reranker
                    .rerank(query, &documents)
                    .await?
                    .into_iter()
                    .filter(|entry| entry.index < candidates.len())
                    .map(|entry| (candidates[entry.index], Some(entry.score)))
                    .collect()
            }
            None => candidates
                .iter()
                .map(|hit| (*hit, Some(hit.score)))
                .collect(),
        };

        // Children of the same parent collapse to one lookup, keeping the
        // rank of the best-scoring child.
        let mut seen = HashSet::new();
        let mut parent_ids: Vec<String> = Vec::new();
        let mut parent_scores: Vec<Option<f32>> = Vec::new();
        for (hit, score) in &ranked {
            let Some(parent_id) = &hit.metadata.parent_doc_id else {
                warn!(id = %hit.id, "child hit without parent link, skipping");
                continue;
            };
            if seen.insert(parent_id.clone()) {
                parent_ids.push(parent_id.clone());
                parent_scores.push(*score);
            }
        }
        if parent_ids.is_empty() {
            return Ok(Vec::new());
        }

        let parents = self.index.get_by_ids(&parent_ids).await?;

        Ok(parents
            .into_iter()
            .zip(parent_scores)
            .map(|(parent, score)| QueryResult {
                content: parent.text,
                source: format!("Page {} of {}", parent.metadata.page, parent.metadata.source),
                score,
            })
            .collect())
    }
}
