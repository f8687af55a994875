//! Optional second-pass relevance scoring over retrieved candidates.
//!
//! A [`Reranker`] takes the query and the candidate texts and returns a
//! reordered, possibly smaller, set of indices into the candidates. It can
//! drop and reorder but never invent: every returned index refers to an
//! input candidate. Absence of a reranker is a valid configuration and the
//! retriever keeps the diversity-sampled order.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use url::Url;

use crate::types::RagError;

pub const DEFAULT_RERANK_ENDPOINT: &str = "https://api.cohere.com/v2/rerank";
pub const DEFAULT_RERANK_MODEL: &str = "rerank-v3.5";

/// One reranked candidate: its position in the input plus the relevance
/// score assigned by the scoring model.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RerankedCandidate {
    pub index: usize,
    pub score: f32,
}

/// Relevance-scoring capability over `(query, candidates)`.
#[async_trait]
pub trait Reranker: Send + Sync {
    /// Score `documents` against `query`, most relevant first.
    ///
    /// Implementations may drop candidates; indices out of range are a
    /// contract violation and are discarded by callers.
    async fn rerank(
        &self,
        query: &str,
        documents: &[String],
    ) -> Result<Vec<RerankedCandidate>, RagError>;
}

/// Reranker backed by a hosted scoring service speaking the Cohere v2
/// rerank shape.
#[derive(Clone, Debug)]
pub struct HttpReranker {
    client: Client,
    endpoint: Url,
    api_key: String,
    model: String,
    top_n: Option<usize>,
}

#[derive(Deserialize)]
struct RerankResponse {
    results: Vec<RerankResult>,
}

#[derive(Deserialize)]
struct RerankResult {
    index: usize,
    relevance_score: f32,
}

impl HttpReranker {
    pub fn new(api_key: impl Into<String>) -> Result<Self, RagError> {
        let endpoint = Url::parse(DEFAULT_RERANK_ENDPOINT)
            .map_err(|err| RagError::Configuration(err.to_string()))?;
        let client = Client::builder()
            .use_rustls_tls()
            .build()
            .map_err(|err| RagError::Configuration(err.to_string()))?;
        Ok(Self {
            client,
            endpoint,
            api_key: api_key.into(),
            model: DEFAULT_RERANK_MODEL.to_string(),
            top_n: None,
        })
    }

    #[must_use]
    pub fn with_endpoint(mut self, endpoint: Url) -> Self {
        self.endpoint = endpoint;
        self
    }

    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Cap the number of candidates the service returns.
    #[must_use]
    pub fn with_top_n(mut self, top_n: usize) -> Self {
        self.top_n = Some(top_n);
        self
    }
}

#[async_trait]
impl Reranker for HttpReranker {
    async fn rerank(
        &self,
        query: &str,
        documents: &[String],
    ) -> Result<Vec<RerankedCandidate>, RagError> {
        if documents.is_empty() {
            return Ok(Vec::new());
        }

        let mut body = json!({
            "model": self.model,
            "query": query,
            "documents": documents,
        });
        if let Some(top_n) = self.top_n {
            body["top_n"] = json!(top_n);
        }

        let response = self
            .client
            .post(self.endpoint.clone())
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|err| RagError::UpstreamUnavailable(format!("reranker: {err}")))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(RagError::UpstreamUnavailable(format!(
                "reranker returned {status}: {detail}"
            )));
        }

        let parsed: RerankResponse = response
            .json()
            .await
            .map_err(|err| RagError::UpstreamUnavailable(format!("rerank response: {err}")))?;

        Ok(parsed
            .results
            .into_iter()
            .filter(|result| result.index < documents.len())
            .map(|result| RerankedCandidate {
                index: result.index,
                score: result.relevance_score,
            })
            .collect())
    }
}
