//! Embedding capability: text in, vector out.
//!
//! The engine treats embedding-model invocation as an opaque capability
//! behind [`EmbeddingProvider`]. The remote implementation speaks the
//! bedrock-runtime invoke API for the supported model families; the mock
//! produces deterministic hash-derived vectors for offline runs and tests.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use url::Url;

use crate::types::RagError;

/// Embedding models the engine knows how to invoke, with their output
/// dimensionality.
const SUPPORTED_MODELS: [(&str, WireFormat, usize); 3] = [
    ("amazon.titan-embed-text-v2:0", WireFormat::Titan, 1024),
    ("cohere.embed-english-v3", WireFormat::Cohere, 1024),
    ("cohere.embed-multilingual-v3", WireFormat::Cohere, 1024),
];

/// Request/response shape of a model family.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum WireFormat {
    /// `{"inputText": …}` → `{"embedding": […]}`, one text per call.
    Titan,
    /// `{"texts": […], …}` → `{"embeddings": [[…], …]}`.
    Cohere,
}

/// Output dimensionality of a supported embedding model.
///
/// The same table drives [`RemoteEmbeddingProvider`] construction; an
/// unknown model is a [`RagError::Configuration`].
pub fn embedding_dimensions(model: &str) -> Result<usize, RagError> {
    SUPPORTED_MODELS
        .iter()
        .find(|(id, _, _)| *id == model)
        .map(|(_, _, dimensions)| *dimensions)
        .ok_or_else(|| RagError::Configuration(format!("unsupported embedding model '{model}'")))
}

/// Text-to-vector capability.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Identifier of the underlying model.
    fn model_id(&self) -> &str;

    /// Output vector dimensionality; the index schema must match.
    fn dimensions(&self) -> usize;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, RagError>;

    /// Embed many texts, preserving input order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RagError> {
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            vectors.push(self.embed(text).await?);
        }
        Ok(vectors)
    }
}

/// Embedding provider that invokes a hosted model over HTTP.
#[derive(Clone, Debug)]
pub struct RemoteEmbeddingProvider {
    client: Client,
    endpoint: Url,
    model: String,
    wire: WireFormat,
    dimensions: usize,
}

#[derive(Deserialize)]
struct TitanEmbedResponse {
    embedding: Vec<f32>,
}

#[derive(Deserialize)]
struct CohereEmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

impl RemoteEmbeddingProvider {
    /// Build a provider for a supported model in the given region.
    ///
    /// An unknown model identifier is a [`RagError::Configuration`]; this is
    /// the single authority on which embedding models the engine accepts.
    pub fn for_model(model: &str, region: &str) -> Result<Self, RagError> {
        let endpoint = format!("https://bedrock-runtime.{region}.amazonaws.com/model/{model}/invoke");
        let endpoint = Url::parse(&endpoint)
            .map_err(|err| RagError::Configuration(format!("invalid embedding endpoint: {err}")))?;
        Self::with_endpoint(model, endpoint)
    }

    /// Build a provider for a supported model against an explicit endpoint.
    ///
    /// Used for self-hosted gateways and tests; the wire format still
    /// follows the model family.
    pub fn with_endpoint(model: &str, endpoint: Url) -> Result<Self, RagError> {
        let (_, wire, dimensions) = SUPPORTED_MODELS
            .iter()
            .find(|(id, _, _)| *id == model)
            .ok_or_else(|| {
                RagError::Configuration(format!("unsupported embedding model '{model}'"))
            })?;
        let client = Client::builder()
            .use_rustls_tls()
            .build()
            .map_err(|err| RagError::Configuration(err.to_string()))?;
        Ok(Self {
            client,
            endpoint,
            model: model.to_string(),
            wire: *wire,
            dimensions: *dimensions,
        })
    }

    async fn invoke(&self, body: serde_json::Value) -> Result<serde_json::Value, RagError> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&body)
            .send()
            .await
            .map_err(|err| RagError::UpstreamUnavailable(format!("embedding model: {err}")))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(RagError::UpstreamUnavailable(format!(
                "embedding model returned {status}: {detail}"
            )));
        }
        response
            .json()
            .await
            .map_err(|err| RagError::UpstreamUnavailable(format!("embedding response: {err}")))
    }
}

#[async_trait]
impl EmbeddingProvider for RemoteEmbeddingProvider {
    fn model_id(&self) -> &str {
        &self.model
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, RagError> {
        match self.wire {
            WireFormat::Titan => {
                let value = self.invoke(json!({ "inputText": text })).await?;
                let parsed: TitanEmbedResponse = serde_json::from_value(value).map_err(|err| {
                    RagError::UpstreamUnavailable(format!("embedding response: {err}"))
                })?;
                Ok(parsed.embedding)
            }
            WireFormat::Cohere => {
                let texts = vec![text.to_string()];
                let batch = self.embed_batch(&texts).await?;
                batch.into_iter().next().ok_or_else(|| {
                    RagError::UpstreamUnavailable("embedding model returned no vectors".into())
                })
            }
        }
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RagError> {
        match self.wire {
            // The Titan invoke shape takes one text per call.
            WireFormat::Titan => {
                let mut vectors = Vec::with_capacity(texts.len());
                for text in texts {
                    vectors.push(self.embed(text).await?);
                }
                Ok(vectors)
            }
            WireFormat::Cohere => {
                let value = self
                    .invoke(json!({
                        "texts": texts,
                        "input_type": "search_document",
                        "truncate": "NONE",
                    }))
                    .await?;
                let parsed: CohereEmbedResponse = serde_json::from_value(value).map_err(|err| {
                    RagError::UpstreamUnavailable(format!("embedding response: {err}"))
                })?;
                if parsed.embeddings.len() != texts.len() {
                    return Err(RagError::UpstreamUnavailable(format!(
                        "embedding model returned {} vectors for {} texts",
                        parsed.embeddings.len(),
                        texts.len()
                    )));
                }
                Ok(parsed.embeddings)
            }
        }
    }
}

/// Deterministic embedding provider for tests and offline pipelines.
///
/// Identical texts always map to identical vectors and distinct texts to
/// distinct vectors, which is all the pipeline-level tests need.
#[derive(Clone, Debug)]
pub struct MockEmbeddingProvider {
    dimensions: usize,
}

impl Default for MockEmbeddingProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MockEmbeddingProvider {
    pub fn new() -> Self {
        Self { dimensions: 8 }
    }

    pub fn with_dimensions(dimensions: usize) -> Self {
        Self { dimensions }
    }

    fn hash_to_vec(&self, text: &str) -> Vec<f32> {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let mut hasher = DefaultHasher::new();
        text.hash(&mut hasher);
        let seed = hasher.finish();
        (0..self.dimensions)
            .map(|i| {
                let bits = seed.rotate_left((i as u32 * 8) % 64) ^ ((i as u64) << 24);
                (bits as f32) / u32::MAX as f32
            })
            .collect()
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbeddingProvider {
    fn model_id(&self) -> &str {
        "mock-embed"
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, RagError> {
        Ok(self.hash_to_vec(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_embeddings_are_deterministic() {
        let provider = MockEmbeddingProvider::new();
        let a = provider.embed("hello world").await.unwrap();
        let b = provider.embed("hello world").await.unwrap();
        let c = provider.embed("goodbye world").await.unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), provider.dimensions());
    }

    #[test]
    fn unsupported_model_is_a_configuration_error() {
        let err = RemoteEmbeddingProvider::for_model("no-such-model", "us-east-1").unwrap_err();
        assert!(matches!(err, RagError::Configuration(_)));
    }

    #[test]
    fn supported_models_resolve() {
        let provider =
            RemoteEmbeddingProvider::for_model("amazon.titan-embed-text-v2:0", "us-west-2")
                .unwrap();
        assert_eq!(provider.dimensions(), 1024);
        assert!(provider
            .endpoint
            .as_str()
            .contains("bedrock-runtime.us-west-2.amazonaws.com"));
    }
}
