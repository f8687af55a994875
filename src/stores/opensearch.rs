//! OpenSearch-backed vector index.
//!
//! Talks the REST API directly: `HEAD`/`PUT`/`DELETE` on the index for
//! lifecycle, `_bulk` for writes, a `knn` query with a `term` filter for
//! search, and `_doc` point lookups with a `_source` projection for parent
//! resolution. The knn mapping is created with the embedding model's
//! dimensionality; a model/index mismatch surfaces as a schema error on the
//! first write, not at creation.

use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde_json::{json, Value};
use tracing::debug;

use crate::config::OpenSearchConfig;
use crate::types::{ChunkMetadata, EmbeddedChunk, RagError, SearchHit, StoredChunk};

use super::{FieldFilter, VectorIndex};

pub struct OpenSearchIndex {
    client: Client,
    config: OpenSearchConfig,
    index: String,
    dimensions: usize,
}

impl OpenSearchIndex {
    pub fn new(
        config: OpenSearchConfig,
        index_name: &str,
        dimensions: usize,
    ) -> Result<Self, RagError> {
        let client = Client::builder()
            .use_rustls_tls()
            .build()
            .map_err(|err| RagError::Configuration(err.to_string()))?;
        Ok(Self {
            client,
            config,
            index: index_name.to_string(),
            dimensions,
        })
    }

    fn url(&self, path: &str) -> String {
        let base = self.config.endpoint.as_str().trim_end_matches('/');
        format!("{base}/{path}")
    }

    fn authed(&self, request: RequestBuilder) -> RequestBuilder {
        match (&self.config.username, &self.config.password) {
            (Some(user), password) => request.basic_auth(user, password.as_deref()),
            _ => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, RagError> {
        self.authed(request)
            .send()
            .await
            .map_err(|err| RagError::Connection(err.to_string()))
    }

    /// Map a non-success response to the error taxonomy.
    async fn fail(&self, response: Response, operation: &str) -> RagError {
        let status = response.status();
        let detail = response.text().await.unwrap_or_default();
        if status == StatusCode::NOT_FOUND {
            RagError::NotFound(format!("{operation} on index '{}'", self.index))
        } else if status == StatusCode::BAD_REQUEST {
            RagError::InvalidArgument(format!("{operation}: {detail}"))
        } else {
            RagError::Storage(format!("{operation} returned {status}: {detail}"))
        }
    }

    /// Index mapping: knn vector of the model's dimensionality plus text and
    /// metadata fields.
    fn mapping(&self) -> Value {
        json!({
            "settings": { "index": { "knn": true } },
            "mappings": {
                "properties": {
                    (self.config.vector_field.as_str()): {
                        "type": "knn_vector",
                        "dimension": self.dimensions,
                    },
                    (self.config.text_field.as_str()): { "type": "text" },
                    (self.config.metadata_field.as_str()): {
                        "properties": {
                            "source": { "type": "keyword" },
                            "page": { "type": "integer" },
                            "doc_level": { "type": "keyword" },
                            "parent_doc_id": { "type": "keyword" },
                        }
                    },
                }
            }
        })
    }

    fn document_body(&self, chunk: &EmbeddedChunk) -> Result<Value, RagError> {
        let metadata = serde_json::to_value(&chunk.chunk.metadata)
            .map_err(|err| RagError::InvalidArgument(err.to_string()))?;
        Ok(json!({
            (self.config.text_field.as_str()): chunk.chunk.text,
            (self.config.vector_field.as_str()): chunk.embedding,
            (self.config.metadata_field.as_str()): metadata,
        }))
    }

    fn parse_hit(&self, hit: &Value) -> Result<SearchHit, RagError> {
        let source = &hit["_source"];
        let metadata: ChunkMetadata =
            serde_json::from_value(source[&self.config.metadata_field].clone())
                .map_err(|err| RagError::Storage(format!("malformed hit metadata: {err}")))?;
        let embedding: Vec<f32> =
            serde_json::from_value(source[&self.config.vector_field].clone())
                .map_err(|err| RagError::Storage(format!("malformed hit vector: {err}")))?;
        Ok(SearchHit {
            id: hit["_id"]
                .as_str()
                .ok_or_else(|| RagError::Storage("hit without _id".into()))?
                .to_string(),
            text: source[&self.config.text_field]
                .as_str()
                .unwrap_or_default()
                .to_string(),
            metadata,
            embedding,
            score: hit["_score"].as_f64().unwrap_or_default() as f32,
        })
    }
}

#[async_trait::async_trait]
impl VectorIndex for OpenSearchIndex {
    fn index_name(&self) -> &str {
        &self.index
    }

    async fn ensure_index(&self) -> Result<(), RagError> {
        if self.index_exists().await? {
            return Ok(());
        }
        debug!(index = %self.index, "creating index");
        let response = self
            .send(
                self.client
                    .put(self.url(&self.index))
                    .json(&self.mapping()),
            )
            .await?;
        if response.status().is_success() {
            return Ok(());
        }
        // A concurrent creator winning the race still satisfies
        // create-if-absent.
        let status = response.status();
        let detail = response.text().await.unwrap_or_default();
        if status == StatusCode::BAD_REQUEST && detail.contains("resource_already_exists_exception")
        {
            return Ok(());
        }
        Err(RagError::Storage(format!(
            "index creation returned {status}: {detail}"
        )))
    }

    async fn index_exists(&self) -> Result<bool, RagError> {
        let response = self.send(self.client.head(self.url(&self.index))).await?;
        match response.status() {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => Err(RagError::Storage(format!(
                "index existence check returned {status}"
            ))),
        }
    }

    async fn delete_index(&self) -> Result<bool, RagError> {
        let response = self.send(self.client.delete(self.url(&self.index))).await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(false),
            status if status.is_success() => Ok(true),
            _ => Err(self.fail(response, "index deletion").await),
        }
    }

    async fn add_chunks(&self, chunks: &[EmbeddedChunk]) -> Result<Vec<String>, RagError> {
        if chunks.is_empty() {
            return Ok(Vec::new());
        }

        let mut body = String::new();
        for chunk in chunks {
            let action = json!({ "index": { "_index": &self.index } });
            body.push_str(&action.to_string());
            body.push('\n');
            body.push_str(&self.document_body(chunk)?.to_string());
            body.push('\n');
        }

        let response = self
            .send(
                self.client
                    .post(self.url("_bulk?refresh=true"))
                    .header("content-type", "application/x-ndjson")
                    .body(body),
            )
            .await?;
        if !response.status().is_success() {
            return Err(self.fail(response, "bulk write").await);
        }

        let parsed: Value = response
            .json()
            .await
            .map_err(|err| RagError::Storage(format!("bulk response: {err}")))?;

        let items = parsed["items"]
            .as_array()
            .ok_or_else(|| RagError::Storage("bulk response without items".into()))?;

        let mut ids = Vec::with_capacity(chunks.len());
        for item in items {
            let entry = &item["index"];
            if let Some(error) = entry.get("error").filter(|e| !e.is_null()) {
                let error_type = error["type"].as_str().unwrap_or_default();
                if error_type.contains("mapper") || error_type.contains("illegal_argument") {
                    return Err(RagError::Schema {
                        index: self.index.clone(),
                        detail: error.to_string(),
                    });
                }
                return Err(RagError::Storage(format!("bulk item failed: {error}")));
            }
            ids.push(
                entry["_id"]
                    .as_str()
                    .ok_or_else(|| RagError::Storage("bulk item without _id".into()))?
                    .to_string(),
            );
        }
        if ids.len() != chunks.len() {
            return Err(RagError::Storage(format!(
                "bulk response had {} items for {} chunks",
                ids.len(),
                chunks.len()
            )));
        }
        debug!(index = %self.index, count = ids.len(), "bulk write complete");
        Ok(ids)
    }

    async fn search(
        &self,
        query: &[f32],
        k: usize,
        filter: Option<&FieldFilter>,
    ) -> Result<Vec<SearchHit>, RagError> {
        let mut knn = json!({
            "vector": query,
            "k": k,
        });
        if let Some(filter) = filter {
            let path = format!("{}.{}", self.config.metadata_field, filter.field);
            knn["filter"] = json!({ "term": { (path): filter.value } });
        }
        let body = json!({
            "size": k,
            "query": { "knn": { (self.config.vector_field.as_str()): knn } },
        });

        let response = self
            .send(
                self.client
                    .post(self.url(&format!("{}/_search", self.index)))
                    .json(&body),
            )
            .await?;
        if !response.status().is_success() {
            return Err(self.fail(response, "search").await);
        }

        let parsed: Value = response
            .json()
            .await
            .map_err(|err| RagError::Storage(format!("search response: {err}")))?;
        let hits = parsed["hits"]["hits"].as_array().cloned().unwrap_or_default();
        hits.iter().map(|hit| self.parse_hit(hit)).collect()
    }

    async fn get_by_id(&self, id: &str) -> Result<StoredChunk, RagError> {
        let projection = format!(
            "{text},{meta}.source,{meta}.page,{meta}.doc_level",
            text = self.config.text_field,
            meta = self.config.metadata_field,
        );
        let response = self
            .send(self.client.get(self.url(&format!(
                "{}/_doc/{}?_source_includes={}",
                self.index, id, projection
            ))))
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(RagError::NotFound(format!(
                "chunk '{id}' in index '{}'",
                self.index
            )));
        }
        if !response.status().is_success() {
            return Err(self.fail(response, "point lookup").await);
        }

        let parsed: Value = response
            .json()
            .await
            .map_err(|err| RagError::Storage(format!("lookup response: {err}")))?;
        let source = &parsed["_source"];
        let metadata: ChunkMetadata =
            serde_json::from_value(source[&self.config.metadata_field].clone())
                .map_err(|err| RagError::Storage(format!("malformed chunk metadata: {err}")))?;
        Ok(StoredChunk {
            id: id.to_string(),
            text: source[&self.config.text_field]
                .as_str()
                .unwrap_or_default()
                .to_string(),
            metadata,
        })
    }
}
