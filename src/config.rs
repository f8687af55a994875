//! Backend and engine configuration.
//!
//! Everything is settable in code; `from_env` constructors layer `.env`
//! support (via `dotenvy`) on top for deployments that configure through
//! the environment, matching the way the surrounding gateway passes
//! credentials in.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::types::RagError;

/// Which vector backend an operation should run against.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackendKind {
    /// Hosted inverted-index/vector-search engine (OpenSearch).
    OpenSearch,
    /// Embedded vector store (SQLite + sqlite-vec).
    Embedded,
}

/// Connection settings for the OpenSearch backend.
///
/// The field names mirror the index document layout: the embedding vector,
/// the chunk text, and the metadata object each live under a configurable
/// field.
#[derive(Clone, Debug)]
pub struct OpenSearchConfig {
    pub endpoint: Url,
    pub username: Option<String>,
    pub password: Option<String>,
    pub vector_field: String,
    pub text_field: String,
    pub metadata_field: String,
}

impl OpenSearchConfig {
    pub fn new(endpoint: Url) -> Self {
        Self {
            endpoint,
            username: None,
            password: None,
            vector_field: "vector_field".to_string(),
            text_field: "text".to_string(),
            metadata_field: "metadata".to_string(),
        }
    }

    /// Read `OPENSEARCH_ENDPOINT`, `OPENSEARCH_USER`, and
    /// `OPENSEARCH_PASSWORD`, honoring a `.env` file when present.
    pub fn from_env() -> Result<Self, RagError> {
        dotenvy::dotenv().ok();
        let endpoint = std::env::var("OPENSEARCH_ENDPOINT").map_err(|_| {
            RagError::Configuration("OPENSEARCH_ENDPOINT is not set".to_string())
        })?;
        let endpoint = Url::parse(&endpoint)
            .map_err(|err| RagError::Configuration(format!("OPENSEARCH_ENDPOINT: {err}")))?;
        let mut config = Self::new(endpoint);
        config.username = std::env::var("OPENSEARCH_USER").ok();
        config.password = std::env::var("OPENSEARCH_PASSWORD").ok();
        Ok(config)
    }

    #[must_use]
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }
}

/// Location of the embedded store's database file.
#[derive(Clone, Debug)]
pub struct EmbeddedStoreConfig {
    pub db_path: PathBuf,
}

impl EmbeddedStoreConfig {
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
        }
    }

    /// Read `DOCRAG_DB_PATH`, defaulting to `./docrag.sqlite`.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        let db_path = std::env::var("DOCRAG_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./docrag.sqlite"));
        Self { db_path }
    }
}

/// Configuration for one concrete backend.
#[derive(Clone, Debug)]
pub enum BackendConfig {
    OpenSearch(OpenSearchConfig),
    Embedded(EmbeddedStoreConfig),
}

impl BackendConfig {
    pub fn kind(&self) -> BackendKind {
        match self {
            Self::OpenSearch(_) => BackendKind::OpenSearch,
            Self::Embedded(_) => BackendKind::Embedded,
        }
    }
}

/// Backends the engine can dispatch to.
///
/// Selecting a kind that has no configuration is a
/// [`RagError::Configuration`] at call time.
#[derive(Clone, Debug, Default)]
pub struct Backends {
    pub opensearch: Option<OpenSearchConfig>,
    pub embedded: Option<EmbeddedStoreConfig>,
}

impl Backends {
    pub fn opensearch(config: OpenSearchConfig) -> Self {
        Self {
            opensearch: Some(config),
            embedded: None,
        }
    }

    pub fn embedded(config: EmbeddedStoreConfig) -> Self {
        Self {
            opensearch: None,
            embedded: Some(config),
        }
    }

    #[must_use]
    pub fn with_opensearch(mut self, config: OpenSearchConfig) -> Self {
        self.opensearch = Some(config);
        self
    }

    #[must_use]
    pub fn with_embedded(mut self, config: EmbeddedStoreConfig) -> Self {
        self.embedded = Some(config);
        self
    }

    pub fn resolve(&self, kind: BackendKind) -> Result<BackendConfig, RagError> {
        match kind {
            BackendKind::OpenSearch => self
                .opensearch
                .clone()
                .map(BackendConfig::OpenSearch)
                .ok_or_else(|| {
                    RagError::Configuration("OpenSearch backend is not configured".to_string())
                }),
            BackendKind::Embedded => self
                .embedded
                .clone()
                .map(BackendConfig::Embedded)
                .ok_or_else(|| {
                    RagError::Configuration("embedded backend is not configured".to_string())
                }),
        }
    }
}

/// End-to-end deadlines for the two operation paths.
///
/// Ingestion may chew through many large documents, so its budget is on the
/// order of minutes; a single retrieval call gets a short one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Timeouts {
    pub ingest: Duration,
    pub query: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            ingest: Duration::from_secs(300),
            query: Duration::from_secs(30),
        }
    }
}
