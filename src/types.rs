//! Core data model and error taxonomy for the retrieval engine.
//!
//! The types here flow through every stage of the pipeline:
//!
//! ```text
//! Document ──► splitter ──► Chunk ──► EmbeddedChunk ──► VectorIndex
//!                                                           │
//! QueryResult ◄── retrieval ◄── SearchHit / StoredChunk ◄───┘
//! ```
//!
//! Everything is value-typed and serializable; errors are values too and are
//! never used for normal control flow.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Errors surfaced by the chunking and retrieval engine.
///
/// The taxonomy separates fatal configuration problems from transient
/// upstream failures so callers can apply their own retry policy:
///
/// - [`Configuration`](Self::Configuration) — unsupported backend/model or
///   missing credentials; fatal, never retried internally.
/// - [`UpstreamUnavailable`](Self::UpstreamUnavailable) — the embedding
///   model or reranker could not be reached; the caller decides on retries.
/// - [`Connection`](Self::Connection) — the vector backend is unreachable.
/// - [`Schema`](Self::Schema) — embedding dimensionality does not match the
///   index mapping; requires a reset before re-ingestion.
/// - [`PartialIngest`](Self::PartialIngest) — some chunks were persisted
///   before a batch write failed; no rollback is attempted.
/// - [`NotFound`](Self::NotFound) — a missing id or index where the caller
///   asked for a specific record.
#[derive(Debug, thiserror::Error)]
pub enum RagError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("backend connection failed: {0}")]
    Connection(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("schema mismatch for index '{index}': {detail}")]
    Schema { index: String, detail: String },

    #[error("partial ingest: {written} chunks persisted before failure: {detail}")]
    PartialIngest { written: usize, detail: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("io error: {0}")]
    Io(String),
}

impl From<std::io::Error> for RagError {
    fn from(err: std::io::Error) -> Self {
        RagError::Io(err.to_string())
    }
}

impl From<reqwest::Error> for RagError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_connect() || err.is_timeout() {
            RagError::Connection(err.to_string())
        } else {
            RagError::Storage(err.to_string())
        }
    }
}

/// One page of a source document: raw text plus its 1-based page number.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub text: String,
    pub number: u32,
}

impl Page {
    pub fn new(text: impl Into<String>, number: u32) -> Self {
        Self {
            text: text.into(),
            number,
        }
    }
}

/// An ordered sequence of pages loaded from a single source file.
///
/// Immutable once loaded; owned transiently by the indexer during one
/// ingestion call.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    /// Originating file name, carried into every chunk as `source`.
    pub source: String,
    pub pages: Vec<Page>,
}

impl Document {
    pub fn new(source: impl Into<String>, pages: Vec<Page>) -> Self {
        Self {
            source: source.into(),
            pages,
        }
    }
}

/// Granularity of a persisted chunk.
///
/// Parent chunks are the coarse, answerable units; child chunks are the
/// fine-grained units actually searched at query time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocLevel {
    Parent,
    Child,
}

impl fmt::Display for DocLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Parent => write!(f, "parent"),
            Self::Child => write!(f, "child"),
        }
    }
}

/// Provenance and linkage metadata attached to every chunk.
///
/// Invariant: `parent_doc_id` is `Some` exactly when `doc_level` is
/// [`DocLevel::Child`], and it names a parent chunk written to the same
/// index in the same ingestion call. Parent chunks never reference a parent.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    /// Originating file name.
    pub source: String,
    /// 1-based page number the chunk starts on.
    pub page: u32,
    pub doc_level: DocLevel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_doc_id: Option<String>,
}

/// A contiguous span of document text, not yet persisted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub text: String,
    pub metadata: ChunkMetadata,
}

impl Chunk {
    /// Create a parent-level chunk.
    pub fn parent(text: impl Into<String>, source: impl Into<String>, page: u32) -> Self {
        Self {
            text: text.into(),
            metadata: ChunkMetadata {
                source: source.into(),
                page,
                doc_level: DocLevel::Parent,
                parent_doc_id: None,
            },
        }
    }

    /// Create a child-level chunk owned by the parent with `parent_doc_id`.
    pub fn child(
        text: impl Into<String>,
        source: impl Into<String>,
        page: u32,
        parent_doc_id: impl Into<String>,
    ) -> Self {
        Self {
            text: text.into(),
            metadata: ChunkMetadata {
                source: source.into(),
                page,
                doc_level: DocLevel::Child,
                parent_doc_id: Some(parent_doc_id.into()),
            },
        }
    }
}

/// A chunk paired with its embedding vector, ready for `add`.
#[derive(Clone, Debug)]
pub struct EmbeddedChunk {
    pub chunk: Chunk,
    pub embedding: Vec<f32>,
}

/// A chunk as returned from the index by a point lookup.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StoredChunk {
    /// Backend-assigned identifier, unique within the index.
    pub id: String,
    pub text: String,
    pub metadata: ChunkMetadata,
}

/// One similarity-search candidate.
///
/// Carries its stored embedding so diversity selection can run without a
/// second backend round-trip, regardless of whether the backend supports
/// anything beyond plain nearest-neighbor search.
#[derive(Clone, Debug)]
pub struct SearchHit {
    pub id: String,
    pub text: String,
    pub metadata: ChunkMetadata,
    pub embedding: Vec<f32>,
    /// Backend similarity score, higher is more similar.
    pub score: f32,
}

/// A retrieval answer: one parent chunk with its source attribution.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub content: String,
    /// Human-readable attribution, `"Page {page} of {source}"`.
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f32>,
}

/// Derives the index name for an embedding model identifier.
///
/// The convention is shared byte-for-byte by ingestion, query, and reset so
/// the three paths can never drift apart: lowercase the model id, strip
/// everything that is not ASCII alphanumeric, prefix `docs-`.
///
/// ```
/// use docrag::types::index_name_for_model;
///
/// assert_eq!(index_name_for_model("Titan Embed v2"), "docs-titanembedv2");
/// assert_eq!(
///     index_name_for_model("amazon.titan-embed-text-v2:0"),
///     "docs-amazontitanembedtextv20"
/// );
/// ```
#[must_use]
pub fn index_name_for_model(model: &str) -> String {
    let suffix: String = model
        .to_lowercase()
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .collect();
    format!("docs-{suffix}")
}
