//! Hierarchical chunking and retrieval engine for document RAG.
//!
//! ```text
//! Files ──► ingestion::loader ──► Document (pages)
//!                                     │
//!                    splitter (parent pass, 1500/300)
//!                                     │
//!              parent chunks ──► stores::VectorIndex ──► parent ids
//!                                     │
//!                    splitter (child pass, 400/40)
//!                                     │
//!     child chunks (+ parent_doc_id) ──► stores::VectorIndex
//!
//! Query ──► embeddings ──► child-filtered knn ──► retrieval::mmr
//!                                                     │
//!                                          optional rerank capability
//!                                                     │
//!                              parent resolution ──► QueryResult set
//! ```
//!
//! The backends (a hosted OpenSearch index and an embedded
//! SQLite/sqlite-vec store) sit behind one capability trait; embedding
//! models and rerankers are opaque capabilities behind their own traits.
//! [`engine::Engine`] is the surface the surrounding gateway calls.

pub mod config;
pub mod embeddings;
pub mod engine;
pub mod ingestion;
pub mod rerank;
pub mod retrieval;
pub mod splitter;
pub mod stores;
pub mod types;

pub use config::{BackendConfig, BackendKind, Backends, EmbeddedStoreConfig, OpenSearchConfig};
pub use engine::{Engine, IngestSummary, QueryMode, ResetOutcome, SearchSettings};
pub use types::{index_name_for_model, QueryResult, RagError};
