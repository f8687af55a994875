//! Ingestion: turning source documents into persisted parent/child chunks.
//!
//! * [`loader`] — the document-loading capability and a plain-text
//!   implementation.
//! * [`indexer`] — the two-pass chunking and write orchestration.

pub mod indexer;
pub mod loader;

pub use indexer::{IngestReport, Indexer, DEFAULT_CHILD_BATCH};
pub use loader::{DocumentLoader, TextLoader};
