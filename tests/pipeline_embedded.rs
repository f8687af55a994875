//! End-to-end pipeline tests against the embedded store with deterministic
//! mock embeddings: ingest → search → parent resolution → reset.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tempfile::TempDir;

use docrag::config::{BackendKind, Backends, EmbeddedStoreConfig};
use docrag::embeddings::{EmbeddingProvider, MockEmbeddingProvider};
use docrag::engine::{Engine, QueryMode, SearchSettings};
use docrag::ingestion::Indexer;
use docrag::rerank::{RerankedCandidate, Reranker};
use docrag::retrieval::{Retriever, SearchParams};
use docrag::splitter::{SplitConfig, TextSplitter};
use docrag::stores::{FieldFilter, SqliteVectorIndex, VectorIndex};
use docrag::types::{index_name_for_model, Document, DocLevel, Page, RagError};

fn init_tracing() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        let subscriber = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .finish();
        let _ = tracing::subscriber::set_global_default(subscriber);
    });
}

fn page_text(sentence: &str, repeats: usize) -> String {
    vec![sentence; repeats].join(" ")
}

/// Three pages of distinct topical text, each well under the parent chunk
/// size, so the parent pass yields exactly one parent per page.
fn sample_document() -> Document {
    Document::new(
        "greenenergy.txt",
        vec![
            Page::new(
                page_text("Solar panels convert sunlight into electricity.", 18),
                1,
            ),
            Page::new(
                page_text("Wind turbines harvest kinetic energy from moving air.", 16),
                2,
            ),
            Page::new(
                page_text("Hydroelectric dams store potential energy in reservoirs.", 15),
                3,
            ),
        ],
    )
}

async fn open_index(dir: &TempDir, name: &str) -> Arc<dyn VectorIndex> {
    init_tracing();
    Arc::new(
        SqliteVectorIndex::open(dir.path().join("chunks.sqlite"), name, 8)
            .await
            .unwrap(),
    )
}

fn mock_embedder() -> Arc<dyn EmbeddingProvider> {
    Arc::new(MockEmbeddingProvider::new())
}

#[tokio::test]
async fn ingest_writes_parents_plus_children() {
    let dir = tempfile::tempdir().unwrap();
    let index = open_index(&dir, "docs-test").await;
    let document = sample_document();

    let report = Indexer::new(index.clone(), mock_embedder())
        .ingest(&document)
        .await
        .unwrap();

    assert_eq!(report.parent_count, 3);
    assert_eq!(
        report.chunks_written,
        report.parent_count + report.child_count
    );

    // The child count matches an independent re-run of the two splitting
    // passes.
    let parents = TextSplitter::new(SplitConfig::parent()).split_document(&document);
    let child_splitter = TextSplitter::new(SplitConfig::child());
    let expected_children: usize = parents
        .iter()
        .map(|parent| child_splitter.split_text(&parent.text).len())
        .sum();
    assert_eq!(report.child_count, expected_children);
}

#[tokio::test]
async fn children_link_back_to_their_parent() {
    let dir = tempfile::tempdir().unwrap();
    let index = open_index(&dir, "docs-test").await;
    let embedder = mock_embedder();
    let document = sample_document();

    Indexer::new(index.clone(), embedder.clone())
        .ingest(&document)
        .await
        .unwrap();

    let probe = embedder.embed("Wind turbines").await.unwrap();
    let hits = index
        .search(&probe, 50, Some(&FieldFilter::child_level()))
        .await
        .unwrap();
    assert!(!hits.is_empty());

    for hit in hits {
        assert_eq!(hit.metadata.doc_level, DocLevel::Child);
        let parent_id = hit.metadata.parent_doc_id.expect("child without parent id");
        let parent = index.get_by_id(&parent_id).await.unwrap();
        assert_eq!(parent.metadata.doc_level, DocLevel::Parent);
        assert!(parent.metadata.parent_doc_id.is_none());
        // Children are carved out of their parent's text.
        assert!(parent.text.contains(&hit.text));
        assert_eq!(parent.metadata.source, "greenenergy.txt");
    }
}

#[tokio::test]
async fn query_resolves_to_one_parent_with_page_attribution() {
    let dir = tempfile::tempdir().unwrap();
    let index = open_index(&dir, "docs-test").await;
    let embedder = mock_embedder();
    let document = sample_document();

    Indexer::new(index.clone(), embedder.clone())
        .ingest(&document)
        .await
        .unwrap();

    // Query with the exact text of a child carved from the page-2 parent;
    // the mock embedder maps identical text to identical vectors, so this
    // child is the top similarity hit.
    let page_two_text = document.pages[1].text.clone();
    let child_query = TextSplitter::new(SplitConfig::child())
        .split_text(&page_two_text)
        .remove(0)
        .text;

    let results = Retriever::new(index.clone(), embedder.clone())
        .search(&child_query)
        .await
        .unwrap();

    assert!(!results.is_empty());
    assert!(results.len() <= SearchParams::default().k);
    assert_eq!(results[0].source, "Page 2 of greenenergy.txt");
    assert_eq!(results[0].content, page_two_text);

    // Multiple matching children of the same parent collapse to a single
    // result.
    let mut sources: Vec<&str> = results.iter().map(|r| r.content.as_str()).collect();
    sources.sort_unstable();
    let before = sources.len();
    sources.dedup();
    assert_eq!(sources.len(), before, "duplicate parent in results");
}

#[tokio::test]
async fn reset_leaves_index_absent_and_queries_empty() {
    let dir = tempfile::tempdir().unwrap();
    let index = open_index(&dir, "docs-test").await;
    let embedder = mock_embedder();

    Indexer::new(index.clone(), embedder.clone())
        .ingest(&sample_document())
        .await
        .unwrap();
    assert!(index.index_exists().await.unwrap());

    assert!(index.delete_index().await.unwrap());
    assert!(!index.index_exists().await.unwrap());
    // Idempotent: a second delete is a no-op, not an error.
    assert!(!index.delete_index().await.unwrap());

    let results = Retriever::new(index.clone(), embedder)
        .search("anything at all")
        .await
        .unwrap();
    assert!(results.is_empty());
}

#[tokio::test]
async fn store_assigns_ids_in_input_order() {
    let dir = tempfile::tempdir().unwrap();
    let index = open_index(&dir, "docs-test").await;
    index.ensure_index().await.unwrap();

    let chunks: Vec<docrag::types::EmbeddedChunk> = (0..4)
        .map(|i| docrag::types::EmbeddedChunk {
            chunk: docrag::types::Chunk::parent(format!("chunk number {i}"), "order.txt", 1),
            embedding: vec![i as f32; 8],
        })
        .collect();

    let ids = index.add_chunks(&chunks).await.unwrap();
    assert_eq!(ids.len(), 4);

    for (i, id) in ids.iter().enumerate() {
        let stored = index.get_by_id(id).await.unwrap();
        assert_eq!(stored.text, format!("chunk number {i}"));
    }

    let missing = index.get_by_id("no-such-id").await.unwrap_err();
    assert!(matches!(missing, RagError::NotFound(_)));
}

struct ReverseReranker;

#[async_trait]
impl Reranker for ReverseReranker {
    async fn rerank(
        &self,
        _query: &str,
        documents: &[String],
    ) -> Result<Vec<RerankedCandidate>, RagError> {
        Ok((0..documents.len())
            .rev()
            .map(|index| RerankedCandidate {
                index,
                score: 1.0 - index as f32 * 0.1,
            })
            .collect())
    }
}

struct DropAllReranker;

#[async_trait]
impl Reranker for DropAllReranker {
    async fn rerank(
        &self,
        _query: &str,
        _documents: &[String],
    ) -> Result<Vec<RerankedCandidate>, RagError> {
        Ok(Vec::new())
    }
}

#[tokio::test]
async fn reranked_results_are_a_subset_of_the_mmr_pool() {
    let dir = tempfile::tempdir().unwrap();
    let index = open_index(&dir, "docs-test").await;
    let embedder = mock_embedder();
    Indexer::new(index.clone(), embedder.clone())
        .ingest(&sample_document())
        .await
        .unwrap();

    let plain = Retriever::new(index.clone(), embedder.clone())
        .search("kinetic energy from moving air")
        .await
        .unwrap();
    let reranked = Retriever::new(index.clone(), embedder.clone())
        .with_reranker(Arc::new(ReverseReranker))
        .search("kinetic energy from moving air")
        .await
        .unwrap();

    // Reranking may reorder or drop, never invent.
    let plain_contents: Vec<&str> = plain.iter().map(|r| r.content.as_str()).collect();
    for result in &reranked {
        assert!(plain_contents.contains(&result.content.as_str()));
    }

    // A reranker that drops every candidate yields an empty result set,
    // not an error.
    let dropped = Retriever::new(index, embedder)
        .with_reranker(Arc::new(DropAllReranker))
        .search("kinetic energy from moving air")
        .await
        .unwrap();
    assert!(dropped.is_empty());
}

#[tokio::test]
async fn engine_round_trip_over_the_embedded_backend() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("engine.sqlite");

    // A three-page file using form feeds as page breaks.
    let file_path = dir.path().join("greenenergy.txt");
    let document = sample_document();
    let raw: Vec<String> = document.pages.iter().map(|p| p.text.clone()).collect();
    tokio::fs::write(&file_path, raw.join("\u{c}")).await.unwrap();

    let engine = Engine::new(Backends::embedded(EmbeddedStoreConfig::new(&db_path)))
        .with_embedding_provider(mock_embedder());

    let summary = engine
        .ingest(
            &[PathBuf::from(&file_path)],
            "mock-model",
            "local",
            BackendKind::Embedded,
        )
        .await
        .unwrap();
    assert!(summary.chunks_written > 3);

    let settings = SearchSettings {
        embedding_model: "mock-model".to_string(),
        region: "local".to_string(),
        backend: BackendKind::Embedded,
    };
    // Exact text of a child carved from the page-3 parent; identical text
    // maps to an identical mock vector, making it the top hit.
    let child_query = TextSplitter::new(SplitConfig::child())
        .split_text(&document.pages[2].text)
        .remove(0)
        .text;
    let results = engine
        .query(&child_query, QueryMode::Rag, &settings, None)
        .await
        .unwrap();
    assert!(!results.is_empty());
    assert_eq!(results[0].source, "Page 3 of greenenergy.txt");

    // Results serialize as the JSON array the gateway expects.
    let json = serde_json::to_value(&results).unwrap();
    assert!(json.as_array().unwrap()[0]["content"].is_string());
    assert!(json.as_array().unwrap()[0]["source"].is_string());

    let reset = engine
        .reset_index("mock-model", BackendKind::Embedded)
        .await
        .unwrap();
    assert!(reset.deleted);
    let reset_again = engine
        .reset_index("mock-model", BackendKind::Embedded)
        .await
        .unwrap();
    assert!(!reset_again.deleted);

    // Queries after a reset are empty, not errors.
    let empty = engine
        .query("wind", QueryMode::Rag, &settings, None)
        .await
        .unwrap();
    assert!(empty.is_empty());

    // The engine derives the same index name on every path.
    assert_eq!(index_name_for_model("mock-model"), "docs-mockmodel");
}
