//! Wire-level tests for the remote embedding provider and the HTTP
//! reranker, with the upstream services mocked out.

use httpmock::prelude::*;
use serde_json::json;
use url::Url;

use docrag::embeddings::{EmbeddingProvider, RemoteEmbeddingProvider};
use docrag::rerank::{HttpReranker, Reranker};
use docrag::types::RagError;

#[tokio::test]
async fn titan_embedding_round_trip() {
    let server = MockServer::start_async().await;
    let invoke = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/invoke")
                .body_contains("inputText")
                .body_contains("wind turbines");
            then.status(200)
                .json_body(json!({ "embedding": [0.25, 0.5, 0.75, 1.0] }));
        })
        .await;

    let provider = RemoteEmbeddingProvider::with_endpoint(
        "amazon.titan-embed-text-v2:0",
        Url::parse(&server.url("/invoke")).unwrap(),
    )
    .unwrap();

    let vector = provider.embed("wind turbines").await.unwrap();
    assert_eq!(vector, vec![0.25, 0.5, 0.75, 1.0]);
    invoke.assert_async().await;
}

#[tokio::test]
async fn cohere_batch_preserves_input_order() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/invoke")
                .body_contains("\"texts\"")
                .body_contains("search_document");
            then.status(200).json_body(json!({
                "embeddings": [[1.0, 0.0], [0.0, 1.0]]
            }));
        })
        .await;

    let provider = RemoteEmbeddingProvider::with_endpoint(
        "cohere.embed-english-v3",
        Url::parse(&server.url("/invoke")).unwrap(),
    )
    .unwrap();

    let vectors = provider
        .embed_batch(&["first".to_string(), "second".to_string()])
        .await
        .unwrap();
    assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
}

#[tokio::test]
async fn short_embedding_batch_is_upstream_unavailable() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/invoke");
            then.status(200).json_body(json!({ "embeddings": [[1.0, 0.0]] }));
        })
        .await;

    let provider = RemoteEmbeddingProvider::with_endpoint(
        "cohere.embed-english-v3",
        Url::parse(&server.url("/invoke")).unwrap(),
    )
    .unwrap();

    let err = provider
        .embed_batch(&["first".to_string(), "second".to_string()])
        .await
        .unwrap_err();
    assert!(matches!(err, RagError::UpstreamUnavailable(_)));
}

#[tokio::test]
async fn embedding_service_failure_is_upstream_unavailable() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/invoke");
            then.status(503).body("throttled");
        })
        .await;

    let provider = RemoteEmbeddingProvider::with_endpoint(
        "amazon.titan-embed-text-v2:0",
        Url::parse(&server.url("/invoke")).unwrap(),
    )
    .unwrap();

    let err = provider.embed("anything").await.unwrap_err();
    assert!(matches!(err, RagError::UpstreamUnavailable(_)));
}

#[tokio::test]
async fn reranker_reorders_and_discards_out_of_range_indices() {
    let server = MockServer::start_async().await;
    let rerank = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/v2/rerank")
                .body_contains("rerank-v3.5")
                .body_contains("moving air");
            then.status(200).json_body(json!({
                "results": [
                    { "index": 2, "relevance_score": 0.99 },
                    { "index": 0, "relevance_score": 0.42 },
                    { "index": 7, "relevance_score": 0.40 },
                ]
            }));
        })
        .await;

    let reranker = HttpReranker::new("test-key")
        .unwrap()
        .with_endpoint(Url::parse(&server.url("/v2/rerank")).unwrap());

    let documents = vec![
        "solar panels".to_string(),
        "hydroelectric dams".to_string(),
        "wind turbines".to_string(),
    ];
    let ranked = reranker.rerank("moving air", &documents).await.unwrap();

    // Index 7 does not exist in the candidate set and is discarded; the
    // reranker may reorder and drop, never invent.
    assert_eq!(ranked.len(), 2);
    assert_eq!(ranked[0].index, 2);
    assert!((ranked[0].score - 0.99).abs() < 1e-6);
    assert_eq!(ranked[1].index, 0);
    rerank.assert_async().await;
}

#[tokio::test]
async fn reranker_skips_the_wire_for_empty_candidate_sets() {
    let server = MockServer::start_async().await;
    let rerank = server
        .mock_async(|when, then| {
            when.method(POST).path("/v2/rerank");
            then.status(200).json_body(json!({ "results": [] }));
        })
        .await;

    let reranker = HttpReranker::new("test-key")
        .unwrap()
        .with_endpoint(Url::parse(&server.url("/v2/rerank")).unwrap());

    let ranked = reranker.rerank("query", &[]).await.unwrap();
    assert!(ranked.is_empty());
    assert_eq!(rerank.hits_async().await, 0);
}

#[tokio::test]
async fn reranker_failure_is_upstream_unavailable() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/v2/rerank");
            then.status(500).body("internal error");
        })
        .await;

    let reranker = HttpReranker::new("test-key")
        .unwrap()
        .with_endpoint(Url::parse(&server.url("/v2/rerank")).unwrap());

    let err = reranker
        .rerank("query", &["doc".to_string()])
        .await
        .unwrap_err();
    assert!(matches!(err, RagError::UpstreamUnavailable(_)));
}
