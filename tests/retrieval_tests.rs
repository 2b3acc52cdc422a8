// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Retrieval client tests against a mock search service

use std::time::Duration;

use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use aegis::config::RetrievalConfig;
use aegis::retrieval::RetrievalClient;

fn config_for(mock_uri: &str) -> RetrievalConfig {
    RetrievalConfig {
        base_url: mock_uri.to_string(),
        timeout_secs: 1,
        max_top_k: 10,
        content_char_budget: 8000,
    }
}

#[tokio::test]
async fn successful_search_returns_ranked_results() {
    let mock = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/search"))
        .and(body_partial_json(
            serde_json::json!({"query": "null objects", "top_k": 3}),
        ))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "success": true,
            "results": [
                {"rank": 1, "file": "nulls.md", "content": "Null objects are invisible helpers."},
                {"rank": 2, "file": "parenting.md", "content": "Layers parent to nulls."}
            ],
            "total_results": 2
        })))
        .mount(&mock)
        .await;

    let client = RetrievalClient::new(&config_for(&mock.uri()));
    let outcome = client.search("null objects", 3).await;

    assert!(outcome.success);
    assert_eq!(outcome.results.len(), 2);
    assert_eq!(outcome.results[0].file, "nulls.md");
    assert_eq!(outcome.results[1].rank, 2);
}

#[tokio::test]
async fn top_k_is_clamped_to_the_configured_maximum() {
    let mock = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/search"))
        .and(body_partial_json(serde_json::json!({"top_k": 10})))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({"success": true, "results": []})),
        )
        .expect(1)
        .mount(&mock)
        .await;

    let client = RetrievalClient::new(&config_for(&mock.uri()));
    let outcome = client.search("anything", 500).await;
    assert!(outcome.success);
}

#[tokio::test]
async fn server_error_degrades_without_an_err() {
    let mock = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/search"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&mock)
        .await;

    let client = RetrievalClient::new(&config_for(&mock.uri()));
    let outcome = client.search("anything", 3).await;

    assert!(!outcome.success);
    assert!(outcome.error.as_deref().unwrap().contains("503"));
}

#[tokio::test]
async fn timeout_degrades_without_an_err() {
    let mock = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/search"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({"success": true, "results": []}))
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&mock)
        .await;

    let client = RetrievalClient::new(&config_for(&mock.uri()));
    let outcome = client.search("anything", 3).await;

    assert!(!outcome.success);
    assert!(outcome.error.as_deref().unwrap().contains("timed out"));
}

#[tokio::test]
async fn malformed_body_degrades_without_an_err() {
    let mock = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/search"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&mock)
        .await;

    let client = RetrievalClient::new(&config_for(&mock.uri()));
    let outcome = client.search("anything", 3).await;

    assert!(!outcome.success);
    assert!(outcome.error.as_deref().unwrap().contains("malformed"));
}

#[tokio::test]
async fn unreachable_service_degrades_without_an_err() {
    // Nothing listens on this port.
    let client = RetrievalClient::new(&config_for("http://127.0.0.1:1"));
    let outcome = client.search("anything", 3).await;
    assert!(!outcome.success);
}

#[tokio::test]
async fn health_probe_reflects_service_state() {
    let mock = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200).set_body_json(
            serde_json::json!({"status": "healthy", "rag_available": true}),
        ))
        .mount(&mock)
        .await;

    let client = RetrievalClient::new(&config_for(&mock.uri()));
    assert!(client.is_healthy().await);

    let dead = RetrievalClient::new(&config_for("http://127.0.0.1:1"));
    assert!(!dead.is_healthy().await);
}
