// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Documentation retrieval service client
//!
//! Thin HTTP client for the external search service. Failures never cross
//! this boundary as errors: a timeout, a non-2xx status, or a malformed
//! body all come back as an unsuccessful `SearchOutcome` so the turn loop
//! can degrade to a failed tool result and keep going.

pub mod cache;

pub use cache::{normalize_query, QueryCache};

use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::RetrievalConfig;

/// A single ranked search hit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub rank: u32,
    pub file: String,
    pub content: String,
}

/// What a search attempt produced
///
/// `error` is populated exactly when `success` is false.
#[derive(Debug, Clone)]
pub struct SearchOutcome {
    pub success: bool,
    pub results: Vec<SearchResult>,
    pub error: Option<String>,
}

impl SearchOutcome {
    fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            results: Vec::new(),
            error: Some(message.into()),
        }
    }

    /// Render the outcome as tool-result text for the model
    ///
    /// Combined content is capped at `char_budget` characters, cutting on a
    /// char boundary, so one oversized document cannot flood the context.
    pub fn to_tool_text(&self, char_budget: usize) -> String {
        if !self.success {
            return format!(
                "Documentation search failed: {}",
                self.error.as_deref().unwrap_or("unknown error")
            );
        }
        if self.results.is_empty() {
            return "No matching documentation found.".to_string();
        }

        let mut text = String::new();
        let mut remaining = char_budget;
        for result in &self.results {
            let header = format!("[{}] {}\n", result.rank, result.file);
            if header.len() >= remaining {
                break;
            }
            text.push_str(&header);
            remaining -= header.len();

            let body = truncate_chars(&result.content, remaining);
            remaining -= body.len();
            text.push_str(&body);
            text.push_str("\n\n");
            if remaining == 0 {
                break;
            }
        }
        text.trim_end().to_string()
    }
}

fn truncate_chars(s: &str, max_bytes: usize) -> String {
    if s.len() <= max_bytes {
        return s.to_string();
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}

/// Client for the retrieval search service
pub struct RetrievalClient {
    client: Client,
    base_url: String,
    timeout: Duration,
    max_top_k: u32,
}

impl RetrievalClient {
    pub fn new(config: &RetrievalConfig) -> Self {
        Self {
            client: Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(config.timeout_secs),
            max_top_k: config.max_top_k,
        }
    }

    /// Search the documentation index
    ///
    /// `top_k` is clamped to the configured maximum. This never returns an
    /// error to the caller.
    pub async fn search(&self, query: &str, top_k: u32) -> SearchOutcome {
        let top_k = top_k.clamp(1, self.max_top_k);
        debug!(query, top_k, "retrieval search");

        let response = match self
            .client
            .post(format!("{}/search", self.base_url))
            .timeout(self.timeout)
            .json(&SearchRequest {
                query: query.to_string(),
                top_k,
            })
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "retrieval service unreachable");
                let message = if e.is_timeout() {
                    "search service timed out".to_string()
                } else {
                    format!("search service unreachable: {}", e)
                };
                return SearchOutcome::failed(message);
            }
        };

        if !response.status().is_success() {
            let status = response.status();
            warn!(%status, "retrieval service returned an error status");
            return SearchOutcome::failed(format!("search service returned {}", status));
        }

        let body: SearchResponse = match response.json().await {
            Ok(body) => body,
            Err(e) => {
                warn!(error = %e, "retrieval service returned malformed body");
                return SearchOutcome::failed(format!("malformed search response: {}", e));
            }
        };

        if !body.success {
            return SearchOutcome::failed("search service reported failure");
        }

        SearchOutcome {
            success: true,
            results: body.results,
            error: None,
        }
    }

    /// Probe the service's health endpoint
    pub async fn is_healthy(&self) -> bool {
        match self
            .client
            .get(format!("{}/health", self.base_url))
            .timeout(self.timeout)
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }
}

#[derive(Serialize)]
struct SearchRequest {
    query: String,
    top_k: u32,
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    results: Vec<SearchResult>,
}
