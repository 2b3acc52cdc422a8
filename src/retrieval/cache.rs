// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Per-session query result cache
//!
//! Exact-match after normalization, unbounded, no expiry. A session rarely
//! issues more than a handful of distinct searches, and repeated searches
//! within one conversation are common enough to be worth short-circuiting.

use std::collections::HashMap;

/// Normalize a query for cache lookup: trim and Unicode-lowercase.
pub fn normalize_query(query: &str) -> String {
    query.trim().to_lowercase()
}

/// Caches formatted search results keyed by normalized query
#[derive(Default)]
pub struct QueryCache {
    entries: HashMap<String, String>,
    hits: u64,
}

impl QueryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a cached result for `query`
    pub fn get(&mut self, query: &str) -> Option<String> {
        let key = normalize_query(query);
        let hit = self.entries.get(&key).cloned();
        if hit.is_some() {
            self.hits += 1;
        }
        hit
    }

    /// Store a result under the normalized form of `query`
    pub fn insert(&mut self, query: &str, result: String) {
        self.entries.insert(normalize_query(query), result);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }
}
