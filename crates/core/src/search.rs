//! Search domain types and the provider seam.
//!
//! The provider chain (structured API, HTML scrape) is a small closed set
//! of variants implementing one [`SearchProvider`] capability, iterated in
//! a fixed priority list by the search engine.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SearchError;

/// A resolved search result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    /// The normalized query this answers.
    pub query: String,

    /// Which provider produced the snippet ("instant_answer", "scrape", "cache").
    pub provider: String,

    /// The answer text, bounded in size by the producing provider.
    pub snippet: String,

    /// True when this was served from an expired cache entry as a
    /// last-resort fallback.
    pub stale: bool,
}

/// The outcome callers see. Network errors are classified as transient
/// inside the search engine and never propagate past it.
#[derive(Debug, Clone)]
pub enum SearchOutcome {
    Found(SearchResult),
    NotFound,
}

impl SearchOutcome {
    pub fn found(&self) -> Option<&SearchResult> {
        match self {
            SearchOutcome::Found(r) => Some(r),
            SearchOutcome::NotFound => None,
        }
    }
}

/// A cached search result row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchCacheEntry {
    pub query_normalized: String,
    pub provider: String,
    pub snippet: String,
    pub fetched_at: DateTime<Utc>,
    pub ttl_seconds: u64,
}

impl SearchCacheEntry {
    /// Whether the entry is still within its TTL at `now`.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        let age = now.signed_duration_since(self.fetched_at);
        age.num_seconds() >= 0 && (age.num_seconds() as u64) < self.ttl_seconds
    }
}

/// Normalize a query for cache keying: lowercase, trimmed, whitespace
/// collapsed, trailing punctuation stripped. No two live entries share
/// a normalized key.
pub fn normalize_query(raw: &str) -> String {
    raw.trim()
        .to_lowercase()
        .trim_end_matches(['?', '!', '.'])
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// One search backend in the fallback chain.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    /// Provider name recorded on results and cache entries.
    fn name(&self) -> &str;

    /// Attempt to answer the query. A single bounded attempt; the chain
    /// applies the timeout and advances on any error.
    async fn resolve(&self, query: &str) -> std::result::Result<SearchResult, SearchError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn normalize_collapses_and_lowercases() {
        assert_eq!(normalize_query("  What's   NEW today?? "), "what's new today");
        assert_eq!(normalize_query("price of gold."), "price of gold");
    }

    #[test]
    fn cache_entry_live_window() {
        let fetched = Utc::now();
        let entry = SearchCacheEntry {
            query_normalized: "q".into(),
            provider: "instant_answer".into(),
            snippet: "s".into(),
            fetched_at: fetched,
            ttl_seconds: 60,
        };
        assert!(entry.is_live(fetched));
        assert!(entry.is_live(fetched + Duration::seconds(59)));
        assert!(!entry.is_live(fetched + Duration::seconds(60)));
        assert!(!entry.is_live(fetched + Duration::seconds(61)));
    }

    #[test]
    fn outcome_accessor() {
        let outcome = SearchOutcome::Found(SearchResult {
            query: "q".into(),
            provider: "p".into(),
            snippet: "s".into(),
            stale: false,
        });
        assert!(outcome.found().is_some());
        assert!(SearchOutcome::NotFound.found().is_none());
    }
}
