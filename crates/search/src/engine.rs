//! The provider fallback chain with read-through caching.
//!
//! Attempt order: live cache → each provider in sequence (bounded
//! timeout per attempt, warn and advance on failure) → stale cache →
//! `NotFound`. Successful provider results are written back to the cache
//! with the configured TTL.

use chrono::Utc;
use keepsake_config::SearchConfig;
use keepsake_core::search::{normalize_query, SearchOutcome, SearchProvider, SearchResult};
use keepsake_core::{SearchCacheEntry, SearchError};
use keepsake_store::SqliteStore;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// The search fallback engine.
pub struct SearchEngine {
    store: Arc<SqliteStore>,
    chain: Vec<Arc<dyn SearchProvider>>,
    provider_timeout: Duration,
    cache_ttl_secs: u64,
}

impl SearchEngine {
    /// Build the engine with the standard two-provider chain.
    pub fn new(store: Arc<SqliteStore>, config: &SearchConfig) -> Self {
        let chain: Vec<Arc<dyn SearchProvider>> = vec![
            Arc::new(crate::InstantAnswerProvider::new(config.max_snippet_chars)),
            Arc::new(crate::ScrapeProvider::new(config.max_snippet_chars)),
        ];
        Self::with_chain(store, config, chain)
    }

    /// Build the engine with an explicit provider chain (tests).
    pub fn with_chain(
        store: Arc<SqliteStore>,
        config: &SearchConfig,
        chain: Vec<Arc<dyn SearchProvider>>,
    ) -> Self {
        Self {
            store,
            chain,
            provider_timeout: Duration::from_millis(config.provider_timeout_ms),
            cache_ttl_secs: config.cache_ttl_secs,
        }
    }

    /// Resolve a query. Never fails: transient conditions collapse into
    /// `SearchOutcome::NotFound`.
    pub async fn resolve(&self, query: &str) -> SearchOutcome {
        let normalized = normalize_query(query);
        if normalized.is_empty() {
            return SearchOutcome::NotFound;
        }

        // (a) live cache entry wins outright
        let cached = self.cache_lookup(&normalized).await;
        if let Some(entry) = &cached {
            if entry.is_live(Utc::now()) {
                debug!(query = %normalized, "Search served from cache");
                return SearchOutcome::Found(SearchResult {
                    query: normalized,
                    provider: "cache".into(),
                    snippet: entry.snippet.clone(),
                    stale: false,
                });
            }
        }

        // (b)/(c) provider chain, in order, one bounded attempt each
        for (i, provider) in self.chain.iter().enumerate() {
            let name = provider.name().to_string();
            info!(
                provider = %name,
                attempt = i + 1,
                total = self.chain.len(),
                "Search: trying provider"
            );

            match tokio::time::timeout(self.provider_timeout, provider.resolve(&normalized)).await {
                Ok(Ok(result)) => {
                    self.write_back(&normalized, &result).await;
                    return SearchOutcome::Found(result);
                }
                Ok(Err(e)) => {
                    warn!(provider = %name, error = %e, "Search: provider failed, trying next");
                }
                Err(_) => {
                    let e = SearchError::Timeout {
                        provider: name.clone(),
                        timeout_ms: self.provider_timeout.as_millis() as u64,
                    };
                    warn!(provider = %name, error = %e, "Search: provider timed out, trying next");
                }
            }
        }

        // (d) stale cache entry beats failing outright
        if let Some(entry) = cached {
            info!(query = %normalized, "Search: serving stale cache entry");
            return SearchOutcome::Found(SearchResult {
                query: normalized,
                provider: entry.provider,
                snippet: entry.snippet,
                stale: true,
            });
        }

        SearchOutcome::NotFound
    }

    /// Cache lookup. Storage failures degrade to a miss — search must
    /// never surface errors.
    async fn cache_lookup(&self, normalized: &str) -> Option<SearchCacheEntry> {
        match self.store.cache_get(normalized).await {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "Search cache lookup failed; treating as miss");
                None
            }
        }
    }

    /// Write a fresh provider result back to the cache.
    async fn write_back(&self, normalized: &str, result: &SearchResult) {
        let entry = SearchCacheEntry {
            query_normalized: normalized.to_string(),
            provider: result.provider.clone(),
            snippet: result.snippet.clone(),
            fetched_at: Utc::now(),
            ttl_seconds: self.cache_ttl_secs,
        };
        if let Err(e) = self.store.cache_put(&entry).await {
            warn!(error = %e, "Search cache write-back failed");
        }
    }
}
