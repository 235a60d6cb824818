//! Prompt assembly pipeline.
//!
//! Gathers candidate context in dependency order, each step with an
//! explicit fallback, then fits everything through the token budget:
//!
//! 1. recent channel history from the store
//! 2. memory facts for the message's subject keys (and its author)
//! 3. live search augmentation when the message carries recency cues;
//!    `NotFound` or timeout degrades to no augmentation
//!
//! The assembler never calls the inference runtime — it returns a
//! `PromptSpec` for the engine to hand off.

use crate::budget::{fit, Fragment};
use crate::extract::{subject_keys, wants_live_information, FactExtractor};
use keepsake_config::{ContextConfig, InferenceConfig};
use keepsake_core::fact::normalize_subject;
use keepsake_core::search::SearchOutcome;
use keepsake_core::{MemoryFact, Message, PromptSpec, Result};
use keepsake_search::SearchEngine;
use keepsake_store::SqliteStore;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

const WEIGHT_HISTORY: i64 = 10;
const WEIGHT_FACT_BASE: i64 = 15;
const WEIGHT_SEARCH: i64 = 30;
const MAX_SUBJECT_KEYS: usize = 5;

/// What each fragment seq refers to, for post-fit bookkeeping.
enum FragmentSource {
    Pinned,
    History,
    Fact(String),
    Search,
}

/// Assembly bookkeeping recorded on the exchange.
#[derive(Debug, Clone)]
pub struct AssemblyMetadata {
    pub prompt_tokens: usize,
    pub truncated: bool,
    pub search_used: bool,
}

/// The assembled prompt plus its metadata.
#[derive(Debug, Clone)]
pub struct AssembledPrompt {
    pub spec: PromptSpec,
    pub metadata: AssemblyMetadata,
}

/// The context assembler.
pub struct ContextAssembler {
    store: Arc<SqliteStore>,
    search: Arc<SearchEngine>,
    context: ContextConfig,
    inference: InferenceConfig,
    extractor: FactExtractor,
}

impl ContextAssembler {
    pub fn new(
        store: Arc<SqliteStore>,
        search: Arc<SearchEngine>,
        context: ContextConfig,
        inference: InferenceConfig,
    ) -> Self {
        Self {
            store,
            search,
            context,
            inference,
            extractor: FactExtractor::new(),
        }
    }

    /// Build the prompt for an inbound message (already persisted).
    ///
    /// Fails only on storage errors or a non-removable budget overflow;
    /// search problems degrade to an unaugmented prompt.
    pub async fn build_prompt(&self, message: &Message) -> Result<AssembledPrompt> {
        let mut fragments = Vec::new();
        let mut sources: HashMap<u64, FragmentSource> = HashMap::new();
        let mut seq: u64 = 0;

        sources.insert(seq, FragmentSource::Pinned);
        fragments.push(Fragment::pinned(seq, self.context.system_text.clone()));
        seq += 1;

        // recent history, oldest first, without the message being answered
        let mut history = self
            .store
            .read_recent(&message.channel_id, self.context.context_messages)
            .await?;
        history.reverse();
        for past in history.iter().filter(|m| m.id != message.id) {
            sources.insert(seq, FragmentSource::History);
            fragments.push(Fragment::removable(
                seq,
                WEIGHT_HISTORY,
                format!("{}: {}", past.author_id, past.content),
            ));
            seq += 1;
        }

        // memory facts, least important first so they drop first
        let mut facts = self.gather_facts(message).await?;
        facts.sort_by(|a, b| a.importance.total_cmp(&b.importance));
        for fact in &facts {
            let weight = WEIGHT_FACT_BASE + (fact.importance * 10.0).round() as i64;
            sources.insert(seq, FragmentSource::Fact(fact.id.clone()));
            fragments.push(Fragment::removable(
                seq,
                weight,
                format!("[memory] {}", fact.content),
            ));
            seq += 1;
        }

        // live search, only when the message asks for something current
        if wants_live_information(&message.content) {
            match self.search.resolve(&message.content).await {
                SearchOutcome::Found(result) => {
                    let label = if result.stale {
                        "[search, possibly outdated]"
                    } else {
                        "[search]"
                    };
                    sources.insert(seq, FragmentSource::Search);
                    fragments.push(Fragment::removable(
                        seq,
                        WEIGHT_SEARCH,
                        format!("{label} {}", result.snippet),
                    ));
                    seq += 1;
                }
                SearchOutcome::NotFound => {
                    debug!(channel = %message.channel_id, "Search found nothing; proceeding without");
                }
            }
        }

        sources.insert(seq, FragmentSource::Pinned);
        fragments.push(Fragment::pinned(seq, message.content.clone()));

        let fitted = fit(fragments, self.context.token_budget)?;

        // refresh last_referenced_at only for facts that made the cut
        let mut context_fragments = Vec::new();
        let mut used_fact_ids = Vec::new();
        let mut search_used = false;
        for fragment in &fitted.fragments {
            match sources.get(&fragment.seq) {
                Some(FragmentSource::Pinned) | None => {}
                Some(FragmentSource::History) => context_fragments.push(fragment.text.clone()),
                Some(FragmentSource::Fact(id)) => {
                    context_fragments.push(fragment.text.clone());
                    used_fact_ids.push(id.clone());
                }
                Some(FragmentSource::Search) => {
                    context_fragments.push(fragment.text.clone());
                    search_used = true;
                }
            }
        }
        if !used_fact_ids.is_empty() {
            if let Err(e) = self.store.touch_facts(&used_fact_ids).await {
                warn!(error = %e, "Failed to refresh fact reference times");
            }
        }

        debug!(
            channel = %message.channel_id,
            prompt_tokens = fitted.total_tokens,
            fragments = context_fragments.len(),
            truncated = fitted.truncated,
            search_used,
            "Prompt assembled"
        );

        Ok(AssembledPrompt {
            spec: PromptSpec {
                system_text: self.context.system_text.clone(),
                context_fragments,
                user_text: message.content.clone(),
                max_response_tokens: self.inference.max_response_tokens,
                temperature: self.inference.temperature,
            },
            metadata: AssemblyMetadata {
                prompt_tokens: fitted.total_tokens,
                truncated: fitted.truncated,
                search_used,
            },
        })
    }

    /// Extract durable facts from the message and persist them.
    /// Returns the extracted facts (already stored).
    pub async fn remember_facts(&self, message: &Message) -> Result<Vec<MemoryFact>> {
        let facts = self.extractor.extract(message);
        for fact in &facts {
            self.store.upsert_fact(fact).await?;
        }
        Ok(facts)
    }

    /// Facts relevant to the message: its subject keys plus its author.
    async fn gather_facts(&self, message: &Message) -> Result<Vec<MemoryFact>> {
        let mut keys = subject_keys(&message.content, MAX_SUBJECT_KEYS);
        let author_key = normalize_subject(&message.author_id);
        if !keys.contains(&author_key) {
            keys.push(author_key);
        }

        let mut facts: Vec<MemoryFact> = Vec::new();
        for key in &keys {
            for fact in self.store.query_facts(key).await? {
                if !facts.iter().any(|f| f.id == fact.id) {
                    facts.push(fact);
                }
            }
        }
        Ok(facts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use keepsake_config::SearchConfig;
    use keepsake_core::search::{SearchProvider, SearchResult};
    use keepsake_core::{InboundEvent, SearchError};
    use std::sync::Mutex;

    struct StaticProvider {
        snippet: Option<String>,
        calls: Mutex<usize>,
    }

    impl StaticProvider {
        fn answering(snippet: &str) -> Arc<Self> {
            Arc::new(Self {
                snippet: Some(snippet.into()),
                calls: Mutex::new(0),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                snippet: None,
                calls: Mutex::new(0),
            })
        }

        fn calls(&self) -> usize {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl SearchProvider for StaticProvider {
        fn name(&self) -> &str {
            "static"
        }

        async fn resolve(&self, query: &str) -> std::result::Result<SearchResult, SearchError> {
            *self.calls.lock().unwrap() += 1;
            match &self.snippet {
                Some(snippet) => Ok(SearchResult {
                    query: query.to_string(),
                    provider: "static".into(),
                    snippet: snippet.clone(),
                    stale: false,
                }),
                None => Err(SearchError::Network("down".into())),
            }
        }
    }

    fn context_config(token_budget: usize) -> ContextConfig {
        ContextConfig {
            token_budget,
            context_messages: 20,
            system_text: "You are keepsake.".into(),
            max_response_length: 2000,
        }
    }

    fn inference_config() -> InferenceConfig {
        InferenceConfig {
            timeout_secs: 60,
            max_response_tokens: 512,
            temperature: 0.7,
        }
    }

    async fn assembler_with(
        provider: Arc<StaticProvider>,
        token_budget: usize,
    ) -> (ContextAssembler, Arc<SqliteStore>) {
        let store = Arc::new(SqliteStore::in_memory().await.unwrap());
        let search_config = SearchConfig {
            provider_timeout_ms: 1000,
            cache_ttl_secs: 900,
            max_snippet_chars: 1200,
        };
        let search = Arc::new(SearchEngine::with_chain(
            store.clone(),
            &search_config,
            vec![provider],
        ));
        (
            ContextAssembler::new(store.clone(), search, context_config(token_budget), inference_config()),
            store,
        )
    }

    async fn persist(store: &SqliteStore, channel: &str, author: &str, content: &str) -> Message {
        let message = Message::from_event(&InboundEvent::new(channel, author, content));
        store.append_message(&message).await.unwrap();
        message
    }

    #[tokio::test]
    async fn history_included_without_the_current_message() {
        let (assembler, store) = assembler_with(StaticProvider::failing(), 4096).await;
        persist(&store, "general", "alice", "how do lifetimes work?").await;
        persist(&store, "general", "agent", "they bound borrows.").await;
        let current = persist(&store, "general", "alice", "and what about variance?").await;

        let assembled = assembler.build_prompt(&current).await.unwrap();
        let joined = assembled.spec.context_fragments.join("\n");
        assert!(joined.contains("how do lifetimes work?"));
        assert!(joined.contains("they bound borrows."));
        assert!(!joined.contains("and what about variance?"));
        assert_eq!(assembled.spec.user_text, "and what about variance?");
        assert!(!assembled.metadata.truncated);
    }

    #[tokio::test]
    async fn relevant_facts_are_included_and_touched() {
        let (assembler, store) = assembler_with(StaticProvider::failing(), 4096).await;
        let fact = MemoryFact::new("berlin", "the user visited Berlin in May");
        store.upsert_fact(&fact).await.unwrap();
        let before = store.query_facts("berlin").await.unwrap()[0].last_referenced_at;

        let current = persist(&store, "general", "alice", "any tips about Berlin?").await;
        let assembled = assembler.build_prompt(&current).await.unwrap();

        let joined = assembled.spec.context_fragments.join("\n");
        assert!(joined.contains("[memory] the user visited Berlin in May"));
        let after = store.query_facts("berlin").await.unwrap()[0].last_referenced_at;
        assert!(after >= before);
    }

    #[tokio::test]
    async fn author_facts_surface_without_being_named() {
        let (assembler, store) = assembler_with(StaticProvider::failing(), 4096).await;
        store
            .upsert_fact(&MemoryFact::new("alice", "alice's name is Alice"))
            .await
            .unwrap();

        let current = persist(&store, "general", "alice", "what do you remember?").await;
        let assembled = assembler.build_prompt(&current).await.unwrap();
        let joined = assembled.spec.context_fragments.join("\n");
        assert!(joined.contains("alice's name is Alice"));
    }

    #[tokio::test]
    async fn recency_cue_triggers_search_augmentation() {
        let provider = StaticProvider::answering("sunny, 22C");
        let (assembler, store) = assembler_with(provider.clone(), 4096).await;
        let current = persist(&store, "general", "alice", "what's the weather today?").await;

        let assembled = assembler.build_prompt(&current).await.unwrap();
        assert!(assembled.metadata.search_used);
        assert!(assembled
            .spec
            .context_fragments
            .iter()
            .any(|f| f.contains("sunny, 22C")));
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn failed_search_degrades_to_unaugmented_prompt() {
        let provider = StaticProvider::failing();
        let (assembler, store) = assembler_with(provider.clone(), 4096).await;
        let current = persist(&store, "general", "alice", "what's the latest on this?").await;

        let assembled = assembler.build_prompt(&current).await.unwrap();
        assert!(!assembled.metadata.search_used);
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn no_search_without_recency_cues() {
        let provider = StaticProvider::answering("unused");
        let (assembler, store) = assembler_with(provider.clone(), 4096).await;
        let current = persist(&store, "general", "alice", "explain trait objects").await;

        let assembled = assembler.build_prompt(&current).await.unwrap();
        assert!(!assembled.metadata.search_used);
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test]
    async fn oversized_context_is_trimmed_to_budget() {
        let (assembler, store) = assembler_with(StaticProvider::failing(), 500).await;
        // ~800 tokens of history
        for i in 0..4 {
            let filler = format!("{i} {}", "word ".repeat(160));
            persist(&store, "general", "alice", &filler).await;
        }
        let current = persist(&store, "general", "alice", "summarize the discussion").await;

        let assembled = assembler.build_prompt(&current).await.unwrap();
        assert!(assembled.metadata.truncated);
        assert!(assembled.metadata.prompt_tokens <= 500);
    }

    #[tokio::test]
    async fn oversized_user_message_is_a_budget_error() {
        let (assembler, store) = assembler_with(StaticProvider::failing(), 100).await;
        let huge = "word ".repeat(200);
        let current = persist(&store, "general", "alice", &huge).await;

        let err = assembler.build_prompt(&current).await.unwrap_err();
        assert!(matches!(err, keepsake_core::Error::Budget(_)));
    }

    #[tokio::test]
    async fn remember_facts_persists_extracted_statements() {
        let (assembler, store) = assembler_with(StaticProvider::failing(), 4096).await;
        let current = persist(&store, "general", "alice", "My name is Alice.").await;

        let facts = assembler.remember_facts(&current).await.unwrap();
        assert_eq!(facts.len(), 1);
        let stored = store.query_facts("alice").await.unwrap();
        assert_eq!(stored.len(), 1);
        assert!(stored[0].content.contains("name is Alice"));
    }
}
