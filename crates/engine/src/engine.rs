//! The turn engine.

use chrono::Utc;
use keepsake_config::{AppConfig, CancellationPolicy};
use keepsake_context::{shorten, token, ContextAssembler};
use keepsake_core::event::{DomainEvent, EventBus};
use keepsake_core::{
    AutoReplyRule, Error, Exchange, InboundEvent, InferenceError, InferenceReply,
    InferenceRuntime, Message, Result, StorageError,
};
use keepsake_rules::{Decision, DecisionEngine, RuleSet};
use keepsake_search::SearchEngine;
use keepsake_store::SqliteStore;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Degraded-service reply when inference or storage stays down.
const APOLOGY: &str =
    "Sorry, I'm having trouble thinking right now. Please try again in a moment.";

/// Reply when the user's own message cannot fit the token budget.
const TOO_LONG: &str =
    "That message is too long for me to take in at once. Could you shorten it?";

/// Pause before the single storage retry.
const STORAGE_RETRY_BACKOFF: Duration = Duration::from_millis(200);

/// What one turn produced.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    /// Outbound text for the gateway. Never empty.
    pub reply: String,

    /// Under the supersede policy, a newer message arrived mid-turn:
    /// the exchange is recorded but this reply should not be delivered.
    pub superseded: bool,

    /// The auto-reply rule that short-circuited the turn, if any.
    pub rule_id: Option<String>,
}

impl TurnOutcome {
    fn plain(reply: impl Into<String>) -> Self {
        Self {
            reply: reply.into(),
            superseded: false,
            rule_id: None,
        }
    }
}

/// Per-channel serialization state.
#[derive(Default)]
struct ChannelState {
    /// Turns for one channel run under this lock, in arrival order.
    lock: tokio::sync::Mutex<()>,
    /// Bumped on every arrival; a turn that finishes behind the counter
    /// has been superseded.
    generation: AtomicU64,
}

/// The turn engine: one inbound event in, one outbound reply out.
pub struct TurnEngine {
    store: Arc<SqliteStore>,
    assembler: ContextAssembler,
    rules: DecisionEngine,
    runtime: Arc<dyn InferenceRuntime>,
    events: EventBus,
    max_response_length: usize,
    inference_timeout: Duration,
    inference_timeout_secs: u64,
    memory: keepsake_config::MemoryConfig,
    cancellation: CancellationPolicy,
    channels: Mutex<HashMap<String, Arc<ChannelState>>>,
}

impl std::fmt::Debug for TurnEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TurnEngine").finish_non_exhaustive()
    }
}

impl TurnEngine {
    /// Construct the full engine: store, migrations, rule seeding, search
    /// chain, assembler. Components come up in dependency order.
    pub async fn new(config: AppConfig, runtime: Arc<dyn InferenceRuntime>) -> Result<Self> {
        let store = Arc::new(SqliteStore::new(&config.store).await?);
        let search = Arc::new(SearchEngine::new(store.clone(), &config.search));
        Self::with_parts(config, store, search, runtime).await
    }

    /// Construct around pre-built store and search (tests use this with
    /// an in-memory store and a mock provider chain).
    pub async fn with_parts(
        config: AppConfig,
        store: Arc<SqliteStore>,
        search: Arc<SearchEngine>,
        runtime: Arc<dyn InferenceRuntime>,
    ) -> Result<Self> {
        let seeded: Vec<AutoReplyRule> = config
            .rules
            .seed
            .iter()
            .map(|s| AutoReplyRule {
                id: s.id.clone(),
                trigger_pattern: s.trigger_pattern.clone(),
                response_template: s.response_template.clone(),
                priority: s.priority,
                cooldown_seconds: s.cooldown_seconds.unwrap_or(config.rules.default_cooldown_secs),
                enabled: true,
            })
            .collect();
        store.seed_rules(&seeded).await?;

        // Conflicts are fatal here, at load, never at runtime.
        let rule_set = RuleSet::load(store.load_rules().await?)?;
        info!(rules = rule_set.active_count(), "Rule set loaded");

        let assembler = ContextAssembler::new(
            store.clone(),
            search,
            config.context.clone(),
            config.inference.clone(),
        );

        Ok(Self {
            store,
            assembler,
            rules: DecisionEngine::new(rule_set),
            runtime,
            events: EventBus::default(),
            max_response_length: config.context.max_response_length,
            inference_timeout: Duration::from_secs(config.inference.timeout_secs),
            inference_timeout_secs: config.inference.timeout_secs,
            memory: config.memory.clone(),
            cancellation: config.cancellation,
            channels: Mutex::new(HashMap::new()),
        })
    }

    /// Observe domain events (tests, telemetry).
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DomainEvent>> {
        self.events.subscribe()
    }

    /// Release the connection pool. Outstanding provider calls are
    /// dropped with their turns.
    pub async fn shutdown(&self) {
        self.store.close().await;
    }

    /// Process one inbound event to completion.
    ///
    /// Always yields a non-empty reply: failures degrade into apologies,
    /// never a hang or a fault visible to the gateway.
    pub async fn handle_event(&self, event: InboundEvent) -> TurnOutcome {
        self.events.publish(DomainEvent::MessageReceived {
            channel: event.channel_id.0.clone(),
            author_id: event.author_id.clone(),
            timestamp: Utc::now(),
        });

        let message = Message::from_event(&event);
        let state = self.channel_state(&message.channel_id.0);

        // Register this arrival before queueing on the channel lock so
        // an in-flight turn can observe that it has been superseded.
        let my_generation = state.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let _serialized = state.lock.lock().await;

        let mut outcome = self.run_turn(&message).await;

        if self.cancellation == CancellationPolicy::Supersede
            && state.generation.load(Ordering::SeqCst) > my_generation
        {
            debug!(channel = %message.channel_id, "Turn superseded; reply discarded");
            outcome.superseded = true;
        }
        outcome
    }

    /// One turn, already serialized for its channel.
    async fn run_turn(&self, message: &Message) -> TurnOutcome {
        // The inbound message lands first; re-deliveries hash to the
        // same ID and are ignored by the append.
        if let Err(e) = with_storage_retry(|| self.store.append_message(message)).await {
            return self.degrade(message, format!("storage: {e}"), APOLOGY);
        }

        if let Decision::Match { rule_id, reply } = self.rules.evaluate(message) {
            return self.finish_auto_reply(message, rule_id, reply).await;
        }

        let assembled = match self.assembler.build_prompt(message).await {
            Ok(assembled) => assembled,
            Err(Error::Budget(e)) => {
                return self.degrade(message, format!("budget: {e}"), TOO_LONG);
            }
            Err(e) => {
                return self.degrade(message, format!("assembly: {e}"), APOLOGY);
            }
        };
        self.events.publish(DomainEvent::PromptAssembled {
            channel: message.channel_id.0.clone(),
            prompt_tokens: assembled.metadata.prompt_tokens,
            truncated: assembled.metadata.truncated,
            search_used: assembled.metadata.search_used,
            timestamp: Utc::now(),
        });

        let reply = match self.generate_with_retry(&assembled.spec).await {
            Ok(reply) => reply,
            Err(e) => {
                // No fabricated response is persisted.
                return self.degrade(message, format!("inference: {e}"), APOLOGY);
            }
        };

        let text = shorten(&reply.text, self.max_response_length);
        let response = Message::agent_reply(message.channel_id.clone(), text.clone());
        let exchange = Exchange {
            request_message_id: message.id.clone(),
            response_message_id: response.id.clone(),
            prompt_token_count: assembled.metadata.prompt_tokens,
            response_token_count: reply.tokens_generated as usize,
            truncated: assembled.metadata.truncated,
            search_used: assembled.metadata.search_used,
        };
        if let Err(e) =
            with_storage_retry(|| self.store.record_exchange(&response, &exchange)).await
        {
            return self.degrade(message, format!("record: {e}"), APOLOGY);
        }
        self.events.publish(DomainEvent::ExchangeRecorded {
            channel: message.channel_id.0.clone(),
            request_message_id: exchange.request_message_id.clone(),
            response_message_id: exchange.response_message_id.clone(),
            timestamp: Utc::now(),
        });

        self.memory_upkeep(message).await;

        TurnOutcome {
            reply: text,
            superseded: false,
            rule_id: None,
        }
    }

    /// Record and deliver a rule-based reply. The model is never invoked.
    async fn finish_auto_reply(
        &self,
        message: &Message,
        rule_id: String,
        reply: String,
    ) -> TurnOutcome {
        let text = shorten(&reply, self.max_response_length);
        let response = Message::agent_reply(message.channel_id.clone(), text.clone());
        let exchange =
            Exchange::auto_reply(&message.id, &response.id, token::estimate_tokens(&text));
        if let Err(e) =
            with_storage_retry(|| self.store.record_exchange(&response, &exchange)).await
        {
            return self.degrade(message, format!("record: {e}"), APOLOGY);
        }

        self.events.publish(DomainEvent::AutoReplied {
            channel: message.channel_id.0.clone(),
            rule_id: rule_id.clone(),
            timestamp: Utc::now(),
        });
        self.events.publish(DomainEvent::ExchangeRecorded {
            channel: message.channel_id.0.clone(),
            request_message_id: exchange.request_message_id.clone(),
            response_message_id: exchange.response_message_id.clone(),
            timestamp: Utc::now(),
        });

        TurnOutcome {
            reply: text,
            superseded: false,
            rule_id: Some(rule_id),
        }
    }

    /// One bounded inference attempt, retried once on failure.
    async fn generate_with_retry(
        &self,
        spec: &keepsake_core::PromptSpec,
    ) -> std::result::Result<InferenceReply, InferenceError> {
        match self.generate_once(spec).await {
            Ok(reply) => Ok(reply),
            Err(first) => {
                warn!(runtime = self.runtime.name(), error = %first, "Inference failed; retrying once");
                self.generate_once(spec).await
            }
        }
    }

    async fn generate_once(
        &self,
        spec: &keepsake_core::PromptSpec,
    ) -> std::result::Result<InferenceReply, InferenceError> {
        match tokio::time::timeout(self.inference_timeout, self.runtime.generate(spec.clone()))
            .await
        {
            Ok(Ok(reply)) if reply.text.trim().is_empty() => Err(InferenceError::EmptyResponse),
            Ok(result) => result,
            Err(_) => Err(InferenceError::Timeout {
                timeout_secs: self.inference_timeout_secs,
            }),
        }
    }

    /// Post-exchange maintenance: extract durable facts, then decay and
    /// evict. Failures here never fail the turn.
    async fn memory_upkeep(&self, message: &Message) {
        if let Err(e) = self.assembler.remember_facts(message).await {
            warn!(error = %e, "Fact extraction failed");
        }
        match self.store.decay_and_evict_facts(&self.memory).await {
            Ok(0) => {}
            Ok(removed) => debug!(removed, "Fact maintenance swept"),
            Err(e) => warn!(error = %e, "Fact maintenance failed"),
        }
    }

    fn degrade(&self, message: &Message, reason: String, reply: &str) -> TurnOutcome {
        warn!(channel = %message.channel_id, reason, "Turn degraded");
        self.events.publish(DomainEvent::TurnDegraded {
            channel: message.channel_id.0.clone(),
            reason,
            timestamp: Utc::now(),
        });
        TurnOutcome::plain(reply)
    }

    fn channel_state(&self, channel: &str) -> Arc<ChannelState> {
        let mut map = self.channels.lock().unwrap();
        map.entry(channel.to_string())
            .or_insert_with(|| Arc::new(ChannelState::default()))
            .clone()
    }
}

/// Run a storage operation, retrying once after a short backoff.
async fn with_storage_retry<T, F, Fut>(op: F) -> std::result::Result<T, StorageError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = std::result::Result<T, StorageError>>,
{
    match op().await {
        Ok(value) => Ok(value),
        Err(first) => {
            warn!(error = %first, "Storage operation failed; retrying once");
            tokio::time::sleep(STORAGE_RETRY_BACKOFF).await;
            op().await
        }
    }
}
