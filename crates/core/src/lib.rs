//! # keepsake Core
//!
//! Domain types, traits, and error definitions for the keepsake
//! persistent-memory and context-assembly engine. This crate carries no
//! storage, HTTP, or runtime machinery beyond `tokio::sync` — it defines
//! the domain model that all other crates implement against.
//!
//! ## Design Philosophy
//!
//! Every external collaborator (search providers, the inference runtime)
//! is defined as a trait here. Implementations live in their respective
//! crates. This enables:
//! - Swapping implementations via configuration
//! - Easy testing with mock/stub implementations
//! - Clean dependency graph (all crates depend inward on core)

pub mod error;
pub mod event;
pub mod exchange;
pub mod fact;
pub mod message;
pub mod prompt;
pub mod rule;
pub mod search;

// Re-export key types at crate root for ergonomics
pub use error::{
    BudgetError, Error, InferenceError, Result, RuleError, SearchError, StorageError,
};
pub use event::{DomainEvent, EventBus};
pub use exchange::Exchange;
pub use fact::MemoryFact;
pub use message::{ChannelId, InboundEvent, Message, Role};
pub use prompt::{InferenceReply, InferenceRuntime, PromptSpec};
pub use rule::AutoReplyRule;
pub use search::{SearchCacheEntry, SearchOutcome, SearchProvider, SearchResult};
