//! Context assembly — the core architectural component.
//!
//! Turns an inbound message into a [`keepsake_core::PromptSpec`] under a
//! hard token budget:
//!
//! 1. recent history from the store (N configurable)
//! 2. memory facts for the message's extracted subject keys
//! 3. optional live-search augmentation when recency cues are present
//! 4. budget fitting: weighted fragments, lowest weight dropped first,
//!    the current user message never dropped
//!
//! Also houses the token heuristic, durable-fact extraction, and the
//! response post-processor applied before delivery.

mod assembler;
mod budget;
mod extract;
mod postprocess;
pub mod token;

pub use assembler::{AssembledPrompt, AssemblyMetadata, ContextAssembler};
pub use budget::{fit, FittedContext, Fragment};
pub use extract::{subject_keys, wants_live_information, FactExtractor};
pub use postprocess::shorten;
