//! Prompt specification and the inference runtime seam.
//!
//! The context assembler produces a [`PromptSpec`]; the external LLM
//! runtime consumes it through the [`InferenceRuntime`] trait. The engine
//! never talks to a model API directly.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::InferenceError;

/// The assembled prompt handed to the inference runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptSpec {
    /// System instructions (identity, rules). Never trimmed.
    pub system_text: String,

    /// Ordered context fragments that survived budget fitting:
    /// memory facts, search snippets, recent history.
    pub context_fragments: Vec<String>,

    /// The current user message, verbatim.
    pub user_text: String,

    /// Cap on generated tokens.
    pub max_response_tokens: u32,

    /// Sampling temperature.
    pub temperature: f32,
}

/// The runtime's answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceReply {
    pub text: String,
    pub tokens_generated: u32,
}

/// The external LLM-runtime collaborator.
///
/// Failures and timeouts are transient from the engine's perspective:
/// one retry, then a degraded-service reply.
#[async_trait]
pub trait InferenceRuntime: Send + Sync {
    /// Runtime name for logging.
    fn name(&self) -> &str;

    /// Generate a response for the given prompt.
    async fn generate(&self, spec: PromptSpec) -> std::result::Result<InferenceReply, InferenceError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_spec_serializes() {
        let spec = PromptSpec {
            system_text: "You are helpful.".into(),
            context_fragments: vec!["[fact] likes tea".into()],
            user_text: "hello".into(),
            max_response_tokens: 256,
            temperature: 0.7,
        };
        let json = serde_json::to_string(&spec).unwrap();
        assert!(json.contains("likes tea"));
        let back: PromptSpec = serde_json::from_str(&json).unwrap();
        assert_eq!(back.context_fragments.len(), 1);
    }
}
