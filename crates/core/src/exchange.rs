//! Exchange audit records.
//!
//! One exchange ties a full request/response turn together: which message
//! triggered it, which message answered it, how many tokens each side
//! cost, and whether trimming or search were involved. These records make
//! the budget tunable and the pipeline testable.

use serde::{Deserialize, Serialize};

/// Audit record for one completed turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Exchange {
    /// The user message that started the turn.
    pub request_message_id: String,

    /// The agent message that answered it.
    pub response_message_id: String,

    /// Tokens occupied by the assembled prompt (0 for auto-replies).
    pub prompt_token_count: usize,

    /// Tokens in the delivered response.
    pub response_token_count: usize,

    /// Whether the budget manager dropped or truncated any context.
    /// Truncation is recorded, never silent.
    pub truncated: bool,

    /// Whether live search results were included in the prompt.
    pub search_used: bool,
}

impl Exchange {
    /// Record for a rule-based auto-reply: no prompt was assembled.
    pub fn auto_reply(
        request_message_id: impl Into<String>,
        response_message_id: impl Into<String>,
        response_token_count: usize,
    ) -> Self {
        Self {
            request_message_id: request_message_id.into(),
            response_message_id: response_message_id.into(),
            prompt_token_count: 0,
            response_token_count,
            truncated: false,
            search_used: false,
        }
    }
}
