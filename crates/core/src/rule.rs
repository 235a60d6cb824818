//! Auto-reply rule definitions.
//!
//! Rules let the engine answer high-frequency trivial messages without
//! invoking the (expensive, GPU-bound) inference runtime. Validation and
//! evaluation live in the `keepsake-rules` crate; this is only the data
//! shape the store persists and the config seeds.

use serde::{Deserialize, Serialize};

/// A single auto-reply rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoReplyRule {
    /// Unique rule ID (stable across restarts; used as the cooldown key).
    pub id: String,

    /// Regex matched against the inbound message content.
    pub trigger_pattern: String,

    /// Reply template. Supports `{author}` and `{channel}` placeholders.
    pub response_template: String,

    /// Lower number = higher precedence. Ties with overlapping triggers
    /// are a load-time configuration error.
    pub priority: i64,

    /// Minimum seconds between firings for the same (rule, channel) pair.
    pub cooldown_seconds: u64,

    /// Disabled rules are kept in the store but never evaluated.
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

impl AutoReplyRule {
    pub fn new(
        id: impl Into<String>,
        trigger_pattern: impl Into<String>,
        response_template: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            trigger_pattern: trigger_pattern.into(),
            response_template: response_template.into(),
            priority: 0,
            cooldown_seconds: 0,
            enabled: true,
        }
    }

    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_cooldown(mut self, seconds: u64) -> Self {
        self.cooldown_seconds = seconds;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_sets_fields() {
        let rule = AutoReplyRule::new("greet", "(?i)^hello\\b", "Hi {author}!")
            .with_priority(5)
            .with_cooldown(30);
        assert_eq!(rule.priority, 5);
        assert_eq!(rule.cooldown_seconds, 30);
        assert!(rule.enabled);
    }

    #[test]
    fn deserializes_with_default_enabled() {
        let json = r#"{
            "id": "greet",
            "trigger_pattern": "hello",
            "response_template": "hi",
            "priority": 0,
            "cooldown_seconds": 60
        }"#;
        let rule: AutoReplyRule = serde_json::from_str(json).unwrap();
        assert!(rule.enabled);
    }
}
