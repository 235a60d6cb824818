//! Memory facts — durable knowledge extracted from exchanges.
//!
//! A fact is keyed by subject so the assembler can pull everything known
//! about the topics a message touches. Facts are mutated only via
//! importance decay and `last_referenced_at` refresh; they disappear on
//! expiry or eviction.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single durable memory fact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryFact {
    /// Unique ID.
    pub id: String,

    /// Normalized subject key (lowercased topic word, e.g. "alice").
    pub subject_key: String,

    /// The remembered statement.
    pub content: String,

    /// Importance in [0, 1]. Decays over maintenance sweeps; low-importance
    /// facts are the first eviction candidates.
    pub importance: f64,

    /// Last time this fact was included in an assembled prompt.
    pub last_referenced_at: DateTime<Utc>,

    /// Optional hard expiry. `None` means the fact only leaves via eviction.
    pub expiry: Option<DateTime<Utc>>,
}

impl MemoryFact {
    /// Create a new fact with full importance, referenced now.
    pub fn new(subject_key: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            subject_key: normalize_subject(&subject_key.into()),
            content: content.into(),
            importance: 1.0,
            last_referenced_at: Utc::now(),
            expiry: None,
        }
    }

    /// Builder: set an expiry timestamp.
    pub fn with_expiry(mut self, expiry: DateTime<Utc>) -> Self {
        self.expiry = Some(expiry);
        self
    }

    /// Builder: set an initial importance (clamped to [0, 1]).
    pub fn with_importance(mut self, importance: f64) -> Self {
        self.importance = importance.clamp(0.0, 1.0);
        self
    }

    /// Whether this fact has passed its expiry.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiry.is_some_and(|e| e <= now)
    }
}

/// Normalize a subject key: lowercase, trimmed, inner whitespace collapsed
/// to single underscores.
pub fn normalize_subject(raw: &str) -> String {
    raw.trim()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn new_fact_normalizes_subject() {
        let fact = MemoryFact::new("  Favorite  Color ", "likes green");
        assert_eq!(fact.subject_key, "favorite_color");
        assert_eq!(fact.importance, 1.0);
        assert!(fact.expiry.is_none());
    }

    #[test]
    fn importance_is_clamped() {
        let fact = MemoryFact::new("x", "y").with_importance(3.0);
        assert_eq!(fact.importance, 1.0);
        let fact = MemoryFact::new("x", "y").with_importance(-1.0);
        assert_eq!(fact.importance, 0.0);
    }

    #[test]
    fn expiry_check() {
        let now = Utc::now();
        let fact = MemoryFact::new("x", "y").with_expiry(now - Duration::seconds(1));
        assert!(fact.is_expired(now));
        let fact = MemoryFact::new("x", "y").with_expiry(now + Duration::hours(1));
        assert!(!fact.is_expired(now));
    }
}
