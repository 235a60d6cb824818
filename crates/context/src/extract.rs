//! Heuristic extraction: subject keys for fact lookup, recency cues for
//! search augmentation, and durable facts worth remembering.
//!
//! All of this is deliberately shallow pattern matching. Real language
//! understanding belongs to the model; these heuristics only decide what
//! to *fetch* and what to *keep*.

use keepsake_core::fact::normalize_subject;
use keepsake_core::{MemoryFact, Message};
use regex::Regex;

/// Words too common to be useful lookup keys.
const STOPWORDS: &[&str] = &[
    "about", "after", "again", "also", "been", "before", "being", "could", "does", "from", "have",
    "hello", "just", "know", "like", "make", "more", "much", "only", "over", "please", "really",
    "should", "some", "tell", "than", "that", "them", "then", "there", "these", "they", "thing",
    "this", "today", "very", "want", "what", "when", "where", "which", "will", "with", "would",
    "your",
];

/// Cues suggesting the message wants live information a static model
/// cannot have.
const RECENCY_CUES: &[&str] = &[
    "today",
    "right now",
    "currently",
    "latest",
    "news",
    "weather",
    "this week",
    "this morning",
    "tonight",
    "yesterday",
    "price of",
    "score",
    "happening",
    "look up",
    "search for",
];

/// Extract up to `max` normalized subject keys from message content:
/// significant words, order-preserving, deduplicated.
pub fn subject_keys(content: &str, max: usize) -> Vec<String> {
    let mut keys = Vec::new();
    for word in content.split(|c: char| !c.is_alphanumeric()) {
        if word.len() < 4 {
            continue;
        }
        let key = normalize_subject(word);
        if STOPWORDS.contains(&key.as_str()) || keys.contains(&key) {
            continue;
        }
        keys.push(key);
        if keys.len() == max {
            break;
        }
    }
    keys
}

/// Whether the message appears to ask about time-sensitive information.
pub fn wants_live_information(content: &str) -> bool {
    let lower = content.to_lowercase();
    RECENCY_CUES.iter().any(|cue| lower.contains(cue))
}

/// Pattern-based extraction of durable facts from user messages.
///
/// Personal statements ("my name is…", "I live in…") are keyed by the
/// author so later turns from the same user pull them back; explicit
/// "remember that…" requests are keyed by their own first subject word.
pub struct FactExtractor {
    name: Regex,
    preference: Regex,
    location: Regex,
    explicit: Regex,
}

impl FactExtractor {
    pub fn new() -> Self {
        // Patterns are fixed and known-valid.
        Self {
            name: Regex::new(r"(?i)\bmy name is ([A-Za-z][\w-]*)").unwrap(),
            preference: Regex::new(r"(?i)\bi (?:like|love|enjoy|prefer) ([^.!?\n]+)").unwrap(),
            location: Regex::new(r"(?i)\bi live in ([^.!?\n]+)").unwrap(),
            explicit: Regex::new(r"(?i)\bremember that ([^.!?\n]+)").unwrap(),
        }
    }

    /// Extract facts from a user message. Agent and system messages
    /// never produce facts.
    pub fn extract(&self, message: &Message) -> Vec<MemoryFact> {
        if message.role != keepsake_core::Role::User {
            return Vec::new();
        }

        let author = &message.author_id;
        let content = &message.content;
        let mut facts = Vec::new();

        if let Some(cap) = self.name.captures(content) {
            facts.push(MemoryFact::new(
                author.clone(),
                format!("{author}'s name is {}", cap[1].trim()),
            ));
        }
        if let Some(cap) = self.preference.captures(content) {
            facts.push(
                MemoryFact::new(author.clone(), format!("{author} likes {}", cap[1].trim()))
                    .with_importance(0.7),
            );
        }
        if let Some(cap) = self.location.captures(content) {
            facts.push(MemoryFact::new(
                author.clone(),
                format!("{author} lives in {}", cap[1].trim()),
            ));
        }
        if let Some(cap) = self.explicit.captures(content) {
            let statement = cap[1].trim().to_string();
            let subject = subject_keys(&statement, 1)
                .into_iter()
                .next()
                .unwrap_or_else(|| normalize_subject(author));
            facts.push(MemoryFact::new(subject, statement));
        }

        facts
    }
}

impl Default for FactExtractor {
    fn default() -> Self {
        Self::new()
    }
}
