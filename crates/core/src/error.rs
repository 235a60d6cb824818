//! Error types for the keepsake domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant. Transient conditions
//! (search provider failures, cooldown misses) resolve into typed results
//! inside their components and never appear here.

use thiserror::Error;

/// The top-level error type for all keepsake operations.
///
/// Only three conditions reach the turn-level handler: storage failures,
/// budget overflow, and unrecovered inference failures. Everything else
/// is absorbed where it happens.
#[derive(Debug, Error)]
pub enum Error {
    // --- Storage errors ---
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    // --- Token budget errors ---
    #[error("Budget error: {0}")]
    Budget(#[from] BudgetError),

    // --- Inference runtime errors ---
    #[error("Inference error: {0}")]
    Inference(#[from] InferenceError),

    // --- Rule configuration errors ---
    #[error("Rule error: {0}")]
    Rule(#[from] RuleError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

/// Persistent store failures. Fatal for the current turn; the engine
/// retries once with backoff, then aborts the turn without a partial record.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O failure: {0}")]
    Io(String),

    #[error("Transaction failed: {0}")]
    Transaction(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    #[error("Row decode failed: {0}")]
    Decode(String),
}

/// Search provider failures. These never propagate past the search
/// engine — callers only ever see a `SearchOutcome`.
#[derive(Debug, Clone, Error)]
pub enum SearchError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Provider returned HTTP {status}")]
    Http { status: u16 },

    #[error("Provider '{provider}' timed out after {timeout_ms}ms")]
    Timeout { provider: String, timeout_ms: u64 },

    #[error("No answer in provider response")]
    EmptyAnswer,
}

/// Token budget failures.
#[derive(Debug, Clone, Error)]
pub enum BudgetError {
    /// Non-removable fragments alone exceed the budget. Surfaced to the
    /// caller as a user-visible "message too long" condition; the user's
    /// own message is never silently truncated.
    #[error("Non-removable fragments ({required} tokens) exceed budget ({budget} tokens)")]
    Exceeded { required: usize, budget: usize },
}

/// External inference runtime failures. Retried once, then surfaced as a
/// degraded-service reply without persisting a fabricated response.
#[derive(Debug, Clone, Error)]
pub enum InferenceError {
    #[error("Runtime request failed: {0}")]
    RuntimeFailed(String),

    #[error("Runtime timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("Runtime returned an empty response")]
    EmptyResponse,
}

/// Auto-reply rule configuration failures. Fatal at load time; conflicts
/// are never silently resolved at runtime.
#[derive(Debug, Error)]
pub enum RuleError {
    #[error("Rules '{first}' and '{second}' share priority {priority} with overlapping triggers")]
    Conflict {
        first: String,
        second: String,
        priority: i64,
    },

    #[error("Invalid trigger pattern in rule '{rule}': {reason}")]
    InvalidPattern { rule: String, reason: String },

    #[error("Invalid rule '{rule}': {reason}")]
    InvalidRule { rule: String, reason: String },
}
