//! Persistent store for keepsake — messages, facts, rules, search cache,
//! and exchange audit records on SQLite.
//!
//! All mutating operations commit in a single transaction per logical
//! write; the response-message + exchange pair in particular either both
//! commit or neither does. Migrations are additive-only and idempotent.

mod sqlite;

pub use sqlite::SqliteStore;
