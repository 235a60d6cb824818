//! SQLite store backend.
//!
//! Uses a single SQLite database file with one table per record kind:
//! `messages`, `memory_facts`, `auto_reply_rules`, `search_cache`,
//! `exchanges`, plus `schema_version` for migration tracking.
//!
//! Conventions follow the rest of the workspace: RFC 3339 TEXT
//! timestamps, WAL journal, a bounded connection pool, and explicit
//! error mapping into `StorageError`.

use chrono::{DateTime, Utc};
use keepsake_config::{MemoryConfig, StoreConfig};
use keepsake_core::error::StorageError;
use keepsake_core::{AutoReplyRule, ChannelId, Exchange, MemoryFact, Message, Role, SearchCacheEntry};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::{debug, info};

/// Current schema version. Bump when adding a migration step;
/// existing steps are never rewritten (additive-only).
const SCHEMA_VERSION: i64 = 1;

/// The production SQLite store.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) the database at the configured path and run
    /// migrations. Pass `sqlite::memory:` for an in-process ephemeral
    /// database (useful for tests).
    pub async fn new(config: &StoreConfig) -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str(&config.database_path)
            .map_err(|e| StorageError::Io(format!("Invalid SQLite path: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .pragma("foreign_keys", "ON");

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Io(format!("Failed to open SQLite: {e}")))?;

        let store = Self { pool };
        store.run_migrations().await?;
        info!("SQLite store initialized at {}", config.database_path);
        Ok(store)
    }

    /// In-memory store for tests. Uses a single connection so the
    /// ephemeral database is shared across queries.
    pub async fn in_memory() -> Result<Self, StorageError> {
        let config = StoreConfig {
            database_path: "sqlite::memory:".into(),
            max_connections: 1,
        };
        Self::new(&config).await
    }

    /// Close the connection pool. Part of process teardown.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Run schema migrations. Safe to re-run against an already-migrated
    /// store: every step is `IF NOT EXISTS` and the version row is
    /// inserted with `OR IGNORE`.
    async fn run_migrations(&self) -> Result<(), StorageError> {
        let steps: &[(&str, &str)] = &[
            (
                "schema_version table",
                r#"
                CREATE TABLE IF NOT EXISTS schema_version (
                    version     INTEGER PRIMARY KEY,
                    applied_at  TEXT NOT NULL
                )
                "#,
            ),
            (
                "messages table",
                r#"
                CREATE TABLE IF NOT EXISTS messages (
                    id          TEXT PRIMARY KEY,
                    channel_id  TEXT NOT NULL,
                    author_id   TEXT NOT NULL,
                    role        TEXT NOT NULL,
                    content     TEXT NOT NULL,
                    created_at  TEXT NOT NULL
                )
                "#,
            ),
            (
                "messages channel index",
                "CREATE INDEX IF NOT EXISTS idx_messages_channel_created
                 ON messages(channel_id, created_at DESC)",
            ),
            (
                "memory_facts table",
                r#"
                CREATE TABLE IF NOT EXISTS memory_facts (
                    id                  TEXT PRIMARY KEY,
                    subject_key         TEXT NOT NULL,
                    content             TEXT NOT NULL,
                    importance          REAL NOT NULL,
                    last_referenced_at  TEXT NOT NULL,
                    expiry              TEXT
                )
                "#,
            ),
            (
                "memory_facts subject index",
                "CREATE INDEX IF NOT EXISTS idx_facts_subject ON memory_facts(subject_key)",
            ),
            (
                "auto_reply_rules table",
                r#"
                CREATE TABLE IF NOT EXISTS auto_reply_rules (
                    id                 TEXT PRIMARY KEY,
                    trigger_pattern    TEXT NOT NULL,
                    response_template  TEXT NOT NULL,
                    priority           INTEGER NOT NULL,
                    cooldown_seconds   INTEGER NOT NULL,
                    enabled            INTEGER NOT NULL DEFAULT 1
                )
                "#,
            ),
            (
                "search_cache table",
                r#"
                CREATE TABLE IF NOT EXISTS search_cache (
                    query_normalized  TEXT PRIMARY KEY,
                    provider          TEXT NOT NULL,
                    snippet           TEXT NOT NULL,
                    fetched_at        TEXT NOT NULL,
                    ttl_seconds       INTEGER NOT NULL
                )
                "#,
            ),
            (
                "exchanges table",
                r#"
                CREATE TABLE IF NOT EXISTS exchanges (
                    request_message_id    TEXT PRIMARY KEY REFERENCES messages(id),
                    response_message_id   TEXT NOT NULL UNIQUE REFERENCES messages(id),
                    prompt_token_count    INTEGER NOT NULL,
                    response_token_count  INTEGER NOT NULL,
                    truncated             INTEGER NOT NULL,
                    search_used           INTEGER NOT NULL
                )
                "#,
            ),
        ];

        for (name, sql) in steps {
            sqlx::query(sql)
                .execute(&self.pool)
                .await
                .map_err(|e| StorageError::MigrationFailed(format!("{name}: {e}")))?;
        }

        sqlx::query("INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (?1, ?2)")
            .bind(SCHEMA_VERSION)
            .bind(Utc::now().to_rfc3339())
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::MigrationFailed(format!("version row: {e}")))?;

        debug!("SQLite migrations complete (schema v{SCHEMA_VERSION})");
        Ok(())
    }

    /// The recorded schema version.
    pub async fn schema_version(&self) -> Result<i64, StorageError> {
        let row = sqlx::query("SELECT MAX(version) AS v FROM schema_version")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StorageError::QueryFailed(format!("schema version: {e}")))?;
        row.try_get("v")
            .map_err(|e| StorageError::Decode(format!("version column: {e}")))
    }

    // ── Messages ──────────────────────────────────────────────────────────

    /// Append a message. Idempotent for identical content-hash IDs
    /// (re-delivered events), so the append-only log never duplicates.
    pub async fn append_message(&self, message: &Message) -> Result<String, StorageError> {
        sqlx::query(
            r#"
            INSERT OR IGNORE INTO messages (id, channel_id, author_id, role, content, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(&message.id)
        .bind(&message.channel_id.0)
        .bind(&message.author_id)
        .bind(message.role.as_str())
        .bind(&message.content)
        .bind(message.created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Io(format!("message insert: {e}")))?;

        debug!(id = %message.id, channel = %message.channel_id, "Appended message");
        Ok(message.id.clone())
    }

    /// Read the most recent messages for a channel, newest first.
    /// Restartable: re-querying reflects any appends since.
    pub async fn read_recent(
        &self,
        channel_id: &ChannelId,
        limit: usize,
    ) -> Result<Vec<Message>, StorageError> {
        let rows = sqlx::query(
            r#"
            SELECT id, channel_id, author_id, role, content, created_at
            FROM messages
            WHERE channel_id = ?1
            ORDER BY created_at DESC, rowid DESC
            LIMIT ?2
            "#,
        )
        .bind(&channel_id.0)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::QueryFailed(format!("read_recent: {e}")))?;

        rows.iter().map(Self::row_to_message).collect()
    }

    // ── Memory facts ──────────────────────────────────────────────────────

    /// Insert or update a fact, keyed by ID.
    pub async fn upsert_fact(&self, fact: &MemoryFact) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO memory_facts (id, subject_key, content, importance, last_referenced_at, expiry)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(id) DO UPDATE SET
                subject_key = excluded.subject_key,
                content = excluded.content,
                importance = excluded.importance,
                last_referenced_at = excluded.last_referenced_at,
                expiry = excluded.expiry
            "#,
        )
        .bind(&fact.id)
        .bind(&fact.subject_key)
        .bind(&fact.content)
        .bind(fact.importance)
        .bind(fact.last_referenced_at.to_rfc3339())
        .bind(fact.expiry.map(|e| e.to_rfc3339()))
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Io(format!("fact upsert: {e}")))?;
        Ok(())
    }

    /// All non-expired facts for a subject key, most important first.
    pub async fn query_facts(&self, subject_key: &str) -> Result<Vec<MemoryFact>, StorageError> {
        let rows = sqlx::query(
            r#"
            SELECT id, subject_key, content, importance, last_referenced_at, expiry
            FROM memory_facts
            WHERE subject_key = ?1
              AND (expiry IS NULL OR expiry > ?2)
            ORDER BY importance DESC, last_referenced_at DESC
            "#,
        )
        .bind(subject_key)
        .bind(Utc::now().to_rfc3339())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::QueryFailed(format!("query_facts: {e}")))?;

        rows.iter().map(Self::row_to_fact).collect()
    }

    /// Refresh `last_referenced_at` for facts that were just used in a
    /// prompt.
    pub async fn touch_facts(&self, ids: &[String]) -> Result<(), StorageError> {
        let now = Utc::now().to_rfc3339();
        for id in ids {
            sqlx::query("UPDATE memory_facts SET last_referenced_at = ?1 WHERE id = ?2")
                .bind(&now)
                .bind(id)
                .execute(&self.pool)
                .await
                .map_err(|e| StorageError::Io(format!("fact touch: {e}")))?;
        }
        Ok(())
    }

    /// Maintenance sweep: decay importance, drop expired and
    /// below-threshold facts, then evict least-recently-referenced facts
    /// beyond the capacity bound. Returns the number of facts removed.
    pub async fn decay_and_evict_facts(
        &self,
        config: &MemoryConfig,
    ) -> Result<u64, StorageError> {
        let now = Utc::now().to_rfc3339();

        sqlx::query("UPDATE memory_facts SET importance = importance * ?1")
            .bind(config.decay_factor)
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Io(format!("fact decay: {e}")))?;

        let expired = sqlx::query(
            "DELETE FROM memory_facts WHERE (expiry IS NOT NULL AND expiry <= ?1) OR importance < ?2",
        )
        .bind(&now)
        .bind(config.min_importance)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Io(format!("fact expiry sweep: {e}")))?
        .rows_affected();

        let evicted = sqlx::query(
            r#"
            DELETE FROM memory_facts WHERE id IN (
                SELECT id FROM memory_facts
                ORDER BY last_referenced_at DESC
                LIMIT -1 OFFSET ?1
            )
            "#,
        )
        .bind(config.fact_capacity as i64)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Io(format!("fact eviction: {e}")))?
        .rows_affected();

        if expired + evicted > 0 {
            debug!(expired, evicted, "Fact maintenance sweep");
        }
        Ok(expired + evicted)
    }

    // ── Auto-reply rules ──────────────────────────────────────────────────

    /// Seed rules into the store. Upsert by ID so re-seeding from config
    /// updates templates without duplicating rows.
    pub async fn seed_rules(&self, rules: &[AutoReplyRule]) -> Result<(), StorageError> {
        for rule in rules {
            sqlx::query(
                r#"
                INSERT INTO auto_reply_rules
                    (id, trigger_pattern, response_template, priority, cooldown_seconds, enabled)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                ON CONFLICT(id) DO UPDATE SET
                    trigger_pattern = excluded.trigger_pattern,
                    response_template = excluded.response_template,
                    priority = excluded.priority,
                    cooldown_seconds = excluded.cooldown_seconds,
                    enabled = excluded.enabled
                "#,
            )
            .bind(&rule.id)
            .bind(&rule.trigger_pattern)
            .bind(&rule.response_template)
            .bind(rule.priority)
            .bind(rule.cooldown_seconds as i64)
            .bind(rule.enabled)
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Io(format!("rule seed: {e}")))?;
        }
        Ok(())
    }

    /// Load all rules, ascending priority (evaluation order).
    pub async fn load_rules(&self) -> Result<Vec<AutoReplyRule>, StorageError> {
        let rows = sqlx::query(
            r#"
            SELECT id, trigger_pattern, response_template, priority, cooldown_seconds, enabled
            FROM auto_reply_rules
            ORDER BY priority ASC, id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::QueryFailed(format!("load_rules: {e}")))?;

        rows.iter().map(Self::row_to_rule).collect()
    }

    // ── Search cache ──────────────────────────────────────────────────────

    /// Look up a cache entry by normalized query. Returns expired entries
    /// too — the caller distinguishes live from stale.
    pub async fn cache_get(
        &self,
        query_normalized: &str,
    ) -> Result<Option<SearchCacheEntry>, StorageError> {
        let row = sqlx::query(
            r#"
            SELECT query_normalized, provider, snippet, fetched_at, ttl_seconds
            FROM search_cache
            WHERE query_normalized = ?1
            "#,
        )
        .bind(query_normalized)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StorageError::QueryFailed(format!("cache_get: {e}")))?;

        row.as_ref().map(Self::row_to_cache_entry).transpose()
    }

    /// Write back a cache entry. Upsert keyed by normalized query, so
    /// concurrent cache-fill races converge to a single row.
    pub async fn cache_put(&self, entry: &SearchCacheEntry) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO search_cache (query_normalized, provider, snippet, fetched_at, ttl_seconds)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(query_normalized) DO UPDATE SET
                provider = excluded.provider,
                snippet = excluded.snippet,
                fetched_at = excluded.fetched_at,
                ttl_seconds = excluded.ttl_seconds
            "#,
        )
        .bind(&entry.query_normalized)
        .bind(&entry.provider)
        .bind(&entry.snippet)
        .bind(entry.fetched_at.to_rfc3339())
        .bind(entry.ttl_seconds as i64)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Io(format!("cache_put: {e}")))?;
        Ok(())
    }

    // ── Exchanges ─────────────────────────────────────────────────────────

    /// Record a completed turn: the response message and its exchange row
    /// commit in one transaction. Either both land or neither does — a
    /// message without its exchange record is never observable.
    pub async fn record_exchange(
        &self,
        response: &Message,
        exchange: &Exchange,
    ) -> Result<(), StorageError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StorageError::Transaction(format!("begin: {e}")))?;

        sqlx::query(
            r#"
            INSERT INTO messages (id, channel_id, author_id, role, content, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(&response.id)
        .bind(&response.channel_id.0)
        .bind(&response.author_id)
        .bind(response.role.as_str())
        .bind(&response.content)
        .bind(response.created_at.to_rfc3339())
        .execute(&mut *tx)
        .await
        .map_err(|e| StorageError::Transaction(format!("response insert: {e}")))?;

        sqlx::query(
            r#"
            INSERT INTO exchanges
                (request_message_id, response_message_id, prompt_token_count,
                 response_token_count, truncated, search_used)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(&exchange.request_message_id)
        .bind(&exchange.response_message_id)
        .bind(exchange.prompt_token_count as i64)
        .bind(exchange.response_token_count as i64)
        .bind(exchange.truncated)
        .bind(exchange.search_used)
        .execute(&mut *tx)
        .await
        .map_err(|e| StorageError::Transaction(format!("exchange insert: {e}")))?;

        tx.commit()
            .await
            .map_err(|e| StorageError::Transaction(format!("commit: {e}")))?;

        debug!(
            request = %exchange.request_message_id,
            response = %exchange.response_message_id,
            truncated = exchange.truncated,
            search_used = exchange.search_used,
            "Recorded exchange"
        );
        Ok(())
    }

    /// Fetch an exchange by its request message ID.
    pub async fn get_exchange(
        &self,
        request_message_id: &str,
    ) -> Result<Option<Exchange>, StorageError> {
        let row = sqlx::query(
            r#"
            SELECT request_message_id, response_message_id, prompt_token_count,
                   response_token_count, truncated, search_used
            FROM exchanges
            WHERE request_message_id = ?1
            "#,
        )
        .bind(request_message_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StorageError::QueryFailed(format!("get_exchange: {e}")))?;

        row.as_ref().map(Self::row_to_exchange).transpose()
    }

    // ── Row decoding ──────────────────────────────────────────────────────

    fn row_to_message(row: &sqlx::sqlite::SqliteRow) -> Result<Message, StorageError> {
        let role_str: String = Self::get(row, "role")?;
        let role = Role::parse(&role_str)
            .ok_or_else(|| StorageError::Decode(format!("unknown role '{role_str}'")))?;
        Ok(Message {
            id: Self::get(row, "id")?,
            channel_id: ChannelId(Self::get(row, "channel_id")?),
            author_id: Self::get(row, "author_id")?,
            role,
            content: Self::get(row, "content")?,
            created_at: Self::parse_time(&Self::get::<String>(row, "created_at")?)?,
        })
    }

    fn row_to_fact(row: &sqlx::sqlite::SqliteRow) -> Result<MemoryFact, StorageError> {
        let expiry: Option<String> = row
            .try_get("expiry")
            .map_err(|e| StorageError::Decode(format!("expiry column: {e}")))?;
        Ok(MemoryFact {
            id: Self::get(row, "id")?,
            subject_key: Self::get(row, "subject_key")?,
            content: Self::get(row, "content")?,
            importance: Self::get(row, "importance")?,
            last_referenced_at: Self::parse_time(&Self::get::<String>(row, "last_referenced_at")?)?,
            expiry: expiry.as_deref().map(Self::parse_time).transpose()?,
        })
    }

    fn row_to_rule(row: &sqlx::sqlite::SqliteRow) -> Result<AutoReplyRule, StorageError> {
        let cooldown: i64 = Self::get(row, "cooldown_seconds")?;
        Ok(AutoReplyRule {
            id: Self::get(row, "id")?,
            trigger_pattern: Self::get(row, "trigger_pattern")?,
            response_template: Self::get(row, "response_template")?,
            priority: Self::get(row, "priority")?,
            cooldown_seconds: cooldown.max(0) as u64,
            enabled: Self::get(row, "enabled")?,
        })
    }

    fn row_to_cache_entry(row: &sqlx::sqlite::SqliteRow) -> Result<SearchCacheEntry, StorageError> {
        let ttl: i64 = Self::get(row, "ttl_seconds")?;
        Ok(SearchCacheEntry {
            query_normalized: Self::get(row, "query_normalized")?,
            provider: Self::get(row, "provider")?,
            snippet: Self::get(row, "snippet")?,
            fetched_at: Self::parse_time(&Self::get::<String>(row, "fetched_at")?)?,
            ttl_seconds: ttl.max(0) as u64,
        })
    }

    fn row_to_exchange(row: &sqlx::sqlite::SqliteRow) -> Result<Exchange, StorageError> {
        let prompt: i64 = Self::get(row, "prompt_token_count")?;
        let response: i64 = Self::get(row, "response_token_count")?;
        Ok(Exchange {
            request_message_id: Self::get(row, "request_message_id")?,
            response_message_id: Self::get(row, "response_message_id")?,
            prompt_token_count: prompt.max(0) as usize,
            response_token_count: response.max(0) as usize,
            truncated: Self::get(row, "truncated")?,
            search_used: Self::get(row, "search_used")?,
        })
    }

    fn get<'r, T: sqlx::Decode<'r, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite>>(
        row: &'r sqlx::sqlite::SqliteRow,
        column: &str,
    ) -> Result<T, StorageError> {
        row.try_get(column)
            .map_err(|e| StorageError::Decode(format!("{column} column: {e}")))
    }

    fn parse_time(s: &str) -> Result<DateTime<Utc>, StorageError> {
        DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| StorageError::Decode(format!("timestamp '{s}': {e}")))
    }
}
