//! Configuration loading and validation for keepsake.
//!
//! Loads configuration from a TOML file with environment variable
//! overrides. Validates all settings at startup. The resulting
//! [`AppConfig`] is immutable: it is constructed once and passed to every
//! component constructor — no ambient state is read afterwards.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Token budget and context sizing.
    #[serde(default)]
    pub context: ContextConfig,

    /// Persistent store settings.
    #[serde(default)]
    pub store: StoreConfig,

    /// Search fallback engine settings.
    #[serde(default)]
    pub search: SearchConfig,

    /// Inference runtime settings.
    #[serde(default)]
    pub inference: InferenceConfig,

    /// Memory fact maintenance settings.
    #[serde(default)]
    pub memory: MemoryConfig,

    /// Auto-reply rules seeded into the store at startup.
    #[serde(default)]
    pub rules: RulesConfig,

    /// What to do when a new message arrives mid-turn.
    #[serde(default)]
    pub cancellation: CancellationPolicy,
}

/// Token budget and context window sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Hard token budget for the assembled prompt.
    #[serde(default = "default_token_budget")]
    pub token_budget: usize,

    /// How many recent messages to gather per turn (N).
    #[serde(default = "default_context_messages")]
    pub context_messages: usize,

    /// System instructions prepended to every prompt.
    #[serde(default = "default_system_text")]
    pub system_text: String,

    /// Maximum characters in a delivered response (channel limit).
    #[serde(default = "default_max_response_length")]
    pub max_response_length: usize,
}

fn default_token_budget() -> usize {
    4096
}
fn default_context_messages() -> usize {
    20
}
fn default_system_text() -> String {
    "You are a helpful assistant with persistent memory.".into()
}
fn default_max_response_length() -> usize {
    2000
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            token_budget: default_token_budget(),
            context_messages: default_context_messages(),
            system_text: default_system_text(),
            max_response_length: default_max_response_length(),
        }
    }
}

/// Persistent store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// SQLite path. `sqlite::memory:` for an ephemeral store.
    #[serde(default = "default_database_path")]
    pub database_path: String,

    /// Bounded pool of concurrent connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_database_path() -> String {
    "keepsake.db".into()
}
fn default_max_connections() -> u32 {
    4
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            max_connections: default_max_connections(),
        }
    }
}

/// Search fallback engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Per-provider attempt timeout in milliseconds.
    #[serde(default = "default_provider_timeout_ms")]
    pub provider_timeout_ms: u64,

    /// TTL applied to cache write-backs, in seconds.
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,

    /// Maximum characters in a provider snippet.
    #[serde(default = "default_max_snippet_chars")]
    pub max_snippet_chars: usize,
}

fn default_provider_timeout_ms() -> u64 {
    3_000
}
fn default_cache_ttl_secs() -> u64 {
    900
}
fn default_max_snippet_chars() -> usize {
    1_200
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            provider_timeout_ms: default_provider_timeout_ms(),
            cache_ttl_secs: default_cache_ttl_secs(),
            max_snippet_chars: default_max_snippet_chars(),
        }
    }
}

/// Inference runtime settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceConfig {
    /// Timeout for one runtime call, in seconds.
    #[serde(default = "default_inference_timeout_secs")]
    pub timeout_secs: u64,

    /// Cap on generated tokens per response.
    #[serde(default = "default_max_response_tokens")]
    pub max_response_tokens: u32,

    /// Sampling temperature.
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

fn default_inference_timeout_secs() -> u64 {
    60
}
fn default_max_response_tokens() -> u32 {
    512
}
fn default_temperature() -> f32 {
    0.7
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_inference_timeout_secs(),
            max_response_tokens: default_max_response_tokens(),
            temperature: default_temperature(),
        }
    }
}

/// Memory fact maintenance settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Maximum facts kept; least-recently-referenced evicted beyond this.
    #[serde(default = "default_fact_capacity")]
    pub fact_capacity: usize,

    /// Importance multiplier applied per maintenance sweep.
    #[serde(default = "default_decay_factor")]
    pub decay_factor: f64,

    /// Facts whose importance decays below this are evicted.
    #[serde(default = "default_min_importance")]
    pub min_importance: f64,
}

fn default_fact_capacity() -> usize {
    500
}
fn default_decay_factor() -> f64 {
    0.98
}
fn default_min_importance() -> f64 {
    0.05
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            fact_capacity: default_fact_capacity(),
            decay_factor: default_decay_factor(),
            min_importance: default_min_importance(),
        }
    }
}

/// Auto-reply rule seeding.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RulesConfig {
    /// Cooldown applied to seeded rules that don't set one.
    #[serde(default = "default_cooldown_secs")]
    pub default_cooldown_secs: u64,

    /// Rules seeded into the store at startup.
    #[serde(default)]
    pub seed: Vec<SeedRule>,
}

fn default_cooldown_secs() -> u64 {
    30
}

/// A rule as written in the config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedRule {
    pub id: String,
    pub trigger_pattern: String,
    pub response_template: String,
    #[serde(default)]
    pub priority: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cooldown_seconds: Option<u64>,
}

/// What to do when a new message arrives while a turn is in flight for
/// the same channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancellationPolicy {
    /// Process strictly in arrival order.
    #[default]
    Queue,
    /// Discard the in-flight turn's reply and start the new one.
    /// The superseded turn's exchange is still recorded.
    Supersede,
}

impl AppConfig {
    /// Load configuration from the default path (`./keepsake.toml`).
    ///
    /// Environment variable overrides (highest priority):
    /// - `KEEPSAKE_DB` — database path
    /// - `KEEPSAKE_TOKEN_BUDGET` — token budget
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::load_from(Path::new("keepsake.toml"))?;

        if let Ok(db) = std::env::var("KEEPSAKE_DB") {
            config.store.database_path = db;
        }
        if let Ok(budget) = std::env::var("KEEPSAKE_TOKEN_BUDGET") {
            config.context.token_budget =
                budget.parse().map_err(|_| ConfigError::ValidationError(
                    "KEEPSAKE_TOKEN_BUDGET must be an integer".into(),
                ))?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.context.token_budget == 0 {
            return Err(ConfigError::ValidationError(
                "context.token_budget must be > 0".into(),
            ));
        }
        if self.inference.temperature < 0.0 || self.inference.temperature > 2.0 {
            return Err(ConfigError::ValidationError(
                "inference.temperature must be between 0.0 and 2.0".into(),
            ));
        }
        if self.memory.decay_factor <= 0.0 || self.memory.decay_factor > 1.0 {
            return Err(ConfigError::ValidationError(
                "memory.decay_factor must be in (0.0, 1.0]".into(),
            ));
        }
        if self.context.max_response_length == 0 {
            return Err(ConfigError::ValidationError(
                "context.max_response_length must be > 0".into(),
            ));
        }
        Ok(())
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            context: ContextConfig::default(),
            store: StoreConfig::default(),
            search: SearchConfig::default(),
            inference: InferenceConfig::default(),
            memory: MemoryConfig::default(),
            rules: RulesConfig::default(),
            cancellation: CancellationPolicy::default(),
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.context.token_budget, 4096);
        assert_eq!(config.store.max_connections, 4);
        assert_eq!(config.cancellation, CancellationPolicy::Queue);
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.context.token_budget, config.context.token_budget);
        assert_eq!(parsed.search.cache_ttl_secs, config.search.cache_ttl_secs);
    }

    #[test]
    fn invalid_temperature_rejected() {
        let config = AppConfig {
            inference: InferenceConfig {
                temperature: 5.0,
                ..InferenceConfig::default()
            },
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_budget_rejected() {
        let config = AppConfig {
            context: ContextConfig {
                token_budget: 0,
                ..ContextConfig::default()
            },
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let result = AppConfig::load_from(Path::new("/nonexistent/keepsake.toml"));
        assert!(result.is_ok());
        assert_eq!(result.unwrap().context.context_messages, 20);
    }

    #[test]
    fn cancellation_policy_parses_snake_case() {
        let toml_str = r#"cancellation = "supersede""#;
        let config: AppConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.cancellation, CancellationPolicy::Supersede);
    }

    #[test]
    fn seed_rules_parse() {
        let toml_str = r#"
[rules]
default_cooldown_secs = 45

[[rules.seed]]
id = "greet"
trigger_pattern = "(?i)^hello\\b"
response_template = "Hi {author}!"
priority = 0
cooldown_seconds = 30

[[rules.seed]]
id = "thanks"
trigger_pattern = "(?i)\\bthank(s| you)\\b"
response_template = "You're welcome!"
priority = 1
"#;
        let config: AppConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.rules.seed.len(), 2);
        assert_eq!(config.rules.seed[0].cooldown_seconds, Some(30));
        assert_eq!(config.rules.seed[1].cooldown_seconds, None);
        assert_eq!(config.rules.default_cooldown_secs, 45);
    }

    #[test]
    fn load_from_real_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[context]\ntoken_budget = 512").unwrap();
        let config = AppConfig::load_from(file.path()).unwrap();
        assert_eq!(config.context.token_budget, 512);
        // untouched sections keep defaults
        assert_eq!(config.inference.max_response_tokens, 512);
    }
}
