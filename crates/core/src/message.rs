//! Message domain types.
//!
//! These are the value objects that flow through the engine:
//! the gateway delivers an [`InboundEvent`], the engine persists it as a
//! [`Message`], and every recorded turn links a request message to a
//! response message.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Unique identifier for a channel (a conversation scope on the gateway side).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelId(pub String);

impl ChannelId {
    pub fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl std::fmt::Display for ChannelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The role of a message author.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The end user
    User,
    /// The agent's generated or rule-based reply
    Agent,
    /// System instructions
    System,
}

impl Role {
    /// Stable string form used in the persisted schema.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Agent => "agent",
            Role::System => "system",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Role::User),
            "agent" => Some(Role::Agent),
            "system" => Some(Role::System),
            _ => None,
        }
    }
}

/// A single persisted message. Immutable once written; the store is
/// append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Content-hash identifier (see [`Message::content_hash_id`]).
    pub id: String,

    /// The channel this message belongs to.
    pub channel_id: ChannelId,

    /// Platform-specific author identifier.
    pub author_id: String,

    /// Who authored this message.
    pub role: Role,

    /// The text content.
    pub content: String,

    /// When the message was created.
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Create a user message from an inbound gateway event.
    pub fn from_event(event: &InboundEvent) -> Self {
        Self::new(
            event.channel_id.clone(),
            &event.author_id,
            Role::User,
            &event.content,
            event.received_at,
        )
    }

    /// Create an agent response message.
    pub fn agent_reply(channel_id: ChannelId, content: impl Into<String>) -> Self {
        Self::new(channel_id, "agent", Role::Agent, &content.into(), Utc::now())
    }

    fn new(
        channel_id: ChannelId,
        author_id: &str,
        role: Role,
        content: &str,
        created_at: DateTime<Utc>,
    ) -> Self {
        let id = Self::content_hash_id(&channel_id, author_id, content, created_at);
        Self {
            id,
            channel_id,
            author_id: author_id.to_string(),
            role,
            content: content.to_string(),
            created_at,
        }
    }

    /// Deterministic message ID: sha256 over channel, author, content, and
    /// timestamp. Identical re-deliveries hash to the same ID, so the
    /// append path can treat them as duplicates.
    pub fn content_hash_id(
        channel_id: &ChannelId,
        author_id: &str,
        content: &str,
        created_at: DateTime<Utc>,
    ) -> String {
        let mut hasher = Sha256::new();
        hasher.update(channel_id.0.as_bytes());
        hasher.update(b"\x1f");
        hasher.update(author_id.as_bytes());
        hasher.update(b"\x1f");
        hasher.update(content.as_bytes());
        hasher.update(b"\x1f");
        hasher.update(created_at.to_rfc3339().as_bytes());
        let digest = hasher.finalize();
        // 16 bytes of hex is plenty for uniqueness and keeps keys short.
        digest[..16].iter().map(|b| format!("{b:02x}")).collect()
    }
}

/// The inbound event consumed from the external gateway collaborator.
///
/// The engine does not manage connection lifecycle, authentication, or
/// reconnection — it only consumes this.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundEvent {
    pub channel_id: ChannelId,
    pub author_id: String,
    pub content: String,
    pub received_at: DateTime<Utc>,
}

impl InboundEvent {
    pub fn new(channel_id: impl Into<String>, author_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            channel_id: ChannelId(channel_id.into()),
            author_id: author_id.into(),
            content: content.into(),
            received_at: Utc::now(),
        }
    }
}
