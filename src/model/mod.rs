//! # Domain Primitives
//!
//! Identity and record types shared by the queues, the optimistic store, and
//! the transport boundary.
//!
//! Two identifiers exist for every entity:
//!
//! - The **stable client identifier** (`StableId`) is a UUID minted on the
//!   client at creation time. It never changes and doubles as the
//!   idempotency key for the create request.
//! - The **local key** (`LocalKey`) is the collection index. Before the
//!   create is confirmed it is a provisional negative value derived from the
//!   creation timestamp; after confirmation it is the server-assigned id.
//!   It changes exactly once, and every reference is repointed at that
//!   moment (see `offline::reconciliation`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Collection index for an entity.
///
/// Negative values are provisional (entity created offline, not yet
/// confirmed); positive values are server-assigned canonical ids.
pub type LocalKey = i64;

/// Client-generated UUID identifying an entity for its whole lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StableId(pub Uuid);

impl StableId {
    /// Mint a fresh stable identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse from the canonical hyphenated form.
    pub fn parse(s: &str) -> Option<Self> {
        Uuid::parse_str(s).ok().map(Self)
    }
}

impl Default for StableId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for StableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// The entity kinds the content API serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Book,
    Chapter,
    Personification,
    Prompt,
    Relationship,
    Short,
    Timeline,
    Tag,
}

impl EntityKind {
    /// Every kind, in a fixed order (used for deterministic queue merging).
    pub const ALL: [EntityKind; 8] = [
        EntityKind::Book,
        EntityKind::Chapter,
        EntityKind::Personification,
        EntityKind::Prompt,
        EntityKind::Relationship,
        EntityKind::Short,
        EntityKind::Timeline,
        EntityKind::Tag,
    ];

    /// Singular name, also the serialized form.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Book => "book",
            EntityKind::Chapter => "chapter",
            EntityKind::Personification => "personification",
            EntityKind::Prompt => "prompt",
            EntityKind::Relationship => "relationship",
            EntityKind::Short => "short",
            EntityKind::Timeline => "timeline",
            EntityKind::Tag => "tag",
        }
    }

    /// REST collection path segment, e.g. `books` in `/api/books`.
    pub fn path_segment(&self) -> &'static str {
        match self {
            EntityKind::Book => "books",
            EntityKind::Chapter => "chapters",
            EntityKind::Personification => "personifications",
            EntityKind::Prompt => "prompts",
            EntityKind::Relationship => "relationships",
            EntityKind::Short => "shorts",
            EntityKind::Timeline => "timelines",
            EntityKind::Tag => "tags",
        }
    }

    /// Inverse of [`EntityKind::as_str`], used when loading persisted rows.
    pub fn parse(s: &str) -> Option<Self> {
        EntityKind::ALL.iter().copied().find(|k| k.as_str() == s)
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An entity as currently believed true by the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    /// Stable client identifier, immutable for the entity's lifetime
    pub stable_id: StableId,
    /// Current collection index (provisional until the create confirms)
    pub local_key: LocalKey,
    /// Domain payload snapshot
    pub data: serde_json::Value,
    /// Last local or server-confirmed modification time
    pub updated_at: DateTime<Utc>,
    /// Whether the server has confirmed this entity's existence
    pub confirmed: bool,
}

/// Session credentials issued by the auth collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Credentials {
    pub token: String,
    pub refresh_token: String,
    pub token_expires_at: DateTime<Utc>,
    pub refresh_expires_at: DateTime<Utc>,
}

/// Allocator for provisional local keys.
///
/// Keys are the negated creation timestamp in milliseconds, forced strictly
/// decreasing so two creates in the same millisecond still get distinct keys
/// within a session.
#[derive(Debug, Default)]
pub struct ProvisionalKeys {
    last: i64,
}

impl ProvisionalKeys {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next provisional key for an entity created at `now`.
    pub fn next(&mut self, now: DateTime<Utc>) -> LocalKey {
        let candidate = -now.timestamp_millis();
        let key = candidate.min(self.last - 1);
        self.last = key;
        key
    }
}
