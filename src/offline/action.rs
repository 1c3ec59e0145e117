//! # Replayable Actions
//!
//! Queued mutations are pure data: a tagged record of what happened, safe to
//! serialize into the local store and replay after a reload. Execution lives
//! in a separate interpreter ([`execute`]) that maps {action kind, entity
//! kind} onto the matching [`Backend`] call, so no closures ever enter a
//! queue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::transport::Backend;
use crate::model::{EntityKind, LocalKey, StableId};
use crate::shared::error::ApiError;

/// What a queued mutation does to its target entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Create,
    Update,
    Delete,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Create => "create",
            ActionKind::Update => "update",
            ActionKind::Delete => "delete",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "create" => Some(ActionKind::Create),
            "update" => Some(ActionKind::Update),
            "delete" => Some(ActionKind::Delete),
            _ => None,
        }
    }
}

/// One not-yet-confirmed mutation, immutable once enqueued except for
/// removal and local-key repointing at create-confirmation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedAction {
    /// Queue row identity (not the entity identity)
    pub id: Uuid,
    pub kind: ActionKind,
    pub entity: EntityKind,
    /// Target entity's stable client identifier
    pub stable_id: StableId,
    /// Target entity's local key at enqueue time; repointed to the
    /// canonical id when the entity's create confirms
    pub local_key: LocalKey,
    /// Payload snapshot taken at enqueue time
    pub payload: serde_json::Value,
    pub queued_at: DateTime<Utc>,
}

impl QueuedAction {
    pub fn new(
        kind: ActionKind,
        entity: EntityKind,
        stable_id: StableId,
        local_key: LocalKey,
        payload: serde_json::Value,
        queued_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            entity,
            stable_id,
            local_key,
            payload,
            queued_at,
        }
    }
}

/// Marker queued on the distinguished refresh queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefreshMarker {
    pub id: Uuid,
    pub queued_at: DateTime<Utc>,
}

impl RefreshMarker {
    pub fn new(queued_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            queued_at,
        }
    }
}

/// Server acknowledgement of one replayed action.
#[derive(Debug, Clone)]
pub enum ActionReceipt {
    Created {
        canonical_key: LocalKey,
        updated_at: DateTime<Utc>,
    },
    Updated {
        updated_at: DateTime<Utc>,
    },
    Deleted,
}

/// Interpret a queued action against the transport.
///
/// The tagged union stays data; this is the single place where action kind
/// and entity kind select an API operation.
pub async fn execute(
    action: &QueuedAction,
    backend: &dyn Backend,
    token: &str,
) -> Result<ActionReceipt, ApiError> {
    match action.kind {
        ActionKind::Create => backend
            .create(action.entity, action.stable_id, &action.payload, token)
            .await
            .map(|record| ActionReceipt::Created {
                canonical_key: record.id,
                updated_at: record.updated_at,
            }),
        ActionKind::Update => backend
            .update(
                action.entity,
                action.local_key,
                action.stable_id,
                &action.payload,
                token,
            )
            .await
            .map(|record| ActionReceipt::Updated {
                updated_at: record.updated_at,
            }),
        ActionKind::Delete => backend
            .delete(action.entity, action.local_key, action.stable_id, token)
            .await
            .map(|_| ActionReceipt::Deleted),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_kind_round_trip() {
        for kind in [ActionKind::Create, ActionKind::Update, ActionKind::Delete] {
            assert_eq!(ActionKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(ActionKind::parse("upsert"), None);
    }

    #[test]
    fn test_queued_action_serializes_as_pure_data() {
        let action = QueuedAction::new(
            ActionKind::Create,
            EntityKind::Book,
            StableId::new(),
            -1000,
            serde_json::json!({ "title": "Alpha" }),
            Utc::now(),
        );

        let encoded = serde_json::to_string(&action).unwrap();
        let decoded: QueuedAction = serde_json::from_str(&encoded).unwrap();
        assert_eq!(action, decoded);
    }
}
