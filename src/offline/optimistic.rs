//! # Optimistic Local Store
//!
//! The entity collections as currently believed true by the client, mutated
//! immediately on user action and corrected when replays complete. The
//! state is an explicit value ([`Collections`]) changed only through the
//! pure [`reduce`] function; the engine's `dispatch` is the single entry
//! point that feeds it.
//!
//! ## Events
//!
//! - `Created` / `Updated` / `Deleted` - optimistic user mutations
//! - `Acknowledged` - server confirmed an update, timestamps corrected
//! - `CreateConfirmed` - the atomic repoint from provisional to canonical key
//! - `Hydrated` - server records merged in from `read_all`

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tracing::debug;

use crate::model::{EntityKind, EntityRecord, LocalKey, StableId};

/// Per-kind entity collections keyed by local key.
#[derive(Debug, Default)]
pub struct Collections {
    entities: HashMap<EntityKind, HashMap<LocalKey, EntityRecord>>,
}

impl Collections {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, kind: EntityKind, local_key: LocalKey) -> Option<&EntityRecord> {
        self.entities.get(&kind).and_then(|c| c.get(&local_key))
    }

    pub fn find_by_stable(&self, kind: EntityKind, stable_id: StableId) -> Option<&EntityRecord> {
        self.entities
            .get(&kind)
            .and_then(|c| c.values().find(|r| r.stable_id == stable_id))
    }

    pub fn len(&self, kind: EntityKind) -> usize {
        self.entities.get(&kind).map(|c| c.len()).unwrap_or(0)
    }

    pub fn contains_key(&self, kind: EntityKind, local_key: LocalKey) -> bool {
        self.get(kind, local_key).is_some()
    }

    /// Records of one kind, sorted by local key for stable presentation.
    pub fn snapshot(&self, kind: EntityKind) -> Vec<EntityRecord> {
        let mut records: Vec<EntityRecord> = self
            .entities
            .get(&kind)
            .map(|c| c.values().cloned().collect())
            .unwrap_or_default();
        records.sort_by_key(|r| r.local_key);
        records
    }

    /// Insert a record loaded from the persistent store.
    pub fn insert(&mut self, kind: EntityKind, record: EntityRecord) {
        self.entities
            .entry(kind)
            .or_default()
            .insert(record.local_key, record);
    }
}

/// A state transition applied by [`reduce`].
#[derive(Debug)]
pub enum StoreEvent {
    /// Optimistic create
    Created {
        entity: EntityKind,
        record: EntityRecord,
    },
    /// Optimistic update of an existing record's payload
    Updated {
        entity: EntityKind,
        local_key: LocalKey,
        data: serde_json::Value,
        updated_at: DateTime<Utc>,
    },
    /// Optimistic delete
    Deleted {
        entity: EntityKind,
        local_key: LocalKey,
    },
    /// Server acknowledged an update; adopt its timestamp
    Acknowledged {
        entity: EntityKind,
        local_key: LocalKey,
        updated_at: DateTime<Utc>,
    },
    /// Create replay succeeded: move the record from its provisional key to
    /// the canonical key, marking it confirmed
    CreateConfirmed {
        entity: EntityKind,
        stable_id: StableId,
        canonical_key: LocalKey,
        updated_at: DateTime<Utc>,
    },
    /// Merge authoritative server records (already filtered by the caller)
    Hydrated {
        entity: EntityKind,
        records: Vec<EntityRecord>,
    },
}

/// Apply one event to the collections. Pure with respect to everything but
/// the state value itself.
pub fn reduce(collections: &mut Collections, event: StoreEvent) {
    match event {
        StoreEvent::Created { entity, record } => {
            debug!(%entity, local_key = record.local_key, "store: created");
            collections.insert(entity, record);
        }
        StoreEvent::Updated {
            entity,
            local_key,
            data,
            updated_at,
        } => {
            if let Some(record) = collections
                .entities
                .get_mut(&entity)
                .and_then(|c| c.get_mut(&local_key))
            {
                record.data = data;
                record.updated_at = updated_at;
            }
        }
        StoreEvent::Deleted { entity, local_key } => {
            debug!(%entity, local_key, "store: deleted");
            if let Some(collection) = collections.entities.get_mut(&entity) {
                collection.remove(&local_key);
            }
        }
        StoreEvent::Acknowledged {
            entity,
            local_key,
            updated_at,
        } => {
            if let Some(record) = collections
                .entities
                .get_mut(&entity)
                .and_then(|c| c.get_mut(&local_key))
            {
                record.updated_at = updated_at;
                record.confirmed = true;
            }
        }
        StoreEvent::CreateConfirmed {
            entity,
            stable_id,
            canonical_key,
            updated_at,
        } => {
            let collection = collections.entities.entry(entity).or_default();
            let provisional = collection
                .values()
                .find(|r| r.stable_id == stable_id)
                .map(|r| r.local_key);
            if let Some(provisional) = provisional {
                if let Some(mut record) = collection.remove(&provisional) {
                    debug!(
                        %entity,
                        provisional,
                        canonical = canonical_key,
                        "store: create confirmed, repointing"
                    );
                    record.local_key = canonical_key;
                    record.updated_at = updated_at;
                    record.confirmed = true;
                    collection.insert(canonical_key, record);
                }
            }
        }
        StoreEvent::Hydrated { entity, records } => {
            let collection = collections.entities.entry(entity).or_default();
            for record in records {
                collection.insert(record.local_key, record);
            }
        }
    }
}
