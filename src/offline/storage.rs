//! # Local Store
//!
//! SQLite persistence for everything that must survive a full reload:
//! queued actions, refresh markers, the entity collections, the credential
//! pair, and per-kind hydration marks.
//!
//! The store is written inside the same dispatch/drain step that mutates the
//! in-memory state, so a reload reconstructs the engine exactly where it
//! left off. Replay order is insertion order (`rowid`), not timestamp text.

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use std::path::Path;
use tracing::warn;
use uuid::Uuid;

use crate::model::{Credentials, EntityKind, EntityRecord, LocalKey, StableId};
use crate::offline::action::{ActionKind, QueuedAction, RefreshMarker};
use crate::shared::error::{EngineError, Result};

/// Persistent store for one client profile.
#[derive(Debug)]
pub struct LocalStore {
    pool: SqlitePool,
}

fn encode_time(t: &DateTime<Utc>) -> String {
    t.to_rfc3339()
}

fn decode_time(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| EngineError::Storage(sqlx::Error::Decode(Box::new(e))))
}

impl LocalStore {
    /// Open or create the store at the given path.
    ///
    /// A single pooled connection keeps writes serialized; WAL mode keeps
    /// reads cheap alongside them.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| EngineError::Storage(sqlx::Error::Io(e)))?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        sqlx::raw_sql(include_str!("schema.sql"))
            .execute(&pool)
            .await?;

        Ok(Self { pool })
    }

    // --- action queue ---

    pub async fn insert_action(&self, action: &QueuedAction) -> Result<()> {
        sqlx::query(
            "INSERT INTO action_queue (id, entity, kind, stable_id, local_key, payload, queued_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(action.id.to_string())
        .bind(action.entity.as_str())
        .bind(action.kind.as_str())
        .bind(action.stable_id.to_string())
        .bind(action.local_key)
        .bind(serde_json::to_string(&action.payload)?)
        .bind(encode_time(&action.queued_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn remove_action(&self, id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM action_queue WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Rewrite the persisted local key of every action referencing the
    /// stable id, mirroring the in-memory repoint.
    pub async fn repoint_actions(
        &self,
        stable_id: StableId,
        canonical_key: LocalKey,
    ) -> Result<()> {
        sqlx::query("UPDATE action_queue SET local_key = ? WHERE stable_id = ?")
            .bind(canonical_key)
            .bind(stable_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Queued actions in replay order. Malformed rows are skipped rather
    /// than poisoning the whole queue.
    pub async fn load_actions(&self) -> Result<Vec<QueuedAction>> {
        let rows = sqlx::query(
            "SELECT id, entity, kind, stable_id, local_key, payload, queued_at
             FROM action_queue ORDER BY rowid ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut actions = Vec::with_capacity(rows.len());
        for row in rows {
            let entity_raw: String = row.try_get("entity")?;
            let kind_raw: String = row.try_get("kind")?;
            let (Some(entity), Some(kind)) =
                (EntityKind::parse(&entity_raw), ActionKind::parse(&kind_raw))
            else {
                warn!(entity = %entity_raw, kind = %kind_raw, "skipping unknown queued action row");
                continue;
            };
            let id_raw: String = row.try_get("id")?;
            let stable_raw: String = row.try_get("stable_id")?;
            let (Ok(id), Some(stable_id)) =
                (Uuid::parse_str(&id_raw), StableId::parse(&stable_raw))
            else {
                warn!("skipping queued action row with malformed identifiers");
                continue;
            };
            let payload_raw: String = row.try_get("payload")?;
            let queued_at_raw: String = row.try_get("queued_at")?;
            actions.push(QueuedAction {
                id,
                kind,
                entity,
                stable_id,
                local_key: row.try_get("local_key")?,
                payload: serde_json::from_str(&payload_raw)?,
                queued_at: decode_time(&queued_at_raw)?,
            });
        }
        Ok(actions)
    }

    // --- refresh queue ---

    pub async fn insert_refresh(&self, marker: &RefreshMarker) -> Result<()> {
        sqlx::query("INSERT INTO refresh_queue (id, queued_at) VALUES (?, ?)")
            .bind(marker.id.to_string())
            .bind(encode_time(&marker.queued_at))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn remove_refresh(&self, id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM refresh_queue WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn load_refresh(&self) -> Result<Vec<RefreshMarker>> {
        let rows = sqlx::query("SELECT id, queued_at FROM refresh_queue ORDER BY rowid ASC")
            .fetch_all(&self.pool)
            .await?;
        let mut markers = Vec::with_capacity(rows.len());
        for row in rows {
            let id_raw: String = row.try_get("id")?;
            let Ok(id) = Uuid::parse_str(&id_raw) else {
                warn!("skipping refresh row with malformed id");
                continue;
            };
            let queued_at_raw: String = row.try_get("queued_at")?;
            markers.push(RefreshMarker {
                id,
                queued_at: decode_time(&queued_at_raw)?,
            });
        }
        Ok(markers)
    }

    // --- entity collections ---

    pub async fn upsert_entity(&self, kind: EntityKind, record: &EntityRecord) -> Result<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO entities (entity, local_key, stable_id, data, updated_at, confirmed)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(kind.as_str())
        .bind(record.local_key)
        .bind(record.stable_id.to_string())
        .bind(serde_json::to_string(&record.data)?)
        .bind(encode_time(&record.updated_at))
        .bind(record.confirmed as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn delete_entity(&self, kind: EntityKind, local_key: LocalKey) -> Result<()> {
        sqlx::query("DELETE FROM entities WHERE entity = ? AND local_key = ?")
            .bind(kind.as_str())
            .bind(local_key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Move a record from its provisional row to its canonical row in one
    /// transaction (the persisted half of the create-confirmation repoint).
    pub async fn move_entity(
        &self,
        kind: EntityKind,
        provisional_key: LocalKey,
        record: &EntityRecord,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM entities WHERE entity = ? AND local_key = ?")
            .bind(kind.as_str())
            .bind(provisional_key)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "INSERT OR REPLACE INTO entities (entity, local_key, stable_id, data, updated_at, confirmed)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(kind.as_str())
        .bind(record.local_key)
        .bind(record.stable_id.to_string())
        .bind(serde_json::to_string(&record.data)?)
        .bind(encode_time(&record.updated_at))
        .bind(record.confirmed as i64)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn load_entities(&self) -> Result<Vec<(EntityKind, EntityRecord)>> {
        let rows = sqlx::query(
            "SELECT entity, local_key, stable_id, data, updated_at, confirmed FROM entities",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let entity_raw: String = row.try_get("entity")?;
            let Some(entity) = EntityKind::parse(&entity_raw) else {
                warn!(entity = %entity_raw, "skipping entity row of unknown kind");
                continue;
            };
            let stable_raw: String = row.try_get("stable_id")?;
            let Some(stable_id) = StableId::parse(&stable_raw) else {
                warn!("skipping entity row with malformed stable id");
                continue;
            };
            let data_raw: String = row.try_get("data")?;
            let updated_at_raw: String = row.try_get("updated_at")?;
            let confirmed: i64 = row.try_get("confirmed")?;
            records.push((
                entity,
                EntityRecord {
                    stable_id,
                    local_key: row.try_get("local_key")?,
                    data: serde_json::from_str(&data_raw)?,
                    updated_at: decode_time(&updated_at_raw)?,
                    confirmed: confirmed != 0,
                },
            ));
        }
        Ok(records)
    }

    // --- credentials ---

    pub async fn save_credentials(&self, credentials: &Credentials) -> Result<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO credentials (slot, token, refresh_token, token_expires_at, refresh_expires_at)
             VALUES (0, ?, ?, ?, ?)",
        )
        .bind(&credentials.token)
        .bind(&credentials.refresh_token)
        .bind(encode_time(&credentials.token_expires_at))
        .bind(encode_time(&credentials.refresh_expires_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn load_credentials(&self) -> Result<Option<Credentials>> {
        let row = sqlx::query(
            "SELECT token, refresh_token, token_expires_at, refresh_expires_at
             FROM credentials WHERE slot = 0",
        )
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let token_expires_raw: String = row.try_get("token_expires_at")?;
                let refresh_expires_raw: String = row.try_get("refresh_expires_at")?;
                Ok(Some(Credentials {
                    token: row.try_get("token")?,
                    refresh_token: row.try_get("refresh_token")?,
                    token_expires_at: decode_time(&token_expires_raw)?,
                    refresh_expires_at: decode_time(&refresh_expires_raw)?,
                }))
            }
            None => Ok(None),
        }
    }

    pub async fn clear_credentials(&self) -> Result<()> {
        sqlx::query("DELETE FROM credentials WHERE slot = 0")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // --- hydration marks ---

    pub async fn save_hydration_mark(
        &self,
        kind: EntityKind,
        since: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query("INSERT OR REPLACE INTO hydration_marks (entity, since) VALUES (?, ?)")
            .bind(kind.as_str())
            .bind(encode_time(&since))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn load_hydration_marks(&self) -> Result<HashMap<EntityKind, DateTime<Utc>>> {
        let rows = sqlx::query("SELECT entity, since FROM hydration_marks")
            .fetch_all(&self.pool)
            .await?;
        let mut marks = HashMap::new();
        for row in rows {
            let entity_raw: String = row.try_get("entity")?;
            let Some(entity) = EntityKind::parse(&entity_raw) else {
                continue;
            };
            let since_raw: String = row.try_get("since")?;
            marks.insert(entity, decode_time(&since_raw)?);
        }
        Ok(marks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::offline::action::ActionKind;
    use tempfile::tempdir;

    async fn store() -> (tempfile::TempDir, LocalStore) {
        let dir = tempdir().unwrap();
        let store = LocalStore::open(&dir.path().join("engine.db")).await.unwrap();
        (dir, store)
    }

    fn sample_action(local_key: LocalKey) -> QueuedAction {
        QueuedAction::new(
            ActionKind::Create,
            EntityKind::Book,
            StableId::new(),
            local_key,
            serde_json::json!({ "title": "Alpha" }),
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn test_action_round_trip_in_order() {
        let (_dir, store) = store().await;
        let first = sample_action(-1000);
        let second = sample_action(-1001);
        store.insert_action(&first).await.unwrap();
        store.insert_action(&second).await.unwrap();

        let loaded = store.load_actions().await.unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].id, first.id);
        assert_eq!(loaded[1].id, second.id);
        assert_eq!(loaded[0].payload, first.payload);

        store.remove_action(first.id).await.unwrap();
        let loaded = store.load_actions().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, second.id);
    }

    #[tokio::test]
    async fn test_repoint_actions() {
        let (_dir, store) = store().await;
        let action = sample_action(-1000);
        store.insert_action(&action).await.unwrap();

        store.repoint_actions(action.stable_id, 101).await.unwrap();
        let loaded = store.load_actions().await.unwrap();
        assert_eq!(loaded[0].local_key, 101);
    }

    #[tokio::test]
    async fn test_entity_move() {
        let (_dir, store) = store().await;
        let stable = StableId::new();
        let mut record = EntityRecord {
            stable_id: stable,
            local_key: -1000,
            data: serde_json::json!({ "title": "Alpha" }),
            updated_at: Utc::now(),
            confirmed: false,
        };
        store.upsert_entity(EntityKind::Book, &record).await.unwrap();

        record.local_key = 101;
        record.confirmed = true;
        store
            .move_entity(EntityKind::Book, -1000, &record)
            .await
            .unwrap();

        let loaded = store.load_entities().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].1.local_key, 101);
        assert!(loaded[0].1.confirmed);
    }

    #[tokio::test]
    async fn test_credentials_round_trip() {
        let (_dir, store) = store().await;
        assert!(store.load_credentials().await.unwrap().is_none());

        let credentials = Credentials {
            token: "t1".to_string(),
            refresh_token: "r1".to_string(),
            token_expires_at: Utc::now(),
            refresh_expires_at: Utc::now(),
        };
        store.save_credentials(&credentials).await.unwrap();
        let loaded = store.load_credentials().await.unwrap().unwrap();
        assert_eq!(loaded.token, "t1");
        assert_eq!(loaded.refresh_token, "r1");

        store.clear_credentials().await.unwrap();
        assert!(store.load_credentials().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_hydration_marks() {
        let (_dir, store) = store().await;
        let now = Utc::now();
        store
            .save_hydration_mark(EntityKind::Chapter, now)
            .await
            .unwrap();
        let marks = store.load_hydration_marks().await.unwrap();
        assert_eq!(marks.len(), 1);
        assert!(marks.contains_key(&EntityKind::Chapter));
    }
}
