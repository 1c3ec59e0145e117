//! Backend transport trait
//!
//! The replay scheduler executes queued actions through this trait, which
//! keeps the engine testable with in-process doubles and keeps the HTTP
//! client swappable.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::api::{CreatedRecord, RemoteRecord, UpdatedRecord};
use crate::model::{Credentials, EntityKind, LocalKey, StableId};
use crate::shared::error::ApiError;

/// The operations the engine consumes from the REST API.
///
/// Every entity mutation carries the entity's stable client identifier and,
/// where applicable, its canonical identifier. Errors come back already
/// classified into the taxonomy the scheduler branches on.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Lightweight reachability check.
    async fn probe(&self) -> Result<(), ApiError>;

    /// Create an entity; the stable id is the idempotency key.
    async fn create(
        &self,
        kind: EntityKind,
        stable_id: StableId,
        payload: &serde_json::Value,
        token: &str,
    ) -> Result<CreatedRecord, ApiError>;

    /// Fetch a single entity by canonical id.
    async fn read(
        &self,
        kind: EntityKind,
        id: LocalKey,
        token: &str,
    ) -> Result<RemoteRecord, ApiError>;

    /// Fetch entities changed since the given timestamp (all when `None`).
    async fn read_all(
        &self,
        kind: EntityKind,
        since: Option<DateTime<Utc>>,
        token: &str,
    ) -> Result<Vec<RemoteRecord>, ApiError>;

    /// Update an entity by canonical id.
    async fn update(
        &self,
        kind: EntityKind,
        id: LocalKey,
        stable_id: StableId,
        payload: &serde_json::Value,
        token: &str,
    ) -> Result<UpdatedRecord, ApiError>;

    /// Delete an entity by canonical id.
    async fn delete(
        &self,
        kind: EntityKind,
        id: LocalKey,
        stable_id: StableId,
        token: &str,
    ) -> Result<(), ApiError>;

    /// Exchange username/password for a credential pair.
    async fn authenticate(&self, username: &str, password: &str)
        -> Result<Credentials, ApiError>;

    /// Exchange a refresh token for a fresh credential pair.
    async fn refresh(&self, refresh_token: &str) -> Result<Credentials, ApiError>;
}
