//! # Offline Engine
//!
//! The offline-first mutation queue and replay engine. User mutations apply
//! to the optimistic store immediately and are appended to a persistent
//! per-entity-kind queue; when connectivity is available the queues drain in
//! order, one action in flight at a time, and server responses reconcile the
//! store (including the provisional-to-canonical identity repoint for
//! creates).
//!
//! ## Key Components
//!
//! - `action.rs`: replayable actions as pure data + the interpreter
//! - `queue.rs`: per-kind FIFO queues and the refresh queue
//! - `optimistic.rs`: entity collections + the pure reducer
//! - `reconciliation.rs`: stable-id to local-key identity map
//! - `replay.rs`: single-action execution and outcome classification
//! - `storage.rs`: the SQLite store everything is mirrored into
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use quillworks::api::http::HttpBackend;
//! use quillworks::model::EntityKind;
//! use quillworks::offline::{Command, OfflineEngine};
//! use quillworks::shared::config::EngineConfig;
//!
//! # async fn example() -> Result<(), quillworks::shared::error::EngineError> {
//! let config = EngineConfig::default();
//! let backend = Arc::new(HttpBackend::new(&config)?);
//! let engine = OfflineEngine::builder(backend).config(config).build().await?;
//!
//! engine.authenticate("casey", "hunter2").await?;
//! engine
//!     .dispatch(Command::Create {
//!         entity: EntityKind::Book,
//!         payload: serde_json::json!({ "title": "Alpha" }),
//!     })
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod action;
pub mod optimistic;
pub mod queue;
pub mod reconciliation;
mod replay;
pub mod storage;

// Re-export main types
pub use action::{ActionKind, QueuedAction, RefreshMarker};
pub use optimistic::{reduce, Collections, StoreEvent};
pub use queue::{ActionQueue, QueueSet};
pub use reconciliation::IdentityReconciler;
pub use storage::LocalStore;

use chrono::Utc;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info};

use crate::api::transport::Backend;
use crate::model::{
    Credentials, EntityKind, EntityRecord, LocalKey, ProvisionalKeys, StableId,
};
use crate::offline::action::ActionReceipt;
use crate::offline::replay::{replay_action, replay_refresh, RefreshOutcome, ReplayOutcome};
use crate::shared::config::EngineConfig;
use crate::shared::error::{
    codes, ApiError, EngineError, ErrorNotice, Notifier, Result, TracingNotifier,
};
use crate::sync::network_monitor::ConnectivityMonitor;
use crate::sync::sync_state::SyncState;

/// Recent error notices kept on the status snapshot.
const MAX_RECENT_ERRORS: usize = 20;

/// A user mutation entering the engine. All state changes flow through
/// [`OfflineEngine::dispatch`]; there is no other mutation entry point.
#[derive(Debug, Clone)]
pub enum Command {
    Create {
        entity: EntityKind,
        payload: serde_json::Value,
    },
    Update {
        entity: EntityKind,
        local_key: LocalKey,
        payload: serde_json::Value,
    },
    Delete {
        entity: EntityKind,
        local_key: LocalKey,
    },
}

/// What `dispatch` hands back: the identity the caller can keep (stable id)
/// and the key the entity currently lives under.
#[derive(Debug, Clone)]
pub struct DispatchReceipt {
    pub stable_id: StableId,
    pub local_key: LocalKey,
}

#[derive(Debug, Default)]
struct SessionState {
    credentials: Option<Credentials>,
    /// Set when a refresh fails terminally; replay stays halted until the
    /// user authenticates again.
    halted: bool,
}

/// The offline-first mutation queue and replay engine.
pub struct OfflineEngine {
    backend: Arc<dyn Backend>,
    notifier: Arc<dyn Notifier>,
    monitor: ConnectivityMonitor,
    queues: RwLock<QueueSet>,
    collections: RwLock<Collections>,
    reconciler: RwLock<IdentityReconciler>,
    provisional: StdMutex<ProvisionalKeys>,
    session: RwLock<SessionState>,
    store: Option<LocalStore>,
    /// Single-flight guard: at most one drain loop runs at a time.
    drain_flight: Mutex<()>,
    errors: RwLock<Vec<ErrorNotice>>,
    hydration_marks: RwLock<std::collections::HashMap<EntityKind, chrono::DateTime<Utc>>>,
}

impl OfflineEngine {
    /// Start building an engine around a transport.
    pub fn builder(backend: Arc<dyn Backend>) -> EngineBuilder {
        EngineBuilder {
            backend,
            config: EngineConfig::default(),
            notifier: Arc::new(TracingNotifier),
            store: None,
        }
    }

    // --- dispatch ---

    /// The single mutation entry point: apply the optimistic effect, enqueue
    /// the replayable action, persist both, and drain if online.
    pub async fn dispatch(&self, command: Command) -> Result<DispatchReceipt> {
        let receipt = match command {
            Command::Create { entity, payload } => self.dispatch_create(entity, payload).await?,
            Command::Update {
                entity,
                local_key,
                payload,
            } => self.dispatch_update(entity, local_key, payload).await?,
            Command::Delete { entity, local_key } => {
                self.dispatch_delete(entity, local_key).await?
            }
        };

        if !self.monitor.is_offline().await {
            self.drain().await;
        }
        Ok(receipt)
    }

    async fn dispatch_create(
        &self,
        entity: EntityKind,
        payload: serde_json::Value,
    ) -> Result<DispatchReceipt> {
        let stable_id = StableId::new();
        let now = Utc::now();
        let local_key = self
            .provisional
            .lock()
            .expect("provisional key allocator poisoned")
            .next(now);

        let record = EntityRecord {
            stable_id,
            local_key,
            data: payload.clone(),
            updated_at: now,
            confirmed: false,
        };
        {
            let mut collections = self.collections.write().await;
            reduce(
                &mut collections,
                StoreEvent::Created {
                    entity,
                    record: record.clone(),
                },
            );
        }
        self.reconciler.write().await.register(stable_id, local_key);

        let action = QueuedAction::new(
            ActionKind::Create,
            entity,
            stable_id,
            local_key,
            payload,
            now,
        );
        self.queues.write().await.enqueue(action.clone());

        if let Some(store) = &self.store {
            store.upsert_entity(entity, &record).await?;
            store.insert_action(&action).await?;
        }
        debug!(%entity, %stable_id, local_key, "dispatched create");
        Ok(DispatchReceipt {
            stable_id,
            local_key,
        })
    }

    async fn dispatch_update(
        &self,
        entity: EntityKind,
        local_key: LocalKey,
        payload: serde_json::Value,
    ) -> Result<DispatchReceipt> {
        let stable_id = {
            let collections = self.collections.read().await;
            collections
                .get(entity, local_key)
                .map(|r| r.stable_id)
                .ok_or(EngineError::UnknownEntity(local_key))?
        };
        // Resolve through the reconciler; the caller's key may predate a
        // create-confirmation repoint.
        let current_key = self
            .reconciler
            .read()
            .await
            .resolve_local_key(stable_id)
            .unwrap_or(local_key);
        let now = Utc::now();
        {
            let mut collections = self.collections.write().await;
            reduce(
                &mut collections,
                StoreEvent::Updated {
                    entity,
                    local_key: current_key,
                    data: payload.clone(),
                    updated_at: now,
                },
            );
        }

        let action = QueuedAction::new(
            ActionKind::Update,
            entity,
            stable_id,
            current_key,
            payload,
            now,
        );
        self.queues.write().await.enqueue(action.clone());

        if let Some(store) = &self.store {
            let record = {
                let collections = self.collections.read().await;
                collections.get(entity, current_key).cloned()
            };
            if let Some(record) = record {
                store.upsert_entity(entity, &record).await?;
            }
            store.insert_action(&action).await?;
        }
        debug!(%entity, %stable_id, local_key = current_key, "dispatched update");
        Ok(DispatchReceipt {
            stable_id,
            local_key: current_key,
        })
    }

    async fn dispatch_delete(
        &self,
        entity: EntityKind,
        local_key: LocalKey,
    ) -> Result<DispatchReceipt> {
        let stable_id = {
            let collections = self.collections.read().await;
            collections
                .get(entity, local_key)
                .map(|r| r.stable_id)
                .ok_or(EngineError::UnknownEntity(local_key))?
        };
        let current_key = self
            .reconciler
            .read()
            .await
            .resolve_local_key(stable_id)
            .unwrap_or(local_key);
        let now = Utc::now();
        {
            let mut collections = self.collections.write().await;
            reduce(
                &mut collections,
                StoreEvent::Deleted {
                    entity,
                    local_key: current_key,
                },
            );
        }

        // Earlier queued creates/updates for this entity are not pruned; the
        // delete replays after them in FIFO order.
        let action = QueuedAction::new(
            ActionKind::Delete,
            entity,
            stable_id,
            current_key,
            serde_json::Value::Null,
            now,
        );
        self.queues.write().await.enqueue(action.clone());

        if let Some(store) = &self.store {
            store.delete_entity(entity, current_key).await?;
            store.insert_action(&action).await?;
        }
        debug!(%entity, %stable_id, local_key = current_key, "dispatched delete");
        Ok(DispatchReceipt {
            stable_id,
            local_key: current_key,
        })
    }

    // --- drain ---

    /// Replay queued work while connectivity holds: any pending refresh
    /// first, then the head action with the globally smallest enqueue
    /// timestamp. Single-flight; a second call while one runs is a no-op.
    pub async fn drain(&self) {
        let Ok(_flight) = self.drain_flight.try_lock() else {
            return;
        };
        let mut just_refreshed = false;

        loop {
            if self.session.read().await.halted {
                debug!("drain paused: session halted");
                break;
            }
            if self.monitor.is_offline().await {
                break;
            }

            // Refresh work always precedes entity mutations.
            let marker = {
                let queues = self.queues.read().await;
                queues.peek_refresh().cloned()
            };
            if let Some(marker) = marker {
                match self.step_refresh(&marker).await {
                    RefreshStep::Continue => {
                        just_refreshed = true;
                        continue;
                    }
                    RefreshStep::Stop => break,
                }
            }

            let candidate = {
                let queues = self.queues.read().await;
                queues
                    .next_kind()
                    .and_then(|kind| queues.peek_head(kind).cloned())
            };
            let Some(action) = candidate else {
                break;
            };

            let token = {
                let session = self.session.read().await;
                session.credentials.as_ref().map(|c| c.token.clone())
            };
            let Some(token) = token else {
                debug!("drain paused: not authenticated");
                break;
            };

            match replay_action(&*self.backend, &action, &token).await {
                ReplayOutcome::Completed(receipt) => {
                    if let Err(e) = self.finish_success(&action, receipt).await {
                        error!("local store write after replay failed: {}", e);
                    }
                    just_refreshed = false;
                }
                ReplayOutcome::AlreadyCreated(notice) => {
                    // Idempotent-create collision: the entity exists
                    // server-side. The action is discarded and the store is
                    // left untouched; the canonical id is not re-fetched
                    // here (callers hydrate to pick it up).
                    if let Err(e) = self.finish_discard(&action).await {
                        error!("local store write after replay failed: {}", e);
                    }
                    self.surface(notice).await;
                    just_refreshed = false;
                }
                ReplayOutcome::Discarded(notice) => {
                    if let Err(e) = self.finish_discard(&action).await {
                        error!("local store write after replay failed: {}", e);
                    }
                    self.surface(notice).await;
                    just_refreshed = false;
                }
                ReplayOutcome::AuthExpired => {
                    if just_refreshed {
                        // The server rejected the action with fresh
                        // credentials: an unauthorized action, terminal.
                        if let Err(e) = self.finish_discard(&action).await {
                            error!("local store write after replay failed: {}", e);
                        }
                        self.surface(ErrorNotice::new(
                            codes::UNAUTHORIZED,
                            format!(
                                "{} {} rejected with fresh credentials",
                                action.kind.as_str(),
                                action.entity
                            ),
                            "You are not allowed to make this change",
                        ))
                        .await;
                        just_refreshed = false;
                    } else {
                        self.schedule_refresh_marker().await;
                        continue;
                    }
                }
                ReplayOutcome::Unreachable(notice) => {
                    // Fail fast: flip offline now, leave the action at its
                    // queue head for the next online transition.
                    self.monitor.report_unreachable().await;
                    self.push_error(notice).await;
                    break;
                }
                ReplayOutcome::Retryable(notice) => {
                    self.push_error(notice).await;
                    break;
                }
            }
        }
    }

    async fn step_refresh(&self, marker: &RefreshMarker) -> RefreshStep {
        let refresh_token = {
            let session = self.session.read().await;
            session.credentials.as_ref().map(|c| c.refresh_token.clone())
        };
        let Some(refresh_token) = refresh_token else {
            self.dequeue_refresh_marker(marker).await;
            self.halt_session().await;
            self.surface(ErrorNotice::new(
                codes::REFRESH_EXPIRED,
                "refresh requested without credentials",
                "Your session has expired, please sign in again",
            ))
            .await;
            return RefreshStep::Stop;
        };

        match replay_refresh(&*self.backend, &refresh_token).await {
            RefreshOutcome::Refreshed(credentials) => {
                {
                    let mut session = self.session.write().await;
                    session.credentials = Some(credentials.clone());
                    session.halted = false;
                }
                self.dequeue_refresh_marker(marker).await;
                if let Some(store) = &self.store {
                    if let Err(e) = store.save_credentials(&credentials).await {
                        error!("persisting refreshed credentials failed: {}", e);
                    }
                }
                info!("session credentials refreshed");
                RefreshStep::Continue
            }
            RefreshOutcome::Unreachable(notice) => {
                self.monitor.report_unreachable().await;
                self.push_error(notice).await;
                RefreshStep::Stop
            }
            RefreshOutcome::Terminal(notice) => {
                self.dequeue_refresh_marker(marker).await;
                self.halt_session().await;
                self.surface(notice).await;
                RefreshStep::Stop
            }
            RefreshOutcome::Retryable(notice) => {
                self.push_error(notice).await;
                RefreshStep::Stop
            }
        }
    }

    async fn dequeue_refresh_marker(&self, marker: &RefreshMarker) {
        self.queues.write().await.dequeue_refresh();
        if let Some(store) = &self.store {
            if let Err(e) = store.remove_refresh(marker.id).await {
                error!("removing refresh marker failed: {}", e);
            }
        }
    }

    async fn halt_session(&self) {
        {
            let mut session = self.session.write().await;
            session.credentials = None;
            session.halted = true;
        }
        if let Some(store) = &self.store {
            if let Err(e) = store.clear_credentials().await {
                error!("clearing credentials failed: {}", e);
            }
        }
        info!("session invalidated, replay halted until re-authentication");
    }

    /// Dequeue the completed action and reconcile the store with the
    /// server's response.
    async fn finish_success(&self, action: &QueuedAction, receipt: ActionReceipt) -> Result<()> {
        let dequeued = self.queues.write().await.dequeue_head(action.entity);
        if let (Some(store), Some(dequeued)) = (&self.store, dequeued.as_ref()) {
            store.remove_action(dequeued.id).await?;
        }

        match receipt {
            ActionReceipt::Created {
                canonical_key,
                updated_at,
            } => {
                // Atomic repoint: identity map, store entry, and every
                // still-queued action move to the canonical key before the
                // next drain step can select anything.
                let provisional = self
                    .reconciler
                    .write()
                    .await
                    .reconcile_on_create(action.stable_id, canonical_key)
                    .unwrap_or(action.local_key);
                {
                    let mut collections = self.collections.write().await;
                    reduce(
                        &mut collections,
                        StoreEvent::CreateConfirmed {
                            entity: action.entity,
                            stable_id: action.stable_id,
                            canonical_key,
                            updated_at,
                        },
                    );
                }
                let repointed = self
                    .queues
                    .write()
                    .await
                    .repoint(action.stable_id, canonical_key);
                if let Some(store) = &self.store {
                    let record = {
                        let collections = self.collections.read().await;
                        collections.get(action.entity, canonical_key).cloned()
                    };
                    if let Some(record) = record {
                        store
                            .move_entity(action.entity, provisional, &record)
                            .await?;
                    }
                    store
                        .repoint_actions(action.stable_id, canonical_key)
                        .await?;
                }
                debug!(
                    entity = %action.entity,
                    stable_id = %action.stable_id,
                    canonical = canonical_key,
                    repointed,
                    "create confirmed"
                );
            }
            ActionReceipt::Updated { updated_at } => {
                let local_key = self
                    .reconciler
                    .read()
                    .await
                    .resolve_local_key(action.stable_id)
                    .unwrap_or(action.local_key);
                {
                    let mut collections = self.collections.write().await;
                    reduce(
                        &mut collections,
                        StoreEvent::Acknowledged {
                            entity: action.entity,
                            local_key,
                            updated_at,
                        },
                    );
                }
                if let Some(store) = &self.store {
                    let record = {
                        let collections = self.collections.read().await;
                        collections.get(action.entity, local_key).cloned()
                    };
                    if let Some(record) = record {
                        store.upsert_entity(action.entity, &record).await?;
                    }
                }
            }
            ActionReceipt::Deleted => {
                // The optimistic delete already removed the record; retire
                // the identity once nothing queued references it.
                let still_referenced = {
                    let queues = self.queues.read().await;
                    queues.pending_for(action.stable_id)
                };
                if !still_referenced {
                    self.reconciler.write().await.forget(action.stable_id);
                }
            }
        }
        Ok(())
    }

    /// Dequeue a terminally-failed action without touching the store.
    async fn finish_discard(&self, action: &QueuedAction) -> Result<()> {
        let dequeued = self.queues.write().await.dequeue_head(action.entity);
        if let (Some(store), Some(dequeued)) = (&self.store, dequeued.as_ref()) {
            store.remove_action(dequeued.id).await?;
        }
        Ok(())
    }

    async fn schedule_refresh_marker(&self) {
        let marker = RefreshMarker::new(Utc::now());
        let added = self.queues.write().await.enqueue_refresh(marker.clone());
        if added {
            if let Some(store) = &self.store {
                if let Err(e) = store.insert_refresh(&marker).await {
                    error!("persisting refresh marker failed: {}", e);
                }
            }
        }
    }

    // --- connectivity ---

    /// Probe the backend; on an offline-to-online transition, drain.
    /// Returns whether the engine believes it is online afterwards.
    pub async fn probe(&self) -> bool {
        let came_online = self.monitor.probe(&*self.backend).await;
        if came_online {
            self.drain().await;
        }
        !self.monitor.is_offline().await
    }

    pub async fn is_offline(&self) -> bool {
        self.monitor.is_offline().await
    }

    // --- session ---

    /// Exchange username/password for a session and resume replay.
    pub async fn authenticate(&self, username: &str, password: &str) -> Result<()> {
        let credentials = self.backend.authenticate(username, password).await?;
        {
            let mut session = self.session.write().await;
            session.credentials = Some(credentials.clone());
            session.halted = false;
        }
        if let Some(store) = &self.store {
            store.save_credentials(&credentials).await?;
        }
        if !self.monitor.is_offline().await {
            self.drain().await;
        }
        Ok(())
    }

    /// Drop the session. Queued work stays queued for the next sign-in.
    pub async fn sign_out(&self) -> Result<()> {
        {
            let mut session = self.session.write().await;
            session.credentials = None;
            session.halted = false;
        }
        if let Some(store) = &self.store {
            store.clear_credentials().await?;
        }
        Ok(())
    }

    /// Queue a token refresh ahead of all entity mutations.
    pub async fn schedule_refresh(&self) -> Result<()> {
        let marker = RefreshMarker::new(Utc::now());
        let added = self.queues.write().await.enqueue_refresh(marker.clone());
        if added {
            if let Some(store) = &self.store {
                store.insert_refresh(&marker).await?;
            }
        }
        Ok(())
    }

    // --- hydration ---

    /// Pull server records changed since the last hydration and merge them
    /// into the store. Entities with queued local mutations are skipped so
    /// replay keeps last-write-wins by replay order.
    pub async fn hydrate(&self, entity: EntityKind) -> Result<usize> {
        if self.session.read().await.halted {
            return Err(EngineError::SessionHalted);
        }
        let token = {
            let session = self.session.read().await;
            session.credentials.as_ref().map(|c| c.token.clone())
        }
        .ok_or(EngineError::NotAuthenticated)?;
        let since = {
            let marks = self.hydration_marks.read().await;
            marks.get(&entity).copied()
        };

        let remote = match self.backend.read_all(entity, since, &token).await {
            Ok(remote) => remote,
            Err(err) => {
                if matches!(err, ApiError::Unreachable(_)) {
                    self.monitor.report_unreachable().await;
                }
                return Err(err.into());
            }
        };

        let mut high_water = since;
        let mut merged = Vec::new();
        {
            let queues = self.queues.read().await;
            let mut reconciler = self.reconciler.write().await;
            for record in remote {
                high_water = Some(match high_water {
                    Some(mark) => mark.max(record.updated_at),
                    None => record.updated_at,
                });
                if queues.pending_for(record.stable_id) {
                    continue;
                }
                reconciler.register(record.stable_id, record.id);
                merged.push(EntityRecord {
                    stable_id: record.stable_id,
                    local_key: record.id,
                    data: record.data,
                    updated_at: record.updated_at,
                    confirmed: true,
                });
            }
        }

        let count = merged.len();
        {
            let mut collections = self.collections.write().await;
            reduce(
                &mut collections,
                StoreEvent::Hydrated {
                    entity,
                    records: merged.clone(),
                },
            );
        }
        if let Some(store) = &self.store {
            for record in &merged {
                store.upsert_entity(entity, record).await?;
            }
        }
        if let Some(mark) = high_water {
            self.hydration_marks.write().await.insert(entity, mark);
            if let Some(store) = &self.store {
                store.save_hydration_mark(entity, mark).await?;
            }
        }
        debug!(%entity, merged = count, "hydrated from server");
        Ok(count)
    }

    // --- inspection ---

    pub async fn get(&self, entity: EntityKind, local_key: LocalKey) -> Option<EntityRecord> {
        let collections = self.collections.read().await;
        collections.get(entity, local_key).cloned()
    }

    /// Current records of one kind, sorted by local key.
    pub async fn entities(&self, entity: EntityKind) -> Vec<EntityRecord> {
        let collections = self.collections.read().await;
        collections.snapshot(entity)
    }

    /// The key an entity currently lives under (provisional until its
    /// create confirms, canonical after).
    pub async fn resolve_local_key(&self, stable_id: StableId) -> Option<LocalKey> {
        self.reconciler.read().await.resolve_local_key(stable_id)
    }

    /// Status snapshot for the UI collaborator.
    pub async fn status(&self) -> SyncState {
        let connectivity = self.monitor.state().await;
        let (pending_actions, refresh_pending) = {
            let queues = self.queues.read().await;
            (queues.total_pending(), queues.refresh_pending())
        };
        SyncState {
            is_offline: connectivity.is_offline,
            last_probe_at: connectivity.last_probe_at,
            pending_actions,
            refresh_pending,
            halted: self.session.read().await.halted,
            errors: self.errors.read().await.clone(),
        }
    }

    // --- error surface ---

    async fn push_error(&self, notice: ErrorNotice) {
        let mut errors = self.errors.write().await;
        errors.push(notice);
        if errors.len() > MAX_RECENT_ERRORS {
            let overflow = errors.len() - MAX_RECENT_ERRORS;
            errors.drain(..overflow);
        }
    }

    /// Record and hand a notice to the notifier. Queue/state mutation is
    /// always finished before this runs.
    async fn surface(&self, notice: ErrorNotice) {
        self.push_error(notice.clone()).await;
        self.notifier.notify(&notice);
    }
}

enum RefreshStep {
    Continue,
    Stop,
}

/// Builder for [`OfflineEngine`].
pub struct EngineBuilder {
    backend: Arc<dyn Backend>,
    config: EngineConfig,
    notifier: Arc<dyn Notifier>,
    store: Option<LocalStore>,
}

impl EngineBuilder {
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Attach an already-open local store.
    pub fn store(mut self, store: LocalStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Open the default store under the configured data dir and attach it.
    pub async fn open_store(mut self) -> Result<Self> {
        let path = self.config.store_dir().join("engine.db");
        self.store = Some(LocalStore::open(&path).await?);
        Ok(self)
    }

    /// Build the engine, reloading queues, collections, and credentials
    /// from the store when one is attached.
    pub async fn build(self) -> Result<OfflineEngine> {
        let engine = OfflineEngine {
            backend: self.backend,
            notifier: self.notifier,
            monitor: ConnectivityMonitor::new(),
            queues: RwLock::new(QueueSet::new()),
            collections: RwLock::new(Collections::new()),
            reconciler: RwLock::new(IdentityReconciler::new()),
            provisional: StdMutex::new(ProvisionalKeys::new()),
            session: RwLock::new(SessionState::default()),
            store: self.store,
            drain_flight: Mutex::new(()),
            errors: RwLock::new(Vec::new()),
            hydration_marks: RwLock::new(std::collections::HashMap::new()),
        };

        if let Some(store) = &engine.store {
            let actions = store.load_actions().await?;
            let refresh = store.load_refresh().await?;
            let entities = store.load_entities().await?;
            let credentials = store.load_credentials().await?;
            let marks = store.load_hydration_marks().await?;

            {
                let mut reconciler = engine.reconciler.write().await;
                let mut collections = engine.collections.write().await;
                for (kind, record) in entities {
                    reconciler.register(record.stable_id, record.local_key);
                    collections.insert(kind, record);
                }
                // Queued actions can outlive their store entry (entity
                // deleted locally with the create still queued); make sure
                // their identities resolve for the repoint.
                for action in &actions {
                    if reconciler.resolve_local_key(action.stable_id).is_none() {
                        reconciler.register(action.stable_id, action.local_key);
                    }
                }
            }
            if !actions.is_empty() || !refresh.is_empty() {
                info!(
                    actions = actions.len(),
                    refresh = refresh.len(),
                    "reloaded queued work from local store"
                );
            }
            engine.queues.write().await.load(actions, refresh);
            if let Some(credentials) = credentials {
                engine.session.write().await.credentials = Some(credentials);
            }
            *engine.hydration_marks.write().await = marks;
        }

        Ok(engine)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{DateTime, Duration};

    /// Transport double that accepts every mutation.
    struct AcceptAll {
        next_id: std::sync::atomic::AtomicI64,
    }

    impl AcceptAll {
        fn new() -> Self {
            Self {
                next_id: std::sync::atomic::AtomicI64::new(101),
            }
        }
    }

    fn credentials() -> Credentials {
        Credentials {
            token: "t1".to_string(),
            refresh_token: "r1".to_string(),
            token_expires_at: Utc::now() + Duration::hours(1),
            refresh_expires_at: Utc::now() + Duration::days(7),
        }
    }

    #[async_trait]
    impl Backend for AcceptAll {
        async fn probe(&self) -> std::result::Result<(), ApiError> {
            Ok(())
        }

        async fn create(
            &self,
            _kind: EntityKind,
            _stable_id: StableId,
            _payload: &serde_json::Value,
            _token: &str,
        ) -> std::result::Result<crate::api::CreatedRecord, ApiError> {
            let id = self
                .next_id
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(crate::api::CreatedRecord {
                id,
                updated_at: Utc::now(),
            })
        }

        async fn read(
            &self,
            _kind: EntityKind,
            _id: LocalKey,
            _token: &str,
        ) -> std::result::Result<crate::api::RemoteRecord, ApiError> {
            Err(ApiError::Business {
                code: codes::NOT_FOUND,
                message: "not found".to_string(),
            })
        }

        async fn read_all(
            &self,
            _kind: EntityKind,
            _since: Option<DateTime<Utc>>,
            _token: &str,
        ) -> std::result::Result<Vec<crate::api::RemoteRecord>, ApiError> {
            Ok(Vec::new())
        }

        async fn update(
            &self,
            _kind: EntityKind,
            _id: LocalKey,
            _stable_id: StableId,
            _payload: &serde_json::Value,
            _token: &str,
        ) -> std::result::Result<crate::api::UpdatedRecord, ApiError> {
            Ok(crate::api::UpdatedRecord {
                updated_at: Utc::now(),
            })
        }

        async fn delete(
            &self,
            _kind: EntityKind,
            _id: LocalKey,
            _stable_id: StableId,
            _token: &str,
        ) -> std::result::Result<(), ApiError> {
            Ok(())
        }

        async fn authenticate(
            &self,
            _username: &str,
            _password: &str,
        ) -> std::result::Result<Credentials, ApiError> {
            Ok(credentials())
        }

        async fn refresh(
            &self,
            _refresh_token: &str,
        ) -> std::result::Result<Credentials, ApiError> {
            Ok(credentials())
        }
    }

    #[tokio::test]
    async fn test_dispatch_create_assigns_provisional_identity() {
        let engine = OfflineEngine::builder(Arc::new(AcceptAll::new()))
            .build()
            .await
            .unwrap();
        engine.monitor.report_unreachable().await;

        let receipt = engine
            .dispatch(Command::Create {
                entity: EntityKind::Book,
                payload: serde_json::json!({ "title": "Alpha" }),
            })
            .await
            .unwrap();

        assert!(receipt.local_key < 0);
        let record = engine.get(EntityKind::Book, receipt.local_key).await.unwrap();
        assert_eq!(record.stable_id, receipt.stable_id);
        assert!(!record.confirmed);
        assert_eq!(engine.status().await.pending_actions, 1);
    }

    #[tokio::test]
    async fn test_update_unknown_entity_is_rejected() {
        let engine = OfflineEngine::builder(Arc::new(AcceptAll::new()))
            .build()
            .await
            .unwrap();
        let result = engine
            .dispatch(Command::Update {
                entity: EntityKind::Book,
                local_key: 42,
                payload: serde_json::json!({}),
            })
            .await;
        assert!(matches!(result, Err(EngineError::UnknownEntity(42))));
    }

    #[tokio::test]
    async fn test_online_dispatch_drains_immediately() {
        let engine = OfflineEngine::builder(Arc::new(AcceptAll::new()))
            .build()
            .await
            .unwrap();
        engine.authenticate("casey", "hunter2").await.unwrap();

        let receipt = engine
            .dispatch(Command::Create {
                entity: EntityKind::Book,
                payload: serde_json::json!({ "title": "Alpha" }),
            })
            .await
            .unwrap();

        // The create replayed inline: queue empty, key canonical.
        assert_eq!(engine.status().await.pending_actions, 0);
        let canonical = engine.resolve_local_key(receipt.stable_id).await.unwrap();
        assert!(canonical > 0);
        assert!(engine.get(EntityKind::Book, canonical).await.unwrap().confirmed);
    }
}
