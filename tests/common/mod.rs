//! Shared test helpers: a scriptable in-process transport double.
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use quillworks::api::{CreatedRecord, RemoteRecord, UpdatedRecord};
use quillworks::model::{Credentials, EntityKind, LocalKey, StableId};
use quillworks::offline::OfflineEngine;
use quillworks::shared::error::ApiError;
use quillworks::Backend;

/// One observed backend call, for ordering assertions.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Probe,
    Create {
        entity: EntityKind,
        stable_id: StableId,
        payload: serde_json::Value,
    },
    Update {
        entity: EntityKind,
        id: LocalKey,
        payload: serde_json::Value,
    },
    Delete {
        entity: EntityKind,
        id: LocalKey,
    },
    ReadAll {
        entity: EntityKind,
    },
    Authenticate,
    Refresh,
}

impl Call {
    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            Call::Create { .. } | Call::Update { .. } | Call::Delete { .. }
        )
    }
}

/// Transport double. Mutations succeed with server ids counting up from 101
/// unless an outcome has been scripted; scripted outcomes are consumed in
/// FIFO order, one per mutation call.
pub struct MockBackend {
    next_id: AtomicI64,
    calls: Mutex<Vec<Call>>,
    mutation_script: Mutex<VecDeque<Option<ApiError>>>,
    refresh_failures: Mutex<VecDeque<ApiError>>,
    probe_failures: Mutex<VecDeque<ApiError>>,
    remote: Mutex<Vec<RemoteRecord>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self {
            next_id: AtomicI64::new(101),
            calls: Mutex::new(Vec::new()),
            mutation_script: Mutex::new(VecDeque::new()),
            refresh_failures: Mutex::new(VecDeque::new()),
            probe_failures: Mutex::new(VecDeque::new()),
            remote: Mutex::new(Vec::new()),
        }
    }

    pub fn fail_next_mutation(&self, err: ApiError) {
        self.mutation_script.lock().unwrap().push_back(Some(err));
    }

    /// Let the next mutation through; useful ahead of a scripted failure
    /// when only the second call in a drain should fail.
    pub fn pass_next_mutation(&self) {
        self.mutation_script.lock().unwrap().push_back(None);
    }

    pub fn fail_next_refresh(&self, err: ApiError) {
        self.refresh_failures.lock().unwrap().push_back(err);
    }

    pub fn fail_next_probe(&self, err: ApiError) {
        self.probe_failures.lock().unwrap().push_back(err);
    }

    /// Records returned by subsequent `read_all` calls.
    pub fn set_remote(&self, records: Vec<RemoteRecord>) {
        *self.remote.lock().unwrap() = records;
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    /// Only the entity mutations, in observed order.
    pub fn mutation_calls(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| c.is_mutation())
            .collect()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    fn take(&self, queue: &Mutex<VecDeque<ApiError>>) -> Option<ApiError> {
        queue.lock().unwrap().pop_front()
    }

    fn next_mutation_outcome(&self) -> Option<ApiError> {
        self.mutation_script.lock().unwrap().pop_front().flatten()
    }
}

pub fn credentials(token: &str) -> Credentials {
    Credentials {
        token: token.to_string(),
        refresh_token: format!("refresh-{token}"),
        token_expires_at: Utc::now() + Duration::hours(1),
        refresh_expires_at: Utc::now() + Duration::days(7),
    }
}

#[async_trait]
impl Backend for MockBackend {
    async fn probe(&self) -> Result<(), ApiError> {
        self.record(Call::Probe);
        match self.take(&self.probe_failures) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn create(
        &self,
        kind: EntityKind,
        stable_id: StableId,
        payload: &serde_json::Value,
        _token: &str,
    ) -> Result<CreatedRecord, ApiError> {
        self.record(Call::Create {
            entity: kind,
            stable_id,
            payload: payload.clone(),
        });
        match self.next_mutation_outcome() {
            Some(err) => Err(err),
            None => Ok(CreatedRecord {
                id: self.next_id.fetch_add(1, Ordering::SeqCst),
                updated_at: Utc::now(),
            }),
        }
    }

    async fn read(
        &self,
        _kind: EntityKind,
        _id: LocalKey,
        _token: &str,
    ) -> Result<RemoteRecord, ApiError> {
        Err(ApiError::Business {
            code: quillworks::shared::error::codes::NOT_FOUND,
            message: "not found".to_string(),
        })
    }

    async fn read_all(
        &self,
        kind: EntityKind,
        _since: Option<DateTime<Utc>>,
        _token: &str,
    ) -> Result<Vec<RemoteRecord>, ApiError> {
        self.record(Call::ReadAll { entity: kind });
        Ok(self.remote.lock().unwrap().clone())
    }

    async fn update(
        &self,
        kind: EntityKind,
        id: LocalKey,
        _stable_id: StableId,
        payload: &serde_json::Value,
        _token: &str,
    ) -> Result<UpdatedRecord, ApiError> {
        self.record(Call::Update {
            entity: kind,
            id,
            payload: payload.clone(),
        });
        match self.next_mutation_outcome() {
            Some(err) => Err(err),
            None => Ok(UpdatedRecord {
                updated_at: Utc::now(),
            }),
        }
    }

    async fn delete(
        &self,
        kind: EntityKind,
        id: LocalKey,
        _stable_id: StableId,
        _token: &str,
    ) -> Result<(), ApiError> {
        self.record(Call::Delete { entity: kind, id });
        match self.next_mutation_outcome() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn authenticate(
        &self,
        _username: &str,
        _password: &str,
    ) -> Result<Credentials, ApiError> {
        self.record(Call::Authenticate);
        Ok(credentials("t1"))
    }

    async fn refresh(&self, _refresh_token: &str) -> Result<Credentials, ApiError> {
        self.record(Call::Refresh);
        match self.take(&self.refresh_failures) {
            Some(err) => Err(err),
            None => Ok(credentials("t2")),
        }
    }
}

/// A fresh engine over the given mock, no persistence.
pub async fn engine_over(mock: Arc<MockBackend>) -> OfflineEngine {
    OfflineEngine::builder(mock).build().await.unwrap()
}

/// Force the engine offline through a failed probe.
pub async fn go_offline(engine: &OfflineEngine, mock: &MockBackend) {
    mock.fail_next_probe(ApiError::unreachable("probe scripted to fail"));
    engine.probe().await;
    assert!(engine.is_offline().await);
}

/// Restore connectivity; the probe success triggers a drain.
pub async fn reconnect(engine: &OfflineEngine) {
    assert!(engine.probe().await);
}
