//! HTTP Backend
//!
//! reqwest implementation of the [`Backend`] trait. Network-level failures
//! (timeout, refused connection, DNS) classify as `Unreachable`; HTTP error
//! statuses are mapped through the error envelope into the business/auth/
//! server taxonomy.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Response, StatusCode};
use tracing::debug;

use crate::api::transport::Backend;
use crate::api::{
    ApiErrorBody, AuthRequest, CreatedRecord, MutationRequest, RefreshRequest, RemoteRecord,
    UpdatedRecord,
};
use crate::model::{Credentials, EntityKind, LocalKey, StableId};
use crate::shared::config::EngineConfig;
use crate::shared::error::{codes, ApiError, EngineError};

/// HTTP client for the content API.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: Client,
    base_url: String,
}

impl HttpBackend {
    /// Build a client honoring the configured per-request timeout.
    pub fn new(config: &EngineConfig) -> Result<Self, EngineError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ApiError::unreachable(format!("http client init: {}", e)))?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn collection_url(&self, kind: EntityKind) -> String {
        format!("{}/api/{}", self.base_url, kind.path_segment())
    }

    fn record_url(&self, kind: EntityKind, id: LocalKey) -> String {
        format!("{}/api/{}/{}", self.base_url, kind.path_segment(), id)
    }

    /// Check a response status and decode the body, classifying failures.
    async fn decode<T: serde::de::DeserializeOwned>(response: Response) -> Result<T, ApiError> {
        if !response.status().is_success() {
            return Err(classify_status(response).await);
        }
        response.json::<T>().await.map_err(transport_error)
    }
}

/// Classify a network-level reqwest failure.
fn transport_error(err: reqwest::Error) -> ApiError {
    if err.is_decode() {
        ApiError::Server {
            status: 0,
            message: format!("malformed response: {}", err),
        }
    } else {
        ApiError::Unreachable(err.to_string())
    }
}

/// Map a non-success HTTP status plus error envelope into the taxonomy.
async fn classify_status(response: Response) -> ApiError {
    let status = response.status();
    let body = response.json::<ApiErrorBody>().await.ok();
    let (code, message) = match body {
        Some(body) => (body.code, body.error),
        None => (0, status.to_string()),
    };
    debug!(status = status.as_u16(), code, "request failed: {}", message);

    if status == StatusCode::UNAUTHORIZED {
        ApiError::Auth {
            code: if code != 0 { code } else { codes::TOKEN_EXPIRED },
            message,
        }
    } else if status.is_server_error() {
        ApiError::Server {
            status: status.as_u16(),
            message,
        }
    } else {
        ApiError::Business {
            code: if code != 0 { code } else { codes::VALIDATION },
            message,
        }
    }
}

#[async_trait]
impl Backend for HttpBackend {
    async fn probe(&self) -> Result<(), ApiError> {
        let url = format!("{}/api/health", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(transport_error)?;
        if !response.status().is_success() {
            return Err(classify_status(response).await);
        }
        Ok(())
    }

    async fn create(
        &self,
        kind: EntityKind,
        stable_id: StableId,
        payload: &serde_json::Value,
        token: &str,
    ) -> Result<CreatedRecord, ApiError> {
        let response = self
            .client
            .post(self.collection_url(kind))
            .bearer_auth(token)
            .json(&MutationRequest {
                stable_id,
                data: payload,
            })
            .send()
            .await
            .map_err(transport_error)?;
        Self::decode(response).await
    }

    async fn read(
        &self,
        kind: EntityKind,
        id: LocalKey,
        token: &str,
    ) -> Result<RemoteRecord, ApiError> {
        let response = self
            .client
            .get(self.record_url(kind, id))
            .bearer_auth(token)
            .send()
            .await
            .map_err(transport_error)?;
        Self::decode(response).await
    }

    async fn read_all(
        &self,
        kind: EntityKind,
        since: Option<DateTime<Utc>>,
        token: &str,
    ) -> Result<Vec<RemoteRecord>, ApiError> {
        let mut request = self.client.get(self.collection_url(kind)).bearer_auth(token);
        if let Some(since) = since {
            request = request.query(&[("since", since.to_rfc3339())]);
        }
        let response = request.send().await.map_err(transport_error)?;
        Self::decode(response).await
    }

    async fn update(
        &self,
        kind: EntityKind,
        id: LocalKey,
        stable_id: StableId,
        payload: &serde_json::Value,
        token: &str,
    ) -> Result<UpdatedRecord, ApiError> {
        let response = self
            .client
            .put(self.record_url(kind, id))
            .bearer_auth(token)
            .json(&MutationRequest {
                stable_id,
                data: payload,
            })
            .send()
            .await
            .map_err(transport_error)?;
        Self::decode(response).await
    }

    async fn delete(
        &self,
        kind: EntityKind,
        id: LocalKey,
        stable_id: StableId,
        token: &str,
    ) -> Result<(), ApiError> {
        let response = self
            .client
            .delete(self.record_url(kind, id))
            .query(&[("stable_id", stable_id.to_string())])
            .bearer_auth(token)
            .send()
            .await
            .map_err(transport_error)?;
        if !response.status().is_success() {
            return Err(classify_status(response).await);
        }
        Ok(())
    }

    async fn authenticate(
        &self,
        username: &str,
        password: &str,
    ) -> Result<Credentials, ApiError> {
        let url = format!("{}/api/auth/login", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&AuthRequest { username, password })
            .send()
            .await
            .map_err(transport_error)?;
        Self::decode(response).await
    }

    async fn refresh(&self, refresh_token: &str) -> Result<Credentials, ApiError> {
        let url = format!("{}/api/auth/refresh", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&RefreshRequest { refresh_token })
            .send()
            .await
            .map_err(transport_error)?;
        Self::decode(response).await
    }
}
