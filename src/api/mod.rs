//! # Transport Boundary
//!
//! Wire DTOs and the `Backend` trait the replay scheduler executes against.
//! The REST API itself is an external collaborator; this module only fixes
//! the shape of the requests the engine issues and the responses it
//! consumes.
//!
//! - `transport` - the object-safe `Backend` trait
//! - `http` - the reqwest implementation used in production

pub mod http;
pub mod transport;

pub use http::HttpBackend;
pub use transport::Backend;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::StableId;

/// Server response to a successful create.
///
/// Carries the canonical identifier the provisional local key is repointed
/// to, plus the server-confirmed timestamp.
#[derive(Debug, Clone, Deserialize)]
pub struct CreatedRecord {
    pub id: i64,
    pub updated_at: DateTime<Utc>,
}

/// Server response to a successful update.
#[derive(Debug, Clone, Deserialize)]
pub struct UpdatedRecord {
    pub updated_at: DateTime<Utc>,
}

/// One entity as the server knows it, returned by `read`/`read_all`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteRecord {
    pub id: i64,
    pub stable_id: StableId,
    pub data: serde_json::Value,
    pub updated_at: DateTime<Utc>,
}

/// Request body for create and update; the stable id rides along as the
/// idempotency key.
#[derive(Debug, Serialize)]
pub struct MutationRequest<'a> {
    pub stable_id: StableId,
    pub data: &'a serde_json::Value,
}

/// Login request body.
#[derive(Debug, Serialize)]
pub struct AuthRequest<'a> {
    pub username: &'a str,
    pub password: &'a str,
}

/// Token refresh request body.
#[derive(Debug, Serialize)]
pub struct RefreshRequest<'a> {
    pub refresh_token: &'a str,
}

/// Error envelope carried by non-success responses.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorBody {
    pub code: i32,
    pub error: String,
}
