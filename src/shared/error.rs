//! Shared Error Types
//!
//! This module defines the error taxonomy the replay scheduler branches on,
//! the crate-wide `EngineError`, and the typed notice handed to the
//! notification collaborator when a replay fails terminally.
//!
//! # Error Categories
//!
//! - `ApiError::Unreachable` - no response / timeout / network-level failure.
//!   Recovered locally: the action stays queued and connectivity flips
//!   offline.
//! - `ApiError::Business` - the request is invalid rather than undeliverable
//!   (validation failure, duplicate stable-id collision, unauthorized
//!   action, record already deleted). Terminal for that action.
//! - `ApiError::Auth` - expired or invalid credentials; triggers a token
//!   refresh before the action is retried.
//! - `ApiError::Server` - unknown/server fault; treated conservatively as
//!   retryable on the next online transition.
//!
//! # Thread Safety
//!
//! All error types are `Send + Sync` and can be safely shared across thread
//! boundaries.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::LocalKey;

/// Small-integer error codes carried on API error responses and notices.
pub mod codes {
    /// Request payload failed validation
    pub const VALIDATION: i32 = 1;
    /// Action not permitted for this user
    pub const UNAUTHORIZED: i32 = 2;
    /// Create replayed with an already-known stable client identifier
    pub const DUPLICATE_KEY: i32 = 3;
    /// Record missing or already deleted
    pub const NOT_FOUND: i32 = 4;
    /// Access token expired or invalid
    pub const TOKEN_EXPIRED: i32 = 5;
    /// Refresh token expired or invalid; session must be re-established
    pub const REFRESH_EXPIRED: i32 = 6;
    /// Unclassified server fault
    pub const SERVER_FAULT: i32 = 7;
    /// Client-side synthetic code for network-level failures
    pub const UNREACHABLE: i32 = 8;
}

/// Classified failure of one backend request.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ApiError {
    /// No response, timeout, or network-level failure
    #[error("backend unreachable: {0}")]
    Unreachable(String),

    /// The request is invalid and will not succeed on retry
    #[error("request rejected ({code}): {message}")]
    Business { code: i32, message: String },

    /// Credentials expired or invalid
    #[error("authentication failed ({code}): {message}")]
    Auth { code: i32, message: String },

    /// Unclassified server fault, retryable
    #[error("server fault (status {status}): {message}")]
    Server { status: u16, message: String },
}

impl ApiError {
    /// Create an unreachability error from any network-level failure.
    pub fn unreachable(message: impl Into<String>) -> Self {
        Self::Unreachable(message.into())
    }

    /// The error code carried by (or synthesized for) this error.
    pub fn code(&self) -> i32 {
        match self {
            ApiError::Unreachable(_) => codes::UNREACHABLE,
            ApiError::Business { code, .. } => *code,
            ApiError::Auth { code, .. } => *code,
            ApiError::Server { .. } => codes::SERVER_FAULT,
        }
    }
}

/// Crate-wide error type.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A backend request failed
    #[error(transparent)]
    Api(#[from] ApiError),

    /// The local SQLite store failed
    #[error("local store error: {0}")]
    Storage(#[from] sqlx::Error),

    /// JSON encoding/decoding of persisted state failed
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration was invalid
    #[error(transparent)]
    Config(#[from] crate::shared::config::ConfigError),

    /// No entity with the given local key exists in the store
    #[error("no entity with local key {0}")]
    UnknownEntity(LocalKey),

    /// An operation requiring a session ran without one
    #[error("not authenticated")]
    NotAuthenticated,

    /// The session was invalidated by a terminal refresh failure
    #[error("session halted, re-authentication required")]
    SessionHalted,
}

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Typed error object handed to the notification collaborator.
///
/// Queue and store mutation always happen before a notice is emitted, so a
/// crashed notification renderer cannot leave the queue inconsistent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorNotice {
    /// Small-integer code from [`codes`]
    pub code: i32,
    /// Internal message, suitable for logs
    pub message: String,
    /// User-displayable message
    pub display_message: String,
}

impl ErrorNotice {
    pub fn new(
        code: i32,
        message: impl Into<String>,
        display_message: impl Into<String>,
    ) -> Self {
        Self {
            code,
            message: message.into(),
            display_message: display_message.into(),
        }
    }

    /// Build a notice from a classified API error.
    pub fn from_api(err: &ApiError) -> Self {
        let display = match err {
            ApiError::Unreachable(_) => "Switched to offline mode".to_string(),
            ApiError::Business { message, .. } => message.clone(),
            ApiError::Auth { .. } => "Your session has expired".to_string(),
            ApiError::Server { .. } => "The server hit an unexpected problem".to_string(),
        };
        Self::new(err.code(), err.to_string(), display)
    }
}

/// Notification collaborator consumed by the replay scheduler.
pub trait Notifier: Send + Sync {
    fn notify(&self, notice: &ErrorNotice);
}

/// Default notifier that forwards notices to the tracing subscriber.
#[derive(Debug, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, notice: &ErrorNotice) {
        tracing::warn!(code = notice.code, "{}", notice.display_message);
    }
}
