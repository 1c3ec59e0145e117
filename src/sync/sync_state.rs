//! # Sync State
//!
//! Snapshot of the engine's replay situation, for the UI collaborator.

use chrono::{DateTime, Utc};

use crate::shared::error::ErrorNotice;

#[derive(Debug, Clone, Default)]
pub struct SyncState {
    pub is_offline: bool,
    pub last_probe_at: Option<DateTime<Utc>>,
    /// Queued entity mutations awaiting replay
    pub pending_actions: usize,
    /// Whether a token refresh is queued ahead of them
    pub refresh_pending: bool,
    /// Replay halted pending re-authentication
    pub halted: bool,
    /// Recent terminal/retryable error notices, oldest first
    pub errors: Vec<ErrorNotice>,
}
