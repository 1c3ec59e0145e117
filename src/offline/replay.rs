//! # Replay Execution
//!
//! Executes one queued action (or one token refresh) against the transport
//! and classifies the result into the outcome the drain loop branches on.
//! Queue and store mutation stay in the engine; this module only talks to
//! the network and sorts errors.

use tracing::{debug, warn};

use crate::api::transport::Backend;
use crate::model::Credentials;
use crate::offline::action::{execute, ActionKind, ActionReceipt, QueuedAction};
use crate::shared::error::{codes, ApiError, ErrorNotice};

/// How one entity-action replay ended.
#[derive(Debug)]
pub(crate) enum ReplayOutcome {
    /// Server accepted the mutation
    Completed(ActionReceipt),
    /// Business error: the action is terminal and must be dequeued
    Discarded(ErrorNotice),
    /// Duplicate stable-id collision on a create: the entity already exists
    /// server-side; the action is discarded without touching the store
    AlreadyCreated(ErrorNotice),
    /// Credentials rejected; a refresh must run before this action retries
    AuthExpired,
    /// Network-level failure; the action stays at its queue head
    Unreachable(ErrorNotice),
    /// Server fault; the action stays queued for the next online transition
    Retryable(ErrorNotice),
}

/// Replay one queued action.
pub(crate) async fn replay_action(
    backend: &dyn Backend,
    action: &QueuedAction,
    token: &str,
) -> ReplayOutcome {
    debug!(
        kind = action.kind.as_str(),
        entity = %action.entity,
        stable_id = %action.stable_id,
        "replaying action"
    );
    match execute(action, backend, token).await {
        Ok(receipt) => ReplayOutcome::Completed(receipt),
        Err(ApiError::Unreachable(message)) => {
            ReplayOutcome::Unreachable(ErrorNotice::from_api(&ApiError::Unreachable(message)))
        }
        Err(ApiError::Auth { .. }) => ReplayOutcome::AuthExpired,
        Err(ApiError::Business { code, message })
            if code == codes::DUPLICATE_KEY && action.kind == ActionKind::Create =>
        {
            warn!(
                stable_id = %action.stable_id,
                "create collision: entity already exists server-side, discarding replay"
            );
            ReplayOutcome::AlreadyCreated(ErrorNotice::from_api(&ApiError::Business {
                code,
                message,
            }))
        }
        Err(err @ ApiError::Business { .. }) => {
            ReplayOutcome::Discarded(ErrorNotice::from_api(&err))
        }
        Err(err @ ApiError::Server { .. }) => {
            ReplayOutcome::Retryable(ErrorNotice::from_api(&err))
        }
    }
}

/// How a token-refresh replay ended.
#[derive(Debug)]
pub(crate) enum RefreshOutcome {
    /// Fresh credentials issued
    Refreshed(Credentials),
    /// Network-level failure; the marker stays at the refresh queue head
    Unreachable(ErrorNotice),
    /// Refresh token rejected: the session is invalid and replay must halt
    Terminal(ErrorNotice),
    /// Server fault; the marker stays queued
    Retryable(ErrorNotice),
}

/// Replay the pending refresh marker.
pub(crate) async fn replay_refresh(backend: &dyn Backend, refresh_token: &str) -> RefreshOutcome {
    debug!("replaying token refresh");
    match backend.refresh(refresh_token).await {
        Ok(credentials) => RefreshOutcome::Refreshed(credentials),
        Err(ApiError::Unreachable(message)) => {
            RefreshOutcome::Unreachable(ErrorNotice::from_api(&ApiError::Unreachable(message)))
        }
        // A rejected refresh token cannot recover without the user signing
        // in again, whether the server phrased it as auth or business.
        Err(err @ (ApiError::Auth { .. } | ApiError::Business { .. })) => {
            RefreshOutcome::Terminal(ErrorNotice::new(
                codes::REFRESH_EXPIRED,
                err.to_string(),
                "Your session has expired, please sign in again",
            ))
        }
        Err(err @ ApiError::Server { .. }) => {
            RefreshOutcome::Retryable(ErrorNotice::from_api(&err))
        }
    }
}
