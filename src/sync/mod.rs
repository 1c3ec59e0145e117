//! # Background Sync Service
//!
//! Drives the engine's connectivity monitoring without any UI-lifecycle
//! coupling: an explicit task that can be started, stopped, and probed on
//! demand. On each tick it probes the backend; the offline-to-online
//! transition triggers a queue drain inside the engine.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use quillworks::sync::SyncService;
//! # async fn example(engine: Arc<quillworks::offline::OfflineEngine>) {
//! let mut service = SyncService::new(engine, std::time::Duration::from_secs(30));
//! service.start();
//! // ... later
//! service.stop();
//! # }
//! ```

pub mod network_monitor;
pub mod sync_state;

pub use network_monitor::{ConnectivityMonitor, ConnectivityState};
pub use sync_state::SyncState;

use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::offline::OfflineEngine;

/// Periodic probe task around an [`OfflineEngine`].
pub struct SyncService {
    engine: Arc<OfflineEngine>,
    interval: Duration,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl SyncService {
    pub fn new(engine: Arc<OfflineEngine>, interval: Duration) -> Self {
        Self {
            engine,
            interval,
            task: None,
        }
    }

    /// Spawn the probe loop. Starting twice is a no-op.
    pub fn start(&mut self) {
        if self.task.is_some() {
            return;
        }
        let engine = Arc::clone(&self.engine);
        let interval = self.interval;
        self.task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The immediate first tick gives the mount-time probe.
            loop {
                ticker.tick().await;
                let online = engine.probe().await;
                debug!(online, "scheduled connectivity probe");
            }
        }));
    }

    /// Stop the probe loop.
    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.is_some()
    }

    /// On-demand probe, independent of the schedule. Returns whether the
    /// engine believes it is online afterwards.
    pub async fn probe_now(&self) -> bool {
        self.engine.probe().await
    }

    /// Current engine status snapshot.
    pub async fn status(&self) -> SyncState {
        self.engine.status().await
    }
}

impl Drop for SyncService {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
