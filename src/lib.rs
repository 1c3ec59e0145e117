//! Quillworks - Offline-First Client Engine
//!
//! Quillworks is the client-side sync engine for a creative-writing content
//! management application (books, chapters, prompts, personifications,
//! timelines, relationships, shorts, tags). The backing REST API is
//! stateless; this crate is the part of the client that keeps working when
//! the API is not reachable.
//!
//! # Overview
//!
//! The engine provides:
//! - Optimistic local mutation with immediate effect on the in-memory store
//! - Persistent per-entity-kind action queues that survive a full reload
//! - Provisional identity for entities created offline, reconciled with
//!   server-assigned ids on replay
//! - Connectivity monitoring with fail-fast offline detection
//! - Ordered, single-flight replay of queued mutations on reconnect
//!
//! # Module Structure
//!
//! The library is organized into five modules:
//!
//! - **`shared`** - Configuration and error types
//!   - `EngineConfig` (base URL, timeouts, data dir)
//!   - Error taxonomy, error notices, the notifier seam
//!
//! - **`model`** - Domain primitives
//!   - Entity kinds, stable client identifiers, local keys
//!   - Entity records and session credentials
//!
//! - **`api`** - Transport boundary
//!   - The `Backend` trait consumed by the replay scheduler
//!   - The reqwest HTTP implementation and wire DTOs
//!
//! - **`offline`** - The engine core
//!   - Action queues, optimistic store, identity reconciler,
//!     replay scheduler, SQLite persistence
//!
//! - **`sync`** - Connectivity
//!   - Network monitor, background probe service, status snapshots
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use quillworks::api::http::HttpBackend;
//! use quillworks::offline::{Command, OfflineEngine};
//! use quillworks::shared::config::EngineConfig;
//! use quillworks::model::EntityKind;
//!
//! # async fn example() -> Result<(), quillworks::shared::error::EngineError> {
//! let config = EngineConfig::default();
//! let backend = Arc::new(HttpBackend::new(&config)?);
//! let engine = OfflineEngine::builder(backend).config(config).build().await?;
//!
//! engine.authenticate("casey", "hunter2").await?;
//! let receipt = engine
//!     .dispatch(Command::Create {
//!         entity: EntityKind::Book,
//!         payload: serde_json::json!({ "title": "Alpha" }),
//!     })
//!     .await?;
//! println!("book queued under local key {}", receipt.local_key);
//! # Ok(())
//! # }
//! ```
//!
//! # Concurrency
//!
//! Replay is strictly single-flight: at most one queued action (or probe) is
//! in flight at any time, so the server observes mutations in the order the
//! client produced them. All engine state lives behind tokio locks and is
//! mutated only from the dispatch and drain paths.

/// Configuration and error types
pub mod shared;

/// Domain primitives (entity kinds, identifiers, records, credentials)
pub mod model;

/// Transport boundary (Backend trait, HTTP client, wire DTOs)
pub mod api;

/// Offline engine core (queues, optimistic store, reconciler, replay)
pub mod offline;

/// Connectivity monitoring and the background probe service
pub mod sync;

// Re-export commonly used types
pub use api::transport::Backend;
pub use model::{Credentials, EntityKind, EntityRecord, LocalKey, StableId};
pub use offline::{Command, DispatchReceipt, EngineBuilder, OfflineEngine};
pub use shared::config::EngineConfig;
pub use shared::error::{ApiError, EngineError, ErrorNotice, Notifier};
pub use sync::{SyncService, SyncState};
