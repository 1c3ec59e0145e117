//! Shared Module
//!
//! Cross-cutting types used throughout the engine: configuration and the
//! error taxonomy. Everything here is free of engine state and safe to use
//! from both the transport layer and the offline core.

/// Shared error types
pub mod error;

/// Application configuration
pub mod config;

/// Re-export commonly used types for convenience
pub use config::{ConfigError, EngineConfig, EngineConfigBuilder};
pub use error::{ApiError, EngineError, ErrorNotice, Notifier, TracingNotifier};
