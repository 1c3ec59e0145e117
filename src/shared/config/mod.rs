//! Application configuration module
//!
//! Engine configuration consumed from the environment, with a builder for
//! programmatic construction in tests and embedders.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Default backend URL
const DEFAULT_API_URL: &str = "http://127.0.0.1:3000";

/// Default per-request timeout in seconds
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 5;

/// Default interval between connectivity probes in seconds
const DEFAULT_PROBE_INTERVAL_SECS: u64 = 30;

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Backend base URL
    pub base_url: String,
    /// Per-request timeout; a request exceeding it counts as unreachable
    pub request_timeout: Duration,
    /// Interval between background connectivity probes
    pub probe_interval: Duration,
    /// Override for the local store directory (platform data dir otherwise)
    pub data_dir: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let base_url =
            std::env::var("QUILLWORKS_API_URL").unwrap_or_else(|_| DEFAULT_API_URL.to_string());
        let timeout_secs = std::env::var("QUILLWORKS_REQUEST_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS);
        Self {
            base_url,
            request_timeout: Duration::from_secs(timeout_secs),
            probe_interval: Duration::from_secs(DEFAULT_PROBE_INTERVAL_SECS),
            data_dir: None,
        }
    }
}

impl EngineConfig {
    /// Create a configuration from the environment
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new EngineConfigBuilder
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::default()
    }

    /// Get the full URL for an API endpoint
    pub fn api_url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    /// Directory for the local store, honoring the override.
    pub fn store_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(|| {
            let mut path = dirs::data_dir().unwrap_or_else(std::env::temp_dir);
            path.push("quillworks");
            path
        })
    }
}

/// Builder for EngineConfig
#[derive(Debug, Default)]
pub struct EngineConfigBuilder {
    base_url: Option<String>,
    request_timeout: Option<Duration>,
    probe_interval: Option<Duration>,
    data_dir: Option<PathBuf>,
}

impl EngineConfigBuilder {
    /// Set the backend base URL
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Set the per-request timeout
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Set the background probe interval
    pub fn probe_interval(mut self, interval: Duration) -> Self {
        self.probe_interval = Some(interval);
        self
    }

    /// Set the local store directory
    pub fn data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = Some(dir.into());
        self
    }

    /// Build the configuration
    pub fn build(self) -> Result<EngineConfig, ConfigError> {
        let base_url = self
            .base_url
            .unwrap_or_else(|| DEFAULT_API_URL.to_string());
        if base_url.is_empty() {
            return Err(ConfigError::MissingValue("base_url"));
        }
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(ConfigError::InvalidUrl(base_url));
        }
        let request_timeout = self
            .request_timeout
            .unwrap_or(Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS));
        if request_timeout.is_zero() {
            return Err(ConfigError::MissingValue("request_timeout"));
        }
        Ok(EngineConfig {
            base_url,
            request_timeout,
            probe_interval: self
                .probe_interval
                .unwrap_or(Duration::from_secs(DEFAULT_PROBE_INTERVAL_SECS)),
            data_dir: self.data_dir,
        })
    }
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
    #[error("missing value: {0}")]
    MissingValue(&'static str),
}
