//! Controller configuration.
//!
//! Loaded from a mounted YAML file. Every field has a default, so an empty or
//! partial file is valid.

use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::controller::ControllerSettings;
use crate::error::{Error, Result};
use crate::namespaces::{NamespacePolicy, DEFAULT_EXEMPT_NAMESPACES};
use crate::queue::rate_limit::{self, MaxOf};

/// Lowest accepted `backoff.qps`: one retry every 1000 seconds.
const MIN_BACKOFF_QPS: f64 = 0.001;

/// Main controller configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GuardConfig {
    /// Namespace to watch; `None` watches all namespaces
    pub watch_namespace: Option<String>,

    /// Label selector applied to the Deployment watch
    pub label_selector: Option<String>,

    /// Number of concurrent workers
    pub workers: usize,

    /// Retries of a transiently failing key before it is dropped
    pub max_retries: u32,

    /// Seconds to wait for the initial cache sync before logging and waiting again
    pub cache_sync_timeout_secs: u64,

    /// Deadline in seconds for API reads and notification delivery
    pub request_timeout_secs: u64,

    /// Namespaces never checked
    pub exempt_namespaces: Vec<String>,

    /// If non-empty, only these namespaces are checked
    pub include_namespaces: Vec<String>,

    pub backoff: BackoffConfig,

    pub dedup: DedupConfig,

    pub health: HealthConfig,
}

/// Retry backoff configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BackoffConfig {
    /// Per-key delay after the first failure, doubled on each further failure
    pub base_delay_ms: u64,

    /// Cap on the per-key delay
    pub max_delay_secs: u64,

    /// Overall retry rate across all keys
    pub qps: f64,

    /// Overall retry burst across all keys
    pub burst: u32,
}

/// Notification deduplication configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DedupConfig {
    pub enabled: bool,

    /// How long an unchanged violation stays suppressed
    pub window_secs: u64,
}

/// Health endpoint configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HealthConfig {
    pub enabled: bool,
    pub bind_address: String,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            watch_namespace: None,
            label_selector: None,
            workers: 1,
            max_retries: 5,
            cache_sync_timeout_secs: 60,
            request_timeout_secs: 10,
            exempt_namespaces: DEFAULT_EXEMPT_NAMESPACES
                .iter()
                .map(ToString::to_string)
                .collect(),
            include_namespaces: vec![],
            backoff: BackoffConfig::default(),
            dedup: DedupConfig::default(),
            health: HealthConfig::default(),
        }
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 5,
            max_delay_secs: 1000,
            qps: rate_limit::DEFAULT_QPS,
            burst: rate_limit::DEFAULT_BURST,
        }
    }
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            window_secs: 3600,
        }
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

impl GuardConfig {
    /// Load configuration from a mounted YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("failed to read config file {}: {e}", path.display()))
        })?;
        Self::from_yaml(&contents)
    }

    pub fn from_yaml(contents: &str) -> Result<Self> {
        // An empty document deserializes to null rather than an empty map
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(contents)
            .map_err(|e| Error::Config(format!("failed to parse config YAML: {e}")))
    }

    /// Check values that deserialize fine but cannot work.
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(Error::Config("workers must be at least 1".to_string()));
        }
        if self.request_timeout_secs == 0 {
            return Err(Error::Config(
                "requestTimeoutSecs must be at least 1".to_string(),
            ));
        }
        if self.cache_sync_timeout_secs == 0 {
            return Err(Error::Config(
                "cacheSyncTimeoutSecs must be at least 1".to_string(),
            ));
        }
        if !(self.backoff.qps.is_finite() && self.backoff.qps >= MIN_BACKOFF_QPS) {
            return Err(Error::Config(format!(
                "backoff.qps must be a finite number of at least {MIN_BACKOFF_QPS}"
            )));
        }
        if self.backoff.burst == 0 {
            return Err(Error::Config("backoff.burst must be at least 1".to_string()));
        }
        if self.backoff_base_delay() > self.backoff_max_delay() {
            return Err(Error::Config(
                "backoff.baseDelayMs must not exceed backoff.maxDelaySecs".to_string(),
            ));
        }

        let exempt: BTreeSet<&str> = self.exempt_namespaces.iter().map(String::as_str).collect();
        let overlap: Vec<&str> = self
            .include_namespaces
            .iter()
            .map(String::as_str)
            .filter(|ns| exempt.contains(ns))
            .collect();
        if !overlap.is_empty() {
            return Err(Error::Config(format!(
                "namespaces both included and exempt: {}",
                overlap.join(", ")
            )));
        }

        if self.health.enabled {
            self.health_address()?;
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn dedup_window(&self) -> Duration {
        Duration::from_secs(self.dedup.window_secs)
    }

    fn backoff_base_delay(&self) -> Duration {
        Duration::from_millis(self.backoff.base_delay_ms)
    }

    fn backoff_max_delay(&self) -> Duration {
        Duration::from_secs(self.backoff.max_delay_secs)
    }

    pub fn health_address(&self) -> Result<SocketAddr> {
        self.health.bind_address.parse().map_err(|e| {
            Error::Config(format!(
                "invalid health.bindAddress {:?}: {e}",
                self.health.bind_address
            ))
        })
    }

    pub fn namespace_policy(&self) -> NamespacePolicy {
        NamespacePolicy::new(
            self.exempt_namespaces.iter().cloned(),
            self.include_namespaces.iter().cloned(),
        )
    }

    pub fn rate_limiter(&self) -> MaxOf<String> {
        rate_limit::controller_rate_limiter(
            self.backoff_base_delay(),
            self.backoff_max_delay(),
            self.backoff.qps,
            self.backoff.burst,
        )
    }

    pub fn controller_settings(&self) -> ControllerSettings {
        ControllerSettings {
            workers: self.workers,
            max_retries: self.max_retries,
            cache_sync_timeout: Duration::from_secs(self.cache_sync_timeout_secs),
        }
    }
}
