//! Error types for the reconciliation pipeline.

use std::time::Duration;
use thiserror::Error;

/// Errors produced while syncing a single key or bringing the controller up.
#[derive(Debug, Error)]
pub enum Error {
    /// Queue key could not be split into namespace and name
    #[error("malformed object key {key:?}: {reason}")]
    KeyMalformed { key: String, reason: &'static str },

    /// Object has no name, so no key can be derived from it
    #[error("object has no name")]
    MissingObjectKey,

    /// API server request failed
    #[error("failed to fetch {key}: {source}")]
    Fetch {
        key: String,
        #[source]
        source: kube::Error,
    },

    /// A blocking call did not finish within its deadline
    #[error("{operation} for {key} timed out after {timeout:?}")]
    Timeout {
        operation: Operation,
        key: String,
        timeout: Duration,
    },

    /// Object exists on the API server but the local cache has not caught up
    #[error("{key} exists but is not in the local cache yet")]
    CacheMiss { key: String },

    /// Notification could not be delivered
    #[error("failed to notify for {key}: {source}")]
    Notification {
        key: String,
        #[source]
        source: notify::ChannelError,
    },

    /// Controller could not start (cache never became usable)
    #[error("startup failed: {0}")]
    FatalStartup(String),

    /// Invalid configuration
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Whether the work queue should retry the key with backoff.
    ///
    /// Only transient read failures are retried. Notification failures are not:
    /// the next qualifying update of the object triggers the same check again.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Fetch { .. } | Self::CacheMiss { .. } => true,
            Self::Timeout { operation, .. } => matches!(operation, Operation::Fetch),
            Self::KeyMalformed { .. }
            | Self::MissingObjectKey
            | Self::Notification { .. }
            | Self::FatalStartup(_)
            | Self::Config(_) => false,
        }
    }
}

/// Blocking operations that run under a deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Authoritative existence check against the API server
    Fetch,
    /// Notification delivery
    Notify,
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fetch => f.write_str("fetch"),
            Self::Notify => f.write_str("notify"),
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
