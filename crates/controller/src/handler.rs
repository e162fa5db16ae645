//! Per-key sync: decide whether an object violates the resource policy and
//! notify when it does.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use crate::error::{Error, Operation, Result};
use crate::key::ObjectKey;
use crate::namespaces::NamespacePolicy;
use crate::policy;
use crate::sink::NotificationSink;
use crate::source::{ObjectCache, ObjectLookup};

/// Default deadline for the existence check and the notification call.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// What a successful sync did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Namespace is excluded from the policy
    Exempt,
    /// Object was deleted before it could be checked
    Vanished,
    /// Every container declares requests and limits
    Compliant,
    /// A notification was sent for these containers
    Notified { containers: Vec<String> },
}

pub struct SyncHandler {
    lookup: Arc<dyn ObjectLookup>,
    cache: Arc<dyn ObjectCache>,
    sink: Arc<dyn NotificationSink>,
    namespaces: NamespacePolicy,
    request_timeout: Duration,
}

impl SyncHandler {
    pub fn new(
        lookup: Arc<dyn ObjectLookup>,
        cache: Arc<dyn ObjectCache>,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            lookup,
            cache,
            sink,
            namespaces: NamespacePolicy::default(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_namespace_policy(mut self, namespaces: NamespacePolicy) -> Self {
        self.namespaces = namespaces;
        self
    }

    #[must_use]
    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    /// Check the object behind `key` and notify if it violates the policy.
    #[instrument(skip_all, fields(key = %key))]
    pub async fn sync(&self, key: &str) -> Result<SyncOutcome> {
        let key = ObjectKey::parse(key)?;

        if self.namespaces.is_exempt(&key.namespace) {
            debug!("Namespace exempt from resource policy");
            return Ok(SyncOutcome::Exempt);
        }

        // The cache can lag behind a delete, so ask the API server first.
        let exists = self
            .deadline(Operation::Fetch, &key, self.lookup.exists(&key))
            .await?
            .map_err(|source| Error::Fetch {
                key: key.to_string(),
                source,
            })?;
        if !exists {
            info!("Object no longer exists in the cluster, skipping");
            return Ok(SyncOutcome::Vanished);
        }

        let object = self.cache.get(&key).ok_or_else(|| Error::CacheMiss {
            key: key.to_string(),
        })?;

        let report = policy::report(&object);
        if report.is_empty() {
            debug!(
                containers = object.containers.len(),
                "All containers declare requests and limits"
            );
            return Ok(SyncOutcome::Compliant);
        }

        warn!(
            containers = ?report.containers,
            "Containers without resource requests or limits, sending notification"
        );
        self.deadline(Operation::Notify, &key, self.sink.send(&report))
            .await?
            .map_err(|source| Error::Notification {
                key: key.to_string(),
                source,
            })?;

        Ok(SyncOutcome::Notified {
            containers: report.containers,
        })
    }

    async fn deadline<T>(
        &self,
        operation: Operation,
        key: &ObjectKey,
        fut: impl Future<Output = T>,
    ) -> Result<T> {
        tokio::time::timeout(self.request_timeout, fut)
            .await
            .map_err(|_| Error::Timeout {
                operation,
                key: key.to_string(),
                timeout: self.request_timeout,
            })
    }
}
