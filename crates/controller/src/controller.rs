//! Reconciler: worker tasks draining the work queue through the sync handler.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::error::Result;
use crate::handler::SyncHandler;
use crate::queue::WorkQueue;
use crate::source::ObjectCache;

/// Worker and retry settings.
#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub workers: usize,
    /// Retries of a transiently failing key before it is dropped
    pub max_retries: u32,
    /// How long to wait for the cache before logging and waiting again
    pub cache_sync_timeout: Duration,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            workers: 1,
            max_retries: 5,
            cache_sync_timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Clone)]
pub struct Controller {
    queue: Arc<WorkQueue<String>>,
    handler: Arc<SyncHandler>,
    cache: Arc<dyn ObjectCache>,
    settings: ControllerSettings,
    synced: Arc<AtomicBool>,
}

impl Controller {
    pub fn new(
        queue: Arc<WorkQueue<String>>,
        handler: Arc<SyncHandler>,
        cache: Arc<dyn ObjectCache>,
        settings: ControllerSettings,
    ) -> Self {
        Self {
            queue,
            handler,
            cache,
            settings,
            synced: Arc::new(AtomicBool::new(false)),
        }
    }

    #[must_use]
    pub fn queue(&self) -> &Arc<WorkQueue<String>> {
        &self.queue
    }

    /// Flag that flips to `true` once the cache has synced and workers start.
    #[must_use]
    pub fn synced_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.synced)
    }

    /// Run until `shutdown` is cancelled, then drain the queue and stop.
    ///
    /// Only a cache that can never sync is an error; per-key failures are
    /// handled inside the workers.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        info!(
            queue = %self.queue.name(),
            workers = self.settings.workers,
            "Starting controller"
        );

        match self.wait_for_cache_sync(&shutdown).await {
            Ok(true) => {}
            Ok(false) => {
                info!("Shutdown requested before cache sync, stopping");
                self.queue.shut_down();
                return Ok(());
            }
            Err(e) => {
                error!(error = %e, "Cache can never sync, stopping");
                self.queue.shut_down();
                return Err(e);
            }
        }
        self.synced.store(true, Ordering::SeqCst);

        let mut workers = JoinSet::new();
        for id in 0..self.settings.workers.max(1) {
            let worker = self.clone();
            workers.spawn(async move { worker.run_worker(id).await });
        }

        shutdown.cancelled().await;
        info!("Shutting down controller, draining work queue");
        self.queue.shut_down_with_drain().await;

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Worker task failed");
            }
        }

        info!("Controller stopped");
        Ok(())
    }

    /// Returns `false` if shutdown was requested before the cache synced.
    async fn wait_for_cache_sync(&self, shutdown: &CancellationToken) -> Result<bool> {
        info!("Waiting for cache to sync");
        loop {
            tokio::select! {
                () = shutdown.cancelled() => return Ok(false),
                synced = tokio::time::timeout(
                    self.settings.cache_sync_timeout,
                    self.cache.wait_until_synced(),
                ) => match synced {
                    Ok(Ok(())) => {
                        info!("Cache synced");
                        return Ok(true);
                    }
                    Ok(Err(e)) => return Err(e),
                    Err(_) => warn!(
                        timeout = ?self.settings.cache_sync_timeout,
                        "Cache not synced yet, still waiting"
                    ),
                },
            }
        }
    }

    #[instrument(skip(self))]
    async fn run_worker(&self, id: usize) {
        debug!("Worker started");
        while self.process_next_item().await {}
        debug!("Worker stopped");
    }

    /// Take one key off the queue and sync it.
    ///
    /// Returns `false` once the queue has shut down and drained.
    pub async fn process_next_item(&self) -> bool {
        let Some(key) = self.queue.get().await else {
            return false;
        };

        match self.handler.sync(&key).await {
            Ok(outcome) => {
                debug!(key = %key, ?outcome, "Synced");
                self.queue.forget(&key);
            }
            Err(e) => {
                let requeues = self.queue.num_requeues(&key);
                if e.is_retryable() && self.queue.is_shutting_down() {
                    warn!(key = %key, error = %e, requeues, "Sync failed during shutdown, dropping key");
                    self.queue.forget(&key);
                } else if e.is_retryable() && requeues < self.settings.max_retries {
                    warn!(key = %key, error = %e, requeues, "Sync failed, retrying with backoff");
                    self.queue.add_rate_limited(key.clone());
                } else {
                    error!(key = %key, error = %e, requeues, "Sync failed, dropping key");
                    self.queue.forget(&key);
                }
            }
        }

        self.queue.done(&key);
        true
    }
}
