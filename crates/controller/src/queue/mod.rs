//! Deduplicating, rate-limited work queue.
//!
//! A key is held at most once: adding a key that is already pending is a
//! no-op, and adding a key that a worker is currently processing marks it
//! dirty so it is queued again once that worker calls [`WorkQueue::done`].
//! No two workers ever hold the same key at the same time.

pub mod rate_limit;

use std::collections::{HashSet, VecDeque};
use std::hash::Hash;
use std::pin::pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

pub use rate_limit::RateLimiter;

struct State<K> {
    queue: VecDeque<K>,
    /// Keys that need processing: pending in `queue` or re-added while processing
    dirty: HashSet<K>,
    processing: HashSet<K>,
    shutting_down: bool,
}

pub struct WorkQueue<K> {
    name: String,
    state: Mutex<State<K>>,
    item_ready: Notify,
    drained: Notify,
    rate_limiter: Box<dyn RateLimiter<K>>,
    shutdown: CancellationToken,
}

impl<K> WorkQueue<K>
where
    K: Clone + Eq + Hash + Send + Sync + std::fmt::Debug + 'static,
{
    pub fn new(name: impl Into<String>, rate_limiter: impl RateLimiter<K> + 'static) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(State {
                queue: VecDeque::new(),
                dirty: HashSet::new(),
                processing: HashSet::new(),
                shutting_down: false,
            }),
            item_ready: Notify::new(),
            drained: Notify::new(),
            rate_limiter: Box::new(rate_limiter),
            shutdown: CancellationToken::new(),
        }
    }

    /// Queue with [`rate_limit::default_controller_rate_limiter`].
    pub fn with_default_rate_limiter(name: impl Into<String>) -> Self {
        Self::new(name, rate_limit::default_controller_rate_limiter())
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    fn lock(&self) -> MutexGuard<'_, State<K>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mark `key` as needing processing. Never blocks.
    pub fn add(&self, key: K) {
        let mut state = self.lock();
        if state.shutting_down {
            trace!(queue = %self.name, ?key, "Queue shutting down, dropping add");
            return;
        }
        if !state.dirty.insert(key.clone()) {
            trace!(queue = %self.name, ?key, "Key already pending");
            return;
        }
        if state.processing.contains(&key) {
            trace!(queue = %self.name, ?key, "Key in flight, will requeue on done");
            return;
        }
        state.queue.push_back(key);
        drop(state);
        self.item_ready.notify_one();
    }

    /// Wait for the next key.
    ///
    /// Returns `None` once the queue is shut down and no pending keys remain.
    pub async fn get(&self) -> Option<K> {
        loop {
            let mut notified = pin!(self.item_ready.notified());
            notified.as_mut().enable();

            {
                let mut state = self.lock();
                if let Some(key) = state.queue.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    return Some(key);
                }
                if state.shutting_down {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Finish processing `key`, queueing it again if it was re-added meanwhile.
    pub fn done(&self, key: &K) {
        let mut state = self.lock();
        state.processing.remove(key);

        if state.dirty.contains(key) {
            state.queue.push_back(key.clone());
            drop(state);
            self.item_ready.notify_one();
            return;
        }

        if state.shutting_down && state.processing.is_empty() {
            drop(state);
            self.drained.notify_waiters();
        }
    }

    /// Queue `key` after `delay`. Dropped if the queue shuts down first.
    pub fn add_after(self: &Arc<Self>, key: K, delay: Duration) {
        if self.is_shutting_down() {
            debug!(queue = %self.name, ?key, "Queue shutting down, dropping delayed add");
            return;
        }
        if delay.is_zero() {
            self.add(key);
            return;
        }

        debug!(queue = %self.name, ?key, ?delay, "Scheduling delayed add");
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            tokio::select! {
                () = queue.shutdown.cancelled() => {
                    debug!(queue = %queue.name, ?key, "Queue shut down before delayed add fired, dropping");
                }
                () = tokio::time::sleep(delay) => queue.add(key),
            }
        });
    }

    /// Queue `key` again after the rate limiter's delay for it.
    pub fn add_rate_limited(self: &Arc<Self>, key: K) {
        let delay = self.rate_limiter.when(&key);
        self.add_after(key, delay);
    }

    /// Clear retry history for `key`.
    pub fn forget(&self, key: &K) {
        self.rate_limiter.forget(key);
    }

    /// Number of times `key` has been retried since it was last forgotten.
    pub fn num_requeues(&self, key: &K) -> u32 {
        self.rate_limiter.num_requeues(key)
    }

    /// Number of keys waiting to be handed out.
    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_shutting_down(&self) -> bool {
        self.lock().shutting_down
    }

    /// Stop accepting keys and wake every waiting [`WorkQueue::get`].
    ///
    /// Keys already pending are still handed out.
    pub fn shut_down(&self) {
        self.lock().shutting_down = true;
        self.shutdown.cancel();
        self.item_ready.notify_waiters();
        debug!(queue = %self.name, "Work queue shut down");
    }

    /// [`WorkQueue::shut_down`], then wait until no key is being processed.
    pub async fn shut_down_with_drain(&self) {
        self.shut_down();
        loop {
            let mut drained = pin!(self.drained.notified());
            drained.as_mut().enable();

            if self.lock().processing.is_empty() {
                return;
            }
            drained.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::timeout;

    fn queue() -> Arc<WorkQueue<String>> {
        Arc::new(WorkQueue::with_default_rate_limiter("test"))
    }

    async fn get_now(queue: &WorkQueue<String>) -> Option<String> {
        timeout(Duration::from_millis(50), queue.get())
            .await
            .ok()
            .flatten()
    }

    #[tokio::test]
    async fn test_duplicate_adds_are_coalesced() {
        let queue = queue();
        queue.add("prod/web".to_string());
        queue.add("prod/web".to_string());
        assert_eq!(queue.len(), 1);

        assert_eq!(get_now(&queue).await.as_deref(), Some("prod/web"));
        assert!(get_now(&queue).await.is_none());
    }

    #[tokio::test]
    async fn test_readd_while_processing_is_delivered_after_done() {
        let queue = queue();
        queue.add("prod/web".to_string());
        let key = get_now(&queue).await.unwrap();

        queue.add("prod/web".to_string());
        queue.add("prod/web".to_string());
        assert!(queue.is_empty(), "in-flight key must not be handed out");
        assert!(get_now(&queue).await.is_none());

        queue.done(&key);
        assert_eq!(queue.len(), 1);
        assert_eq!(get_now(&queue).await.as_deref(), Some("prod/web"));
        assert!(get_now(&queue).await.is_none());
    }

    #[tokio::test]
    async fn test_fifo_order_across_keys() {
        let queue = queue();
        for key in ["a/1", "b/2", "c/3"] {
            queue.add(key.to_string());
        }
        assert_eq!(get_now(&queue).await.as_deref(), Some("a/1"));
        assert_eq!(get_now(&queue).await.as_deref(), Some("b/2"));
        assert_eq!(get_now(&queue).await.as_deref(), Some("c/3"));
    }

    #[tokio::test]
    async fn test_blocked_get_wakes_on_add() {
        let queue = queue();
        let waiter = tokio::spawn({
            let queue = Arc::clone(&queue);
            async move { queue.get().await }
        });
        tokio::task::yield_now().await;

        queue.add("prod/web".to_string());
        let got = timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap();
        assert_eq!(got.as_deref(), Some("prod/web"));
    }

    #[tokio::test]
    async fn test_shutdown_wakes_blocked_getters() {
        let queue = queue();
        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let queue = Arc::clone(&queue);
                tokio::spawn(async move { queue.get().await })
            })
            .collect();
        tokio::task::yield_now().await;

        queue.shut_down();
        for waiter in waiters {
            let got = timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap();
            assert!(got.is_none());
        }
    }

    #[tokio::test]
    async fn test_pending_keys_drain_after_shutdown() {
        let queue = queue();
        queue.add("prod/web".to_string());
        queue.shut_down();

        queue.add("prod/api".to_string());
        assert_eq!(queue.len(), 1, "adds after shutdown are ignored");

        assert_eq!(get_now(&queue).await.as_deref(), Some("prod/web"));
        assert_eq!(queue.get().await, None);
    }

    #[tokio::test]
    async fn test_shut_down_with_drain_waits_for_in_flight() {
        let queue = queue();
        queue.add("prod/web".to_string());
        let key = get_now(&queue).await.unwrap();

        let drain = tokio::spawn({
            let queue = Arc::clone(&queue);
            async move { queue.shut_down_with_drain().await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!drain.is_finished());

        queue.done(&key);
        timeout(Duration::from_secs(1), drain).await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_add_rate_limited_backs_off() {
        let queue = Arc::new(WorkQueue::new(
            "test",
            rate_limit::ItemExponentialBackoff::new(
                Duration::from_millis(100),
                Duration::from_secs(10),
            ),
        ));
        let key = "prod/web".to_string();

        queue.add_rate_limited(key.clone());
        assert!(queue.is_empty());
        assert_eq!(queue.num_requeues(&key), 1);

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(queue.len(), 1);

        queue.forget(&key);
        assert_eq!(queue.num_requeues(&key), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delayed_add_dropped_on_shutdown() {
        let queue = queue();
        queue.add_after("prod/web".to_string(), Duration::from_secs(5));
        queue.shut_down();

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(queue.is_empty());
    }
}
