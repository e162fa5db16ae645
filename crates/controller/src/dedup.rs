//! Suppression of repeated notifications for an unchanged violation.
//!
//! Every qualifying sync notifies by default. Wrapping the sink in
//! [`DedupSink`] remembers the last violation sent per object and stays quiet
//! while the same containers keep violating within the window. State is in
//! memory only and is lost on restart.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use notify::ChannelError;
use tokio::time::Instant;
use tracing::debug;

use crate::key::ObjectKey;
use crate::policy::ViolationReport;
use crate::sink::NotificationSink;

struct LastSent {
    fingerprint: u64,
    at: Instant,
}

pub struct DedupSink<S> {
    inner: S,
    window: Duration,
    sent: Mutex<HashMap<ObjectKey, LastSent>>,
}

impl<S> DedupSink<S> {
    pub fn new(inner: S, window: Duration) -> Self {
        Self {
            inner,
            window,
            sent: Mutex::new(HashMap::new()),
        }
    }

    fn fingerprint(report: &ViolationReport) -> u64 {
        let mut hasher = DefaultHasher::new();
        report.kind.hash(&mut hasher);
        report.containers.hash(&mut hasher);
        hasher.finish()
    }

    fn is_duplicate(&self, report: &ViolationReport, fingerprint: u64) -> bool {
        let mut sent = self.sent.lock().unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();
        sent.retain(|_, last| now.duration_since(last.at) < self.window);
        sent.get(&report.key)
            .is_some_and(|last| last.fingerprint == fingerprint)
    }
}

#[async_trait]
impl<S: NotificationSink> NotificationSink for DedupSink<S> {
    async fn send(&self, report: &ViolationReport) -> Result<(), ChannelError> {
        let fingerprint = Self::fingerprint(report);
        if self.is_duplicate(report, fingerprint) {
            debug!(key = %report.key, "Violation already notified, suppressing");
            return Ok(());
        }

        self.inner.send(report).await?;

        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                report.key.clone(),
                LastSent {
                    fingerprint,
                    at: Instant::now(),
                },
            );
        Ok(())
    }
}
