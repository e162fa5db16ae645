//! Notification sink seam between the sync handler and the `notify` crate.

use async_trait::async_trait;
use notify::{ChannelError, Notifier, NotifyEvent};

use crate::policy::ViolationReport;

/// Delivers a violation report to people.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn send(&self, report: &ViolationReport) -> Result<(), ChannelError>;
}

/// Notification event for a violation report.
#[must_use]
pub fn violation_event(report: &ViolationReport) -> NotifyEvent {
    NotifyEvent::ResourcePolicyViolation {
        kind: report.kind.clone(),
        name: report.key.name.clone(),
        namespace: report.key.namespace.clone(),
        containers: report.containers.clone(),
        timestamp: chrono::Utc::now(),
    }
}

#[async_trait]
impl NotificationSink for Notifier {
    async fn send(&self, report: &ViolationReport) -> Result<(), ChannelError> {
        self.deliver(&violation_event(report)).await
    }
}
