//! Notification event types for resource policy violations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

/// Events that can trigger notifications.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NotifyEvent {
    /// A workload has containers without resource requests or limits
    ResourcePolicyViolation {
        /// Workload kind, e.g. `Deployment`
        kind: String,
        name: String,
        namespace: String,
        /// Non-compliant container names, in pod template order
        containers: Vec<String>,
        #[serde(default = "Utc::now")]
        timestamp: DateTime<Utc>,
    },
}

impl NotifyEvent {
    /// Short, single-line title for the event.
    #[must_use]
    pub fn title(&self) -> String {
        match self {
            Self::ResourcePolicyViolation {
                kind,
                name,
                namespace,
                ..
            } => format!("Resource policy violation: {kind} {namespace}/{name}"),
        }
    }

    /// Render the human-readable message body.
    ///
    /// Containers are enumerated 1-indexed, one per line, using Slack
    /// `mrkdwn` emphasis.
    #[must_use]
    pub fn message(&self) -> String {
        match self {
            Self::ResourcePolicyViolation {
                kind,
                name,
                namespace,
                containers,
                ..
            } => {
                let mut message = format!(
                    "Following containers of {kind} *{name}* in namespace *{namespace}* do not have resource requests or limits set\n"
                );
                for (i, container) in containers.iter().enumerate() {
                    let _ = writeln!(message, "({}). *Container Name*: {container}", i + 1);
                }
                message
            }
        }
    }
}
