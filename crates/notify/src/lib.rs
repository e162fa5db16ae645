//! Notification system for resource policy violations.
//!
//! This crate delivers human-readable alerts to messaging platforms when a
//! workload is found without resource requests or limits.
//!
//! # Usage
//!
//! ```no_run
//! use notify::{Notifier, NotifyEvent};
//!
//! # async fn example() -> Result<(), notify::ChannelError> {
//! // Create notifier from environment variables
//! let notifier = Notifier::from_env();
//!
//! // Send a notification and wait for delivery
//! notifier
//!     .deliver(&NotifyEvent::ResourcePolicyViolation {
//!         kind: "Deployment".to_string(),
//!         name: "web".to_string(),
//!         namespace: "prod".to_string(),
//!         containers: vec!["app".to_string()],
//!         timestamp: chrono::Utc::now(),
//!     })
//!     .await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Configuration
//!
//! The notifier is configured via environment variables:
//!
//! - `SLACK_BOT_TOKEN` / `SLACK_CHANNEL`: enable the Slack channel
//! - `SLACK_API_URL`: override the Slack API base URL
//! - `NOTIFY_DISABLED`: Set to "true" to disable all notifications
//!
//! # Architecture
//!
//! - [`NotifyChannel`] is the seam a chat backend implements
//! - [`SlackChannel`] implements Slack `chat.postMessage` notifications
//! - [`Notifier`] delivers each event to every enabled channel and reports the first failure

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod channels;
pub mod error;
pub mod events;

pub use channels::slack::SlackChannel;
pub use channels::NotifyChannel;
pub use error::ChannelError;
pub use events::NotifyEvent;

use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Environment variable to disable all notifications.
const ENV_NOTIFY_DISABLED: &str = "NOTIFY_DISABLED";

/// Fans violation events out to the configured chat channels.
pub struct Notifier {
    channels: Vec<Arc<dyn NotifyChannel>>,
    disabled: bool,
}

impl Notifier {
    /// Build a notifier from `SLACK_*` variables, or a disabled one when
    /// `NOTIFY_DISABLED` is set.
    #[must_use]
    pub fn from_env() -> Self {
        let disabled = std::env::var(ENV_NOTIFY_DISABLED)
            .is_ok_and(|v| v.eq_ignore_ascii_case("true") || v == "1");
        if disabled {
            info!("Notifications disabled via {ENV_NOTIFY_DISABLED}");
            return Self::disabled();
        }

        let slack = SlackChannel::from_env();
        if !slack.enabled() {
            warn!("Slack token or channel missing, no notification channel configured");
            return Self::with_channels(vec![]);
        }

        info!("Slack notifications enabled");
        Self::with_channels(vec![Arc::new(slack)])
    }

    /// Notifier over an explicit channel list.
    #[must_use]
    pub fn with_channels(channels: Vec<Arc<dyn NotifyChannel>>) -> Self {
        Self {
            channels,
            disabled: false,
        }
    }

    /// Notifier that accepts and drops every event.
    #[must_use]
    pub const fn disabled() -> Self {
        Self {
            channels: vec![],
            disabled: true,
        }
    }

    /// Whether a delivery would reach at least one channel.
    #[must_use]
    pub fn has_channels(&self) -> bool {
        !self.disabled && !self.channels.is_empty()
    }

    /// Deliver an event to every enabled channel.
    ///
    /// Every channel is attempted even after a failure; the first failure is
    /// returned. A notifier with no active channels succeeds without sending.
    pub async fn deliver(&self, event: &NotifyEvent) -> Result<(), ChannelError> {
        if !self.has_channels() {
            debug!("No active channels, skipping event");
            return Ok(());
        }

        let mut first_error = None;
        for channel in self.channels.iter().filter(|c| c.enabled()) {
            match channel.send(event).await {
                Ok(()) => debug!(channel = channel.name(), "Notification sent"),
                Err(e) => {
                    error!(channel = channel.name(), error = %e, "Failed to send notification");
                    first_error.get_or_insert(e);
                }
            }
        }

        first_error.map_or(Ok(()), Err)
    }
}
