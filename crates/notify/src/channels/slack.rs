//! Slack Web API notification channel.
//!
//! Posts plain `mrkdwn` text to a single channel through `chat.postMessage`
//! using a bot token.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::ChannelError;
use crate::events::NotifyEvent;
use crate::NotifyChannel;

/// Environment variable for the Slack bot token.
const ENV_SLACK_BOT_TOKEN: &str = "SLACK_BOT_TOKEN";

/// Environment variable for the target Slack channel (ID or name).
const ENV_SLACK_CHANNEL: &str = "SLACK_CHANNEL";

/// Environment variable overriding the Slack API base URL.
const ENV_SLACK_API_URL: &str = "SLACK_API_URL";

/// Default Slack Web API base URL.
pub const DEFAULT_SLACK_API_URL: &str = "https://slack.com/api";

/// Fallback wait when Slack rate limits without a `Retry-After` header.
const DEFAULT_RETRY_AFTER_SECS: u64 = 30;

/// Slack bot notification channel.
pub struct SlackChannel {
    token: Option<String>,
    channel: Option<String>,
    api_url: String,
    client: reqwest::Client,
}

impl SlackChannel {
    /// Create a new Slack channel from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        let token = std::env::var(ENV_SLACK_BOT_TOKEN)
            .ok()
            .filter(|v| !v.is_empty());
        let channel = std::env::var(ENV_SLACK_CHANNEL)
            .ok()
            .filter(|v| !v.is_empty());
        let api_url =
            std::env::var(ENV_SLACK_API_URL).unwrap_or_else(|_| DEFAULT_SLACK_API_URL.to_string());

        if token.is_some() && channel.is_some() {
            debug!("Slack notifications enabled");
        } else {
            debug!("Slack notifications disabled (SLACK_BOT_TOKEN or SLACK_CHANNEL not set)");
        }

        Self {
            token,
            channel,
            api_url,
            client: reqwest::Client::new(),
        }
    }

    /// Create a Slack channel with an explicit token and target channel.
    #[must_use]
    pub fn new(token: impl Into<String>, channel: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
            channel: Some(channel.into()),
            api_url: DEFAULT_SLACK_API_URL.to_string(),
            client: reqwest::Client::new(),
        }
    }

    /// Point the channel at a different API base URL.
    #[must_use]
    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into();
        self
    }

    fn post_message_url(&self) -> String {
        format!("{}/chat.postMessage", self.api_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl NotifyChannel for SlackChannel {
    fn name(&self) -> &'static str {
        "slack"
    }

    fn enabled(&self) -> bool {
        self.token.is_some() && self.channel.is_some()
    }

    async fn send(&self, event: &NotifyEvent) -> Result<(), ChannelError> {
        let token = self
            .token
            .as_ref()
            .ok_or_else(|| ChannelError::NotConfigured(ENV_SLACK_BOT_TOKEN.to_string()))?;
        let channel = self
            .channel
            .as_ref()
            .ok_or_else(|| ChannelError::NotConfigured(ENV_SLACK_CHANNEL.to_string()))?;

        let payload = PostMessage {
            channel,
            text: event.message(),
            mrkdwn: true,
        };

        debug!(
            channel = "slack",
            title = %event.title(),
            "Sending notification"
        );

        let response = self
            .client
            .post(self.post_message_url())
            .bearer_auth(token)
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_RETRY_AFTER_SECS);
            warn!(channel = "slack", retry_after_secs, "Slack rate limited request");
            return Err(ChannelError::RateLimited { retry_after_secs });
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(
                channel = "slack",
                status = %status,
                body = %body,
                "Slack API request failed"
            );
            return Err(ChannelError::Other(format!(
                "Slack returned {status}: {body}"
            )));
        }

        // chat.postMessage reports failures in the body with a 200 status
        let body: PostMessageResponse = response.json().await?;
        if body.ok {
            debug!(channel = "slack", "Notification sent successfully");
            Ok(())
        } else {
            let message = body.error.unwrap_or_else(|| "unknown_error".to_string());
            warn!(channel = "slack", error = %message, "Slack rejected message");
            Err(ChannelError::Api {
                service: "slack",
                message,
            })
        }
    }
}

// =============================================================================
// Slack API types
// =============================================================================

#[derive(Debug, Serialize)]
struct PostMessage<'a> {
    channel: &'a str,
    text: String,
    mrkdwn: bool,
}

#[derive(Debug, Deserialize)]
struct PostMessageResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
}
