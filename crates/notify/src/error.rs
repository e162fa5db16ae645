//! Delivery failures.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChannelError {
    /// Transport failure or undecodable response
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// A required setting (named by the payload) is missing
    #[error("Channel not configured: {0}")]
    NotConfigured(String),

    #[error("Rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    /// HTTP succeeded but the service rejected the call
    #[error("{service} API error: {message}")]
    Api {
        service: &'static str,
        message: String,
    },

    #[error("{0}")]
    Other(String),
}
