//! Chat backends that violation events can be posted to.

pub mod slack;

use async_trait::async_trait;

use crate::error::ChannelError;
use crate::events::NotifyEvent;

#[async_trait]
pub trait NotifyChannel: Send + Sync {
    /// Short backend name used in log fields.
    fn name(&self) -> &'static str;

    /// Whether credentials and a destination are configured.
    fn enabled(&self) -> bool;

    async fn send(&self, event: &NotifyEvent) -> Result<(), ChannelError>;
}
