//! Notification channel implementations.

pub mod slack;
pub mod webhook;

use async_trait::async_trait;

use crate::error::ChannelError;
use crate::events::NotifyEvent;

/// Trait for notification channels (generic webhook, Slack, etc.).
#[async_trait]
pub trait NotifyChannel: Send + Sync {
    /// Get the name of this channel.
    fn name(&self) -> &'static str;

    /// Check if this channel is enabled/configured.
    fn enabled(&self) -> bool;

    /// Send a notification event to this channel.
    async fn send(&self, event: &NotifyEvent) -> Result<(), ChannelError>;
}

/// Turn a non-success response into a [`ChannelError::Status`].
pub(crate) async fn check_response(
    channel: &'static str,
    response: reqwest::Response,
) -> Result<(), ChannelError> {
    if response.status().is_success() {
        tracing::debug!(channel, "Notification sent successfully");
        return Ok(());
    }

    let status = response.status();
    let body = response.text().await.unwrap_or_default();

    tracing::warn!(
        channel,
        status = %status,
        body = %body,
        "Webhook request failed"
    );

    Err(ChannelError::Status {
        status: status.as_u16(),
        body,
    })
}
