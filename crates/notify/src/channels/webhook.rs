//! Generic JSON webhook channel.
//!
//! Posts the serialized [`NotifyEvent`] as-is, so any HTTP endpoint that
//! accepts JSON can take over remediation of a stuck pod.

use async_trait::async_trait;
use tracing::debug;

use super::check_response;
use crate::error::ChannelError;
use crate::events::NotifyEvent;
use crate::NotifyChannel;

/// Environment variable for the webhook URL.
const ENV_WEBHOOK_URL: &str = "NOTIFY_WEBHOOK_URL";

/// Environment variable for an optional bearer token.
const ENV_WEBHOOK_TOKEN: &str = "NOTIFY_WEBHOOK_TOKEN";

/// Generic JSON webhook notification channel.
pub struct WebhookChannel {
    url: Option<String>,
    token: Option<String>,
    client: reqwest::Client,
}

impl WebhookChannel {
    /// Create a webhook channel from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        let url = std::env::var(ENV_WEBHOOK_URL)
            .ok()
            .filter(|s| !s.is_empty());
        let token = std::env::var(ENV_WEBHOOK_TOKEN)
            .ok()
            .filter(|s| !s.is_empty());

        if url.is_some() {
            debug!("Webhook notifications enabled");
        } else {
            debug!("Webhook notifications disabled (NOTIFY_WEBHOOK_URL not set)");
        }

        Self {
            url,
            token,
            client: reqwest::Client::new(),
        }
    }

    /// Create a webhook channel for a specific URL.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            token: None,
            client: reqwest::Client::new(),
        }
    }

    /// Attach a bearer token to every request.
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }
}

#[async_trait]
impl NotifyChannel for WebhookChannel {
    fn name(&self) -> &'static str {
        "webhook"
    }

    fn enabled(&self) -> bool {
        self.url.is_some()
    }

    async fn send(&self, event: &NotifyEvent) -> Result<(), ChannelError> {
        let url = self
            .url
            .as_ref()
            .ok_or_else(|| ChannelError::NotConfigured(ENV_WEBHOOK_URL.to_string()))?;

        debug!(channel = "webhook", event_type = ?event.title(), "Sending notification");

        let mut request = self.client.post(url).json(event);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        check_response("webhook", response).await
    }
}
