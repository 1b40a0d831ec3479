use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;

use super::{Notification, Notifier, render};
use crate::config::{MessageTemplates, SlackConfig};

/// Posts rendered messages to a Slack incoming webhook.
pub struct SlackNotifier {
    client: reqwest::Client,
    webhook_url: String,
    messages: MessageTemplates,
}

#[derive(Debug, Serialize)]
struct SlackPayload<'a> {
    text: &'a str,
}

impl SlackNotifier {
    /// `None` when no webhook URL is configured.
    pub fn from_config(config: &SlackConfig) -> Option<Self> {
        let webhook_url = config.webhook_url.as_deref()?.trim();
        if webhook_url.is_empty() {
            return None;
        }
        Some(Self {
            client: reqwest::Client::new(),
            webhook_url: webhook_url.to_string(),
            messages: config.messages.clone(),
        })
    }

    fn message(&self, notification: &Notification) -> Option<String> {
        let template = self.messages.for_kind(notification.kind);
        if template.is_empty() {
            return None;
        }
        Some(render(template, notification))
    }
}

#[async_trait]
impl Notifier for SlackNotifier {
    fn name(&self) -> &str {
        "slack"
    }

    async fn notify(&self, notification: &Notification) -> Result<()> {
        let Some(text) = self.message(notification) else {
            return Ok(());
        };
        self.client
            .post(&self.webhook_url)
            .json(&SlackPayload { text: &text })
            .send()
            .await
            .context("Failed to send Slack webhook")?
            .error_for_status()
            .context("Slack webhook returned error status")?;
        tracing::debug!(kind = %notification.kind, project = %notification.project, "slack notified");
        Ok(())
    }
}
