use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use sha2::{Digest, Sha256};

use super::{Notification, Notifier, render};
use crate::config::{DatadogConfig, MessageTemplates};

/// Posts events to the Datadog events API.
pub struct DatadogNotifier {
    client: reqwest::Client,
    api_key: String,
    app_key: String,
    endpoint: String,
    messages: MessageTemplates,
}

#[derive(Debug, Serialize, PartialEq)]
struct DatadogEvent {
    title: String,
    text: String,
    aggregation_key: String,
    source_type_name: &'static str,
    tags: Vec<String>,
}

impl DatadogNotifier {
    /// `None` unless both keys are configured.
    pub fn from_config(config: &DatadogConfig) -> Option<Self> {
        let api_key = config.api_key.as_deref().filter(|k| !k.is_empty())?;
        let app_key = config.app_key.as_deref().filter(|k| !k.is_empty())?;
        Some(Self {
            client: reqwest::Client::new(),
            api_key: api_key.to_string(),
            app_key: app_key.to_string(),
            endpoint: format!("https://api.{}/api/v1/events", config.site),
            messages: config.messages.clone(),
        })
    }

    fn event(&self, notification: &Notification) -> Option<DatadogEvent> {
        let template = self.messages.for_kind(notification.kind);
        if template.is_empty() {
            return None;
        }
        let title = render(template, notification);

        let mut tags = vec![format!("project:{}", notification.project)];
        if let Some(env) = notification.env.as_deref().filter(|e| !e.is_empty()) {
            tags.push(format!("env:{}", env));
        }

        let mut hasher = Sha256::new();
        hasher.update(notification.project.as_bytes());
        hasher.update(notification.user.as_bytes());
        let aggregation_key = hex::encode(hasher.finalize());

        Some(DatadogEvent {
            text: title.clone(),
            title,
            aggregation_key,
            source_type_name: "pploy",
            tags,
        })
    }
}

#[async_trait]
impl Notifier for DatadogNotifier {
    fn name(&self) -> &str {
        "datadog"
    }

    async fn notify(&self, notification: &Notification) -> Result<()> {
        let Some(event) = self.event(notification) else {
            return Ok(());
        };
        self.client
            .post(&self.endpoint)
            .header("DD-API-KEY", &self.api_key)
            .header("DD-APPLICATION-KEY", &self.app_key)
            .json(&event)
            .send()
            .await
            .context("Failed to post Datadog event")?
            .error_for_status()
            .context("Datadog events API returned error status")?;
        Ok(())
    }
}
