//! Fire-and-forget notifications about lock changes and deploys.
//!
//! The lock table and the deploy path hand a [`Notification`] to a
//! [`NotifierSet`], which spawns one detached task per configured
//! [`Notifier`]. A failing notifier is logged and otherwise ignored; it never
//! affects the operation that produced the event.

mod datadog;
mod slack;
mod template;

pub use datadog::DatadogNotifier;
pub use slack::SlackNotifier;
pub use template::render;

use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;

use crate::config::{MessageTemplates, PployConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum NotificationKind {
    LockGained,
    LockExtended,
    LockReleased,
    Deployed,
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotificationKind::LockGained => write!(f, "lock-gained"),
            NotificationKind::LockExtended => write!(f, "lock-extended"),
            NotificationKind::LockReleased => write!(f, "lock-released"),
            NotificationKind::Deployed => write!(f, "deployed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub kind: NotificationKind,
    pub project: String,
    pub user: String,
    pub env: Option<String>,
}

impl Notification {
    pub fn new(kind: NotificationKind, project: &str, user: &str) -> Self {
        Self {
            kind,
            project: project.to_string(),
            user: user.to_string(),
            env: None,
        }
    }

    pub fn deployed(project: &str, user: &str, env: &str) -> Self {
        Self {
            env: Some(env.to_string()),
            ..Self::new(NotificationKind::Deployed, project, user)
        }
    }
}

impl MessageTemplates {
    /// Template for a kind; empty means "do not send".
    pub fn for_kind(&self, kind: NotificationKind) -> &str {
        match kind {
            NotificationKind::LockGained => &self.lock_gained,
            NotificationKind::LockExtended => &self.lock_extended,
            NotificationKind::LockReleased => &self.lock_released,
            NotificationKind::Deployed => &self.deployed,
        }
    }
}

/// A destination for notifications.
#[async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &str;

    async fn notify(&self, notification: &Notification) -> Result<()>;
}

/// Fan-out over every configured notifier.
#[derive(Clone, Default)]
pub struct NotifierSet {
    notifiers: Vec<Arc<dyn Notifier>>,
}

impl NotifierSet {
    pub fn new(notifiers: Vec<Arc<dyn Notifier>>) -> Self {
        Self { notifiers }
    }

    /// Build the Slack and Datadog notifiers the config enables.
    pub fn from_config(config: &PployConfig) -> Self {
        let mut notifiers: Vec<Arc<dyn Notifier>> = Vec::new();
        if let Some(slack) = SlackNotifier::from_config(&config.slack) {
            notifiers.push(Arc::new(slack));
        }
        if let Some(datadog) = DatadogNotifier::from_config(&config.datadog) {
            notifiers.push(Arc::new(datadog));
        }
        Self { notifiers }
    }

    pub fn is_empty(&self) -> bool {
        self.notifiers.is_empty()
    }

    /// Send without waiting. Needs a tokio runtime; outside one the event is
    /// dropped with a debug log.
    pub fn emit(&self, notification: Notification) {
        if self.notifiers.is_empty() {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::debug!(kind = %notification.kind, "no runtime, notification dropped");
            return;
        };
        let notification = Arc::new(notification);
        for notifier in &self.notifiers {
            let notifier = Arc::clone(notifier);
            let notification = Arc::clone(&notification);
            handle.spawn(async move {
                if let Err(e) = notifier.notify(&notification).await {
                    tracing::warn!(
                        notifier = notifier.name(),
                        kind = %notification.kind,
                        project = %notification.project,
                        "notification failed: {:#}",
                        e
                    );
                }
            });
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Records every notification it receives.
    #[derive(Default)]
    pub struct RecordingNotifier {
        pub received: Mutex<Vec<Notification>>,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        fn name(&self) -> &str {
            "recording"
        }

        async fn notify(&self, notification: &Notification) -> Result<()> {
            self.received.lock().unwrap().push(notification.clone());
            Ok(())
        }
    }

    impl RecordingNotifier {
        /// Wait until `count` notifications arrived (the sends are detached tasks).
        pub async fn wait_for(&self, count: usize) -> Vec<Notification> {
            for _ in 0..200 {
                {
                    let received = self.received.lock().unwrap();
                    if received.len() >= count {
                        return received.clone();
                    }
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            self.received.lock().unwrap().clone()
        }
    }
}
