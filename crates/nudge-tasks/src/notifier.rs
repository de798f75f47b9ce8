use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use tracing::info;

/// Best-effort outbound notification sinks used by task bodies.
///
/// Failures are returned to the calling task and never retried here.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_chat(&self, target: &str, message: &str) -> anyhow::Result<()>;

    async fn send_email(
        &self,
        receivers: &[String],
        subject: &str,
        body: &str,
    ) -> anyhow::Result<()>;
}

/// Writes notifications to the log instead of delivering them.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send_chat(&self, target: &str, message: &str) -> anyhow::Result<()> {
        info!(target_name = target, text = message, "chat notification");
        Ok(())
    }

    async fn send_email(
        &self,
        receivers: &[String],
        subject: &str,
        body: &str,
    ) -> anyhow::Result<()> {
        info!(
            receivers = %receivers.join(","),
            subject,
            body_bytes = body.len(),
            "email notification"
        );
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    Chat {
        target: String,
        message: String,
    },
    Email {
        receivers: Vec<String>,
        subject: String,
        body: String,
    },
}

/// Keeps every notification in memory, for dry runs and tests.
#[derive(Debug, Default)]
pub struct MemoryNotifier {
    sent: Mutex<Vec<Notification>>,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn record(&self, notification: Notification) {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(notification);
    }
}

#[async_trait]
impl Notifier for MemoryNotifier {
    async fn send_chat(&self, target: &str, message: &str) -> anyhow::Result<()> {
        self.record(Notification::Chat {
            target: target.to_string(),
            message: message.to_string(),
        });
        Ok(())
    }

    async fn send_email(
        &self,
        receivers: &[String],
        subject: &str,
        body: &str,
    ) -> anyhow::Result<()> {
        self.record(Notification::Email {
            receivers: receivers.to_vec(),
            subject: subject.to_string(),
            body: body.to_string(),
        });
        Ok(())
    }
}
