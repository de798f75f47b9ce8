use std::sync::Arc;

use anyhow::bail;
use async_trait::async_trait;
use nudge_tasks::Notifier;
use tracing::debug;

use crate::{split_message, ChatConnection, MAX_LINE_CHARS};

/// Delivers chat notifications over a [`ChatConnection`], one line at a time.
/// Email goes to the fallback notifier when one is set.
pub struct ChatNotifier {
    connection: Arc<dyn ChatConnection>,
    email: Option<Arc<dyn Notifier>>,
}

impl ChatNotifier {
    pub fn new(connection: Arc<dyn ChatConnection>) -> Self {
        Self {
            connection,
            email: None,
        }
    }

    pub fn with_email_fallback(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.email = Some(notifier);
        self
    }
}

#[async_trait]
impl Notifier for ChatNotifier {
    async fn send_chat(&self, target: &str, message: &str) -> anyhow::Result<()> {
        let lines = split_message(message, MAX_LINE_CHARS);
        debug!(target_name = target, lines = lines.len(), "sending chat message");
        for line in lines {
            self.connection.send(target, &line).await?;
        }
        Ok(())
    }

    async fn send_email(
        &self,
        receivers: &[String],
        subject: &str,
        body: &str,
    ) -> anyhow::Result<()> {
        if let Some(email) = &self.email {
            return email.send_email(receivers, subject, body).await;
        }
        bail!(
            "chat notifier cannot deliver email '{subject}' to {} receivers",
            receivers.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use nudge_tasks::{MemoryNotifier, Notification, Notifier};

    use super::ChatNotifier;
    use crate::testing::ScriptedConnection;

    #[tokio::test]
    async fn multi_line_messages_are_sent_line_by_line() {
        let connection = Arc::new(ScriptedConnection::new(Vec::new()));
        let notifier = ChatNotifier::new(connection.clone());
        notifier
            .send_chat("#dev", "report:\nhello: 2 open pull requests")
            .await
            .expect("send");
        assert_eq!(
            connection.sent(),
            vec![
                ("#dev".to_string(), "report:".to_string()),
                ("#dev".to_string(), "hello: 2 open pull requests".to_string()),
            ]
        );
        assert!(notifier
            .send_email(&["a@example.com".to_string()], "daily", "body")
            .await
            .is_err());
    }

    #[tokio::test]
    async fn email_is_handed_to_the_fallback() {
        let connection = Arc::new(ScriptedConnection::new(Vec::new()));
        let mail = Arc::new(MemoryNotifier::new());
        let notifier = ChatNotifier::new(connection.clone()).with_email_fallback(mail.clone());
        notifier
            .send_email(&["a@example.com".to_string()], "daily", "body")
            .await
            .expect("email");
        assert!(connection.sent().is_empty());
        assert_eq!(mail.sent().len(), 1);
        assert!(matches!(mail.sent()[0], Notification::Email { .. }));
    }
}
