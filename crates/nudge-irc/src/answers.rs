use anyhow::{anyhow, Result};
use async_trait::async_trait;
use nudge_endpoint::ScopeKind;
use nudge_tasks::{ConditionalTask, TaskContext};
use serde_json::Value;

use crate::{MessageScope, MESSAGE, MESSAGE_MENTIONED_ME_EVENT};

/// Statistics collection read by the `prs` command.
pub const REPOSITORY_STATISTICS: &str = "github_repository";

/// The command word following `nick`, lowercased: `"nudgebot: PRS"` gives
/// `"prs"`. `None` when the nick is absent, empty when nothing follows it.
pub fn mention_command(content: &str, nick: &str) -> Option<String> {
    let (_, rest) = content.split_once(nick)?;
    let rest = rest.trim_start_matches(|c: char| c == ':' || c == ',' || c.is_whitespace());
    Some(
        rest.split_whitespace()
            .next()
            .unwrap_or_default()
            .to_lowercase(),
    )
}

/// Replies to chat messages addressed to the bot.
pub struct AnswerMentions {
    nick: String,
}

impl AnswerMentions {
    pub const NAME: &'static str = "AnswerMentions";

    pub fn new(nick: impl Into<String>) -> Self {
        Self { nick: nick.into() }
    }

    async fn open_pull_requests(ctx: &TaskContext) -> Result<String> {
        let snapshot = ctx.all_statistics().await?;
        let mut counts = snapshot
            .collection(REPOSITORY_STATISTICS)
            .iter()
            .filter_map(|document| {
                let organization = document.get("organization")?.as_str()?;
                let repository = document.get("repository")?.as_str()?;
                let open = document
                    .get("number_of_open_pull_requests")
                    .and_then(Value::as_u64)?;
                Some(format!("{organization}/{repository}: {open}"))
            })
            .collect::<Vec<_>>();
        if counts.is_empty() {
            return Ok("no repository statistics yet".to_string());
        }
        counts.sort();
        Ok(format!("open pull requests: {}", counts.join(", ")))
    }
}

#[async_trait]
impl ConditionalTask for AnswerMentions {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn scope_kind(&self) -> &'static ScopeKind {
        &MESSAGE
    }

    fn run_once(&self) -> bool {
        false
    }

    async fn condition(&self, ctx: &TaskContext) -> Result<bool> {
        Ok(ctx
            .event()
            .is_some_and(|event| event.name() == MESSAGE_MENTIONED_ME_EVENT))
    }

    async fn artifacts(&self, ctx: &TaskContext) -> Result<Vec<String>> {
        Ok(ctx.event().map(|event| vec![event.hash()]).unwrap_or_default())
    }

    async fn run(&self, ctx: &TaskContext) -> Result<()> {
        let message = ctx
            .scope_of::<MessageScope>()
            .ok_or_else(|| anyhow!("task context carries no chat message"))?;
        let reply = match mention_command(&message.content, &self.nick).as_deref() {
            Some("ping") => "pong".to_string(),
            Some("prs") => Self::open_pull_requests(ctx).await?,
            _ => "I answer to: ping, prs".to_string(),
        };
        // Private messages arrive with the bot's own nick as channel.
        let target = if message.channel.name == self.nick {
            &message.sender
        } else {
            &message.channel.name
        };
        ctx.notifier()
            .send_chat(target, &format!("{}, {reply}", message.sender))
            .await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use nudge_endpoint::{hierarchy, Endpoint, EndpointScope, Event, ScopeQuery};
    use nudge_statistics::StatisticsCollection;
    use nudge_store::{CollectionRef, DocumentStore, InMemoryDocumentStore};
    use nudge_tasks::{ConditionalTask, MemoryNotifier, Notification, TaskContext};
    use serde_json::json;

    use super::{mention_command, AnswerMentions, REPOSITORY_STATISTICS};
    use crate::{IrcEndpoint, MESSAGE, MESSAGE_EVENT, MESSAGE_MENTIONED_ME_EVENT};

    async fn context(
        channel: &str,
        content: &str,
        name: &str,
        store: Arc<InMemoryDocumentStore>,
        notifier: Arc<MemoryNotifier>,
    ) -> TaskContext {
        let data = json!({
            "server": "irc.example.net",
            "channel": channel,
            "sender": "alice",
            "content": content,
            "datetime": "2024-03-02T12:00:00Z",
        });
        let data = data.as_object().cloned().expect("object");
        let query = ScopeQuery::from_data(&MESSAGE, &data).expect("query");
        let scope: Arc<dyn EndpointScope> = IrcEndpoint
            .init_by_keys(&MESSAGE, &query)
            .await
            .expect("scope");
        TaskContext::new(
            hierarchy(scope),
            StatisticsCollection::new(Vec::new()),
            Some(Event::new("m1", &MESSAGE, name, data)),
            notifier,
            store,
        )
    }

    fn replies(notifier: &MemoryNotifier) -> Vec<(String, String)> {
        notifier
            .sent()
            .into_iter()
            .filter_map(|notification| match notification {
                Notification::Chat { target, message } => Some((target, message)),
                Notification::Email { .. } => None,
            })
            .collect()
    }

    #[test]
    fn command_follows_the_nick() {
        assert_eq!(mention_command("nudgebot: PING now", "nudgebot").as_deref(), Some("ping"));
        assert_eq!(mention_command("hey nudgebot, prs?", "nudgebot").as_deref(), Some("prs?"));
        assert_eq!(mention_command("nudgebot", "nudgebot").as_deref(), Some(""));
        assert_eq!(mention_command("morning all", "nudgebot"), None);
    }

    #[tokio::test]
    async fn only_mentions_are_answered() {
        let task = AnswerMentions::new("nudgebot");
        let store = Arc::new(InMemoryDocumentStore::new());
        let notifier = Arc::new(MemoryNotifier::new());

        let plain = context("#dev", "morning", MESSAGE_EVENT, store.clone(), notifier.clone()).await;
        assert!(!task.condition(&plain).await.expect("condition"));

        let mention = context(
            "#dev",
            "nudgebot: ping",
            MESSAGE_MENTIONED_ME_EVENT,
            store,
            notifier.clone(),
        )
        .await;
        assert!(task.condition(&mention).await.expect("condition"));
        task.run(&mention).await.expect("run");
        assert_eq!(
            replies(&notifier),
            vec![("#dev".to_string(), "alice, pong".to_string())]
        );
    }

    #[tokio::test]
    async fn open_pull_requests_come_from_repository_statistics() {
        let task = AnswerMentions::new("nudgebot");
        let store = Arc::new(InMemoryDocumentStore::new());
        for (repository, open) in [("world", 0), ("hello", 3)] {
            let document = json!({
                "organization": "octo",
                "repository": repository,
                "number_of_open_pull_requests": open,
            });
            store
                .insert(
                    &CollectionRef::statistics(REPOSITORY_STATISTICS),
                    document.as_object().cloned().expect("object"),
                )
                .await
                .expect("insert");
        }
        let notifier = Arc::new(MemoryNotifier::new());
        let ctx = context(
            "nudgebot",
            "nudgebot prs",
            MESSAGE_MENTIONED_ME_EVENT,
            store,
            notifier.clone(),
        )
        .await;

        task.run(&ctx).await.expect("run");
        assert_eq!(
            replies(&notifier),
            vec![(
                "alice".to_string(),
                "alice, open pull requests: octo/hello: 3, octo/world: 0".to_string()
            )]
        );
    }
}
