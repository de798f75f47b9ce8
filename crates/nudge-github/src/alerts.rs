//! Chat alerts driven by feed event artifacts rather than statistics.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use nudge_endpoint::{Event, ScopeKind};
use nudge_tasks::{ConditionalTask, TaskContext, UserDirectory};
use serde_json::Value;

use crate::{PullRequestScope, RepositoryScope, PULL_REQUEST, REPOSITORY};

fn artifact<'a>(event: &'a Event, key: &str, field: &str) -> Option<&'a Value> {
    event.artifacts().get(key)?.get(field)
}

fn event_id(ctx: &TaskContext) -> Vec<String> {
    ctx.event()
        .map(|event| vec![event.hash()])
        .unwrap_or_default()
}

/// Tells a channel whenever a pull request of the repository is merged.
pub struct AlertOnMergedEvent {
    chat_target: String,
    users: Arc<UserDirectory>,
}

impl AlertOnMergedEvent {
    pub const NAME: &'static str = "AlertOnMergedEvent";

    pub fn new(chat_target: impl Into<String>, users: Arc<UserDirectory>) -> Self {
        Self {
            chat_target: chat_target.into(),
            users,
        }
    }
}

#[async_trait]
impl ConditionalTask for AlertOnMergedEvent {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn scope_kind(&self) -> &'static ScopeKind {
        &REPOSITORY
    }

    fn run_once(&self) -> bool {
        false
    }

    async fn condition(&self, ctx: &TaskContext) -> Result<bool> {
        Ok(ctx
            .event()
            .is_some_and(|event| event.artifacts().contains_key("merged")))
    }

    async fn artifacts(&self, ctx: &TaskContext) -> Result<Vec<String>> {
        Ok(event_id(ctx))
    }

    async fn run(&self, ctx: &TaskContext) -> Result<()> {
        let event = ctx.event().ok_or_else(|| anyhow!("merge alert needs an event"))?;
        let repository = ctx
            .scope_of::<RepositoryScope>()
            .ok_or_else(|| anyhow!("task context carries no repository"))?;
        let merged_by = artifact(event, "merged", "merged_by")
            .and_then(Value::as_str)
            .unwrap_or("someone");
        let number = artifact(event, "merged", "number")
            .map(|number| match number {
                Value::String(text) => text.clone(),
                other => other.to_string(),
            })
            .unwrap_or_default();
        let message = format!(
            "{} has merged {}/{}#{}",
            self.users.chat_name(merged_by),
            repository.organization,
            repository.name(),
            number
        );
        ctx.notifier().send_chat(&self.chat_target, &message).await
    }
}

/// Pings every user mentioned in a pull request comment.
pub struct AlertOnMentionedUser {
    chat_target: String,
    users: Arc<UserDirectory>,
}

impl AlertOnMentionedUser {
    pub const NAME: &'static str = "AlertOnMentionedUser";

    pub fn new(chat_target: impl Into<String>, users: Arc<UserDirectory>) -> Self {
        Self {
            chat_target: chat_target.into(),
            users,
        }
    }

    fn mentioned(event: &Event) -> Vec<&str> {
        artifact(event, "comment", "mentioned_users")
            .and_then(Value::as_array)
            .map(|logins| logins.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ConditionalTask for AlertOnMentionedUser {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn scope_kind(&self) -> &'static ScopeKind {
        &PULL_REQUEST
    }

    fn run_once(&self) -> bool {
        false
    }

    async fn condition(&self, ctx: &TaskContext) -> Result<bool> {
        Ok(ctx
            .event()
            .is_some_and(|event| !Self::mentioned(event).is_empty()))
    }

    async fn artifacts(&self, ctx: &TaskContext) -> Result<Vec<String>> {
        Ok(event_id(ctx))
    }

    async fn run(&self, ctx: &TaskContext) -> Result<()> {
        let event = ctx.event().ok_or_else(|| anyhow!("mention alert needs an event"))?;
        let pull_request = ctx
            .scope_of::<PullRequestScope>()
            .ok_or_else(|| anyhow!("task context carries no pull request"))?;
        let author = artifact(event, "comment", "author")
            .and_then(Value::as_str)
            .unwrap_or("someone");
        let actor = self.users.chat_name(author);
        for login in Self::mentioned(event) {
            let message = format!(
                "{}, {} has mentioned you in {}/{} @ PR#{}.",
                self.users.chat_name(login),
                actor,
                pull_request.repository.organization,
                pull_request.repository.name(),
                pull_request.number()
            );
            ctx.notifier().send_chat(&self.chat_target, &message).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use nudge_endpoint::{hierarchy, Endpoint, EndpointScope, Event, ScopeQuery};
    use nudge_statistics::StatisticsCollection;
    use nudge_store::InMemoryDocumentStore;
    use nudge_tasks::{
        ConditionalTask, MemoryNotifier, Notification, TaskContext, UserContact, UserDirectory,
    };
    use serde_json::json;

    use super::{AlertOnMentionedUser, AlertOnMergedEvent};
    use crate::{classify_feed_event, FeedEvent, GithubEndpoint, InMemoryGithubClient, PULL_REQUEST};

    fn users() -> Arc<UserDirectory> {
        Arc::new(UserDirectory::new(vec![
            UserContact::new("bob").with_github_login("bob").with_chat_nick("bobby"),
            UserContact::new("carol").with_github_login("carol").with_chat_nick("caz"),
        ]))
    }

    fn feed_event(id: &str, actor: &str, payload: serde_json::Value) -> Event {
        classify_feed_event(
            "octo",
            "hello",
            &FeedEvent {
                id: id.to_string(),
                kind: "IssueCommentEvent".to_string(),
                actor: actor.to_string(),
                payload: payload.as_object().cloned().expect("payload"),
            },
        )
    }

    async fn context(event: Option<Event>, notifier: Arc<MemoryNotifier>) -> TaskContext {
        let client = Arc::new(InMemoryGithubClient::new());
        client.add_repository("octo", "hello", false);
        client.add_pull_request("octo", "hello", 4, "Parser", "alice");
        let endpoint = GithubEndpoint::new(client);
        let query = ScopeQuery::new()
            .with("organization", "octo")
            .with("repository", "hello")
            .with("number", 4_u64);
        let scope: Arc<dyn EndpointScope> = endpoint
            .init_by_keys(&PULL_REQUEST, &query)
            .await
            .expect("scope");
        TaskContext::new(
            hierarchy(scope),
            StatisticsCollection::new(Vec::new()),
            event,
            notifier,
            Arc::new(InMemoryDocumentStore::new()),
        )
    }

    #[tokio::test]
    async fn mentioned_users_are_pinged_by_nick() {
        let task = AlertOnMentionedUser::new("#dev", users());
        let notifier = Arc::new(MemoryNotifier::new());
        let event = feed_event(
            "11",
            "alice",
            json!({
                "action": "created",
                "issue": {"number": 4, "pull_request": {"url": "x"}},
                "comment": {"body": "@bob and @dave, thoughts?", "user": {"login": "alice"}}
            }),
        );
        let ctx = context(Some(event), notifier.clone()).await;

        assert!(task.condition(&ctx).await.expect("condition"));
        assert_eq!(task.artifacts(&ctx).await.expect("artifacts"), vec!["github::11"]);
        task.run(&ctx).await.expect("run");
        assert_eq!(
            notifier.sent(),
            vec![
                Notification::Chat {
                    target: "#dev".to_string(),
                    message: "bobby, alice has mentioned you in octo/hello @ PR#4.".to_string(),
                },
                Notification::Chat {
                    target: "#dev".to_string(),
                    message: "dave, alice has mentioned you in octo/hello @ PR#4.".to_string(),
                },
            ]
        );
    }

    #[tokio::test]
    async fn alerts_stay_quiet_without_matching_artifacts() {
        let notifier = Arc::new(MemoryNotifier::new());
        let polled = context(None, notifier.clone()).await;
        assert!(!AlertOnMentionedUser::new("#dev", users())
            .condition(&polled)
            .await
            .expect("condition"));
        assert!(!AlertOnMergedEvent::new("#dev", users())
            .condition(&polled)
            .await
            .expect("condition"));

        let plain = feed_event(
            "12",
            "alice",
            json!({"issue": {"number": 4, "pull_request": {}}, "comment": {"body": "LGTM"}}),
        );
        let ctx = context(Some(plain), notifier).await;
        assert!(!AlertOnMentionedUser::new("#dev", users())
            .condition(&ctx)
            .await
            .expect("condition"));
    }

    #[tokio::test]
    async fn merges_are_announced_with_the_merger_nick() {
        let task = AlertOnMergedEvent::new("#dev", users());
        let notifier = Arc::new(MemoryNotifier::new());
        let event = feed_event(
            "13",
            "carol",
            json!({"action": "closed", "pull_request": {"number": 4, "merged": true}}),
        );
        let ctx = context(Some(event), notifier.clone()).await;

        assert!(task.condition(&ctx).await.expect("condition"));
        task.run(&ctx).await.expect("run");
        assert_eq!(
            notifier.sent(),
            vec![Notification::Chat {
                target: "#dev".to_string(),
                message: "caz has merged octo/hello#4".to_string(),
            }]
        );
    }
}
