use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use nudge_bot::{Bot, BotBuilder, BotConfig};
use nudge_endpoint::{Endpoint, EventSource, ScopesCollector};
use nudge_github::{
    AlertOnMergedEvent, FeedEvent, GithubClient, GithubEndpoint, GithubEventSource,
    GithubRepositoryConfig, GithubScopesCollector, InMemoryGithubClient, PullRequestStatistics,
    RepositoryStatistics,
};
use nudge_irc::{AnswerMentions, ChatConnection, ChatNotifier, IrcEndpoint, IrcEventSource};
use nudge_store::{DocumentStore, InMemoryDocumentStore};
use nudge_tasks::{UserContact, UserDirectory};
use serde_json::json;

/// Chat server double: queued inbound batches, recorded outbound lines.
#[derive(Default)]
struct ChatServer {
    inbound: Mutex<VecDeque<Vec<String>>>,
    sent: Mutex<Vec<(String, String)>>,
}

impl ChatServer {
    fn say(&self, line: &str) {
        self.inbound
            .lock()
            .expect("inbound lock")
            .push_back(vec![line.to_string()]);
    }

    fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().expect("sent lock").clone()
    }
}

#[async_trait]
impl ChatConnection for ChatServer {
    fn server(&self) -> &str {
        "irc.example.net"
    }

    fn nick(&self) -> &str {
        "nudgebot"
    }

    async fn read_lines(&self) -> anyhow::Result<Vec<String>> {
        Ok(self
            .inbound
            .lock()
            .expect("inbound lock")
            .pop_front()
            .unwrap_or_default())
    }

    async fn send(&self, target: &str, line: &str) -> anyhow::Result<()> {
        self.sent
            .lock()
            .expect("sent lock")
            .push((target.to_string(), line.to_string()));
        Ok(())
    }
}

async fn build(github: &Arc<InMemoryGithubClient>, chat: &Arc<ChatServer>) -> Bot {
    let client: Arc<dyn GithubClient> = github.clone();
    let connection: Arc<dyn ChatConnection> = chat.clone();
    let repositories = vec![GithubRepositoryConfig::new("octo", "hello")];
    let users = Arc::new(UserDirectory::new(vec![UserContact::new("alice")
        .with_github_login("alice")
        .with_chat_nick("ali")]));

    let github_endpoint: Arc<dyn Endpoint> = Arc::new(GithubEndpoint::new(Arc::clone(&client)));
    let github_events: Arc<dyn EventSource> = Arc::new(GithubEventSource::new(
        Arc::clone(&client),
        "nudgebot",
        repositories.clone(),
        50,
    ));
    let collector: Arc<dyn ScopesCollector> =
        Arc::new(GithubScopesCollector::new(Arc::clone(&client), repositories));
    let chat_endpoint: Arc<dyn Endpoint> = Arc::new(IrcEndpoint);
    let chat_events: Arc<dyn EventSource> =
        Arc::new(IrcEventSource::new(Arc::clone(&connection)));
    let store: Arc<dyn DocumentStore> = Arc::new(InMemoryDocumentStore::new());

    BotBuilder::new()
        .store(store)
        .notifier(Arc::new(ChatNotifier::new(Arc::clone(&connection))))
        .config(BotConfig::default())
        .endpoint(github_endpoint, github_events, Some(collector))
        .endpoint(chat_endpoint, chat_events, None)
        .statistics(Arc::new(RepositoryStatistics::new(Arc::clone(&client))))
        .statistics(Arc::new(PullRequestStatistics::new(client)))
        .task(Arc::new(AlertOnMergedEvent::new("#dev", users)))
        .task(Arc::new(AnswerMentions::new(connection.nick())))
        .build()
        .await
        .expect("build bot")
}

#[tokio::test]
async fn mentions_are_answered_from_polled_statistics() {
    let github = Arc::new(InMemoryGithubClient::new());
    github.add_repository("octo", "hello", false);
    github.add_pull_request("octo", "hello", 1, "Add cache", "alice");
    let chat = Arc::new(ChatServer::default());
    let bot = build(&github, &chat).await;
    bot.poll_all().await.expect("poll");

    let line = ":bob!b@host PRIVMSG #dev :nudgebot: prs";
    chat.say(line);
    let slave = bot.slave("irc").expect("irc slave");
    assert_eq!(slave.factory().collect_new_events().await.expect("collect"), 1);
    let report = slave.handle_events().await.expect("handle");
    assert_eq!(report.tasks_ran, 1);
    assert_eq!(
        chat.sent(),
        vec![(
            "#dev".to_string(),
            "bob, open pull requests: octo/hello: 1".to_string()
        )]
    );

    // The same line again is already delivered.
    chat.say(line);
    assert_eq!(slave.factory().collect_new_events().await.expect("recollect"), 0);
    assert_eq!(chat.sent().len(), 1);
}

#[tokio::test]
async fn merges_are_announced_in_the_channel() {
    let github = Arc::new(InMemoryGithubClient::new());
    github.add_repository("octo", "hello", false);
    github.add_pull_request("octo", "hello", 1, "Add cache", "alice");
    let chat = Arc::new(ChatServer::default());
    let bot = build(&github, &chat).await;

    github.push_repository_event(
        "octo",
        "hello",
        FeedEvent {
            id: "77".to_string(),
            kind: "PullRequestEvent".to_string(),
            actor: "alice".to_string(),
            payload: json!({"action": "closed", "pull_request": {"number": 1, "merged": true}})
                .as_object()
                .cloned()
                .expect("payload"),
        },
    );
    let slave = bot.slave("github").expect("github slave");
    assert_eq!(slave.factory().collect_new_events().await.expect("collect"), 1);
    let report = slave.handle_events().await.expect("handle");
    assert_eq!(report.tasks_ran, 1);
    assert_eq!(
        chat.sent(),
        vec![("#dev".to_string(), "ali has merged octo/hello#1".to_string())]
    );
}
