use std::sync::Arc;

use nudge_bot::{Bot, BotBuilder, BotConfig};
use nudge_endpoint::{Endpoint, EventSource, ScopesCollector};
use nudge_github::{
    AddReviewerOnRfr, FeedEvent, GithubClient, GithubEndpoint, GithubEventSource,
    GithubRepositoryConfig, GithubScopesCollector, GithubSettings, InMemoryGithubClient,
    IssueStatistics, PullRequestStatistics, RepositoryStatistics,
};
use nudge_store::{CollectionRef, Document, DocumentStore, InMemoryDocumentStore};
use nudge_tasks::MemoryNotifier;
use serde_json::{json, Value};

const TASK_COLLECTION: &str = "add_reviewer_on_rfr";

fn settings() -> GithubSettings {
    GithubSettings {
        token: "ghp-test".to_string(),
        repositories: vec![GithubRepositoryConfig::new("octo", "hello").with_maintainers(&[
            "alice", "bob", "carol",
        ])],
        ..GithubSettings::default()
    }
}

async fn build(github: &Arc<InMemoryGithubClient>, store: &Arc<dyn DocumentStore>) -> Bot {
    let settings = settings();
    let client: Arc<dyn GithubClient> = github.clone();
    let endpoint: Arc<dyn Endpoint> = Arc::new(GithubEndpoint::new(Arc::clone(&client)));
    let events: Arc<dyn EventSource> = Arc::new(GithubEventSource::new(
        Arc::clone(&client),
        settings.username.clone(),
        settings.repositories.clone(),
        settings.max_recent_check,
    ));
    let collector: Arc<dyn ScopesCollector> = Arc::new(GithubScopesCollector::new(
        Arc::clone(&client),
        settings.repositories.clone(),
    ));
    BotBuilder::new()
        .store(Arc::clone(store))
        .notifier(Arc::new(MemoryNotifier::new()))
        .config(BotConfig::default())
        .endpoint(endpoint, events, Some(collector))
        .statistics(Arc::new(RepositoryStatistics::new(Arc::clone(&client))))
        .statistics(Arc::new(PullRequestStatistics::new(Arc::clone(&client))))
        .statistics(Arc::new(IssueStatistics))
        .task(Arc::new(AddReviewerOnRfr::new(client, settings)))
        .build()
        .await
        .expect("build bot")
}

/// Persisted condition of the reviewer task, keyed by pull request number.
async fn task_conditions(store: &Arc<dyn DocumentStore>) -> Vec<(u64, bool)> {
    let records = store
        .find(&CollectionRef::tasks(TASK_COLLECTION), &Document::new())
        .await
        .expect("task records");
    let mut conditions = records
        .iter()
        .map(|record| {
            let number = record
                .get("statistics_queries")
                .and_then(|queries| queries.get("github_pull_request"))
                .and_then(|query| query.get("number"))
                .and_then(Value::as_u64)
                .expect("pull request number");
            let condition = record
                .get("condition")
                .and_then(Value::as_bool)
                .expect("condition");
            (number, condition)
        })
        .collect::<Vec<_>>();
    conditions.sort_unstable();
    conditions
}

#[tokio::test]
async fn reviewer_is_requested_once_when_a_title_is_tagged() {
    let github = Arc::new(InMemoryGithubClient::new());
    github.add_repository("octo", "hello", false);
    github.add_pull_request("octo", "hello", 1, "Add cache", "alice");
    github.add_pull_request("octo", "hello", 2, "Fix typo", "bob");
    let store: Arc<dyn DocumentStore> = Arc::new(InMemoryDocumentStore::new());
    let bot = build(&github, &store).await;

    let first = bot.poll_all().await.expect("first poll");
    assert_eq!(first.tasks_ran, 0);
    assert!(github.review_requests().is_empty());
    assert_eq!(task_conditions(&store).await, vec![(1, false), (2, false)]);

    assert!(github.set_pull_request_title("octo", "hello", 1, "Add cache [RFR]"));
    let second = bot.poll_all().await.expect("second poll");
    assert_eq!(second.tasks_ran, 1);
    let requests = github.review_requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].number, 1);
    assert_eq!(requests[0].reviewers, vec!["carol".to_string()]);
    assert_eq!(task_conditions(&store).await, vec![(1, true), (2, false)]);

    // The reviewer now present turns the condition off without a new request.
    let third = bot.poll_all().await.expect("third poll");
    assert_eq!(third.tasks_ran, 0);
    assert_eq!(github.review_requests().len(), 1);
    assert_eq!(task_conditions(&store).await, vec![(1, false), (2, false)]);
}

#[tokio::test]
async fn feed_events_trigger_the_task_exactly_once() {
    let github = Arc::new(InMemoryGithubClient::new());
    github.add_repository("octo", "hello", false);
    github.add_pull_request("octo", "hello", 2, "Fix typo", "bob");
    let store: Arc<dyn DocumentStore> = Arc::new(InMemoryDocumentStore::new());
    let bot = build(&github, &store).await;
    bot.poll_all().await.expect("poll");

    assert!(github.set_pull_request_title("octo", "hello", 2, "Fix typo [RFR]"));
    let edited = FeedEvent {
        id: "9001".to_string(),
        kind: "PullRequestEvent".to_string(),
        actor: "bob".to_string(),
        payload: json!({"action": "edited", "pull_request": {"number": 2}})
            .as_object()
            .cloned()
            .expect("payload"),
    };
    github.push_repository_event("octo", "hello", edited);

    let slave = bot.slave("github").expect("github slave");
    assert_eq!(slave.factory().collect_new_events().await.expect("collect"), 1);
    let report = slave.handle_events().await.expect("handle");
    assert_eq!(report.events, 1);
    assert_eq!(report.tasks_ran, 1);

    // Already delivered: observing the same feed again yields nothing.
    assert_eq!(slave.factory().collect_new_events().await.expect("recollect"), 0);
    let requests = github.review_requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].number, 2);
    assert_eq!(requests[0].reviewers, vec!["alice".to_string()]);
    assert_eq!(
        slave.factory().delivered().items().await.expect("ledger"),
        vec!["github::9001".to_string()]
    );
}
