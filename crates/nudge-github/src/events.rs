use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use nudge_endpoint::{Event, EventSource, KnownEvents};
use regex::Regex;
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use crate::{
    FeedEvent, GithubClient, GithubRepositoryConfig, GithubResult, GITHUB_ENDPOINT_KEY, ISSUE,
    PULL_REQUEST, REPOSITORY,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Feed {
    Repository,
    Issues,
}

const FEEDS: [Feed; 2] = [Feed::Repository, Feed::Issues];

static MENTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|[^\w@/`])@([A-Za-z0-9](?:[A-Za-z0-9-]*[A-Za-z0-9])?)").expect("mention regex")
});

/// Logins mentioned as `@login` in a comment body, first occurrence order.
pub fn mentioned_users(body: &str) -> Vec<String> {
    let mut mentioned: Vec<String> = Vec::new();
    for captures in MENTION.captures_iter(body) {
        let Some(login) = captures.get(1).map(|login| login.as_str()) else {
            continue;
        };
        if !mentioned.iter().any(|known| known.eq_ignore_ascii_case(login)) {
            mentioned.push(login.to_string());
        }
    }
    mentioned
}

/// `actor` always; `comment` for comment payloads; `merged` for a pull
/// request closed by merging.
fn feed_artifacts(entry: &FeedEvent, number: Option<&Value>) -> Map<String, Value> {
    let payload = &entry.payload;
    let mut artifacts = Map::new();
    artifacts.insert("actor".to_string(), json!(entry.actor));
    if let Some(comment) = payload.get("comment").filter(|comment| comment.is_object()) {
        let body = comment.get("body").and_then(Value::as_str).unwrap_or_default();
        let author = comment
            .pointer("/user/login")
            .and_then(Value::as_str)
            .unwrap_or(entry.actor.as_str());
        artifacts.insert(
            "comment".to_string(),
            json!({
                "author": author,
                "body": body,
                "mentioned_users": mentioned_users(body),
            }),
        );
    }
    let merged = payload.get("action").and_then(Value::as_str) == Some("closed")
        && payload
            .get("pull_request")
            .and_then(|pull_request| pull_request.get("merged"))
            .and_then(Value::as_bool)
            .unwrap_or(false);
    if merged {
        artifacts.insert(
            "merged".to_string(),
            json!({ "number": number, "merged_by": entry.actor }),
        );
    }
    artifacts
}

/// Turns one feed entry of `organization/repository` into a typed event.
///
/// Entries mentioning a pull request (directly or through an issue that is
/// a pull request) become `pull_request` events, other issue entries become
/// `issue` events, everything else a `repository` event. The data carries
/// the primary keys the feed provides; a missing number is left out so
/// scope resolution reports it as missing.
pub fn classify_feed_event(organization: &str, repository: &str, entry: &FeedEvent) -> Event {
    let payload = &entry.payload;
    let number_of = |item: &Value| item.get("number").filter(|number| !number.is_null()).cloned();
    let (kind, name, number) = if let Some(pull_request) = payload.get("pull_request") {
        (&PULL_REQUEST, "pull_request", number_of(pull_request))
    } else if let Some(issue) = payload.get("issue") {
        let number = number_of(issue);
        if issue.get("pull_request").is_some_and(|link| !link.is_null()) {
            (&PULL_REQUEST, "pull_request", number)
        } else {
            (&ISSUE, "issue", number)
        }
    } else {
        (&REPOSITORY, "repository", None)
    };

    let mut data = payload.clone();
    data.insert("id".to_string(), json!(entry.id));
    data.insert("type".to_string(), json!(entry.kind));
    data.insert("organization".to_string(), json!(organization));
    data.insert("repository".to_string(), json!(repository));
    data.insert("sender".to_string(), json!({ "login": entry.actor }));
    match &number {
        Some(number) => {
            data.insert("number".to_string(), number.clone());
        }
        None => {
            if data.get("number").is_some_and(Value::is_null) {
                data.remove("number");
            }
        }
    }
    let artifacts = feed_artifacts(entry, number.as_ref());
    Event::new(entry.id.clone(), kind, name, data).with_artifacts(artifacts)
}

/// Reads the repository and issue feeds of every configured repository.
pub struct GithubEventSource {
    client: Arc<dyn GithubClient>,
    username: String,
    repositories: Vec<GithubRepositoryConfig>,
    max_recent_check: usize,
}

impl GithubEventSource {
    pub fn new(
        client: Arc<dyn GithubClient>,
        username: impl Into<String>,
        repositories: Vec<GithubRepositoryConfig>,
        max_recent_check: usize,
    ) -> Self {
        Self {
            client,
            username: username.into(),
            repositories,
            max_recent_check,
        }
    }

    async fn page(&self, feed: Feed, config: &GithubRepositoryConfig, page: u32) -> GithubResult<Vec<FeedEvent>> {
        match feed {
            Feed::Repository => {
                self.client
                    .repository_events(&config.organization, &config.name, page)
                    .await
            }
            Feed::Issues => {
                self.client
                    .issue_events(&config.organization, &config.name, page)
                    .await
            }
        }
    }

    /// New entries of one feed, oldest first. Scanning stops at the first
    /// known entry or after `limit` entries.
    async fn scan(
        &self,
        feed: Feed,
        config: &GithubRepositoryConfig,
        known: &KnownEvents,
        limit: usize,
    ) -> GithubResult<Vec<FeedEvent>> {
        let mut fresh = Vec::new();
        let mut inspected = 0_usize;
        let mut page = 1_u32;
        'pages: loop {
            let entries = self.page(feed, config, page).await?;
            if entries.is_empty() {
                break;
            }
            for entry in entries {
                if inspected >= limit || known.contains_id(GITHUB_ENDPOINT_KEY, &entry.id) {
                    break 'pages;
                }
                inspected += 1;
                if entry.actor == self.username {
                    continue;
                }
                fresh.push(entry);
            }
            page = page.saturating_add(1);
        }
        fresh.reverse();
        Ok(fresh)
    }
}

#[async_trait]
impl EventSource for GithubEventSource {
    fn endpoint_key(&self) -> &str {
        GITHUB_ENDPOINT_KEY
    }

    async fn build_events(&self, known: &KnownEvents) -> anyhow::Result<Vec<Event>> {
        let limit = (self.max_recent_check / FEEDS.len()).max(1);
        let mut events = Vec::new();
        for config in &self.repositories {
            for feed in FEEDS {
                match self.scan(feed, config, known, limit).await {
                    Ok(entries) => {
                        debug!(
                            organization = %config.organization,
                            repository = %config.name,
                            feed = ?feed,
                            entries = entries.len(),
                            "feed scanned"
                        );
                        events.extend(entries.iter().map(|entry| {
                            classify_feed_event(&config.organization, &config.name, entry)
                        }));
                    }
                    Err(error) => {
                        warn!(
                            organization = %config.organization,
                            repository = %config.name,
                            feed = ?feed,
                            error = %error,
                            "feed scan failed"
                        );
                    }
                }
            }
        }
        Ok(events)
    }
}
