use std::sync::{Arc, LazyLock};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use nudge_endpoint::{downcast_scope, EndpointScope, ScopeKind};
use nudge_statistics::{Statistics, StatisticsDefinition};
use regex::Regex;
use serde_json::{json, Value};

use crate::{GithubClient, GithubError, IssueScope, PullRequestScope, RepositoryScope, ISSUE, PULL_REQUEST, REPOSITORY};

static TITLE_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[ *([\w\-]+) *\]").expect("title tag regex"));

/// Bracketed tags of a title in order, e.g. `[RFR] [WIP] x` gives `RFR`, `WIP`.
pub fn title_tags(title: &str) -> Vec<String> {
    TITLE_TAG
        .captures_iter(title)
        .filter_map(|captures| captures.get(1))
        .map(|tag| tag.as_str().to_string())
        .collect()
}

/// Renders the age of an RFC 3339 timestamp like `3 days ago`.
pub fn pretty_age(timestamp: &str, now: DateTime<Utc>) -> Option<String> {
    let then = DateTime::parse_from_rfc3339(timestamp).ok()?;
    let seconds = now
        .signed_duration_since(then.with_timezone(&Utc))
        .num_seconds()
        .max(0);
    let (amount, unit) = match seconds {
        0..=59 => (seconds, "second"),
        60..=3_599 => (seconds / 60, "minute"),
        3_600..=86_399 => (seconds / 3_600, "hour"),
        86_400..=2_591_999 => (seconds / 86_400, "day"),
        2_592_000..=31_535_999 => (seconds / 2_592_000, "month"),
        _ => (seconds / 31_536_000, "year"),
    };
    let plural = if amount == 1 { "" } else { "s" };
    Some(format!("{amount} {unit}{plural} ago"))
}

fn join_strings(value: &Value) -> Option<String> {
    let items = value.as_array()?;
    Some(
        items
            .iter()
            .filter_map(Value::as_str)
            .collect::<Vec<_>>()
            .join(", "),
    )
}

async fn scope_of<T: EndpointScope + Clone + 'static>(statistics: &Statistics) -> Result<T> {
    let scope = statistics.scope().await?;
    downcast_scope::<T>(scope.as_ref())
        .cloned()
        .ok_or_else(|| anyhow!("scope {} is not served by this endpoint", scope.kind()))
}

/// `github_repository`: size and activity of a repository.
pub struct RepositoryStatistics {
    client: Arc<dyn GithubClient>,
}

impl RepositoryStatistics {
    pub const KEY: &'static str = "github_repository";

    pub fn new(client: Arc<dyn GithubClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl StatisticsDefinition for RepositoryStatistics {
    fn key(&self) -> &str {
        Self::KEY
    }

    fn scope_kind(&self) -> &'static ScopeKind {
        &REPOSITORY
    }

    fn statistic_names(&self) -> &'static [&'static str] {
        &[
            "name",
            "number_of_open_pull_requests",
            "number_of_open_issues",
            "forks_count",
        ]
    }

    async fn compute(&self, name: &str, statistics: &Statistics) -> Result<Value> {
        let scope = scope_of::<RepositoryScope>(statistics).await?;
        let (owner, repo) = (scope.organization.as_str(), scope.name());
        Ok(match name {
            "name" => json!(repo),
            "number_of_open_pull_requests" => {
                let pulls = self
                    .client
                    .list_open_pull_requests(owner, repo)
                    .await
                    .map_err(GithubError::into_anyhow)?;
                json!(pulls.len())
            }
            "number_of_open_issues" => {
                let issues = self
                    .client
                    .list_open_issues(owner, repo)
                    .await
                    .map_err(GithubError::into_anyhow)?;
                json!(issues.len())
            }
            "forks_count" => json!(scope.repository.forks_count),
            other => return Err(anyhow!("unknown repository statistic '{other}'")),
        })
    }
}

/// `github_pull_request`: review state of a pull request.
pub struct PullRequestStatistics {
    client: Arc<dyn GithubClient>,
}

impl PullRequestStatistics {
    pub const KEY: &'static str = "github_pull_request";

    pub fn new(client: Arc<dyn GithubClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl StatisticsDefinition for PullRequestStatistics {
    fn key(&self) -> &str {
        Self::KEY
    }

    fn scope_kind(&self) -> &'static ScopeKind {
        &PULL_REQUEST
    }

    fn statistic_names(&self) -> &'static [&'static str] {
        &[
            "title",
            "owner",
            "state",
            "title_tags",
            "reviewers",
            "total_comments",
            "number_of_commits",
            "last_update",
        ]
    }

    async fn compute(&self, name: &str, statistics: &Statistics) -> Result<Value> {
        let scope = scope_of::<PullRequestScope>(statistics).await?;
        let pull_request = &scope.pull_request;
        Ok(match name {
            "title" => json!(pull_request.title),
            "owner" => json!(pull_request.user.login),
            "state" => json!(pull_request.state),
            "title_tags" => {
                let title = statistics.statistic("title").await?;
                json!(title_tags(title.as_str().unwrap_or_default()))
            }
            "reviewers" => json!(
                self.client
                    .reviewers(
                        &scope.repository.organization,
                        scope.repository.name(),
                        pull_request.number,
                    )
                    .await
                    .map_err(GithubError::into_anyhow)?
            ),
            "total_comments" => json!(pull_request.comments + pull_request.review_comments),
            "number_of_commits" => json!(pull_request.commits),
            "last_update" => json!(pull_request.updated_at),
            other => return Err(anyhow!("unknown pull request statistic '{other}'")),
        })
    }

    fn pretty(&self, name: &str, value: &Value) -> Option<String> {
        match name {
            "title_tags" | "reviewers" => join_strings(value),
            "last_update" => pretty_age(value.as_str()?, Utc::now()),
            _ => None,
        }
    }
}

/// `github_issue`: triage state of an issue.
#[derive(Debug, Default)]
pub struct IssueStatistics;

impl IssueStatistics {
    pub const KEY: &'static str = "github_issue";
}

#[async_trait]
impl StatisticsDefinition for IssueStatistics {
    fn key(&self) -> &str {
        Self::KEY
    }

    fn scope_kind(&self) -> &'static ScopeKind {
        &ISSUE
    }

    fn statistic_names(&self) -> &'static [&'static str] {
        &["title", "assignee", "number_of_comments"]
    }

    async fn compute(&self, name: &str, statistics: &Statistics) -> Result<Value> {
        let scope = scope_of::<IssueScope>(statistics).await?;
        let issue = &scope.issue;
        Ok(match name {
            "title" => json!(issue.title),
            "assignee" => json!(issue.assignee.as_ref().map(|user| user.login.as_str())),
            "number_of_comments" => json!(issue.comments),
            other => return Err(anyhow!("unknown issue statistic '{other}'")),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{TimeZone, Utc};
    use nudge_endpoint::{Endpoint, ScopeQuery};
    use nudge_statistics::{Statistics, StatisticsDefinition};
    use nudge_store::InMemoryDocumentStore;
    use serde_json::json;

    use super::{pretty_age, title_tags, PullRequestStatistics, RepositoryStatistics};
    use crate::{GithubEndpoint, InMemoryGithubClient};

    #[test]
    fn title_tags_tolerate_inner_spaces() {
        assert_eq!(title_tags("[RFR] [ WIP ] lexer"), vec!["RFR", "WIP"]);
        assert_eq!(title_tags("[1LP][RFR]"), vec!["1LP", "RFR"]);
        assert!(title_tags("no tags [ ]").is_empty());
    }

    #[test]
    fn ages_use_the_largest_whole_unit() {
        let now = Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).single().expect("now");
        assert_eq!(
            pretty_age("2024-03-10T11:59:30Z", now).as_deref(),
            Some("30 seconds ago")
        );
        assert_eq!(pretty_age("2024-03-10T11:00:00Z", now).as_deref(), Some("1 hour ago"));
        assert_eq!(pretty_age("2024-03-07T12:00:00Z", now).as_deref(), Some("3 days ago"));
        assert!(pretty_age("yesterday", now).is_none());
    }

    fn setup() -> (Arc<InMemoryGithubClient>, Arc<GithubEndpoint>) {
        let client = Arc::new(InMemoryGithubClient::new());
        client.add_repository("octo", "hello", false);
        client.add_pull_request("octo", "hello", 3, "[RFR][1LP] faster lexer", "alice");
        client.add_pull_request("octo", "hello", 4, "docs", "bob");
        client.add_issue("octo", "hello", 5, "crash", "carol");
        let endpoint = Arc::new(GithubEndpoint::new(client.clone()));
        (client, endpoint)
    }

    #[tokio::test]
    async fn pull_request_statistics_collect_review_state() {
        let (client, endpoint) = setup();
        let definition = Arc::new(PullRequestStatistics::new(client.clone()));
        let statistics = Statistics::new(
            definition,
            endpoint,
            Arc::new(InMemoryDocumentStore::new()),
            &ScopeQuery::new()
                .with("organization", "octo")
                .with("repository", "hello")
                .with("number", 3_u64),
        )
        .expect("statistics");

        assert_eq!(
            statistics.statistic("title_tags").await.expect("tags"),
            json!(["RFR", "1LP"])
        );
        assert_eq!(
            statistics.statistic("reviewers").await.expect("reviewers"),
            json!([])
        );
        assert_eq!(statistics.statistic("owner").await.expect("owner"), json!("alice"));
        assert_eq!(statistics.statistic("number").await.expect("number"), json!(3));
    }

    #[tokio::test]
    async fn repository_statistics_count_open_work() {
        let (client, endpoint) = setup();
        let definition = Arc::new(RepositoryStatistics::new(client));
        let scope = endpoint
            .init_by_keys(
                &crate::REPOSITORY,
                &ScopeQuery::new()
                    .with("organization", "octo")
                    .with("repository", "hello"),
            )
            .await
            .expect("repository");
        let statistics = Statistics::for_scope(
            definition,
            endpoint,
            Arc::new(InMemoryDocumentStore::new()),
            scope,
        )
        .expect("statistics");
        statistics.collect(false).await.expect("collect");
        let document = statistics.document().await.expect("load").expect("document");
        assert_eq!(document.get("number_of_open_pull_requests"), Some(&json!(2)));
        assert_eq!(document.get("number_of_open_issues"), Some(&json!(1)));
        assert_eq!(document.get("name"), Some(&json!("hello")));
    }

    #[test]
    fn list_statistics_render_joined() {
        let definition = PullRequestStatistics::new(Arc::new(InMemoryGithubClient::new()));
        assert_eq!(
            definition.pretty("reviewers", &json!(["alice", "bob"])).as_deref(),
            Some("alice, bob")
        );
        assert!(definition.pretty("title", &json!("x")).is_none());
    }
}
