use std::collections::BTreeSet;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::debug;

use crate::models::{GithubReview, RequestedReviewers};
use crate::transport::{
    classify_status, clip, retry_after, transport_is_retryable, RetryPolicy, StatusClass,
};
use crate::{
    FeedEvent, GithubError, GithubIssue, GithubPullRequest, GithubRepository, GithubResult,
    GithubSettings,
};

const PAGE_SIZE: usize = 100;
const PAGE_SIZE_PARAM: &str = "100";

/// Narrow view of the code-hosting REST API the endpoint relies on.
///
/// Feed pages are 1-based and newest first; an empty page ends the feed.
#[async_trait]
pub trait GithubClient: Send + Sync {
    async fn get_repository(&self, owner: &str, repo: &str) -> GithubResult<GithubRepository>;

    async fn get_pull_request(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
    ) -> GithubResult<GithubPullRequest>;

    async fn get_issue(&self, owner: &str, repo: &str, number: u64) -> GithubResult<GithubIssue>;

    async fn list_open_pull_requests(
        &self,
        owner: &str,
        repo: &str,
    ) -> GithubResult<Vec<GithubPullRequest>>;

    /// Open issues, pull requests excluded.
    async fn list_open_issues(&self, owner: &str, repo: &str) -> GithubResult<Vec<GithubIssue>>;

    async fn repository_events(
        &self,
        owner: &str,
        repo: &str,
        page: u32,
    ) -> GithubResult<Vec<FeedEvent>>;

    async fn issue_events(&self, owner: &str, repo: &str, page: u32)
        -> GithubResult<Vec<FeedEvent>>;

    /// Logins of everyone who reviewed or was asked to review, deduplicated.
    async fn reviewers(&self, owner: &str, repo: &str, number: u64) -> GithubResult<Vec<String>>;

    async fn request_reviewers(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
        reviewers: &[String],
    ) -> GithubResult<()>;
}

/// [`GithubClient`] over the REST API with retries on rate limits, server
/// errors and transport failures.
#[derive(Clone)]
pub struct GithubApiClient {
    http: reqwest::Client,
    api_base: String,
    retry: RetryPolicy,
}

impl std::fmt::Debug for GithubApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GithubApiClient")
            .field("api_base", &self.api_base)
            .field("retry_max_attempts", &self.retry.max_attempts())
            .finish()
    }
}

impl GithubApiClient {
    pub fn new(settings: &GithubSettings) -> GithubResult<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::USER_AGENT,
            reqwest::header::HeaderValue::from_static("nudgebot"),
        );
        headers.insert(
            reqwest::header::ACCEPT,
            reqwest::header::HeaderValue::from_static("application/vnd.github+json"),
        );
        headers.insert(
            "x-github-api-version",
            reqwest::header::HeaderValue::from_static("2022-11-28"),
        );
        let auth_header = format!("Bearer {}", settings.token.trim());
        let auth_value = reqwest::header::HeaderValue::from_str(&auth_header)
            .map_err(|_| GithubError::InvalidSetup("invalid authorization token".to_string()))?;
        headers.insert(reqwest::header::AUTHORIZATION, auth_value);

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_millis(settings.request_timeout_ms.max(1)))
            .build()
            .map_err(|error| GithubError::InvalidSetup(error.to_string()))?;
        Ok(Self {
            http,
            api_base: settings.api_base.trim_end_matches('/').to_string(),
            retry: RetryPolicy::new(settings.retry_max_attempts, settings.retry_base_delay_ms),
        })
    }

    fn repo_url(&self, owner: &str, repo: &str) -> String {
        format!("{}/repos/{owner}/{repo}", self.api_base)
    }

    async fn paginate<T, F>(&self, operation: &str, mut request_builder: F) -> GithubResult<Vec<T>>
    where
        T: DeserializeOwned,
        F: FnMut(&str) -> reqwest::RequestBuilder,
    {
        let mut page = 1_u32;
        let mut rows = Vec::new();
        loop {
            let page_value = page.to_string();
            let chunk: Vec<T> = self
                .request_json(operation, || request_builder(&page_value))
                .await?;
            let chunk_len = chunk.len();
            rows.extend(chunk);
            if chunk_len < PAGE_SIZE {
                return Ok(rows);
            }
            page = page.saturating_add(1);
        }
    }

    async fn request_json<T, F>(&self, operation: &str, mut request_builder: F) -> GithubResult<T>
    where
        T: DeserializeOwned,
        F: FnMut() -> reqwest::RequestBuilder,
    {
        let mut attempt = 0_usize;
        loop {
            attempt = attempt.saturating_add(1);
            let response = request_builder()
                .header("x-nudgebot-retry-attempt", attempt.saturating_sub(1).to_string())
                .send()
                .await;
            let response = match response {
                Ok(response) => response,
                Err(error) if transport_is_retryable(&error) => {
                    match self.retry.backoff(attempt, None) {
                        Some(delay) => {
                            debug!(operation, attempt, error = %error, "retrying github request");
                            tokio::time::sleep(delay).await;
                            continue;
                        }
                        None => {
                            return Err(GithubError::Transient(format!(
                                "{operation} request failed: {error}"
                            )))
                        }
                    }
                }
                Err(error) => {
                    return Err(GithubError::InvalidSetup(format!(
                        "{operation} request could not be sent: {error}"
                    )))
                }
            };

            let status = response.status();
            if status.is_success() {
                return response
                    .json::<T>()
                    .await
                    .map_err(|source| GithubError::Decode {
                        operation: operation.to_string(),
                        source,
                    });
            }
            match classify_status(status) {
                StatusClass::NotFound => {
                    return Err(GithubError::NotFound {
                        resource: operation.to_string(),
                    })
                }
                StatusClass::Retryable => {
                    let hint = retry_after(response.headers());
                    if let Some(delay) = self.retry.backoff(attempt, hint) {
                        debug!(operation, status = status.as_u16(), attempt, "retrying github request");
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    return Err(GithubError::Transient(format!(
                        "{operation} returned status {status} after {attempt} attempts"
                    )));
                }
                StatusClass::Fatal => {
                    let body = response.text().await.unwrap_or_default();
                    return Err(GithubError::Api {
                        operation: operation.to_string(),
                        status: status.as_u16(),
                        body: clip(&body, 800),
                    });
                }
            }
        }
    }
}

#[async_trait]
impl GithubClient for GithubApiClient {
    async fn get_repository(&self, owner: &str, repo: &str) -> GithubResult<GithubRepository> {
        let url = self.repo_url(owner, repo);
        self.request_json("get repository", || self.http.get(&url))
            .await
    }

    async fn get_pull_request(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
    ) -> GithubResult<GithubPullRequest> {
        let url = format!("{}/pulls/{number}", self.repo_url(owner, repo));
        self.request_json("get pull request", || self.http.get(&url))
            .await
    }

    async fn get_issue(&self, owner: &str, repo: &str, number: u64) -> GithubResult<GithubIssue> {
        let url = format!("{}/issues/{number}", self.repo_url(owner, repo));
        self.request_json("get issue", || self.http.get(&url)).await
    }

    async fn list_open_pull_requests(
        &self,
        owner: &str,
        repo: &str,
    ) -> GithubResult<Vec<GithubPullRequest>> {
        let url = format!("{}/pulls", self.repo_url(owner, repo));
        self.paginate("list pull requests", |page| {
            self.http.get(&url).query(&[
                ("state", "open"),
                ("per_page", PAGE_SIZE_PARAM),
                ("page", page),
            ])
        })
        .await
    }

    async fn list_open_issues(&self, owner: &str, repo: &str) -> GithubResult<Vec<GithubIssue>> {
        let url = format!("{}/issues", self.repo_url(owner, repo));
        let issues: Vec<GithubIssue> = self
            .paginate("list issues", |page| {
                self.http.get(&url).query(&[
                    ("state", "open"),
                    ("per_page", PAGE_SIZE_PARAM),
                    ("page", page),
                ])
            })
            .await?;
        Ok(issues
            .into_iter()
            .filter(|issue| !issue.is_pull_request())
            .collect())
    }

    async fn repository_events(
        &self,
        owner: &str,
        repo: &str,
        page: u32,
    ) -> GithubResult<Vec<FeedEvent>> {
        let url = format!("{}/events", self.repo_url(owner, repo));
        let page_value = page.to_string();
        let raw: Vec<Value> = self
            .request_json("list repository events", || {
                self.http
                    .get(&url)
                    .query(&[("per_page", PAGE_SIZE_PARAM), ("page", page_value.as_str())])
            })
            .await?;
        Ok(raw.iter().filter_map(FeedEvent::from_repository_event).collect())
    }

    async fn issue_events(
        &self,
        owner: &str,
        repo: &str,
        page: u32,
    ) -> GithubResult<Vec<FeedEvent>> {
        let url = format!("{}/issues/events", self.repo_url(owner, repo));
        let page_value = page.to_string();
        let raw: Vec<Value> = self
            .request_json("list issue events", || {
                self.http
                    .get(&url)
                    .query(&[("per_page", PAGE_SIZE_PARAM), ("page", page_value.as_str())])
            })
            .await?;
        Ok(raw.iter().filter_map(FeedEvent::from_issue_event).collect())
    }

    async fn reviewers(&self, owner: &str, repo: &str, number: u64) -> GithubResult<Vec<String>> {
        let reviews_url = format!("{}/pulls/{number}/reviews", self.repo_url(owner, repo));
        let reviews: Vec<GithubReview> = self
            .paginate("list reviews", |page| {
                self.http
                    .get(&reviews_url)
                    .query(&[("per_page", PAGE_SIZE_PARAM), ("page", page)])
            })
            .await?;
        let requested_url = format!(
            "{}/pulls/{number}/requested_reviewers",
            self.repo_url(owner, repo)
        );
        let requested: RequestedReviewers = self
            .request_json("list requested reviewers", || self.http.get(&requested_url))
            .await?;

        let logins = reviews
            .into_iter()
            .filter_map(|review| review.user.map(|user| user.login))
            .chain(requested.users.into_iter().map(|user| user.login))
            .collect::<BTreeSet<String>>();
        Ok(logins.into_iter().collect())
    }

    async fn request_reviewers(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
        reviewers: &[String],
    ) -> GithubResult<()> {
        let url = format!(
            "{}/pulls/{number}/requested_reviewers",
            self.repo_url(owner, repo)
        );
        let payload = json!({ "reviewers": reviewers });
        let _: Value = self
            .request_json("request reviewers", || self.http.post(&url).json(&payload))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use httpmock::prelude::*;
    use serde_json::json;

    use super::{GithubApiClient, GithubClient};
    use crate::{GithubError, GithubSettings};

    fn client(server: &MockServer) -> GithubApiClient {
        let settings = GithubSettings {
            api_base: server.base_url(),
            token: "secret".to_string(),
            retry_max_attempts: 2,
            retry_base_delay_ms: 1,
            ..GithubSettings::default()
        };
        GithubApiClient::new(&settings).expect("client")
    }

    #[tokio::test]
    async fn rate_limited_request_is_retried() {
        let server = MockServer::start();
        let limited = server.mock(|when, then| {
            when.method(GET)
                .path("/repos/octo/hello")
                .header("x-nudgebot-retry-attempt", "0");
            then.status(429).header("retry-after", "0").body("slow down");
        });
        let ok = server.mock(|when, then| {
            when.method(GET)
                .path("/repos/octo/hello")
                .header("x-nudgebot-retry-attempt", "1")
                .header("authorization", "Bearer secret");
            then.status(200).json_body(json!({
                "name": "hello",
                "owner": {"login": "octo", "type": "Organization"},
                "forks_count": 4,
                "open_issues_count": 9
            }));
        });

        let repository = client(&server)
            .get_repository("octo", "hello")
            .await
            .expect("repository");
        assert_eq!(repository.name, "hello");
        assert_eq!(repository.forks_count, 4);
        limited.assert();
        ok.assert();
    }

    #[tokio::test]
    async fn missing_resource_maps_to_not_found() {
        let server = MockServer::start();
        let missing = server.mock(|when, then| {
            when.method(GET).path("/repos/octo/hello/pulls/5");
            then.status(404).json_body(json!({"message": "Not Found"}));
        });

        let error = client(&server)
            .get_pull_request("octo", "hello", 5)
            .await
            .expect_err("missing");
        assert!(matches!(error, GithubError::NotFound { .. }));
        missing.assert_calls(1);
    }

    #[tokio::test]
    async fn exhausted_server_errors_are_transient() {
        let server = MockServer::start();
        let failing = server.mock(|when, then| {
            when.method(GET).path("/repos/octo/hello/issues/2");
            then.status(503).body("maintenance");
        });

        let error = client(&server)
            .get_issue("octo", "hello", 2)
            .await
            .expect_err("unavailable");
        assert!(matches!(error, GithubError::Transient(_)));
        failing.assert_calls(2);
    }

    #[tokio::test]
    async fn open_issue_listing_drops_pull_requests() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET)
                .path("/repos/octo/hello/issues")
                .query_param("state", "open")
                .query_param("page", "1");
            then.status(200).json_body(json!([
                {"number": 1, "title": "bug", "state": "open", "user": {"login": "a"}},
                {"number": 2, "title": "pr", "state": "open", "user": {"login": "b"},
                 "pull_request": {"url": "x"}}
            ]));
        });

        let issues = client(&server)
            .list_open_issues("octo", "hello")
            .await
            .expect("issues");
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].number, 1);
    }

    #[tokio::test]
    async fn reviewers_merge_reviews_and_requests() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/repos/octo/hello/pulls/3/reviews");
            then.status(200).json_body(json!([
                {"user": {"login": "bob"}},
                {"user": {"login": "alice"}},
                {"user": null}
            ]));
        });
        server.mock(|when, then| {
            when.method(GET)
                .path("/repos/octo/hello/pulls/3/requested_reviewers");
            then.status(200)
                .json_body(json!({"users": [{"login": "bob"}, {"login": "carol"}], "teams": []}));
        });
        let request = server.mock(|when, then| {
            when.method(POST)
                .path("/repos/octo/hello/pulls/3/requested_reviewers")
                .json_body(json!({"reviewers": ["dave"]}));
            then.status(201).json_body(json!({"number": 3}));
        });

        let client = client(&server);
        let reviewers = client.reviewers("octo", "hello", 3).await.expect("reviewers");
        assert_eq!(reviewers, vec!["alice", "bob", "carol"]);
        client
            .request_reviewers("octo", "hello", 3, &["dave".to_string()])
            .await
            .expect("request");
        request.assert();
    }

    #[tokio::test]
    async fn feed_pages_are_normalized() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET)
                .path("/repos/octo/hello/events")
                .query_param("page", "2");
            then.status(200).json_body(json!([
                {"id": "11", "type": "IssueCommentEvent", "actor": {"login": "eve"},
                 "payload": {"issue": {"number": 4}}}
            ]));
        });

        let events = client(&server)
            .repository_events("octo", "hello", 2)
            .await
            .expect("events");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].actor, "eve");
    }
}
