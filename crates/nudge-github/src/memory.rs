use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;

use crate::{
    FeedEvent, GithubClient, GithubError, GithubIssue, GithubPullRequest, GithubRepository,
    GithubResult, GithubUser,
};

const FEED_PAGE_SIZE: usize = 30;

/// A review request as received by [`InMemoryGithubClient`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReviewRequest {
    pub organization: String,
    pub repository: String,
    pub number: u64,
    pub reviewers: Vec<String>,
}

#[derive(Debug, Default)]
struct RepositoryEntry {
    repository: Option<GithubRepository>,
    pull_requests: BTreeMap<u64, (GithubPullRequest, Vec<String>)>,
    issues: BTreeMap<u64, GithubIssue>,
    repository_events: Vec<FeedEvent>,
    issue_events: Vec<FeedEvent>,
}

#[derive(Debug, Default)]
struct State {
    repositories: BTreeMap<(String, String), RepositoryEntry>,
    review_requests: Vec<ReviewRequest>,
}

/// Process-local [`GithubClient`] for dry runs and tests. Feeds are kept
/// newest first like the real API.
#[derive(Debug, Default)]
pub struct InMemoryGithubClient {
    state: Mutex<State>,
}

impl InMemoryGithubClient {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<T>(&self, apply: impl FnOnce(&mut State) -> T) -> T {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        apply(&mut state)
    }

    fn entry<'a>(state: &'a mut State, owner: &str, repo: &str) -> &'a mut RepositoryEntry {
        state
            .repositories
            .entry((owner.to_string(), repo.to_string()))
            .or_default()
    }

    pub fn add_repository(&self, owner: &str, repo: &str, personal: bool) {
        self.with_state(|state| {
            Self::entry(state, owner, repo).repository = Some(GithubRepository {
                name: repo.to_string(),
                owner: GithubUser {
                    login: owner.to_string(),
                    account_type: Some(if personal { "User" } else { "Organization" }.to_string()),
                },
                forks_count: 0,
                open_issues_count: 0,
            });
        });
    }

    pub fn add_pull_request(&self, owner: &str, repo: &str, number: u64, title: &str, author: &str) {
        self.with_state(|state| {
            let pull_request = GithubPullRequest {
                number,
                title: title.to_string(),
                state: "open".to_string(),
                user: GithubUser::new(author),
                comments: 0,
                review_comments: 0,
                commits: 1,
                updated_at: None,
            };
            Self::entry(state, owner, repo)
                .pull_requests
                .insert(number, (pull_request, Vec::new()));
        });
    }

    pub fn add_issue(&self, owner: &str, repo: &str, number: u64, title: &str, author: &str) {
        self.with_state(|state| {
            let issue = GithubIssue {
                number,
                title: title.to_string(),
                state: "open".to_string(),
                user: GithubUser::new(author),
                assignee: None,
                comments: 0,
                pull_request: None,
            };
            Self::entry(state, owner, repo).issues.insert(number, issue);
        });
    }

    /// Renames a pull request; returns `false` when it does not exist.
    pub fn set_pull_request_title(&self, owner: &str, repo: &str, number: u64, title: &str) -> bool {
        self.with_state(|state| {
            match Self::entry(state, owner, repo).pull_requests.get_mut(&number) {
                Some((pull_request, _)) => {
                    pull_request.title = title.to_string();
                    true
                }
                None => false,
            }
        })
    }

    /// Prepends a repository feed entry, making it the newest.
    pub fn push_repository_event(&self, owner: &str, repo: &str, event: FeedEvent) {
        self.with_state(|state| {
            Self::entry(state, owner, repo)
                .repository_events
                .insert(0, event);
        });
    }

    pub fn push_issue_event(&self, owner: &str, repo: &str, event: FeedEvent) {
        self.with_state(|state| {
            Self::entry(state, owner, repo).issue_events.insert(0, event);
        });
    }

    pub fn review_requests(&self) -> Vec<ReviewRequest> {
        self.with_state(|state| state.review_requests.clone())
    }

    fn repository_entry<T>(
        &self,
        owner: &str,
        repo: &str,
        read: impl FnOnce(&RepositoryEntry) -> GithubResult<T>,
    ) -> GithubResult<T> {
        self.with_state(|state| {
            let entry = state
                .repositories
                .get(&(owner.to_string(), repo.to_string()))
                .filter(|entry| entry.repository.is_some())
                .ok_or_else(|| not_found(format!("repository {owner}/{repo}")))?;
            read(entry)
        })
    }
}

fn not_found(resource: String) -> GithubError {
    GithubError::NotFound { resource }
}

fn feed_page(feed: &[FeedEvent], page: u32) -> Vec<FeedEvent> {
    let start = (page.max(1) as usize - 1).saturating_mul(FEED_PAGE_SIZE);
    feed.iter().skip(start).take(FEED_PAGE_SIZE).cloned().collect()
}

#[async_trait]
impl GithubClient for InMemoryGithubClient {
    async fn get_repository(&self, owner: &str, repo: &str) -> GithubResult<GithubRepository> {
        self.repository_entry(owner, repo, |entry| {
            entry
                .repository
                .clone()
                .ok_or_else(|| not_found(format!("repository {owner}/{repo}")))
        })
    }

    async fn get_pull_request(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
    ) -> GithubResult<GithubPullRequest> {
        self.repository_entry(owner, repo, |entry| {
            entry
                .pull_requests
                .get(&number)
                .map(|(pull_request, _)| pull_request.clone())
                .ok_or_else(|| not_found(format!("pull request {owner}/{repo}#{number}")))
        })
    }

    async fn get_issue(&self, owner: &str, repo: &str, number: u64) -> GithubResult<GithubIssue> {
        self.repository_entry(owner, repo, |entry| {
            if let Some(issue) = entry.issues.get(&number) {
                return Ok(issue.clone());
            }
            // The issues API also answers for pull request numbers.
            entry
                .pull_requests
                .get(&number)
                .map(|(pull_request, _)| GithubIssue {
                    number,
                    title: pull_request.title.clone(),
                    state: pull_request.state.clone(),
                    user: pull_request.user.clone(),
                    assignee: None,
                    comments: pull_request.comments,
                    pull_request: Some(serde_json::Value::Bool(true)),
                })
                .ok_or_else(|| not_found(format!("issue {owner}/{repo}#{number}")))
        })
    }

    async fn list_open_pull_requests(
        &self,
        owner: &str,
        repo: &str,
    ) -> GithubResult<Vec<GithubPullRequest>> {
        self.repository_entry(owner, repo, |entry| {
            Ok(entry
                .pull_requests
                .values()
                .filter(|(pull_request, _)| pull_request.state == "open")
                .map(|(pull_request, _)| pull_request.clone())
                .collect())
        })
    }

    async fn list_open_issues(&self, owner: &str, repo: &str) -> GithubResult<Vec<GithubIssue>> {
        self.repository_entry(owner, repo, |entry| {
            Ok(entry
                .issues
                .values()
                .filter(|issue| issue.state == "open")
                .cloned()
                .collect())
        })
    }

    async fn repository_events(
        &self,
        owner: &str,
        repo: &str,
        page: u32,
    ) -> GithubResult<Vec<FeedEvent>> {
        self.repository_entry(owner, repo, |entry| {
            Ok(feed_page(&entry.repository_events, page))
        })
    }

    async fn issue_events(
        &self,
        owner: &str,
        repo: &str,
        page: u32,
    ) -> GithubResult<Vec<FeedEvent>> {
        self.repository_entry(owner, repo, |entry| Ok(feed_page(&entry.issue_events, page)))
    }

    async fn reviewers(&self, owner: &str, repo: &str, number: u64) -> GithubResult<Vec<String>> {
        self.repository_entry(owner, repo, |entry| {
            entry
                .pull_requests
                .get(&number)
                .map(|(_, reviewers)| reviewers.clone())
                .ok_or_else(|| not_found(format!("pull request {owner}/{repo}#{number}")))
        })
    }

    async fn request_reviewers(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
        reviewers: &[String],
    ) -> GithubResult<()> {
        self.with_state(|state| {
            let entry = Self::entry(state, owner, repo);
            let (_, requested) = entry
                .pull_requests
                .get_mut(&number)
                .ok_or_else(|| not_found(format!("pull request {owner}/{repo}#{number}")))?;
            for reviewer in reviewers {
                if !requested.contains(reviewer) {
                    requested.push(reviewer.clone());
                }
            }
            requested.sort();
            state.review_requests.push(ReviewRequest {
                organization: owner.to_string(),
                repository: repo.to_string(),
                number,
                reviewers: reviewers.to_vec(),
            });
            Ok(())
        })
    }
}
