//! Code-hosting endpoint: REST client, scopes, event feed classification,
//! built-in statistics, the reviewer assignment task, merge and mention
//! alerts and the pull request report.

use nudge_endpoint::{ScopeError, ScopeKind, ScopeQuery};
use thiserror::Error;

mod alerts;
mod client;
mod events;
mod memory;
mod models;
mod report;
mod scopes;
mod settings;
mod statistics;
mod tasks;
mod transport;

pub use alerts::{AlertOnMentionedUser, AlertOnMergedEvent};
pub use client::{GithubApiClient, GithubClient};
pub use events::{classify_feed_event, mentioned_users, GithubEventSource};
pub use memory::{InMemoryGithubClient, ReviewRequest};
pub use models::{FeedEvent, GithubIssue, GithubPullRequest, GithubRepository, GithubUser};
pub use report::{render_pull_request_report, PullRequestReport, ReportDelivery};
pub use scopes::{
    GithubEndpoint, GithubScopesCollector, IssueScope, OrganizationScope, PullRequestScope,
    RepositoryScope, UserScope, ISSUE, ORGANIZATION, PULL_REQUEST, REPOSITORY, USER,
};
pub use settings::{GithubRepositoryConfig, GithubSettings};
pub use statistics::{
    pretty_age, title_tags, IssueStatistics, PullRequestStatistics, RepositoryStatistics,
};
pub use tasks::AddReviewerOnRfr;

/// Key of the endpoint in the registry and in every event hash.
pub const GITHUB_ENDPOINT_KEY: &str = "github";

pub type GithubResult<T> = Result<T, GithubError>;

#[derive(Debug, Error)]
pub enum GithubError {
    #[error("github resource not found: {resource}")]
    NotFound { resource: String },
    #[error("github api temporarily unavailable: {0}")]
    Transient(String),
    #[error("github api {operation} failed with status {status}: {body}")]
    Api {
        operation: String,
        status: u16,
        body: String,
    },
    #[error("failed to decode github {operation}: {source}")]
    Decode {
        operation: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("invalid github client setup: {0}")]
    InvalidSetup(String),
}

impl GithubError {
    /// Maps a client failure while resolving a scope of `kind`.
    pub fn into_scope_error(self, kind: &ScopeKind, query: &ScopeQuery) -> ScopeError {
        match self {
            Self::NotFound { .. } => ScopeError::not_found(kind, query),
            Self::Transient(reason) => ScopeError::Transient(reason),
            other => ScopeError::Endpoint(anyhow::Error::new(other)),
        }
    }

    /// Converts a failure raised inside a statistic getter or task body. A
    /// transient failure becomes `ScopeError::Transient` so the bot aborts
    /// the cycle instead of counting a failed task.
    pub fn into_anyhow(self) -> anyhow::Error {
        match self {
            Self::Transient(reason) => ScopeError::Transient(reason).into(),
            other => other.into(),
        }
    }
}
