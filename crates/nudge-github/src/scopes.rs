use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;
use nudge_endpoint::{
    Endpoint, EndpointScope, ScopeError, ScopeKind, ScopeQuery, ScopeResult, ScopesCollector,
};
use tracing::debug;

use crate::{
    GithubClient, GithubIssue, GithubPullRequest, GithubRepository, GithubRepositoryConfig,
    GITHUB_ENDPOINT_KEY,
};

pub static ORGANIZATION: ScopeKind =
    ScopeKind::new(GITHUB_ENDPOINT_KEY, "organization", &["organization"], &[]);

/// Personal account owning repositories; keyed like an organization.
pub static USER: ScopeKind = ScopeKind::new(GITHUB_ENDPOINT_KEY, "user", &["organization"], &[]);

pub static REPOSITORY: ScopeKind = ScopeKind::new(
    GITHUB_ENDPOINT_KEY,
    "repository",
    &["organization", "repository"],
    &[&ORGANIZATION, &USER],
);

pub static PULL_REQUEST: ScopeKind = ScopeKind::new(
    GITHUB_ENDPOINT_KEY,
    "pull_request",
    &["organization", "repository", "number"],
    &[&REPOSITORY],
);

pub static ISSUE: ScopeKind = ScopeKind::new(
    GITHUB_ENDPOINT_KEY,
    "issue",
    &["organization", "repository", "number"],
    &[&REPOSITORY],
);

#[derive(Debug, Clone)]
pub struct OrganizationScope {
    pub organization: String,
}

impl EndpointScope for OrganizationScope {
    fn kind(&self) -> &'static ScopeKind {
        &ORGANIZATION
    }

    fn query(&self) -> ScopeQuery {
        ScopeQuery::new().with("organization", self.organization.as_str())
    }

    fn parent(&self) -> Option<Arc<dyn EndpointScope>> {
        None
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Debug, Clone)]
pub struct UserScope {
    pub login: String,
}

impl EndpointScope for UserScope {
    fn kind(&self) -> &'static ScopeKind {
        &USER
    }

    fn query(&self) -> ScopeQuery {
        ScopeQuery::new().with("organization", self.login.as_str())
    }

    fn parent(&self) -> Option<Arc<dyn EndpointScope>> {
        None
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// A repository; its parent is the owning organization or personal account.
#[derive(Debug, Clone)]
pub struct RepositoryScope {
    pub organization: String,
    pub repository: GithubRepository,
}

impl RepositoryScope {
    pub fn name(&self) -> &str {
        &self.repository.name
    }
}

impl EndpointScope for RepositoryScope {
    fn kind(&self) -> &'static ScopeKind {
        &REPOSITORY
    }

    fn query(&self) -> ScopeQuery {
        ScopeQuery::new()
            .with("organization", self.organization.as_str())
            .with("repository", self.repository.name.as_str())
    }

    fn parent(&self) -> Option<Arc<dyn EndpointScope>> {
        if self.repository.owner.is_personal() {
            Some(Arc::new(UserScope {
                login: self.organization.clone(),
            }))
        } else {
            Some(Arc::new(OrganizationScope {
                organization: self.organization.clone(),
            }))
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Debug, Clone)]
pub struct PullRequestScope {
    pub repository: Arc<RepositoryScope>,
    pub pull_request: GithubPullRequest,
}

impl PullRequestScope {
    pub fn number(&self) -> u64 {
        self.pull_request.number
    }
}

impl EndpointScope for PullRequestScope {
    fn kind(&self) -> &'static ScopeKind {
        &PULL_REQUEST
    }

    fn query(&self) -> ScopeQuery {
        self.repository
            .query()
            .with("number", self.pull_request.number)
    }

    fn parent(&self) -> Option<Arc<dyn EndpointScope>> {
        Some(self.repository.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Debug, Clone)]
pub struct IssueScope {
    pub repository: Arc<RepositoryScope>,
    pub issue: GithubIssue,
}

impl EndpointScope for IssueScope {
    fn kind(&self) -> &'static ScopeKind {
        &ISSUE
    }

    fn query(&self) -> ScopeQuery {
        self.repository.query().with("number", self.issue.number)
    }

    fn parent(&self) -> Option<Arc<dyn EndpointScope>> {
        Some(self.repository.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// The code-hosting endpoint, resolving scopes through a [`GithubClient`].
#[derive(Clone)]
pub struct GithubEndpoint {
    client: Arc<dyn GithubClient>,
}

impl std::fmt::Debug for GithubEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GithubEndpoint").finish_non_exhaustive()
    }
}

impl GithubEndpoint {
    pub fn new(client: Arc<dyn GithubClient>) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &Arc<dyn GithubClient> {
        &self.client
    }

    async fn repository(
        &self,
        kind: &'static ScopeKind,
        query: &ScopeQuery,
    ) -> ScopeResult<Arc<RepositoryScope>> {
        let organization = query.require_str(kind, "organization")?;
        let name = query.require_str(kind, "repository")?;
        let repository = self
            .client
            .get_repository(organization, name)
            .await
            .map_err(|error| error.into_scope_error(kind, query))?;
        Ok(Arc::new(RepositoryScope {
            organization: organization.to_string(),
            repository,
        }))
    }
}

#[async_trait]
impl Endpoint for GithubEndpoint {
    fn key(&self) -> &str {
        GITHUB_ENDPOINT_KEY
    }

    fn scope_kinds(&self) -> Vec<&'static ScopeKind> {
        vec![&ORGANIZATION, &USER, &REPOSITORY, &PULL_REQUEST, &ISSUE]
    }

    async fn init_by_keys(
        &self,
        kind: &'static ScopeKind,
        query: &ScopeQuery,
    ) -> ScopeResult<Arc<dyn EndpointScope>> {
        if kind == &ORGANIZATION {
            return Ok(Arc::new(OrganizationScope {
                organization: query.require_str(kind, "organization")?.to_string(),
            }));
        }
        if kind == &USER {
            return Ok(Arc::new(UserScope {
                login: query.require_str(kind, "organization")?.to_string(),
            }));
        }
        if kind == &REPOSITORY {
            let repository: Arc<dyn EndpointScope> = self.repository(kind, query).await?;
            return Ok(repository);
        }
        if kind == &PULL_REQUEST {
            let number = query.require_u64(kind, "number")?;
            let repository = self.repository(kind, query).await?;
            let pull_request = self
                .client
                .get_pull_request(&repository.organization, repository.name(), number)
                .await
                .map_err(|error| error.into_scope_error(kind, query))?;
            return Ok(Arc::new(PullRequestScope {
                repository,
                pull_request,
            }));
        }
        if kind == &ISSUE {
            let number = query.require_u64(kind, "number")?;
            let repository = self.repository(kind, query).await?;
            let issue = self
                .client
                .get_issue(&repository.organization, repository.name(), number)
                .await
                .map_err(|error| error.into_scope_error(kind, query))?;
            if issue.is_pull_request() {
                return Err(ScopeError::not_found(kind, query));
            }
            return Ok(Arc::new(IssueScope { repository, issue }));
        }
        Err(ScopeError::UnsupportedKind {
            endpoint: GITHUB_ENDPOINT_KEY.to_string(),
            kind: kind.to_string(),
        })
    }
}

/// Enumerates the configured repositories with their open pull requests and
/// open issues.
pub struct GithubScopesCollector {
    client: Arc<dyn GithubClient>,
    repositories: Vec<GithubRepositoryConfig>,
}

impl GithubScopesCollector {
    pub fn new(client: Arc<dyn GithubClient>, repositories: Vec<GithubRepositoryConfig>) -> Self {
        Self {
            client,
            repositories,
        }
    }
}

#[async_trait]
impl ScopesCollector for GithubScopesCollector {
    async fn collect_all(&self) -> ScopeResult<Vec<Arc<dyn EndpointScope>>> {
        let mut scopes: Vec<Arc<dyn EndpointScope>> = Vec::new();
        for config in &self.repositories {
            let query = ScopeQuery::new()
                .with("organization", config.organization.as_str())
                .with("repository", config.name.as_str());
            let to_scope_error = |error: crate::GithubError| error.into_scope_error(&REPOSITORY, &query);
            let repository = Arc::new(RepositoryScope {
                organization: config.organization.clone(),
                repository: self
                    .client
                    .get_repository(&config.organization, &config.name)
                    .await
                    .map_err(to_scope_error)?,
            });
            let pull_requests = self
                .client
                .list_open_pull_requests(&config.organization, &config.name)
                .await
                .map_err(to_scope_error)?;
            let issues = self
                .client
                .list_open_issues(&config.organization, &config.name)
                .await
                .map_err(to_scope_error)?;
            debug!(
                organization = %config.organization,
                repository = %config.name,
                pull_requests = pull_requests.len(),
                issues = issues.len(),
                "repository scopes collected"
            );

            scopes.push(repository.clone());
            for pull_request in pull_requests {
                scopes.push(Arc::new(PullRequestScope {
                    repository: Arc::clone(&repository),
                    pull_request,
                }));
            }
            for issue in issues.into_iter().filter(|issue| !issue.is_pull_request()) {
                scopes.push(Arc::new(IssueScope {
                    repository: Arc::clone(&repository),
                    issue,
                }));
            }
        }
        Ok(scopes)
    }
}
