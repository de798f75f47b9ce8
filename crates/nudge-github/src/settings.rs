use serde::{Deserialize, Serialize};

/// A watched repository and the people allowed to review it.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct GithubRepositoryConfig {
    pub organization: String,
    pub name: String,
    #[serde(default)]
    pub maintainers: Vec<String>,
}

impl GithubRepositoryConfig {
    pub fn new(organization: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            organization: organization.into(),
            name: name.into(),
            maintainers: Vec::new(),
        }
    }

    pub fn with_maintainers(mut self, maintainers: &[&str]) -> Self {
        self.maintainers = maintainers.iter().map(|login| login.to_string()).collect();
        self
    }

    pub fn matches(&self, organization: &str, name: &str) -> bool {
        self.organization == organization && self.name == name
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct GithubSettings {
    pub api_base: String,
    pub token: String,
    /// Login of the bot account; its own feed entries are never events.
    pub username: String,
    pub events_check_every_ms: u64,
    /// Upper bound of feed entries inspected per repository and check.
    pub max_recent_check: usize,
    pub request_timeout_ms: u64,
    pub retry_max_attempts: usize,
    pub retry_base_delay_ms: u64,
    pub repositories: Vec<GithubRepositoryConfig>,
}

impl Default for GithubSettings {
    fn default() -> Self {
        Self {
            api_base: "https://api.github.com".to_string(),
            token: String::new(),
            username: "nudgebot".to_string(),
            events_check_every_ms: 10_000,
            max_recent_check: 100,
            request_timeout_ms: 30_000,
            retry_max_attempts: 3,
            retry_base_delay_ms: 500,
            repositories: Vec::new(),
        }
    }
}

impl GithubSettings {
    pub fn repository(&self, organization: &str, name: &str) -> Option<&GithubRepositoryConfig> {
        self.repositories
            .iter()
            .find(|repository| repository.matches(organization, name))
    }
}
