use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct GithubUser {
    pub login: String,
    #[serde(rename = "type", default)]
    pub account_type: Option<String>,
}

impl GithubUser {
    pub fn new(login: impl Into<String>) -> Self {
        Self {
            login: login.into(),
            account_type: None,
        }
    }

    /// True for personal accounts; organizations report `Organization`.
    pub fn is_personal(&self) -> bool {
        self.account_type.as_deref() == Some("User")
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct GithubRepository {
    pub name: String,
    pub owner: GithubUser,
    #[serde(default)]
    pub forks_count: u64,
    #[serde(default)]
    pub open_issues_count: u64,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct GithubPullRequest {
    pub number: u64,
    pub title: String,
    pub state: String,
    pub user: GithubUser,
    #[serde(default)]
    pub comments: u64,
    #[serde(default)]
    pub review_comments: u64,
    #[serde(default)]
    pub commits: u64,
    #[serde(default)]
    pub updated_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct GithubIssue {
    pub number: u64,
    pub title: String,
    pub state: String,
    pub user: GithubUser,
    #[serde(default)]
    pub assignee: Option<GithubUser>,
    #[serde(default)]
    pub comments: u64,
    #[serde(default)]
    pub pull_request: Option<Value>,
}

impl GithubIssue {
    /// The issues API lists pull requests too; they carry a `pull_request` link.
    pub fn is_pull_request(&self) -> bool {
        self.pull_request.is_some()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct GithubReview {
    pub(crate) user: Option<GithubUser>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct RequestedReviewers {
    #[serde(default)]
    pub(crate) users: Vec<GithubUser>,
}

/// One entry of a repository feed, normalized across the repository events
/// and issue events APIs.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedEvent {
    pub id: String,
    pub kind: String,
    pub actor: String,
    pub payload: Map<String, Value>,
}

impl FeedEvent {
    /// Entry of `GET /repos/{owner}/{repo}/events`.
    pub fn from_repository_event(raw: &Value) -> Option<Self> {
        let id = match raw.get("id")? {
            Value::String(id) => id.clone(),
            Value::Number(id) => id.to_string(),
            _ => return None,
        };
        Some(Self {
            id,
            kind: raw.get("type")?.as_str()?.to_string(),
            actor: actor_login(raw),
            payload: raw
                .get("payload")
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default(),
        })
    }

    /// Entry of `GET /repos/{owner}/{repo}/issues/events`. Ids are prefixed
    /// since both feeds number their entries independently.
    pub fn from_issue_event(raw: &Value) -> Option<Self> {
        let id = raw.get("id")?.as_u64()?;
        let action = raw.get("event").and_then(Value::as_str).unwrap_or("unknown");
        Some(Self {
            id: format!("issue-event-{id}"),
            kind: format!("IssuesEvent:{action}"),
            actor: actor_login(raw),
            payload: raw.as_object().cloned().unwrap_or_default(),
        })
    }
}

fn actor_login(raw: &Value) -> String {
    raw.get("actor")
        .and_then(|actor| actor.get("login"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}
