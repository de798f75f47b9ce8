use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use nudge_endpoint::ScopeKind;
use nudge_tasks::{ConditionalTask, TaskContext, UserDirectory};
use serde_json::Value;
use tracing::info;

use crate::{
    GithubClient, GithubError, GithubSettings, PullRequestScope, PullRequestStatistics, PULL_REQUEST,
};

const READY_FOR_REVIEW_TAG: &str = "RFR";

fn string_list(value: &Value) -> Vec<String> {
    value
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(ToOwned::to_owned)
                .collect()
        })
        .unwrap_or_default()
}

struct Announcement {
    chat_target: String,
    users: Arc<UserDirectory>,
}

/// Requests a maintainer's review once a pull request title carries `[RFR]`
/// and nobody reviews it yet. Retagging the title re-arms the task.
pub struct AddReviewerOnRfr {
    client: Arc<dyn GithubClient>,
    settings: GithubSettings,
    announcement: Option<Announcement>,
}

impl AddReviewerOnRfr {
    pub const NAME: &'static str = "AddReviewerOnRfr";

    pub fn new(client: Arc<dyn GithubClient>, settings: GithubSettings) -> Self {
        Self {
            client,
            settings,
            announcement: None,
        }
    }

    /// Also tells the reviewer in `chat_target`, addressing people by their
    /// chat nick when `users` knows it.
    pub fn with_announcement(
        mut self,
        chat_target: impl Into<String>,
        users: Arc<UserDirectory>,
    ) -> Self {
        self.announcement = Some(Announcement {
            chat_target: chat_target.into(),
            users,
        });
        self
    }

    /// A maintainer other than the author, spread over pull request numbers.
    fn pick_reviewer(&self, scope: &PullRequestScope) -> Option<String> {
        let repository = &scope.repository;
        let config = self
            .settings
            .repository(&repository.organization, repository.name())?;
        let candidates = config
            .maintainers
            .iter()
            .filter(|login| **login != scope.pull_request.user.login)
            .collect::<Vec<_>>();
        if candidates.is_empty() {
            return None;
        }
        let index = (scope.number() % candidates.len() as u64) as usize;
        candidates.get(index).map(|login| (*login).clone())
    }
}

#[async_trait]
impl ConditionalTask for AddReviewerOnRfr {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn scope_kind(&self) -> &'static ScopeKind {
        &PULL_REQUEST
    }

    async fn condition(&self, ctx: &TaskContext) -> Result<bool> {
        let statistics = ctx.statistics();
        let tags = string_list(
            &statistics
                .statistic(PullRequestStatistics::KEY, "title_tags")
                .await?,
        );
        if !tags.iter().any(|tag| tag == READY_FOR_REVIEW_TAG) {
            return Ok(false);
        }
        let reviewers = string_list(
            &statistics
                .statistic(PullRequestStatistics::KEY, "reviewers")
                .await?,
        );
        Ok(reviewers.is_empty())
    }

    async fn artifacts(&self, ctx: &TaskContext) -> Result<Vec<String>> {
        Ok(string_list(
            &ctx.statistics()
                .statistic(PullRequestStatistics::KEY, "title_tags")
                .await?,
        ))
    }

    async fn run(&self, ctx: &TaskContext) -> Result<()> {
        let scope = ctx
            .scope_of::<PullRequestScope>()
            .ok_or_else(|| anyhow!("task context carries no pull request"))?;
        let reviewer = self.pick_reviewer(scope).ok_or_else(|| {
            anyhow!(
                "no maintainer available to review {}/{}#{}",
                scope.repository.organization,
                scope.repository.name(),
                scope.number()
            )
        })?;
        self.client
            .request_reviewers(
                &scope.repository.organization,
                scope.repository.name(),
                scope.number(),
                std::slice::from_ref(&reviewer),
            )
            .await
            .map_err(GithubError::into_anyhow)?;
        info!(
            organization = %scope.repository.organization,
            repository = %scope.repository.name(),
            number = scope.number(),
            reviewer = %reviewer,
            "reviewer requested"
        );
        if let Some(announcement) = &self.announcement {
            let users = &announcement.users;
            let message = format!(
                "{}, {} asks for your review on {}/{}#{}",
                users.chat_name(&reviewer),
                users.chat_name(&scope.pull_request.user.login),
                scope.repository.organization,
                scope.repository.name(),
                scope.number()
            );
            ctx.notifier()
                .send_chat(&announcement.chat_target, &message)
                .await?;
        }
        Ok(())
    }
}
