use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use nudge_store::Document;
use nudge_tasks::{PeriodicContext, PeriodicTask, Schedule, UserDirectory};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use crate::{pretty_age, PullRequestStatistics};

/// Where a rendered report goes. With no target it is only logged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct ReportDelivery {
    #[serde(default)]
    pub chat_target: Option<String>,
    #[serde(default)]
    pub email_receivers: Vec<String>,
    /// Also mail every maintainer with a known address.
    #[serde(default)]
    pub email_maintainers: bool,
}

/// Periodic digest of the open pull requests found in the persisted
/// `github_pull_request` statistics.
pub struct PullRequestReport {
    name: String,
    schedule: Schedule,
    delivery: ReportDelivery,
    users: Arc<UserDirectory>,
    maintainers: Vec<String>,
}

impl PullRequestReport {
    pub fn new(name: impl Into<String>, schedule: Schedule, delivery: ReportDelivery) -> Self {
        Self {
            name: name.into(),
            schedule,
            delivery,
            users: Arc::default(),
            maintainers: Vec::new(),
        }
    }

    /// Directory used to resolve maintainer logins to email addresses.
    pub fn with_users(mut self, users: Arc<UserDirectory>, maintainers: Vec<String>) -> Self {
        self.users = users;
        self.maintainers = maintainers;
        self
    }

    /// Explicit receivers first, then maintainer addresses, without repeats.
    fn email_receivers(&self) -> Vec<String> {
        let mut receivers = self.delivery.email_receivers.clone();
        if self.delivery.email_maintainers {
            for email in self
                .users
                .emails_of(self.maintainers.iter().map(String::as_str))
            {
                if !receivers.contains(&email) {
                    receivers.push(email);
                }
            }
        }
        receivers
    }
}

fn text(document: &Document, key: &str) -> String {
    match document.get(key) {
        Some(Value::String(value)) => value.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

fn is_open(document: &Document) -> bool {
    document
        .get("state")
        .and_then(Value::as_str)
        .map_or(true, |state| state == "open")
}

fn report_line(document: &Document, now: DateTime<Utc>) -> String {
    let mut line = format!(
        "{}/{} #{} {}",
        text(document, "organization"),
        text(document, "repository"),
        text(document, "number"),
        text(document, "title"),
    );
    let owner = text(document, "owner");
    if !owner.is_empty() {
        line.push_str(&format!(" by {owner}"));
    }
    let reviewers = document
        .get("reviewers")
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(Value::as_str).collect::<Vec<_>>())
        .unwrap_or_default();
    if reviewers.is_empty() {
        line.push_str(", no reviewers");
    } else {
        line.push_str(&format!(", reviewers: {}", reviewers.join(", ")));
    }
    if let Some(age) = document
        .get("last_update")
        .and_then(Value::as_str)
        .and_then(|timestamp| pretty_age(timestamp, now))
    {
        line.push_str(&format!(", updated {age}"));
    }
    line
}

/// Plain-text report, one line per open pull request ordered by repository
/// and number.
pub fn render_pull_request_report(documents: &[Document], now: DateTime<Utc>) -> String {
    let mut open = documents
        .iter()
        .filter(|document| is_open(document))
        .collect::<Vec<_>>();
    open.sort_by_key(|document| {
        (
            text(document, "organization"),
            text(document, "repository"),
            document.get("number").and_then(Value::as_u64).unwrap_or(0),
        )
    });
    if open.is_empty() {
        return "No open pull requests".to_string();
    }
    let mut lines = vec![format!("Open pull requests ({})", open.len())];
    lines.extend(open.into_iter().map(|document| report_line(document, now)));
    lines.join("\n")
}

#[async_trait]
impl PeriodicTask for PullRequestReport {
    fn name(&self) -> &str {
        &self.name
    }

    fn schedule(&self) -> Schedule {
        self.schedule.clone()
    }

    async fn run(&self, ctx: &PeriodicContext) -> Result<()> {
        let snapshot = ctx.all_statistics().await?;
        let report = render_pull_request_report(
            snapshot.collection(PullRequestStatistics::KEY),
            Utc::now(),
        );
        if let Some(target) = &self.delivery.chat_target {
            ctx.notifier().send_chat(target, &report).await?;
        }
        let receivers = self.email_receivers();
        if !receivers.is_empty() {
            ctx.notifier()
                .send_email(&receivers, &self.name, &report)
                .await?;
        }
        info!(task = %self.name, text = %report, "pull request report");
        Ok(())
    }
}
