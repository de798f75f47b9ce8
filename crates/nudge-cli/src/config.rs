use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, ensure, Context, Result};
use nudge_bot::BotConfig;
use nudge_endpoint::EventsFactoryConfig;
use nudge_github::{GithubSettings, ReportDelivery};
use nudge_irc::IrcSettings;
use nudge_tasks::{Schedule, UserContact, UserDirectory};
use serde::{Deserialize, Serialize};

pub(crate) const CONFIG_FILE_NAME: &str = "nudgebot.toml";
pub(crate) const GITHUB_TOKEN_ENV: &str = "NUDGEBOT_GITHUB_TOKEN";

pub(crate) const CONFIG_TEMPLATE: &str = r##"# nudgebot configuration

[bot]
# SQLite file, relative to this file. Remove to keep state in memory only.
store_path = ".nudgebot/store.sqlite"
# Delivered event hashes remembered for de-duplication.
delivered_ledger_length = 1000
# Events buffered before new ones are rejected until the next check.
event_buffer_limit = 10000
handle_events_every_ms = 5000
poll_on_start = true
# Full poll interval; remove to poll only on start.
poll_every_ms = 600000

[github]
api_base = "https://api.github.com"
# Leave empty and export NUDGEBOT_GITHUB_TOKEN instead.
token = ""
# Bot account; its own activity never becomes an event.
username = "nudgebot"
events_check_every_ms = 10000
max_recent_check = 100
request_timeout_ms = 30000
retry_max_attempts = 3
retry_base_delay_ms = 500

[[github.repositories]]
organization = "octo"
name = "hello"
# Reviewers picked when a pull request title is tagged [RFR].
maintainers = ["alice", "bob"]

# Pull request digest. Cron fields: sec min hour day month weekday year.
[[periodic]]
name = "daily-report"
cron = "0 0 12 * * * *"
timezone = "UTC"
# chat_target = "#dev"
# email_receivers = ["team@example.com"]
# Also mail every maintainer listed under [[users]] with an email.
# email_maintainers = true

# Chat connection. Remove the section to run without chat.
# [irc]
# server = "irc.libera.chat"
# port = 6667
# nick = "nudgebot"
# channels = ["#dev"]

# Merge, mention and review announcements; needs [irc] to reach a channel.
[alerts]
# chat_target = "#dev"

# One entry per person: code host login, chat nick and email.
# [[users]]
# key = "alice"
# github_login = "alice"
# chat_nick = "ali"
# email = "alice@example.com"
"##;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub(crate) struct BotSection {
    pub(crate) store_path: Option<PathBuf>,
    pub(crate) delivered_ledger_length: usize,
    pub(crate) event_buffer_limit: usize,
    pub(crate) handle_events_every_ms: u64,
    pub(crate) poll_on_start: bool,
    pub(crate) poll_every_ms: Option<u64>,
}

impl Default for BotSection {
    fn default() -> Self {
        Self {
            store_path: None,
            delivered_ledger_length: 1_000,
            event_buffer_limit: 10_000,
            handle_events_every_ms: 5_000,
            poll_on_start: true,
            poll_every_ms: None,
        }
    }
}

fn default_timezone() -> String {
    "UTC".to_string()
}

/// One `[[periodic]]` report entry.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub(crate) struct PeriodicEntry {
    pub(crate) name: String,
    pub(crate) cron: String,
    #[serde(default = "default_timezone")]
    pub(crate) timezone: String,
    #[serde(default)]
    pub(crate) chat_target: Option<String>,
    #[serde(default)]
    pub(crate) email_receivers: Vec<String>,
    #[serde(default)]
    pub(crate) email_maintainers: bool,
}

impl PeriodicEntry {
    pub(crate) fn schedule(&self) -> Schedule {
        Schedule::new(self.cron.clone(), self.timezone.clone())
    }

    pub(crate) fn delivery(&self) -> ReportDelivery {
        ReportDelivery {
            chat_target: self.chat_target.clone(),
            email_receivers: self.email_receivers.clone(),
            email_maintainers: self.email_maintainers,
        }
    }
}

/// Chat announcements of merges, mentions and review requests.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub(crate) struct AlertsSection {
    pub(crate) chat_target: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub(crate) struct NudgebotConfig {
    pub(crate) bot: BotSection,
    pub(crate) github: GithubSettings,
    pub(crate) irc: Option<IrcSettings>,
    pub(crate) alerts: AlertsSection,
    pub(crate) users: Vec<UserContact>,
    pub(crate) periodic: Vec<PeriodicEntry>,
}

impl NudgebotConfig {
    /// Parses `text`, applies the token override and resolves a relative
    /// store path against `base_dir`. Does not validate.
    pub(crate) fn parse(text: &str, base_dir: &Path, token_override: Option<String>) -> Result<Self> {
        let mut config: Self = toml::from_str(text).context("failed to parse nudgebot config")?;
        if let Some(token) = token_override.filter(|token| !token.trim().is_empty()) {
            config.github.token = token;
        }
        if let Some(store_path) = config.bot.store_path.take() {
            config.bot.store_path = Some(if store_path.is_relative() {
                base_dir.join(store_path)
            } else {
                store_path
            });
        }
        Ok(config)
    }

    pub(crate) fn validate(&self) -> Result<()> {
        ensure!(
            !self.github.token.trim().is_empty(),
            "github token is empty; set [github].token or {GITHUB_TOKEN_ENV}"
        );
        ensure_positive("bot.delivered_ledger_length", self.bot.delivered_ledger_length as u64)?;
        ensure_positive("bot.event_buffer_limit", self.bot.event_buffer_limit as u64)?;
        ensure_positive("bot.handle_events_every_ms", self.bot.handle_events_every_ms)?;
        if let Some(poll_every_ms) = self.bot.poll_every_ms {
            ensure_positive("bot.poll_every_ms", poll_every_ms)?;
        }
        ensure_positive("github.events_check_every_ms", self.github.events_check_every_ms)?;
        ensure_positive("github.max_recent_check", self.github.max_recent_check as u64)?;
        ensure_positive("github.request_timeout_ms", self.github.request_timeout_ms)?;
        ensure_positive("github.retry_max_attempts", self.github.retry_max_attempts as u64)?;
        ensure!(
            !self.github.repositories.is_empty(),
            "no [[github.repositories]] configured"
        );

        if let Some(irc) = &self.irc {
            ensure!(!irc.server.trim().is_empty(), "irc.server cannot be empty");
            ensure!(!irc.nick.trim().is_empty(), "irc.nick cannot be empty");
            ensure_positive("irc.connect_timeout_ms", irc.connect_timeout_ms)?;
            ensure_positive("irc.read_wait_ms", irc.read_wait_ms)?;
        }
        if let Some(key) = self.user_directory().duplicate_key() {
            bail!("duplicate [[users]] key '{key}'");
        }

        let mut names = BTreeSet::new();
        for entry in &self.periodic {
            ensure!(!entry.name.trim().is_empty(), "periodic task name cannot be empty");
            if !names.insert(entry.name.as_str()) {
                bail!("duplicate periodic task '{}'", entry.name);
            }
            entry
                .schedule()
                .validate()
                .with_context(|| format!("invalid schedule for periodic task '{}'", entry.name))?;
        }
        Ok(())
    }

    pub(crate) fn user_directory(&self) -> UserDirectory {
        UserDirectory::new(self.users.clone())
    }

    /// Maintainers of every watched repository, first occurrence order.
    pub(crate) fn maintainers(&self) -> Vec<String> {
        let mut seen = BTreeSet::new();
        self.github
            .repositories
            .iter()
            .flat_map(|repository| repository.maintainers.iter())
            .filter(|login| seen.insert(login.as_str()))
            .cloned()
            .collect()
    }

    pub(crate) fn bot_config(&self) -> BotConfig {
        BotConfig {
            handle_events_every: Duration::from_millis(self.bot.handle_events_every_ms),
            poll_on_start: self.bot.poll_on_start,
            poll_every: self.bot.poll_every_ms.map(Duration::from_millis),
            events: EventsFactoryConfig {
                check_every: Duration::from_millis(self.github.events_check_every_ms),
                buffer_limit: self.bot.event_buffer_limit,
                delivered_ledger_length: Some(self.bot.delivered_ledger_length),
            },
        }
    }
}

fn ensure_positive(field: &str, value: u64) -> Result<()> {
    ensure!(value >= 1, "{field} must be greater than 0");
    Ok(())
}

/// Reads and parses the configuration at `path` without validating it.
pub(crate) fn read_config(path: &Path) -> Result<NudgebotConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
    NudgebotConfig::parse(&text, base_dir, std::env::var(GITHUB_TOKEN_ENV).ok())
        .with_context(|| format!("invalid config {}", path.display()))
}

pub(crate) fn load_config(path: &Path) -> Result<NudgebotConfig> {
    let config = read_config(path)?;
    config
        .validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(config)
}
