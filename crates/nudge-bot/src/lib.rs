//! Orchestration: one slave per endpoint draining events and running full
//! polls, dispatching statistics collection and conditional tasks for every
//! resolved scope, plus the periodic scheduler.

use std::time::Duration;

use nudge_endpoint::{EventsError, EventsFactoryConfig, RegistryError, ScopeError};
use nudge_statistics::StatisticsError;
use nudge_store::StoreError;
use nudge_tasks::TaskError;
use thiserror::Error;

mod builder;
mod slave;

pub use builder::{Bot, BotBuilder};
pub use slave::BotSlave;

pub type BotResult<T> = Result<T, BotError>;

#[derive(Debug, Error)]
pub enum BotError {
    #[error("background loop of '{endpoint}' died: {reason}")]
    ThreadDeath { endpoint: String, reason: String },
    #[error("invalid bot setup: {0}")]
    InvalidSetup(String),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Events(#[from] EventsError),
    #[error(transparent)]
    Scope(#[from] ScopeError),
    #[error(transparent)]
    Statistics(#[from] StatisticsError),
    #[error(transparent)]
    Task(#[from] TaskError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl BotError {
    /// Transient endpoint failures abort the current cycle; the next poll or
    /// drain retries.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Scope(error) => error.is_transient(),
            Self::Statistics(error) => error.is_transient(),
            Self::Task(error) => error.is_transient(),
            _ => false,
        }
    }
}

const DEFAULT_HANDLE_EVENTS_EVERY_MS: u64 = 5_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BotConfig {
    pub handle_events_every: Duration,
    pub poll_on_start: bool,
    /// Interval of repeated full polls; `None` polls only on start.
    pub poll_every: Option<Duration>,
    pub events: EventsFactoryConfig,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            handle_events_every: Duration::from_millis(DEFAULT_HANDLE_EVENTS_EVERY_MS),
            poll_on_start: true,
            poll_every: None,
            events: EventsFactoryConfig::default(),
        }
    }
}

/// Counters of one poll or drain cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub scopes: usize,
    pub events: usize,
    pub failed_events: usize,
    pub failed_scopes: usize,
    pub statistics_collected: usize,
    pub tasks_ran: usize,
    pub tasks_skipped: usize,
    pub tasks_failed: usize,
    /// The cycle stopped early on a transient endpoint failure.
    pub aborted: bool,
}

impl DispatchReport {
    pub fn merge(&mut self, other: &DispatchReport) {
        self.scopes += other.scopes;
        self.events += other.events;
        self.failed_events += other.failed_events;
        self.failed_scopes += other.failed_scopes;
        self.statistics_collected += other.statistics_collected;
        self.tasks_ran += other.tasks_ran;
        self.tasks_skipped += other.tasks_skipped;
        self.tasks_failed += other.tasks_failed;
        self.aborted |= other.aborted;
    }
}
