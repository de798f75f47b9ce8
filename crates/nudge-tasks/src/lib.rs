//! Task engine: conditional tasks with a persisted edge-triggered ledger,
//! cron-scheduled periodic tasks, the notification sinks tasks use and the
//! directory tasks use to address people.

use nudge_statistics::{is_transient_failure, StatisticsError};
use nudge_store::StoreError;
use thiserror::Error;

mod conditional;
mod notifier;
mod periodic;
mod users;

pub use conditional::{
    task_identity, ConditionalTask, ConditionalTaskRunner, SkipReason, TaskContext, TaskOutcome,
    TaskRecord, TaskState,
};
pub use notifier::{LogNotifier, MemoryNotifier, Notification, Notifier};
pub use periodic::{
    PeriodicContext, PeriodicScheduler, PeriodicTask, Schedule, SchedulerTick,
    DEFAULT_SCHEDULER_TICK_MS,
};
pub use users::{UserContact, UserDirectory};

pub type TaskResult<T> = Result<T, TaskError>;

#[derive(Debug, Error)]
pub enum TaskError {
    #[error("condition of task '{task}' failed: {source:#}")]
    Condition {
        task: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("artifacts of task '{task}' failed: {source:#}")]
    Artifacts {
        task: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("task '{task}' failed: {source:#}")]
    Run {
        task: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("invalid schedule for task '{task}': {source:#}")]
    Schedule {
        task: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("invalid persisted state for task '{task}': {reason}")]
    InvalidState { task: String, reason: String },
    #[error(transparent)]
    Statistics(#[from] StatisticsError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl TaskError {
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Condition { source, .. }
            | Self::Artifacts { source, .. }
            | Self::Run { source, .. } => is_transient_failure(&**source),
            Self::Statistics(error) => error.is_transient(),
            _ => false,
        }
    }
}

/// Collection name derived from a task name: lowercase words joined by `_`.
pub fn underscored(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    let mut previous_lower = false;
    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() {
            if ch.is_ascii_uppercase() && previous_lower {
                out.push('_');
            }
            previous_lower = ch.is_ascii_lowercase() || ch.is_ascii_digit();
            out.push(ch.to_ascii_lowercase());
        } else {
            if !out.is_empty() && !out.ends_with('_') {
                out.push('_');
            }
            previous_lower = false;
        }
    }
    out.trim_end_matches('_').to_string()
}
