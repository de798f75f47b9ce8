//! Cron-scheduled periodic tasks and the scheduler that fires them.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::TimeZone;
use chrono_tz::Tz;
use nudge_core::current_unix_timestamp_ms;
use nudge_statistics::StatisticsSnapshot;
use nudge_store::{CollectionRef, Document, DocumentStore, StoreError};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::OnceCell;
use tracing::{debug, error, info};

use crate::{Notifier, TaskError, TaskResult};

pub const DEFAULT_SCHEDULER_TICK_MS: u64 = 1_000;
const SCHEDULER_COLLECTION: &str = "scheduler";
const FIRST_TICK_LOOKBACK_MS: u64 = 60_000;

/// Cron expression (seconds resolution) evaluated in an IANA timezone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    pub cron: String,
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

fn default_timezone() -> String {
    "UTC".to_string()
}

impl Schedule {
    pub fn new(cron: impl Into<String>, timezone: impl Into<String>) -> Self {
        Self {
            cron: cron.into(),
            timezone: timezone.into(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        let now = current_unix_timestamp_ms();
        self.next_due_unix_ms(now).map(|_| ())
    }

    /// First occurrence strictly after `from_unix_ms`.
    pub fn next_due_unix_ms(&self, from_unix_ms: u64) -> Result<u64> {
        let schedule = cron::Schedule::from_str(&self.cron)
            .with_context(|| format!("invalid cron expression '{}'", self.cron))?;
        let tz: Tz = self
            .timezone
            .parse()
            .map_err(|_| anyhow!("invalid timezone '{}'", self.timezone))?;
        let from = tz
            .timestamp_millis_opt(i64::try_from(from_unix_ms).unwrap_or(i64::MAX))
            .single()
            .ok_or_else(|| anyhow!("invalid from timestamp for periodic schedule"))?;
        let next = schedule
            .after(&from)
            .next()
            .ok_or_else(|| anyhow!("cron expression '{}' has no future occurrence", self.cron))?;
        Ok(u64::try_from(next.timestamp_millis()).unwrap_or(u64::MAX))
    }
}

/// Inputs available to a periodic task run.
pub struct PeriodicContext {
    store: Arc<dyn DocumentStore>,
    notifier: Arc<dyn Notifier>,
    snapshot: OnceCell<StatisticsSnapshot>,
}

impl PeriodicContext {
    pub fn new(store: Arc<dyn DocumentStore>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            store,
            notifier,
            snapshot: OnceCell::new(),
        }
    }

    pub fn notifier(&self) -> &dyn Notifier {
        self.notifier.as_ref()
    }

    /// Every persisted statistics document, loaded once per run.
    pub async fn all_statistics(&self) -> TaskResult<&StatisticsSnapshot> {
        let store = Arc::clone(&self.store);
        Ok(self
            .snapshot
            .get_or_try_init(|| async move { StatisticsSnapshot::load(store.as_ref()).await })
            .await?)
    }
}

/// A task fired on every tick of its schedule, without condition tracking.
#[async_trait]
pub trait PeriodicTask: Send + Sync {
    fn name(&self) -> &str;

    fn schedule(&self) -> Schedule;

    async fn run(&self, ctx: &PeriodicContext) -> anyhow::Result<()>;

    async fn handle(&self, ctx: &PeriodicContext) -> TaskResult<()> {
        info!(task = self.name(), "running periodic task");
        self.run(ctx).await.map_err(|source| TaskError::Run {
            task: self.name().to_string(),
            source,
        })
    }
}

/// Result of one scheduler tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulerTick {
    pub fired: Vec<String>,
    pub failed: Vec<String>,
}

/// Fires periodic tasks when their schedule is due.
///
/// The last fire time of every task is persisted in `metadata.scheduler`, so
/// a restart neither repeats nor replays past ticks. Tasks are handled one at
/// a time, never concurrently with themselves.
pub struct PeriodicScheduler {
    tasks: Vec<Arc<dyn PeriodicTask>>,
    store: Arc<dyn DocumentStore>,
    notifier: Arc<dyn Notifier>,
    tick_every: Duration,
}

impl PeriodicScheduler {
    pub fn new(
        tasks: Vec<Arc<dyn PeriodicTask>>,
        store: Arc<dyn DocumentStore>,
        notifier: Arc<dyn Notifier>,
    ) -> TaskResult<Self> {
        for task in &tasks {
            task.schedule()
                .validate()
                .map_err(|source| TaskError::Schedule {
                    task: task.name().to_string(),
                    source,
                })?;
        }
        Ok(Self {
            tasks,
            store,
            notifier,
            tick_every: Duration::from_millis(DEFAULT_SCHEDULER_TICK_MS),
        })
    }

    pub fn with_tick_every(mut self, tick_every: Duration) -> Self {
        self.tick_every = tick_every;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    fn collection() -> CollectionRef {
        CollectionRef::metadata(SCHEDULER_COLLECTION)
    }

    fn filter(name: &str) -> Document {
        let mut filter = Document::new();
        filter.insert("name".to_string(), Value::String(name.to_string()));
        filter
    }

    pub async fn last_run_unix_ms(&self, name: &str) -> TaskResult<Option<u64>> {
        let Some(document) = self
            .store
            .find_one(&Self::collection(), &Self::filter(name))
            .await?
        else {
            return Ok(None);
        };
        match document.get("last_run_unix_ms") {
            None => Ok(None),
            Some(value) => value.as_u64().map(Some).ok_or_else(|| {
                TaskError::Store(StoreError::InvalidPersistedValue {
                    field: "last_run_unix_ms",
                    value: value.to_string(),
                })
            }),
        }
    }

    /// Fires every task due at `now_unix_ms`, at most once each.
    pub async fn tick(&self, now_unix_ms: u64) -> TaskResult<SchedulerTick> {
        let mut report = SchedulerTick::default();
        for task in &self.tasks {
            let from = self
                .last_run_unix_ms(task.name())
                .await?
                .unwrap_or_else(|| now_unix_ms.saturating_sub(FIRST_TICK_LOOKBACK_MS));
            let next_due = task
                .schedule()
                .next_due_unix_ms(from)
                .map_err(|source| TaskError::Schedule {
                    task: task.name().to_string(),
                    source,
                })?;
            if next_due > now_unix_ms {
                continue;
            }

            let ctx = PeriodicContext::new(Arc::clone(&self.store), Arc::clone(&self.notifier));
            match task.handle(&ctx).await {
                Ok(()) => report.fired.push(task.name().to_string()),
                Err(error) => {
                    error!(task = task.name(), error = %error, "periodic task failed");
                    report.failed.push(task.name().to_string());
                }
            }
            self.store
                .upsert(
                    &Self::collection(),
                    &Self::filter(task.name()),
                    json!({"last_run_unix_ms": now_unix_ms})
                        .as_object()
                        .cloned()
                        .unwrap_or_default(),
                )
                .await?;
        }
        if !report.fired.is_empty() || !report.failed.is_empty() {
            debug!(fired = report.fired.len(), failed = report.failed.len(), "scheduler tick");
        }
        Ok(report)
    }

    /// Ticks forever; returns only when the store fails.
    pub async fn run(&self) -> TaskResult<()> {
        info!(
            tasks = self.tasks.len(),
            tick_every_ms = u64::try_from(self.tick_every.as_millis()).unwrap_or(u64::MAX),
            "periodic scheduler started"
        );
        let mut interval = tokio::time::interval(self.tick_every);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            match self.tick(current_unix_timestamp_ms()).await {
                Ok(_) => {}
                Err(TaskError::Store(error)) => return Err(TaskError::Store(error)),
                Err(error) => error!(error = %error, "scheduler tick failed"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryNotifier;
    use nudge_store::InMemoryDocumentStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const MINUTE_MS: u64 = 60_000;
    // 2024-01-01T00:00:00Z
    const MIDNIGHT_MS: u64 = 1_704_067_200_000;

    struct Report {
        schedule: Schedule,
        runs: AtomicUsize,
        fail: bool,
    }

    impl Report {
        fn every_minute(fail: bool) -> Self {
            Self {
                schedule: Schedule::new("0 * * * * * *", "UTC"),
                runs: AtomicUsize::new(0),
                fail,
            }
        }
    }

    #[async_trait]
    impl PeriodicTask for Report {
        fn name(&self) -> &str {
            "minute-report"
        }

        fn schedule(&self) -> Schedule {
            self.schedule.clone()
        }

        async fn run(&self, ctx: &PeriodicContext) -> anyhow::Result<()> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            let snapshot = ctx.all_statistics().await?;
            ctx.notifier()
                .send_chat("#dev", &format!("{} documents", snapshot.total_documents()))
                .await?;
            if self.fail {
                anyhow::bail!("smtp unavailable");
            }
            Ok(())
        }
    }

    fn scheduler(task: Arc<Report>) -> (PeriodicScheduler, Arc<MemoryNotifier>) {
        let notifier = Arc::new(MemoryNotifier::new());
        let scheduler = PeriodicScheduler::new(
            vec![task],
            Arc::new(InMemoryDocumentStore::new()),
            notifier.clone(),
        )
        .expect("scheduler");
        (scheduler, notifier)
    }

    #[test]
    fn next_due_respects_timezone() {
        let schedule = Schedule::new("0 0 9 * * * *", "Asia/Jerusalem");
        let next = schedule.next_due_unix_ms(MIDNIGHT_MS).expect("next");
        // 09:00 in Jerusalem (UTC+2 in January) is 07:00 UTC.
        assert_eq!(next, MIDNIGHT_MS + 7 * 60 * MINUTE_MS);
    }

    #[test]
    fn invalid_schedules_are_rejected() {
        assert!(Schedule::new("not a cron", "UTC").validate().is_err());
        assert!(Schedule::new("0 * * * * * *", "Mars/Olympus").validate().is_err());
    }

    #[tokio::test]
    async fn fires_once_per_scheduled_tick() {
        let task = Arc::new(Report::every_minute(false));
        let (scheduler, notifier) = scheduler(Arc::clone(&task));

        let first = scheduler.tick(MIDNIGHT_MS + 1_000).await.expect("first tick");
        assert_eq!(first.fired, vec!["minute-report"]);
        let again = scheduler.tick(MIDNIGHT_MS + 2_000).await.expect("same minute");
        assert!(again.fired.is_empty());
        let next = scheduler
            .tick(MIDNIGHT_MS + MINUTE_MS + 1_000)
            .await
            .expect("next minute");
        assert_eq!(next.fired.len(), 1);

        assert_eq!(task.runs.load(Ordering::SeqCst), 2);
        assert_eq!(notifier.sent().len(), 2);
        assert_eq!(
            scheduler
                .last_run_unix_ms("minute-report")
                .await
                .expect("last run"),
            Some(MIDNIGHT_MS + MINUTE_MS + 1_000)
        );
    }

    #[tokio::test]
    async fn failures_are_reported_and_not_repeated_within_a_tick() {
        let task = Arc::new(Report::every_minute(true));
        let (scheduler, _notifier) = scheduler(Arc::clone(&task));

        let tick = scheduler.tick(MIDNIGHT_MS + 1_000).await.expect("tick");
        assert_eq!(tick.failed, vec!["minute-report"]);
        let tick = scheduler.tick(MIDNIGHT_MS + 5_000).await.expect("tick");
        assert!(tick.failed.is_empty());
        assert_eq!(task.runs.load(Ordering::SeqCst), 1);
    }
}
