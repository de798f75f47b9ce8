use std::sync::Arc;
use std::time::Instant;

use nudge_endpoint::{
    hierarchy, init_by_event, Endpoint, EndpointScope, Event, EventsFactory, ScopesCollector,
};
use nudge_statistics::{select_scope, Statistics, StatisticsCollection, StatisticsDefinition};
use nudge_store::DocumentStore;
use nudge_tasks::{ConditionalTask, ConditionalTaskRunner, Notifier, TaskContext};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::{BotConfig, BotError, BotResult, DispatchReport};

/// Worker of one endpoint.
///
/// Full polls and event drains share one mutex, so the statistics and task
/// state of this endpoint are never touched by both at once.
pub struct BotSlave {
    endpoint: Arc<dyn Endpoint>,
    factory: Arc<EventsFactory>,
    collector: Option<Arc<dyn ScopesCollector>>,
    statistics: Vec<Arc<dyn StatisticsDefinition>>,
    tasks: Vec<Arc<dyn ConditionalTask>>,
    runner: ConditionalTaskRunner,
    store: Arc<dyn DocumentStore>,
    notifier: Arc<dyn Notifier>,
    config: BotConfig,
    lock: Mutex<()>,
}

impl std::fmt::Debug for BotSlave {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BotSlave")
            .field("endpoint", &self.endpoint.key())
            .field("statistics", &self.statistics.len())
            .field("tasks", &self.tasks.len())
            .field("pollable", &self.collector.is_some())
            .finish()
    }
}

impl BotSlave {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        endpoint: Arc<dyn Endpoint>,
        factory: Arc<EventsFactory>,
        collector: Option<Arc<dyn ScopesCollector>>,
        statistics: Vec<Arc<dyn StatisticsDefinition>>,
        tasks: Vec<Arc<dyn ConditionalTask>>,
        store: Arc<dyn DocumentStore>,
        notifier: Arc<dyn Notifier>,
        config: BotConfig,
    ) -> Self {
        Self {
            endpoint,
            factory,
            collector,
            statistics,
            tasks,
            runner: ConditionalTaskRunner::new(Arc::clone(&store)),
            store,
            notifier,
            config,
            lock: Mutex::new(()),
        }
    }

    pub fn endpoint_key(&self) -> &str {
        self.endpoint.key()
    }

    pub fn factory(&self) -> &Arc<EventsFactory> {
        &self.factory
    }

    /// Enumerates every live scope and dispatches each, without an event.
    pub async fn poll(&self) -> BotResult<DispatchReport> {
        let _guard = self.lock.lock().await;
        let mut report = DispatchReport::default();
        let Some(collector) = &self.collector else {
            debug!(endpoint = %self.endpoint_key(), "endpoint is not pollable");
            return Ok(report);
        };
        let started = Instant::now();
        let scopes = collector.collect_all().await?;
        info!(endpoint = %self.endpoint_key(), scopes = scopes.len(), "poll started");
        for scope in scopes {
            let label = format!("{} {}", scope.kind(), scope.query());
            match self.dispatch(scope, None).await {
                Ok(dispatched) => report.merge(&dispatched),
                Err(error) if error.is_transient() => {
                    warn!(endpoint = %self.endpoint_key(), scope = %label, error = %error, "poll aborted until the next cycle");
                    report.aborted = true;
                    break;
                }
                Err(error) => {
                    warn!(endpoint = %self.endpoint_key(), scope = %label, error = %error, "scope dispatch failed");
                    report.failed_scopes += 1;
                }
            }
        }
        info!(
            endpoint = %self.endpoint_key(),
            scopes = report.scopes,
            tasks_ran = report.tasks_ran,
            elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            "poll finished"
        );
        Ok(report)
    }

    /// Drains every buffered event. A transient endpoint failure, while
    /// resolving the scope or during dispatch, puts the event back and ends
    /// the drain until the next cycle.
    pub async fn handle_events(&self) -> BotResult<DispatchReport> {
        let _guard = self.lock.lock().await;
        let mut report = DispatchReport::default();
        while let Some(event) = self.factory.pull_event().await? {
            report.events += 1;
            let scope = match init_by_event(self.endpoint.as_ref(), &event).await {
                Ok(scope) => scope,
                Err(error) if error.is_transient() => {
                    warn!(endpoint = %self.endpoint_key(), event = %event.hash(), error = %error, "event handling deferred");
                    self.factory.requeue(event);
                    report.events -= 1;
                    report.aborted = true;
                    break;
                }
                Err(error) => {
                    warn!(endpoint = %self.endpoint_key(), event = %event.hash(), error = %error, "event scope could not be resolved");
                    report.failed_events += 1;
                    continue;
                }
            };
            let hash = event.hash();
            match self.dispatch(scope, Some(event.clone())).await {
                Ok(dispatched) => report.merge(&dispatched),
                Err(error) if error.is_transient() => {
                    warn!(endpoint = %self.endpoint_key(), event = %hash, error = %error, "event handling deferred");
                    self.factory.requeue(event);
                    report.events -= 1;
                    report.aborted = true;
                    break;
                }
                Err(error) => {
                    warn!(endpoint = %self.endpoint_key(), event = %hash, error = %error, "event dispatch failed");
                    report.failed_events += 1;
                }
            }
        }
        if report.events > 0 {
            info!(
                endpoint = %self.endpoint_key(),
                events = report.events,
                failed_events = report.failed_events,
                tasks_ran = report.tasks_ran,
                "events handled"
            );
        }
        Ok(report)
    }

    /// Collects every statistics group selected by the scope's hierarchy,
    /// then handles every task whose scope kind is part of it. Task failures
    /// are counted; transient ones end the dispatch with an error.
    async fn dispatch(
        &self,
        scope: Arc<dyn EndpointScope>,
        event: Option<Event>,
    ) -> BotResult<DispatchReport> {
        let mut report = DispatchReport {
            scopes: 1,
            ..DispatchReport::default()
        };
        let chain = hierarchy(scope);

        let mut collected = Vec::new();
        for definition in &self.statistics {
            let Some(target) = select_scope(definition.as_ref(), &chain) else {
                continue;
            };
            let statistics = Statistics::for_scope(
                Arc::clone(definition),
                Arc::clone(&self.endpoint),
                Arc::clone(&self.store),
                target,
            )?;
            statistics.collect(false).await?;
            report.statistics_collected += 1;
            collected.push(Arc::new(statistics));
        }

        for task in &self.tasks {
            let Some(position) = chain
                .iter()
                .position(|candidate| candidate.kind() == task.scope_kind())
            else {
                continue;
            };
            let kinds = task.scope_kind().static_hierarchy();
            let consulted = collected
                .iter()
                .filter(|statistics| kinds.contains(&statistics.definition().scope_kind()))
                .cloned()
                .collect::<Vec<Arc<Statistics>>>();
            let ctx = TaskContext::new(
                chain[position..].to_vec(),
                StatisticsCollection::new(consulted),
                event.clone(),
                Arc::clone(&self.notifier),
                Arc::clone(&self.store),
            );
            match self.runner.handle(task.as_ref(), &ctx).await {
                Ok(outcome) if outcome.ran() => report.tasks_ran += 1,
                Ok(_) => report.tasks_skipped += 1,
                Err(error) if error.is_transient() => return Err(error.into()),
                Err(error) => {
                    error!(task = task.name(), error = %error, "task handling failed");
                    report.tasks_failed += 1;
                }
            }
        }
        Ok(report)
    }

    /// Runs the slave until its events factory dies.
    pub async fn run(self: Arc<Self>) -> BotResult<()> {
        if self.config.poll_on_start {
            if let Err(error) = self.poll().await {
                warn!(endpoint = %self.endpoint_key(), error = %error, "initial poll failed");
            }
        }
        self.factory.start();
        let mut last_poll = Instant::now();
        loop {
            if !self.factory.is_running() {
                return Err(BotError::ThreadDeath {
                    endpoint: self.endpoint_key().to_string(),
                    reason: self
                        .factory
                        .exit_reason()
                        .unwrap_or_else(|| "events loop stopped".to_string()),
                });
            }
            if let Err(error) = self.handle_events().await {
                warn!(endpoint = %self.endpoint_key(), error = %error, "events cycle failed");
            }
            tokio::time::sleep(self.config.handle_events_every).await;
            if let Some(poll_every) = self.config.poll_every {
                if last_poll.elapsed() >= poll_every {
                    if let Err(error) = self.poll().await {
                        warn!(endpoint = %self.endpoint_key(), error = %error, "periodic poll failed");
                    }
                    last_poll = Instant::now();
                }
            }
        }
    }
}
