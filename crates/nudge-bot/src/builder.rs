use std::collections::HashSet;
use std::sync::Arc;

use nudge_endpoint::{
    Endpoint, EndpointRegistry, EventSource, EventsFactory, ScopesCollector,
};
use nudge_statistics::StatisticsDefinition;
use nudge_store::{DocumentStore, InMemoryDocumentStore};
use nudge_tasks::{ConditionalTask, LogNotifier, Notifier, PeriodicScheduler, PeriodicTask};
use tokio::task::JoinSet;
use tracing::{error, info};

use crate::{BotConfig, BotError, BotResult, BotSlave, DispatchReport};

struct EndpointBinding {
    endpoint: Arc<dyn Endpoint>,
    events: Arc<dyn EventSource>,
    collector: Option<Arc<dyn ScopesCollector>>,
}

/// Explicit registration of everything the bot runs.
#[derive(Default)]
pub struct BotBuilder {
    store: Option<Arc<dyn DocumentStore>>,
    notifier: Option<Arc<dyn Notifier>>,
    config: BotConfig,
    bindings: Vec<EndpointBinding>,
    statistics: Vec<Arc<dyn StatisticsDefinition>>,
    tasks: Vec<Arc<dyn ConditionalTask>>,
    periodic: Vec<Arc<dyn PeriodicTask>>,
}

impl BotBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(mut self, store: Arc<dyn DocumentStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn config(mut self, config: BotConfig) -> Self {
        self.config = config;
        self
    }

    pub fn endpoint(
        mut self,
        endpoint: Arc<dyn Endpoint>,
        events: Arc<dyn EventSource>,
        collector: Option<Arc<dyn ScopesCollector>>,
    ) -> Self {
        self.bindings.push(EndpointBinding {
            endpoint,
            events,
            collector,
        });
        self
    }

    pub fn statistics(mut self, definition: Arc<dyn StatisticsDefinition>) -> Self {
        self.statistics.push(definition);
        self
    }

    pub fn task(mut self, task: Arc<dyn ConditionalTask>) -> Self {
        self.tasks.push(task);
        self
    }

    pub fn periodic_task(mut self, task: Arc<dyn PeriodicTask>) -> Self {
        self.periodic.push(task);
        self
    }

    fn validate(&self, registry: &EndpointRegistry) -> BotResult<()> {
        let mut keys = HashSet::new();
        for definition in &self.statistics {
            if !registry.contains(definition.endpoint_key()) {
                return Err(BotError::InvalidSetup(format!(
                    "statistics '{}' targets unregistered endpoint '{}'",
                    definition.key(),
                    definition.endpoint_key()
                )));
            }
            if !keys.insert(definition.key().to_string()) {
                return Err(BotError::InvalidSetup(format!(
                    "statistics key '{}' is registered twice",
                    definition.key()
                )));
            }
        }

        let mut names = HashSet::new();
        for task in &self.tasks {
            if !registry.contains(task.endpoint_key()) {
                return Err(BotError::InvalidSetup(format!(
                    "task '{}' targets unregistered endpoint '{}'",
                    task.name(),
                    task.endpoint_key()
                )));
            }
            if !names.insert(task.name().to_string()) {
                return Err(BotError::InvalidSetup(format!(
                    "task name '{}' is registered twice",
                    task.name()
                )));
            }
        }
        for task in &self.periodic {
            if !names.insert(task.name().to_string()) {
                return Err(BotError::InvalidSetup(format!(
                    "task name '{}' is registered twice",
                    task.name()
                )));
            }
        }
        Ok(())
    }

    /// Validates the registrations and opens one slave per endpoint.
    pub async fn build(self) -> BotResult<Bot> {
        let mut registry = EndpointRegistry::new();
        for binding in &self.bindings {
            if binding.events.endpoint_key() != binding.endpoint.key() {
                return Err(BotError::InvalidSetup(format!(
                    "events source '{}' bound to endpoint '{}'",
                    binding.events.endpoint_key(),
                    binding.endpoint.key()
                )));
            }
            registry.register(Arc::clone(&binding.endpoint))?;
        }
        self.validate(&registry)?;

        let store: Arc<dyn DocumentStore> = match self.store.clone() {
            Some(store) => store,
            None => Arc::new(InMemoryDocumentStore::new()),
        };
        let notifier: Arc<dyn Notifier> = match self.notifier.clone() {
            Some(notifier) => notifier,
            None => Arc::new(LogNotifier),
        };

        let mut slaves = Vec::new();
        for binding in self.bindings {
            let key = binding.endpoint.key().to_string();
            let factory = EventsFactory::open(
                binding.events,
                Arc::clone(&store),
                self.config.events.clone(),
            )
            .await?;
            let statistics = self
                .statistics
                .iter()
                .filter(|definition| definition.endpoint_key() == key)
                .cloned()
                .collect();
            let tasks = self
                .tasks
                .iter()
                .filter(|task| task.endpoint_key() == key)
                .cloned()
                .collect();
            slaves.push(Arc::new(BotSlave::new(
                binding.endpoint,
                Arc::new(factory),
                binding.collector,
                statistics,
                tasks,
                Arc::clone(&store),
                Arc::clone(&notifier),
                self.config.clone(),
            )));
        }

        let scheduler = if self.periodic.is_empty() {
            None
        } else {
            Some(Arc::new(PeriodicScheduler::new(
                self.periodic,
                Arc::clone(&store),
                Arc::clone(&notifier),
            )?))
        };

        info!(
            endpoints = registry.len(),
            statistics = self.statistics.len(),
            tasks = self.tasks.len(),
            periodic = scheduler.is_some(),
            "bot built"
        );
        Ok(Bot {
            registry,
            slaves,
            scheduler,
            store,
        })
    }
}

/// Every endpoint slave plus the periodic scheduler.
pub struct Bot {
    registry: EndpointRegistry,
    slaves: Vec<Arc<BotSlave>>,
    scheduler: Option<Arc<PeriodicScheduler>>,
    store: Arc<dyn DocumentStore>,
}

impl Bot {
    pub fn registry(&self) -> &EndpointRegistry {
        &self.registry
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    pub fn slaves(&self) -> &[Arc<BotSlave>] {
        &self.slaves
    }

    pub fn slave(&self, endpoint_key: &str) -> Option<&Arc<BotSlave>> {
        self.slaves
            .iter()
            .find(|slave| slave.endpoint_key() == endpoint_key)
    }

    /// Runs one full poll on every slave.
    pub async fn poll_all(&self) -> BotResult<DispatchReport> {
        let mut report = DispatchReport::default();
        for slave in &self.slaves {
            report.merge(&slave.poll().await?);
        }
        Ok(report)
    }

    /// Runs every slave and the scheduler concurrently. Returns the first
    /// fatal error; the remaining loops are aborted.
    pub async fn run(&self) -> BotResult<()> {
        let mut loops = JoinSet::new();
        for slave in &self.slaves {
            let slave = Arc::clone(slave);
            loops.spawn(async move { slave.run().await });
        }
        if let Some(scheduler) = &self.scheduler {
            let scheduler = Arc::clone(scheduler);
            loops.spawn(async move { scheduler.run().await.map_err(BotError::from) });
        }
        if loops.is_empty() {
            return Err(BotError::InvalidSetup(
                "no endpoint or periodic task registered".to_string(),
            ));
        }

        while let Some(joined) = loops.join_next().await {
            let result = match joined {
                Ok(result) => result,
                Err(join_error) => Err(BotError::ThreadDeath {
                    endpoint: "bot".to_string(),
                    reason: join_error.to_string(),
                }),
            };
            if let Err(error) = result {
                error!(error = %error, "bot loop stopped");
                loops.abort_all();
                return Err(error);
            }
        }
        Ok(())
    }
}
