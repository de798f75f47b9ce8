//! Conditional tasks and their persisted, edge-triggered run ledger.

use std::sync::Arc;

use async_trait::async_trait;
use nudge_core::content_hash;
use nudge_endpoint::{downcast_scope, EndpointScope, Event, ScopeKind};
use nudge_statistics::{StatisticsCollection, StatisticsSnapshot};
use nudge_store::{CollectionRef, Document, DocumentStore};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::{underscored, Notifier, TaskError, TaskResult};

/// A rule evaluated against the statistics of one scope hierarchy.
///
/// With the defaults the side effect runs once when the condition flips from
/// false to true, and again only when the artifacts change.
#[async_trait]
pub trait ConditionalTask: Send + Sync {
    fn name(&self) -> &str;

    fn scope_kind(&self) -> &'static ScopeKind;

    fn endpoint_key(&self) -> &str {
        self.scope_kind().endpoint
    }

    /// Collection of the task ledger inside the tasks database.
    fn collection_name(&self) -> String {
        underscored(self.name())
    }

    fn run_once(&self) -> bool {
        true
    }

    fn only_on_condition_changed(&self) -> bool {
        true
    }

    async fn condition(&self, ctx: &TaskContext) -> anyhow::Result<bool>;

    /// Strings capturing which version of the triggering content this is.
    async fn artifacts(&self, _ctx: &TaskContext) -> anyhow::Result<Vec<String>> {
        Ok(Vec::new())
    }

    async fn run(&self, ctx: &TaskContext) -> anyhow::Result<()>;
}

/// Everything a conditional task may consult while being handled.
pub struct TaskContext {
    scopes: Vec<Arc<dyn EndpointScope>>,
    statistics: StatisticsCollection,
    event: Option<Event>,
    notifier: Arc<dyn Notifier>,
    store: Arc<dyn DocumentStore>,
    snapshot: OnceCell<StatisticsSnapshot>,
}

impl TaskContext {
    pub fn new(
        scopes: Vec<Arc<dyn EndpointScope>>,
        statistics: StatisticsCollection,
        event: Option<Event>,
        notifier: Arc<dyn Notifier>,
        store: Arc<dyn DocumentStore>,
    ) -> Self {
        Self {
            scopes,
            statistics,
            event,
            notifier,
            store,
            snapshot: OnceCell::new(),
        }
    }

    /// The scope of the given kind name, if part of this hierarchy slice.
    pub fn scope(&self, kind_name: &str) -> Option<&Arc<dyn EndpointScope>> {
        self.scopes
            .iter()
            .find(|scope| scope.kind().name == kind_name)
    }

    /// The first scope of concrete type `T`.
    pub fn scope_of<T: EndpointScope + 'static>(&self) -> Option<&T> {
        self.scopes
            .iter()
            .find_map(|scope| downcast_scope::<T>(scope.as_ref()))
    }

    pub fn scopes(&self) -> &[Arc<dyn EndpointScope>] {
        &self.scopes
    }

    pub fn statistics(&self) -> &StatisticsCollection {
        &self.statistics
    }

    pub fn event(&self) -> Option<&Event> {
        self.event.as_ref()
    }

    pub fn notifier(&self) -> &dyn Notifier {
        self.notifier.as_ref()
    }

    /// Every persisted statistics document, loaded once per context.
    pub async fn all_statistics(&self) -> TaskResult<&StatisticsSnapshot> {
        let store = Arc::clone(&self.store);
        Ok(self
            .snapshot
            .get_or_try_init(|| async move { StatisticsSnapshot::load(store.as_ref()).await })
            .await?)
    }
}

/// One past run of a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub datetime: String,
    pub hash: String,
    #[serde(default)]
    pub artifacts: Vec<String>,
}

/// Persisted state of one task instance.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskState {
    pub condition: bool,
    pub records: Vec<TaskRecord>,
}

impl TaskState {
    fn from_document(task: &str, document: &Document) -> TaskResult<Self> {
        let invalid = |reason: String| TaskError::InvalidState {
            task: task.to_string(),
            reason,
        };
        let condition = match document.get("condition") {
            None => false,
            Some(Value::Bool(condition)) => *condition,
            Some(other) => return Err(invalid(format!("condition is not a boolean: {other}"))),
        };
        let records = match document.get("records") {
            None => Vec::new(),
            Some(value) => serde_json::from_value::<Vec<TaskRecord>>(value.clone())
                .map_err(|error| invalid(format!("records: {error}")))?,
        };
        Ok(Self { condition, records })
    }

    fn has_run_with(&self, hash: &str) -> bool {
        self.records.iter().any(|record| record.hash == hash)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    ConditionFalse,
    ConditionUnchanged,
    AlreadyDone,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Ran { hash: String },
    Skipped { reason: SkipReason },
}

impl TaskOutcome {
    pub fn ran(&self) -> bool {
        matches!(self, Self::Ran { .. })
    }
}

/// Ledger identity of a task instance: its name plus the query of every
/// statistics object it consults.
pub fn task_identity(name: &str, statistics: &StatisticsCollection) -> Document {
    let mut identity = Document::new();
    identity.insert("name".to_string(), Value::String(name.to_string()));
    identity.insert(
        "statistics_queries".to_string(),
        Value::Object(statistics.queries()),
    );
    identity
}

/// Evaluates conditional tasks against their ledger in the tasks database.
#[derive(Clone)]
pub struct ConditionalTaskRunner {
    store: Arc<dyn DocumentStore>,
}

impl ConditionalTaskRunner {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Reads the persisted state of `task` for the given statistics, if any.
    pub async fn state(
        &self,
        task: &dyn ConditionalTask,
        statistics: &StatisticsCollection,
    ) -> TaskResult<Option<TaskState>> {
        let collection = CollectionRef::tasks(task.collection_name());
        let identity = task_identity(task.name(), statistics);
        match self.store.find_one(&collection, &identity).await? {
            Some(document) => Ok(Some(TaskState::from_document(task.name(), &document)?)),
            None => Ok(None),
        }
    }

    /// Handles one evaluation of `task`.
    ///
    /// The side effect runs iff the condition holds and either the task is
    /// not run-once, or the condition changed and the artifact hash has no
    /// record yet. A failing condition or run writes nothing.
    pub async fn handle(
        &self,
        task: &dyn ConditionalTask,
        ctx: &TaskContext,
    ) -> TaskResult<TaskOutcome> {
        let name = task.name();
        let collection = CollectionRef::tasks(task.collection_name());
        let identity = task_identity(name, ctx.statistics());
        let existing = self.store.find_one(&collection, &identity).await?;
        let mut state = match &existing {
            Some(document) => TaskState::from_document(name, document)?,
            None => TaskState::default(),
        };

        let condition = task
            .condition(ctx)
            .await
            .map_err(|source| TaskError::Condition {
                task: name.to_string(),
                source,
            })?;
        let condition_changed = if task.only_on_condition_changed() {
            state.condition != condition
        } else {
            true
        };
        debug!(task = name, condition, condition_changed, "task condition evaluated");

        let outcome = if !condition {
            TaskOutcome::Skipped {
                reason: SkipReason::ConditionFalse,
            }
        } else {
            let artifacts = task
                .artifacts(ctx)
                .await
                .map_err(|source| TaskError::Artifacts {
                    task: name.to_string(),
                    source,
                })?;
            let hash = content_hash(artifacts.as_slice());
            let already_done = state.has_run_with(&hash);
            if !task.run_once() || (condition_changed && !already_done) {
                info!(task = name, hash = %hash, "running task");
                task.run(ctx).await.map_err(|source| TaskError::Run {
                    task: name.to_string(),
                    source,
                })?;
                state.records.push(TaskRecord {
                    datetime: chrono::Utc::now().to_rfc3339(),
                    hash: hash.clone(),
                    artifacts,
                });
                TaskOutcome::Ran { hash }
            } else if !condition_changed {
                TaskOutcome::Skipped {
                    reason: SkipReason::ConditionUnchanged,
                }
            } else {
                TaskOutcome::Skipped {
                    reason: SkipReason::AlreadyDone,
                }
            }
        };

        state.condition = condition;
        let mut fields = Document::new();
        fields.insert("condition".to_string(), Value::Bool(condition));
        fields.insert("records".to_string(), json!(state.records));
        if existing.is_some() {
            self.store.update(&collection, &identity, fields).await?;
        } else {
            self.store.upsert(&collection, &identity, fields).await?;
        }

        if outcome.ran() {
            for statistics in ctx.statistics().iter() {
                statistics.uncache_all();
                statistics.collect(false).await?;
            }
        }
        Ok(outcome)
    }
}
