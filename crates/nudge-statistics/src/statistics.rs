use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use nudge_endpoint::{Endpoint, EndpointScope, ScopeKind, ScopeQuery};
use nudge_store::{
    merge_fields, CollectionRef, Document, DocumentStore, StoreResult, UpsertOutcome,
    STATISTICS_DATABASE,
};
use serde_json::Value;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::{StatisticsError, StatisticsResult, ToggleCache};

/// Declaration of one statistics group bound to a scope kind.
///
/// Implementations compute values by name; a getter may read other
/// statistics of the same instance through [`Statistics::statistic`].
#[async_trait]
pub trait StatisticsDefinition: Send + Sync {
    /// Unique key used by tasks to look the group up.
    fn key(&self) -> &str;

    /// Collection holding the persisted documents of this group.
    fn collection_name(&self) -> &str {
        self.key()
    }

    fn scope_kind(&self) -> &'static ScopeKind;

    fn endpoint_key(&self) -> &str {
        self.scope_kind().endpoint
    }

    /// Statistic names in declared order.
    fn statistic_names(&self) -> &'static [&'static str];

    async fn compute(&self, name: &str, statistics: &Statistics) -> anyhow::Result<Value>;

    /// Human-facing rendering of a value, never persisted.
    fn pretty(&self, _name: &str, _value: &Value) -> Option<String> {
        None
    }
}

/// Picks the scope of `hierarchy` a definition applies to, if any.
pub fn select_scope(
    definition: &dyn StatisticsDefinition,
    hierarchy: &[Arc<dyn EndpointScope>],
) -> Option<Arc<dyn EndpointScope>> {
    hierarchy
        .iter()
        .find(|scope| scope.kind() == definition.scope_kind())
        .cloned()
}

/// The statistics of one scope instance, keyed by its primary-key query.
///
/// Constructed per dispatch cycle; the persisted document is the durable
/// state.
pub struct Statistics {
    definition: Arc<dyn StatisticsDefinition>,
    endpoint: Arc<dyn Endpoint>,
    store: Arc<dyn DocumentStore>,
    query: ScopeQuery,
    scope: OnceCell<Arc<dyn EndpointScope>>,
    cache: ToggleCache,
}

impl std::fmt::Debug for Statistics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Statistics")
            .field("key", &self.definition.key())
            .field("query", &self.query)
            .field("cached", &self.cache.cached_names())
            .finish()
    }
}

impl Statistics {
    /// Builds an instance from primary keys; the scope is resolved on first use.
    pub fn new(
        definition: Arc<dyn StatisticsDefinition>,
        endpoint: Arc<dyn Endpoint>,
        store: Arc<dyn DocumentStore>,
        query: &ScopeQuery,
    ) -> StatisticsResult<Self> {
        let query = query.project(definition.scope_kind())?;
        Ok(Self {
            definition,
            endpoint,
            store,
            query,
            scope: OnceCell::new(),
            cache: ToggleCache::new(),
        })
    }

    /// Builds an instance around an already resolved scope.
    pub fn for_scope(
        definition: Arc<dyn StatisticsDefinition>,
        endpoint: Arc<dyn Endpoint>,
        store: Arc<dyn DocumentStore>,
        scope: Arc<dyn EndpointScope>,
    ) -> StatisticsResult<Self> {
        let statistics = Self::new(definition, endpoint, store, &scope.query())?;
        statistics.set_scope(scope)?;
        Ok(statistics)
    }

    pub fn key(&self) -> &str {
        self.definition.key()
    }

    pub fn collection_name(&self) -> &str {
        self.definition.collection_name()
    }

    pub fn definition(&self) -> &Arc<dyn StatisticsDefinition> {
        &self.definition
    }

    pub fn query(&self) -> &ScopeQuery {
        &self.query
    }

    fn collection(&self) -> CollectionRef {
        CollectionRef::statistics(self.definition.collection_name())
    }

    /// The live scope, resolved through the endpoint once per instance.
    pub async fn scope(&self) -> StatisticsResult<Arc<dyn EndpointScope>> {
        let scope = self
            .scope
            .get_or_try_init(|| async {
                debug!(statistics = %self.key(), query = %self.query, "resolving statistics scope");
                self.endpoint
                    .init_by_keys(self.definition.scope_kind(), &self.query)
                    .await
            })
            .await?;
        Ok(Arc::clone(scope))
    }

    /// Reuses an already resolved scope instead of fetching it again. A scope
    /// set earlier is kept.
    pub fn set_scope(&self, scope: Arc<dyn EndpointScope>) -> StatisticsResult<()> {
        if scope.kind() != self.definition.scope_kind() || scope.query() != self.query {
            return Err(StatisticsError::ScopeMismatch {
                key: self.key().to_string(),
                expected: format!("{} {}", self.definition.scope_kind(), self.query),
                actual: format!("{} {}", scope.kind(), scope.query()),
            });
        }
        let _ = self.scope.set(scope);
        Ok(())
    }

    /// Evaluates one statistic through the cache. Primary keys are constant
    /// statistics.
    pub async fn statistic(&self, name: &str) -> StatisticsResult<Value> {
        if self
            .definition
            .scope_kind()
            .primary_keys
            .iter()
            .any(|key| *key == name)
        {
            if let Some(value) = self.query.get(name) {
                return Ok(value.clone());
            }
        }
        if !self
            .definition
            .statistic_names()
            .iter()
            .any(|declared| *declared == name)
        {
            return Err(StatisticsError::UnknownStatistic {
                key: self.key().to_string(),
                name: name.to_string(),
            });
        }
        self.cache
            .get_or_compute(name, || async {
                debug!(statistics = %self.key(), statistic = name, "computing statistic");
                self.definition
                    .compute(name, self)
                    .await
                    .map_err(|source| StatisticsError::Getter {
                        key: self.key().to_string(),
                        name: name.to_string(),
                        source,
                    })
            })
            .await
    }

    pub fn is_cached(&self, name: &str) -> bool {
        self.cache.is_cached(name)
    }

    pub fn uncache(&self, name: &str) -> bool {
        self.cache.invalidate(name)
    }

    pub fn uncache_all(&self) {
        self.cache.invalidate_all();
    }

    /// Persists the statistics of this instance.
    ///
    /// Without a stored document every statistic is computed and inserted.
    /// With one, every statistic is evaluated (cached values reused) and set
    /// field by field, or only the currently cached ones when `cached_only`.
    pub async fn collect(&self, cached_only: bool) -> StatisticsResult<UpsertOutcome> {
        let collection = self.collection();
        let filter = self.query.to_document();
        let exists = self.store.find_one(&collection, &filter).await?.is_some();
        let names = self
            .definition
            .statistic_names()
            .iter()
            .copied()
            .filter(|name| !(exists && cached_only) || self.cache.is_cached(name))
            .collect::<Vec<_>>();

        let mut fields = Document::new();
        for name in &names {
            fields.insert((*name).to_string(), self.statistic(name).await?);
        }

        info!(
            statistics = %self.key(),
            query = %self.query,
            fields = names.len(),
            cached_only,
            "collecting statistics"
        );
        if exists {
            if !fields.is_empty() {
                self.store.update(&collection, &filter, fields).await?;
            }
            return Ok(UpsertOutcome::Updated);
        }
        let mut document = filter;
        merge_fields(&mut document, fields);
        self.store.insert(&collection, document).await?;
        Ok(UpsertOutcome::Inserted)
    }

    /// The persisted document for this query.
    pub async fn document(&self) -> StatisticsResult<Option<Document>> {
        Ok(self
            .store
            .find_one(&self.collection(), &self.query.to_document())
            .await?)
    }

    /// Ordered view for human-facing surfaces: primary keys in declared order,
    /// then statistics in declared order, formatted when a formatter exists.
    pub async fn pretty_dict(&self) -> StatisticsResult<Vec<(String, Value)>> {
        let mut rows = Vec::new();
        for key in self.definition.scope_kind().primary_keys {
            if let Some(value) = self.query.get(key) {
                rows.push(((*key).to_string(), value.clone()));
            }
        }
        for name in self.definition.statistic_names() {
            let value = self.statistic(name).await?;
            let value = match self.definition.pretty(name, &value) {
                Some(pretty) => Value::String(pretty),
                None => value,
            };
            rows.push(((*name).to_string(), value));
        }
        Ok(rows)
    }
}

/// Statistics instances consulted by one task evaluation, looked up by key.
#[derive(Debug, Clone, Default)]
pub struct StatisticsCollection {
    items: Vec<Arc<Statistics>>,
}

impl StatisticsCollection {
    pub fn new(items: Vec<Arc<Statistics>>) -> Self {
        Self { items }
    }

    pub fn get(&self, key: &str) -> Option<&Arc<Statistics>> {
        self.items.iter().find(|statistics| statistics.key() == key)
    }

    pub fn require(&self, key: &str) -> StatisticsResult<&Arc<Statistics>> {
        self.get(key)
            .ok_or_else(|| StatisticsError::UnknownStatistics(key.to_string()))
    }

    /// Shorthand for `require(key)?.statistic(name)`.
    pub async fn statistic(&self, key: &str, name: &str) -> StatisticsResult<Value> {
        self.require(key)?.statistic(name).await
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Statistics>> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Collection name mapped to query, identifying a task instance.
    pub fn queries(&self) -> Document {
        self.items
            .iter()
            .map(|statistics| {
                (
                    statistics.collection_name().to_string(),
                    Value::Object(statistics.query().to_document()),
                )
            })
            .collect()
    }
}

/// Every persisted statistics document grouped by collection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatisticsSnapshot {
    collections: BTreeMap<String, Vec<Document>>,
}

impl StatisticsSnapshot {
    pub async fn load(store: &dyn DocumentStore) -> StoreResult<Self> {
        let mut collections = BTreeMap::new();
        for name in store.collection_names(STATISTICS_DATABASE).await? {
            let documents = store
                .find(&CollectionRef::statistics(name.clone()), &Document::new())
                .await?;
            collections.insert(name, documents);
        }
        Ok(Self { collections })
    }

    pub fn collection(&self, name: &str) -> &[Document] {
        self.collections
            .get(name)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn collection_names(&self) -> impl Iterator<Item = &str> {
        self.collections.keys().map(String::as_str)
    }

    pub fn total_documents(&self) -> usize {
        self.collections.values().map(Vec::len).sum()
    }

    pub fn to_value(&self) -> Value {
        Value::Object(
            self.collections
                .iter()
                .map(|(name, documents)| {
                    (
                        name.clone(),
                        Value::Array(documents.iter().cloned().map(Value::Object).collect()),
                    )
                })
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nudge_endpoint::{ScopeError, ScopeResult};
    use nudge_store::InMemoryDocumentStore;
    use serde_json::json;
    use std::any::Any;
    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

    static REPOSITORY: ScopeKind =
        ScopeKind::new("forge", "repository", &["organization", "repository"], &[]);
    static PULL_REQUEST: ScopeKind = ScopeKind::new(
        "forge",
        "pull_request",
        &["organization", "repository", "number"],
        &[&REPOSITORY],
    );

    #[derive(Debug)]
    struct PullScope {
        query: ScopeQuery,
        title: String,
    }

    impl EndpointScope for PullScope {
        fn kind(&self) -> &'static ScopeKind {
            &PULL_REQUEST
        }

        fn query(&self) -> ScopeQuery {
            self.query.clone()
        }

        fn parent(&self) -> Option<Arc<dyn EndpointScope>> {
            None
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    #[derive(Default)]
    struct ForgeEndpoint {
        resolutions: AtomicUsize,
    }

    #[async_trait]
    impl Endpoint for ForgeEndpoint {
        fn key(&self) -> &str {
            "forge"
        }

        fn scope_kinds(&self) -> Vec<&'static ScopeKind> {
            vec![&REPOSITORY, &PULL_REQUEST]
        }

        async fn init_by_keys(
            &self,
            kind: &'static ScopeKind,
            query: &ScopeQuery,
        ) -> ScopeResult<Arc<dyn EndpointScope>> {
            self.resolutions.fetch_add(1, Ordering::SeqCst);
            if kind != &PULL_REQUEST {
                return Err(ScopeError::not_found(kind, query));
            }
            Ok(Arc::new(PullScope {
                query: query.clone(),
                title: "[WIP] add parser".to_string(),
            }))
        }
    }

    #[derive(Default)]
    struct PullStatistics {
        comments: AtomicU64,
        computations: AtomicUsize,
    }

    #[async_trait]
    impl StatisticsDefinition for PullStatistics {
        fn key(&self) -> &str {
            "pull_stats"
        }

        fn scope_kind(&self) -> &'static ScopeKind {
            &PULL_REQUEST
        }

        fn statistic_names(&self) -> &'static [&'static str] {
            &["title", "comments", "double_comments"]
        }

        async fn compute(&self, name: &str, statistics: &Statistics) -> anyhow::Result<Value> {
            self.computations.fetch_add(1, Ordering::SeqCst);
            match name {
                "title" => {
                    let scope = statistics.scope().await?;
                    let pull = nudge_endpoint::downcast_scope::<PullScope>(scope.as_ref())
                        .ok_or_else(|| anyhow::anyhow!("unexpected scope type"))?;
                    Ok(json!(pull.title))
                }
                "comments" => Ok(json!(self.comments.load(Ordering::SeqCst))),
                "double_comments" => {
                    let comments = statistics.statistic("comments").await?;
                    Ok(json!(comments.as_u64().unwrap_or_default() * 2))
                }
                other => anyhow::bail!("no getter for {other}"),
            }
        }

        fn pretty(&self, name: &str, value: &Value) -> Option<String> {
            (name == "comments").then(|| format!("{} comments", value))
        }
    }

    struct Fixture {
        definition: Arc<PullStatistics>,
        endpoint: Arc<ForgeEndpoint>,
        store: Arc<InMemoryDocumentStore>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                definition: Arc::new(PullStatistics::default()),
                endpoint: Arc::new(ForgeEndpoint::default()),
                store: Arc::new(InMemoryDocumentStore::new()),
            }
        }

        fn statistics(&self) -> Statistics {
            Statistics::new(
                self.definition.clone(),
                self.endpoint.clone(),
                self.store.clone(),
                &pull_query(),
            )
            .expect("statistics")
        }
    }

    fn pull_query() -> ScopeQuery {
        ScopeQuery::new()
            .with("organization", "octo")
            .with("repository", "hello")
            .with("number", 4)
    }

    #[tokio::test]
    async fn first_collect_inserts_every_statistic() {
        let fixture = Fixture::new();
        fixture.definition.comments.store(3, Ordering::SeqCst);
        let statistics = fixture.statistics();

        let outcome = statistics.collect(false).await.expect("collect");
        assert_eq!(outcome, UpsertOutcome::Inserted);

        let document = statistics.document().await.expect("find").expect("document");
        assert_eq!(
            Value::Object(document),
            json!({
                "organization": "octo",
                "repository": "hello",
                "number": 4,
                "title": "[WIP] add parser",
                "comments": 3,
                "double_comments": 6,
            })
        );
        assert_eq!(fixture.endpoint.resolutions.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn second_collect_without_uncache_changes_nothing() {
        let fixture = Fixture::new();
        let statistics = fixture.statistics();
        statistics.collect(false).await.expect("first collect");
        let before = statistics.document().await.expect("find");
        let computations = fixture.definition.computations.load(Ordering::SeqCst);

        fixture.definition.comments.store(9, Ordering::SeqCst);
        assert_eq!(
            statistics.collect(false).await.expect("second collect"),
            UpsertOutcome::Updated
        );
        assert_eq!(statistics.document().await.expect("find"), before);
        assert_eq!(
            fixture.definition.computations.load(Ordering::SeqCst),
            computations
        );
        let all = fixture
            .store
            .find(&CollectionRef::statistics("pull_stats"), &Document::new())
            .await
            .expect("find all");
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn cached_only_refreshes_just_the_cached_fields() {
        let fixture = Fixture::new();
        fixture.definition.comments.store(1, Ordering::SeqCst);
        fixture.statistics().collect(false).await.expect("seed");

        fixture.definition.comments.store(5, Ordering::SeqCst);
        let statistics = fixture.statistics();
        statistics.statistic("comments").await.expect("comments");
        statistics.collect(true).await.expect("cached only");

        let document = statistics.document().await.expect("find").expect("document");
        assert_eq!(document.get("comments"), Some(&json!(5)));
        assert_eq!(document.get("double_comments"), Some(&json!(2)));

        statistics.collect(false).await.expect("full");
        let document = statistics.document().await.expect("find").expect("document");
        assert_eq!(document.get("double_comments"), Some(&json!(10)));
    }

    #[tokio::test]
    async fn cached_only_is_ignored_on_first_collect() {
        let fixture = Fixture::new();
        let statistics = fixture.statistics();
        statistics.collect(true).await.expect("collect");
        let document = statistics.document().await.expect("find").expect("document");
        assert!(document.contains_key("title"));
        assert!(document.contains_key("double_comments"));
    }

    #[tokio::test]
    async fn uncache_all_forces_fresh_values() {
        let fixture = Fixture::new();
        let statistics = fixture.statistics();
        assert_eq!(statistics.statistic("comments").await.expect("first"), json!(0));
        fixture.definition.comments.store(7, Ordering::SeqCst);
        assert_eq!(statistics.statistic("comments").await.expect("cached"), json!(0));
        assert!(statistics.uncache("comments"));
        assert_eq!(statistics.statistic("comments").await.expect("fresh"), json!(7));
        statistics.uncache_all();
        assert!(!statistics.is_cached("comments"));
    }

    #[tokio::test]
    async fn primary_keys_are_constant_statistics() {
        let fixture = Fixture::new();
        let statistics = fixture.statistics();
        assert_eq!(statistics.statistic("number").await.expect("number"), json!(4));
        assert!(matches!(
            statistics.statistic("reviewers").await,
            Err(StatisticsError::UnknownStatistic { .. })
        ));
    }

    #[tokio::test]
    async fn pretty_dict_orders_keys_then_statistics() {
        let fixture = Fixture::new();
        fixture.definition.comments.store(2, Ordering::SeqCst);
        let rows = fixture.statistics().pretty_dict().await.expect("pretty");
        let names = rows.iter().map(|(name, _)| name.as_str()).collect::<Vec<_>>();
        assert_eq!(
            names,
            vec![
                "organization",
                "repository",
                "number",
                "title",
                "comments",
                "double_comments"
            ]
        );
        assert_eq!(rows[4].1, json!("2 comments"));
        assert_eq!(rows[5].1, json!(4));
    }

    #[tokio::test]
    async fn set_scope_skips_endpoint_resolution_and_checks_identity() {
        let fixture = Fixture::new();
        let scope: Arc<dyn EndpointScope> = Arc::new(PullScope {
            query: pull_query(),
            title: "[RFR] ready".to_string(),
        });
        let statistics = Statistics::for_scope(
            fixture.definition.clone(),
            fixture.endpoint.clone(),
            fixture.store.clone(),
            scope,
        )
        .expect("statistics");
        assert_eq!(statistics.statistic("title").await.expect("title"), json!("[RFR] ready"));
        assert_eq!(fixture.endpoint.resolutions.load(Ordering::SeqCst), 0);

        let other: Arc<dyn EndpointScope> = Arc::new(PullScope {
            query: pull_query().with("number", 5),
            title: String::new(),
        });
        assert!(matches!(
            statistics.set_scope(other),
            Err(StatisticsError::ScopeMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn collection_and_snapshot_expose_persisted_documents() {
        let fixture = Fixture::new();
        let statistics = Arc::new(fixture.statistics());
        statistics.collect(false).await.expect("collect");

        let collection = StatisticsCollection::new(vec![Arc::clone(&statistics)]);
        assert_eq!(
            collection.statistic("pull_stats", "title").await.expect("title"),
            json!("[WIP] add parser")
        );
        assert!(matches!(
            collection.require("other"),
            Err(StatisticsError::UnknownStatistics(_))
        ));
        assert_eq!(
            Value::Object(collection.queries()),
            json!({"pull_stats": {"organization": "octo", "repository": "hello", "number": 4}})
        );

        let snapshot = StatisticsSnapshot::load(fixture.store.as_ref())
            .await
            .expect("snapshot");
        assert_eq!(snapshot.collection_names().collect::<Vec<_>>(), vec!["pull_stats"]);
        assert_eq!(snapshot.collection("pull_stats").len(), 1);
        assert!(snapshot.collection("missing").is_empty());
        assert_eq!(snapshot.total_documents(), 1);
    }

    #[test]
    fn select_scope_matches_kind_in_hierarchy() {
        let definition = PullStatistics::default();
        let pull: Arc<dyn EndpointScope> = Arc::new(PullScope {
            query: pull_query(),
            title: String::new(),
        });
        assert!(select_scope(&definition, &[Arc::clone(&pull)]).is_some());
        assert!(select_scope(&definition, &[]).is_none());
    }
}
