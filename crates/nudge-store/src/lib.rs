//! Document store abstractions, in-memory and SQLite backends, and the
//! persisted bounded ledger used for delivered-event de-duplication.
//!
//! Every persisted piece of nudgebot state (statistics documents, task
//! records, ledgers, scheduler checkpoints) is a JSON object stored in a
//! named `(database, collection)` pair and addressed by field-match filters.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use thiserror::Error;
use tokio::sync::RwLock;

mod cached_stack;
mod sqlite;

pub use cached_stack::CachedStack;
pub use sqlite::SqliteDocumentStore;

/// Database holding one collection per statistics group.
pub const STATISTICS_DATABASE: &str = "statistics";
/// Database holding one collection per conditional task.
pub const TASKS_DATABASE: &str = "tasks";
/// Database holding ledgers and scheduler checkpoints.
pub const METADATA_DATABASE: &str = "metadata";

/// A stored document: a JSON object with top-level fields.
pub type Document = Map<String, Value>;

/// Result type for document store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors returned by store implementations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("persisted document in '{collection}' is not a JSON object")]
    InvalidDocument { collection: String },
    #[error("invalid persisted value for '{field}': {value}")]
    InvalidPersistedValue { field: &'static str, value: String },
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Address of one collection inside one database.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CollectionRef {
    pub database: String,
    pub collection: String,
}

impl CollectionRef {
    pub fn new(database: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            collection: collection.into(),
        }
    }

    pub fn statistics(collection: impl Into<String>) -> Self {
        Self::new(STATISTICS_DATABASE, collection)
    }

    pub fn tasks(collection: impl Into<String>) -> Self {
        Self::new(TASKS_DATABASE, collection)
    }

    pub fn metadata(collection: impl Into<String>) -> Self {
        Self::new(METADATA_DATABASE, collection)
    }
}

impl std::fmt::Display for CollectionRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.database, self.collection)
    }
}

/// Whether an upsert created a new document or updated an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
}

/// Document-oriented persistence used by the statistics and task engines.
///
/// Uniqueness is enforced by callers: the engines always look a document up
/// by its logical query before deciding between update and insert, so at most
/// one document exists per query.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Returns the first document (in insertion order) matching `filter`.
    async fn find_one(
        &self,
        collection: &CollectionRef,
        filter: &Document,
    ) -> StoreResult<Option<Document>>;

    /// Returns every document matching `filter`, in insertion order.
    async fn find(&self, collection: &CollectionRef, filter: &Document)
        -> StoreResult<Vec<Document>>;

    async fn insert(&self, collection: &CollectionRef, document: Document) -> StoreResult<()>;

    /// Replaces the given top-level `fields` on the first document matching
    /// `filter`. Returns `false` when nothing matched.
    async fn update(
        &self,
        collection: &CollectionRef,
        filter: &Document,
        fields: Document,
    ) -> StoreResult<bool>;

    /// Updates the matching document or inserts `filter` merged with `fields`.
    async fn upsert(
        &self,
        collection: &CollectionRef,
        filter: &Document,
        fields: Document,
    ) -> StoreResult<UpsertOutcome> {
        if self.update(collection, filter, fields.clone()).await? {
            return Ok(UpsertOutcome::Updated);
        }
        let mut document = filter.clone();
        merge_fields(&mut document, fields);
        self.insert(collection, document).await?;
        Ok(UpsertOutcome::Inserted)
    }

    /// Lists collection names that currently hold documents in `database`.
    async fn collection_names(&self, database: &str) -> StoreResult<Vec<String>>;

    /// Removes every document of `database`.
    async fn drop_database(&self, database: &str) -> StoreResult<()>;
}

/// Returns true when every field of `filter` is present in `document` with an equal value.
pub fn matches_filter(document: &Document, filter: &Document) -> bool {
    filter
        .iter()
        .all(|(key, expected)| document.get(key) == Some(expected))
}

/// Overwrites top-level fields of `document` with `fields`.
pub fn merge_fields(document: &mut Document, fields: Document) {
    for (key, value) in fields {
        document.insert(key, value);
    }
}

/// Converts a JSON value into a document, rejecting non-objects.
pub fn into_document(value: Value, collection: &CollectionRef) -> StoreResult<Document> {
    match value {
        Value::Object(map) => Ok(map),
        _ => Err(StoreError::InvalidDocument {
            collection: collection.to_string(),
        }),
    }
}

/// Volatile store backend used in tests and when no store path is configured.
#[derive(Debug, Default)]
pub struct InMemoryDocumentStore {
    inner: RwLock<BTreeMap<CollectionRef, Vec<Document>>>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn find_one(
        &self,
        collection: &CollectionRef,
        filter: &Document,
    ) -> StoreResult<Option<Document>> {
        let inner = self.inner.read().await;
        Ok(inner.get(collection).and_then(|documents| {
            documents
                .iter()
                .find(|document| matches_filter(document, filter))
                .cloned()
        }))
    }

    async fn find(
        &self,
        collection: &CollectionRef,
        filter: &Document,
    ) -> StoreResult<Vec<Document>> {
        let inner = self.inner.read().await;
        Ok(inner
            .get(collection)
            .map(|documents| {
                documents
                    .iter()
                    .filter(|document| matches_filter(document, filter))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn insert(&self, collection: &CollectionRef, document: Document) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        inner.entry(collection.clone()).or_default().push(document);
        Ok(())
    }

    async fn update(
        &self,
        collection: &CollectionRef,
        filter: &Document,
        fields: Document,
    ) -> StoreResult<bool> {
        let mut inner = self.inner.write().await;
        let Some(documents) = inner.get_mut(collection) else {
            return Ok(false);
        };
        let Some(document) = documents
            .iter_mut()
            .find(|document| matches_filter(document, filter))
        else {
            return Ok(false);
        };
        merge_fields(document, fields);
        Ok(true)
    }

    async fn collection_names(&self, database: &str) -> StoreResult<Vec<String>> {
        let inner = self.inner.read().await;
        Ok(inner
            .iter()
            .filter(|(key, documents)| key.database == database && !documents.is_empty())
            .map(|(key, _)| key.collection.clone())
            .collect())
    }

    async fn drop_database(&self, database: &str) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        inner.retain(|key, _| key.database != database);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{
        matches_filter, CollectionRef, Document, DocumentStore, InMemoryDocumentStore,
        UpsertOutcome,
    };
    use serde_json::json;

    fn doc(value: serde_json::Value) -> Document {
        value.as_object().cloned().expect("object literal")
    }

    #[test]
    fn filter_requires_every_field_to_match() {
        let document = doc(json!({"organization": "octo", "number": 7, "title": "x"}));
        assert!(matches_filter(&document, &doc(json!({"number": 7}))));
        assert!(matches_filter(&document, &Document::new()));
        assert!(!matches_filter(&document, &doc(json!({"number": "7"}))));
        assert!(!matches_filter(&document, &doc(json!({"missing": 1}))));
    }

    #[tokio::test]
    async fn upsert_inserts_once_then_updates_top_level_fields() {
        let store = InMemoryDocumentStore::new();
        let collection = CollectionRef::statistics("github_pull_request");
        let query = doc(json!({"organization": "octo", "repository": "hello", "number": 1}));

        let first = store
            .upsert(&collection, &query, doc(json!({"title": "a", "state": "open"})))
            .await
            .expect("insert");
        assert_eq!(first, UpsertOutcome::Inserted);

        let second = store
            .upsert(&collection, &query, doc(json!({"title": "b"})))
            .await
            .expect("update");
        assert_eq!(second, UpsertOutcome::Updated);

        let rows = store.find(&collection, &query).await.expect("find");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["title"], json!("b"));
        assert_eq!(rows[0]["state"], json!("open"));
        assert_eq!(rows[0]["number"], json!(1));
    }

    #[tokio::test]
    async fn collection_names_and_drop_are_scoped_to_database() {
        let store = InMemoryDocumentStore::new();
        store
            .insert(&CollectionRef::statistics("a"), doc(json!({"k": 1})))
            .await
            .expect("insert a");
        store
            .insert(&CollectionRef::tasks("t"), doc(json!({"k": 1})))
            .await
            .expect("insert t");

        assert_eq!(
            store.collection_names("statistics").await.expect("names"),
            vec!["a".to_string()]
        );
        store.drop_database("statistics").await.expect("drop");
        assert!(store
            .collection_names("statistics")
            .await
            .expect("names")
            .is_empty());
        assert_eq!(
            store.collection_names("tasks").await.expect("names"),
            vec!["t".to_string()]
        );
    }
}
