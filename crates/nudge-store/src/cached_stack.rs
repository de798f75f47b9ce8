//! Named, bounded, persisted list of strings.
//!
//! Despite the name, eviction is oldest-first: `push` appends at the tail and
//! drops the head once the bound is reached.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::{json, Value};
use tracing::debug;

use crate::{CollectionRef, Document, DocumentStore, StoreError, StoreResult};

const CACHED_STACKS_COLLECTION: &str = "cached_stacks";

pub struct CachedStack {
    store: Arc<dyn DocumentStore>,
    collection: CollectionRef,
    name: String,
    length: Option<usize>,
    length_exceeded: AtomicBool,
}

impl std::fmt::Debug for CachedStack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedStack")
            .field("name", &self.name)
            .field("length", &self.length)
            .finish()
    }
}

impl CachedStack {
    /// Opens the stack called `name`, creating its document on first use.
    ///
    /// `length = None` leaves the stack unbounded.
    pub async fn open(
        store: Arc<dyn DocumentStore>,
        name: impl Into<String>,
        length: Option<usize>,
    ) -> StoreResult<Self> {
        let stack = Self {
            store,
            collection: CollectionRef::metadata(CACHED_STACKS_COLLECTION),
            name: name.into(),
            length: length.map(|value| value.max(1)),
            length_exceeded: AtomicBool::new(false),
        };
        if stack
            .store
            .find_one(&stack.collection, &stack.filter())
            .await?
            .is_none()
        {
            let mut document = stack.filter();
            document.insert("stack".to_string(), json!([]));
            stack.store.insert(&stack.collection, document).await?;
        }
        Ok(stack)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn length(&self) -> Option<usize> {
        self.length
    }

    fn filter(&self) -> Document {
        let mut filter = Document::new();
        filter.insert("name".to_string(), Value::String(self.name.clone()));
        filter
    }

    /// Returns the persisted items, oldest first.
    pub async fn items(&self) -> StoreResult<Vec<String>> {
        let Some(document) = self.store.find_one(&self.collection, &self.filter()).await? else {
            return Ok(Vec::new());
        };
        match document.get("stack") {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(Value::Array(values)) => values
                .iter()
                .map(|value| match value {
                    Value::String(item) => Ok(item.clone()),
                    other => Err(StoreError::InvalidPersistedValue {
                        field: "stack",
                        value: other.to_string(),
                    }),
                })
                .collect(),
            Some(other) => Err(StoreError::InvalidPersistedValue {
                field: "stack",
                value: other.to_string(),
            }),
        }
    }

    pub async fn len(&self) -> StoreResult<usize> {
        Ok(self.items().await?.len())
    }

    pub async fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.items().await?.is_empty())
    }

    pub async fn contains(&self, item: &str) -> StoreResult<bool> {
        Ok(self.items().await?.iter().any(|existing| existing == item))
    }

    pub async fn get(&self, index: usize) -> StoreResult<Option<String>> {
        Ok(self.items().await?.into_iter().nth(index))
    }

    /// Once the bound has been reached the flag stays set, so later pushes
    /// skip the size comparison.
    fn length_exceeded(&self, current_len: usize) -> bool {
        if self.length_exceeded.load(Ordering::Acquire) {
            return true;
        }
        let exceeded = self.length.is_some_and(|length| current_len >= length);
        if exceeded {
            self.length_exceeded.store(true, Ordering::Release);
        }
        exceeded
    }

    async fn save(&self, items: Vec<String>) -> StoreResult<()> {
        let mut fields = Document::new();
        fields.insert("stack".to_string(), json!(items));
        self.store
            .upsert(&self.collection, &self.filter(), fields)
            .await?;
        Ok(())
    }

    /// Removes and returns the oldest item.
    pub async fn pop_oldest(&self) -> StoreResult<Option<String>> {
        let mut items = self.items().await?;
        if items.is_empty() {
            return Ok(None);
        }
        let removed = items.remove(0);
        self.save(items).await?;
        Ok(Some(removed))
    }

    /// Appends `item` unless already present, evicting the oldest item when
    /// the bound has been reached.
    pub async fn push(&self, item: &str) -> StoreResult<()> {
        let mut items = self.items().await?;
        if items.iter().any(|existing| existing == item) {
            return Ok(());
        }
        if self.length_exceeded(items.len()) {
            while self.length.is_some_and(|length| items.len() >= length) {
                let evicted = items.remove(0);
                debug!(stack = %self.name, evicted = %evicted, "evicted oldest cached stack item");
            }
        }
        items.push(item.to_string());
        self.save(items).await
    }

    pub async fn clear(&self) -> StoreResult<()> {
        self.length_exceeded.store(false, Ordering::Release);
        self.save(Vec::new()).await
    }
}
