use std::collections::HashSet;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::ScopeKind;

/// One classified occurrence of platform activity tied to a scope kind.
#[derive(Debug, Clone)]
pub struct Event {
    id: String,
    kind: &'static ScopeKind,
    name: String,
    data: Map<String, Value>,
    artifacts: Map<String, Value>,
}

impl Event {
    pub fn new(
        id: impl Into<String>,
        kind: &'static ScopeKind,
        name: impl Into<String>,
        data: Map<String, Value>,
    ) -> Self {
        Self {
            id: id.into(),
            kind,
            name: name.into(),
            data,
            artifacts: Map::new(),
        }
    }

    pub fn with_artifacts(mut self, artifacts: Map<String, Value>) -> Self {
        self.artifacts = artifacts;
        self
    }

    pub fn endpoint(&self) -> &'static str {
        self.kind.endpoint
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> &'static ScopeKind {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn data(&self) -> &Map<String, Value> {
        &self.data
    }

    pub fn artifacts(&self) -> &Map<String, Value> {
        &self.artifacts
    }

    pub fn data_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(Value::as_str)
    }

    /// De-duplication token. Not qualified by scope kind.
    pub fn hash(&self) -> String {
        Self::hash_for(self.endpoint(), &self.id)
    }

    /// The token an event with this id would carry, usable before classifying.
    pub fn hash_for(endpoint: &str, id: &str) -> String {
        format!("{endpoint}::{id}")
    }
}

/// Snapshot of event hashes a source must not produce again: currently
/// buffered or already handed to a consumer.
#[derive(Debug, Clone, Default)]
pub struct KnownEvents {
    buffered: HashSet<String>,
    delivered: HashSet<String>,
}

impl KnownEvents {
    pub fn new(
        buffered: impl IntoIterator<Item = String>,
        delivered: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            buffered: buffered.into_iter().collect(),
            delivered: delivered.into_iter().collect(),
        }
    }

    pub fn is_buffered(&self, hash: &str) -> bool {
        self.buffered.contains(hash)
    }

    pub fn is_delivered(&self, hash: &str) -> bool {
        self.delivered.contains(hash)
    }

    pub fn contains(&self, hash: &str) -> bool {
        self.is_buffered(hash) || self.is_delivered(hash)
    }

    pub fn contains_id(&self, endpoint: &str, id: &str) -> bool {
        self.contains(&Event::hash_for(endpoint, id))
    }
}

/// Raw activity feed of one endpoint, classified into typed events.
///
/// Feeds may repeat or reorder items; the events factory de-duplicates
/// whatever is returned here, `known` only lets a source stop scanning early.
#[async_trait]
pub trait EventSource: Send + Sync {
    fn endpoint_key(&self) -> &str;

    async fn build_events(&self, known: &KnownEvents) -> anyhow::Result<Vec<Event>>;
}
