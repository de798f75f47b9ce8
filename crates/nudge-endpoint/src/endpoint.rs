use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    EndpointScope, Event, RegistryError, ScopeError, ScopeKind, ScopeQuery, ScopeResult,
};

/// One external platform integration.
#[async_trait]
pub trait Endpoint: Send + Sync {
    fn key(&self) -> &str;

    fn scope_kinds(&self) -> Vec<&'static ScopeKind>;

    /// Resolves a live scope from its primary keys alone, fetching whatever
    /// parents are required. Fails with [`ScopeError::NotFound`] when the
    /// platform has no such entity.
    async fn init_by_keys(
        &self,
        kind: &'static ScopeKind,
        query: &ScopeQuery,
    ) -> ScopeResult<Arc<dyn EndpointScope>>;

    fn supports(&self, kind: &ScopeKind) -> bool {
        self.scope_kinds().iter().any(|candidate| *candidate == kind)
    }
}

/// Resolves the scope an event concerns. Every primary key of the event's
/// kind must be present in its data.
pub async fn init_by_event(
    endpoint: &dyn Endpoint,
    event: &Event,
) -> ScopeResult<Arc<dyn EndpointScope>> {
    if event.endpoint() != endpoint.key() || !endpoint.supports(event.kind()) {
        return Err(ScopeError::UnsupportedKind {
            endpoint: endpoint.key().to_string(),
            kind: event.kind().to_string(),
        });
    }
    let query = ScopeQuery::from_data(event.kind(), event.data())?;
    endpoint.init_by_keys(event.kind(), &query).await
}

/// Enumerates every live scope of an endpoint for a full poll.
#[async_trait]
pub trait ScopesCollector: Send + Sync {
    async fn collect_all(&self) -> ScopeResult<Vec<Arc<dyn EndpointScope>>>;
}

/// Explicit map of endpoint key to its single constructed instance, built
/// once at startup and handed to every component that needs it.
#[derive(Clone, Default)]
pub struct EndpointRegistry {
    endpoints: BTreeMap<String, Arc<dyn Endpoint>>,
}

impl std::fmt::Debug for EndpointRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EndpointRegistry")
            .field("endpoints", &self.endpoints.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl EndpointRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, endpoint: Arc<dyn Endpoint>) -> Result<(), RegistryError> {
        let key = endpoint.key().to_string();
        if self.endpoints.contains_key(&key) {
            return Err(RegistryError::Duplicate(key));
        }
        self.endpoints.insert(key, endpoint);
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<Arc<dyn Endpoint>> {
        self.endpoints.get(key).cloned()
    }

    pub fn require(&self, key: &str) -> Result<Arc<dyn Endpoint>, RegistryError> {
        self.get(key)
            .ok_or_else(|| RegistryError::Unknown(key.to_string()))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.endpoints.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.endpoints.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }
}
