//! Endpoint abstractions shared by every platform integration.
//!
//! An endpoint (code host, chat network) exposes typed scopes arranged in a
//! parent hierarchy, turns raw platform activity into de-duplicated events,
//! and can enumerate its live scopes for a full poll.

use nudge_store::StoreError;
use thiserror::Error;

mod endpoint;
mod event;
mod factory;
mod scope;

pub use endpoint::{init_by_event, Endpoint, EndpointRegistry, ScopesCollector};
pub use event::{Event, EventSource, KnownEvents};
pub use factory::{
    delivered_ledger_name, EventsFactory, EventsFactoryConfig, DELIVERED_LEDGER_NAME_PREFIX,
};
pub use scope::{downcast_scope, hierarchy, EndpointScope, ScopeKind, ScopeQuery};

/// Result type for scope resolution.
pub type ScopeResult<T> = Result<T, ScopeError>;

/// Result type for event production and consumption.
pub type EventsResult<T> = Result<T, EventsError>;

/// Errors raised while resolving scopes from primary keys or events.
#[derive(Debug, Error)]
pub enum ScopeError {
    #[error("{kind} not found for {query}")]
    NotFound { kind: String, query: String },
    #[error("missing primary key '{key}' for scope {kind}")]
    MissingKey { kind: String, key: String },
    #[error("invalid primary key '{key}' for scope {kind}: {reason}")]
    InvalidKey {
        kind: String,
        key: String,
        reason: String,
    },
    #[error("scope {kind} is not served by endpoint '{endpoint}'")]
    UnsupportedKind { endpoint: String, kind: String },
    #[error("transient endpoint failure: {0}")]
    Transient(String),
    #[error(transparent)]
    Endpoint(#[from] anyhow::Error),
}

impl ScopeError {
    pub fn not_found(kind: &ScopeKind, query: &ScopeQuery) -> Self {
        Self::NotFound {
            kind: kind.to_string(),
            query: query.to_string(),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Errors raised by event sources and the events factory.
#[derive(Debug, Error)]
pub enum EventsError {
    #[error("could not classify raw activity: {0}")]
    Unclassified(String),
    #[error(transparent)]
    Scope(#[from] ScopeError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("event source failed: {0:#}")]
    Source(anyhow::Error),
}

/// Errors raised while building the endpoint registry.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("endpoint '{0}' is registered twice")]
    Duplicate(String),
    #[error("endpoint '{0}' is not registered")]
    Unknown(String),
}
