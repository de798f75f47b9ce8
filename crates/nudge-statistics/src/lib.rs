//! Statistics engine: named, lazily computed, individually cached facts about
//! one scope instance, persisted as one document per scope query.

use nudge_endpoint::ScopeError;
use nudge_store::StoreError;
use thiserror::Error;

mod statistics;
mod toggle_cache;

pub use statistics::{
    select_scope, Statistics, StatisticsCollection, StatisticsDefinition, StatisticsSnapshot,
};
pub use toggle_cache::ToggleCache;

pub type StatisticsResult<T> = Result<T, StatisticsError>;

#[derive(Debug, Error)]
pub enum StatisticsError {
    #[error("statistics '{key}' declares no statistic named '{name}'")]
    UnknownStatistic { key: String, name: String },
    #[error("no statistics with key '{0}' in this collection")]
    UnknownStatistics(String),
    #[error("statistic '{key}.{name}' failed: {source:#}")]
    Getter {
        key: String,
        name: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("statistics '{key}' expects scope {expected}, got {actual}")]
    ScopeMismatch {
        key: String,
        expected: String,
        actual: String,
    },
    #[error(transparent)]
    Scope(#[from] ScopeError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl StatisticsError {
    /// A transient endpoint failure, raised directly or from inside a getter.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Scope(error) => error.is_transient(),
            Self::Getter { source, .. } => is_transient_failure(&**source),
            _ => false,
        }
    }
}

/// Walks the cause chain of `error` looking for a transient endpoint failure.
pub fn is_transient_failure(error: &(dyn std::error::Error + 'static)) -> bool {
    std::iter::successors(Some(error), |cause| cause.source()).any(|cause| {
        cause
            .downcast_ref::<ScopeError>()
            .is_some_and(ScopeError::is_transient)
            || cause
                .downcast_ref::<StatisticsError>()
                .is_some_and(StatisticsError::is_transient)
    })
}
