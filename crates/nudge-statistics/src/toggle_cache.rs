use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Mutex, PoisonError};

use serde_json::Value;

/// Per-instance cache of named values that stay cached until invalidated.
///
/// The lock is never held while a value is computed, so a computation may
/// read other entries of the same cache.
#[derive(Debug, Default)]
pub struct ToggleCache {
    values: Mutex<BTreeMap<String, Value>>,
}

impl ToggleCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, Value>> {
        self.values.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        self.lock().get(name).cloned()
    }

    pub fn is_cached(&self, name: &str) -> bool {
        self.lock().contains_key(name)
    }

    pub fn insert(&self, name: impl Into<String>, value: Value) {
        self.lock().insert(name.into(), value);
    }

    /// Returns the cached value or evaluates `compute` once and caches its
    /// result. Failed computations are not cached.
    pub async fn get_or_compute<F, Fut, E>(&self, name: &str, compute: F) -> Result<Value, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value, E>>,
    {
        if let Some(value) = self.get(name) {
            return Ok(value);
        }
        let value = compute().await?;
        self.insert(name, value.clone());
        Ok(value)
    }

    /// Drops one cached value. Returns whether it was cached.
    pub fn invalidate(&self, name: &str) -> bool {
        self.lock().remove(name).is_some()
    }

    pub fn invalidate_all(&self) {
        self.lock().clear();
    }

    pub fn cached_names(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::ToggleCache;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn getter_runs_once_until_invalidated() {
        let cache = ToggleCache::new();
        let counter = AtomicUsize::new(0);
        let calls = &counter;
        let compute = move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<Value, String>(json!(42))
        };

        assert_eq!(cache.get_or_compute("answer", compute).await, Ok(json!(42)));
        assert_eq!(cache.get_or_compute("answer", compute).await, Ok(json!(42)));
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        assert!(cache.invalidate("answer"));
        assert!(!cache.invalidate("answer"));
        cache.get_or_compute("answer", compute).await.expect("value");
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failures_are_not_cached() {
        let cache = ToggleCache::new();
        let result = cache
            .get_or_compute("broken", || async { Err::<Value, _>("upstream down") })
            .await;
        assert_eq!(result, Err("upstream down"));
        assert!(!cache.is_cached("broken"));
    }

    #[test]
    fn invalidate_all_clears_every_name() {
        let cache = ToggleCache::new();
        cache.insert("b", json!(2));
        cache.insert("a", json!(1));
        assert_eq!(cache.cached_names(), vec!["a", "b"]);
        cache.invalidate_all();
        assert!(cache.cached_names().is_empty());
        assert_eq!(cache.get("a"), None);
    }
}
