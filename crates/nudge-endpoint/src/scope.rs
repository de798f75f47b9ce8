use std::any::Any;
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::{ScopeError, ScopeResult};

/// Static descriptor of one scope type served by an endpoint.
///
/// Kinds are declared as `static` items so parents can reference each other
/// and form a DAG (a repository may belong to an organization or a user).
/// Two kinds are the same when they share endpoint key and name.
pub struct ScopeKind {
    pub endpoint: &'static str,
    pub name: &'static str,
    pub primary_keys: &'static [&'static str],
    pub parents: &'static [&'static ScopeKind],
}

impl ScopeKind {
    pub const fn new(
        endpoint: &'static str,
        name: &'static str,
        primary_keys: &'static [&'static str],
        parents: &'static [&'static ScopeKind],
    ) -> Self {
        Self {
            endpoint,
            name,
            primary_keys,
            parents,
        }
    }

    /// True when the kind has exactly one logical instance.
    pub fn is_singleton(&self) -> bool {
        self.primary_keys.is_empty()
    }

    /// Self followed by the closure over every declared parent, breadth-first
    /// and without duplicates.
    pub fn static_hierarchy(&'static self) -> Vec<&'static ScopeKind> {
        let mut ordered = Vec::new();
        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([self]);
        while let Some(kind) = queue.pop_front() {
            if !seen.insert((kind.endpoint, kind.name)) {
                continue;
            }
            ordered.push(kind);
            queue.extend(kind.parents.iter().copied());
        }
        ordered
    }

    /// True when `other` is this kind or one of its static ancestors.
    pub fn is_within(&'static self, other: &ScopeKind) -> bool {
        self.static_hierarchy().iter().any(|kind| *kind == other)
    }
}

impl PartialEq for ScopeKind {
    fn eq(&self, other: &Self) -> bool {
        self.endpoint == other.endpoint && self.name == other.name
    }
}

impl Eq for ScopeKind {}

impl Hash for ScopeKind {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.endpoint.hash(state);
        self.name.hash(state);
    }
}

impl fmt::Debug for ScopeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopeKind")
            .field("endpoint", &self.endpoint)
            .field("name", &self.name)
            .field("primary_keys", &self.primary_keys)
            .field(
                "parents",
                &self.parents.iter().map(|kind| kind.name).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl fmt::Display for ScopeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.endpoint, self.name)
    }
}

/// Primary-key values identifying one scope instance.
///
/// Equality is by value: two queries with the same keys and values address
/// the same logical entity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScopeQuery(BTreeMap<String, Value>);

impl ScopeQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    /// Extracts the primary keys of `kind` from an event payload or document.
    /// A null value counts as missing.
    pub fn from_data(kind: &ScopeKind, data: &Map<String, Value>) -> ScopeResult<Self> {
        let mut query = Self::new();
        for key in kind.primary_keys {
            let value = data
                .get(*key)
                .filter(|value| !value.is_null())
                .ok_or_else(|| ScopeError::MissingKey {
                kind: kind.to_string(),
                key: (*key).to_string(),
            })?;
            query.insert(*key, value.clone());
        }
        Ok(query)
    }

    /// Narrows this query to the primary keys of `kind` (usually an ancestor).
    pub fn project(&self, kind: &ScopeKind) -> ScopeResult<Self> {
        let mut query = Self::new();
        for key in kind.primary_keys {
            let value = self.0.get(*key).ok_or_else(|| ScopeError::MissingKey {
                kind: kind.to_string(),
                key: (*key).to_string(),
            })?;
            query.insert(*key, value.clone());
        }
        Ok(query)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.0.get(key).and_then(Value::as_u64)
    }

    /// Returns a string primary key or a typed error naming the offending key.
    pub fn require_str(&self, kind: &ScopeKind, key: &str) -> ScopeResult<&str> {
        match self.0.get(key) {
            None => Err(ScopeError::MissingKey {
                kind: kind.to_string(),
                key: key.to_string(),
            }),
            Some(Value::String(value)) => Ok(value),
            Some(other) => Err(ScopeError::InvalidKey {
                kind: kind.to_string(),
                key: key.to_string(),
                reason: format!("expected string, got {other}"),
            }),
        }
    }

    /// Returns an unsigned integer primary key, accepting numeric strings.
    pub fn require_u64(&self, kind: &ScopeKind, key: &str) -> ScopeResult<u64> {
        let invalid = |value: &Value| ScopeError::InvalidKey {
            kind: kind.to_string(),
            key: key.to_string(),
            reason: format!("expected unsigned integer, got {value}"),
        };
        match self.0.get(key) {
            None => Err(ScopeError::MissingKey {
                kind: kind.to_string(),
                key: key.to_string(),
            }),
            Some(Value::Number(number)) => number
                .as_u64()
                .ok_or_else(|| invalid(&Value::Number(number.clone()))),
            Some(Value::String(raw)) => raw
                .trim()
                .parse::<u64>()
                .map_err(|_| invalid(&Value::String(raw.clone()))),
            Some(other) => Err(invalid(other)),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The query as a store filter document.
    pub fn to_document(&self) -> Map<String, Value> {
        self.0
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }
}

impl fmt::Display for ScopeQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered = self
            .0
            .iter()
            .map(|(key, value)| match value {
                Value::String(text) => format!("{key}={text}"),
                other => format!("{key}={other}"),
            })
            .collect::<Vec<_>>()
            .join(", ");
        write!(f, "{{{rendered}}}")
    }
}

/// A live, typed entity of an endpoint.
///
/// Instances are short-lived: they are resolved on demand, used for one
/// dispatch and dropped.
pub trait EndpointScope: Send + Sync + fmt::Debug {
    fn kind(&self) -> &'static ScopeKind;

    /// Primary-key values rebuilt from the instance's own fields.
    fn query(&self) -> ScopeQuery;

    /// The single runtime parent, `None` for root scopes.
    fn parent(&self) -> Option<Arc<dyn EndpointScope>>;

    fn as_any(&self) -> &dyn Any;
}

/// Self followed by every ancestor reachable through `parent()`.
pub fn hierarchy(scope: Arc<dyn EndpointScope>) -> Vec<Arc<dyn EndpointScope>> {
    let mut chain = Vec::new();
    let mut current = Some(scope);
    while let Some(scope) = current {
        current = scope.parent();
        chain.push(scope);
    }
    chain
}

pub fn downcast_scope<T: EndpointScope + 'static>(scope: &dyn EndpointScope) -> Option<&T> {
    scope.as_any().downcast_ref::<T>()
}
