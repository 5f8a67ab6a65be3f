use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::CoreError;

/// Key/value fragment produced by a single step
pub type ContextFragment = Map<String, Value>;

/// Accumulating key/value mapping shared by the steps of one execution
///
/// Keys are unique; merging a fragment overwrites existing keys so later
/// writes always win.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionContext(Map<String, Value>);

impl ExecutionContext {
    /// Create an empty context
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Build a context from a JSON value; `null` yields an empty context
    pub fn from_value(value: Value) -> Result<Self, CoreError> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            Value::Null => Ok(Self::new()),
            other => Err(CoreError::ValidationError(format!(
                "Execution context must be a JSON object, got: {}",
                other
            ))),
        }
    }

    /// Insert a single key
    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.0.insert(key.into(), value)
    }

    /// Merge a fragment into the context, later keys win
    pub fn merge(&mut self, fragment: ContextFragment) {
        for (key, value) in fragment {
            self.0.insert(key, value);
        }
    }

    /// Look up a key
    #[inline]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Check whether a key is present
    #[inline]
    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Number of keys
    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the context holds no keys
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Borrow the underlying map
    #[inline]
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Snapshot the context as a JSON object
    pub fn to_value(&self) -> Value {
        Value::Object(self.0.clone())
    }

    /// Take ownership of the context as a JSON object
    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

impl From<ContextFragment> for ExecutionContext {
    fn from(map: ContextFragment) -> Self {
        Self(map)
    }
}
