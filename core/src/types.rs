//! Loosely-typed records exchanged with the remote API.
//!
//! Entities stay open JSON maps; the only fields the client interprets are
//! the identifier (`id` or `ID`) and the `removed` marker.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A remote record.
pub type Entity = serde_json::Map<String, Value>;

/// Identifier of an entity, accepting both spellings the API uses.
///
/// Numbers are rendered in decimal; empty strings do not count.
pub fn entity_id(entity: &Entity) -> Option<String> {
    ["id", "ID"].iter().find_map(|key| match entity.get(*key)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

/// Whether the entity carries a non-empty `removed` marker.
pub fn is_removed(entity: &Entity) -> bool {
    match entity.get("removed") {
        None | Some(Value::Null) => false,
        Some(Value::Bool(flag)) => *flag,
        Some(Value::String(s)) => !s.is_empty() && !s.starts_with("0000-00-00"),
        Some(Value::Number(n)) => n.as_f64().is_some_and(|v| v != 0.0),
        Some(Value::Array(items)) => !items.is_empty(),
        Some(Value::Object(map)) => !map.is_empty(),
    }
}

/// Ordered query parameters. Keys may repeat, as in `fields[]=a&fields[]=b`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Parameters(Vec<(String, String)>);

impl Parameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.push(key, value);
        self
    }

    pub fn push(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.push((key.into(), value.into()));
    }

    /// Replace every occurrence of `key` with a single value.
    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        self.0.retain(|(k, _)| k != key);
        self.0.push((key.to_string(), value.into()));
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Parameters {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}
