//! Normalized configuration trees.
//!
//! Classification works on a generic tree rather than the typed configuration, so the
//! diff is independent of the schema's Rust representation. Trees are built by
//! serializing a typed configuration; `null` entries are dropped so an unset
//! optional field is simply absent.

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{KestrelError, Result};

/// A node of a configuration tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// A boolean scalar.
    Bool(bool),
    /// An integer scalar.
    Integer(i64),
    /// A floating point scalar.
    Float(f64),
    /// A string scalar.
    String(String),
    /// An ordered list.
    List(Vec<Value>),
    /// A key-ordered map.
    Map(BTreeMap<String, Value>),
}

impl Value {
    /// Converts a JSON value, dropping `null` entries.
    ///
    /// Returns `None` when the value itself is `null`.
    #[must_use]
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Null => None,
            serde_json::Value::Bool(b) => Some(Self::Bool(*b)),
            serde_json::Value::Number(n) => Some(
                n.as_i64()
                    .map_or_else(|| Self::Float(n.as_f64().unwrap_or(f64::NAN)), Self::Integer),
            ),
            serde_json::Value::String(s) => Some(Self::String(s.clone())),
            serde_json::Value::Array(items) => {
                Some(Self::List(items.iter().filter_map(Self::from_json).collect()))
            }
            serde_json::Value::Object(map) => Some(Self::Map(
                map.iter()
                    .filter_map(|(k, v)| Self::from_json(v).map(|v| (k.clone(), v)))
                    .collect(),
            )),
        }
    }

    /// Converts back to JSON.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Integer(i) => serde_json::Value::from(*i),
            Self::Float(f) => serde_json::Value::from(*f),
            Self::String(s) => serde_json::Value::String(s.clone()),
            Self::List(items) => serde_json::Value::Array(items.iter().map(Self::to_json).collect()),
            Self::Map(map) => serde_json::Value::Object(
                map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
        }
    }

    /// Returns true for scalars.
    #[must_use]
    pub const fn is_scalar(&self) -> bool {
        !matches!(self, Self::List(_) | Self::Map(_))
    }

    /// Returns the scalar rendered as a string, for identity keys.
    #[must_use]
    pub fn as_identity(&self) -> Option<String> {
        match self {
            Self::String(s) => Some(s.clone()),
            Self::Integer(i) => Some(i.to_string()),
            _ => None,
        }
    }

    /// Returns the map entries, if this is a map.
    #[must_use]
    pub const fn as_map(&self) -> Option<&BTreeMap<String, Self>> {
        match self {
            Self::Map(map) => Some(map),
            _ => None,
        }
    }
}

impl Serialize for Value {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Integer(i) => write!(f, "{i}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::String(s) => write!(f, "{s}"),
            Self::List(_) | Self::Map(_) => write!(f, "{}", self.to_json()),
        }
    }
}

/// An immutable configuration tree with a map at its root.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigTree {
    root: Value,
}

impl ConfigTree {
    /// Builds a tree from any serializable configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration does not serialize to a map.
    pub fn from_config<T: Serialize>(config: &T) -> Result<Self> {
        let json = serde_json::to_value(config)
            .map_err(|e| KestrelError::internal(format!("Failed to serialize configuration: {e}")))?;

        match Value::from_json(&json) {
            Some(root @ Value::Map(_)) => Ok(Self { root }),
            _ => Err(KestrelError::internal("Configuration must serialize to a map")),
        }
    }

    /// Builds a tree from a YAML document.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is invalid or not a map.
    pub fn from_yaml(content: &str) -> Result<Self> {
        let json: serde_json::Value = serde_yaml::from_str(content)
            .map_err(|e| KestrelError::internal(format!("Failed to parse tree: {e}")))?;
        Self::from_config(&json)
    }

    /// Returns the root value.
    #[must_use]
    pub const fn root(&self) -> &Value {
        &self.root
    }

    /// Renders the tree as canonical JSON (keys sorted).
    #[must_use]
    pub fn canonical_json(&self) -> String {
        self.root.to_json().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nulls_are_dropped() {
        let tree = ConfigTree::from_yaml("a: 1\nb: null\nc: [1, null, 2]\n").expect("tree");
        let map = tree.root().as_map().expect("map");

        assert_eq!(map.get("a"), Some(&Value::Integer(1)));
        assert!(!map.contains_key("b"));
        assert_eq!(map.get("c"), Some(&Value::List(vec![Value::Integer(1), Value::Integer(2)])));
    }

    #[test]
    fn test_scalar_root_rejected() {
        assert!(ConfigTree::from_yaml("42").is_err());
    }

    #[test]
    fn test_canonical_json_is_key_ordered() {
        let a = ConfigTree::from_yaml("b: 1\na: 2\n").expect("tree");
        let b = ConfigTree::from_yaml("a: 2\nb: 1\n").expect("tree");

        assert_eq!(a.canonical_json(), b.canonical_json());
        assert_eq!(a.canonical_json(), r#"{"a":2,"b":1}"#);
    }

    #[test]
    fn test_identity_rendering() {
        assert_eq!(Value::String("w1".into()).as_identity(), Some("w1".to_string()));
        assert_eq!(Value::Integer(3).as_identity(), Some("3".to_string()));
        assert_eq!(Value::Bool(true).as_identity(), None);
    }
}
