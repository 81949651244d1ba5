//! Canonical query keys
//!
//! A key is an ordered list of JSON segments, e.g.
//! `["images", "page", {"query": "cats", "page": 2}]`. Two keys are equal
//! when their canonical serialization is equal:
//! - object members are ordered by name, so property order never matters
//! - `null` object members are dropped, so "absent" and "null" agree
//! - array order is preserved

use crate::error::Result;
use serde::Serialize;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Immutable, canonicalised cache key
#[derive(Clone)]
pub struct QueryKey {
    segments: Arc<[Value]>,
    canonical: Arc<str>,
}

impl QueryKey {
    /// Build a key from raw segments
    pub fn new(segments: Vec<Value>) -> Self {
        let segments: Vec<Value> = segments.into_iter().map(normalize).collect();
        let canonical = canonical_string(&Value::Array(segments.clone()));

        Self {
            segments: segments.into(),
            canonical: canonical.into(),
        }
    }

    /// `[resource_tag, params]`
    pub fn encode<P: Serialize + ?Sized>(resource_tag: &str, params: &P) -> Result<Self> {
        let params = serde_json::to_value(params)?;
        Ok(Self::new(vec![Value::String(resource_tag.to_string()), params]))
    }

    /// Start building a key rooted at `resource_tag`
    pub fn builder(resource_tag: impl Into<String>) -> QueryKeyBuilder {
        QueryKeyBuilder::new(resource_tag)
    }

    pub fn segments(&self) -> &[Value] {
        &self.segments
    }

    /// First segment when it is a string
    pub fn resource(&self) -> Option<&str> {
        self.segments.first().and_then(Value::as_str)
    }

    /// Canonical serialization; the identity of the key
    pub fn canonical(&self) -> &str {
        &self.canonical
    }

    /// Segment-wise prefix test: `["images"]` is a prefix of every image key
    pub fn starts_with(&self, prefix: &QueryKey) -> bool {
        prefix.segments.len() <= self.segments.len()
            && prefix
                .segments
                .iter()
                .zip(self.segments.iter())
                .all(|(a, b)| a == b)
    }
}

impl PartialEq for QueryKey {
    fn eq(&self, other: &Self) -> bool {
        self.canonical == other.canonical
    }
}

impl Eq for QueryKey {}

impl Hash for QueryKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.canonical.hash(state);
    }
}

impl PartialOrd for QueryKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueryKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.canonical.cmp(&other.canonical)
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical)
    }
}

impl fmt::Debug for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "QueryKey({})", self.canonical)
    }
}

impl Serialize for QueryKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.segments().serialize(serializer)
    }
}

impl From<&str> for QueryKey {
    fn from(tag: &str) -> Self {
        QueryKey::new(vec![Value::String(tag.to_string())])
    }
}

/// Builder for hierarchical keys
#[derive(Debug, Clone)]
pub struct QueryKeyBuilder {
    segments: Vec<Value>,
}

impl QueryKeyBuilder {
    pub fn new(resource_tag: impl Into<String>) -> Self {
        Self {
            segments: vec![Value::String(resource_tag.into())],
        }
    }

    /// Append a literal segment
    pub fn segment(mut self, segment: impl Into<Value>) -> Self {
        self.segments.push(segment.into());
        self
    }

    /// Append a serialised parameter object
    pub fn params<P: Serialize + ?Sized>(mut self, params: &P) -> Result<Self> {
        self.segments.push(serde_json::to_value(params)?);
        Ok(self)
    }

    pub fn build(self) -> QueryKey {
        QueryKey::new(self.segments)
    }
}

fn normalize(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k, normalize(v)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(normalize).collect()),
        other => other,
    }
}

// Written by hand so member order does not depend on serde_json's map features.
fn canonical_string(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let sorted: BTreeMap<&String, &Value> = map.iter().collect();
            out.push('{');
            for (i, (name, member)) in sorted.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(name.clone()).to_string());
                out.push(':');
                write_canonical(member, out);
            }
            out.push('}');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}
