use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// EvidenceValue
// ---------------------------------------------------------------------------

/// A single piece of supporting evidence attached to a discovered issue.
///
/// The discovery core never introspects these values; they are carried
/// through to the AI assessment layer verbatim. The untagged representation
/// means evidence serialises as plain JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EvidenceValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Array(Vec<EvidenceValue>),
    Object(BTreeMap<String, EvidenceValue>),
}

impl From<bool> for EvidenceValue {
    fn from(v: bool) -> Self {
        EvidenceValue::Bool(v)
    }
}

impl From<i64> for EvidenceValue {
    fn from(v: i64) -> Self {
        EvidenceValue::Int(v)
    }
}

impl From<usize> for EvidenceValue {
    fn from(v: usize) -> Self {
        EvidenceValue::Int(v as i64)
    }
}

impl From<u32> for EvidenceValue {
    fn from(v: u32) -> Self {
        EvidenceValue::Int(i64::from(v))
    }
}

impl From<f64> for EvidenceValue {
    fn from(v: f64) -> Self {
        EvidenceValue::Float(v)
    }
}

impl From<&str> for EvidenceValue {
    fn from(v: &str) -> Self {
        EvidenceValue::String(v.to_string())
    }
}

impl From<String> for EvidenceValue {
    fn from(v: String) -> Self {
        EvidenceValue::String(v)
    }
}

impl<T: Into<EvidenceValue>> From<Vec<T>> for EvidenceValue {
    fn from(v: Vec<T>) -> Self {
        EvidenceValue::Array(v.into_iter().map(Into::into).collect())
    }
}

impl EvidenceValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            EvidenceValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            EvidenceValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            EvidenceValue::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Evidence
// ---------------------------------------------------------------------------

/// Opaque key/value evidence map carried by a [`crate::DiscoveredIssue`].
///
/// Keys are sorted so serialised evidence is stable across runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Evidence(BTreeMap<String, EvidenceValue>);

impl Evidence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<EvidenceValue>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&EvidenceValue> {
        self.0.get(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &EvidenceValue)> {
        self.0.iter()
    }
}

impl FromIterator<(String, EvidenceValue)> for Evidence {
    fn from_iter<I: IntoIterator<Item = (String, EvidenceValue)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_and_get() {
        let mut ev = Evidence::new();
        ev.insert("line_count", 412usize);
        ev.insert("has_tests", false);
        ev.insert("path", "src/lib.rs");

        assert_eq!(ev.len(), 3);
        assert_eq!(ev.get("line_count").and_then(EvidenceValue::as_int), Some(412));
        assert_eq!(ev.get("has_tests").and_then(EvidenceValue::as_bool), Some(false));
        assert_eq!(ev.get("path").and_then(EvidenceValue::as_str), Some("src/lib.rs"));
        assert!(ev.get("missing").is_none());
    }

    #[test]
    fn serialises_as_plain_json() {
        let mut ev = Evidence::new();
        ev.insert("count", 3usize);
        ev.insert("files", vec!["a.rs", "b.rs"]);

        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["count"], 3);
        assert_eq!(json["files"][1], "b.rs");
    }

    #[test]
    fn round_trips_nested_objects() {
        let mut inner = BTreeMap::new();
        inner.insert("nested".to_string(), EvidenceValue::Int(1));
        let mut ev = Evidence::new();
        ev.insert("obj", EvidenceValue::Object(inner));
        ev.insert("ratio", 0.5);

        let json = serde_json::to_string(&ev).unwrap();
        let back: Evidence = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ev);
    }
}
