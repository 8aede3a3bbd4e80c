//! The dynamic payload attached to every record.
//!
//! The source this engine is modeled on lets a payload be any Python dict,
//! which in practice meant the occasional class instance sneaking in where a
//! scalar was expected. We close that door: a payload is a map from string
//! keys to a small closed value type, and that's all it will ever be.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// The value sum type a payload entry may hold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PayloadValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    String(String),
    Null,
}

impl PayloadValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            PayloadValue::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            PayloadValue::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PayloadValue::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl From<&str> for PayloadValue {
    fn from(value: &str) -> Self {
        PayloadValue::String(value.to_owned())
    }
}

impl From<String> for PayloadValue {
    fn from(value: String) -> Self {
        PayloadValue::String(value)
    }
}

impl From<i64> for PayloadValue {
    fn from(value: i64) -> Self {
        PayloadValue::Int(value)
    }
}

impl From<bool> for PayloadValue {
    fn from(value: bool) -> Self {
        PayloadValue::Bool(value)
    }
}

/// Schemaless payload, always carrying at minimum `path`, `line_start`,
/// `line_end`, `language`, `type`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Payload(pub BTreeMap<String, PayloadValue>);

impl Payload {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<PayloadValue>) -> &mut Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&PayloadValue> {
        self.0.get(key)
    }

    pub fn path(&self) -> Option<&str> {
        self.get("path").and_then(PayloadValue::as_str)
    }

    pub fn line_start(&self) -> Option<i64> {
        self.get("line_start").and_then(PayloadValue::as_i64)
    }

    pub fn line_end(&self) -> Option<i64> {
        self.get("line_end").and_then(PayloadValue::as_i64)
    }

    pub fn language(&self) -> Option<&str> {
        self.get("language").and_then(PayloadValue::as_str)
    }

    pub fn record_type(&self) -> Option<&str> {
        self.get("type").and_then(PayloadValue::as_str)
    }

    pub fn branch(&self) -> Option<&str> {
        self.get("branch").and_then(PayloadValue::as_str)
    }

    pub fn commit_hash(&self) -> Option<&str> {
        self.get("commit_hash").and_then(PayloadValue::as_str)
    }

    pub fn chunk_index(&self) -> Option<i64> {
        self.get("chunk_index").and_then(PayloadValue::as_i64)
    }

    pub fn git_blob_hash(&self) -> Option<&str> {
        self.get("git_blob_hash").and_then(PayloadValue::as_str)
    }

    pub fn indexed_with_uncommitted_changes(&self) -> bool {
        self.get("indexed_with_uncommitted_changes")
            .and_then(PayloadValue::as_bool)
            .unwrap_or(false)
    }

    pub fn chunk_text(&self) -> Option<&str> {
        self.get("chunk_text").and_then(PayloadValue::as_str)
    }

    /// Substring/equality match used by `delete_by_filter` and search-time
    /// `filter_conditions`. `None` on a key means "field absent, no match".
    pub fn matches(&self, filter: &FilterCondition) -> bool {
        let Some(value) = self.get(&filter.field) else {
            return false;
        };
        match (&filter.op, value) {
            (FilterOp::Equals(expected), PayloadValue::String(actual)) => actual == expected,
            (FilterOp::Equals(expected), PayloadValue::Int(actual)) => {
                expected.parse::<i64>().map(|e| e == *actual).unwrap_or(false)
            }
            (FilterOp::Equals(expected), PayloadValue::Bool(actual)) => {
                expected.parse::<bool>().map(|e| e == *actual).unwrap_or(false)
            }
            (FilterOp::Contains(needle), PayloadValue::String(actual)) => actual.contains(needle),
            _ => false,
        }
    }
}

/// A single field predicate. `delete_by_filter`/search filters are built out
/// of a conjunction of these.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterCondition {
    pub field: String,
    pub op: FilterOp,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterOp {
    Equals(String),
    Contains(String),
}

/// A conjunction of filter conditions; all must match.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filter(pub Vec<FilterCondition>);

impl Filter {
    pub fn matches(&self, payload: &Payload) -> bool {
        self.0.iter().all(|cond| payload.matches(cond))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equals_filter_matches_string_field() {
        let mut payload = Payload::new();
        payload.insert("language", "rust");
        let filter = Filter(vec![FilterCondition {
            field: "language".into(),
            op: FilterOp::Equals("rust".into()),
        }]);
        assert!(filter.matches(&payload));
    }

    #[test]
    fn contains_filter_on_missing_field_does_not_match() {
        let payload = Payload::new();
        let filter = Filter(vec![FilterCondition {
            field: "path".into(),
            op: FilterOp::Contains("src/".into()),
        }]);
        assert!(!filter.matches(&payload));
    }

    #[test]
    fn payload_value_serializes_untagged() {
        let mut payload = Payload::new();
        payload.insert("line_start", 1i64);
        payload.insert("path", "x.py");
        let json = serde_json::to_string(&payload).unwrap();
        assert!(json.contains("\"line_start\":1"));
        assert!(json.contains("\"path\":\"x.py\""));
    }
}
