//! (label, property) value indexes.
//!
//! Each index maps a property value to the set of node ids bearing the
//! indexed label and that value. Values are keyed by their canonical JSON
//! encoding so that floats, lists, and maps index consistently.

use std::collections::{BTreeSet, HashMap};

use serde::Serialize;

use crate::model::{NodeId, Value};

/// Definition of a `(label, property)` index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct IndexDef {
    pub label: String,
    pub property: String,
}

impl IndexDef {
    pub fn new(label: impl Into<String>, property: impl Into<String>) -> Self {
        Self { label: label.into(), property: property.into() }
    }
}

/// One value index: canonical value key → node ids.
#[derive(Debug, Clone, Default)]
pub struct PropertyIndex {
    entries: HashMap<String, BTreeSet<NodeId>>,
}

impl PropertyIndex {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(value: &Value) -> String {
        // Canonical JSON; object keys come out sorted via the Value→JSON map.
        serde_json::to_string(&value.to_json()).unwrap_or_default()
    }

    pub fn insert(&mut self, value: &Value, id: NodeId) {
        self.entries.entry(Self::key(value)).or_default().insert(id);
    }

    pub fn remove(&mut self, value: &Value, id: NodeId) {
        let key = Self::key(value);
        if let Some(ids) = self.entries.get_mut(&key) {
            ids.remove(&id);
            if ids.is_empty() {
                self.entries.remove(&key);
            }
        }
    }

    pub fn lookup(&self, value: &Value) -> Vec<NodeId> {
        self.entries
            .get(&Self::key(value))
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of distinct indexed values.
    pub fn value_count(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_lookup_remove() {
        let mut idx = PropertyIndex::new();
        idx.insert(&Value::String("Ada".into()), NodeId(1));
        idx.insert(&Value::String("Ada".into()), NodeId(2));
        idx.insert(&Value::String("Bob".into()), NodeId(3));

        assert_eq!(idx.lookup(&Value::String("Ada".into())), vec![NodeId(1), NodeId(2)]);
        assert_eq!(idx.lookup(&Value::String("Bob".into())), vec![NodeId(3)]);
        assert!(idx.lookup(&Value::String("Eve".into())).is_empty());

        idx.remove(&Value::String("Ada".into()), NodeId(1));
        assert_eq!(idx.lookup(&Value::String("Ada".into())), vec![NodeId(2)]);
        idx.remove(&Value::String("Ada".into()), NodeId(2));
        idx.remove(&Value::String("Bob".into()), NodeId(3));
        assert!(idx.is_empty());
    }

    #[test]
    fn test_int_and_float_keys_distinct() {
        let mut idx = PropertyIndex::new();
        idx.insert(&Value::Int(1), NodeId(1));
        idx.insert(&Value::Float(1.5), NodeId(2));
        assert_eq!(idx.lookup(&Value::Int(1)), vec![NodeId(1)]);
        assert_eq!(idx.lookup(&Value::Float(1.5)), vec![NodeId(2)]);
    }
}
