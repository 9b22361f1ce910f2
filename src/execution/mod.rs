//! Query execution engine.
//!
//! Evaluates parsed queries clause-by-clause against a [`GraphStore`],
//! threading a row set through the pipeline and accumulating a mutation
//! summary.
//!
//! [`GraphStore`]: crate::storage::GraphStore

pub mod eval;
pub mod functions;
pub mod matcher;
pub mod interpreter;

use std::collections::HashMap;

use serde::Serialize;

use crate::model::{Node, Relationship, Value};
use crate::{Error, Result};

pub use interpreter::execute_query;

/// A row of bound variables flowing through the clause pipeline.
pub type Row = HashMap<String, Value>;

/// Query execution result: key-ordered records plus a mutation summary.
#[derive(Debug, Clone, Serialize)]
pub struct QueryResult {
    pub keys: Vec<String>,
    pub records: Vec<Vec<Value>>,
    pub summary: Summary,
}

impl QueryResult {
    /// Result with no projection (pure write queries).
    pub fn empty(summary: Summary) -> Self {
        Self { keys: Vec::new(), records: Vec::new(), summary }
    }

    /// Raw value at (row, key).
    pub fn value(&self, row: usize, key: &str) -> Option<&Value> {
        let col = self.keys.iter().position(|k| k == key)?;
        self.records.get(row)?.get(col)
    }

    /// Typed value at (row, key).
    pub fn get<T: FromValue>(&self, row: usize, key: &str) -> Result<T> {
        let val = self
            .value(row, key)
            .ok_or_else(|| Error::NotFound(format!("Column '{key}' in row {row}")))?;
        T::from_value(val)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Per-statement mutation counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub nodes_created: u64,
    pub nodes_deleted: u64,
    pub relationships_created: u64,
    pub relationships_deleted: u64,
    pub properties_set: u64,
    pub labels_added: u64,
    pub labels_removed: u64,
}

impl Summary {
    pub fn contains_updates(&self) -> bool {
        *self != Summary::default()
    }
}

/// Convert from Value to concrete types.
pub trait FromValue: Sized {
    fn from_value(val: &Value) -> Result<Self>;
}

impl FromValue for Node {
    fn from_value(val: &Value) -> Result<Self> {
        match val {
            Value::Node(n) => Ok(*n.clone()),
            _ => Err(Error::TypeError {
                expected: "Node".into(),
                got: val.type_name().into(),
            }),
        }
    }
}

impl FromValue for Relationship {
    fn from_value(val: &Value) -> Result<Self> {
        match val {
            Value::Relationship(r) => Ok(*r.clone()),
            _ => Err(Error::TypeError {
                expected: "Relationship".into(),
                got: val.type_name().into(),
            }),
        }
    }
}

impl FromValue for String {
    fn from_value(val: &Value) -> Result<Self> {
        match val {
            Value::String(s) => Ok(s.clone()),
            _ => Err(Error::TypeError {
                expected: "String".into(),
                got: val.type_name().into(),
            }),
        }
    }
}

impl FromValue for i64 {
    fn from_value(val: &Value) -> Result<Self> {
        val.as_int().ok_or_else(|| Error::TypeError {
            expected: "Integer".into(),
            got: val.type_name().into(),
        })
    }
}

impl FromValue for f64 {
    fn from_value(val: &Value) -> Result<Self> {
        val.as_float().ok_or_else(|| Error::TypeError {
            expected: "Float".into(),
            got: val.type_name().into(),
        })
    }
}

impl FromValue for bool {
    fn from_value(val: &Value) -> Result<Self> {
        match val {
            Value::Bool(b) => Ok(*b),
            _ => Err(Error::TypeError {
                expected: "Boolean".into(),
                got: val.type_name().into(),
            }),
        }
    }
}

impl FromValue for Value {
    fn from_value(val: &Value) -> Result<Self> {
        Ok(val.clone())
    }
}

impl FromValue for Vec<Value> {
    fn from_value(val: &Value) -> Result<Self> {
        match val {
            Value::List(l) => Ok(l.clone()),
            _ => Err(Error::TypeError {
                expected: "List".into(),
                got: val.type_name().into(),
            }),
        }
    }
}

impl FromValue for HashMap<String, Value> {
    fn from_value(val: &Value) -> Result<Self> {
        match val {
            Value::Map(m) => Ok(m.clone()),
            _ => Err(Error::TypeError {
                expected: "Map".into(),
                got: val.type_name().into(),
            }),
        }
    }
}
