//! Relationship (edge) in the property graph.

use chrono::{DateTime, Utc};
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

use super::{NodeId, PropertyMap, Value};

/// Opaque relationship identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct RelId(pub u64);

impl std::fmt::Display for RelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Traversal direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Outgoing,
    Incoming,
    Both,
}

/// A relationship (directed edge) in the property graph.
#[derive(Debug, Clone, PartialEq)]
pub struct Relationship {
    pub id: RelId,
    pub src: NodeId,
    pub dst: NodeId,
    pub rel_type: String,
    pub properties: PropertyMap,
    pub created_at: DateTime<Utc>,
}

impl Relationship {
    pub fn new(id: RelId, src: NodeId, dst: NodeId, rel_type: impl Into<String>) -> Self {
        Self {
            id,
            src,
            dst,
            rel_type: rel_type.into(),
            properties: PropertyMap::new(),
            created_at: Utc::now(),
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }

    /// The "other" end of the relationship from the given node.
    pub fn other_node(&self, from: NodeId) -> Option<NodeId> {
        if from == self.src { Some(self.dst) }
        else if from == self.dst { Some(self.src) }
        else { None }
    }

    /// Stable string identifier: `"rel:<id>"`.
    pub fn element_id(&self) -> String {
        format!("rel:{}", self.id)
    }

    /// Wire shape:
    /// `{ identity, type, startNodeElementId, endNodeElementId, properties, elementId }`.
    pub fn wire_json(&self) -> serde_json::Value {
        serde_json::json!({
            "identity": self.id.0,
            "type": self.rel_type,
            "startNodeElementId": format!("node:{}", self.src),
            "endNodeElementId": format!("node:{}", self.dst),
            "properties": self.properties.iter()
                .map(|(k, v)| (k.clone(), v.to_json()))
                .collect::<serde_json::Map<String, serde_json::Value>>(),
            "elementId": self.element_id(),
        })
    }
}

impl Serialize for Relationship {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(6))?;
        map.serialize_entry("identity", &self.id.0)?;
        map.serialize_entry("type", &self.rel_type)?;
        map.serialize_entry("startNodeElementId", &format!("node:{}", self.src))?;
        map.serialize_entry("endNodeElementId", &format!("node:{}", self.dst))?;
        map.serialize_entry("properties", &self.properties)?;
        map.serialize_entry("elementId", &self.element_id())?;
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_other_node() {
        let rel = Relationship::new(RelId(1), NodeId(10), NodeId(20), "KNOWS");
        assert_eq!(rel.other_node(NodeId(10)), Some(NodeId(20)));
        assert_eq!(rel.other_node(NodeId(20)), Some(NodeId(10)));
        assert_eq!(rel.other_node(NodeId(99)), None);
    }

    #[test]
    fn test_wire_shape() {
        let rel = Relationship::new(RelId(4), NodeId(1), NodeId(2), "KNOWS");
        let json = rel.wire_json();
        assert_eq!(json["identity"], 4);
        assert_eq!(json["type"], "KNOWS");
        assert_eq!(json["startNodeElementId"], "node:1");
        assert_eq!(json["endNodeElementId"], "node:2");
        assert_eq!(json["elementId"], "rel:4");
    }
}
