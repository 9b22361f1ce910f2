//! # In-memory property graph store
//!
//! The interpreter's only backend. Plain HashMap collections, monotonically
//! increasing ids, adjacency lists per direction, a label index, and optional
//! `(label, property)` value indexes.
//!
//! Ownership rule: the store owns every record. Reads return clones, so
//! callers never observe later mutations through returned values; writes go
//! through `&mut self` methods which keep the indexes synchronized before the
//! mutation becomes observable.

pub mod index;

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use chrono::Utc;
use tracing::debug;

use crate::model::{Direction, Node, NodeId, PropertyMap, RelId, Relationship, Value};
use crate::{Error, Result};

pub use index::{IndexDef, PropertyIndex};

/// In-memory property graph.
#[derive(Debug, Default)]
pub struct GraphStore {
    nodes: HashMap<NodeId, Node>,
    relationships: HashMap<RelId, Relationship>,
    /// node id → outgoing relationship ids, in creation order
    outgoing: HashMap<NodeId, Vec<RelId>>,
    /// node id → incoming relationship ids, in creation order
    incoming: HashMap<NodeId, Vec<RelId>>,
    /// label → node ids bearing it
    label_index: HashMap<String, BTreeSet<NodeId>>,
    /// registered (label, property) value indexes
    indexes: BTreeMap<IndexDef, PropertyIndex>,
    next_node_id: u64,
    next_rel_id: u64,
}

impl GraphStore {
    pub fn new() -> Self {
        Self {
            next_node_id: 1,
            next_rel_id: 1,
            ..Self::default()
        }
    }

    // ========================================================================
    // Node CRUD
    // ========================================================================

    /// Create a node with the given labels and properties.
    pub fn create_node(&mut self, labels: Vec<String>, properties: PropertyMap) -> NodeId {
        let id = NodeId(self.next_node_id);
        self.next_node_id += 1;

        let now = Utc::now();
        let node = Node {
            id,
            labels,
            properties,
            created_at: now,
            updated_at: now,
        };

        for label in &node.labels {
            self.label_index.entry(label.clone()).or_default().insert(id);
        }
        for (def, idx) in self.indexes.iter_mut() {
            if node.labels.iter().any(|l| *l == def.label) {
                if let Some(value) = node.properties.get(&def.property) {
                    idx.insert(value, id);
                }
            }
        }

        debug!(node = %id, labels = ?node.labels, "create node");
        self.nodes.insert(id, node);
        self.outgoing.insert(id, Vec::new());
        self.incoming.insert(id, Vec::new());
        id
    }

    /// Fetch a node by id. Returns a deep copy.
    pub fn node(&self, id: NodeId) -> Option<Node> {
        self.nodes.get(&id).cloned()
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut Node> {
        self.nodes
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("Node {id}")))
    }

    /// Replace a node's property map.
    pub fn update_node(&mut self, id: NodeId, properties: PropertyMap) -> Result<()> {
        let node = self
            .nodes
            .get(&id)
            .ok_or_else(|| Error::NotFound(format!("Node {id}")))?
            .clone();

        // De-index the old values before the new map becomes observable.
        for (def, idx) in self.indexes.iter_mut() {
            if node.labels.iter().any(|l| *l == def.label) {
                if let Some(old) = node.properties.get(&def.property) {
                    idx.remove(old, id);
                }
                if let Some(new) = properties.get(&def.property) {
                    idx.insert(new, id);
                }
            }
        }

        let node = self.node_mut(id)?;
        node.properties = properties;
        node.updated_at = Utc::now();
        Ok(())
    }

    /// Delete a node, cascading to all incident relationships.
    ///
    /// Returns the ids of the relationships removed by the cascade.
    pub fn delete_node(&mut self, id: NodeId) -> Result<Vec<RelId>> {
        let node = self
            .nodes
            .get(&id)
            .ok_or_else(|| Error::NotFound(format!("Node {id}")))?
            .clone();

        let mut incident: Vec<RelId> = Vec::new();
        incident.extend(self.outgoing.get(&id).cloned().unwrap_or_default());
        incident.extend(self.incoming.get(&id).cloned().unwrap_or_default());
        incident.sort();
        incident.dedup();
        for rid in &incident {
            self.delete_relationship(*rid)?;
        }

        for (def, idx) in self.indexes.iter_mut() {
            if node.labels.iter().any(|l| *l == def.label) {
                if let Some(value) = node.properties.get(&def.property) {
                    idx.remove(value, id);
                }
            }
        }
        for label in &node.labels {
            if let Some(ids) = self.label_index.get_mut(label) {
                ids.remove(&id);
                if ids.is_empty() {
                    self.label_index.remove(label);
                }
            }
        }

        debug!(node = %id, cascaded = incident.len(), "delete node");
        self.nodes.remove(&id);
        self.outgoing.remove(&id);
        self.incoming.remove(&id);
        Ok(incident)
    }

    /// Set a single property on a node (upsert).
    pub fn set_node_property(&mut self, id: NodeId, key: &str, value: Value) -> Result<()> {
        let node = self
            .nodes
            .get(&id)
            .ok_or_else(|| Error::NotFound(format!("Node {id}")))?;
        let labels = node.labels.clone();
        let old = node.properties.get(key).cloned();

        for (def, idx) in self.indexes.iter_mut() {
            if def.property == key && labels.iter().any(|l| *l == def.label) {
                if let Some(old) = &old {
                    idx.remove(old, id);
                }
                idx.insert(&value, id);
            }
        }

        let node = self.node_mut(id)?;
        node.properties.insert(key.to_string(), value);
        node.updated_at = Utc::now();
        Ok(())
    }

    /// Remove a property from a node.
    pub fn remove_node_property(&mut self, id: NodeId, key: &str) -> Result<()> {
        let node = self
            .nodes
            .get(&id)
            .ok_or_else(|| Error::NotFound(format!("Node {id}")))?;
        let labels = node.labels.clone();
        let old = node.properties.get(key).cloned();

        if let Some(old) = &old {
            for (def, idx) in self.indexes.iter_mut() {
                if def.property == key && labels.iter().any(|l| *l == def.label) {
                    idx.remove(old, id);
                }
            }
        }

        let node = self.node_mut(id)?;
        node.properties.remove(key);
        node.updated_at = Utc::now();
        Ok(())
    }

    // ========================================================================
    // Label management
    // ========================================================================

    pub fn has_label(&self, id: NodeId, label: &str) -> bool {
        self.nodes.get(&id).is_some_and(|n| n.has_label(label))
    }

    /// Add a label to a node. Idempotent; returns true if the label was new.
    pub fn add_label(&mut self, id: NodeId, label: &str) -> Result<bool> {
        let node = self
            .nodes
            .get(&id)
            .ok_or_else(|| Error::NotFound(format!("Node {id}")))?;
        if node.has_label(label) {
            return Ok(false);
        }
        let properties = node.properties.clone();

        for (def, idx) in self.indexes.iter_mut() {
            if def.label == label {
                if let Some(value) = properties.get(&def.property) {
                    idx.insert(value, id);
                }
            }
        }
        self.label_index.entry(label.to_string()).or_default().insert(id);

        let node = self.node_mut(id)?;
        node.labels.push(label.to_string());
        node.updated_at = Utc::now();
        Ok(true)
    }

    /// Remove a label from a node. Returns true if the label was present.
    ///
    /// Index entries are removed against the old label set before the label
    /// list changes.
    pub fn remove_label(&mut self, id: NodeId, label: &str) -> Result<bool> {
        let node = self
            .nodes
            .get(&id)
            .ok_or_else(|| Error::NotFound(format!("Node {id}")))?;
        if !node.has_label(label) {
            return Ok(false);
        }
        let properties = node.properties.clone();

        for (def, idx) in self.indexes.iter_mut() {
            if def.label == label {
                if let Some(value) = properties.get(&def.property) {
                    idx.remove(value, id);
                }
            }
        }
        if let Some(ids) = self.label_index.get_mut(label) {
            ids.remove(&id);
            if ids.is_empty() {
                self.label_index.remove(label);
            }
        }

        let node = self.node_mut(id)?;
        node.labels.retain(|l| l != label);
        node.updated_at = Utc::now();
        Ok(true)
    }

    /// All distinct labels, sorted.
    pub fn all_labels(&self) -> Vec<String> {
        let mut labels: Vec<String> = self.label_index.keys().cloned().collect();
        labels.sort();
        labels
    }

    pub fn node_count_by_label(&self, label: &str) -> usize {
        self.label_index.get(label).map_or(0, |ids| ids.len())
    }

    // ========================================================================
    // Relationship CRUD
    // ========================================================================

    /// Create a relationship. Both endpoints must exist.
    pub fn create_relationship(
        &mut self,
        rel_type: &str,
        start: NodeId,
        end: NodeId,
        properties: PropertyMap,
    ) -> Result<RelId> {
        if !self.nodes.contains_key(&start) {
            return Err(Error::NotFound(format!("Start node {start}")));
        }
        if !self.nodes.contains_key(&end) {
            return Err(Error::NotFound(format!("End node {end}")));
        }

        let id = RelId(self.next_rel_id);
        self.next_rel_id += 1;

        let rel = Relationship {
            id,
            src: start,
            dst: end,
            rel_type: rel_type.to_string(),
            properties,
            created_at: Utc::now(),
        };

        debug!(rel = %id, rel_type, %start, %end, "create relationship");
        self.relationships.insert(id, rel);
        self.outgoing.entry(start).or_default().push(id);
        self.incoming.entry(end).or_default().push(id);
        Ok(id)
    }

    /// Fetch a relationship by id. Returns a deep copy.
    pub fn relationship(&self, id: RelId) -> Option<Relationship> {
        self.relationships.get(&id).cloned()
    }

    /// Replace a relationship's property map.
    pub fn update_relationship(&mut self, id: RelId, properties: PropertyMap) -> Result<()> {
        let rel = self
            .relationships
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("Relationship {id}")))?;
        rel.properties = properties;
        Ok(())
    }

    /// Set a single property on a relationship (upsert).
    pub fn set_relationship_property(&mut self, id: RelId, key: &str, value: Value) -> Result<()> {
        let rel = self
            .relationships
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("Relationship {id}")))?;
        rel.properties.insert(key.to_string(), value);
        Ok(())
    }

    /// Remove a property from a relationship.
    pub fn remove_relationship_property(&mut self, id: RelId, key: &str) -> Result<()> {
        let rel = self
            .relationships
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("Relationship {id}")))?;
        rel.properties.remove(key);
        Ok(())
    }

    /// Delete a relationship. No cascade.
    pub fn delete_relationship(&mut self, id: RelId) -> Result<()> {
        let rel = self
            .relationships
            .remove(&id)
            .ok_or_else(|| Error::NotFound(format!("Relationship {id}")))?;
        if let Some(rels) = self.outgoing.get_mut(&rel.src) {
            rels.retain(|rid| *rid != id);
        }
        if let Some(rels) = self.incoming.get_mut(&rel.dst) {
            rels.retain(|rid| *rid != id);
        }
        debug!(rel = %id, "delete relationship");
        Ok(())
    }

    // ========================================================================
    // Lookup / traversal
    // ========================================================================

    /// All nodes, in id order.
    pub fn all_nodes(&self) -> Vec<Node> {
        let mut nodes: Vec<Node> = self.nodes.values().cloned().collect();
        nodes.sort_by_key(|n| n.id);
        nodes
    }

    /// All nodes with the given label, in id order.
    pub fn find_nodes_by_label(&self, label: &str) -> Vec<Node> {
        self.label_index
            .get(label)
            .map(|ids| ids.iter().filter_map(|id| self.nodes.get(id).cloned()).collect())
            .unwrap_or_default()
    }

    /// Nodes bearing every one of the given labels.
    pub fn find_nodes_by_labels(&self, labels: &[String]) -> Vec<Node> {
        match labels.first() {
            None => self.all_nodes(),
            Some(first) => self
                .find_nodes_by_label(first)
                .into_iter()
                .filter(|n| labels.iter().all(|l| n.has_label(l)))
                .collect(),
        }
    }

    /// All relationships of the given type, in id order.
    pub fn find_relationships_by_type(&self, rel_type: &str) -> Vec<Relationship> {
        let mut rels: Vec<Relationship> = self
            .relationships
            .values()
            .filter(|r| r.rel_type == rel_type)
            .cloned()
            .collect();
        rels.sort_by_key(|r| r.id);
        rels
    }

    /// Nodes with the label whose property equals the value. Uses the
    /// `(label, property)` index when one is registered, otherwise scans.
    pub fn find_nodes_by_label_and_property(
        &self,
        label: &str,
        property: &str,
        value: &Value,
    ) -> Vec<Node> {
        let def = IndexDef::new(label, property);
        if let Some(idx) = self.indexes.get(&def) {
            return idx
                .lookup(value)
                .into_iter()
                .filter_map(|id| self.nodes.get(&id).cloned())
                .collect();
        }
        self.find_nodes_by_label(label)
            .into_iter()
            .filter(|n| n.properties.get(property) == Some(value))
            .collect()
    }

    /// Outgoing relationships of a node, in creation order.
    pub fn outgoing(&self, id: NodeId) -> Vec<Relationship> {
        self.outgoing
            .get(&id)
            .map(|rids| rids.iter().filter_map(|rid| self.relationships.get(rid).cloned()).collect())
            .unwrap_or_default()
    }

    /// Incoming relationships of a node, in creation order.
    pub fn incoming(&self, id: NodeId) -> Vec<Relationship> {
        self.incoming
            .get(&id)
            .map(|rids| rids.iter().filter_map(|rid| self.relationships.get(rid).cloned()).collect())
            .unwrap_or_default()
    }

    /// Relationships of a node in the given direction. `Both` unions the two
    /// adjacency lists, deduplicating self-loops.
    pub fn relationships_of(&self, id: NodeId, direction: Direction) -> Vec<Relationship> {
        match direction {
            Direction::Outgoing => self.outgoing(id),
            Direction::Incoming => self.incoming(id),
            Direction::Both => {
                let mut rels = self.outgoing(id);
                let mut seen: HashSet<RelId> = rels.iter().map(|r| r.id).collect();
                for rel in self.incoming(id) {
                    if seen.insert(rel.id) {
                        rels.push(rel);
                    }
                }
                rels
            }
        }
    }

    /// Relationships from `start` to `end` (directed).
    pub fn between(&self, start: NodeId, end: NodeId) -> Vec<Relationship> {
        self.outgoing(start)
            .into_iter()
            .filter(|r| r.dst == end)
            .collect()
    }

    // ========================================================================
    // Indexes
    // ========================================================================

    /// Register a `(label, property)` index. Idempotent; back-fills from
    /// existing nodes.
    pub fn create_index(&mut self, label: &str, property: &str) {
        let def = IndexDef::new(label, property);
        if self.indexes.contains_key(&def) {
            return;
        }
        let mut idx = PropertyIndex::new();
        for node in self.find_nodes_by_label(label) {
            if let Some(value) = node.properties.get(property) {
                idx.insert(value, node.id);
            }
        }
        debug!(label, property, "create index");
        self.indexes.insert(def, idx);
    }

    /// Remove an index definition and its map.
    pub fn drop_index(&mut self, label: &str, property: &str) {
        self.indexes.remove(&IndexDef::new(label, property));
    }

    /// Registered index definitions, sorted.
    pub fn indexes(&self) -> Vec<IndexDef> {
        self.indexes.keys().cloned().collect()
    }

    // ========================================================================
    // Merge
    // ========================================================================

    /// Match-or-create: find the first node with all `labels` and every
    /// `match_props` entry equal; otherwise create one from
    /// `match_props ∪ create_props`.
    ///
    /// When a match is found and `update_props` is given, those properties are
    /// merged into the matched node.
    pub fn merge_node(
        &mut self,
        labels: Vec<String>,
        match_props: PropertyMap,
        create_props: PropertyMap,
        update_props: Option<PropertyMap>,
    ) -> Result<(Node, bool)> {
        let existing = self
            .find_nodes_by_labels(&labels)
            .into_iter()
            .find(|n| match_props.iter().all(|(k, v)| n.properties.get(k) == Some(v)));

        if let Some(node) = existing {
            if let Some(updates) = update_props {
                for (key, value) in updates {
                    self.set_node_property(node.id, &key, value)?;
                }
            }
            let node = self
                .node(node.id)
                .ok_or_else(|| Error::NotFound(format!("Node {}", node.id)))?;
            return Ok((node, false));
        }

        let mut properties = match_props;
        properties.extend(create_props);
        let id = self.create_node(labels, properties);
        let node = self
            .node(id)
            .ok_or_else(|| Error::NotFound(format!("Node {id}")))?;
        Ok((node, true))
    }

    // ========================================================================
    // Introspection
    // ========================================================================

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn relationship_count(&self) -> usize {
        self.relationships.len()
    }

    /// All distinct relationship types, sorted.
    pub fn all_relationship_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self
            .relationships
            .values()
            .map(|r| r.rel_type.clone())
            .collect();
        types.sort();
        types.dedup();
        types
    }

    /// All distinct property keys across nodes and relationships, sorted.
    pub fn all_property_keys(&self) -> Vec<String> {
        let mut keys: HashSet<String> = HashSet::new();
        for node in self.nodes.values() {
            keys.extend(node.properties.keys().cloned());
        }
        for rel in self.relationships.values() {
            keys.extend(rel.properties.keys().cloned());
        }
        let mut keys: Vec<String> = keys.into_iter().collect();
        keys.sort();
        keys
    }

    /// Drop all data, keeping registered index definitions.
    pub fn clear(&mut self) {
        self.nodes.clear();
        self.relationships.clear();
        self.outgoing.clear();
        self.incoming.clear();
        self.label_index.clear();
        for idx in self.indexes.values_mut() {
            *idx = PropertyIndex::new();
        }
        self.next_node_id = 1;
        self.next_rel_id = 1;
    }
}

// ============================================================================
// Tests
// ============================================================================
