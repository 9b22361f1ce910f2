//! Pattern matcher.
//!
//! Enumerates all bindings of a MATCH pattern against the store, walking
//! candidate nodes left-to-right and expanding relationships by direction.
//! Variable-length hops expand breadth-first; a relationship is never bound
//! twice within a single pattern instance.

use std::collections::HashSet;

use crate::cypher::ast::{NodePattern, Pattern, PatternDirection, PatternElement, RelPattern};
use crate::model::{Direction, Node, NodeId, PropertyMap, RelId, Relationship, Value};
use crate::storage::GraphStore;
use crate::{Error, Result};

use super::eval::{eval_expr, values_equal, EvalContext};
use super::Row;

/// Hop ceiling for unbounded variable-length patterns.
const MAX_VAR_HOPS: u32 = 100;

/// One partial binding while walking a pattern.
#[derive(Debug, Clone)]
struct Binding {
    row: Row,
    /// Relationships already bound within this pattern instance.
    used: HashSet<RelId>,
    /// The node the previous node pattern bound.
    current: NodeId,
}

/// Enumerate all bindings of `pattern` against the store, starting from the
/// variables already bound in `seed`.
pub fn match_pattern(
    store: &GraphStore,
    pattern: &Pattern,
    seed: &Row,
    params: &PropertyMap,
) -> Result<Vec<Row>> {
    let ctx = EvalContext { store, params };

    let first = match pattern.elements.first() {
        Some(PatternElement::Node(np)) => np,
        _ => return Err(Error::Runtime("Pattern must start with a node".into())),
    };

    let mut bindings = bind_first_node(store, first, seed, &ctx)?;

    let mut i = 1;
    while i < pattern.elements.len() {
        let rel = match &pattern.elements[i] {
            PatternElement::Relationship(r) => r,
            _ => return Err(Error::Runtime("Malformed pattern: expected relationship".into())),
        };
        let node = match pattern.elements.get(i + 1) {
            Some(PatternElement::Node(n)) => n,
            _ => return Err(Error::Runtime("Malformed pattern: expected node".into())),
        };

        let mut next = Vec::new();
        for binding in &bindings {
            next.extend(expand(store, rel, node, binding, &ctx)?);
        }
        bindings = next;
        i += 2;
    }

    Ok(bindings.into_iter().map(|b| b.row).collect())
}

/// True when the pattern has at least one binding given the current row.
pub fn pattern_has_match(
    store: &GraphStore,
    pattern: &Pattern,
    row: &Row,
    params: &PropertyMap,
) -> Result<bool> {
    Ok(!match_pattern(store, pattern, row, params)?.is_empty())
}

// ============================================================================
// Node binding
// ============================================================================

fn bind_first_node(
    store: &GraphStore,
    np: &NodePattern,
    seed: &Row,
    ctx: &EvalContext,
) -> Result<Vec<Binding>> {
    let constraints = eval_properties(&np.properties, seed, ctx)?;

    // Already bound: the pattern constrains the existing value.
    if let Some(var) = &np.variable {
        if let Some(bound) = seed.get(var) {
            let node = match bound {
                Value::Node(n) => n.as_ref().clone(),
                Value::Null => return Ok(Vec::new()),
                v => {
                    return Err(Error::TypeError {
                        expected: "Node".into(),
                        got: v.type_name().into(),
                    })
                }
            };
            if node_satisfies(&node, &np.labels, &constraints) {
                return Ok(vec![Binding {
                    row: seed.clone(),
                    used: HashSet::new(),
                    current: node.id,
                }]);
            }
            return Ok(Vec::new());
        }
    }

    // Candidate set: label-indexed when labels are present, otherwise all.
    let candidates = candidate_nodes(store, np, &constraints);

    let mut bindings = Vec::new();
    for node in candidates {
        if !node_satisfies(&node, &np.labels, &constraints) {
            continue;
        }
        let mut row = seed.clone();
        let id = node.id;
        if let Some(var) = &np.variable {
            row.insert(var.clone(), Value::Node(Box::new(node)));
        }
        bindings.push(Binding { row, used: HashSet::new(), current: id });
    }
    Ok(bindings)
}

fn candidate_nodes(
    store: &GraphStore,
    np: &NodePattern,
    constraints: &[(String, Value)],
) -> Vec<Node> {
    if let Some(label) = np.labels.first() {
        // A registered (label, property) index narrows further.
        if let Some((key, value)) = constraints.first() {
            if store.indexes().iter().any(|d| d.label == *label && d.property == *key) {
                return store.find_nodes_by_label_and_property(label, key, value);
            }
        }
        store.find_nodes_by_label(label)
    } else {
        store.all_nodes()
    }
}

fn eval_properties(
    properties: &[(String, crate::cypher::ast::Expr)],
    row: &Row,
    ctx: &EvalContext,
) -> Result<Vec<(String, Value)>> {
    properties
        .iter()
        .map(|(k, e)| Ok((k.clone(), eval_expr(e, row, ctx)?)))
        .collect()
}

fn node_satisfies(node: &Node, labels: &[String], constraints: &[(String, Value)]) -> bool {
    labels.iter().all(|l| node.has_label(l))
        && constraints
            .iter()
            .all(|(k, v)| node.properties.get(k).map(|pv| values_equal(pv, v) == Some(true)) == Some(true))
}

fn rel_satisfies(rel: &Relationship, types: &[String], constraints: &[(String, Value)]) -> bool {
    (types.is_empty() || types.iter().any(|t| *t == rel.rel_type))
        && constraints
            .iter()
            .all(|(k, v)| rel.properties.get(k).map(|pv| values_equal(pv, v) == Some(true)) == Some(true))
}

// ============================================================================
// Relationship expansion
// ============================================================================

fn expand(
    store: &GraphStore,
    rp: &RelPattern,
    np: &NodePattern,
    binding: &Binding,
    ctx: &EvalContext,
) -> Result<Vec<Binding>> {
    let rel_constraints = eval_properties(&rp.properties, &binding.row, ctx)?;
    let node_constraints = eval_properties(&np.properties, &binding.row, ctx)?;

    match rp.hops {
        None => expand_single(store, rp, np, binding, &rel_constraints, &node_constraints),
        Some(range) => {
            let min = range.min.unwrap_or(1);
            let max = range.max.unwrap_or(MAX_VAR_HOPS).max(min);
            expand_var_length(store, rp, np, binding, &rel_constraints, &node_constraints, min, max)
        }
    }
}

/// Relationships leaving `from` in the pattern's direction.
fn step_rels(store: &GraphStore, from: NodeId, direction: PatternDirection) -> Vec<Relationship> {
    let dir = match direction {
        PatternDirection::Right => Direction::Outgoing,
        PatternDirection::Left => Direction::Incoming,
        PatternDirection::Both | PatternDirection::None => Direction::Both,
    };
    store.relationships_of(from, dir)
}

fn far_endpoint(rel: &Relationship, from: NodeId, direction: PatternDirection) -> NodeId {
    match direction {
        PatternDirection::Right => rel.dst,
        PatternDirection::Left => rel.src,
        _ => rel.other_node(from).unwrap_or(rel.dst),
    }
}

fn expand_single(
    store: &GraphStore,
    rp: &RelPattern,
    np: &NodePattern,
    binding: &Binding,
    rel_constraints: &[(String, Value)],
    node_constraints: &[(String, Value)],
) -> Result<Vec<Binding>> {
    let from = binding.current;
    let mut out = Vec::new();

    for rel in step_rels(store, from, rp.direction) {
        if binding.used.contains(&rel.id) {
            continue;
        }
        if !rel_satisfies(&rel, &rp.rel_types, rel_constraints) {
            continue;
        }
        // A pre-bound relationship variable pins this hop to that edge.
        if let Some(var) = &rp.variable {
            if let Some(Value::Relationship(bound)) = binding.row.get(var) {
                if bound.id != rel.id {
                    continue;
                }
            }
        }

        let far = far_endpoint(&rel, from, rp.direction);
        let Some(far_node) = store.node(far) else { continue };
        if !node_satisfies(&far_node, &np.labels, node_constraints) {
            continue;
        }
        if let Some(var) = &np.variable {
            if let Some(Value::Node(bound)) = binding.row.get(var) {
                if bound.id != far {
                    continue;
                }
            }
        }

        let mut row = binding.row.clone();
        if let Some(var) = &rp.variable {
            row.insert(var.clone(), Value::Relationship(Box::new(rel.clone())));
        }
        if let Some(var) = &np.variable {
            row.insert(var.clone(), Value::Node(Box::new(far_node)));
        }
        let mut used = binding.used.clone();
        used.insert(rel.id);
        out.push(Binding { row, used, current: far });
    }

    Ok(out)
}

#[allow(clippy::too_many_arguments)]
fn expand_var_length(
    store: &GraphStore,
    rp: &RelPattern,
    np: &NodePattern,
    binding: &Binding,
    rel_constraints: &[(String, Value)],
    node_constraints: &[(String, Value)],
    min: u32,
    max: u32,
) -> Result<Vec<Binding>> {
    let from = binding.current;
    let mut out = Vec::new();

    // (tip node, path of relationships so far)
    let mut frontier: Vec<(NodeId, Vec<Relationship>)> = vec![(from, Vec::new())];

    // Zero-hop identity: the endpoint is the origin itself.
    if min == 0 {
        if let Some(node) = store.node(from) {
            if node_satisfies(&node, &np.labels, node_constraints) {
                out.push(make_var_binding(binding, rp, np, node, &[]));
            }
        }
    }

    for depth in 1..=max {
        let mut next_frontier = Vec::new();
        for (tip, path) in &frontier {
            for rel in step_rels(store, *tip, rp.direction) {
                if binding.used.contains(&rel.id) || path.iter().any(|r| r.id == rel.id) {
                    continue;
                }
                if !rel_satisfies(&rel, &rp.rel_types, rel_constraints) {
                    continue;
                }
                let far = far_endpoint(&rel, *tip, rp.direction);
                let Some(far_node) = store.node(far) else { continue };

                let mut new_path = path.clone();
                new_path.push(rel);

                if depth >= min && node_satisfies(&far_node, &np.labels, node_constraints) {
                    let ok_binding = match &np.variable {
                        Some(var) => match binding.row.get(var) {
                            Some(Value::Node(bound)) => bound.id == far,
                            Some(_) => false,
                            None => true,
                        },
                        None => true,
                    };
                    if ok_binding {
                        out.push(make_var_binding(binding, rp, np, far_node, &new_path));
                    }
                }
                if depth < max {
                    next_frontier.push((far, new_path));
                }
            }
        }
        frontier = next_frontier;
        if frontier.is_empty() {
            break;
        }
    }

    Ok(out)
}

fn make_var_binding(
    binding: &Binding,
    rp: &RelPattern,
    np: &NodePattern,
    end_node: Node,
    path: &[Relationship],
) -> Binding {
    let mut row = binding.row.clone();
    if let Some(var) = &rp.variable {
        row.insert(
            var.clone(),
            Value::List(
                path.iter()
                    .map(|r| Value::Relationship(Box::new(r.clone())))
                    .collect(),
            ),
        );
    }
    let current = end_node.id;
    if let Some(var) = &np.variable {
        row.insert(var.clone(), Value::Node(Box::new(end_node)));
    }
    let mut used = binding.used.clone();
    used.extend(path.iter().map(|r| r.id));
    Binding { row, used, current }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cypher::ast::Clause;
    use crate::cypher::parse;

    fn pattern_of(src: &str) -> Pattern {
        let query = parse(src).unwrap();
        match &query.clauses[0] {
            Clause::Match(m) => m.patterns[0].clone(),
            _ => panic!("Expected MATCH"),
        }
    }

    fn chain(store: &mut GraphStore, n: usize) -> Vec<NodeId> {
        let ids: Vec<NodeId> = (0..n)
            .map(|i| {
                store.create_node(
                    vec!["Person".into()],
                    [("i".to_string(), Value::Int(i as i64))].into_iter().collect(),
                )
            })
            .collect();
        for w in ids.windows(2) {
            store.create_relationship("KNOWS", w[0], w[1], PropertyMap::new()).unwrap();
        }
        ids
    }

    #[test]
    fn test_label_and_property_binding() {
        let mut store = GraphStore::new();
        store.create_node(vec!["Person".into()], [("name".to_string(), Value::from("Ada"))].into_iter().collect());
        store.create_node(vec!["Person".into()], [("name".to_string(), Value::from("Bob"))].into_iter().collect());
        store.create_node(vec!["Robot".into()], [("name".to_string(), Value::from("Ada"))].into_iter().collect());

        let pattern = pattern_of("MATCH (n:Person {name: 'Ada'}) RETURN n");
        let rows = match_pattern(&store, &pattern, &Row::new(), &PropertyMap::new()).unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn test_directional_walk() {
        let mut store = GraphStore::new();
        let ids = chain(&mut store, 2);

        let right = pattern_of("MATCH (a)-[:KNOWS]->(b) RETURN a");
        assert_eq!(match_pattern(&store, &right, &Row::new(), &PropertyMap::new()).unwrap().len(), 1);

        let left = pattern_of("MATCH (a)<-[:KNOWS]-(b) RETURN a");
        let rows = match_pattern(&store, &left, &Row::new(), &PropertyMap::new()).unwrap();
        assert_eq!(rows.len(), 1);
        match rows[0].get("a") {
            Some(Value::Node(n)) => assert_eq!(n.id, ids[1]),
            other => panic!("Expected node binding, got {other:?}"),
        }

        // Undirected: each edge matches from both sides
        let undirected = pattern_of("MATCH (a)-[:KNOWS]-(b) RETURN a");
        assert_eq!(match_pattern(&store, &undirected, &Row::new(), &PropertyMap::new()).unwrap().len(), 2);
    }

    #[test]
    fn test_undirected_does_not_bind_edge_twice() {
        let mut store = GraphStore::new();
        let a = store.create_node(vec![], PropertyMap::new());
        let b = store.create_node(vec![], PropertyMap::new());
        store.create_relationship("KNOWS", a, b, PropertyMap::new()).unwrap();

        // (x)-[r1]-(y)-[r2]-(z): r2 may not reuse r1, so no match on one edge
        let pattern = pattern_of("MATCH (x)-[r1]-(y)-[r2]-(z) RETURN x");
        let rows = match_pattern(&store, &pattern, &Row::new(), &PropertyMap::new()).unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn test_seed_binding_constrains() {
        let mut store = GraphStore::new();
        let ids = chain(&mut store, 3);

        let pattern = pattern_of("MATCH (a)-[:KNOWS]->(b) RETURN a");
        let mut seed = Row::new();
        seed.insert("a".into(), Value::Node(Box::new(store.node(ids[1]).unwrap())));
        let rows = match_pattern(&store, &pattern, &seed, &PropertyMap::new()).unwrap();
        assert_eq!(rows.len(), 1);
        match rows[0].get("b") {
            Some(Value::Node(n)) => assert_eq!(n.id, ids[2]),
            other => panic!("Expected node binding, got {other:?}"),
        }
    }

    #[test]
    fn test_var_length_range() {
        let mut store = GraphStore::new();
        chain(&mut store, 4);

        // From the head: 1..2 hops → 2 endpoints
        let pattern = pattern_of("MATCH (a {i: 0})-[:KNOWS*1..2]->(b) RETURN b");
        let rows = match_pattern(&store, &pattern, &Row::new(), &PropertyMap::new()).unwrap();
        assert_eq!(rows.len(), 2);

        // Exact 3 hops → only the tail
        let pattern = pattern_of("MATCH (a {i: 0})-[:KNOWS*3]->(b) RETURN b");
        let rows = match_pattern(&store, &pattern, &Row::new(), &PropertyMap::new()).unwrap();
        assert_eq!(rows.len(), 1);
        match rows[0].get("b") {
            Some(Value::Node(n)) => assert_eq!(n.get("i"), Some(&Value::Int(3))),
            other => panic!("Expected node binding, got {other:?}"),
        }
    }

    #[test]
    fn test_var_length_zero_hop_identity() {
        let mut store = GraphStore::new();
        chain(&mut store, 2);

        let pattern = pattern_of("MATCH (a {i: 0})-[:KNOWS*0..1]->(b) RETURN b");
        let rows = match_pattern(&store, &pattern, &Row::new(), &PropertyMap::new()).unwrap();
        // Zero-hop (b = a) plus the single edge
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn test_var_length_binds_relationship_list() {
        let mut store = GraphStore::new();
        chain(&mut store, 3);

        let pattern = pattern_of("MATCH (a {i: 0})-[r:KNOWS*2]->(b) RETURN r");
        let rows = match_pattern(&store, &pattern, &Row::new(), &PropertyMap::new()).unwrap();
        assert_eq!(rows.len(), 1);
        match rows[0].get("r") {
            Some(Value::List(rels)) => assert_eq!(rels.len(), 2),
            other => panic!("Expected relationship list, got {other:?}"),
        }
    }

    #[test]
    fn test_pattern_has_match() {
        let mut store = GraphStore::new();
        let ids = chain(&mut store, 2);
        let lonely = store.create_node(vec!["Person".into()], PropertyMap::new());

        let pattern = pattern_of("MATCH (n)-[:KNOWS]->() RETURN n");
        let mut row = Row::new();
        row.insert("n".into(), Value::Node(Box::new(store.node(ids[0]).unwrap())));
        assert!(pattern_has_match(&store, &pattern, &row, &PropertyMap::new()).unwrap());

        row.insert("n".into(), Value::Node(Box::new(store.node(lonely).unwrap())));
        assert!(!pattern_has_match(&store, &pattern, &row, &PropertyMap::new()).unwrap());
    }
}
