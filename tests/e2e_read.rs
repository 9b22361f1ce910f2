//! End-to-end read tests for the full pipeline.
//!
//! Each test exercises: parse -> interpret against the in-memory store.

use pretty_assertions::assert_eq;

use cypherlite::{Graph, Node, PropertyMap, QueryResult, Relationship, Value};

fn run(graph: &mut Graph, query: &str) -> QueryResult {
    graph.execute(query, &PropertyMap::new()).unwrap()
}

fn seed_people(graph: &mut Graph) {
    run(graph, "CREATE (a:Person {name: 'Ada', age: 36})");
    run(graph, "CREATE (b:Person {name: 'Bob', age: 30})");
    run(graph, "CREATE (c:Person {name: 'Charlie', age: 25})");
}

// ============================================================================
// 1. CREATE a node, then MATCH it back
// ============================================================================

#[test]
fn test_create_and_query_node() {
    let mut graph = Graph::new();
    run(&mut graph, "CREATE (n:Person)");

    let result = run(&mut graph, "MATCH (n:Person) RETURN n");
    assert_eq!(result.keys, vec!["n"]);
    assert_eq!(result.len(), 1);

    let node: Node = result.get(0, "n").unwrap();
    assert!(node.has_label("Person"));
    assert_eq!(node.element_id(), format!("node:{}", node.id));
}

// ============================================================================
// 2. CREATE a path, read back both ends
// ============================================================================

#[test]
fn test_create_path_and_match() {
    let mut graph = Graph::new();
    run(
        &mut graph,
        "CREATE (a:Person {name: 'Alice'})-[:KNOWS]->(b:Person {name: 'Bob'})",
    );

    let result = run(&mut graph, "MATCH (p:Person)-[:KNOWS]->(q) RETURN p.name, q.name");
    assert_eq!(result.keys, vec!["p.name", "q.name"]);
    assert_eq!(
        result.records,
        vec![vec![Value::from("Alice"), Value::from("Bob")]]
    );
}

// ============================================================================
// 3. WHERE filters
// ============================================================================

#[test]
fn test_match_with_where_filter() {
    let mut graph = Graph::new();
    seed_people(&mut graph);

    let result = run(&mut graph, "MATCH (n:Person) WHERE n.age > 28 RETURN n.name");
    let names: Vec<String> = (0..result.len()).map(|i| result.get(i, "n.name").unwrap()).collect();
    assert_eq!(names, vec!["Ada", "Bob"]);
}

#[test]
fn test_standalone_where_clause() {
    let mut graph = Graph::new();
    seed_people(&mut graph);

    let result = run(
        &mut graph,
        "UNWIND [1, 2, 3, 4] AS x WHERE x % 2 = 0 RETURN x",
    );
    assert_eq!(result.records, vec![vec![Value::Int(2)], vec![Value::Int(4)]]);
}

// ============================================================================
// 4. Projection keys and aliases
// ============================================================================

#[test]
fn test_return_aliases() {
    let mut graph = Graph::new();
    run(&mut graph, "CREATE (n:Person {name: 'Ada'})");

    let result = run(&mut graph, "MATCH (n:Person) RETURN n.name AS name, n.age");
    assert_eq!(result.keys, vec!["name", "n.age"]);
    assert_eq!(result.get::<String>(0, "name").unwrap(), "Ada");
    // Missing property surfaces as null
    assert_eq!(result.value(0, "n.age"), Some(&Value::Null));
}

// ============================================================================
// 5. ORDER BY / SKIP / LIMIT
// ============================================================================

#[test]
fn test_order_skip_limit() {
    let mut graph = Graph::new();
    seed_people(&mut graph);

    let result = run(
        &mut graph,
        "MATCH (n:Person) RETURN n.name ORDER BY n.age DESC SKIP 1 LIMIT 1",
    );
    assert_eq!(result.records, vec![vec![Value::from("Bob")]]);
}

#[test]
fn test_order_by_alias() {
    let mut graph = Graph::new();
    seed_people(&mut graph);

    let result = run(&mut graph, "MATCH (n:Person) RETURN n.name AS name ORDER BY name DESC");
    let names: Vec<String> = (0..result.len()).map(|i| result.get(i, "name").unwrap()).collect();
    assert_eq!(names, vec!["Charlie", "Bob", "Ada"]);
}

// ============================================================================
// 6. DISTINCT
// ============================================================================

#[test]
fn test_return_distinct() {
    let mut graph = Graph::new();
    run(&mut graph, "CREATE (a:City {name: 'Paris'})");
    run(&mut graph, "CREATE (b:City {name: 'Paris'})");
    run(&mut graph, "CREATE (c:City {name: 'Oslo'})");

    let all = run(&mut graph, "MATCH (c:City) RETURN c.name");
    assert_eq!(all.len(), 3);

    let distinct = run(&mut graph, "MATCH (c:City) RETURN DISTINCT c.name");
    assert_eq!(distinct.len(), 2);
}

// ============================================================================
// 7. OPTIONAL MATCH
// ============================================================================

#[test]
fn test_optional_match_fills_nulls() {
    let mut graph = Graph::new();
    run(&mut graph, "CREATE (a:Person {name: 'Ada'})");

    let result = run(
        &mut graph,
        "MATCH (a:Person) OPTIONAL MATCH (a)-[r:KNOWS]->(b) RETURN a.name, r, b",
    );
    assert_eq!(result.len(), 1);
    assert_eq!(result.get::<String>(0, "a.name").unwrap(), "Ada");
    assert_eq!(result.value(0, "r"), Some(&Value::Null));
    assert_eq!(result.value(0, "b"), Some(&Value::Null));
}

#[test]
fn test_optional_match_one_null_row_per_upstream_row() {
    let mut graph = Graph::new();
    run(&mut graph, "CREATE (a:Person {name: 'Ada'})");
    run(&mut graph, "CREATE (b:Person {name: 'Bob'})");

    let result = run(
        &mut graph,
        "MATCH (p:Person) OPTIONAL MATCH (p)-[:KNOWS]->(q) RETURN p.name, q",
    );
    assert_eq!(result.len(), 2);
    assert_eq!(result.value(0, "q"), Some(&Value::Null));
    assert_eq!(result.value(1, "q"), Some(&Value::Null));
}

#[test]
fn test_optional_match_with_matches_behaves_like_match() {
    let mut graph = Graph::new();
    run(&mut graph, "CREATE (a:Person {name: 'Ada'})-[:KNOWS]->(b:Person {name: 'Bob'})");

    let result = run(
        &mut graph,
        "MATCH (a:Person {name: 'Ada'}) OPTIONAL MATCH (a)-[:KNOWS]->(b) RETURN b.name",
    );
    assert_eq!(result.records, vec![vec![Value::from("Bob")]]);
}

// ============================================================================
// 8. UNWIND
// ============================================================================

#[test]
fn test_unwind_expansion() {
    let mut graph = Graph::new();

    let result = run(&mut graph, "UNWIND [1, 2, 3] AS x RETURN x");
    assert_eq!(result.len(), 3);

    // Non-list expands to a single row
    let result = run(&mut graph, "UNWIND 7 AS x RETURN x");
    assert_eq!(result.records, vec![vec![Value::Int(7)]]);

    // Null expands to zero rows
    let result = run(&mut graph, "UNWIND null AS x RETURN x");
    assert!(result.is_empty());
}

// ============================================================================
// 9. WITH pipeline
// ============================================================================

#[test]
fn test_with_projection_and_filter() {
    let mut graph = Graph::new();
    seed_people(&mut graph);

    let result = run(
        &mut graph,
        "MATCH (n:Person) WITH n.name AS name, n.age AS age WHERE age < 31 RETURN name ORDER BY name",
    );
    let names: Vec<String> = (0..result.len()).map(|i| result.get(i, "name").unwrap()).collect();
    assert_eq!(names, vec!["Bob", "Charlie"]);
}

#[test]
fn test_with_aggregation_then_filter() {
    let mut graph = Graph::new();
    run(&mut graph, "CREATE (a:Person {city: 'Paris'})");
    run(&mut graph, "CREATE (b:Person {city: 'Paris'})");
    run(&mut graph, "CREATE (c:Person {city: 'Oslo'})");

    let result = run(
        &mut graph,
        "MATCH (n:Person) WITH n.city AS city, count(*) AS cnt WHERE cnt > 1 RETURN city, cnt",
    );
    assert_eq!(result.records, vec![vec![Value::from("Paris"), Value::Int(2)]]);
}

// ============================================================================
// 10. UNION
// ============================================================================

#[test]
fn test_union_all_concatenates() {
    let mut graph = Graph::new();
    run(&mut graph, "CREATE (a:Cat {name: 'Mia'})");
    run(&mut graph, "CREATE (b:Dog {name: 'Rex'})");

    let result = run(
        &mut graph,
        "MATCH (a:Cat) RETURN a.name AS name UNION ALL MATCH (b:Dog) RETURN b.name AS name",
    );
    assert_eq!(result.keys, vec!["name"]);
    assert_eq!(result.len(), 2);
}

#[test]
fn test_union_deduplicates() {
    let mut graph = Graph::new();
    run(&mut graph, "CREATE (a:Cat {name: 'Mia'})");
    run(&mut graph, "CREATE (b:Dog {name: 'Mia'})");

    let result = run(
        &mut graph,
        "MATCH (a:Cat) RETURN a.name AS name UNION MATCH (b:Dog) RETURN b.name AS name",
    );
    assert_eq!(result.len(), 1);
}

#[test]
fn test_union_column_mismatch_fails() {
    let mut graph = Graph::new();
    let err = graph
        .execute(
            "MATCH (a:Cat) RETURN a.name UNION MATCH (b:Dog) RETURN b.age",
            &PropertyMap::new(),
        )
        .unwrap_err();
    assert!(err.to_string().contains("same columns"));
}

// ============================================================================
// 11. CALL procedures
// ============================================================================

#[test]
fn test_call_db_labels() {
    let mut graph = Graph::new();
    run(&mut graph, "CREATE (a:Person)");
    run(&mut graph, "CREATE (b:Admin)");

    let result = run(&mut graph, "CALL db.labels() YIELD label RETURN label");
    let labels: Vec<String> = (0..result.len()).map(|i| result.get(i, "label").unwrap()).collect();
    assert_eq!(labels, vec!["Admin", "Person"]);
}

#[test]
fn test_call_yield_alias_and_where() {
    let mut graph = Graph::new();
    run(&mut graph, "CREATE (a:Person)-[:KNOWS]->(b:Person)");
    run(&mut graph, "MATCH (a)-[:KNOWS]->(b) CREATE (a)-[:LIKES]->(b)");

    let result = run(
        &mut graph,
        "CALL db.relationshipTypes() YIELD relationshipType AS t WHERE t <> 'LIKES' RETURN t",
    );
    assert_eq!(result.records, vec![vec![Value::from("KNOWS")]]);
}

#[test]
fn test_call_unknown_procedure() {
    let mut graph = Graph::new();
    let err = graph
        .execute("CALL apoc.do.everything()", &PropertyMap::new())
        .unwrap_err();
    assert!(err.to_string().contains("Unknown procedure"));
}

// ============================================================================
// 12. Parameters
// ============================================================================

#[test]
fn test_parameters_resolved_at_evaluation() {
    let mut graph = Graph::new();
    let mut params = PropertyMap::new();
    params.insert("name".into(), Value::from("Ada"));
    params.insert("age".into(), Value::Int(36));

    graph
        .execute("CREATE (n:Person {name: $name, age: $age})", &params)
        .unwrap();

    let result = graph
        .execute("MATCH (n:Person) WHERE n.name = $name RETURN n.age", &params)
        .unwrap();
    assert_eq!(result.records, vec![vec![Value::Int(36)]]);
}

// ============================================================================
// 13. Relationship values
// ============================================================================

#[test]
fn test_relationship_binding_and_functions() {
    let mut graph = Graph::new();
    run(
        &mut graph,
        "CREATE (a:Person {name: 'Ada'})-[:KNOWS {since: 2020}]->(b:Person {name: 'Bob'})",
    );

    let result = run(
        &mut graph,
        "MATCH (a)-[r:KNOWS]->(b) RETURN type(r), r.since, id(a) AS aid, labels(a)",
    );
    assert_eq!(result.get::<String>(0, "type(r)").unwrap(), "KNOWS");
    assert_eq!(result.get::<i64>(0, "r.since").unwrap(), 2020);
    assert!(result.get::<i64>(0, "aid").is_ok());
    assert_eq!(
        result.value(0, "labels(a)"),
        Some(&Value::List(vec![Value::from("Person")]))
    );

    let result = run(&mut graph, "MATCH ()-[r]->() RETURN r");
    let rel: Relationship = result.get(0, "r").unwrap();
    assert_eq!(rel.rel_type, "KNOWS");
    assert_eq!(rel.element_id(), format!("rel:{}", rel.id));
}

// ============================================================================
// 14. Variable-length paths
// ============================================================================

#[test]
fn test_variable_length_match() {
    let mut graph = Graph::new();
    run(&mut graph, "CREATE (a:P {i: 0})-[:N]->(b:P {i: 1})");
    run(&mut graph, "MATCH (b:P {i: 1}) CREATE (b)-[:N]->(c:P {i: 2})");
    run(&mut graph, "MATCH (c:P {i: 2}) CREATE (c)-[:N]->(d:P {i: 3})");

    let result = run(
        &mut graph,
        "MATCH (a:P {i: 0})-[:N*1..3]->(b) RETURN b.i ORDER BY b.i",
    );
    assert_eq!(
        result.records,
        vec![vec![Value::Int(1)], vec![Value::Int(2)], vec![Value::Int(3)]]
    );
}

// ============================================================================
// 15. Pattern predicates
// ============================================================================

#[test]
fn test_exists_and_pattern_predicates() {
    let mut graph = Graph::new();
    run(&mut graph, "CREATE (a:Person {name: 'Ada'})-[:KNOWS]->(b:Person {name: 'Bob'})");
    run(&mut graph, "CREATE (c:Person {name: 'Eve'})");

    let result = run(
        &mut graph,
        "MATCH (n:Person) WHERE exists((n)-[:KNOWS]->()) RETURN n.name",
    );
    assert_eq!(result.records, vec![vec![Value::from("Ada")]]);

    let result = run(
        &mut graph,
        "MATCH (n:Person) WHERE NOT (n)-[:KNOWS]->() RETURN n.name ORDER BY n.name",
    );
    assert_eq!(
        result.records,
        vec![vec![Value::from("Bob")], vec![Value::from("Eve")]]
    );
}

// ============================================================================
// 16. Wire shapes
// ============================================================================

#[test]
fn test_node_wire_serialization() {
    let mut graph = Graph::new();
    run(&mut graph, "CREATE (n:Person {name: 'Ada'})");

    let result = run(&mut graph, "MATCH (n:Person) RETURN n");
    let node: Node = result.get(0, "n").unwrap();
    let wire = serde_json::to_value(&node).unwrap();
    assert_eq!(wire["identity"], node.id.0);
    assert_eq!(wire["elementId"], format!("node:{}", node.id));
    assert_eq!(wire["labels"][0], "Person");
    assert_eq!(wire["properties"]["name"], "Ada");
}
