//! Edge cases: null semantics, boundary behaviours, failure semantics.

use pretty_assertions::assert_eq;

use cypherlite::{Error, Graph, PropertyMap, QueryResult, Value};

fn run(graph: &mut Graph, query: &str) -> QueryResult {
    graph.execute(query, &PropertyMap::new()).unwrap()
}

fn run_err(graph: &mut Graph, query: &str) -> Error {
    graph.execute(query, &PropertyMap::new()).unwrap_err()
}

// ============================================================================
// 1. Null semantics through the pipeline
// ============================================================================

#[test]
fn test_null_comparison_filters_rows() {
    let mut graph = Graph::new();
    run(&mut graph, "CREATE (n:Person {name: 'Ada'})");

    // n.age is absent → n.age > 10 is null → row filtered
    let result = run(&mut graph, "MATCH (n:Person) WHERE n.age > 10 RETURN n");
    assert!(result.is_empty());
}

#[test]
fn test_null_propagation_in_projection() {
    let mut graph = Graph::new();
    let result = run(&mut graph, "RETURN 1 + null AS a, null = null AS b, NOT null AS c");
    assert_eq!(
        result.records,
        vec![vec![Value::Null, Value::Null, Value::Null]]
    );
}

#[test]
fn test_property_access_on_null_entity() {
    let mut graph = Graph::new();
    run(&mut graph, "CREATE (a:Person {name: 'Ada'})");

    let result = run(
        &mut graph,
        "MATCH (a:Person) OPTIONAL MATCH (a)-[:KNOWS]->(b) RETURN b.name",
    );
    assert_eq!(result.records, vec![vec![Value::Null]]);
}

// ============================================================================
// 2. Boundary behaviours
// ============================================================================

#[test]
fn test_builtin_boundaries() {
    let mut graph = Graph::new();
    let result = run(
        &mut graph,
        "RETURN size([]) AS a, size('') AS b, coalesce(null, null, 7) AS c, range(1, 5) AS d",
    );
    assert_eq!(result.get::<i64>(0, "a").unwrap(), 0);
    assert_eq!(result.get::<i64>(0, "b").unwrap(), 0);
    assert_eq!(result.get::<i64>(0, "c").unwrap(), 7);
    assert_eq!(
        result.value(0, "d"),
        Some(&Value::List((1..=5).map(Value::Int).collect()))
    );
}

#[test]
fn test_distinct_cardinality_matches_projected_set() {
    let mut graph = Graph::new();
    for i in 0..6i64 {
        graph
            .execute(
                "CREATE (n:N {v: $v})",
                &[("v".to_string(), Value::Int(i % 3))].into_iter().collect(),
            )
            .unwrap();
    }
    let result = run(&mut graph, "MATCH (n:N) RETURN DISTINCT n.v");
    assert_eq!(result.len(), 3);
}

#[test]
fn test_var_length_zero_hop_includes_identity() {
    let mut graph = Graph::new();
    run(&mut graph, "CREATE (a:P {name: 'a'})-[:N]->(b:P {name: 'b'})");

    let result = run(
        &mut graph,
        "MATCH (a:P {name: 'a'})-[:N*0..1]->(x) RETURN x.name ORDER BY x.name",
    );
    assert_eq!(
        result.records,
        vec![vec![Value::from("a")], vec![Value::from("b")]]
    );
}

#[test]
fn test_string_concatenation_coerces() {
    let mut graph = Graph::new();
    let result = run(&mut graph, "RETURN 'v' + 1 AS a, 1 + 'v' AS b, 'a' + 'b' AS c");
    assert_eq!(result.get::<String>(0, "a").unwrap(), "v1");
    assert_eq!(result.get::<String>(0, "b").unwrap(), "1v");
    assert_eq!(result.get::<String>(0, "c").unwrap(), "ab");
}

// ============================================================================
// 3. Failure semantics
// ============================================================================

#[test]
fn test_divide_by_zero_is_a_type_error() {
    let mut graph = Graph::new();
    assert!(matches!(
        run_err(&mut graph, "RETURN 1 / 0"),
        Error::TypeError { .. }
    ));
}

#[test]
fn test_unbound_variable_errors() {
    let mut graph = Graph::new();
    let err = run_err(&mut graph, "RETURN ghost.name");
    assert!(err.to_string().contains("Unbound variable"));
}

#[test]
fn test_missing_parameter_errors() {
    let mut graph = Graph::new();
    let err = run_err(&mut graph, "RETURN $nope");
    assert!(err.to_string().contains("Missing parameter"));
}

#[test]
fn test_unknown_function_evaluates_to_null() {
    let mut graph = Graph::new();
    let result = run(&mut graph, "RETURN apocNothing(1, 'x') AS v");
    assert_eq!(result.records, vec![vec![Value::Null]]);
}

#[test]
fn test_parse_error_carries_position() {
    let mut graph = Graph::new();
    match run_err(&mut graph, "MATCH (n:Person)\n  WHERE > 3 RETURN n") {
        Error::ParseError { line, column, .. } => {
            assert_eq!(line, 2);
            assert!(column > 1);
        }
        other => panic!("Expected ParseError, got {other:?}"),
    }
}

#[test]
fn test_lex_error_carries_position() {
    let mut graph = Graph::new();
    match run_err(&mut graph, "MATCH (n) RETURN 'open") {
        Error::LexError { line, column, .. } => {
            assert_eq!(line, 1);
            assert_eq!(column, 18);
        }
        other => panic!("Expected LexError, got {other:?}"),
    }
}

#[test]
fn test_parse_errors_never_touch_the_store() {
    let mut graph = Graph::new();
    run(&mut graph, "CREATE (n:Person)");
    let _ = graph.execute("CREATE (m:Person", &PropertyMap::new());
    assert_eq!(graph.store().node_count(), 1);
}

#[test]
fn test_type_error_on_starts_with_non_string() {
    let mut graph = Graph::new();
    assert!(matches!(
        run_err(&mut graph, "RETURN 1 STARTS WITH 'a'"),
        Error::TypeError { .. }
    ));
}

// ============================================================================
// 4. Store invariants observable through the pipeline
// ============================================================================

#[test]
fn test_ids_stay_monotonic_across_deletes() {
    let mut graph = Graph::new();
    run(&mut graph, "CREATE (a:P {i: 1})");
    run(&mut graph, "CREATE (b:P {i: 2})");
    run(&mut graph, "MATCH (a:P {i: 1}) DELETE a");
    run(&mut graph, "CREATE (c:P {i: 3})");

    let result = run(&mut graph, "MATCH (n:P) RETURN id(n) AS id ORDER BY id");
    let ids: Vec<i64> = (0..result.len()).map(|i| result.get(i, "id").unwrap()).collect();
    assert_eq!(ids.len(), 2);
    assert!(ids[1] > ids[0]);
    assert!(ids[1] > 2);
}

#[test]
fn test_delete_leaves_no_dangling_relationships() {
    let mut graph = Graph::new();
    run(&mut graph, "CREATE (a:Hub)");
    run(&mut graph, "MATCH (h:Hub) CREATE (x:Spoke)-[:LINK]->(h)");
    run(&mut graph, "MATCH (h:Hub) CREATE (h)-[:LINK]->(y:Spoke)");

    run(&mut graph, "MATCH (h:Hub) DETACH DELETE h");
    assert_eq!(graph.store().relationship_count(), 0);

    let result = run(&mut graph, "MATCH ()-[r:LINK]-() RETURN count(r) AS c");
    assert_eq!(result.get::<i64>(0, "c").unwrap(), 0);
}

#[test]
fn test_rows_carry_copies_not_live_references() {
    let mut graph = Graph::new();
    run(&mut graph, "CREATE (n:P {v: 1})");

    // The first read's record must not observe the later mutation
    let before = run(&mut graph, "MATCH (n:P) RETURN n");
    run(&mut graph, "MATCH (n:P) SET n.v = 2");

    let node: cypherlite::Node = before.get(0, "n").unwrap();
    assert_eq!(node.get("v"), Some(&Value::Int(1)));
}

#[test]
fn test_indexed_match_agrees_with_scan() {
    let mut graph = Graph::new();
    for name in ["Ada", "Bob", "Ada"] {
        graph
            .execute(
                "CREATE (n:Person {name: $n})",
                &[("n".to_string(), Value::from(name))].into_iter().collect(),
            )
            .unwrap();
    }

    let scan = run(&mut graph, "MATCH (n:Person {name: 'Ada'}) RETURN id(n) AS id ORDER BY id");
    graph.store_mut().create_index("Person", "name");
    let indexed = run(&mut graph, "MATCH (n:Person {name: 'Ada'}) RETURN id(n) AS id ORDER BY id");
    assert_eq!(scan.records, indexed.records);
}
