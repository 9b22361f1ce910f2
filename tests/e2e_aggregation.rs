//! End-to-end aggregation tests: count/sum/avg/min/max/collect, grouping,
//! DISTINCT aggregation.

use pretty_assertions::assert_eq;

use cypherlite::{Graph, PropertyMap, QueryResult, Value};

fn run(graph: &mut Graph, query: &str) -> QueryResult {
    graph.execute(query, &PropertyMap::new()).unwrap()
}

fn seed(graph: &mut Graph) {
    run(graph, "CREATE (a:Person {name: 'Ada', city: 'Paris', age: 36})");
    run(graph, "CREATE (b:Person {name: 'Bob', city: 'Paris', age: 30})");
    run(graph, "CREATE (c:Person {name: 'Cid', city: 'Oslo', age: 25})");
}

// ============================================================================
// 1. count
// ============================================================================

#[test]
fn test_count_star_and_expr() {
    let mut graph = Graph::new();
    seed(&mut graph);

    let result = run(&mut graph, "MATCH (n:Person) RETURN count(*) AS total");
    assert_eq!(result.get::<i64>(0, "total").unwrap(), 3);

    // count(expr) skips nulls
    run(&mut graph, "CREATE (d:Person {name: 'Eve'})");
    let result = run(&mut graph, "MATCH (n:Person) RETURN count(n.age) AS with_age");
    assert_eq!(result.get::<i64>(0, "with_age").unwrap(), 3);
}

#[test]
fn test_count_over_empty_match() {
    let mut graph = Graph::new();
    let result = run(&mut graph, "MATCH (n:Ghost) RETURN count(*) AS total");
    assert_eq!(result.records, vec![vec![Value::Int(0)]]);
}

#[test]
fn test_count_distinct() {
    let mut graph = Graph::new();
    seed(&mut graph);

    let result = run(&mut graph, "MATCH (n:Person) RETURN count(DISTINCT n.city) AS cities");
    assert_eq!(result.get::<i64>(0, "cities").unwrap(), 2);
}

// ============================================================================
// 2. sum / avg / min / max
// ============================================================================

#[test]
fn test_numeric_aggregates() {
    let mut graph = Graph::new();
    seed(&mut graph);

    let result = run(
        &mut graph,
        "MATCH (n:Person) RETURN sum(n.age) AS s, avg(n.age) AS a, min(n.age) AS lo, max(n.age) AS hi",
    );
    assert_eq!(result.get::<i64>(0, "s").unwrap(), 91);
    assert!((result.get::<f64>(0, "a").unwrap() - 91.0 / 3.0).abs() < 1e-9);
    assert_eq!(result.get::<i64>(0, "lo").unwrap(), 25);
    assert_eq!(result.get::<i64>(0, "hi").unwrap(), 36);
}

#[test]
fn test_avg_of_no_rows_is_null() {
    let mut graph = Graph::new();
    let result = run(&mut graph, "MATCH (n:Ghost) RETURN avg(n.age) AS a, sum(n.age) AS s");
    assert_eq!(result.value(0, "a"), Some(&Value::Null));
    assert_eq!(result.value(0, "s"), Some(&Value::Int(0)));
}

// ============================================================================
// 3. collect
// ============================================================================

#[test]
fn test_collect() {
    let mut graph = Graph::new();
    seed(&mut graph);

    let result = run(
        &mut graph,
        "MATCH (n:Person) WHERE n.city = 'Paris' RETURN collect(n.name) AS names",
    );
    assert_eq!(
        result.value(0, "names"),
        Some(&Value::List(vec![Value::from("Ada"), Value::from("Bob")]))
    );
}

// ============================================================================
// 4. Grouping by non-aggregated outputs
// ============================================================================

#[test]
fn test_group_by_city() {
    let mut graph = Graph::new();
    seed(&mut graph);

    let result = run(
        &mut graph,
        "MATCH (n:Person) RETURN n.city AS city, count(*) AS cnt ORDER BY city",
    );
    assert_eq!(
        result.records,
        vec![
            vec![Value::from("Oslo"), Value::Int(1)],
            vec![Value::from("Paris"), Value::Int(2)],
        ]
    );
}

#[test]
fn test_aggregate_inside_arithmetic() {
    let mut graph = Graph::new();
    seed(&mut graph);

    let result = run(&mut graph, "MATCH (n:Person) RETURN count(*) + 1 AS plus_one");
    assert_eq!(result.get::<i64>(0, "plus_one").unwrap(), 4);
}

#[test]
fn test_group_ordering_follows_first_seen_then_order_by() {
    let mut graph = Graph::new();
    run(&mut graph, "CREATE (a:City {name: 'Oslo', pop: 1})");
    run(&mut graph, "CREATE (b:City {name: 'Paris', pop: 2})");
    run(&mut graph, "CREATE (c:City {name: 'Oslo', pop: 3})");

    let result = run(
        &mut graph,
        "MATCH (c:City) RETURN c.name AS name, sum(c.pop) AS pop ORDER BY pop DESC",
    );
    assert_eq!(
        result.records,
        vec![
            vec![Value::from("Oslo"), Value::Int(4)],
            vec![Value::from("Paris"), Value::Int(2)],
        ]
    );
}
