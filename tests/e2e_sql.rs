//! End-to-end SQL generation tests.
//!
//! Every test checks the two load-bearing properties: placeholder count
//! equals the parameter count, and user-supplied labels/types/values never
//! appear verbatim in the SQL text.

use pretty_assertions::assert_eq;

use cypherlite::{Error, Graph, PropertyMap, SqlQuery, Value};
use serde_json::json;

fn sql(query: &str) -> SqlQuery {
    Graph::new().to_sql(query, &PropertyMap::new()).unwrap()
}

fn sql_err(query: &str) -> Error {
    Graph::new().to_sql(query, &PropertyMap::new()).unwrap_err()
}

fn assert_balanced(q: &SqlQuery) {
    assert_eq!(
        q.sql.matches('?').count(),
        q.params.len(),
        "placeholder/parameter mismatch in: {}",
        q.sql
    );
}

// ============================================================================
// 1. Labelled join lowering
// ============================================================================

#[test]
fn test_labelled_join() {
    let q = sql("MATCH (a:Person)-[:KNOWS]->(b:Person) WHERE a.age > 21 RETURN a.name");
    assert_balanced(&q);

    assert!(q.sql.starts_with("SELECT json_extract(a.properties, '$.name') FROM nodes AS a"));
    assert!(q.sql.contains("JOIN relationships AS t0 ON t0.start_node_id = a.id"));
    assert!(q.sql.contains("JOIN nodes AS b ON b.id = t0.end_node_id"));
    assert!(q.sql.contains("t0.type = ?"));
    assert!(q.sql.contains("json_each(a.labels)"));
    assert!(q.sql.contains("json_each(b.labels)"));
    assert!(q.sql.contains("json_extract(a.properties, '$.age') > ?"));

    // Values live in params, never in the SQL text
    assert!(!q.sql.contains("KNOWS"));
    assert!(!q.sql.contains("21"));
    assert_eq!(
        q.params,
        vec![json!("KNOWS"), json!("Person"), json!("Person"), json!(21)]
    );
}

#[test]
fn test_left_direction_join() {
    let q = sql("MATCH (a)<-[:KNOWS]-(b) RETURN a");
    assert_balanced(&q);
    assert!(q.sql.contains("t0.end_node_id = a.id"));
    assert!(q.sql.contains("b.id = t0.start_node_id"));
}

#[test]
fn test_undirected_join_excludes_origin_self_edge() {
    let q = sql("MATCH (a)-[:KNOWS]-(b) RETURN a, b");
    assert_balanced(&q);
    assert!(q.sql.contains("t0.start_node_id = a.id OR t0.end_node_id = a.id"));
    assert!(q.sql.contains("NOT (t0.start_node_id = a.id AND t0.end_node_id = a.id)"));
    assert!(q.sql.contains("CASE WHEN t0.start_node_id = a.id THEN t0.end_node_id ELSE t0.start_node_id END"));
}

#[test]
fn test_multiple_rel_types_parameterised_in() {
    let q = sql("MATCH (a)-[:KNOWS|LIKES]->(b) RETURN a");
    assert_balanced(&q);
    assert!(q.sql.contains("t0.type IN (?, ?)"));
    assert!(!q.sql.contains("KNOWS"));
    assert!(q.params.contains(&json!("KNOWS")));
    assert!(q.params.contains(&json!("LIKES")));
}

#[test]
fn test_anonymous_aliases_are_generated() {
    let q = sql("MATCH ()-[]->() RETURN count(*)");
    assert_balanced(&q);
    assert!(q.sql.contains("FROM nodes AS t0"));
    assert!(q.sql.contains("relationships AS t1"));
    assert!(q.sql.contains("nodes AS t2"));
}

#[test]
fn test_shared_variable_is_emitted_once() {
    let q = sql("MATCH (a:Person)-[:KNOWS]->(b), (a)-[:LIKES]->(c) RETURN a, b, c");
    assert_balanced(&q);
    assert_eq!(q.sql.matches("nodes AS a").count(), 1);
}

// ============================================================================
// 2. OPTIONAL MATCH → LEFT JOIN
// ============================================================================

#[test]
fn test_optional_match_left_joins() {
    let q = sql("MATCH (a:Person) OPTIONAL MATCH (a)-[:KNOWS]->(b:Person) RETURN a, b");
    assert_balanced(&q);
    assert!(q.sql.contains("LEFT JOIN relationships AS t0"));
    assert!(q.sql.contains("LEFT JOIN nodes AS b"));
    // The optional node's label predicate rides the join condition, not WHERE
    let on_clause = q.sql.split("LEFT JOIN nodes AS b ON").nth(1).unwrap();
    let where_clause = on_clause.split(" WHERE ").nth(1).unwrap_or("");
    assert!(on_clause.split(" WHERE ").next().unwrap().contains("json_each(b.labels)"));
    assert!(!where_clause.contains("json_each(b.labels)"));
}

// ============================================================================
// 3. Variable-length paths → recursive CTE
// ============================================================================

#[test]
fn test_variable_length_recursive_cte() {
    let q = sql("MATCH (a:Person)-[:KNOWS*1..3]->(b) RETURN a, b");
    assert_balanced(&q);
    assert!(q.sql.starts_with("WITH RECURSIVE path_cte"));
    assert!(q.sql.contains("p.depth < 3"));
    assert!(q.sql.contains("path_cte.depth >= 1"));
    assert!(q.sql.contains("path_cte.start_id = a.id"));
    assert!(q.sql.contains("b.id = path_cte.end_id"));
    assert!(!q.sql.contains("KNOWS"));
    // Type is parameterised in both the base and the step case
    assert_eq!(q.params.iter().filter(|p| **p == json!("KNOWS")).count(), 2);
}

#[test]
fn test_variable_length_unbounded_uses_safety_cap() {
    let q = sql("MATCH (a)-[:KNOWS*]->(b) RETURN b");
    assert_balanced(&q);
    assert!(q.sql.contains("p.depth < 10"));
    assert!(q.sql.contains("path_cte.depth >= 1"));
}

#[test]
fn test_variable_length_zero_min_includes_identity() {
    let q = sql("MATCH (a)-[:KNOWS*0..2]->(b) RETURN b");
    assert_balanced(&q);
    assert!(q.sql.contains("SELECT n.id, n.id, 0 FROM nodes AS n UNION ALL"));
    assert!(q.sql.contains("path_cte.depth >= 0"));
}

// ============================================================================
// 4. Injection-safe labels
// ============================================================================

#[test]
fn test_labels_with_metacharacters_stay_in_params() {
    let q = sql("MATCH (n:`weird\"label%`) RETURN n");
    assert_balanced(&q);
    assert!(!q.sql.contains("weird\"label%"));
    assert!(!q.sql.contains("weird"));
    assert!(q.params.contains(&json!("weird\"label%")));
}

#[test]
fn test_rel_type_with_metacharacters_stays_in_params() {
    let q = sql("MATCH (a)-[:`EVIL'; DROP TABLE nodes; --`]->(b) RETURN a");
    assert_balanced(&q);
    assert!(!q.sql.contains("DROP TABLE"));
    assert!(q.params.contains(&json!("EVIL'; DROP TABLE nodes; --")));
}

#[test]
fn test_non_identifier_property_key_is_rejected() {
    let err = sql_err("MATCH (n {`bad'key`: 1}) RETURN n");
    assert!(matches!(err, Error::UnsupportedConstruct(_)));
}

// ============================================================================
// 5. RETURN lowering
// ============================================================================

#[test]
fn test_return_star_expansion_and_aliases() {
    let q = sql("MATCH (a:Person) RETURN a");
    assert_balanced(&q);
    assert!(q.sql.contains("SELECT a.*"));

    let q = sql("MATCH (a:Person) RETURN a.name AS name");
    assert!(q.sql.contains("json_extract(a.properties, '$.name') AS name"));
}

#[test]
fn test_distinct_order_skip_limit() {
    let q = sql("MATCH (a:Person) RETURN DISTINCT a.name ORDER BY a.name DESC SKIP 5 LIMIT 10");
    assert_balanced(&q);
    assert!(q.sql.contains("SELECT DISTINCT"));
    assert!(q.sql.contains("ORDER BY json_extract(a.properties, '$.name') DESC"));
    assert!(q.sql.contains("LIMIT ?"));
    assert!(q.sql.contains("OFFSET ?"));
    assert!(!q.sql.contains("10"));
    assert_eq!(q.params.last(), Some(&json!(5)));
    assert_eq!(q.params[q.params.len() - 2], json!(10));
}

#[test]
fn test_aggregation_and_group_by() {
    let q = sql("MATCH (a:Person) RETURN a.city, count(a), collect(a.name)");
    assert_balanced(&q);
    assert!(q.sql.contains("COUNT(a.id)"));
    assert!(q.sql.contains("json_group_array(json_extract(a.properties, '$.name'))"));
    assert!(q.sql.contains("GROUP BY json_extract(a.properties, '$.city')"));
}

#[test]
fn test_count_distinct_lowering() {
    let q = sql("MATCH (a:Person) RETURN count(DISTINCT a.city)");
    assert!(q.sql.contains("COUNT(DISTINCT json_extract(a.properties, '$.city'))"));
}

#[test]
fn test_unknown_functions_uppercased_verbatim() {
    let q = sql("MATCH (a:Person) RETURN toUpper(a.name)");
    assert!(q.sql.contains("TOUPPER(json_extract(a.properties, '$.name'))"));
}

// ============================================================================
// 6. Predicate lowering
// ============================================================================

#[test]
fn test_string_predicates_avoid_like() {
    let q = sql("MATCH (a) WHERE a.name STARTS WITH 'A%' RETURN a");
    assert_balanced(&q);
    assert!(!q.sql.contains("LIKE"));
    assert!(q.sql.contains("substr("));
    assert!(q.params.contains(&json!("A%")));

    let q = sql("MATCH (a) WHERE a.name CONTAINS '_x_' RETURN a");
    assert!(q.sql.contains("instr("));
    assert!(q.params.contains(&json!("_x_")));
}

#[test]
fn test_in_list_expands_placeholders() {
    let q = sql("MATCH (a) WHERE a.id IN [1, 2, 3] RETURN a");
    assert_balanced(&q);
    assert!(q.sql.contains("IN (?, ?, ?)"));
    assert_eq!(q.params, vec![json!(1), json!(2), json!(3)]);
}

#[test]
fn test_parameter_resolution() {
    let mut params = PropertyMap::new();
    params.insert("name".into(), Value::from("Ada"));
    params.insert("ids".into(), Value::List(vec![Value::Int(1), Value::Int(2)]));

    let graph = Graph::new();
    let q = graph
        .to_sql("MATCH (n) WHERE n.name = $name AND n.id IN $ids RETURN n", &params)
        .unwrap();
    assert_balanced(&q);
    assert_eq!(q.params, vec![json!("Ada"), json!(1), json!(2)]);

    let err = graph
        .to_sql("MATCH (n) WHERE n.name = $missing RETURN n", &PropertyMap::new())
        .unwrap_err();
    assert!(err.to_string().contains("Missing parameter"));
}

#[test]
fn test_is_null_lowering() {
    let q = sql("MATCH (a) WHERE a.email IS NOT NULL RETURN a");
    assert!(q.sql.contains("json_extract(a.properties, '$.email') IS NOT NULL"));
}

// ============================================================================
// 7. Write lowering
// ============================================================================

#[test]
fn test_create_node_insert() {
    let q = sql("CREATE (n:Person {name: 'Ada', age: 36})");
    assert_balanced(&q);
    assert_eq!(q.sql, "INSERT INTO nodes (labels, properties) VALUES (?, ?)");
    assert_eq!(q.params[0], json!("[\"Person\"]"));
    let props: serde_json::Value = serde_json::from_str(q.params[1].as_str().unwrap()).unwrap();
    assert_eq!(props, json!({"name": "Ada", "age": 36}));
}

#[test]
fn test_create_path_inserts_nodes_then_relationship() {
    let q = sql("CREATE (a:P {name: 'a'})-[:KNOWS {since: 2020}]->(b:P {name: 'b'})");
    assert_balanced(&q);
    let statements: Vec<&str> = q.sql.split(";\n").collect();
    assert_eq!(statements.len(), 3);
    assert!(statements[0].starts_with("INSERT INTO nodes"));
    assert!(statements[1].starts_with("INSERT INTO nodes"));
    assert!(statements[2].starts_with("INSERT INTO relationships"));
    assert!(statements[2].contains("(SELECT MAX(id) - 1 FROM nodes)"));
    assert!(statements[2].contains("(SELECT MAX(id) - 0 FROM nodes)"));
    assert!(!q.sql.contains("KNOWS"));
    assert!(q.params.contains(&json!("KNOWS")));
}

#[test]
fn test_merge_insert_if_not_exists() {
    let q = sql("MERGE (n:User {id: 1})");
    assert_balanced(&q);
    assert!(q.sql.starts_with("INSERT INTO nodes (labels, properties) SELECT ?, ? WHERE NOT EXISTS"));
    assert!(q.sql.contains("json_each(nodes.labels)"));
    assert!(q.sql.contains("json_extract(nodes.properties, '$.id') = ?"));
    assert_eq!(q.params.len(), 4);
}

#[test]
fn test_match_delete() {
    let q = sql("MATCH (n:Person) WHERE n.age < 18 DELETE n");
    assert_balanced(&q);
    assert!(q.sql.starts_with("DELETE FROM nodes WHERE id IN (SELECT n.id FROM nodes AS n"));
    assert!(q.sql.contains("json_extract(n.properties, '$.age') < ?"));
}

#[test]
fn test_detach_delete_removes_relationships_first() {
    let q = sql("MATCH (n:Person) DETACH DELETE n");
    assert_balanced(&q);
    let statements: Vec<&str> = q.sql.split(";\n").collect();
    assert_eq!(statements.len(), 2);
    assert!(statements[0].starts_with("DELETE FROM relationships WHERE start_node_id IN"));
    assert!(statements[0].contains("OR end_node_id IN"));
    assert!(statements[1].starts_with("DELETE FROM nodes WHERE id IN"));
}

#[test]
fn test_delete_relationship_variable() {
    let q = sql("MATCH (a)-[r:KNOWS]->(b) DELETE r");
    assert_balanced(&q);
    assert!(q.sql.starts_with("DELETE FROM relationships WHERE id IN (SELECT r.id"));
}

#[test]
fn test_set_property_uses_json_set() {
    let q = sql("MATCH (n:Person) SET n.age = 36, n.city = 'Paris'");
    assert_balanced(&q);
    assert!(q.sql.starts_with("UPDATE nodes SET properties = json_set(json_set(properties"));
    assert!(q.sql.contains("'$.age', ?"));
    assert!(q.sql.contains("'$.city', ?"));
    assert!(q.sql.contains("WHERE id IN (SELECT n.id"));
}

#[test]
fn test_set_label_guarded_insert() {
    let q = sql("MATCH (n:Person) SET n:Admin");
    assert_balanced(&q);
    assert!(q.sql.contains("json_insert(labels, '$[#]', ?)"));
    assert!(q.sql.contains("CASE WHEN EXISTS (SELECT 1 FROM json_each(labels) WHERE json_each.value = ?)"));
    assert!(!q.sql.contains("Admin"));
}

#[test]
fn test_remove_property_and_label() {
    let q = sql("MATCH (n:Person) REMOVE n.age");
    assert!(q.sql.contains("json_remove(properties, '$.age')"));

    let q = sql("MATCH (n:Person) REMOVE n:Admin");
    assert_balanced(&q);
    assert!(q.sql.contains("json_group_array(value)"));
    assert!(q.sql.contains("WHERE value <> ?"));
}

#[test]
fn test_update_on_relationship_variable() {
    let q = sql("MATCH (a)-[r:KNOWS]->(b) SET r.since = 2020");
    assert_balanced(&q);
    assert!(q.sql.starts_with("UPDATE relationships SET properties"));
}

// ============================================================================
// 8. UNION
// ============================================================================

#[test]
fn test_union_lowering() {
    let q = sql("MATCH (a:Cat) RETURN a.name UNION MATCH (b:Dog) RETURN b.name");
    assert_balanced(&q);
    assert!(q.sql.contains(" UNION SELECT "));

    let q = sql("MATCH (a:Cat) RETURN a.name UNION ALL MATCH (b:Dog) RETURN b.name");
    assert!(q.sql.contains(" UNION ALL SELECT "));
}

// ============================================================================
// 9. Unsupported constructs fail loudly
// ============================================================================

#[test]
fn test_unsupported_constructs_are_named() {
    for (query, needle) in [
        ("MATCH (n) WITH n.name AS name RETURN name", "WITH"),
        ("UNWIND [1, 2] AS x RETURN x", "UNWIND"),
        ("CALL db.labels() YIELD label RETURN label", "CALL"),
        ("MATCH (n) WHERE n.name =~ 'A.*' RETURN n", "=~"),
        ("MATCH (n) RETURN CASE WHEN n.a THEN 1 ELSE 2 END", "CASE"),
        ("MATCH (n) WHERE all(x IN n.xs WHERE x > 0) RETURN n", "quantified"),
        ("MATCH (n) WHERE exists((n)-[:K]->()) RETURN n", "EXISTS"),
        ("MATCH (n) RETURN [x IN [1] | x]", "list comprehension"),
        ("MATCH (a)-[:K*]-(b) RETURN a", "undirected variable-length"),
    ] {
        match sql_err(query) {
            Error::UnsupportedConstruct(msg) => {
                assert!(
                    msg.contains(needle),
                    "expected '{needle}' in message '{msg}' for {query}"
                );
            }
            other => panic!("Expected UnsupportedConstruct for {query}, got {other:?}"),
        }
    }
}

#[test]
fn test_no_silent_fallthrough_params_always_balanced() {
    for query in [
        "MATCH (a:Person {name: 'Ada'})-[r:KNOWS|LIKES {w: 2}]->(b:Person) WHERE a.age >= 21 AND b.name STARTS WITH 'B' RETURN DISTINCT a.name, count(r) ORDER BY a.name LIMIT 3",
        "MATCH (a:X)-[:Y*2..4]->(b:Z {p: 'q'}) RETURN b",
        "MATCH (n:L) SET n.a = 1, n:M",
        "MATCH (n:L {k: 'v'}) DETACH DELETE n",
        "CREATE (x:A {n: 1})-[:R]->(y:B {n: 2})",
        "MERGE (m:U {id: 7})",
    ] {
        let q = Graph::new().to_sql(query, &PropertyMap::new()).unwrap();
        assert_balanced(&q);
    }
}
