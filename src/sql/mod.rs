//! # SQL Generator
//!
//! Lowers a Cypher AST to parameterised SQL over the normalised schema
//!
//! ```text
//! nodes(id, labels JSON, properties JSON, created_at, updated_at)
//! relationships(id, type, start_node_id, end_node_id, properties JSON, created_at)
//! ```
//!
//! Every user-supplied value — property values, labels, relationship types,
//! SKIP/LIMIT counts — is emitted as a positional `?` with a matching entry in
//! the parameter vector. Labels and types never appear inline in the SQL
//! text. Constructs outside the supported subset fail with
//! [`Error::UnsupportedConstruct`]; there is no fallthrough to unsound SQL.

use std::collections::HashMap;

use serde::Serialize;
use serde_json::Value as Json;
use tracing::debug;

use crate::cypher::ast::*;
use crate::model::PropertyMap;
use crate::{Error, Result};

/// Depth cap for variable-length paths with no explicit maximum.
const DEFAULT_MAX_DEPTH: u32 = 10;

/// Generated SQL plus its positional parameters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SqlQuery {
    pub sql: String,
    pub params: Vec<Json>,
}

/// Lower a parsed query to SQL. Cypher `$name` parameters are resolved from
/// `params` into the positional vector.
pub fn generate(query: &Query, params: &PropertyMap) -> Result<SqlQuery> {
    // UNION splits the clause list into SELECT parts.
    let mut segments: Vec<&[Clause]> = Vec::new();
    let mut union_seps: Vec<&'static str> = Vec::new();
    let mut start = 0;
    for (i, clause) in query.clauses.iter().enumerate() {
        if let Clause::Union { all } = clause {
            segments.push(&query.clauses[start..i]);
            union_seps.push(if *all { " UNION ALL " } else { " UNION " });
            start = i + 1;
        }
    }
    segments.push(&query.clauses[start..]);

    if segments.len() > 1 && !segments.iter().all(|s| is_select_segment(s)) {
        return Err(Error::UnsupportedConstruct(
            "UNION is only supported between read queries".into(),
        ));
    }

    let mut sql = String::new();
    let mut out_params = Vec::new();
    for (i, segment) in segments.iter().enumerate() {
        if i > 0 {
            sql.push_str(union_seps[i - 1]);
        }
        let fragment = Generator::new(params).lower_segment(segment)?;
        sql.push_str(&fragment.sql);
        out_params.extend(fragment.params);
    }

    debug!(placeholders = out_params.len(), "generated sql");
    Ok(SqlQuery { sql, params: out_params })
}

fn is_select_segment(clauses: &[Clause]) -> bool {
    matches!(clauses.last(), Some(Clause::Return(_)))
        && clauses
            .iter()
            .all(|c| matches!(c, Clause::Match(_) | Clause::Where(_) | Clause::Return(_)))
}

// ============================================================================
// Fragments
// ============================================================================

/// A piece of SQL text with the parameters its placeholders bind, in order.
#[derive(Debug, Clone, Default)]
struct Fragment {
    sql: String,
    params: Vec<Json>,
}

impl Fragment {
    fn new(sql: impl Into<String>) -> Self {
        Self { sql: sql.into(), params: Vec::new() }
    }

    fn param(sql: impl Into<String>, value: Json) -> Self {
        Self { sql: sql.into(), params: vec![value] }
    }

    fn push(&mut self, other: Fragment) {
        self.sql.push_str(&other.sql);
        self.params.extend(other.params);
    }

    fn join(fragments: Vec<Fragment>, sep: &str) -> Fragment {
        let mut out = Fragment::default();
        for (i, frag) in fragments.into_iter().enumerate() {
            if i > 0 {
                out.sql.push_str(sep);
            }
            out.push(frag);
        }
        out
    }
}

// ============================================================================
// Generator state
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AliasKind {
    Node,
    Rel,
}

#[derive(Debug, Clone)]
struct BoundAlias {
    alias: String,
    kind: AliasKind,
}

/// Accumulated pieces of one SELECT (also reused as the row source for
/// UPDATE/DELETE subqueries).
#[derive(Debug, Default)]
struct SelectParts {
    ctes: Vec<Fragment>,
    from: Option<String>,
    joins: Vec<Fragment>,
    wheres: Vec<Fragment>,
}

struct Generator<'a> {
    input_params: &'a PropertyMap,
    bindings: HashMap<String, BoundAlias>,
    alias_counter: usize,
}

impl<'a> Generator<'a> {
    fn new(input_params: &'a PropertyMap) -> Self {
        Self {
            input_params,
            bindings: HashMap::new(),
            alias_counter: 0,
        }
    }

    fn fresh_alias(&mut self) -> String {
        let alias = format!("t{}", self.alias_counter);
        self.alias_counter += 1;
        alias
    }

    fn bind(&mut self, variable: Option<&String>, kind: AliasKind) -> String {
        let alias = match variable {
            Some(v) => v.clone(),
            None => self.fresh_alias(),
        };
        if let Some(v) = variable {
            self.bindings.insert(v.clone(), BoundAlias { alias: alias.clone(), kind });
        }
        alias
    }

    fn bound(&self, variable: &str) -> Option<&BoundAlias> {
        self.bindings.get(variable)
    }

    // ========================================================================
    // Segment dispatch
    // ========================================================================

    fn lower_segment(&mut self, clauses: &[Clause]) -> Result<Fragment> {
        for clause in clauses {
            match clause {
                Clause::With(_) => {
                    return Err(Error::UnsupportedConstruct("WITH clause".into()))
                }
                Clause::Unwind(_) => {
                    return Err(Error::UnsupportedConstruct("UNWIND clause".into()))
                }
                Clause::Call(_) => {
                    return Err(Error::UnsupportedConstruct("CALL procedure".into()))
                }
                _ => {}
            }
        }

        if clauses.iter().all(|c| matches!(c, Clause::Create(_))) && !clauses.is_empty() {
            let creates: Vec<&CreateClause> = clauses
                .iter()
                .map(|c| match c {
                    Clause::Create(c) => c,
                    _ => unreachable!(),
                })
                .collect();
            return self.lower_create(&creates);
        }

        if let [Clause::Merge(m)] = clauses {
            return self.lower_merge(m);
        }

        match clauses.last() {
            Some(Clause::Return(_)) => self.lower_select(clauses),
            Some(Clause::Delete(_)) => self.lower_delete(clauses),
            Some(Clause::Set(_)) | Some(Clause::Remove(_)) => self.lower_update(clauses),
            _ => Err(Error::UnsupportedConstruct(format!(
                "query shape {:?}",
                clauses.iter().map(clause_name).collect::<Vec<_>>()
            ))),
        }
    }

    // ========================================================================
    // MATCH lowering
    // ========================================================================

    fn lower_reading_clauses<'c>(
        &mut self,
        clauses: &'c [Clause],
    ) -> Result<(SelectParts, &'c [Clause])> {
        let mut parts = SelectParts::default();
        let mut rest = clauses;
        loop {
            match rest.first() {
                Some(Clause::Match(m)) => {
                    self.lower_match(&mut parts, m)?;
                    rest = &rest[1..];
                }
                Some(Clause::Where(w)) => {
                    let pred = self.lower_expr(w)?;
                    parts.wheres.push(pred);
                    rest = &rest[1..];
                }
                _ => break,
            }
        }
        Ok((parts, rest))
    }

    fn lower_match(&mut self, parts: &mut SelectParts, m: &MatchClause) -> Result<()> {
        for pattern in &m.patterns {
            self.lower_pattern(parts, pattern, m.optional)?;
        }
        if let Some(w) = &m.where_clause {
            let pred = self.lower_expr(w)?;
            parts.wheres.push(pred);
        }
        Ok(())
    }

    fn lower_pattern(
        &mut self,
        parts: &mut SelectParts,
        pattern: &Pattern,
        optional: bool,
    ) -> Result<()> {
        let first = match pattern.elements.first() {
            Some(PatternElement::Node(np)) => np,
            _ => return Err(Error::UnsupportedConstruct("pattern without a node".into())),
        };

        let mut prev_alias = self.lower_anchor_node(parts, first, optional)?;

        let mut i = 1;
        while i < pattern.elements.len() {
            let rel = match &pattern.elements[i] {
                PatternElement::Relationship(r) => r,
                _ => return Err(Error::UnsupportedConstruct("malformed pattern".into())),
            };
            let node = match pattern.elements.get(i + 1) {
                Some(PatternElement::Node(n)) => n,
                _ => return Err(Error::UnsupportedConstruct("malformed pattern".into())),
            };

            prev_alias = if let Some(hops) = rel.hops {
                self.lower_var_length(parts, &prev_alias, rel, hops, node, optional)?
            } else {
                self.lower_hop(parts, &prev_alias, rel, node, optional)?
            };
            i += 2;
        }
        Ok(())
    }

    /// First node of a pattern: FROM table, cross join, or reuse of an alias
    /// bound by an earlier pattern.
    fn lower_anchor_node(
        &mut self,
        parts: &mut SelectParts,
        np: &NodePattern,
        optional: bool,
    ) -> Result<String> {
        if let Some(var) = &np.variable {
            if let Some(bound) = self.bound(var) {
                if bound.kind != AliasKind::Node {
                    return Err(Error::UnsupportedConstruct(format!(
                        "variable '{var}' is not a node"
                    )));
                }
                let alias = bound.alias.clone();
                let preds = self.node_predicates(&alias, np)?;
                parts.wheres.extend(preds);
                return Ok(alias);
            }
        }

        let alias = self.bind(np.variable.as_ref(), AliasKind::Node);
        let preds = self.node_predicates(&alias, np)?;

        if parts.from.is_none() {
            parts.from = Some(format!("nodes AS {alias}"));
            parts.wheres.extend(preds);
        } else if optional {
            // A LEFT JOIN needs an ON condition carrying the predicates; a
            // disconnected optional anchor has no join condition to hang.
            return Err(Error::UnsupportedConstruct(
                "disconnected OPTIONAL MATCH pattern".into(),
            ));
        } else {
            parts.joins.push(Fragment::new(format!("CROSS JOIN nodes AS {alias}")));
            parts.wheres.extend(preds);
        }
        Ok(alias)
    }

    /// Single-hop relationship plus its far node.
    fn lower_hop(
        &mut self,
        parts: &mut SelectParts,
        prev: &str,
        rp: &RelPattern,
        np: &NodePattern,
        optional: bool,
    ) -> Result<String> {
        let jtype = if optional { "LEFT JOIN" } else { "JOIN" };
        let rel_alias = self.bind(rp.variable.as_ref(), AliasKind::Rel);

        // Relationship join: direction decides which endpoint meets `prev`.
        let mut rel_on: Vec<Fragment> = Vec::new();
        let far_expr: String;
        match rp.direction {
            PatternDirection::Right => {
                rel_on.push(Fragment::new(format!("{rel_alias}.start_node_id = {prev}.id")));
                far_expr = format!("{rel_alias}.end_node_id");
            }
            PatternDirection::Left => {
                rel_on.push(Fragment::new(format!("{rel_alias}.end_node_id = {prev}.id")));
                far_expr = format!("{rel_alias}.start_node_id");
            }
            PatternDirection::Both | PatternDirection::None => {
                rel_on.push(Fragment::new(format!(
                    "({rel_alias}.start_node_id = {prev}.id OR {rel_alias}.end_node_id = {prev}.id)"
                )));
                // Self-edges back to the origin would bind both orientations.
                rel_on.push(Fragment::new(format!(
                    "NOT ({rel_alias}.start_node_id = {prev}.id AND {rel_alias}.end_node_id = {prev}.id)"
                )));
                far_expr = format!(
                    "CASE WHEN {rel_alias}.start_node_id = {prev}.id THEN {rel_alias}.end_node_id ELSE {rel_alias}.start_node_id END"
                );
            }
        }
        rel_on.extend(self.rel_type_predicate(&rel_alias, &rp.rel_types)?);
        rel_on.extend(self.property_predicates(&rel_alias, &rp.properties)?);

        let mut join = Fragment::new(format!("{jtype} relationships AS {rel_alias} ON "));
        join.push(Fragment::join(rel_on, " AND "));
        parts.joins.push(join);

        // Far node: a fresh join, or a condition against an existing alias.
        if let Some(var) = &np.variable {
            if let Some(bound) = self.bound(var) {
                let alias = bound.alias.clone();
                let cond = Fragment::new(format!("{alias}.id = {far_expr}"));
                if optional {
                    if let Some(last) = parts.joins.last_mut() {
                        last.sql.push_str(" AND ");
                        last.push(cond);
                    }
                } else {
                    parts.wheres.push(cond);
                }
                parts.wheres.extend(self.node_predicates(&alias, np)?);
                return Ok(alias);
            }
        }

        let alias = self.bind(np.variable.as_ref(), AliasKind::Node);
        let mut node_on = vec![Fragment::new(format!("{alias}.id = {far_expr}"))];
        let preds = self.node_predicates(&alias, np)?;
        if optional {
            node_on.extend(preds);
        } else {
            parts.wheres.extend(preds);
        }
        let mut join = Fragment::new(format!("{jtype} nodes AS {alias} ON "));
        join.push(Fragment::join(node_on, " AND "));
        parts.joins.push(join);
        Ok(alias)
    }

    /// Variable-length hop: recursive CTE walking one more edge per step.
    #[allow(clippy::too_many_arguments)]
    fn lower_var_length(
        &mut self,
        parts: &mut SelectParts,
        prev: &str,
        rp: &RelPattern,
        hops: HopRange,
        np: &NodePattern,
        optional: bool,
    ) -> Result<String> {
        if !parts.ctes.is_empty() {
            return Err(Error::UnsupportedConstruct(
                "multiple variable-length paths in one query".into(),
            ));
        }
        let min = hops.min.unwrap_or(1);
        let max = hops.max.unwrap_or(DEFAULT_MAX_DEPTH).max(min.max(1));

        // Column picks per direction: start_id is always the `prev` side.
        let (near_col, far_col) = match rp.direction {
            PatternDirection::Right => ("start_node_id", "end_node_id"),
            PatternDirection::Left => ("end_node_id", "start_node_id"),
            _ => {
                return Err(Error::UnsupportedConstruct(
                    "undirected variable-length path".into(),
                ))
            }
        };

        let mut edge_preds = self.rel_type_predicate("r", &rp.rel_types)?;
        edge_preds.extend(self.property_predicates("r", &rp.properties)?);

        let mut cte = Fragment::new("path_cte(start_id, end_id, depth) AS (");

        if min == 0 {
            cte.push(Fragment::new(
                "SELECT n.id, n.id, 0 FROM nodes AS n UNION ALL ",
            ));
        }

        // Base case: one edge.
        cte.push(Fragment::new(format!(
            "SELECT r.{near_col}, r.{far_col}, 1 FROM relationships AS r"
        )));
        if !edge_preds.is_empty() {
            cte.push(Fragment::new(" WHERE "));
            cte.push(Fragment::join(edge_preds.clone(), " AND "));
        }

        // Step case: extend by one edge while below the depth guard.
        cte.push(Fragment::new(format!(
            " UNION ALL SELECT p.start_id, r.{far_col}, p.depth + 1 \
             FROM path_cte AS p JOIN relationships AS r ON r.{near_col} = p.end_id \
             WHERE p.depth < {max}"
        )));
        if !edge_preds.is_empty() {
            cte.push(Fragment::new(" AND "));
            cte.push(Fragment::join(edge_preds, " AND "));
        }
        cte.push(Fragment::new(")"));
        parts.ctes.push(cte);

        let jtype = if optional { "LEFT JOIN" } else { "JOIN" };
        parts.joins.push(Fragment::new(format!(
            "{jtype} path_cte ON path_cte.start_id = {prev}.id"
        )));

        let alias = self.bind(np.variable.as_ref(), AliasKind::Node);
        let mut node_on = vec![Fragment::new(format!("{alias}.id = path_cte.end_id"))];
        let preds = self.node_predicates(&alias, np)?;
        if optional {
            node_on.extend(preds);
        } else {
            parts.wheres.extend(preds);
        }
        let mut join = Fragment::new(format!("{jtype} nodes AS {alias} ON "));
        join.push(Fragment::join(node_on, " AND "));
        parts.joins.push(join);

        parts.wheres.push(Fragment::new(format!("path_cte.depth >= {min}")));
        Ok(alias)
    }

    // ========================================================================
    // Predicates
    // ========================================================================

    /// One predicate per requested label, label value parameterised.
    fn node_predicates(&mut self, alias: &str, np: &NodePattern) -> Result<Vec<Fragment>> {
        let mut preds = Vec::new();
        for label in &np.labels {
            preds.push(Fragment::param(
                format!(
                    "EXISTS (SELECT 1 FROM json_each({alias}.labels) WHERE json_each.value = ?)"
                ),
                Json::String(label.clone()),
            ));
        }
        preds.extend(self.property_predicates(alias, &np.properties)?);
        Ok(preds)
    }

    fn property_predicates(
        &mut self,
        alias: &str,
        properties: &[(String, Expr)],
    ) -> Result<Vec<Fragment>> {
        let mut preds = Vec::new();
        for (key, expr) in properties {
            let key = safe_key(key)?;
            let value = self.lower_expr(expr)?;
            let mut frag =
                Fragment::new(format!("json_extract({alias}.properties, '$.{key}') = "));
            frag.push(value);
            preds.push(frag);
        }
        Ok(preds)
    }

    fn rel_type_predicate(&mut self, alias: &str, types: &[String]) -> Result<Vec<Fragment>> {
        match types {
            [] => Ok(Vec::new()),
            [single] => Ok(vec![Fragment::param(
                format!("{alias}.type = ?"),
                Json::String(single.clone()),
            )]),
            many => {
                let placeholders = vec!["?"; many.len()].join(", ");
                Ok(vec![Fragment {
                    sql: format!("{alias}.type IN ({placeholders})"),
                    params: many.iter().map(|t| Json::String(t.clone())).collect(),
                }])
            }
        }
    }

    // ========================================================================
    // SELECT
    // ========================================================================

    fn lower_select(&mut self, clauses: &[Clause]) -> Result<Fragment> {
        let (parts, rest) = self.lower_reading_clauses(clauses)?;
        let ret = match rest {
            [Clause::Return(r)] => r,
            _ => {
                return Err(Error::UnsupportedConstruct(format!(
                    "query shape {:?}",
                    clauses.iter().map(clause_name).collect::<Vec<_>>()
                )))
            }
        };

        // Projection: (select text, group-by text when not aggregated)
        let mut select_items: Vec<Fragment> = Vec::new();
        let mut group_by: Vec<String> = Vec::new();
        let mut any_aggregate = false;

        for item in &ret.items {
            let (mut frag, group_expr, aggregated) = self.lower_return_item(&item.expr)?;
            if let Some(alias) = &item.alias {
                frag.sql.push_str(&format!(" AS {alias}"));
            }
            if aggregated {
                any_aggregate = true;
            } else if let Some(g) = group_expr {
                group_by.push(g);
            }
            select_items.push(frag);
        }

        let mut out = Fragment::default();
        if !parts.ctes.is_empty() {
            out.push(Fragment::new("WITH RECURSIVE "));
            out.push(Fragment::join(parts.ctes, ", "));
            out.push(Fragment::new(" "));
        }

        out.push(Fragment::new(if ret.distinct { "SELECT DISTINCT " } else { "SELECT " }));
        out.push(Fragment::join(select_items, ", "));

        if let Some(from) = parts.from {
            out.push(Fragment::new(format!(" FROM {from}")));
        } else if !parts.joins.is_empty() || !parts.wheres.is_empty() {
            return Err(Error::UnsupportedConstruct("RETURN without MATCH".into()));
        }
        for join in parts.joins {
            out.push(Fragment::new(" "));
            out.push(join);
        }
        if !parts.wheres.is_empty() {
            out.push(Fragment::new(" WHERE "));
            out.push(Fragment::join(parts.wheres, " AND "));
        }

        if any_aggregate && !group_by.is_empty() {
            out.push(Fragment::new(format!(" GROUP BY {}", group_by.join(", "))));
        }

        if !ret.order_by.is_empty() {
            let mut items = Vec::new();
            for order in &ret.order_by {
                let mut frag = self.lower_order_expr(&order.expr, &ret.items)?;
                if !order.ascending {
                    frag.sql.push_str(" DESC");
                }
                items.push(frag);
            }
            out.push(Fragment::new(" ORDER BY "));
            out.push(Fragment::join(items, ", "));
        }

        if let Some(limit) = &ret.limit {
            out.push(Fragment::new(" LIMIT "));
            out.push(self.lower_expr(limit)?);
        }
        if let Some(skip) = &ret.skip {
            if ret.limit.is_none() {
                // OFFSET needs a LIMIT in SQLite; -1 means unbounded.
                out.push(Fragment::new(" LIMIT -1"));
            }
            out.push(Fragment::new(" OFFSET "));
            out.push(self.lower_expr(skip)?);
        }

        Ok(out)
    }

    /// Lower one RETURN item. Returns (fragment, group-by expression for
    /// non-aggregated outputs, whether the item aggregates).
    fn lower_return_item(&mut self, expr: &Expr) -> Result<(Fragment, Option<String>, bool)> {
        match expr {
            Expr::Variable(name) => {
                let bound = self
                    .bound(name)
                    .ok_or_else(|| Error::Runtime(format!("Unbound variable: {name}")))?;
                let alias = bound.alias.clone();
                Ok((
                    Fragment::new(format!("{alias}.*")),
                    Some(format!("{alias}.id")),
                    false,
                ))
            }
            _ if expr_aggregates(expr) => {
                let frag = self.lower_expr(expr)?;
                Ok((frag, None, true))
            }
            _ => {
                let frag = self.lower_expr(expr)?;
                let group = frag.sql.clone();
                Ok((frag, Some(group), false))
            }
        }
    }

    /// ORDER BY may reference a projection alias by name.
    fn lower_order_expr(&mut self, expr: &Expr, items: &[ReturnItem]) -> Result<Fragment> {
        if let Expr::Variable(name) = expr {
            if items.iter().any(|i| i.alias.as_deref() == Some(name.as_str())) {
                return Ok(Fragment::new(name.clone()));
            }
        }
        self.lower_expr(expr)
    }

    // ========================================================================
    // Expressions
    // ========================================================================

    fn lower_expr(&mut self, expr: &Expr) -> Result<Fragment> {
        match expr {
            Expr::Integer(i) => Ok(Fragment::param("?", Json::from(*i))),
            Expr::Float(f) => Ok(Fragment::param(
                "?",
                serde_json::Number::from_f64(*f).map(Json::Number).unwrap_or(Json::Null),
            )),
            Expr::Str(s) => Ok(Fragment::param("?", Json::String(s.clone()))),
            Expr::Bool(b) => Ok(Fragment::param("?", Json::Bool(*b))),
            Expr::Null => Ok(Fragment::new("NULL")),

            Expr::Parameter(name) => {
                let value = self.input_params.get(name).ok_or_else(|| {
                    Error::Runtime(format!("Missing parameter: ${name}"))
                })?;
                Ok(Fragment::param("?", value.to_json()))
            }

            Expr::Variable(name) => {
                let bound = self
                    .bound(name)
                    .ok_or_else(|| Error::Runtime(format!("Unbound variable: {name}")))?;
                Ok(Fragment::new(format!("{}.id", bound.alias)))
            }

            Expr::Property { expr: inner, key } => {
                let Expr::Variable(name) = inner.as_ref() else {
                    return Err(Error::UnsupportedConstruct(
                        "nested property access".into(),
                    ));
                };
                let bound = self
                    .bound(name)
                    .ok_or_else(|| Error::Runtime(format!("Unbound variable: {name}")))?;
                let key = safe_key(key)?;
                Ok(Fragment::new(format!(
                    "json_extract({}.properties, '$.{key}')",
                    bound.alias
                )))
            }

            Expr::Binary { left, op, right } => self.lower_binary(left, *op, right),

            Expr::Unary { op, expr: inner } => {
                let frag = self.lower_expr(inner)?;
                let mut out = Fragment::default();
                match op {
                    UnaryOp::Not => {
                        out.push(Fragment::new("NOT ("));
                        out.push(frag);
                        out.push(Fragment::new(")"));
                    }
                    UnaryOp::Minus => {
                        out.push(Fragment::new("-("));
                        out.push(frag);
                        out.push(Fragment::new(")"));
                    }
                    UnaryOp::Plus => {
                        out.push(Fragment::new("("));
                        out.push(frag);
                        out.push(Fragment::new(")"));
                    }
                    UnaryOp::IsNull => {
                        out.push(frag);
                        out.push(Fragment::new(" IS NULL"));
                    }
                    UnaryOp::IsNotNull => {
                        out.push(frag);
                        out.push(Fragment::new(" IS NOT NULL"));
                    }
                }
                Ok(out)
            }

            Expr::FunctionCall { name, args, distinct } => {
                self.lower_function(name, args, *distinct)
            }

            Expr::List(_) | Expr::Map(_) => Err(Error::UnsupportedConstruct(
                "list/map literal outside IN".into(),
            )),
            Expr::Case { .. } => Err(Error::UnsupportedConstruct("CASE expression".into())),
            Expr::Pattern(_) => Err(Error::UnsupportedConstruct("pattern expression".into())),
            Expr::Exists(_) => Err(Error::UnsupportedConstruct("EXISTS expression".into())),
            Expr::Quantified { .. } => Err(Error::UnsupportedConstruct(
                "quantified predicate (ALL/ANY/NONE/SINGLE)".into(),
            )),
            Expr::ListComprehension { .. } => {
                Err(Error::UnsupportedConstruct("list comprehension".into()))
            }
            Expr::Star => Err(Error::UnsupportedConstruct("'*' expression".into())),
        }
    }

    fn lower_binary(&mut self, left: &Expr, op: BinaryOp, right: &Expr) -> Result<Fragment> {
        // IN with an explicit list or a list parameter expands placeholders.
        if op == BinaryOp::In {
            let l = self.lower_expr(left)?;
            let values: Vec<Json> = match right {
                Expr::List(items) => items
                    .iter()
                    .map(|e| self.const_json(e))
                    .collect::<Result<_>>()?,
                Expr::Parameter(name) => {
                    let value = self.input_params.get(name).ok_or_else(|| {
                        Error::Runtime(format!("Missing parameter: ${name}"))
                    })?;
                    match value.to_json() {
                        Json::Array(items) => items,
                        _ => {
                            return Err(Error::UnsupportedConstruct(
                                "IN parameter must be a list".into(),
                            ))
                        }
                    }
                }
                _ => {
                    return Err(Error::UnsupportedConstruct(
                        "IN requires a list literal or list parameter".into(),
                    ))
                }
            };
            let placeholders = vec!["?"; values.len()].join(", ");
            let mut out = l;
            out.push(Fragment {
                sql: format!(" IN ({placeholders})"),
                params: values,
            });
            return Ok(out);
        }

        // String predicates avoid LIKE so user data cannot smuggle wildcards.
        match op {
            BinaryOp::StartsWith => {
                let l = self.lower_expr(left)?;
                let r1 = self.lower_expr(right)?;
                let r2 = self.lower_expr(right)?;
                let mut out = Fragment::new("substr(");
                out.push(l);
                out.push(Fragment::new(", 1, length("));
                out.push(r1);
                out.push(Fragment::new(")) = "));
                out.push(r2);
                return Ok(out);
            }
            BinaryOp::EndsWith => {
                let l = self.lower_expr(left)?;
                let r1 = self.lower_expr(right)?;
                let r2 = self.lower_expr(right)?;
                let mut out = Fragment::new("substr(");
                out.push(l);
                out.push(Fragment::new(", -length("));
                out.push(r1);
                out.push(Fragment::new(")) = "));
                out.push(r2);
                return Ok(out);
            }
            BinaryOp::Contains => {
                let l = self.lower_expr(left)?;
                let r = self.lower_expr(right)?;
                let mut out = Fragment::new("instr(");
                out.push(l);
                out.push(Fragment::new(", "));
                out.push(r);
                out.push(Fragment::new(") > 0"));
                return Ok(out);
            }
            BinaryOp::RegexMatch => {
                return Err(Error::UnsupportedConstruct("regex predicate (=~)".into()))
            }
            BinaryOp::Pow => {
                let l = self.lower_expr(left)?;
                let r = self.lower_expr(right)?;
                let mut out = Fragment::new("POWER(");
                out.push(l);
                out.push(Fragment::new(", "));
                out.push(r);
                out.push(Fragment::new(")"));
                return Ok(out);
            }
            _ => {}
        }

        let symbol = match op {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::Eq => "=",
            BinaryOp::Neq => "<>",
            BinaryOp::Lt => "<",
            BinaryOp::Lte => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Gte => ">=",
            BinaryOp::And => "AND",
            BinaryOp::Or => "OR",
            BinaryOp::Xor => "<>",
            _ => unreachable!("handled above"),
        };

        let l = self.lower_expr(left)?;
        let r = self.lower_expr(right)?;
        let mut out = Fragment::new("(");
        out.push(l);
        out.push(Fragment::new(format!(" {symbol} ")));
        out.push(r);
        out.push(Fragment::new(")"));
        Ok(out)
    }

    fn lower_function(&mut self, name: &str, args: &[Expr], distinct: bool) -> Result<Fragment> {
        if let Some(sql_name) = sql_aggregate(name) {
            if args.is_empty() {
                return Ok(Fragment::new(format!("{sql_name}(*)")));
            }
            let inner = self.lower_expr(&args[0])?;
            let mut out = Fragment::new(format!("{sql_name}("));
            if distinct {
                out.push(Fragment::new("DISTINCT "));
            }
            out.push(inner);
            out.push(Fragment::new(")"));
            return Ok(out);
        }

        // Entity accessors map straight to columns.
        if let [Expr::Variable(var)] = args {
            if let Some(bound) = self.bound(var) {
                let alias = bound.alias.clone();
                match name.to_ascii_lowercase().as_str() {
                    "id" => return Ok(Fragment::new(format!("{alias}.id"))),
                    "type" if bound.kind == AliasKind::Rel => {
                        return Ok(Fragment::new(format!("{alias}.type")))
                    }
                    "labels" if bound.kind == AliasKind::Node => {
                        return Ok(Fragment::new(format!("{alias}.labels")))
                    }
                    "properties" => {
                        return Ok(Fragment::new(format!("{alias}.properties")))
                    }
                    _ => {}
                }
            }
        }

        // Everything else passes through uppercased.
        let mut out = Fragment::new(format!("{}(", name.to_uppercase()));
        let args: Vec<Fragment> = args
            .iter()
            .map(|a| self.lower_expr(a))
            .collect::<Result<_>>()?;
        out.push(Fragment::join(args, ", "));
        out.push(Fragment::new(")"));
        Ok(out)
    }

    /// A compile-time constant: literal or parameter, possibly nested.
    fn const_json(&self, expr: &Expr) -> Result<Json> {
        match expr {
            Expr::Integer(i) => Ok(Json::from(*i)),
            Expr::Float(f) => Ok(serde_json::Number::from_f64(*f)
                .map(Json::Number)
                .unwrap_or(Json::Null)),
            Expr::Str(s) => Ok(Json::String(s.clone())),
            Expr::Bool(b) => Ok(Json::Bool(*b)),
            Expr::Null => Ok(Json::Null),
            Expr::Parameter(name) => self
                .input_params
                .get(name)
                .map(|v| v.to_json())
                .ok_or_else(|| Error::Runtime(format!("Missing parameter: ${name}"))),
            Expr::List(items) => Ok(Json::Array(
                items.iter().map(|e| self.const_json(e)).collect::<Result<_>>()?,
            )),
            Expr::Map(entries) => {
                let mut map = serde_json::Map::new();
                for (k, v) in entries {
                    map.insert(k.clone(), self.const_json(v)?);
                }
                Ok(Json::Object(map))
            }
            other => Err(Error::UnsupportedConstruct(format!(
                "dynamic expression where a constant is required: {other}"
            ))),
        }
    }

    // ========================================================================
    // CREATE
    // ========================================================================

    fn lower_create(&mut self, creates: &[&CreateClause]) -> Result<Fragment> {
        // Node inserts first so relationship endpoint offsets are stable.
        let mut node_inserts: Vec<Fragment> = Vec::new();
        let mut rel_specs: Vec<(usize, usize, &RelPattern)> = Vec::new();
        // variable/position → index in creation order
        let mut node_index: HashMap<String, usize> = HashMap::new();
        let mut created = 0usize;

        for create in creates {
            for pattern in &create.patterns {
                let mut prev: Option<usize> = None;
                let mut pending: Option<&RelPattern> = None;
                for element in &pattern.elements {
                    match element {
                        PatternElement::Node(np) => {
                            let idx = match np.variable.as_ref().and_then(|v| node_index.get(v)) {
                                Some(existing) => *existing,
                                None => {
                                    let labels: Vec<Json> = np
                                        .labels
                                        .iter()
                                        .map(|l| Json::String(l.clone()))
                                        .collect();
                                    let props = self.const_props(&np.properties)?;
                                    node_inserts.push(Fragment {
                                        sql: "INSERT INTO nodes (labels, properties) VALUES (?, ?)"
                                            .into(),
                                        params: vec![
                                            Json::String(Json::Array(labels).to_string()),
                                            Json::String(Json::Object(props).to_string()),
                                        ],
                                    });
                                    let idx = created;
                                    created += 1;
                                    if let Some(var) = &np.variable {
                                        node_index.insert(var.clone(), idx);
                                    }
                                    idx
                                }
                            };
                            if let Some(rp) = pending.take() {
                                let from = prev.ok_or_else(|| {
                                    Error::UnsupportedConstruct(
                                        "relationship without a start node".into(),
                                    )
                                })?;
                                rel_specs.push((from, idx, rp));
                            }
                            prev = Some(idx);
                        }
                        PatternElement::Relationship(rp) => {
                            if rp.hops.is_some() {
                                return Err(Error::UnsupportedConstruct(
                                    "variable-length relationship in CREATE".into(),
                                ));
                            }
                            pending = Some(rp);
                        }
                    }
                }
            }
        }

        let total = created;
        let mut statements = node_inserts;

        for (from, to, rp) in rel_specs {
            if rp.rel_types.len() != 1 {
                return Err(Error::UnsupportedConstruct(
                    "relationship CREATE requires exactly one type".into(),
                ));
            }
            let (start, end) = match rp.direction {
                PatternDirection::Left => (to, from),
                _ => (from, to),
            };
            // After all node inserts, node k (0-based of `total`) has
            // id = MAX(id) - (total - 1 - k). Derived arithmetic, not user data.
            let start_off = total - 1 - start;
            let end_off = total - 1 - end;
            let props = self.const_props(&rp.properties)?;
            statements.push(Fragment {
                sql: format!(
                    "INSERT INTO relationships (type, start_node_id, end_node_id, properties) \
                     VALUES (?, (SELECT MAX(id) - {start_off} FROM nodes), \
                     (SELECT MAX(id) - {end_off} FROM nodes), ?)"
                ),
                params: vec![
                    Json::String(rp.rel_types[0].clone()),
                    Json::String(Json::Object(props).to_string()),
                ],
            });
        }

        Ok(Fragment::join(statements, ";\n"))
    }

    fn const_props(
        &self,
        properties: &[(String, Expr)],
    ) -> Result<serde_json::Map<String, Json>> {
        let mut map = serde_json::Map::new();
        for (key, expr) in properties {
            map.insert(key.clone(), self.const_json(expr)?);
        }
        Ok(map)
    }

    // ========================================================================
    // MERGE
    // ========================================================================

    fn lower_merge(&mut self, m: &MergeClause) -> Result<Fragment> {
        if !m.on_create.is_empty() || !m.on_match.is_empty() {
            return Err(Error::UnsupportedConstruct(
                "MERGE with ON CREATE / ON MATCH".into(),
            ));
        }
        let node = match m.pattern.elements.as_slice() {
            [PatternElement::Node(np)] => np,
            _ => {
                return Err(Error::UnsupportedConstruct(
                    "MERGE on a relationship pattern".into(),
                ))
            }
        };

        let labels: Vec<Json> = node.labels.iter().map(|l| Json::String(l.clone())).collect();
        let props = self.const_props(&node.properties)?;

        let mut out = Fragment {
            sql: "INSERT INTO nodes (labels, properties) SELECT ?, ? WHERE NOT EXISTS \
                  (SELECT 1 FROM nodes WHERE "
                .into(),
            params: vec![
                Json::String(Json::Array(labels).to_string()),
                Json::String(Json::Object(props).to_string()),
            ],
        };

        let mut conds: Vec<Fragment> = Vec::new();
        for label in &node.labels {
            conds.push(Fragment::param(
                "EXISTS (SELECT 1 FROM json_each(nodes.labels) WHERE json_each.value = ?)",
                Json::String(label.clone()),
            ));
        }
        for (key, expr) in &node.properties {
            let key = safe_key(key)?;
            conds.push(Fragment::param(
                format!("json_extract(nodes.properties, '$.{key}') = ?"),
                self.const_json(expr)?,
            ));
        }
        if conds.is_empty() {
            conds.push(Fragment::new("1 = 1"));
        }
        out.push(Fragment::join(conds, " AND "));
        out.push(Fragment::new(")"));
        Ok(out)
    }

    // ========================================================================
    // DELETE
    // ========================================================================

    fn lower_delete(&mut self, clauses: &[Clause]) -> Result<Fragment> {
        let (reading, rest) = split_last_clause(clauses)?;
        let delete = match rest {
            Clause::Delete(d) => d,
            _ => unreachable!("caller matched on Delete"),
        };

        let mut statements: Vec<Fragment> = Vec::new();
        for expr in &delete.expressions {
            let Expr::Variable(name) = expr else {
                return Err(Error::UnsupportedConstruct(
                    "DELETE of a non-variable expression".into(),
                ));
            };

            // The subquery re-compiles the reading clauses per statement so
            // each DELETE is self-contained.
            let mut sub_gen = Generator::new(self.input_params);
            let (parts, leftover) = sub_gen.lower_reading_clauses(reading)?;
            if !leftover.is_empty() {
                return Err(Error::UnsupportedConstruct("clauses between MATCH and DELETE".into()));
            }
            let bound = sub_gen
                .bound(name)
                .ok_or_else(|| Error::Runtime(format!("Unbound variable: {name}")))?
                .clone();

            let subquery = assemble_id_subquery(&bound.alias, parts)?;
            match bound.kind {
                AliasKind::Node => {
                    if delete.detach {
                        let mut rels = Fragment::new(
                            "DELETE FROM relationships WHERE start_node_id IN (",
                        );
                        rels.push(subquery.clone());
                        rels.push(Fragment::new(") OR end_node_id IN ("));
                        rels.push(subquery.clone());
                        rels.push(Fragment::new(")"));
                        statements.push(rels);
                    }
                    let mut nodes = Fragment::new("DELETE FROM nodes WHERE id IN (");
                    nodes.push(subquery);
                    nodes.push(Fragment::new(")"));
                    statements.push(nodes);
                }
                AliasKind::Rel => {
                    let mut rels = Fragment::new("DELETE FROM relationships WHERE id IN (");
                    rels.push(subquery);
                    rels.push(Fragment::new(")"));
                    statements.push(rels);
                }
            }
        }

        Ok(Fragment::join(statements, ";\n"))
    }

    // ========================================================================
    // SET / REMOVE (UPDATE)
    // ========================================================================

    fn lower_update(&mut self, clauses: &[Clause]) -> Result<Fragment> {
        let (reading, rest) = split_last_clause(clauses)?;

        // Normalize SET/REMOVE into (variable, column mutations).
        enum Mutation {
            SetProp(String, Json),
            RemoveProp(String),
            AddLabel(String),
            RemoveLabel(String),
        }

        let mut variable: Option<String> = None;
        let mut mutations: Vec<Mutation> = Vec::new();
        fn note_var(variable: &mut Option<String>, v: &str) -> Result<()> {
            match variable {
                None => {
                    *variable = Some(v.to_string());
                    Ok(())
                }
                Some(existing) if existing == v => Ok(()),
                Some(_) => Err(Error::UnsupportedConstruct(
                    "SET/REMOVE over multiple variables".into(),
                )),
            }
        }

        match rest {
            Clause::Set(s) => {
                for item in &s.items {
                    match item {
                        SetItem::Property { variable: v, keys, value } => {
                            note_var(&mut variable, v)?;
                            if keys.len() != 1 {
                                return Err(Error::UnsupportedConstruct(
                                    "nested property path in SET".into(),
                                ));
                            }
                            mutations.push(Mutation::SetProp(
                                keys[0].clone(),
                                self.const_json(value)?,
                            ));
                        }
                        SetItem::Labels { variable: v, labels } => {
                            note_var(&mut variable, v)?;
                            for label in labels {
                                mutations.push(Mutation::AddLabel(label.clone()));
                            }
                        }
                        SetItem::Replace { .. } | SetItem::Merge { .. } => {
                            return Err(Error::UnsupportedConstruct(
                                "SET with a whole property map".into(),
                            ))
                        }
                    }
                }
            }
            Clause::Remove(r) => {
                for item in &r.items {
                    match item {
                        RemoveItem::Property { variable: v, keys } => {
                            note_var(&mut variable, v)?;
                            if keys.len() != 1 {
                                return Err(Error::UnsupportedConstruct(
                                    "nested property path in REMOVE".into(),
                                ));
                            }
                            mutations.push(Mutation::RemoveProp(keys[0].clone()));
                        }
                        RemoveItem::Labels { variable: v, labels } => {
                            note_var(&mut variable, v)?;
                            for label in labels {
                                mutations.push(Mutation::RemoveLabel(label.clone()));
                            }
                        }
                    }
                }
            }
            _ => unreachable!("caller matched on Set/Remove"),
        }

        let variable =
            variable.ok_or_else(|| Error::UnsupportedConstruct("empty SET/REMOVE".into()))?;

        let (parts, leftover) = self.lower_reading_clauses(reading)?;
        if !leftover.is_empty() {
            return Err(Error::UnsupportedConstruct(
                "clauses between MATCH and SET/REMOVE".into(),
            ));
        }
        let bound = self
            .bound(&variable)
            .ok_or_else(|| Error::Runtime(format!("Unbound variable: {variable}")))?
            .clone();
        let table = match bound.kind {
            AliasKind::Node => "nodes",
            AliasKind::Rel => "relationships",
        };

        // properties: chained json_set/json_remove; labels: guarded insert or
        // filtered re-aggregation.
        let mut props_expr = Fragment::new("properties");
        let mut labels_expr: Option<Fragment> = None;
        for mutation in &mutations {
            match mutation {
                Mutation::SetProp(key, value) => {
                    let key = safe_key(key)?;
                    let inner = props_expr;
                    props_expr = Fragment::new("json_set(");
                    props_expr.push(inner);
                    props_expr.push(Fragment::param(
                        format!(", '$.{key}', ?)"),
                        value.clone(),
                    ));
                }
                Mutation::RemoveProp(key) => {
                    let key = safe_key(key)?;
                    let inner = props_expr;
                    props_expr = Fragment::new("json_remove(");
                    props_expr.push(inner);
                    props_expr.push(Fragment::new(format!(", '$.{key}')")));
                }
                Mutation::AddLabel(label) => {
                    if bound.kind != AliasKind::Node {
                        return Err(Error::UnsupportedConstruct(
                            "label SET on a relationship".into(),
                        ));
                    }
                    let inner = labels_expr.take().unwrap_or_else(|| Fragment::new("labels"));
                    let mut out = Fragment::new("CASE WHEN EXISTS (SELECT 1 FROM json_each(");
                    out.push(inner.clone());
                    out.push(Fragment::param(
                        ") WHERE json_each.value = ?) THEN ",
                        Json::String(label.clone()),
                    ));
                    out.push(inner.clone());
                    out.push(Fragment::new(" ELSE json_insert("));
                    out.push(inner);
                    out.push(Fragment::param(
                        ", '$[#]', ?) END",
                        Json::String(label.clone()),
                    ));
                    labels_expr = Some(out);
                }
                Mutation::RemoveLabel(label) => {
                    if bound.kind != AliasKind::Node {
                        return Err(Error::UnsupportedConstruct(
                            "label REMOVE on a relationship".into(),
                        ));
                    }
                    let inner = labels_expr.take().unwrap_or_else(|| Fragment::new("labels"));
                    let mut out =
                        Fragment::new("(SELECT json_group_array(value) FROM json_each(");
                    out.push(inner);
                    out.push(Fragment::param(
                        ") WHERE value <> ?)",
                        Json::String(label.clone()),
                    ));
                    labels_expr = Some(out);
                }
            }
        }

        let mut assignments: Vec<Fragment> = Vec::new();
        if props_expr.sql != "properties" {
            let mut assign = Fragment::new("properties = ");
            assign.push(props_expr);
            assignments.push(assign);
        }
        if let Some(labels) = labels_expr {
            let mut assign = Fragment::new("labels = ");
            assign.push(labels);
            assignments.push(assign);
        }

        let subquery = assemble_id_subquery(&bound.alias, parts)?;
        let mut out = Fragment::new(format!("UPDATE {table} SET "));
        out.push(Fragment::join(assignments, ", "));
        out.push(Fragment::new(" WHERE id IN ("));
        out.push(subquery);
        out.push(Fragment::new(")"));
        Ok(out)
    }
}

/// `SELECT α.id FROM … [joins] [WHERE …]` — the row source for UPDATE/DELETE.
fn assemble_id_subquery(alias: &str, parts: SelectParts) -> Result<Fragment> {
    if !parts.ctes.is_empty() {
        return Err(Error::UnsupportedConstruct(
            "variable-length path in a write query".into(),
        ));
    }
    let from = parts
        .from
        .ok_or_else(|| Error::UnsupportedConstruct("write without MATCH".into()))?;
    let mut out = Fragment::new(format!("SELECT {alias}.id FROM {from}"));
    for join in parts.joins {
        out.push(Fragment::new(" "));
        out.push(join);
    }
    if !parts.wheres.is_empty() {
        out.push(Fragment::new(" WHERE "));
        out.push(Fragment::join(parts.wheres, " AND "));
    }
    Ok(out)
}

fn split_last_clause(clauses: &[Clause]) -> Result<(&[Clause], &Clause)> {
    match clauses.split_last() {
        Some((last, rest)) => Ok((rest, last)),
        None => Err(Error::UnsupportedConstruct("empty query".into())),
    }
}

fn clause_name(clause: &Clause) -> &'static str {
    match clause {
        Clause::Match(_) => "MATCH",
        Clause::Create(_) => "CREATE",
        Clause::Merge(_) => "MERGE",
        Clause::Delete(_) => "DELETE",
        Clause::Set(_) => "SET",
        Clause::Remove(_) => "REMOVE",
        Clause::With(_) => "WITH",
        Clause::Unwind(_) => "UNWIND",
        Clause::Where(_) => "WHERE",
        Clause::Return(_) => "RETURN",
        Clause::Call(_) => "CALL",
        Clause::Union { .. } => "UNION",
    }
}

/// True when the expression contains an aggregate function call anywhere.
fn expr_aggregates(expr: &Expr) -> bool {
    match expr {
        Expr::FunctionCall { name, args, .. } => {
            sql_aggregate(name).is_some() || args.iter().any(expr_aggregates)
        }
        Expr::Binary { left, right, .. } => expr_aggregates(left) || expr_aggregates(right),
        Expr::Unary { expr, .. } => expr_aggregates(expr),
        Expr::Property { expr, .. } => expr_aggregates(expr),
        _ => false,
    }
}

/// Property keys are spliced into JSON paths, so anything beyond a plain
/// identifier is refused rather than escaped.
fn safe_key(key: &str) -> Result<&str> {
    let plain = !key.is_empty()
        && key.chars().next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if plain {
        Ok(key)
    } else {
        Err(Error::UnsupportedConstruct(format!(
            "non-identifier property key '{key}'"
        )))
    }
}

/// Aggregate name mapping: Cypher → SQL.
pub(crate) fn sql_aggregate(name: &str) -> Option<&'static str> {
    match name.to_ascii_lowercase().as_str() {
        "count" => Some("COUNT"),
        "sum" => Some("SUM"),
        "avg" => Some("AVG"),
        "min" => Some("MIN"),
        "max" => Some("MAX"),
        "collect" => Some("json_group_array"),
        _ => None,
    }
}
