//! Clause-by-clause query interpreter.
//!
//! A query is evaluated over a row set seeded with a single empty row. Each
//! clause transforms the row set; write clauses mutate the store and bump the
//! summary counters. UNION splits the clause sequence into segments whose
//! results are concatenated.

use std::collections::HashSet;

use tracing::trace;

use crate::cypher::ast::*;
use crate::model::{NodeId, PropertyMap, RelId, Value};
use crate::storage::GraphStore;
use crate::{Error, Result};

use super::eval::{eval_expr, EvalContext};
use super::functions::is_aggregate;
use super::matcher::match_pattern;
use super::{QueryResult, Row, Summary};

/// Execute a parsed query against the store.
pub fn execute_query(
    store: &mut GraphStore,
    query: &Query,
    params: &PropertyMap,
) -> Result<QueryResult> {
    let mut pipeline = Pipeline { store, params, summary: Summary::default() };

    // Split on UNION markers.
    let mut segments: Vec<&[Clause]> = Vec::new();
    let mut unions: Vec<bool> = Vec::new();
    let mut start = 0;
    for (i, clause) in query.clauses.iter().enumerate() {
        if let Clause::Union { all } = clause {
            segments.push(&query.clauses[start..i]);
            unions.push(*all);
            start = i + 1;
        }
    }
    segments.push(&query.clauses[start..]);

    if unions.iter().any(|a| *a) && unions.iter().any(|a| !*a) {
        return Err(Error::Runtime("Cannot mix UNION and UNION ALL".into()));
    }
    let union_all = unions.first().copied().unwrap_or(true);

    let mut combined: Option<(Vec<String>, Vec<Vec<Value>>)> = None;
    for segment in segments {
        let result = pipeline.run_segment(segment)?;
        match (&mut combined, result) {
            (None, r) => combined = r,
            (Some((keys, records)), Some((seg_keys, seg_records))) => {
                if *keys != seg_keys {
                    return Err(Error::Runtime(format!(
                        "UNION parts must return the same columns: {keys:?} vs {seg_keys:?}"
                    )));
                }
                records.extend(seg_records);
            }
            (Some(_), None) => {
                return Err(Error::Runtime("All UNION parts must RETURN".into()));
            }
        }
    }

    let summary = pipeline.summary;
    match combined {
        Some((keys, mut records)) => {
            if !union_all {
                let mut seen: Vec<Vec<Value>> = Vec::new();
                records.retain(|r| {
                    if seen.contains(r) {
                        false
                    } else {
                        seen.push(r.clone());
                        true
                    }
                });
            }
            Ok(QueryResult { keys, records, summary })
        }
        None => Ok(QueryResult::empty(summary)),
    }
}

struct Pipeline<'a> {
    store: &'a mut GraphStore,
    params: &'a PropertyMap,
    summary: Summary,
}

impl Pipeline<'_> {
    fn run_segment(&mut self, clauses: &[Clause]) -> Result<Option<(Vec<String>, Vec<Vec<Value>>)>> {
        let mut rows: Vec<Row> = vec![Row::new()];

        for (i, clause) in clauses.iter().enumerate() {
            trace!(clause = %clause, rows = rows.len(), "execute clause");
            match clause {
                Clause::Match(m) => rows = self.exec_match(rows, m)?,
                Clause::Where(expr) => rows = self.filter_rows(rows, expr)?,
                Clause::Create(c) => rows = self.exec_create(rows, c)?,
                Clause::Merge(m) => rows = self.exec_merge(rows, m)?,
                Clause::Set(s) => self.apply_set_items(&mut rows, &s.items)?,
                Clause::Remove(r) => self.apply_remove_items(&mut rows, &r.items)?,
                Clause::Delete(d) => self.exec_delete(&rows, d)?,
                Clause::Unwind(u) => rows = self.exec_unwind(rows, u)?,
                Clause::With(w) => rows = self.exec_with(rows, w)?,
                Clause::Call(c) => rows = self.exec_call(rows, c)?,
                Clause::Return(r) => {
                    if i + 1 != clauses.len() {
                        return Err(Error::Runtime("RETURN must be the final clause".into()));
                    }
                    return Ok(Some(self.exec_return(rows, r)?));
                }
                Clause::Union { .. } => {
                    return Err(Error::Runtime("UNION inside a segment".into()));
                }
            }
        }

        Ok(None)
    }

    fn eval(&self, expr: &Expr, row: &Row) -> Result<Value> {
        let ctx = EvalContext { store: &*self.store, params: self.params };
        eval_expr(expr, row, &ctx)
    }

    fn filter_rows(&self, rows: Vec<Row>, predicate: &Expr) -> Result<Vec<Row>> {
        let mut out = Vec::new();
        for row in rows {
            if self.eval(predicate, &row)?.is_truthy() {
                out.push(row);
            }
        }
        Ok(out)
    }

    // ========================================================================
    // MATCH
    // ========================================================================

    fn exec_match(&self, rows: Vec<Row>, m: &MatchClause) -> Result<Vec<Row>> {
        let mut out = Vec::new();
        for row in &rows {
            let mut bound = vec![row.clone()];
            for pattern in &m.patterns {
                let mut next = Vec::new();
                for b in &bound {
                    next.extend(match_pattern(self.store, pattern, b, self.params)?);
                }
                bound = next;
            }
            if let Some(predicate) = &m.where_clause {
                bound = self.filter_rows(bound, predicate)?;
            }

            if m.optional && bound.is_empty() {
                // One row per upstream row, nulls for every introduced variable
                let mut nulled = row.clone();
                for pattern in &m.patterns {
                    for var in pattern.variables() {
                        if !row.contains_key(var) {
                            nulled.insert(var.to_string(), Value::Null);
                        }
                    }
                }
                out.push(nulled);
            } else {
                out.extend(bound);
            }
        }
        Ok(out)
    }

    // ========================================================================
    // CREATE / MERGE
    // ========================================================================

    fn exec_create(&mut self, rows: Vec<Row>, c: &CreateClause) -> Result<Vec<Row>> {
        let mut out = Vec::new();
        for row in rows {
            let mut row = row;
            for pattern in &c.patterns {
                self.create_pattern(&mut row, pattern)?;
            }
            out.push(row);
        }
        Ok(out)
    }

    /// Create every node/relationship in the pattern, left to right, binding
    /// variables to the created records.
    fn create_pattern(&mut self, row: &mut Row, pattern: &Pattern) -> Result<()> {
        let mut prev: Option<NodeId> = None;
        let mut pending: Option<&RelPattern> = None;

        for element in &pattern.elements {
            match element {
                PatternElement::Node(np) => {
                    let id = self.create_or_reuse_node(row, np)?;
                    if let Some(rp) = pending.take() {
                        let from = prev.ok_or_else(|| {
                            Error::Runtime("Relationship without a start node".into())
                        })?;
                        self.create_rel(row, rp, from, id)?;
                    }
                    prev = Some(id);
                }
                PatternElement::Relationship(rp) => {
                    if rp.hops.is_some() {
                        return Err(Error::Runtime(
                            "Variable-length relationships cannot be created".into(),
                        ));
                    }
                    pending = Some(rp);
                }
            }
        }
        Ok(())
    }

    fn create_or_reuse_node(&mut self, row: &mut Row, np: &NodePattern) -> Result<NodeId> {
        if let Some(var) = &np.variable {
            if let Some(bound) = row.get(var) {
                // Reusing a bound variable: the pattern must add nothing new.
                if !np.labels.is_empty() || !np.properties.is_empty() {
                    return Err(Error::Runtime(format!(
                        "Variable '{var}' is already bound; cannot redeclare labels or properties"
                    )));
                }
                return match bound {
                    Value::Node(n) => Ok(n.id),
                    v => Err(Error::TypeError {
                        expected: "Node".into(),
                        got: v.type_name().into(),
                    }),
                };
            }
        }

        let mut props = PropertyMap::new();
        for (key, expr) in &np.properties {
            props.insert(key.clone(), self.eval(expr, row)?);
        }
        let prop_count = props.len() as u64;

        let id = self.store.create_node(np.labels.clone(), props);
        self.summary.nodes_created += 1;
        self.summary.labels_added += np.labels.len() as u64;
        self.summary.properties_set += prop_count;

        if let Some(var) = &np.variable {
            let node = self
                .store
                .node(id)
                .ok_or_else(|| Error::NotFound(format!("Node {id}")))?;
            row.insert(var.clone(), Value::Node(Box::new(node)));
        }
        Ok(id)
    }

    fn create_rel(
        &mut self,
        row: &mut Row,
        rp: &RelPattern,
        prev: NodeId,
        next: NodeId,
    ) -> Result<()> {
        if rp.rel_types.len() != 1 {
            return Err(Error::Runtime(
                "Creating a relationship requires exactly one type".into(),
            ));
        }

        let mut props = PropertyMap::new();
        for (key, expr) in &rp.properties {
            props.insert(key.clone(), self.eval(expr, row)?);
        }
        let prop_count = props.len() as u64;

        // Left direction points at the previous node; everything else points
        // away from it.
        let (start, end) = match rp.direction {
            PatternDirection::Left => (next, prev),
            _ => (prev, next),
        };

        let id = self
            .store
            .create_relationship(&rp.rel_types[0], start, end, props)?;
        self.summary.relationships_created += 1;
        self.summary.properties_set += prop_count;

        if let Some(var) = &rp.variable {
            let rel = self
                .store
                .relationship(id)
                .ok_or_else(|| Error::NotFound(format!("Relationship {id}")))?;
            row.insert(var.clone(), Value::Relationship(Box::new(rel)));
        }
        Ok(())
    }

    fn exec_merge(&mut self, rows: Vec<Row>, m: &MergeClause) -> Result<Vec<Row>> {
        let mut out = Vec::new();
        for row in rows {
            let mut matches = match_pattern(self.store, &m.pattern, &row, self.params)?;
            if !matches.is_empty() {
                // ON MATCH runs against every match; all matches propagate.
                if !m.on_match.is_empty() {
                    self.apply_set_items(&mut matches, &m.on_match)?;
                }
                out.extend(matches);
            } else {
                let mut created = row.clone();
                self.create_pattern(&mut created, &m.pattern)?;
                if !m.on_create.is_empty() {
                    let mut created_rows = vec![created];
                    self.apply_set_items(&mut created_rows, &m.on_create)?;
                    created = created_rows.pop().unwrap_or_default();
                }
                out.push(created);
            }
        }
        Ok(out)
    }

    // ========================================================================
    // SET / REMOVE
    // ========================================================================

    fn apply_set_items(&mut self, rows: &mut Vec<Row>, items: &[SetItem]) -> Result<()> {
        for idx in 0..rows.len() {
            for item in items {
                match item {
                    SetItem::Property { variable, keys, value } => {
                        if keys.len() != 1 {
                            return Err(Error::Runtime(
                                "Nested property paths are not supported in SET".into(),
                            ));
                        }
                        let val = self.eval(value, &rows[idx])?;
                        match rows[idx].get(variable).cloned() {
                            Some(Value::Node(n)) => {
                                self.store.set_node_property(n.id, &keys[0], val)?;
                                self.summary.properties_set += 1;
                                self.rebind_node(&mut rows[idx], variable, n.id)?;
                            }
                            Some(Value::Relationship(r)) => {
                                self.store.set_relationship_property(r.id, &keys[0], val)?;
                                self.summary.properties_set += 1;
                                self.rebind_rel(&mut rows[idx], variable, r.id)?;
                            }
                            Some(Value::Null) => {}
                            Some(v) => {
                                return Err(Error::TypeError {
                                    expected: "Node or Relationship".into(),
                                    got: v.type_name().into(),
                                })
                            }
                            None => {
                                return Err(Error::Runtime(format!("Unbound variable: {variable}")))
                            }
                        }
                    }

                    SetItem::Labels { variable, labels } => {
                        match rows[idx].get(variable).cloned() {
                            Some(Value::Node(n)) => {
                                for label in labels {
                                    if self.store.add_label(n.id, label)? {
                                        self.summary.labels_added += 1;
                                    }
                                }
                                self.rebind_node(&mut rows[idx], variable, n.id)?;
                            }
                            Some(Value::Null) => {}
                            Some(v) => {
                                return Err(Error::TypeError {
                                    expected: "Node".into(),
                                    got: v.type_name().into(),
                                })
                            }
                            None => {
                                return Err(Error::Runtime(format!("Unbound variable: {variable}")))
                            }
                        }
                    }

                    SetItem::Replace { variable, value } => {
                        let props = self.eval_property_source(value, &rows[idx])?;
                        match rows[idx].get(variable).cloned() {
                            Some(Value::Node(n)) => {
                                self.summary.properties_set += props.len() as u64;
                                self.store.update_node(n.id, props)?;
                                self.rebind_node(&mut rows[idx], variable, n.id)?;
                            }
                            Some(Value::Relationship(r)) => {
                                self.summary.properties_set += props.len() as u64;
                                self.store.update_relationship(r.id, props)?;
                                self.rebind_rel(&mut rows[idx], variable, r.id)?;
                            }
                            Some(Value::Null) => {}
                            Some(v) => {
                                return Err(Error::TypeError {
                                    expected: "Node or Relationship".into(),
                                    got: v.type_name().into(),
                                })
                            }
                            None => {
                                return Err(Error::Runtime(format!("Unbound variable: {variable}")))
                            }
                        }
                    }

                    SetItem::Merge { variable, value } => {
                        let props = self.eval_property_source(value, &rows[idx])?;
                        match rows[idx].get(variable).cloned() {
                            Some(Value::Node(n)) => {
                                for (key, val) in props {
                                    self.store.set_node_property(n.id, &key, val)?;
                                    self.summary.properties_set += 1;
                                }
                                self.rebind_node(&mut rows[idx], variable, n.id)?;
                            }
                            Some(Value::Relationship(r)) => {
                                for (key, val) in props {
                                    self.store.set_relationship_property(r.id, &key, val)?;
                                    self.summary.properties_set += 1;
                                }
                                self.rebind_rel(&mut rows[idx], variable, r.id)?;
                            }
                            Some(Value::Null) => {}
                            Some(v) => {
                                return Err(Error::TypeError {
                                    expected: "Node or Relationship".into(),
                                    got: v.type_name().into(),
                                })
                            }
                            None => {
                                return Err(Error::Runtime(format!("Unbound variable: {variable}")))
                            }
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Property map for `SET n = x` / `SET n += x`: a map literal, a map
    /// value, or another entity's properties.
    fn eval_property_source(&self, value: &Expr, row: &Row) -> Result<PropertyMap> {
        match self.eval(value, row)? {
            Value::Map(m) => Ok(m),
            Value::Node(n) => Ok(n.properties.clone()),
            Value::Relationship(r) => Ok(r.properties.clone()),
            v => Err(Error::TypeError {
                expected: "Map".into(),
                got: v.type_name().into(),
            }),
        }
    }

    fn apply_remove_items(&mut self, rows: &mut Vec<Row>, items: &[RemoveItem]) -> Result<()> {
        for idx in 0..rows.len() {
            for item in items {
                match item {
                    RemoveItem::Property { variable, keys } => {
                        if keys.len() != 1 {
                            return Err(Error::Runtime(
                                "Nested property paths are not supported in REMOVE".into(),
                            ));
                        }
                        match rows[idx].get(variable).cloned() {
                            Some(Value::Node(n)) => {
                                self.store.remove_node_property(n.id, &keys[0])?;
                                self.summary.properties_set += 1;
                                self.rebind_node(&mut rows[idx], variable, n.id)?;
                            }
                            Some(Value::Relationship(r)) => {
                                self.store.remove_relationship_property(r.id, &keys[0])?;
                                self.summary.properties_set += 1;
                                self.rebind_rel(&mut rows[idx], variable, r.id)?;
                            }
                            Some(Value::Null) => {}
                            Some(v) => {
                                return Err(Error::TypeError {
                                    expected: "Node or Relationship".into(),
                                    got: v.type_name().into(),
                                })
                            }
                            None => {
                                return Err(Error::Runtime(format!("Unbound variable: {variable}")))
                            }
                        }
                    }
                    RemoveItem::Labels { variable, labels } => {
                        match rows[idx].get(variable).cloned() {
                            Some(Value::Node(n)) => {
                                for label in labels {
                                    if self.store.remove_label(n.id, label)? {
                                        self.summary.labels_removed += 1;
                                    }
                                }
                                self.rebind_node(&mut rows[idx], variable, n.id)?;
                            }
                            Some(Value::Null) => {}
                            Some(v) => {
                                return Err(Error::TypeError {
                                    expected: "Node".into(),
                                    got: v.type_name().into(),
                                })
                            }
                            None => {
                                return Err(Error::Runtime(format!("Unbound variable: {variable}")))
                            }
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn rebind_node(&self, row: &mut Row, variable: &str, id: NodeId) -> Result<()> {
        let node = self
            .store
            .node(id)
            .ok_or_else(|| Error::NotFound(format!("Node {id}")))?;
        row.insert(variable.to_string(), Value::Node(Box::new(node)));
        Ok(())
    }

    fn rebind_rel(&self, row: &mut Row, variable: &str, id: RelId) -> Result<()> {
        let rel = self
            .store
            .relationship(id)
            .ok_or_else(|| Error::NotFound(format!("Relationship {id}")))?;
        row.insert(variable.to_string(), Value::Relationship(Box::new(rel)));
        Ok(())
    }

    // ========================================================================
    // DELETE
    // ========================================================================

    fn exec_delete(&mut self, rows: &[Row], d: &DeleteClause) -> Result<()> {
        let mut deleted_nodes: HashSet<NodeId> = HashSet::new();
        let mut deleted_rels: HashSet<RelId> = HashSet::new();

        for row in rows {
            for expr in &d.expressions {
                let val = self.eval(expr, row)?;
                self.delete_value(&val, &mut deleted_nodes, &mut deleted_rels)?;
            }
        }
        let _ = d.detach; // Both paths cascade; DETACH only changes intent.
        Ok(())
    }

    fn delete_value(
        &mut self,
        val: &Value,
        deleted_nodes: &mut HashSet<NodeId>,
        deleted_rels: &mut HashSet<RelId>,
    ) -> Result<()> {
        match val {
            Value::Node(n) => {
                if deleted_nodes.insert(n.id) {
                    let cascaded = self.store.delete_node(n.id)?;
                    self.summary.nodes_deleted += 1;
                    for rid in cascaded {
                        if deleted_rels.insert(rid) {
                            self.summary.relationships_deleted += 1;
                        }
                    }
                }
            }
            Value::Relationship(r) => {
                if deleted_rels.insert(r.id) && self.store.relationship(r.id).is_some() {
                    self.store.delete_relationship(r.id)?;
                    self.summary.relationships_deleted += 1;
                }
            }
            // DELETE r on a variable-length binding deletes each edge once
            Value::List(items) => {
                for item in items {
                    self.delete_value(item, deleted_nodes, deleted_rels)?;
                }
            }
            Value::Null => {}
            v => {
                return Err(Error::TypeError {
                    expected: "Node or Relationship".into(),
                    got: v.type_name().into(),
                })
            }
        }
        Ok(())
    }

    // ========================================================================
    // UNWIND
    // ========================================================================

    fn exec_unwind(&self, rows: Vec<Row>, u: &UnwindClause) -> Result<Vec<Row>> {
        let mut out = Vec::new();
        for row in rows {
            let val = self.eval(&u.expr, &row)?;
            match val {
                Value::List(items) => {
                    for item in items {
                        let mut new_row = row.clone();
                        new_row.insert(u.alias.clone(), item);
                        out.push(new_row);
                    }
                }
                // Null expands to zero rows
                Value::Null => {}
                // Non-list values expand to a single row
                scalar => {
                    let mut new_row = row.clone();
                    new_row.insert(u.alias.clone(), scalar);
                    out.push(new_row);
                }
            }
        }
        Ok(out)
    }

    // ========================================================================
    // CALL
    // ========================================================================

    fn exec_call(&self, rows: Vec<Row>, c: &CallClause) -> Result<Vec<Row>> {
        let (default_key, values): (&str, Vec<Value>) = match c.procedure.as_str() {
            "db.labels" => (
                "label",
                self.store.all_labels().into_iter().map(Value::String).collect(),
            ),
            "db.relationshipTypes" => (
                "relationshipType",
                self.store
                    .all_relationship_types()
                    .into_iter()
                    .map(Value::String)
                    .collect(),
            ),
            "db.propertyKeys" => (
                "propertyKey",
                self.store
                    .all_property_keys()
                    .into_iter()
                    .map(Value::String)
                    .collect(),
            ),
            name => return Err(Error::Runtime(format!("Unknown procedure: {name}"))),
        };
        if !c.args.is_empty() {
            return Err(Error::Runtime(format!(
                "Procedure {} takes no arguments",
                c.procedure
            )));
        }

        let binding_key = match c.yields.as_slice() {
            [] => default_key.to_string(),
            [item] if item.name == default_key => {
                item.alias.clone().unwrap_or_else(|| item.name.clone())
            }
            [item] => {
                return Err(Error::Runtime(format!(
                    "Procedure {} does not yield '{}'",
                    c.procedure, item.name
                )))
            }
            _ => {
                return Err(Error::Runtime(format!(
                    "Procedure {} yields a single field",
                    c.procedure
                )))
            }
        };

        let mut out = Vec::new();
        for row in &rows {
            for value in &values {
                let mut new_row = row.clone();
                new_row.insert(binding_key.clone(), value.clone());
                out.push(new_row);
            }
        }
        if let Some(predicate) = &c.where_clause {
            out = self.filter_rows(out, predicate)?;
        }
        Ok(out)
    }

    // ========================================================================
    // WITH / RETURN projection
    // ========================================================================

    fn exec_with(&self, rows: Vec<Row>, w: &WithClause) -> Result<Vec<Row>> {
        let projected = self.project(rows, &w.items, w.distinct, &w.order_by, &w.skip, &w.limit)?;
        let mut out: Vec<Row> = projected.rows;
        if let Some(predicate) = &w.where_clause {
            out = self.filter_rows(out, predicate)?;
        }
        Ok(out)
    }

    fn exec_return(&self, rows: Vec<Row>, r: &ReturnClause) -> Result<(Vec<String>, Vec<Vec<Value>>)> {
        let projected = self.project(rows, &r.items, r.distinct, &r.order_by, &r.skip, &r.limit)?;
        let records = projected
            .rows
            .iter()
            .map(|row| {
                projected
                    .keys
                    .iter()
                    .map(|k| row.get(k).cloned().unwrap_or(Value::Null))
                    .collect()
            })
            .collect();
        Ok((projected.keys, records))
    }

    fn project(
        &self,
        rows: Vec<Row>,
        items: &[ReturnItem],
        distinct: bool,
        order_by: &[OrderItem],
        skip: &Option<Expr>,
        limit: &Option<Expr>,
    ) -> Result<Projection> {
        // Expand RETURN * into the bound variables, sorted for stable keys.
        let mut expanded: Vec<ReturnItem> = Vec::new();
        for item in items {
            if matches!(item.expr, Expr::Star) {
                let mut vars: Vec<String> = rows
                    .iter()
                    .flat_map(|r| r.keys().cloned())
                    .collect::<HashSet<_>>()
                    .into_iter()
                    .collect();
                vars.sort();
                expanded.extend(vars.into_iter().map(|v| ReturnItem {
                    expr: Expr::Variable(v),
                    alias: None,
                }));
            } else {
                expanded.push(item.clone());
            }
        }

        let keys: Vec<String> = expanded.iter().map(|i| i.key()).collect();
        let aggregated = expanded.iter().any(|i| contains_aggregate(&i.expr));

        // (projected row, context row for ORDER BY)
        let mut projected: Vec<(Row, Row)> = if aggregated {
            self.project_aggregated(&rows, &expanded)?
        } else {
            let mut out = Vec::new();
            for row in &rows {
                let mut new_row = Row::new();
                for item in &expanded {
                    new_row.insert(item.key(), self.eval(&item.expr, row)?);
                }
                // ORDER BY may reference both source variables and aliases
                let mut order_ctx = row.clone();
                order_ctx.extend(new_row.clone());
                out.push((new_row, order_ctx));
            }
            out
        };

        if distinct {
            let mut seen: Vec<Vec<Value>> = Vec::new();
            projected.retain(|(row, _)| {
                let key: Vec<Value> =
                    keys.iter().map(|k| row.get(k).cloned().unwrap_or(Value::Null)).collect();
                if seen.contains(&key) {
                    false
                } else {
                    seen.push(key);
                    true
                }
            });
        }

        if !order_by.is_empty() {
            let mut keyed: Vec<(Vec<Value>, (Row, Row))> = Vec::new();
            for (row, order_ctx) in projected {
                let mut sort_key = Vec::new();
                for item in order_by {
                    sort_key.push(self.eval(&item.expr, &order_ctx).unwrap_or(Value::Null));
                }
                keyed.push((sort_key, (row, order_ctx)));
            }
            keyed.sort_by(|(a, _), (b, _)| {
                for (item, (va, vb)) in order_by.iter().zip(a.iter().zip(b.iter())) {
                    let ord = va.order_cmp(vb);
                    let ord = if item.ascending { ord } else { ord.reverse() };
                    if ord != std::cmp::Ordering::Equal {
                        return ord;
                    }
                }
                std::cmp::Ordering::Equal
            });
            projected = keyed.into_iter().map(|(_, rows)| rows).collect();
        }

        if let Some(skip_expr) = skip {
            let n = self.count_arg(skip_expr, "SKIP")?;
            projected = projected.into_iter().skip(n).collect();
        }
        if let Some(limit_expr) = limit {
            let n = self.count_arg(limit_expr, "LIMIT")?;
            projected = projected.into_iter().take(n).collect();
        }

        Ok(Projection {
            keys,
            rows: projected.into_iter().map(|(row, _)| row).collect(),
        })
    }

    fn count_arg(&self, expr: &Expr, clause: &str) -> Result<usize> {
        let val = self.eval(expr, &Row::new())?;
        match val.as_int() {
            Some(n) if n >= 0 => Ok(n as usize),
            _ => Err(Error::TypeError {
                expected: format!("non-negative integer for {clause}"),
                got: val.type_name().into(),
            }),
        }
    }

    fn project_aggregated(
        &self,
        rows: &[Row],
        items: &[ReturnItem],
    ) -> Result<Vec<(Row, Row)>> {
        let group_items: Vec<&ReturnItem> =
            items.iter().filter(|i| !contains_aggregate(&i.expr)).collect();
        let agg_items: Vec<&ReturnItem> =
            items.iter().filter(|i| contains_aggregate(&i.expr)).collect();

        // Group rows by the non-aggregated outputs, in first-seen order.
        let mut groups: Vec<(Vec<Value>, Vec<&Row>)> = Vec::new();
        for row in rows {
            let key: Vec<Value> = group_items
                .iter()
                .map(|i| self.eval(&i.expr, row))
                .collect::<Result<_>>()?;
            if let Some(group) = groups.iter_mut().find(|(k, _)| *k == key) {
                group.1.push(row);
            } else {
                groups.push((key, vec![row]));
            }
        }

        // Aggregation over zero rows still produces one row when ungrouped.
        if groups.is_empty() && group_items.is_empty() {
            groups.push((Vec::new(), Vec::new()));
        }

        let mut out = Vec::new();
        for (key_vals, group_rows) in &groups {
            let mut row = Row::new();
            for (i, item) in group_items.iter().enumerate() {
                row.insert(item.key(), key_vals[i].clone());
            }
            for item in &agg_items {
                row.insert(item.key(), self.compute_aggregate(&item.expr, group_rows)?);
            }
            out.push((row.clone(), row));
        }
        Ok(out)
    }

    /// Evaluate an expression containing an aggregate over a group of rows.
    fn compute_aggregate(&self, expr: &Expr, rows: &[&Row]) -> Result<Value> {
        match expr {
            Expr::FunctionCall { name, args, distinct } if is_aggregate(name) => {
                let vals: Vec<Value> = if args.is_empty() {
                    Vec::new()
                } else {
                    let mut v = Vec::new();
                    for row in rows {
                        let val = self.eval(&args[0], row)?;
                        if !val.is_null() {
                            v.push(val);
                        }
                    }
                    if *distinct {
                        let mut deduped: Vec<Value> = Vec::new();
                        for val in v {
                            if !deduped.contains(&val) {
                                deduped.push(val);
                            }
                        }
                        deduped
                    } else {
                        v
                    }
                };

                match name.to_ascii_lowercase().as_str() {
                    "count" => {
                        if args.is_empty() {
                            Ok(Value::Int(rows.len() as i64))
                        } else {
                            Ok(Value::Int(vals.len() as i64))
                        }
                    }
                    "sum" => {
                        let mut sum_i: i64 = 0;
                        let mut sum_f: f64 = 0.0;
                        let mut has_float = false;
                        for val in &vals {
                            match val {
                                Value::Int(i) => sum_i += i,
                                Value::Float(f) => {
                                    has_float = true;
                                    sum_f += f;
                                }
                                v => {
                                    return Err(Error::TypeError {
                                        expected: "Numeric".into(),
                                        got: v.type_name().into(),
                                    })
                                }
                            }
                        }
                        if has_float {
                            Ok(Value::Float(sum_i as f64 + sum_f))
                        } else {
                            Ok(Value::Int(sum_i))
                        }
                    }
                    "avg" => {
                        if vals.is_empty() {
                            return Ok(Value::Null);
                        }
                        let mut sum = 0.0;
                        for val in &vals {
                            sum += val.as_float().ok_or_else(|| Error::TypeError {
                                expected: "Numeric".into(),
                                got: val.type_name().into(),
                            })?;
                        }
                        Ok(Value::Float(sum / vals.len() as f64))
                    }
                    "min" => Ok(vals
                        .into_iter()
                        .reduce(|a, b| {
                            if a.cypher_cmp(&b) == Some(std::cmp::Ordering::Less) {
                                a
                            } else {
                                b
                            }
                        })
                        .unwrap_or(Value::Null)),
                    "max" => Ok(vals
                        .into_iter()
                        .reduce(|a, b| {
                            if a.cypher_cmp(&b) == Some(std::cmp::Ordering::Greater) {
                                a
                            } else {
                                b
                            }
                        })
                        .unwrap_or(Value::Null)),
                    "collect" => Ok(Value::List(vals)),
                    other => Err(Error::Runtime(format!("Unknown aggregate: {other}"))),
                }
            }

            // Aggregates nested in arithmetic: count(n) + 1
            Expr::Binary { left, op, right } => {
                let l = self.compute_aggregate(left, rows)?;
                let r = self.compute_aggregate(right, rows)?;
                let dummy = Expr::Binary {
                    left: Box::new(value_to_literal(&l)),
                    op: *op,
                    right: Box::new(value_to_literal(&r)),
                };
                self.eval(&dummy, &Row::new())
            }
            Expr::Unary { op, expr: inner } => {
                let v = self.compute_aggregate(inner, rows)?;
                let dummy = Expr::Unary {
                    op: *op,
                    expr: Box::new(value_to_literal(&v)),
                };
                self.eval(&dummy, &Row::new())
            }

            // Non-aggregate subexpressions evaluate against the first row.
            other => match rows.first() {
                Some(row) => self.eval(other, row),
                None => Ok(Value::Null),
            },
        }
    }
}

struct Projection {
    keys: Vec<String>,
    rows: Vec<Row>,
}

fn contains_aggregate(expr: &Expr) -> bool {
    match expr {
        Expr::FunctionCall { name, args, .. } => {
            is_aggregate(name) || args.iter().any(contains_aggregate)
        }
        Expr::Binary { left, right, .. } => contains_aggregate(left) || contains_aggregate(right),
        Expr::Unary { expr, .. } => contains_aggregate(expr),
        Expr::Property { expr, .. } => contains_aggregate(expr),
        Expr::List(items) => items.iter().any(contains_aggregate),
        Expr::Map(entries) => entries.iter().any(|(_, e)| contains_aggregate(e)),
        Expr::Case { operand, whens, else_expr } => {
            operand.as_deref().map(contains_aggregate).unwrap_or(false)
                || whens.iter().any(|(w, t)| contains_aggregate(w) || contains_aggregate(t))
                || else_expr.as_deref().map(contains_aggregate).unwrap_or(false)
        }
        _ => false,
    }
}

/// Rebuild a literal expression from a computed value so aggregate results can
/// flow back through the evaluator.
fn value_to_literal(val: &Value) -> Expr {
    match val {
        Value::Null => Expr::Null,
        Value::Bool(b) => Expr::Bool(*b),
        Value::Int(i) => Expr::Integer(*i),
        Value::Float(f) => Expr::Float(*f),
        Value::String(s) => Expr::Str(s.clone()),
        Value::List(items) => Expr::List(items.iter().map(value_to_literal).collect()),
        // Entities and maps cannot round-trip through literals; compare by id
        // is not needed here, so degrade to null.
        _ => Expr::Null,
    }
}
