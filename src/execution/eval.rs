//! Expression evaluator.
//!
//! Evaluates a Cypher expression against a row of bound variables. Null
//! propagates through arithmetic and comparison; AND/OR/XOR follow Cypher
//! ternary logic; `+` with a string operand concatenates via string coercion.

use std::collections::HashMap;

use crate::cypher::ast::{BinaryOp, Expr, Quantifier, UnaryOp};
use crate::model::{PropertyMap, Value};
use crate::storage::GraphStore;
use crate::{Error, Result};

use super::functions::eval_function;
use super::matcher;
use super::Row;

/// Read-only context for expression evaluation.
pub struct EvalContext<'a> {
    pub store: &'a GraphStore,
    pub params: &'a PropertyMap,
}

/// Evaluate a Cypher expression against a row of bound variables.
pub fn eval_expr(expr: &Expr, row: &Row, ctx: &EvalContext) -> Result<Value> {
    match expr {
        Expr::Integer(i) => Ok(Value::Int(*i)),
        Expr::Float(f) => Ok(Value::Float(*f)),
        Expr::Str(s) => Ok(Value::String(s.clone())),
        Expr::Bool(b) => Ok(Value::Bool(*b)),
        Expr::Null => Ok(Value::Null),

        Expr::Variable(name) => row
            .get(name)
            .cloned()
            .ok_or_else(|| Error::Runtime(format!("Unbound variable: {name}"))),

        Expr::Parameter(name) => ctx
            .params
            .get(name)
            .cloned()
            .ok_or_else(|| Error::Runtime(format!("Missing parameter: ${name}"))),

        Expr::Property { expr: inner, key } => {
            let val = eval_expr(inner, row, ctx)?;
            match val {
                Value::Node(n) => Ok(n.get(key).cloned().unwrap_or(Value::Null)),
                Value::Relationship(r) => Ok(r.get(key).cloned().unwrap_or(Value::Null)),
                Value::Map(m) => Ok(m.get(key).cloned().unwrap_or(Value::Null)),
                Value::Null => Ok(Value::Null),
                _ => Err(Error::TypeError {
                    expected: "Node, Relationship, or Map".into(),
                    got: val.type_name().into(),
                }),
            }
        }

        Expr::List(items) => {
            let vals: Vec<Value> = items
                .iter()
                .map(|e| eval_expr(e, row, ctx))
                .collect::<Result<_>>()?;
            Ok(Value::List(vals))
        }

        Expr::Map(entries) => {
            let mut map = HashMap::new();
            for (k, v) in entries {
                map.insert(k.clone(), eval_expr(v, row, ctx)?);
            }
            Ok(Value::Map(map))
        }

        Expr::Binary { left, op, right } => {
            let lv = eval_expr(left, row, ctx)?;
            let rv = eval_expr(right, row, ctx)?;
            eval_binary_op(&lv, *op, &rv)
        }

        Expr::Unary { op, expr: inner } => {
            let val = eval_expr(inner, row, ctx)?;
            match op {
                UnaryOp::Not => match val {
                    Value::Null => Ok(Value::Null),
                    v => Ok(Value::Bool(!v.is_truthy())),
                },
                UnaryOp::Minus => match val {
                    Value::Int(i) => Ok(Value::Int(-i)),
                    Value::Float(f) => Ok(Value::Float(-f)),
                    Value::Null => Ok(Value::Null),
                    v => Err(Error::TypeError {
                        expected: "Numeric".into(),
                        got: v.type_name().into(),
                    }),
                },
                UnaryOp::Plus => match val {
                    Value::Int(_) | Value::Float(_) | Value::Null => Ok(val),
                    v => Err(Error::TypeError {
                        expected: "Numeric".into(),
                        got: v.type_name().into(),
                    }),
                },
                UnaryOp::IsNull => Ok(Value::Bool(val.is_null())),
                UnaryOp::IsNotNull => Ok(Value::Bool(!val.is_null())),
            }
        }

        Expr::FunctionCall { name, args, distinct: _ } => eval_function(name, args, row, ctx),

        Expr::Case { operand, whens, else_expr } => {
            if let Some(op) = operand {
                let op_val = eval_expr(op, row, ctx)?;
                for (when_expr, then_expr) in whens {
                    let when_val = eval_expr(when_expr, row, ctx)?;
                    if values_equal(&op_val, &when_val) == Some(true) {
                        return eval_expr(then_expr, row, ctx);
                    }
                }
            } else {
                for (when_expr, then_expr) in whens {
                    if eval_expr(when_expr, row, ctx)?.is_truthy() {
                        return eval_expr(then_expr, row, ctx);
                    }
                }
            }
            match else_expr {
                Some(e) => eval_expr(e, row, ctx),
                None => Ok(Value::Null),
            }
        }

        Expr::Pattern(pattern) | Expr::Exists(pattern) => {
            let found = matcher::pattern_has_match(ctx.store, pattern, row, ctx.params)?;
            Ok(Value::Bool(found))
        }

        Expr::Quantified { quantifier, variable, list, predicate } => {
            let list_val = eval_expr(list, row, ctx)?;
            let items = match list_val {
                Value::Null => return Ok(Value::Null),
                Value::List(items) => items,
                v => {
                    return Err(Error::TypeError {
                        expected: "List".into(),
                        got: v.type_name().into(),
                    })
                }
            };
            let mut matched = 0usize;
            let total = items.len();
            for item in items {
                let mut inner = row.clone();
                inner.insert(variable.clone(), item);
                if eval_expr(predicate, &inner, ctx)?.is_truthy() {
                    matched += 1;
                }
            }
            let result = match quantifier {
                Quantifier::All => matched == total,
                Quantifier::Any => matched > 0,
                Quantifier::None => matched == 0,
                Quantifier::Single => matched == 1,
            };
            Ok(Value::Bool(result))
        }

        Expr::ListComprehension { variable, list, predicate, projection } => {
            let list_val = eval_expr(list, row, ctx)?;
            let items = match list_val {
                Value::Null => return Ok(Value::Null),
                Value::List(items) => items,
                v => {
                    return Err(Error::TypeError {
                        expected: "List".into(),
                        got: v.type_name().into(),
                    })
                }
            };
            let mut out = Vec::new();
            for item in items {
                let mut inner = row.clone();
                inner.insert(variable.clone(), item.clone());
                if let Some(pred) = predicate {
                    if !eval_expr(pred, &inner, ctx)?.is_truthy() {
                        continue;
                    }
                }
                match projection {
                    Some(proj) => out.push(eval_expr(proj, &inner, ctx)?),
                    None => out.push(item),
                }
            }
            Ok(Value::List(out))
        }

        Expr::Star => Err(Error::Runtime("'*' is only valid in RETURN or count(*)".into())),
    }
}

// ============================================================================
// Binary operator evaluation
// ============================================================================

fn eval_binary_op(left: &Value, op: BinaryOp, right: &Value) -> Result<Value> {
    match op {
        // Ternary logic — evaluated even with null operands
        BinaryOp::And => Ok(ternary_and(left, right)),
        BinaryOp::Or => Ok(ternary_or(left, right)),
        BinaryOp::Xor => {
            if left.is_null() || right.is_null() {
                Ok(Value::Null)
            } else {
                Ok(Value::Bool(left.is_truthy() ^ right.is_truthy()))
            }
        }

        // Null propagation for everything else
        _ if left.is_null() || right.is_null() => Ok(Value::Null),

        BinaryOp::Eq => Ok(values_equal(left, right).map(Value::Bool).unwrap_or(Value::Null)),
        BinaryOp::Neq => Ok(values_equal(left, right)
            .map(|eq| Value::Bool(!eq))
            .unwrap_or(Value::Null)),
        BinaryOp::Lt => Ok(cmp_to_value(left, right, |o| o == std::cmp::Ordering::Less)),
        BinaryOp::Lte => Ok(cmp_to_value(left, right, |o| o != std::cmp::Ordering::Greater)),
        BinaryOp::Gt => Ok(cmp_to_value(left, right, |o| o == std::cmp::Ordering::Greater)),
        BinaryOp::Gte => Ok(cmp_to_value(left, right, |o| o != std::cmp::Ordering::Less)),

        BinaryOp::Add => eval_add(left, right),
        BinaryOp::Sub => eval_arith(left, right, i64::wrapping_sub, |a, b| a - b),
        BinaryOp::Mul => eval_arith(left, right, i64::wrapping_mul, |a, b| a * b),
        BinaryOp::Div => {
            if is_zero(right) {
                return Err(Error::TypeError {
                    expected: "non-zero divisor".into(),
                    got: "0".into(),
                });
            }
            eval_arith(left, right, i64::wrapping_div, |a, b| a / b)
        }
        BinaryOp::Mod => {
            if is_zero(right) {
                return Err(Error::TypeError {
                    expected: "non-zero divisor".into(),
                    got: "0".into(),
                });
            }
            eval_arith(left, right, i64::wrapping_rem, |a, b| a % b)
        }
        BinaryOp::Pow => {
            let l = left.as_float().ok_or_else(|| Error::TypeError {
                expected: "Numeric".into(),
                got: left.type_name().into(),
            })?;
            let r = right.as_float().ok_or_else(|| Error::TypeError {
                expected: "Numeric".into(),
                got: right.type_name().into(),
            })?;
            Ok(Value::Float(l.powf(r)))
        }

        BinaryOp::In => match right {
            Value::List(items) => {
                Ok(Value::Bool(items.iter().any(|v| values_equal(left, v) == Some(true))))
            }
            v => Err(Error::TypeError {
                expected: "List".into(),
                got: v.type_name().into(),
            }),
        },

        BinaryOp::StartsWith | BinaryOp::EndsWith | BinaryOp::Contains => {
            match (left, right) {
                (Value::String(a), Value::String(b)) => {
                    let result = match op {
                        BinaryOp::StartsWith => a.starts_with(b.as_str()),
                        BinaryOp::EndsWith => a.ends_with(b.as_str()),
                        _ => a.contains(b.as_str()),
                    };
                    Ok(Value::Bool(result))
                }
                _ => Err(Error::TypeError {
                    expected: "String".into(),
                    got: format!("{}, {}", left.type_name(), right.type_name()),
                }),
            }
        }

        BinaryOp::RegexMatch => Err(Error::Runtime(
            "Regular expression matching (=~) is not supported".into(),
        )),
    }
}

fn ternary_and(left: &Value, right: &Value) -> Value {
    let l = truth(left);
    let r = truth(right);
    match (l, r) {
        (Some(false), _) | (_, Some(false)) => Value::Bool(false),
        (Some(true), Some(true)) => Value::Bool(true),
        _ => Value::Null,
    }
}

fn ternary_or(left: &Value, right: &Value) -> Value {
    let l = truth(left);
    let r = truth(right);
    match (l, r) {
        (Some(true), _) | (_, Some(true)) => Value::Bool(true),
        (Some(false), Some(false)) => Value::Bool(false),
        _ => Value::Null,
    }
}

fn truth(v: &Value) -> Option<bool> {
    match v {
        Value::Null => None,
        v => Some(v.is_truthy()),
    }
}

/// Deep equality with numeric cross-type comparison. None for null operands.
pub fn values_equal(left: &Value, right: &Value) -> Option<bool> {
    match (left, right) {
        (Value::Null, _) | (_, Value::Null) => None,
        (l, r) if l.is_numeric() && r.is_numeric() => {
            Some(l.cypher_cmp(r) == Some(std::cmp::Ordering::Equal))
        }
        (l, r) => Some(l == r),
    }
}

fn cmp_to_value(left: &Value, right: &Value, pred: fn(std::cmp::Ordering) -> bool) -> Value {
    match left.cypher_cmp(right) {
        Some(ord) => Value::Bool(pred(ord)),
        None => Value::Null,
    }
}

fn is_zero(v: &Value) -> bool {
    matches!(v, Value::Int(0)) || matches!(v, Value::Float(f) if *f == 0.0)
}

fn eval_add(left: &Value, right: &Value) -> Result<Value> {
    match (left, right) {
        (Value::Int(a), Value::Int(b)) => Ok(Value::Int(a.wrapping_add(*b))),
        (Value::Float(a), Value::Float(b)) => Ok(Value::Float(a + b)),
        (Value::Int(a), Value::Float(b)) => Ok(Value::Float(*a as f64 + b)),
        (Value::Float(a), Value::Int(b)) => Ok(Value::Float(a + *b as f64)),
        // Either operand a string → concatenate via string coercion
        (Value::String(_), _) | (_, Value::String(_)) => {
            Ok(Value::String(format!("{}{}", coerce_str(left), coerce_str(right))))
        }
        (Value::List(a), Value::List(b)) => {
            let mut out = a.clone();
            out.extend(b.clone());
            Ok(Value::List(out))
        }
        (Value::List(a), b) => {
            let mut out = a.clone();
            out.push(b.clone());
            Ok(Value::List(out))
        }
        _ => Err(Error::TypeError {
            expected: "compatible operands for +".into(),
            got: format!("{}, {}", left.type_name(), right.type_name()),
        }),
    }
}

/// String coercion used by `+` concatenation and `toString`.
pub fn coerce_str(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn eval_arith(
    left: &Value,
    right: &Value,
    int_op: fn(i64, i64) -> i64,
    float_op: fn(f64, f64) -> f64,
) -> Result<Value> {
    match (left, right) {
        (Value::Int(a), Value::Int(b)) => Ok(Value::Int(int_op(*a, *b))),
        (Value::Float(a), Value::Float(b)) => Ok(Value::Float(float_op(*a, *b))),
        (Value::Int(a), Value::Float(b)) => Ok(Value::Float(float_op(*a as f64, *b))),
        (Value::Float(a), Value::Int(b)) => Ok(Value::Float(float_op(*a, *b as f64))),
        _ => Err(Error::TypeError {
            expected: "Numeric".into(),
            got: format!("{}, {}", left.type_name(), right.type_name()),
        }),
    }
}
