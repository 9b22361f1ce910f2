//! Built-in scalar functions.
//!
//! Function names resolve case-insensitively. Unknown names evaluate to null
//! so queries written against a larger function surface degrade gracefully.
//! Aggregates (count/sum/avg/min/max/collect) are computed by the RETURN/WITH
//! projection; when one appears outside an aggregation context its argument
//! evaluates per-row.

use chrono::Utc;

use crate::cypher::ast::Expr;
use crate::model::Value;
use crate::{Error, Result};

use super::eval::{coerce_str, eval_expr, EvalContext};
use super::Row;

/// Aggregate function names, recognized by the projection code.
pub const AGGREGATES: &[&str] = &["count", "sum", "avg", "min", "max", "collect"];

pub fn is_aggregate(name: &str) -> bool {
    AGGREGATES.iter().any(|a| a.eq_ignore_ascii_case(name))
}

pub fn eval_function(name: &str, args: &[Expr], row: &Row, ctx: &EvalContext) -> Result<Value> {
    let lower = name.to_ascii_lowercase();

    // Aggregates outside an aggregation context: evaluate the argument per-row.
    if is_aggregate(&lower) {
        return match args.first() {
            Some(arg) => eval_expr(arg, row, ctx),
            None => Ok(Value::Int(1)),
        };
    }

    let eval_arg = |i: usize| -> Result<Value> {
        let arg = args.get(i).ok_or_else(|| Error::TypeError {
            expected: format!("argument {} for {name}()", i + 1),
            got: "nothing".into(),
        })?;
        eval_expr(arg, row, ctx)
    };

    match lower.as_str() {
        "id" => {
            let val = eval_arg(0)?;
            match val {
                Value::Node(n) => Ok(Value::Int(n.id.0 as i64)),
                Value::Relationship(r) => Ok(Value::Int(r.id.0 as i64)),
                Value::Null => Ok(Value::Null),
                v => Err(type_err("Node or Relationship", &v)),
            }
        }
        "type" => {
            let val = eval_arg(0)?;
            match val {
                Value::Relationship(r) => Ok(Value::String(r.rel_type.clone())),
                Value::Null => Ok(Value::Null),
                v => Err(type_err("Relationship", &v)),
            }
        }
        "labels" => {
            let val = eval_arg(0)?;
            match val {
                Value::Node(n) => Ok(Value::List(
                    n.labels.iter().map(|l| Value::String(l.clone())).collect(),
                )),
                Value::Null => Ok(Value::Null),
                v => Err(type_err("Node", &v)),
            }
        }
        "properties" => {
            let val = eval_arg(0)?;
            match val {
                Value::Node(n) => Ok(Value::Map(n.properties.clone())),
                Value::Relationship(r) => Ok(Value::Map(r.properties.clone())),
                Value::Map(_) => Ok(val),
                Value::Null => Ok(Value::Null),
                v => Err(type_err("Node, Relationship, or Map", &v)),
            }
        }
        "keys" => {
            let val = eval_arg(0)?;
            let mut keys: Vec<String> = match val {
                Value::Node(n) => n.properties.keys().cloned().collect(),
                Value::Relationship(r) => r.properties.keys().cloned().collect(),
                Value::Map(m) => m.keys().cloned().collect(),
                Value::Null => return Ok(Value::Null),
                v => return Err(type_err("Node, Relationship, or Map", &v)),
            };
            keys.sort();
            Ok(Value::List(keys.into_iter().map(Value::String).collect()))
        }
        "tostring" => {
            let val = eval_arg(0)?;
            match val {
                Value::Null => Ok(Value::Null),
                v => Ok(Value::String(coerce_str(&v))),
            }
        }
        "tointeger" | "toint" => {
            let val = eval_arg(0)?;
            match val {
                Value::Int(_) => Ok(val),
                Value::Float(f) => Ok(Value::Int(f as i64)),
                Value::Bool(b) => Ok(Value::Int(b as i64)),
                Value::String(s) => Ok(s.trim().parse::<i64>().map(Value::Int).unwrap_or(Value::Null)),
                Value::Null => Ok(Value::Null),
                v => Err(type_err("convertible to Integer", &v)),
            }
        }
        "tofloat" => {
            let val = eval_arg(0)?;
            match val {
                Value::Float(_) => Ok(val),
                Value::Int(i) => Ok(Value::Float(i as f64)),
                Value::String(s) => Ok(s.trim().parse::<f64>().map(Value::Float).unwrap_or(Value::Null)),
                Value::Null => Ok(Value::Null),
                v => Err(type_err("convertible to Float", &v)),
            }
        }
        "toboolean" => {
            let val = eval_arg(0)?;
            match val {
                Value::Bool(_) => Ok(val),
                Value::String(s) => match s.to_ascii_lowercase().as_str() {
                    "true" => Ok(Value::Bool(true)),
                    "false" => Ok(Value::Bool(false)),
                    _ => Ok(Value::Null),
                },
                Value::Null => Ok(Value::Null),
                v => Err(type_err("convertible to Boolean", &v)),
            }
        }
        "size" | "length" => {
            let val = eval_arg(0)?;
            match val {
                Value::String(s) => Ok(Value::Int(s.chars().count() as i64)),
                Value::List(l) => Ok(Value::Int(l.len() as i64)),
                Value::Map(m) => Ok(Value::Int(m.len() as i64)),
                Value::Null => Ok(Value::Null),
                v => Err(type_err("String, List, or Map", &v)),
            }
        }
        "coalesce" => {
            for arg in args {
                let val = eval_expr(arg, row, ctx)?;
                if !val.is_null() {
                    return Ok(val);
                }
            }
            Ok(Value::Null)
        }
        "head" => {
            let val = eval_arg(0)?;
            match val {
                Value::List(l) => Ok(l.into_iter().next().unwrap_or(Value::Null)),
                Value::Null => Ok(Value::Null),
                v => Err(type_err("List", &v)),
            }
        }
        "last" => {
            let val = eval_arg(0)?;
            match val {
                Value::List(l) => Ok(l.into_iter().next_back().unwrap_or(Value::Null)),
                Value::Null => Ok(Value::Null),
                v => Err(type_err("List", &v)),
            }
        }
        "tail" => {
            let val = eval_arg(0)?;
            match val {
                Value::List(mut l) => {
                    if !l.is_empty() {
                        l.remove(0);
                    }
                    Ok(Value::List(l))
                }
                Value::Null => Ok(Value::Null),
                v => Err(type_err("List", &v)),
            }
        }
        "range" => {
            let start = int_arg(eval_arg(0)?)?;
            let end = int_arg(eval_arg(1)?)?;
            let step = if args.len() > 2 { int_arg(eval_arg(2)?)? } else { 1 };
            if step == 0 {
                return Err(Error::TypeError {
                    expected: "non-zero step for range()".into(),
                    got: "0".into(),
                });
            }
            let mut list = Vec::new();
            let mut i = start;
            // Inclusive at both ends
            while (step > 0 && i <= end) || (step < 0 && i >= end) {
                list.push(Value::Int(i));
                i += step;
            }
            Ok(Value::List(list))
        }
        "abs" => {
            let val = eval_arg(0)?;
            match val {
                Value::Int(i) => Ok(Value::Int(i.abs())),
                Value::Float(f) => Ok(Value::Float(f.abs())),
                Value::Null => Ok(Value::Null),
                v => Err(type_err("Numeric", &v)),
            }
        }
        "ceil" => float_fn(eval_arg(0)?, f64::ceil),
        "floor" => float_fn(eval_arg(0)?, f64::floor),
        "round" => float_fn(eval_arg(0)?, f64::round),
        "sqrt" => float_fn(eval_arg(0)?, f64::sqrt),
        "sign" => {
            let val = eval_arg(0)?;
            match val {
                Value::Int(i) => Ok(Value::Int(i.signum())),
                Value::Float(f) => Ok(Value::Int(if f > 0.0 { 1 } else if f < 0.0 { -1 } else { 0 })),
                Value::Null => Ok(Value::Null),
                v => Err(type_err("Numeric", &v)),
            }
        }
        "rand" => {
            // Pseudo-random from the subsecond clock; good enough without an
            // RNG dependency.
            let nanos = Utc::now().timestamp_subsec_nanos();
            Ok(Value::Float(f64::from(nanos) / 1e9))
        }
        "tolower" => string_fn(eval_arg(0)?, |s| s.to_lowercase()),
        "toupper" => string_fn(eval_arg(0)?, |s| s.to_uppercase()),
        "trim" => string_fn(eval_arg(0)?, |s| s.trim().to_string()),
        "ltrim" => string_fn(eval_arg(0)?, |s| s.trim_start().to_string()),
        "rtrim" => string_fn(eval_arg(0)?, |s| s.trim_end().to_string()),
        "replace" => {
            let s = eval_arg(0)?;
            let from = eval_arg(1)?;
            let to = eval_arg(2)?;
            match (&s, &from, &to) {
                (Value::Null, _, _) | (_, Value::Null, _) | (_, _, Value::Null) => Ok(Value::Null),
                (Value::String(s), Value::String(from), Value::String(to)) => {
                    Ok(Value::String(s.replace(from.as_str(), to)))
                }
                _ => Err(type_err("String", &s)),
            }
        }
        "substring" => {
            let s = eval_arg(0)?;
            let start = int_arg(eval_arg(1)?)?.max(0) as usize;
            match s {
                Value::Null => Ok(Value::Null),
                Value::String(s) => {
                    let chars: Vec<char> = s.chars().collect();
                    let end = if args.len() > 2 {
                        let len = int_arg(eval_arg(2)?)?.max(0) as usize;
                        (start + len).min(chars.len())
                    } else {
                        chars.len()
                    };
                    let start = start.min(chars.len());
                    Ok(Value::String(chars[start..end].iter().collect()))
                }
                v => Err(type_err("String", &v)),
            }
        }
        "left" => {
            let s = eval_arg(0)?;
            let n = int_arg(eval_arg(1)?)?.max(0) as usize;
            match s {
                Value::Null => Ok(Value::Null),
                Value::String(s) => Ok(Value::String(s.chars().take(n).collect())),
                v => Err(type_err("String", &v)),
            }
        }
        "right" => {
            let s = eval_arg(0)?;
            let n = int_arg(eval_arg(1)?)?.max(0) as usize;
            match s {
                Value::Null => Ok(Value::Null),
                Value::String(s) => {
                    let chars: Vec<char> = s.chars().collect();
                    let skip = chars.len().saturating_sub(n);
                    Ok(Value::String(chars[skip..].iter().collect()))
                }
                v => Err(type_err("String", &v)),
            }
        }
        "split" => {
            let s = eval_arg(0)?;
            let sep = eval_arg(1)?;
            match (&s, &sep) {
                (Value::Null, _) | (_, Value::Null) => Ok(Value::Null),
                (Value::String(s), Value::String(sep)) => Ok(Value::List(
                    s.split(sep.as_str())
                        .map(|part| Value::String(part.to_string()))
                        .collect(),
                )),
                _ => Err(type_err("String", &s)),
            }
        }
        "reverse" => {
            let val = eval_arg(0)?;
            match val {
                Value::String(s) => Ok(Value::String(s.chars().rev().collect())),
                Value::List(mut l) => {
                    l.reverse();
                    Ok(Value::List(l))
                }
                Value::Null => Ok(Value::Null),
                v => Err(type_err("String or List", &v)),
            }
        }
        "timestamp" => Ok(Value::Int(Utc::now().timestamp_millis())),
        "date" => Ok(Value::String(Utc::now().format("%Y-%m-%d").to_string())),
        "datetime" => Ok(Value::String(Utc::now().to_rfc3339())),

        // Unknown functions evaluate to null.
        _ => Ok(Value::Null),
    }
}

fn type_err(expected: &str, got: &Value) -> Error {
    Error::TypeError {
        expected: expected.into(),
        got: got.type_name().into(),
    }
}

fn int_arg(val: Value) -> Result<i64> {
    val.as_int().ok_or_else(|| type_err("Integer", &val))
}

fn float_fn(val: Value, op: fn(f64) -> f64) -> Result<Value> {
    match val {
        Value::Null => Ok(Value::Null),
        v => match v.as_float() {
            Some(f) => Ok(Value::Float(op(f))),
            None => Err(type_err("Numeric", &v)),
        },
    }
}

fn string_fn(val: Value, op: fn(&str) -> String) -> Result<Value> {
    match val {
        Value::Null => Ok(Value::Null),
        Value::String(s) => Ok(Value::String(op(&s))),
        v => Err(type_err("String", &v)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cypher::parse;
    use crate::cypher::ast::Clause;
    use crate::model::PropertyMap;
    use crate::storage::GraphStore;

    fn call(src: &str) -> Result<Value> {
        let store = GraphStore::new();
        let params = PropertyMap::new();
        let ctx = EvalContext { store: &store, params: &params };
        let query = parse(&format!("RETURN {src}")).unwrap();
        let expr = match &query.clauses[0] {
            Clause::Return(r) => r.items[0].expr.clone(),
            _ => unreachable!(),
        };
        eval_expr(&expr, &Row::new(), &ctx)
    }

    #[test]
    fn test_size_of_empty() {
        assert_eq!(call("size([])").unwrap(), Value::Int(0));
        assert_eq!(call("size('')").unwrap(), Value::Int(0));
        assert_eq!(call("length('abc')").unwrap(), Value::Int(3));
    }

    #[test]
    fn test_coalesce() {
        assert_eq!(call("coalesce(null, null, 7)").unwrap(), Value::Int(7));
        assert_eq!(call("coalesce(null)").unwrap(), Value::Null);
    }

    #[test]
    fn test_range_inclusive() {
        assert_eq!(
            call("range(1, 5)").unwrap(),
            Value::List((1..=5).map(Value::Int).collect())
        );
        assert_eq!(
            call("range(5, 1, -2)").unwrap(),
            Value::List(vec![Value::Int(5), Value::Int(3), Value::Int(1)])
        );
        assert!(call("range(1, 5, 0)").is_err());
    }

    #[test]
    fn test_list_functions() {
        assert_eq!(call("head([1, 2])").unwrap(), Value::Int(1));
        assert_eq!(call("last([1, 2])").unwrap(), Value::Int(2));
        assert_eq!(call("tail([1, 2, 3])").unwrap(), Value::List(vec![Value::Int(2), Value::Int(3)]));
        assert_eq!(call("head([])").unwrap(), Value::Null);
        assert_eq!(call("reverse([1, 2])").unwrap(), Value::List(vec![Value::Int(2), Value::Int(1)]));
    }

    #[test]
    fn test_string_functions() {
        assert_eq!(call("toUpper('ada')").unwrap(), Value::String("ADA".into()));
        assert_eq!(call("toLower('ADA')").unwrap(), Value::String("ada".into()));
        assert_eq!(call("trim('  x  ')").unwrap(), Value::String("x".into()));
        assert_eq!(call("ltrim('  x')").unwrap(), Value::String("x".into()));
        assert_eq!(call("rtrim('x  ')").unwrap(), Value::String("x".into()));
        assert_eq!(call("replace('aaa', 'a', 'b')").unwrap(), Value::String("bbb".into()));
        assert_eq!(call("substring('hello', 1, 3)").unwrap(), Value::String("ell".into()));
        assert_eq!(call("substring('hello', 2)").unwrap(), Value::String("llo".into()));
        assert_eq!(call("left('hello', 2)").unwrap(), Value::String("he".into()));
        assert_eq!(call("right('hello', 2)").unwrap(), Value::String("lo".into()));
        assert_eq!(
            call("split('a,b,c', ',')").unwrap(),
            Value::List(vec![
                Value::String("a".into()),
                Value::String("b".into()),
                Value::String("c".into()),
            ])
        );
        assert_eq!(call("reverse('abc')").unwrap(), Value::String("cba".into()));
    }

    #[test]
    fn test_conversions() {
        assert_eq!(call("toInteger('42')").unwrap(), Value::Int(42));
        assert_eq!(call("toInteger('nope')").unwrap(), Value::Null);
        assert_eq!(call("toFloat('2.5')").unwrap(), Value::Float(2.5));
        assert_eq!(call("toBoolean('true')").unwrap(), Value::Bool(true));
        assert_eq!(call("toString(42)").unwrap(), Value::String("42".into()));
        assert_eq!(call("toString(null)").unwrap(), Value::Null);
    }

    #[test]
    fn test_math_functions() {
        assert_eq!(call("abs(-3)").unwrap(), Value::Int(3));
        assert_eq!(call("ceil(1.2)").unwrap(), Value::Float(2.0));
        assert_eq!(call("floor(1.8)").unwrap(), Value::Float(1.0));
        assert_eq!(call("round(1.5)").unwrap(), Value::Float(2.0));
        assert_eq!(call("sqrt(16)").unwrap(), Value::Float(4.0));
        assert_eq!(call("sign(-9)").unwrap(), Value::Int(-1));
        assert_eq!(call("sign(0)").unwrap(), Value::Int(0));
    }

    #[test]
    fn test_case_insensitive_names() {
        assert_eq!(call("TOUPPER('a')").unwrap(), Value::String("A".into()));
        assert_eq!(call("Size([1])").unwrap(), Value::Int(1));
    }

    #[test]
    fn test_unknown_function_is_null() {
        assert_eq!(call("definitelyNotAFunction(1, 2)").unwrap(), Value::Null);
    }

    #[test]
    fn test_temporal_shapes() {
        assert!(matches!(call("timestamp()").unwrap(), Value::Int(_)));
        match call("date()").unwrap() {
            Value::String(s) => assert_eq!(s.len(), 10),
            other => panic!("Expected string date, got {other:?}"),
        }
        assert!(matches!(call("datetime()").unwrap(), Value::String(_)));
    }
}
