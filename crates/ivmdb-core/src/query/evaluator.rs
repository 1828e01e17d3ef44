//! Expression compilation.
//!
//! IR expressions are compiled once, at query-compile time, into closures
//! evaluated against namespaced rows (`{ alias: row, ... }`). Compilation
//! validates function names, so evaluation itself never fails: type
//! mismatches and missing fields evaluate to null or false.

use std::cmp::Ordering;
use std::sync::Arc;

use ivmdb_proto::{Expr, Value};

use crate::error::{Error, Result};

/// A compiled expression.
pub type CompiledExpr = Arc<dyn Fn(&Value) -> Value + Send + Sync>;

const FUNCTIONS: &[&str] = &[
    "eq",
    "gt",
    "gte",
    "lt",
    "lte",
    "and",
    "or",
    "not",
    "in",
    "like",
    "ilike",
    "isNull",
    "isUndefined",
    "upper",
    "lower",
    "length",
    "concat",
    "coalesce",
    "add",
    "subtract",
    "multiply",
    "divide",
];

/// Check if a function name is supported.
pub fn is_supported_function(name: &str) -> bool {
    FUNCTIONS.contains(&name)
}

/// Compile an expression against namespaced rows.
///
/// Aggregates are rejected here; they are only meaningful in SELECT and
/// HAVING, where the grouping stage replaces them before compilation.
pub fn compile_expression(expr: &Expr) -> Result<CompiledExpr> {
    match expr {
        Expr::Val { value } => {
            let value = value.clone();
            Ok(Arc::new(move |_| value.clone()))
        }
        Expr::Ref { path } => {
            let path = path.clone();
            Ok(Arc::new(move |row| {
                if path.is_empty() {
                    return Value::Null;
                }
                row.get_path(path.as_slice()).cloned().unwrap_or(Value::Null)
            }))
        }
        Expr::Func { name, args } => compile_function(name, args),
        Expr::Agg { name, .. } => Err(Error::MisplacedAggregate { name: name.clone() }),
        Expr::Unknown => Err(Error::UnknownExpression),
    }
}

/// Compile a boolean expression into a predicate.
pub fn compile_predicate(expr: &Expr) -> Result<Arc<dyn Fn(&Value) -> bool + Send + Sync>> {
    let compiled = compile_expression(expr)?;
    Ok(Arc::new(move |row| compiled(row).is_truthy()))
}

fn compile_function(name: &str, args: &[Expr]) -> Result<CompiledExpr> {
    if !is_supported_function(name) {
        return Err(Error::UnsupportedFunction {
            name: name.to_string(),
        });
    }
    let args = args
        .iter()
        .map(compile_expression)
        .collect::<Result<Vec<_>>>()?;

    let compiled: CompiledExpr = match name {
        "and" => Arc::new(move |row| Value::Bool(args.iter().all(|a| a(row).is_truthy()))),
        "or" => Arc::new(move |row| Value::Bool(args.iter().any(|a| a(row).is_truthy()))),
        "not" => Arc::new(move |row| {
            Value::Bool(!args.first().is_some_and(|a| a(row).is_truthy()))
        }),
        "coalesce" => Arc::new(move |row| {
            args.iter()
                .map(|a| a(row))
                .find(|v| !v.is_null())
                .unwrap_or(Value::Null)
        }),
        _ => {
            let name = name.to_string();
            Arc::new(move |row| {
                let values: Vec<Value> = args.iter().map(|a| a(row)).collect();
                apply_function(&name, &values)
            })
        }
    };
    Ok(compiled)
}

fn arg(values: &[Value], i: usize) -> &Value {
    values.get(i).unwrap_or(&Value::Null)
}

/// Apply an eagerly evaluated function to its argument values.
fn apply_function(name: &str, values: &[Value]) -> Value {
    let a = arg(values, 0);
    let b = arg(values, 1);
    match name {
        "eq" => Value::Bool(values_equal(a, b)),
        "gt" => Value::Bool(compare(a, b).is_some_and(Ordering::is_gt)),
        "gte" => Value::Bool(compare(a, b).is_some_and(Ordering::is_ge)),
        "lt" => Value::Bool(compare(a, b).is_some_and(Ordering::is_lt)),
        "lte" => Value::Bool(compare(a, b).is_some_and(Ordering::is_le)),
        "in" => Value::Bool(
            !a.is_null()
                && b.as_array()
                    .is_some_and(|items| items.iter().any(|item| values_equal(a, item))),
        ),
        "like" => match (a.as_str(), b.as_str()) {
            (Some(value), Some(pattern)) => Value::Bool(like_match(value, pattern)),
            _ => Value::Bool(false),
        },
        "ilike" => match (a.as_str(), b.as_str()) {
            (Some(value), Some(pattern)) => {
                Value::Bool(like_match(&value.to_lowercase(), &pattern.to_lowercase()))
            }
            _ => Value::Bool(false),
        },
        "isNull" | "isUndefined" => Value::Bool(a.is_null()),
        "upper" => match a {
            Value::String(s) => Value::String(s.to_uppercase()),
            other => other.clone(),
        },
        "lower" => match a {
            Value::String(s) => Value::String(s.to_lowercase()),
            other => other.clone(),
        },
        "length" => match a {
            Value::String(s) => Value::Int(s.chars().count() as i64),
            Value::Array(items) => Value::Int(items.len() as i64),
            _ => Value::Int(0),
        },
        "concat" => Value::String(
            values
                .iter()
                .filter(|v| !v.is_null())
                .map(ToString::to_string)
                .collect(),
        ),
        "add" => arithmetic(a, b, i64::checked_add, |x, y| x + y),
        "subtract" => arithmetic(a, b, i64::checked_sub, |x, y| x - y),
        "multiply" => arithmetic(a, b, i64::checked_mul, |x, y| x * y),
        "divide" => match (a.as_f64(), b.as_f64()) {
            (Some(_), Some(y)) if y == 0.0 => Value::Null,
            (Some(x), Some(y)) => Value::Float(x / y),
            _ => Value::Null,
        },
        _ => Value::Null,
    }
}

/// Equality with numeric coercion. Null never equals anything.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    if a.is_null() || b.is_null() {
        return false;
    }
    match a.numeric_cmp(b) {
        Some(ordering) => ordering.is_eq(),
        None => a == b,
    }
}

/// Ordering between comparable values; `None` for null or mixed kinds.
fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    if a.is_null() || b.is_null() {
        return None;
    }
    if let Some(ordering) = a.numeric_cmp(b) {
        return Some(ordering);
    }
    (a.type_name() == b.type_name()).then(|| a.cmp(b))
}

fn arithmetic(
    a: &Value,
    b: &Value,
    int_op: fn(i64, i64) -> Option<i64>,
    float_op: fn(f64, f64) -> f64,
) -> Value {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => match int_op(*x, *y) {
            Some(result) => Value::Int(result),
            None => Value::Float(float_op(*x as f64, *y as f64)),
        },
        _ => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => Value::Float(float_op(x, y)),
            _ => Value::Null,
        },
    }
}

/// Match a string against a SQL LIKE pattern.
///
/// `%` matches any run of characters, `_` exactly one, and a backslash
/// escapes the next pattern character.
pub fn like_match(value: &str, pattern: &str) -> bool {
    let mut chars = value.chars().peekable();
    let mut pattern_chars = pattern.chars().peekable();
    like_match_recursive(&mut chars, &mut pattern_chars)
}

fn like_match_recursive(
    chars: &mut std::iter::Peekable<std::str::Chars>,
    pattern: &mut std::iter::Peekable<std::str::Chars>,
) -> bool {
    loop {
        match (pattern.peek().copied(), chars.peek().copied()) {
            (None, None) => return true,
            (None, Some(_)) => return false,
            (Some('%'), _) => {
                pattern.next();
                if pattern.peek().is_none() {
                    return true;
                }
                loop {
                    let mut pattern_clone = pattern.clone();
                    let mut chars_clone = chars.clone();
                    if like_match_recursive(&mut chars_clone, &mut pattern_clone) {
                        return true;
                    }
                    if chars.next().is_none() {
                        return false;
                    }
                }
            }
            (Some('_'), Some(_)) => {
                pattern.next();
                chars.next();
            }
            (Some('\\'), _) => {
                pattern.next();
                match (pattern.peek().copied(), chars.peek().copied()) {
                    (Some(p), Some(c)) if p == c => {
                        pattern.next();
                        chars.next();
                    }
                    _ => return false,
                }
            }
            (Some(p), Some(c)) if p == c => {
                pattern.next();
                chars.next();
            }
            _ => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row() -> Value {
        Value::object([(
            "u",
            Value::object([
                ("name", Value::from("Alice")),
                ("age", Value::Int(30)),
                ("score", Value::Float(4.5)),
                ("tags", Value::Array(vec![Value::from("a"), Value::from("b")])),
            ]),
        )])
    }

    fn eval(expr: Expr) -> Value {
        compile_expression(&expr).unwrap()(&row())
    }

    #[test]
    fn test_ref_and_missing_field() {
        assert_eq!(eval(Expr::col("u", "name")), Value::from("Alice"));
        assert_eq!(eval(Expr::col("u", "missing")), Value::Null);
        assert_eq!(eval(Expr::col("p", "name")), Value::Null);
        assert_eq!(eval(Expr::path(Vec::<String>::new())), Value::Null);
    }

    #[test]
    fn test_comparisons() {
        assert_eq!(eval(Expr::eq(Expr::col("u", "age"), Expr::val(30.0))), Value::Bool(true));
        assert_eq!(eval(Expr::gt(Expr::col("u", "age"), Expr::val(18))), Value::Bool(true));
        assert_eq!(eval(Expr::lte(Expr::col("u", "score"), Expr::val(4))), Value::Bool(false));
        assert_eq!(eval(Expr::gt(Expr::col("u", "name"), Expr::val(1))), Value::Bool(false));
    }

    #[test]
    fn test_null_comparisons_are_false() {
        let missing = Expr::col("u", "missing");
        assert_eq!(eval(Expr::eq(missing.clone(), Expr::val(Value::Null))), Value::Bool(false));
        assert_eq!(eval(Expr::lt(missing.clone(), Expr::val(1))), Value::Bool(false));
        assert_eq!(
            eval(Expr::func("isNull", vec![missing])),
            Value::Bool(true)
        );
    }

    #[test]
    fn test_boolean_connectives() {
        let t = Expr::val(true);
        let f = Expr::val(false);
        assert_eq!(eval(Expr::and(vec![t.clone(), f.clone()])), Value::Bool(false));
        assert_eq!(eval(Expr::or(vec![t.clone(), f.clone()])), Value::Bool(true));
        assert_eq!(eval(Expr::not(f)), Value::Bool(true));
        assert_eq!(eval(Expr::and(vec![])), Value::Bool(true));
    }

    #[test]
    fn test_string_functions() {
        let name = Expr::col("u", "name");
        assert_eq!(eval(Expr::func("upper", vec![name.clone()])), Value::from("ALICE"));
        assert_eq!(eval(Expr::func("length", vec![name.clone()])), Value::Int(5));
        assert_eq!(
            eval(Expr::func("concat", vec![name.clone(), Expr::val("!"), Expr::val(1)])),
            Value::from("Alice!1")
        );
        assert_eq!(
            eval(Expr::func("ilike", vec![name.clone(), Expr::val("al%")])),
            Value::Bool(true)
        );
        assert_eq!(
            eval(Expr::func("like", vec![name, Expr::val("al%")])),
            Value::Bool(false)
        );
    }

    #[test]
    fn test_in_and_coalesce() {
        let list = Expr::val(Value::Array(vec![Value::Int(29), Value::Int(30)]));
        assert_eq!(
            eval(Expr::func("in", vec![Expr::col("u", "age"), list])),
            Value::Bool(true)
        );
        assert_eq!(
            eval(Expr::func(
                "coalesce",
                vec![Expr::col("u", "missing"), Expr::col("u", "age")]
            )),
            Value::Int(30)
        );
    }

    #[test]
    fn test_arithmetic() {
        let age = Expr::col("u", "age");
        assert_eq!(eval(Expr::func("add", vec![age.clone(), Expr::val(1)])), Value::Int(31));
        assert_eq!(
            eval(Expr::func("multiply", vec![age.clone(), Expr::val(0.5)])),
            Value::Float(15.0)
        );
        assert_eq!(eval(Expr::func("divide", vec![age.clone(), Expr::val(0)])), Value::Null);
        assert_eq!(
            eval(Expr::func("add", vec![Expr::val(i64::MAX), Expr::val(1)])),
            Value::Float(i64::MAX as f64 + 1.0)
        );
    }

    #[test]
    fn test_compile_errors() {
        assert!(matches!(
            compile_expression(&Expr::func("soundex", vec![])),
            Err(Error::UnsupportedFunction { name }) if name == "soundex"
        ));
        assert!(matches!(
            compile_expression(&Expr::eq(Expr::count(Expr::col("u", "id")), Expr::val(1))),
            Err(Error::MisplacedAggregate { .. })
        ));
        assert!(matches!(
            compile_expression(&Expr::not(Expr::Unknown)),
            Err(Error::UnknownExpression)
        ));
    }

    #[test]
    fn test_like_match() {
        assert!(like_match("hello", "h%o"));
        assert!(like_match("hello", "h_llo"));
        assert!(!like_match("hello", "h_lo"));
        assert!(like_match("100%", "100\\%"));
        assert!(!like_match("1000", "100\\%"));
        assert!(like_match("", "%"));
    }
}
