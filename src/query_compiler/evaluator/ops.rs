//! Value-level operations: SQL three-valued logic, comparison, arithmetic
//! and the registered scalar functions.

use std::cmp::Ordering;

use super::errors::EvalError;
use crate::query_compiler::relation_expr::{BinaryOp, UnaryOp, Value};

/// `Null` is unknown; anything but a boolean is a type error.
pub fn truth(value: &Value) -> Result<Option<bool>, EvalError> {
    match value {
        Value::Null => Ok(None),
        Value::Bool(b) => Ok(Some(*b)),
        other => Err(EvalError::mismatch("truth test", other, &Value::Bool(true))),
    }
}

pub fn from_truth(truth: Option<bool>) -> Value {
    truth.map(Value::Bool).unwrap_or(Value::Null)
}

fn and3(a: Option<bool>, b: Option<bool>) -> Option<bool> {
    match (a, b) {
        (Some(false), _) | (_, Some(false)) => Some(false),
        (Some(true), Some(true)) => Some(true),
        _ => None,
    }
}

fn or3(a: Option<bool>, b: Option<bool>) -> Option<bool> {
    match (a, b) {
        (Some(true), _) | (_, Some(true)) => Some(true),
        (Some(false), Some(false)) => Some(false),
        _ => None,
    }
}

/// SQL comparison: `None` when either side is null.
pub fn compare(left: &Value, right: &Value) -> Result<Option<Ordering>, EvalError> {
    match (left, right) {
        (Value::Null, _) | (_, Value::Null) => Ok(None),
        (Value::Int(a), Value::Int(b)) => Ok(Some(a.cmp(b))),
        (Value::Int(a), Value::Float(b)) => Ok((*a as f64).partial_cmp(b)),
        (Value::Float(a), Value::Int(b)) => Ok(a.partial_cmp(&(*b as f64))),
        (Value::Float(a), Value::Float(b)) => Ok(a.partial_cmp(b)),
        (Value::Text(a), Value::Text(b)) => Ok(Some(a.cmp(b))),
        (Value::Bool(a), Value::Bool(b)) => Ok(Some(a.cmp(b))),
        _ => Err(EvalError::mismatch("comparison", left, right)),
    }
}

/// Total order used for sorting: nulls first, incomparable values equal.
pub fn sort_order(left: &Value, right: &Value) -> Ordering {
    match (left, right) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Less,
        (_, Value::Null) => Ordering::Greater,
        _ => compare(left, right).ok().flatten().unwrap_or(Ordering::Equal),
    }
}

/// Grouping, DISTINCT, UNION and client join keys treat nulls as equal.
pub fn keys_equal(left: &[Value], right: &[Value]) -> bool {
    left.len() == right.len()
        && left.iter().zip(right).all(|(a, b)| match (a, b) {
            (Value::Null, Value::Null) => true,
            _ => matches!(compare(a, b), Ok(Some(Ordering::Equal))),
        })
}

pub fn binary(op: BinaryOp, left: Value, right: Value) -> Result<Value, EvalError> {
    match op {
        BinaryOp::And => Ok(from_truth(and3(truth(&left)?, truth(&right)?))),
        BinaryOp::Or => Ok(from_truth(or3(truth(&left)?, truth(&right)?))),
        BinaryOp::Coalesce => Ok(if left.is_null() { right } else { left }),
        op if op.is_comparison() => {
            let ordering = compare(&left, &right)?;
            Ok(from_truth(ordering.map(|o| match op {
                BinaryOp::Eq => o == Ordering::Equal,
                BinaryOp::NotEq => o != Ordering::Equal,
                BinaryOp::Lt => o == Ordering::Less,
                BinaryOp::LtEq => o != Ordering::Greater,
                BinaryOp::Gt => o == Ordering::Greater,
                _ => o != Ordering::Less,
            })))
        }
        op => arithmetic(op, left, right),
    }
}

fn arithmetic(op: BinaryOp, left: Value, right: Value) -> Result<Value, EvalError> {
    match (&left, &right) {
        (Value::Null, _) | (_, Value::Null) => Ok(Value::Null),
        (Value::Int(a), Value::Int(b)) => {
            let (a, b) = (*a, *b);
            let result = match op {
                BinaryOp::Add => a.checked_add(b),
                BinaryOp::Subtract => a.checked_sub(b),
                BinaryOp::Multiply => a.checked_mul(b),
                BinaryOp::Divide | BinaryOp::Modulo if b == 0 => return Err(EvalError::DivisionByZero),
                BinaryOp::Divide => a.checked_div(b),
                BinaryOp::Modulo => a.checked_rem(b),
                _ => return Err(EvalError::mismatch(op, &left, &right)),
            };
            result.map(Value::Int).ok_or(EvalError::Overflow)
        }
        (Value::Text(a), Value::Text(b)) if op == BinaryOp::Add => Ok(Value::Text(format!("{}{}", a, b))),
        _ => {
            let (Some(a), Some(b)) = (as_float(&left), as_float(&right)) else {
                return Err(EvalError::mismatch(op, &left, &right));
            };
            match op {
                BinaryOp::Add => Ok(Value::Float(a + b)),
                BinaryOp::Subtract => Ok(Value::Float(a - b)),
                BinaryOp::Multiply => Ok(Value::Float(a * b)),
                BinaryOp::Divide if b == 0.0 => Err(EvalError::DivisionByZero),
                BinaryOp::Divide => Ok(Value::Float(a / b)),
                BinaryOp::Modulo => Ok(Value::Float(a % b)),
                _ => Err(EvalError::mismatch(op, &left, &right)),
            }
        }
    }
}

pub fn unary(op: UnaryOp, operand: Value) -> Result<Value, EvalError> {
    match (op, operand) {
        (_, Value::Null) => Ok(Value::Null),
        (UnaryOp::Not, v) => Ok(from_truth(truth(&v)?.map(|b| !b))),
        (UnaryOp::Negate, Value::Int(i)) => i.checked_neg().map(Value::Int).ok_or(EvalError::Overflow),
        (UnaryOp::Negate, Value::Float(x)) => Ok(Value::Float(-x)),
        (UnaryOp::Negate, v) => Err(EvalError::mismatch("negation", &v, &Value::Int(0))),
    }
}

pub fn as_float(value: &Value) -> Option<f64> {
    match value {
        Value::Int(i) => Some(*i as f64),
        Value::Float(x) => Some(*x),
        _ => None,
    }
}

pub fn as_int(value: &Value) -> Result<i64, EvalError> {
    match value {
        Value::Int(i) => Ok(*i),
        other => Err(EvalError::mismatch("integer", other, &Value::Int(0))),
    }
}

fn text_of(value: &Value) -> String {
    match value {
        Value::Text(s) => s.clone(),
        Value::Int(i) => i.to_string(),
        Value::Float(x) => x.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null | Value::List(_) => String::new(),
    }
}

/// Evaluates a registered scalar function. The receiver is the first
/// argument; any null argument makes the result null.
pub fn call_function(name: &str, args: &[Value]) -> Result<Value, EvalError> {
    if args.iter().any(Value::is_null) {
        return Ok(Value::Null);
    }
    let unknown = || EvalError::UnknownFunction(name.to_string(), args.len());
    match (name, args) {
        ("ToUpper", [Value::Text(s)]) => Ok(Value::Text(s.to_uppercase())),
        ("ToLower", [Value::Text(s)]) => Ok(Value::Text(s.to_lowercase())),
        ("Trim", [Value::Text(s)]) => Ok(Value::Text(s.trim().to_string())),
        ("Length", [Value::Text(s)]) => Ok(Value::Int(s.chars().count() as i64)),
        ("Substring", [Value::Text(s), Value::Int(start)]) => {
            Ok(Value::Text(s.chars().skip((*start).max(0) as usize).collect()))
        }
        ("Substring", [Value::Text(s), Value::Int(start), Value::Int(len)]) => Ok(Value::Text(
            s.chars()
                .skip((*start).max(0) as usize)
                .take((*len).max(0) as usize)
                .collect(),
        )),
        ("StartsWith", [Value::Text(s), Value::Text(p)]) => Ok(Value::Bool(s.starts_with(p.as_str()))),
        ("EndsWith", [Value::Text(s), Value::Text(p)]) => Ok(Value::Bool(s.ends_with(p.as_str()))),
        ("Concat", parts) if parts.len() >= 2 => Ok(Value::Text(parts.iter().map(text_of).collect())),
        ("Abs", [Value::Int(i)]) => i.checked_abs().map(Value::Int).ok_or(EvalError::Overflow),
        ("Abs", [Value::Float(x)]) => Ok(Value::Float(x.abs())),
        ("Floor", [Value::Float(x)]) => Ok(Value::Float(x.floor())),
        ("Ceiling", [Value::Float(x)]) => Ok(Value::Float(x.ceil())),
        ("Round", [Value::Float(x)]) => Ok(Value::Float(x.round())),
        ("Round", [Value::Float(x), Value::Int(digits)]) => {
            let scale = 10f64.powi((*digits).clamp(0, 15) as i32);
            Ok(Value::Float((x * scale).round() / scale))
        }
        ("Floor" | "Ceiling" | "Round", [Value::Int(i), ..]) => Ok(Value::Int(*i)),
        _ => Err(unknown()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(Value::Bool(true), Value::Null, Value::Null; "true and unknown")]
    #[test_case(Value::Bool(false), Value::Null, Value::Bool(false); "false and unknown")]
    #[test_case(Value::Null, Value::Null, Value::Null; "unknown and unknown")]
    fn test_and_is_three_valued(left: Value, right: Value, expected: Value) {
        assert_eq!(binary(BinaryOp::And, left, right).unwrap(), expected);
    }

    #[test_case(Value::Bool(true), Value::Null, Value::Bool(true); "true or unknown")]
    #[test_case(Value::Bool(false), Value::Null, Value::Null; "false or unknown")]
    fn test_or_is_three_valued(left: Value, right: Value, expected: Value) {
        assert_eq!(binary(BinaryOp::Or, left, right).unwrap(), expected);
    }

    #[test]
    fn test_comparison_with_null_is_unknown() {
        assert_eq!(binary(BinaryOp::Eq, Value::Null, Value::Null).unwrap(), Value::Null);
        assert_eq!(unary(UnaryOp::Not, Value::Null).unwrap(), Value::Null);
        assert_eq!(
            binary(BinaryOp::LtEq, Value::Int(2), Value::Float(2.5)).unwrap(),
            Value::Bool(true)
        );
    }

    #[test]
    fn test_keys_treat_nulls_as_equal() {
        assert!(keys_equal(&[Value::Null, Value::Int(1)], &[Value::Null, Value::Int(1)]));
        assert!(!keys_equal(&[Value::Null], &[Value::Int(1)]));
    }

    #[test]
    fn test_arithmetic() {
        assert_eq!(binary(BinaryOp::Add, Value::Int(2), Value::Int(3)).unwrap(), Value::Int(5));
        assert_eq!(binary(BinaryOp::Multiply, Value::Int(2), Value::Float(1.5)).unwrap(), Value::Float(3.0));
        assert_eq!(binary(BinaryOp::Add, Value::from("a"), Value::from("b")).unwrap(), Value::from("ab"));
        assert_eq!(binary(BinaryOp::Divide, Value::Int(1), Value::Int(0)), Err(EvalError::DivisionByZero));
        assert!(binary(BinaryOp::Subtract, Value::from("a"), Value::Int(1)).is_err());
    }

    #[test]
    fn test_functions() {
        assert_eq!(call_function("ToUpper", &[Value::from("abc")]).unwrap(), Value::from("ABC"));
        assert_eq!(
            call_function("Substring", &[Value::from("London"), Value::Int(1), Value::Int(3)]).unwrap(),
            Value::from("ond")
        );
        assert_eq!(call_function("Length", &[Value::Null]).unwrap(), Value::Null);
        assert!(matches!(
            call_function("Format", &[Value::from("x")]),
            Err(EvalError::UnknownFunction(_, 1))
        ));
    }
}
