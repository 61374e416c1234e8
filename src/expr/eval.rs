//! Tree-walking evaluation with Python's numeric rules.

use std::cmp::Ordering;

use super::ExprError;
use super::parser::{BinaryOp, CompareOp, Expr};
use super::value::{Number, Value};

/// Longest string a repetition may build, in bytes.
const MAX_STR_LEN: usize = 1 << 24;

pub fn eval(expr: &Expr) -> Result<Value, ExprError> {
    match expr {
        Expr::Literal(value) => Ok(value.clone()),
        Expr::Name(name) => Err(ExprError::Name(name.clone())),
        Expr::Neg(inner) => negate(eval(inner)?),
        Expr::Pos(inner) => {
            let value = eval(inner)?;
            match value.number() {
                Some(Number::Int(n)) => Ok(Value::Int(n)),
                Some(Number::Float(v)) => Ok(Value::Float(v)),
                None => Err(bad_operand("unary +", &value)),
            }
        }
        Expr::Not(inner) => Ok(Value::Bool(!eval(inner)?.truthy())),
        Expr::Binary(op, left, right) => binary(*op, &eval(left)?, &eval(right)?),
        Expr::Compare(first, rest) => {
            let mut left = eval(first)?;
            for (op, operand) in rest {
                let right = eval(operand)?;
                if !compare(*op, &left, &right)? {
                    return Ok(Value::Bool(false));
                }
                left = right;
            }
            Ok(Value::Bool(true))
        }
        Expr::And(left, right) => {
            let left = eval(left)?;
            if left.truthy() { eval(right) } else { Ok(left) }
        }
        Expr::Or(left, right) => {
            let left = eval(left)?;
            if left.truthy() { Ok(left) } else { eval(right) }
        }
        Expr::Call(name, args) => {
            let args = args.iter().map(eval).collect::<Result<Vec<_>, _>>()?;
            call(name, &args)
        }
    }
}

fn bad_operand(op: &str, value: &Value) -> ExprError {
    ExprError::Type(format!(
        "bad operand type for {op}: '{}'",
        value.type_name()
    ))
}

fn negate(value: Value) -> Result<Value, ExprError> {
    match value.number() {
        Some(Number::Int(n)) => n.checked_neg().map(Value::Int).ok_or(ExprError::Overflow),
        Some(Number::Float(v)) => Ok(Value::Float(-v)),
        None => Err(bad_operand("unary -", &value)),
    }
}

// ── Arithmetic ──

fn binary(op: BinaryOp, left: &Value, right: &Value) -> Result<Value, ExprError> {
    match (op, left, right) {
        (BinaryOp::Add, Value::Str(a), Value::Str(b)) => return Ok(Value::Str(format!("{a}{b}"))),
        (BinaryOp::Mul, Value::Str(s), n) | (BinaryOp::Mul, n, Value::Str(s)) => {
            if let Some(Number::Int(times)) = n.number() {
                return repeat(s, times);
            }
        }
        _ => {}
    }

    let (Some(a), Some(b)) = (left.number(), right.number()) else {
        return Err(ExprError::Type(format!(
            "unsupported operand type(s) for {}: '{}' and '{}'",
            op.symbol(),
            left.type_name(),
            right.type_name()
        )));
    };
    match (a, b) {
        (Number::Int(x), Number::Int(y)) => int_arith(op, x, y),
        (x, y) => float_arith(op, x.as_f64(), y.as_f64()),
    }
}

/// `str * int`; a non-positive count gives the empty string.
fn repeat(s: &str, times: i64) -> Result<Value, ExprError> {
    let times = usize::try_from(times).unwrap_or(0);
    match s.len().checked_mul(times) {
        Some(len) if len <= MAX_STR_LEN => Ok(Value::Str(s.repeat(times))),
        _ => Err(ExprError::Overflow),
    }
}

fn int_arith(op: BinaryOp, x: i64, y: i64) -> Result<Value, ExprError> {
    let checked = |result: Option<i64>| result.map(Value::Int).ok_or(ExprError::Overflow);
    match op {
        BinaryOp::Add => checked(x.checked_add(y)),
        BinaryOp::Sub => checked(x.checked_sub(y)),
        BinaryOp::Mul => checked(x.checked_mul(y)),
        BinaryOp::Div => float_arith(op, x as f64, y as f64),
        BinaryOp::FloorDiv => {
            if y == 0 {
                return Err(ExprError::ZeroDivision);
            }
            let quotient = x.checked_div(y).ok_or(ExprError::Overflow)?;
            if x % y != 0 && (x < 0) != (y < 0) {
                Ok(Value::Int(quotient - 1))
            } else {
                Ok(Value::Int(quotient))
            }
        }
        BinaryOp::Mod => {
            if y == 0 {
                return Err(ExprError::ZeroDivision);
            }
            let rem = x.checked_rem(y).ok_or(ExprError::Overflow)?;
            if rem != 0 && (rem < 0) != (y < 0) {
                Ok(Value::Int(rem + y))
            } else {
                Ok(Value::Int(rem))
            }
        }
        BinaryOp::Pow => {
            if y >= 0 {
                let exp = u32::try_from(y).map_err(|_| ExprError::Overflow)?;
                checked(x.checked_pow(exp))
            } else {
                float_arith(op, x as f64, y as f64)
            }
        }
    }
}

fn float_arith(op: BinaryOp, x: f64, y: f64) -> Result<Value, ExprError> {
    let value = match op {
        BinaryOp::Add => x + y,
        BinaryOp::Sub => x - y,
        BinaryOp::Mul => x * y,
        BinaryOp::Div | BinaryOp::FloorDiv | BinaryOp::Mod if y == 0.0 => {
            return Err(ExprError::ZeroDivision);
        }
        BinaryOp::Div => x / y,
        BinaryOp::FloorDiv => (x / y).floor(),
        BinaryOp::Mod => {
            let rem = x % y;
            if rem != 0.0 && (rem < 0.0) != (y < 0.0) {
                rem + y
            } else {
                rem
            }
        }
        BinaryOp::Pow => {
            if x == 0.0 && y < 0.0 {
                return Err(ExprError::ZeroDivision);
            }
            x.powf(y)
        }
    };
    Ok(Value::Float(value))
}

// ── Comparison ──

fn compare(op: CompareOp, left: &Value, right: &Value) -> Result<bool, ExprError> {
    match op {
        CompareOp::Eq => Ok(equal(left, right)),
        CompareOp::Ne => Ok(!equal(left, right)),
        CompareOp::In => contains(left, right),
        CompareOp::NotIn => contains(left, right).map(|found| !found),
        CompareOp::Lt | CompareOp::Le | CompareOp::Gt | CompareOp::Ge => {
            let ordering = order(left, right).ok_or_else(|| {
                ExprError::Type(format!(
                    "'{}' not supported between instances of '{}' and '{}'",
                    op.symbol(),
                    left.type_name(),
                    right.type_name()
                ))
            })?;
            // NaN compares false everywhere.
            let Some(ordering) = ordering else {
                return Ok(false);
            };
            Ok(match op {
                CompareOp::Lt => ordering == Ordering::Less,
                CompareOp::Le => ordering != Ordering::Greater,
                CompareOp::Gt => ordering == Ordering::Greater,
                _ => ordering != Ordering::Less,
            })
        }
    }
}

fn equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Str(a), Value::Str(b)) => a == b,
        (Value::None, Value::None) => true,
        _ => matches!(order(left, right), Some(Some(Ordering::Equal))),
    }
}

/// `None` when the types can't be ordered; `Some(None)` for NaN.
fn order(left: &Value, right: &Value) -> Option<Option<Ordering>> {
    if let (Value::Str(a), Value::Str(b)) = (left, right) {
        return Some(Some(a.cmp(b)));
    }
    match (left.number()?, right.number()?) {
        (Number::Int(x), Number::Int(y)) => Some(Some(x.cmp(&y))),
        (x, y) => Some(x.as_f64().partial_cmp(&y.as_f64())),
    }
}

fn contains(needle: &Value, haystack: &Value) -> Result<bool, ExprError> {
    match (needle, haystack) {
        (Value::Str(needle), Value::Str(haystack)) => Ok(haystack.contains(needle.as_str())),
        (other, Value::Str(_)) => Err(ExprError::Type(format!(
            "'in <string>' requires string as left operand, not {}",
            other.type_name()
        ))),
        (_, other) => Err(ExprError::Type(format!(
            "argument of type '{}' is not iterable",
            other.type_name()
        ))),
    }
}

// ── Builtins ──

const BUILTINS: [&str; 9] = [
    "int", "float", "str", "bool", "len", "abs", "min", "max", "round",
];

fn call(name: &str, args: &[Value]) -> Result<Value, ExprError> {
    match (name, args) {
        ("int", [value]) => to_int(value),
        ("float", [value]) => to_float(value),
        ("str", [value]) => Ok(Value::Str(value.to_string())),
        ("bool", [value]) => Ok(Value::Bool(value.truthy())),
        ("len", [Value::Str(s)]) => Ok(Value::Int(s.chars().count() as i64)),
        ("len", [other]) => Err(ExprError::Type(format!(
            "object of type '{}' has no len()",
            other.type_name()
        ))),
        ("abs", [value]) => match value.number() {
            Some(Number::Int(n)) => n.checked_abs().map(Value::Int).ok_or(ExprError::Overflow),
            Some(Number::Float(v)) => Ok(Value::Float(v.abs())),
            None => Err(bad_operand("abs()", value)),
        },
        ("min", [first, rest @ ..]) => extreme(first, rest, CompareOp::Lt),
        ("max", [first, rest @ ..]) => extreme(first, rest, CompareOp::Gt),
        ("round", [value]) => round(value, None),
        ("round", [value, Value::Int(digits)]) => round(value, Some(*digits)),
        _ if BUILTINS.contains(&name) => Err(ExprError::Type(format!(
            "{name}() got an unsupported number of arguments ({})",
            args.len()
        ))),
        _ => Err(ExprError::Name(name.to_string())),
    }
}

fn extreme(first: &Value, rest: &[Value], wins: CompareOp) -> Result<Value, ExprError> {
    let mut best = first;
    for candidate in rest {
        if compare(wins, candidate, best)? {
            best = candidate;
        }
    }
    Ok(best.clone())
}

fn to_int(value: &Value) -> Result<Value, ExprError> {
    match value {
        Value::Str(s) => s
            .trim()
            .replace('_', "")
            .parse()
            .map(Value::Int)
            .map_err(|_| {
                ExprError::Value(format!(
                    "invalid literal for int() with base 10: {}",
                    crate::event::py_repr(s)
                ))
            }),
        Value::Float(v) => float_to_int(v.trunc()),
        Value::Bool(b) => Ok(Value::Int(i64::from(*b))),
        Value::Int(n) => Ok(Value::Int(*n)),
        Value::None => Err(ExprError::Type(
            "int() argument must be a string or a number, not 'NoneType'".to_string(),
        )),
    }
}

fn float_to_int(v: f64) -> Result<Value, ExprError> {
    if v.is_nan() {
        return Err(ExprError::Value("cannot convert float NaN to integer".into()));
    }
    if !v.is_finite() || v < i64::MIN as f64 || v >= i64::MAX as f64 {
        return Err(ExprError::Overflow);
    }
    Ok(Value::Int(v as i64))
}

fn to_float(value: &Value) -> Result<Value, ExprError> {
    match value {
        Value::Str(s) => s.trim().parse().map(Value::Float).map_err(|_| {
            ExprError::Value(format!(
                "could not convert string to float: {}",
                crate::event::py_repr(s)
            ))
        }),
        Value::None => Err(ExprError::Type(
            "float() argument must be a string or a number, not 'NoneType'".to_string(),
        )),
        other => match other.number() {
            Some(n) => Ok(Value::Float(n.as_f64())),
            None => Err(bad_operand("float()", other)),
        },
    }
}

/// Rounds half to even, like Python 3.
fn round(value: &Value, digits: Option<i64>) -> Result<Value, ExprError> {
    match (value.number(), digits) {
        (Some(Number::Int(n)), _) => Ok(Value::Int(n)),
        (Some(Number::Float(v)), None) => float_to_int(v.round_ties_even()),
        (Some(Number::Float(v)), Some(digits)) => {
            let digits = i32::try_from(digits).map_err(|_| ExprError::Overflow)?;
            let scale = 10f64.powi(digits);
            Ok(Value::Float((v * scale).round_ties_even() / scale))
        }
        (None, _) => Err(bad_operand("round()", value)),
    }
}
