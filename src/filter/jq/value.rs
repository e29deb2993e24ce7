//! Operations on JSON values: ordering, arithmetic, indexing and paths.
//!
//! Values are plain [`serde_json::Value`]s; numbers are computed as `f64`
//! and written back as integers whenever they are integral.

use super::RuntimeError;
use serde_json::{Map, Number, Value};
use std::cmp::Ordering;

type Result<T> = std::result::Result<T, RuntimeError>;

/// Integers beyond this magnitude lose precision as `f64`.
const MAX_SAFE_INTEGER: u64 = 1 << 53;

/// Integral results below this magnitude are written as `i64`.
const MAX_INTEGER: f64 = 9_223_372_036_854_775_808.0;

/// Largest array index or string length a query may build.
const MAX_SIZE: usize = 0x800_0000;

/// Longest JSON excerpt quoted in an error message.
const MAX_EXCERPT: usize = 11;

/// Builds a number value, preferring the integer form. Infinities clamp
/// to the largest finite `f64`; NaN has no JSON form and becomes null.
pub fn number(n: f64) -> Value {
    if n.is_infinite() {
        number(f64::MAX.copysign(n))
    } else if n.fract() == 0.0 && n.abs() < MAX_INTEGER {
        Value::from(n as i64)
    } else {
        Number::from_f64(n).map(Value::Number).unwrap_or(Value::Null)
    }
}

/// Rewrites every number in `value` the way arithmetic would produce it:
/// integral floats become integers and integers past 2^53 are rounded.
pub fn canonical(value: Value) -> Value {
    match value {
        Value::Number(n) => match (n.as_i64(), n.as_u64(), n.as_f64()) {
            (Some(i), _, _) if i.unsigned_abs() <= MAX_SAFE_INTEGER => Value::Number(n),
            (None, Some(u), _) if u <= MAX_SAFE_INTEGER => Value::Number(n),
            (_, _, Some(f)) => number(f),
            _ => Value::Number(n),
        },
        Value::Array(items) => Value::Array(items.into_iter().map(canonical).collect()),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (k, canonical(v)))
                .collect(),
        ),
        other => other,
    }
}

pub fn as_f64(value: &Value) -> Option<f64> {
    value.as_number().and_then(Number::as_f64)
}

pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

pub fn is_truthy(value: &Value) -> bool {
    !matches!(value, Value::Null | Value::Bool(false))
}

/// Compact JSON encoding.
pub fn to_json(value: &Value) -> String {
    serde_json::to_string(value).unwrap_or_default()
}

/// `type (excerpt)`, as used in error messages.
pub fn describe(value: &Value) -> String {
    let json = to_json(value);
    let excerpt = match json.char_indices().nth(MAX_EXCERPT) {
        Some((cut, _)) => format!("{}...", &json[..cut]),
        None => json,
    };
    format!("{} ({})", type_name(value), excerpt)
}

/// String form used by `tostring`, `join` and interpolation.
pub fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => to_json(other),
    }
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(false) => 1,
        Value::Bool(true) => 2,
        Value::Number(_) => 3,
        Value::String(_) => 4,
        Value::Array(_) => 5,
        Value::Object(_) => 6,
    }
}

/// Total order: null < false < true < numbers < strings < arrays < objects.
///
/// Objects compare their sorted key sets first, then values key by key.
pub fn compare(a: &Value, b: &Value) -> Ordering {
    let rank = type_rank(a).cmp(&type_rank(b));
    if rank != Ordering::Equal {
        return rank;
    }
    match (a, b) {
        (Value::Number(_), Value::Number(_)) => {
            let (x, y) = (as_f64(a).unwrap_or(0.0), as_f64(b).unwrap_or(0.0));
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => {
            for (l, r) in x.iter().zip(y) {
                let ord = compare(l, r);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        (Value::Object(x), Value::Object(y)) => {
            let xk = sorted_keys(x);
            let yk = sorted_keys(y);
            let ord = xk.cmp(&yk);
            if ord != Ordering::Equal {
                return ord;
            }
            for key in xk {
                let ord = compare(&x[key], &y[key]);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            Ordering::Equal
        }
        _ => Ordering::Equal,
    }
}

pub fn equals(a: &Value, b: &Value) -> bool {
    compare(a, b) == Ordering::Equal
}

pub fn sorted_keys(map: &Map<String, Value>) -> Vec<&String> {
    let mut keys: Vec<&String> = map.keys().collect();
    keys.sort();
    keys
}

pub fn sort_values(values: &mut [Value]) {
    values.sort_by(compare);
}

/// Binary operators that produce a value from two operands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arith {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

pub fn arith(op: Arith, lhs: Value, rhs: Value) -> Result<Value> {
    match op {
        Arith::Add => add(lhs, rhs),
        Arith::Sub => subtract(lhs, rhs),
        Arith::Mul => multiply(lhs, rhs),
        Arith::Div => divide(lhs, rhs),
        Arith::Mod => modulo(lhs, rhs),
    }
}

fn binary_error(lhs: &Value, rhs: &Value, verb: &str) -> RuntimeError {
    RuntimeError::msg(format!(
        "{} and {} cannot be {verb}",
        describe(lhs),
        describe(rhs)
    ))
}

pub fn add(lhs: Value, rhs: Value) -> Result<Value> {
    match (lhs, rhs) {
        (Value::Null, r) => Ok(r),
        (l, Value::Null) => Ok(l),
        (l @ Value::Number(_), r @ Value::Number(_)) => {
            Ok(number(as_f64(&l).unwrap_or(0.0) + as_f64(&r).unwrap_or(0.0)))
        }
        (Value::String(mut l), Value::String(r)) => {
            l.push_str(&r);
            Ok(Value::String(l))
        }
        (Value::Array(mut l), Value::Array(r)) => {
            l.extend(r);
            Ok(Value::Array(l))
        }
        (Value::Object(mut l), Value::Object(r)) => {
            for (k, v) in r {
                l.insert(k, v);
            }
            Ok(Value::Object(l))
        }
        (l, r) => Err(binary_error(&l, &r, "added")),
    }
}

fn subtract(lhs: Value, rhs: Value) -> Result<Value> {
    match (lhs, rhs) {
        (l @ Value::Number(_), r @ Value::Number(_)) => {
            Ok(number(as_f64(&l).unwrap_or(0.0) - as_f64(&r).unwrap_or(0.0)))
        }
        (Value::Array(l), Value::Array(r)) => Ok(Value::Array(
            l.into_iter()
                .filter(|item| !r.iter().any(|x| equals(item, x)))
                .collect(),
        )),
        (l, r) => Err(binary_error(&l, &r, "subtracted")),
    }
}

fn multiply(lhs: Value, rhs: Value) -> Result<Value> {
    match (lhs, rhs) {
        (l @ Value::Number(_), r @ Value::Number(_)) => {
            Ok(number(as_f64(&l).unwrap_or(0.0) * as_f64(&r).unwrap_or(0.0)))
        }
        (Value::String(s), n @ Value::Number(_)) | (n @ Value::Number(_), Value::String(s)) => {
            let times = as_f64(&n).unwrap_or(0.0);
            if times <= 0.0 {
                return Ok(Value::Null);
            }
            let times = times.ceil();
            if times * s.len() as f64 > MAX_SIZE as f64 {
                return Err(RuntimeError::msg("repeat string result too large"));
            }
            Ok(Value::String(s.repeat(times as usize)))
        }
        (Value::Object(l), Value::Object(r)) => Ok(Value::Object(deep_merge(l, r))),
        (l, r) => Err(binary_error(&l, &r, "multiplied")),
    }
}

fn deep_merge(mut base: Map<String, Value>, other: Map<String, Value>) -> Map<String, Value> {
    for (key, value) in other {
        let merged = match (base.get_mut(&key).map(std::mem::take), value) {
            (Some(Value::Object(l)), Value::Object(r)) => Value::Object(deep_merge(l, r)),
            (_, r) => r,
        };
        base.insert(key, merged);
    }
    base
}

fn divide(lhs: Value, rhs: Value) -> Result<Value> {
    match (&lhs, &rhs) {
        (Value::Number(_), Value::Number(_)) => {
            let divisor = as_f64(&rhs).unwrap_or(0.0);
            if divisor == 0.0 {
                return Err(RuntimeError::msg(format!(
                    "{} and {} cannot be divided because the divisor is zero",
                    describe(&lhs),
                    describe(&rhs)
                )));
            }
            Ok(number(as_f64(&lhs).unwrap_or(0.0) / divisor))
        }
        (Value::String(s), Value::String(sep)) => Ok(split(s, sep)),
        _ => Err(binary_error(&lhs, &rhs, "divided")),
    }
}

fn modulo(lhs: Value, rhs: Value) -> Result<Value> {
    match (as_f64(&lhs), as_f64(&rhs)) {
        (Some(l), Some(r)) => {
            let divisor = r as i64;
            if divisor == 0 {
                return Err(RuntimeError::msg(format!(
                    "{} and {} cannot be divided because the divisor is zero",
                    describe(&lhs),
                    describe(&rhs)
                )));
            }
            Ok(Value::from((l as i64).wrapping_rem(divisor.wrapping_abs())))
        }
        _ => Err(binary_error(&lhs, &rhs, "divided")),
    }
}

pub fn split(s: &str, sep: &str) -> Value {
    if s.is_empty() {
        return Value::Array(Vec::new());
    }
    if sep.is_empty() {
        return Value::Array(s.chars().map(|c| Value::String(c.to_string())).collect());
    }
    Value::Array(s.split(sep).map(Value::from).collect())
}

pub fn negate(value: Value) -> Result<Value> {
    match as_f64(&value) {
        Some(n) => Ok(number(-n)),
        None => Err(RuntimeError::msg(format!(
            "{} cannot be negated",
            describe(&value)
        ))),
    }
}

/// Resolves a possibly negative index against `len`.
fn resolve_index(index: f64, len: usize) -> Option<usize> {
    let index = index.floor();
    let resolved = if index < 0.0 {
        len as f64 + index
    } else {
        index
    };
    if resolved < 0.0 || resolved >= len as f64 {
        None
    } else {
        Some(resolved as usize)
    }
}

/// `.[key]`.
pub fn index(value: &Value, key: &Value) -> Result<Value> {
    match (value, key) {
        (Value::Null, Value::String(_) | Value::Number(_) | Value::Object(_)) => Ok(Value::Null),
        (Value::Object(map), Value::String(k)) => Ok(map.get(k).cloned().unwrap_or(Value::Null)),
        (Value::Array(items), Value::Number(_)) => {
            let i = as_f64(key).unwrap_or(0.0);
            Ok(resolve_index(i, items.len())
                .map(|i| items[i].clone())
                .unwrap_or(Value::Null))
        }
        (Value::Array(_), Value::Array(needle)) => Ok(indices_of_array(value, needle)),
        (Value::Array(_) | Value::String(_), Value::Object(bounds)) => slice(
            value,
            bounds.get("start").unwrap_or(&Value::Null),
            bounds.get("end").unwrap_or(&Value::Null),
        ),
        (_, Value::String(k)) => Err(RuntimeError::msg(format!(
            "Cannot index {} with \"{k}\"",
            type_name(value)
        ))),
        _ => Err(RuntimeError::msg(format!(
            "Cannot index {} with {}",
            type_name(value),
            type_name(key)
        ))),
    }
}

fn slice_bounds(len: usize, start: &Value, end: &Value) -> Result<(usize, usize)> {
    let clamp = |bound: &Value, default: usize| -> Result<usize> {
        match bound {
            Value::Null => Ok(default),
            Value::Number(_) => {
                let n = as_f64(bound).unwrap_or(0.0).floor();
                let n = if n < 0.0 { len as f64 + n } else { n };
                Ok(n.clamp(0.0, len as f64) as usize)
            }
            other => Err(RuntimeError::msg(format!(
                "Start and end indices of an array slice must be numbers, not {}",
                type_name(other)
            ))),
        }
    };
    let from = clamp(start, 0)?;
    let to = clamp(end, len)?;
    Ok((from, to.max(from)))
}

/// `.[start:end]` on arrays and strings (by codepoint).
pub fn slice(value: &Value, start: &Value, end: &Value) -> Result<Value> {
    match value {
        Value::Null => Ok(Value::Null),
        Value::Array(items) => {
            let (from, to) = slice_bounds(items.len(), start, end)?;
            Ok(Value::Array(items[from..to].to_vec()))
        }
        Value::String(s) => {
            let chars: Vec<char> = s.chars().collect();
            let (from, to) = slice_bounds(chars.len(), start, end)?;
            Ok(Value::String(chars[from..to].iter().collect()))
        }
        other => Err(RuntimeError::msg(format!(
            "Cannot index {} with object",
            type_name(other)
        ))),
    }
}

/// Path component representing a slice.
pub fn slice_key(start: Value, end: Value) -> Value {
    let mut bounds = Map::new();
    bounds.insert("start".into(), start);
    bounds.insert("end".into(), end);
    Value::Object(bounds)
}

/// Children of `.[]`, or an error for scalars.
pub fn iterate(value: &Value) -> Result<Vec<(Value, Value)>> {
    match value {
        Value::Array(items) => Ok(items
            .iter()
            .enumerate()
            .map(|(i, v)| (Value::from(i), v.clone()))
            .collect()),
        Value::Object(map) => Ok(map
            .iter()
            .map(|(k, v)| (Value::from(k.as_str()), v.clone()))
            .collect()),
        other => Err(RuntimeError::msg(format!(
            "Cannot iterate over {}",
            describe(other)
        ))),
    }
}

pub fn indices_of_array(haystack: &Value, needle: &[Value]) -> Value {
    let Value::Array(items) = haystack else {
        return Value::Null;
    };
    if needle.is_empty() || needle.len() > items.len() {
        return Value::Array(Vec::new());
    }
    let found = (0..=items.len() - needle.len())
        .filter(|&i| {
            items[i..i + needle.len()]
                .iter()
                .zip(needle)
                .all(|(a, b)| equals(a, b))
        })
        .map(Value::from)
        .collect();
    Value::Array(found)
}

/// Codepoint offsets of `needle` in `haystack`.
pub fn indices_of_str(haystack: &str, needle: &str) -> Value {
    if needle.is_empty() {
        return Value::Null;
    }
    let chars: Vec<char> = haystack.chars().collect();
    let pattern: Vec<char> = needle.chars().collect();
    if pattern.len() > chars.len() {
        return Value::Array(Vec::new());
    }
    let found = (0..=chars.len() - pattern.len())
        .filter(|&i| chars[i..i + pattern.len()] == pattern[..])
        .map(Value::from)
        .collect();
    Value::Array(found)
}

/// `getpath(path)`; missing intermediate values read as null.
pub fn get_path(value: &Value, path: &[Value]) -> Result<Value> {
    let Some((first, rest)) = path.split_first() else {
        return Ok(value.clone());
    };
    if value.is_null() {
        return Ok(Value::Null);
    }
    let child = index(value, first)?;
    get_path(&child, rest)
}

/// `setpath(path; new)`.
pub fn set_path(value: Value, path: &[Value], new: Value) -> Result<Value> {
    let Some((key, rest)) = path.split_first() else {
        return Ok(new);
    };
    match (value, key) {
        (Value::Null, Value::String(k)) => {
            let mut map = Map::new();
            map.insert(k.clone(), set_path(Value::Null, rest, new)?);
            Ok(Value::Object(map))
        }
        (Value::Object(mut map), Value::String(k)) => {
            let child = map.get_mut(k).map(std::mem::take).unwrap_or(Value::Null);
            let updated = set_path(child, rest, new)?;
            map.insert(k.clone(), updated);
            Ok(Value::Object(map))
        }
        (Value::Null, Value::Number(_)) => set_path(Value::Array(Vec::new()), path, new),
        (Value::Array(mut items), Value::Number(_)) => {
            let i = as_f64(key).unwrap_or(0.0).floor();
            let i = if i < 0.0 {
                let resolved = items.len() as f64 + i;
                if resolved < 0.0 {
                    return Err(RuntimeError::msg("Out of bounds negative array index"));
                }
                resolved as usize
            } else if i >= MAX_SIZE as f64 {
                return Err(RuntimeError::msg("array index too large"));
            } else {
                i as usize
            };
            if i >= items.len() {
                items.resize(i + 1, Value::Null);
            }
            let child = std::mem::take(&mut items[i]);
            items[i] = set_path(child, rest, new)?;
            Ok(Value::Array(items))
        }
        (value @ (Value::Null | Value::Array(_)), Value::Object(bounds)) => {
            let mut items = match value {
                Value::Array(items) => items,
                _ => Vec::new(),
            };
            let (from, to) = slice_bounds(
                items.len(),
                bounds.get("start").unwrap_or(&Value::Null),
                bounds.get("end").unwrap_or(&Value::Null),
            )?;
            let current = Value::Array(items[from..to].to_vec());
            match set_path(current, rest, new)? {
                Value::Array(replacement) => {
                    items.splice(from..to, replacement);
                    Ok(Value::Array(items))
                }
                _ => Err(RuntimeError::msg(
                    "A slice of an array can only be assigned another array",
                )),
            }
        }
        (value, key) => Err(index(&value, key)
            .err()
            .unwrap_or_else(|| RuntimeError::msg(format!(
                "Cannot update field at object index of {}",
                type_name(&value)
            )))),
    }
}

/// `delpaths(paths)`: deletes from the last path backwards.
pub fn delete_paths(value: Value, mut paths: Vec<Vec<Value>>) -> Result<Value> {
    paths.sort_by(|a, b| compare(&Value::Array(b.clone()), &Value::Array(a.clone())));
    let mut value = value;
    for path in paths {
        value = delete_path(value, &path)?;
    }
    Ok(value)
}

fn delete_path(value: Value, path: &[Value]) -> Result<Value> {
    let Some((key, rest)) = path.split_first() else {
        return Ok(Value::Null);
    };
    if value.is_null() {
        return Ok(Value::Null);
    }
    if rest.is_empty() {
        return match (value, key) {
            (Value::Object(mut map), Value::String(k)) => {
                map.shift_remove(k);
                Ok(Value::Object(map))
            }
            (Value::Array(mut items), Value::Number(_)) => {
                if let Some(i) = resolve_index(as_f64(key).unwrap_or(0.0), items.len()) {
                    items.remove(i);
                }
                Ok(Value::Array(items))
            }
            (Value::Array(mut items), Value::Object(bounds)) => {
                let (from, to) = slice_bounds(
                    items.len(),
                    bounds.get("start").unwrap_or(&Value::Null),
                    bounds.get("end").unwrap_or(&Value::Null),
                )?;
                items.drain(from..to);
                Ok(Value::Array(items))
            }
            (value, key) => Err(RuntimeError::msg(format!(
                "Cannot delete field at index {} of {}",
                describe(key),
                type_name(&value)
            ))),
        };
    }
    match (value, key) {
        (Value::Object(mut map), Value::String(k)) => {
            if let Some(child) = map.get_mut(k) {
                *child = delete_path(std::mem::take(child), rest)?;
            }
            Ok(Value::Object(map))
        }
        (Value::Array(mut items), Value::Number(_)) => {
            if let Some(i) = resolve_index(as_f64(key).unwrap_or(0.0), items.len()) {
                items[i] = delete_path(std::mem::take(&mut items[i]), rest)?;
            }
            Ok(Value::Array(items))
        }
        (value @ Value::Array(_), Value::Object(_)) => {
            let current = index(&value, key)?;
            let updated = delete_path(current, rest)?;
            set_path(value, std::slice::from_ref(key), updated)
        }
        (value, key) => Err(index(&value, key).err().unwrap_or_else(|| {
            RuntimeError::msg(format!("Cannot delete path in {}", type_name(&value)))
        })),
    }
}

/// Recursive containment as used by `contains` and `inside`.
pub fn contains(a: &Value, b: &Value) -> Result<bool> {
    if std::mem::discriminant(a) != std::mem::discriminant(b) {
        return Err(RuntimeError::msg(format!(
            "{} and {} cannot have their containment checked",
            describe(a),
            describe(b)
        )));
    }
    Ok(contains_value(a, b))
}

fn contains_value(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Object(x), Value::Object(y)) => y
            .iter()
            .all(|(k, bv)| x.get(k).is_some_and(|av| contains_value(av, bv))),
        (Value::Array(x), Value::Array(y)) => {
            y.iter().all(|bv| x.iter().any(|av| contains_value(av, bv)))
        }
        (Value::String(x), Value::String(y)) => x.contains(y.as_str()),
        _ if std::mem::discriminant(a) == std::mem::discriminant(b) => equals(a, b),
        _ => false,
    }
}
