//! Builtin functions.

use super::ast::{Comparison, Expr};
use super::eval::{
    catch_break, environment, extend, fail, into_children, Env, Evaluator, Flow, Halt, PathSink,
    Sink,
};
use super::regexp;
use super::value::{self, as_f64, describe, is_truthy, number, type_name};
use super::RuntimeError;
use serde_json::{Map, Value};
use std::ops::Range;

/// Layout of `todate` and `fromdate`.
const ISO8601: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Every builtin as `(name, arity)`.
const BUILTINS: &[(&str, usize)] = &[
    ("empty", 0),
    ("not", 0),
    ("error", 0),
    ("error", 1),
    ("length", 0),
    ("utf8bytelength", 0),
    ("keys", 0),
    ("keys_unsorted", 0),
    ("values", 0),
    ("has", 1),
    ("in", 1),
    ("contains", 1),
    ("inside", 1),
    ("select", 1),
    ("map", 1),
    ("map_values", 1),
    ("to_entries", 0),
    ("from_entries", 0),
    ("with_entries", 1),
    ("add", 0),
    ("add", 1),
    ("any", 0),
    ("any", 1),
    ("any", 2),
    ("all", 0),
    ("all", 1),
    ("all", 2),
    ("range", 1),
    ("range", 2),
    ("range", 3),
    ("floor", 0),
    ("ceil", 0),
    ("round", 0),
    ("sqrt", 0),
    ("fabs", 0),
    ("abs", 0),
    ("log", 0),
    ("log2", 0),
    ("log10", 0),
    ("exp", 0),
    ("exp2", 0),
    ("exp10", 0),
    ("trunc", 0),
    ("pow", 2),
    ("tostring", 0),
    ("tonumber", 0),
    ("type", 0),
    ("tojson", 0),
    ("fromjson", 0),
    ("ascii_downcase", 0),
    ("ascii_upcase", 0),
    ("ltrimstr", 1),
    ("rtrimstr", 1),
    ("startswith", 1),
    ("endswith", 1),
    ("trim", 0),
    ("ltrim", 0),
    ("rtrim", 0),
    ("split", 1),
    ("join", 1),
    ("explode", 0),
    ("implode", 0),
    ("ascii", 0),
    ("index", 1),
    ("rindex", 1),
    ("indices", 1),
    ("sort", 0),
    ("sort_by", 1),
    ("group_by", 1),
    ("unique", 0),
    ("unique_by", 1),
    ("min", 0),
    ("max", 0),
    ("min_by", 1),
    ("max_by", 1),
    ("reverse", 0),
    ("flatten", 0),
    ("flatten", 1),
    ("first", 0),
    ("last", 0),
    ("first", 1),
    ("last", 1),
    ("nth", 1),
    ("nth", 2),
    ("limit", 2),
    ("isempty", 1),
    ("until", 2),
    ("while", 2),
    ("repeat", 1),
    ("recurse", 0),
    ("recurse", 1),
    ("recurse", 2),
    ("paths", 0),
    ("paths", 1),
    ("leaf_paths", 0),
    ("path", 1),
    ("del", 1),
    ("pick", 1),
    ("getpath", 1),
    ("setpath", 2),
    ("delpaths", 1),
    ("walk", 1),
    ("transpose", 0),
    ("arrays", 0),
    ("objects", 0),
    ("iterables", 0),
    ("booleans", 0),
    ("numbers", 0),
    ("strings", 0),
    ("nulls", 0),
    ("scalars", 0),
    ("debug", 0),
    ("toarray", 0),
    ("IN", 1),
    ("IN", 2),
    ("INDEX", 1),
    ("INDEX", 2),
    ("test", 1),
    ("test", 2),
    ("match", 1),
    ("match", 2),
    ("capture", 1),
    ("capture", 2),
    ("scan", 1),
    ("scan", 2),
    ("split", 2),
    ("splits", 1),
    ("splits", 2),
    ("sub", 2),
    ("sub", 3),
    ("gsub", 2),
    ("gsub", 3),
    ("tostream", 0),
    ("fromstream", 1),
    ("env", 0),
    ("infinite", 0),
    ("nan", 0),
    ("isinfinite", 0),
    ("isnan", 0),
    ("isnormal", 0),
    ("now", 0),
    ("todate", 0),
    ("todateiso8601", 0),
    ("fromdate", 0),
    ("fromdateiso8601", 0),
];

pub fn is_defined(name: &str, arity: usize) -> bool {
    BUILTINS.iter().any(|&(n, a)| n == name && a == arity)
}

type Result<T> = std::result::Result<T, RuntimeError>;

fn type_matches(selector: &str, value: &Value) -> Option<bool> {
    let matches = match selector {
        "arrays" => value.is_array(),
        "objects" => value.is_object(),
        "iterables" => value.is_array() || value.is_object(),
        "booleans" => value.is_boolean(),
        "numbers" => value.is_number(),
        "strings" => value.is_string(),
        "nulls" => value.is_null(),
        "values" => !value.is_null(),
        "scalars" => !(value.is_array() || value.is_object()),
        _ => return None,
    };
    Some(matches)
}

fn length(value: &Value) -> Result<Value> {
    match value {
        Value::Null => Ok(Value::from(0)),
        Value::Bool(_) => Err(RuntimeError::msg(format!(
            "{} has no length",
            describe(value)
        ))),
        Value::Number(_) => Ok(number(as_f64(value).unwrap_or(0.0).abs())),
        Value::String(s) => Ok(Value::from(s.chars().count())),
        Value::Array(items) => Ok(Value::from(items.len())),
        Value::Object(map) => Ok(Value::from(map.len())),
    }
}

fn keys(value: &Value, sorted: bool) -> Result<Value> {
    match value {
        Value::Object(map) => {
            let names: Vec<Value> = if sorted {
                value::sorted_keys(map)
                    .into_iter()
                    .map(|k| Value::String(k.clone()))
                    .collect()
            } else {
                map.keys().map(|k| Value::String(k.clone())).collect()
            };
            Ok(Value::Array(names))
        }
        Value::Array(items) => Ok(Value::Array((0..items.len()).map(Value::from).collect())),
        other => Err(RuntimeError::msg(format!("{} has no keys", describe(other)))),
    }
}

fn has(value: &Value, key: &Value) -> Result<bool> {
    match (value, key) {
        (Value::Object(map), Value::String(k)) => Ok(map.contains_key(k)),
        (Value::Array(items), Value::Number(_)) => {
            let i = as_f64(key).unwrap_or(-1.0);
            Ok(i >= 0.0 && i < items.len() as f64)
        }
        _ => Err(RuntimeError::msg(format!(
            "Cannot check whether {} has a {} key",
            type_name(value),
            type_name(key)
        ))),
    }
}

fn to_entries(value: &Value) -> Result<Value> {
    let entries = match value {
        Value::Object(map) => map
            .iter()
            .map(|(k, v)| entry(Value::String(k.clone()), v.clone()))
            .collect(),
        Value::Array(items) => items
            .iter()
            .enumerate()
            .map(|(i, v)| entry(Value::from(i), v.clone()))
            .collect(),
        other => {
            return Err(RuntimeError::msg(format!("{} has no keys", describe(other))));
        }
    };
    Ok(Value::Array(entries))
}

fn entry(key: Value, value: Value) -> Value {
    let mut map = Map::new();
    map.insert("key".into(), key);
    map.insert("value".into(), value);
    Value::Object(map)
}

const ENTRY_KEY_NAMES: [&str; 6] = ["key", "k", "name", "Name", "K", "Key"];

fn from_entries(value: &Value) -> Result<Value> {
    let mut out = Map::new();
    for item in into_children(value.clone())? {
        let Value::Object(fields) = &item else {
            return Err(RuntimeError::msg(format!(
                "Cannot index {} with \"key\"",
                type_name(&item)
            )));
        };
        let key = match fields.get("key") {
            Some(k) if !k.is_null() => k.clone(),
            _ => ENTRY_KEY_NAMES[1..]
                .iter()
                .filter_map(|name| fields.get(*name))
                .find(|v| is_truthy(v))
                .cloned()
                .unwrap_or(Value::Null),
        };
        let key = match key {
            Value::String(s) => s,
            other => value::to_json(&other),
        };
        let entry_value = if fields.contains_key("value") {
            fields["value"].clone()
        } else if fields.contains_key("v") {
            fields["v"].clone()
        } else {
            fields.get("Value").cloned().unwrap_or(Value::Null)
        };
        out.insert(key, entry_value);
    }
    Ok(Value::Object(out))
}

fn math(name: &str, value: &Value) -> Result<Value> {
    let Some(x) = as_f64(value) else {
        return Err(RuntimeError::msg(format!(
            "{} number required",
            describe(value)
        )));
    };
    let result = match name {
        "floor" => x.floor(),
        "ceil" => x.ceil(),
        "round" => x.round(),
        "sqrt" => x.sqrt(),
        "fabs" | "abs" => x.abs(),
        "log" => x.ln(),
        "log2" => x.log2(),
        "log10" => x.log10(),
        "exp" => x.exp(),
        "exp2" => x.exp2(),
        "exp10" => 10f64.powf(x),
        "trunc" => x.trunc(),
        _ => return Err(RuntimeError::msg(format!("{name}/0 is not defined"))),
    };
    Ok(number(result))
}

fn to_number(value: &Value) -> Result<Value> {
    match value {
        Value::Number(_) => Ok(value.clone()),
        Value::String(s) => match serde_json::from_str::<Value>(s) {
            Ok(n @ Value::Number(_)) => Ok(n),
            _ => Err(RuntimeError::msg(format!("Cannot parse '{s}' as JSON"))),
        },
        other => Err(RuntimeError::msg(format!(
            "{} cannot be parsed as a number",
            describe(other)
        ))),
    }
}

fn from_json(value: &Value) -> Result<Value> {
    match value {
        Value::String(s) => serde_json::from_str(s)
            .map_err(|e| RuntimeError::msg(format!("{e} (while parsing '{s}')"))),
        other => Err(RuntimeError::msg(format!(
            "{} only strings can be parsed",
            describe(other)
        ))),
    }
}

fn string_input<'a>(name: &str, value: &'a Value) -> Result<&'a str> {
    value
        .as_str()
        .ok_or_else(|| RuntimeError::msg(format!("{name} input must be a string")))
}

fn join(value: &Value, separator: &Value) -> Result<Value> {
    let Value::String(separator) = separator else {
        return Err(RuntimeError::msg(format!(
            "{} cannot be used as a separator",
            describe(separator)
        )));
    };
    let mut joined = String::new();
    for (i, item) in into_children(value.clone())?.into_iter().enumerate() {
        if i > 0 {
            joined.push_str(separator);
        }
        match item {
            Value::Null => {}
            Value::String(s) => joined.push_str(&s),
            Value::Bool(_) | Value::Number(_) => joined.push_str(&value::to_json(&item)),
            other => {
                return Err(RuntimeError::msg(format!(
                    "Cannot join with {}",
                    type_name(&other)
                )))
            }
        }
    }
    Ok(Value::String(joined))
}

fn implode(value: &Value) -> Result<Value> {
    let invalid = || RuntimeError::msg("Implode input must be an array of codepoints");
    let Value::Array(items) = value else {
        return Err(invalid());
    };
    items
        .iter()
        .map(|item| {
            as_f64(item)
                .and_then(|n| char::from_u32(n as u32))
                .ok_or_else(invalid)
        })
        .collect::<Result<String>>()
        .map(Value::String)
}

fn indices(value: &Value, needle: &Value) -> Result<Value> {
    match (value, needle) {
        (Value::Null, _) => Ok(Value::Null),
        (Value::String(s), Value::String(n)) => Ok(value::indices_of_str(s, n)),
        (Value::Array(_), Value::Array(n)) => Ok(value::indices_of_array(value, n)),
        (Value::Array(_), other) => Ok(value::indices_of_array(value, std::slice::from_ref(other))),
        _ => Err(RuntimeError::msg(format!(
            "Cannot determine indices of {} in {}",
            describe(needle),
            describe(value)
        ))),
    }
}

fn array_input(value: Value, what: &str) -> Result<Vec<Value>> {
    match value {
        Value::Array(items) => Ok(items),
        other => Err(RuntimeError::msg(format!(
            "{} cannot be {what}, as it is not an array",
            describe(&other)
        ))),
    }
}

fn flatten(items: Vec<Value>, depth: f64, out: &mut Vec<Value>) {
    for item in items {
        match item {
            Value::Array(inner) if depth > 0.0 => flatten(inner, depth - 1.0, out),
            other => out.push(other),
        }
    }
}

fn reverse(value: Value) -> Result<Value> {
    match value {
        Value::Null => Ok(Value::Array(Vec::new())),
        Value::Array(mut items) => {
            items.reverse();
            Ok(Value::Array(items))
        }
        Value::String(s) => Ok(Value::String(s.chars().rev().collect())),
        other => Err(RuntimeError::msg(format!(
            "{} cannot be reversed",
            describe(&other)
        ))),
    }
}

fn transpose(value: Value) -> Result<Value> {
    let rows = array_input(value, "transposed")?
        .into_iter()
        .map(|row| array_input(row, "transposed"))
        .collect::<Result<Vec<_>>>()?;
    let width = rows.iter().map(Vec::len).max().unwrap_or(0);
    let columns = (0..width)
        .map(|i| {
            Value::Array(
                rows.iter()
                    .map(|row| row.get(i).cloned().unwrap_or(Value::Null))
                    .collect(),
            )
        })
        .collect();
    Ok(Value::Array(columns))
}

fn path_array(value: &Value) -> Result<&[Value]> {
    match value {
        Value::Array(path) => Ok(path),
        _ => Err(RuntimeError::msg("Path must be specified as an array")),
    }
}

fn number_input(value: &Value) -> Result<f64> {
    as_f64(value).ok_or_else(|| RuntimeError::msg(format!("{} number required", describe(value))))
}

fn to_date(value: &Value) -> Result<Value> {
    let seconds = number_input(value)?;
    chrono::DateTime::from_timestamp(seconds.floor() as i64, 0)
        .map(|t| Value::String(t.format(ISO8601).to_string()))
        .ok_or_else(|| RuntimeError::msg(format!("{} is out of range for a date", describe(value))))
}

fn from_date(value: &Value) -> Result<Value> {
    let text = string_input("fromdate", value)?;
    chrono::NaiveDateTime::parse_from_str(text, ISO8601)
        .map(|t| Value::from(t.and_utc().timestamp()))
        .map_err(|_| RuntimeError::msg(format!("date \"{text}\" does not match format \"{ISO8601}\"")))
}

/// `tostream` events below `path`: `[path, leaf]` for scalars and empty
/// containers, then `[path + [last key]]` once a container is finished.
fn stream_events(path: &mut Vec<Value>, value: &Value, out: Sink<'_>) -> Flow {
    let children: Vec<(Value, &Value)> = match value {
        Value::Array(items) => items.iter().enumerate().map(|(i, v)| (Value::from(i), v)).collect(),
        Value::Object(map) => map.iter().map(|(k, v)| (Value::from(k.as_str()), v)).collect(),
        _ => Vec::new(),
    };
    let Some(last) = children.last().map(|(key, _)| key.clone()) else {
        return out(Value::Array(vec![Value::Array(path.clone()), value.clone()]));
    };
    for (key, child) in children {
        path.push(key);
        let flow = stream_events(path, child, out);
        path.pop();
        flow?;
    }
    out(Value::Array(vec![Value::Array(extend(path, last))]))
}

/// Splits a `tostream` event into its path and optional leaf.
fn stream_event(event: Value) -> Result<(Vec<Value>, Option<Value>)> {
    let invalid = || RuntimeError::msg(format!("Invalid stream event {}", describe(&event)));
    let Value::Array(parts) = &event else {
        return Err(invalid());
    };
    match parts.as_slice() {
        [Value::Array(path)] => Ok((path.clone(), None)),
        [Value::Array(path), leaf] => Ok((path.clone(), Some(leaf.clone()))),
        _ => Err(invalid()),
    }
}

fn emit_range(from: &Value, upto: &Value, by: &Value, out: Sink<'_>) -> Flow {
    let (Some(mut x), Some(upto), Some(by)) = (as_f64(from), as_f64(upto), as_f64(by)) else {
        return Err(fail("Range bounds must be numeric"));
    };
    if by > 0.0 {
        while x < upto {
            out(number(x))?;
            x += by;
        }
    } else if by < 0.0 {
        while x > upto {
            out(number(x))?;
            x += by;
        }
    }
    Ok(())
}

impl Evaluator {
    pub(super) fn call(
        &self,
        name: &str,
        args: &[Expr],
        input: Value,
        env: &Env,
        out: Sink<'_>,
    ) -> Flow {
        match (name, args) {
            ("empty", []) => Ok(()),
            ("not", []) => out(Value::Bool(!is_truthy(&input))),
            ("error", []) => Err(Halt::Error(input)),
            ("error", [message]) => self.eval(message, input, env, &mut |v| Err(Halt::Error(v))),
            ("length", []) => out(length(&input)?),
            ("utf8bytelength", []) => out(Value::from(string_input(name, &input)?.len())),
            ("keys", []) => out(keys(&input, true)?),
            ("keys_unsorted", []) => out(keys(&input, false)?),
            ("has", [key]) => self.eval(key, input.clone(), env, &mut |k| {
                out(Value::Bool(has(&input, &k)?))
            }),
            ("in", [target]) => self.eval(target, input.clone(), env, &mut |t| {
                out(Value::Bool(has(&t, &input)?))
            }),
            ("contains", [other]) => self.eval(other, input.clone(), env, &mut |b| {
                out(Value::Bool(value::contains(&input, &b)?))
            }),
            ("inside", [other]) => self.eval(other, input.clone(), env, &mut |a| {
                out(Value::Bool(value::contains(&a, &input)?))
            }),
            ("select", [cond]) => self.eval(cond, input.clone(), env, &mut |c| {
                if is_truthy(&c) {
                    out(input.clone())
                } else {
                    Ok(())
                }
            }),
            ("map", [f]) => {
                let mut mapped = Vec::new();
                for child in into_children(input)? {
                    self.eval(f, child, env, &mut |v| {
                        mapped.push(v);
                        Ok(())
                    })?;
                }
                out(Value::Array(mapped))
            }
            ("map_values", [f]) => {
                let children = Expr::Iterate(Box::new(Expr::Identity));
                let updated =
                    self.modify(&children, input, env, &mut |old| self.first_output(f, old, env))?;
                out(updated)
            }
            ("to_entries", []) => out(to_entries(&input)?),
            ("from_entries", []) => out(from_entries(&input)?),
            ("with_entries", [f]) => {
                let Value::Array(entries) = to_entries(&input)? else {
                    return Ok(());
                };
                let mut mapped = Vec::new();
                for entry in entries {
                    mapped.extend(self.collect(f, entry, env)?);
                }
                out(from_entries(&Value::Array(mapped))?)
            }
            ("add", []) => {
                if input.is_null() {
                    return out(Value::Null);
                }
                let mut total = Value::Null;
                for child in into_children(input)? {
                    total = value::add(total, child)?;
                }
                out(total)
            }
            ("add", [f]) => {
                let mut total = Value::Null;
                for v in self.collect(f, input, env)? {
                    total = value::add(total, v)?;
                }
                out(total)
            }
            ("any" | "all", _) => {
                let generator = match args {
                    [] => Expr::Iterate(Box::new(Expr::Identity)),
                    [cond] => Expr::Pipe(
                        Box::new(Expr::Iterate(Box::new(Expr::Identity))),
                        Box::new(cond.clone()),
                    ),
                    [source, cond, ..] => {
                        Expr::Pipe(Box::new(source.clone()), Box::new(cond.clone()))
                    }
                };
                let found = if name == "any" {
                    self.find_truthiness(&generator, input, env, true)?
                } else {
                    !self.find_truthiness(&generator, input, env, false)?
                };
                out(Value::Bool(found))
            }
            ("IN", [source]) => {
                let test = Expr::Compare(
                    Comparison::Eq,
                    Box::new(source.clone()),
                    Box::new(Expr::Identity),
                );
                let found = self.find_truthiness(&test, input, env, true)?;
                out(Value::Bool(found))
            }
            ("IN", [source, set]) => {
                let test = Expr::Compare(
                    Comparison::Eq,
                    Box::new(source.clone()),
                    Box::new(set.clone()),
                );
                let found = self.find_truthiness(&test, input, env, true)?;
                out(Value::Bool(found))
            }
            ("range", [upto]) => self.eval(upto, input, env, &mut |n| {
                emit_range(&Value::from(0), &n, &Value::from(1), out)
            }),
            ("range", [from, upto]) => self.eval(from, input.clone(), env, &mut |f| {
                self.eval(upto, input.clone(), env, &mut |u| {
                    emit_range(&f, &u, &Value::from(1), out)
                })
            }),
            ("range", [from, upto, by]) => self.eval(from, input.clone(), env, &mut |f| {
                self.eval(upto, input.clone(), env, &mut |u| {
                    self.eval(by, input.clone(), env, &mut |b| emit_range(&f, &u, &b, out))
                })
            }),
            (
                "floor" | "ceil" | "round" | "sqrt" | "fabs" | "abs" | "log" | "log2" | "log10"
                | "exp" | "exp2" | "exp10" | "trunc",
                [],
            ) => out(math(name, &input)?),
            ("pow", [base, exponent]) => self.eval(exponent, input.clone(), env, &mut |e| {
                self.eval(base, input.clone(), env, &mut |b| {
                    match (as_f64(&b), as_f64(&e)) {
                        (Some(b), Some(e)) => out(number(b.powf(e))),
                        _ => Err(fail("pow requires numeric arguments")),
                    }
                })
            }),
            ("tostring", []) => out(Value::String(value::stringify(&input))),
            ("tonumber", []) => out(to_number(&input)?),
            ("type", []) => out(Value::from(type_name(&input))),
            ("tojson", []) => out(Value::String(value::to_json(&input))),
            ("fromjson", []) => out(from_json(&input)?),
            ("ascii_downcase", []) => {
                out(Value::String(string_input(name, &input)?.to_ascii_lowercase()))
            }
            ("ascii_upcase", []) => {
                out(Value::String(string_input(name, &input)?.to_ascii_uppercase()))
            }
            ("trim", []) => out(Value::from(string_input(name, &input)?.trim())),
            ("ltrim", []) => out(Value::from(string_input(name, &input)?.trim_start())),
            ("rtrim", []) => out(Value::from(string_input(name, &input)?.trim_end())),
            ("ltrimstr" | "rtrimstr", [affix]) => self.eval(affix, input.clone(), env, &mut |a| {
                let trimmed = match (&input, &a) {
                    (Value::String(s), Value::String(a)) if name == "ltrimstr" => {
                        s.strip_prefix(a.as_str()).map(str::to_string)
                    }
                    (Value::String(s), Value::String(a)) => {
                        s.strip_suffix(a.as_str()).map(str::to_string)
                    }
                    _ => None,
                };
                out(trimmed.map(Value::String).unwrap_or_else(|| input.clone()))
            }),
            ("startswith" | "endswith", [affix]) => {
                self.eval(affix, input.clone(), env, &mut |a| match (&input, &a) {
                    (Value::String(s), Value::String(a)) => out(Value::Bool(if name == "startswith" {
                        s.starts_with(a.as_str())
                    } else {
                        s.ends_with(a.as_str())
                    })),
                    _ => Err(fail(format!("{name}() requires string inputs"))),
                })
            }
            ("split", [separator]) => self.eval(separator, input.clone(), env, &mut |sep| {
                match (&input, &sep) {
                    (Value::String(s), Value::String(sep)) => out(value::split(s, sep)),
                    _ => Err(fail("split input and separator must be strings")),
                }
            }),
            ("join", [separator]) => self.eval(separator, input.clone(), env, &mut |sep| {
                out(join(&input, &sep)?)
            }),
            ("explode", []) => out(Value::Array(
                string_input(name, &input)?
                    .chars()
                    .map(|c| Value::from(c as u32))
                    .collect(),
            )),
            ("implode", []) => out(implode(&input)?),
            ("ascii", []) => out(implode(&Value::Array(vec![input]))?),
            ("index" | "rindex" | "indices", [needle]) => {
                self.eval(needle, input.clone(), env, &mut |n| {
                    let found = indices(&input, &n)?;
                    let picked = match (name, found) {
                        ("indices", found) => found,
                        ("index", Value::Array(found)) => {
                            found.first().cloned().unwrap_or(Value::Null)
                        }
                        (_, Value::Array(found)) => found.last().cloned().unwrap_or(Value::Null),
                        (_, other) => other,
                    };
                    out(picked)
                })
            }
            ("sort", []) => {
                let mut items = array_input(input, "sorted")?;
                value::sort_values(&mut items);
                out(Value::Array(items))
            }
            ("sort_by", [f]) => {
                let keyed = self.keyed(f, input, env, "sorted")?;
                out(Value::Array(keyed.into_iter().map(|(_, v)| v).collect()))
            }
            ("group_by", [f]) => {
                let groups = group(self.keyed(f, input, env, "grouped")?);
                out(Value::Array(groups.into_iter().map(Value::Array).collect()))
            }
            ("unique", []) => {
                let mut items = array_input(input, "sorted")?;
                value::sort_values(&mut items);
                items.dedup_by(|a, b| value::equals(a, b));
                out(Value::Array(items))
            }
            ("unique_by", [f]) => {
                let groups = group(self.keyed(f, input, env, "grouped")?);
                out(Value::Array(
                    groups.into_iter().filter_map(|g| g.into_iter().next()).collect(),
                ))
            }
            ("min" | "max", []) => {
                let items = array_input(input, "compared")?;
                let keyed = items.into_iter().map(|v| (v.clone(), v)).collect();
                out(extreme(keyed, name == "max"))
            }
            ("min_by" | "max_by", [f]) => {
                let keyed = self.keyed(f, input, env, "compared")?;
                out(extreme(keyed, name == "max_by"))
            }
            ("reverse", []) => out(reverse(input)?),
            ("flatten", []) => {
                let mut flat = Vec::new();
                flatten(array_input(input, "flattened")?, f64::INFINITY, &mut flat);
                out(Value::Array(flat))
            }
            ("flatten", [depth]) => self.eval(depth, input.clone(), env, &mut |d| {
                let depth = as_f64(&d).ok_or_else(|| fail("flatten depth must be a number"))?;
                if depth < 0.0 {
                    return Err(fail("flatten depth must not be negative"));
                }
                let mut flat = Vec::new();
                flatten(array_input(input.clone(), "flattened")?, depth, &mut flat);
                out(Value::Array(flat))
            }),
            ("first", []) => out(value::index(&input, &Value::from(0))?),
            ("last", []) => out(value::index(&input, &Value::from(-1))?),
            ("nth", [n]) => self.eval(n, input.clone(), env, &mut |n| out(value::index(&input, &n)?)),
            ("first", [f]) => match self.first_output(f, input, env)? {
                Some(v) => out(v),
                None => Ok(()),
            },
            ("last", [f]) => {
                let mut last = None;
                self.eval(f, input, env, &mut |v| {
                    last = Some(v);
                    Ok(())
                })?;
                match last {
                    Some(v) => out(v),
                    None => Ok(()),
                }
            }
            ("limit", [n, f]) => self.eval(n, input.clone(), env, &mut |n| {
                let limit = as_f64(&n).ok_or_else(|| fail("Invalid limit: must be a number"))?;
                self.take(f, input.clone(), env, limit, out)
            }),
            ("nth", [n, f]) => self.eval(n, input.clone(), env, &mut |n| {
                let index = as_f64(&n).ok_or_else(|| fail("nth index must be a number"))?;
                if index < 0.0 {
                    return Err(fail("Out of bounds negative array index"));
                }
                let mut seen = 0.0;
                let label = self.fresh_label();
                let result = self.eval(f, input.clone(), env, &mut |v| {
                    if seen >= index {
                        out(v)?;
                        return Err(Halt::Break(label));
                    }
                    seen += 1.0;
                    Ok(())
                });
                catch_break(label, result)
            }),
            ("isempty", [f]) => {
                let first = self.first_output(f, input, env)?;
                out(Value::Bool(first.is_none()))
            }
            ("until", [cond, update]) => self.until(cond, update, input, env, out),
            ("while", [cond, update]) => self.repeat_while(cond, update, input, env, out),
            ("repeat", [f]) => self.repeat(f, input, env, out),
            ("recurse", []) => self.recurse_values(input, out),
            ("recurse", [f]) => self.recurse_with(f, None, input, env, out),
            ("recurse", [f, cond]) => self.recurse_with(f, Some(cond), input, env, out),
            ("paths", []) => self.recurse_paths(Vec::new(), input, &mut |path, _| {
                if path.is_empty() {
                    return Ok(());
                }
                out(Value::Array(path))
            }),
            ("paths", [f]) => self.recurse_paths(Vec::new(), input, &mut |path, v| {
                if path.is_empty() {
                    return Ok(());
                }
                self.eval(f, v, env, &mut |keep| {
                    if is_truthy(&keep) {
                        out(Value::Array(path.clone()))
                    } else {
                        Ok(())
                    }
                })
            }),
            ("leaf_paths", []) => self.recurse_paths(Vec::new(), input, &mut |path, v| {
                if path.is_empty() || v.is_array() || v.is_object() {
                    return Ok(());
                }
                out(Value::Array(path))
            }),
            ("path", [f]) => self.eval_path(f, Vec::new(), input, env, &mut |path, _| {
                out(Value::Array(path))
            }),
            ("del", [f]) => {
                let paths = self.collect_paths(f, &input, env)?;
                out(value::delete_paths(input, paths)?)
            }
            ("pick", [f]) => {
                let mut picked = Value::Null;
                for path in self.collect_paths(f, &input, env)? {
                    let v = value::get_path(&input, &path)?;
                    picked = value::set_path(picked, &path, v)?;
                }
                out(picked)
            }
            ("getpath", [path]) => self.eval(path, input.clone(), env, &mut |p| {
                let found = value::get_path(&input, path_array(&p)?).unwrap_or(Value::Null);
                out(found)
            }),
            ("setpath", [path, new]) => self.eval(path, input.clone(), env, &mut |p| {
                self.eval(new, input.clone(), env, &mut |v| {
                    out(value::set_path(input.clone(), path_array(&p)?, v)?)
                })
            }),
            ("delpaths", [paths]) => self.eval(paths, input.clone(), env, &mut |ps| {
                let paths = into_children(ps)?
                    .iter()
                    .map(|p| path_array(p).map(<[Value]>::to_vec))
                    .collect::<Result<Vec<_>>>()?;
                out(value::delete_paths(input.clone(), paths)?)
            }),
            ("walk", [f]) => self.walk(f, input, env, out),
            ("transpose", []) => out(transpose(input)?),
            ("toarray", []) => match input {
                Value::Array(_) => out(input),
                other => out(Value::Array(vec![other])),
            },
            ("debug", []) => {
                tracing::debug!(value = %value::to_json(&input), "jq debug");
                out(input)
            }
            ("INDEX", [source, key]) => out(self.index_by(source, key, input, env)?),
            ("INDEX", [key]) => {
                let rows = Expr::Iterate(Box::new(Expr::Identity));
                out(self.index_by(&rows, key, input, env)?)
            }
            ("test", _) => self.regex_call(args, &input, env, &mut |pattern, flags| {
                out(Value::Bool(regexp::test(&input, &pattern, &flags)?))
            }),
            ("match" | "capture" | "scan", _) => {
                self.regex_call(args, &input, env, &mut |pattern, flags| {
                    for found in regexp::find(&input, &pattern, &flags, name == "scan")? {
                        out(match name {
                            "capture" => regexp::capture_object(&found),
                            "scan" => regexp::scan_item(&found),
                            _ => found,
                        })?;
                    }
                    Ok(())
                })
            }
            ("split", [_, _]) => self.regex_call(args, &input, env, &mut |pattern, flags| {
                out(Value::Array(regexp::split(&input, &pattern, &flags)?))
            }),
            ("splits", _) => self.regex_call(args, &input, env, &mut |pattern, flags| {
                for piece in regexp::split(&input, &pattern, &flags)? {
                    out(piece)?;
                }
                Ok(())
            }),
            ("sub" | "gsub", [pattern, replacement, flags @ ..]) => {
                self.eval_or_null(flags.first(), &input, env, &mut |f| {
                    self.eval(pattern, input.clone(), env, &mut |p| {
                        let haystack = regexp::subject(&input)?;
                        let spans = regexp::spans(haystack, &p, &f, name == "gsub")?;
                        self.substitute(haystack, &spans, replacement, env, out)
                    })
                })
            }
            ("tostream", []) => stream_events(&mut Vec::new(), &input, out),
            ("fromstream", [f]) => {
                let mut partial: Option<Value> = None;
                self.eval(f, input, env, &mut |event| match stream_event(event)? {
                    (path, Some(leaf)) if path.is_empty() => out(leaf),
                    (path, Some(leaf)) => {
                        let acc = partial.take().unwrap_or(Value::Null);
                        partial = Some(value::set_path(acc, &path, leaf)?);
                        Ok(())
                    }
                    (path, None) if path.len() == 1 => match partial.take() {
                        Some(done) => out(done),
                        None => Ok(()),
                    },
                    (_, None) => Ok(()),
                })
            }
            ("env", []) => out(environment()),
            ("infinite", []) => out(number(f64::INFINITY)),
            ("nan", []) => out(number(f64::NAN)),
            ("isinfinite" | "isnan" | "isnormal", []) => {
                let x = number_input(&input)?;
                out(Value::Bool(match name {
                    "isinfinite" => x.is_infinite() || x.abs() == f64::MAX,
                    "isnan" => x.is_nan(),
                    _ => x.is_normal() && x.abs() < f64::MAX,
                }))
            }
            ("now", []) => {
                let micros = chrono::Utc::now().timestamp_micros();
                out(number(micros as f64 / 1_000_000.0))
            }
            ("todate" | "todateiso8601", []) => out(to_date(&input)?),
            ("fromdate" | "fromdateiso8601", []) => out(from_date(&input)?),
            (selector, []) if type_matches(selector, &input).is_some() => {
                if type_matches(selector, &input) == Some(true) {
                    out(input)
                } else {
                    Ok(())
                }
            }
            _ => Err(fail(format!("{name}/{} is not defined", args.len()))),
        }
    }

    /// Builtins usable on the left of `|=` and inside `path(...)`.
    #[allow(clippy::too_many_arguments)]
    pub(super) fn call_path(
        &self,
        expr: &Expr,
        name: &str,
        args: &[Expr],
        path: Vec<Value>,
        current: Value,
        env: &Env,
        out: PathSink<'_>,
    ) -> Flow {
        match (name, args) {
            ("empty", []) => Ok(()),
            ("error", []) => Err(Halt::Error(current)),
            ("error", [message]) => self.eval(message, current, env, &mut |v| Err(Halt::Error(v))),
            ("select", [cond]) => self.eval(cond, current.clone(), env, &mut |c| {
                if is_truthy(&c) {
                    out(path.clone(), current.clone())
                } else {
                    Ok(())
                }
            }),
            ("recurse", []) => self.recurse_paths(path, current, out),
            ("recurse", [f]) => self.recurse_path_with(f, None, path, current, env, out),
            ("recurse", [f, cond]) => self.recurse_path_with(f, Some(cond), path, current, env, out),
            ("first", []) | ("last", []) => {
                let key = Value::from(if name == "first" { 0 } else { -1 });
                let child = value::index(&current, &key)?;
                out(extend(&path, key), child)
            }
            ("nth", [n]) => self.eval(n, current.clone(), env, &mut |n| {
                let child = value::index(&current, &n)?;
                out(extend(&path, n), child)
            }),
            ("first", [f]) => {
                let label = self.fresh_label();
                let result = self.eval_path(f, path, current, env, &mut |p, v| {
                    out(p, v)?;
                    Err(Halt::Break(label))
                });
                catch_break(label, result)
            }
            ("last", [f]) => {
                let mut last = None;
                self.eval_path(f, path, current, env, &mut |p, v| {
                    last = Some((p, v));
                    Ok(())
                })?;
                match last {
                    Some((p, v)) => out(p, v),
                    None => Ok(()),
                }
            }
            ("limit", [n, f]) => self.eval(n, current.clone(), env, &mut |n| {
                let limit = as_f64(&n).ok_or_else(|| fail("Invalid limit: must be a number"))?;
                if limit < 0.0 {
                    return self.eval_path(f, path.clone(), current.clone(), env, out);
                }
                if limit == 0.0 {
                    return Ok(());
                }
                let mut taken = 0.0;
                let label = self.fresh_label();
                let result = self.eval_path(f, path.clone(), current.clone(), env, &mut |p, v| {
                    out(p, v)?;
                    taken += 1.0;
                    if taken >= limit {
                        Err(Halt::Break(label))
                    } else {
                        Ok(())
                    }
                });
                catch_break(label, result)
            }),
            ("getpath", [p]) => self.eval(p, current.clone(), env, &mut |p| {
                let suffix = path_array(&p)?;
                let child = value::get_path(&current, suffix).unwrap_or(Value::Null);
                let mut full = path.clone();
                full.extend_from_slice(suffix);
                out(full, child)
            }),
            (selector, []) if type_matches(selector, &current).is_some() => {
                if type_matches(selector, &current) == Some(true) {
                    out(path, current)
                } else {
                    Ok(())
                }
            }
            _ => self.invalid_path(expr, current, env),
        }
    }

    /// Evaluates the pattern and flags of a regex builtin. A lone argument
    /// may be `re` or `[re, flags]`.
    fn regex_call(
        &self,
        args: &[Expr],
        input: &Value,
        env: &Env,
        run: &mut dyn FnMut(Value, Value) -> Flow,
    ) -> Flow {
        match args {
            [pattern] => self.eval(pattern, input.clone(), env, &mut |p| {
                let (pattern, flags) = regexp::arguments(p)?;
                run(pattern, flags)
            }),
            [pattern, flags, ..] => self.eval(flags, input.clone(), env, &mut |f| {
                self.eval(pattern, input.clone(), env, &mut |p| run(p, f.clone()))
            }),
            [] => Ok(()),
        }
    }

    /// Replaces each span with the outputs of `replacement` run on its
    /// captures, emitting one string per combination of outputs.
    fn substitute(
        &self,
        haystack: &str,
        spans: &[(Range<usize>, Value)],
        replacement: &Expr,
        env: &Env,
        out: Sink<'_>,
    ) -> Flow {
        let mut choices = Vec::with_capacity(spans.len());
        for (_, captures) in spans {
            let options = self
                .collect(replacement, captures.clone(), env)?
                .into_iter()
                .map(|v| match v {
                    Value::String(s) => Ok(s),
                    other => Err(fail(format!(
                        "{} cannot be added to a string",
                        describe(&other)
                    ))),
                })
                .collect::<std::result::Result<Vec<_>, Halt>>()?;
            if options.is_empty() {
                return Ok(());
            }
            choices.push(options);
        }
        let mut picks = vec![0usize; choices.len()];
        loop {
            let mut result = String::with_capacity(haystack.len());
            let mut at = 0;
            for ((range, _), (options, &pick)) in spans.iter().zip(choices.iter().zip(&picks)) {
                result.push_str(&haystack[at..range.start]);
                result.push_str(&options[pick]);
                at = range.end;
            }
            result.push_str(&haystack[at..]);
            out(Value::String(result))?;

            let mut i = picks.len();
            loop {
                if i == 0 {
                    return Ok(());
                }
                i -= 1;
                picks[i] += 1;
                if picks[i] < choices[i].len() {
                    break;
                }
                picks[i] = 0;
            }
        }
    }

    /// `INDEX(source; key)`: rows of `source` keyed by the string form of `key`.
    fn index_by(
        &self,
        source: &Expr,
        key: &Expr,
        input: Value,
        env: &Env,
    ) -> std::result::Result<Value, Halt> {
        let mut index = Map::new();
        self.eval(source, input, env, &mut |row| {
            self.eval(key, row.clone(), env, &mut |k| {
                index.insert(value::stringify(&k), row.clone());
                Ok(())
            })
        })?;
        Ok(Value::Object(index))
    }

    /// True once `generator` yields a value whose truthiness is `wanted`.
    fn find_truthiness(&self, generator: &Expr, input: Value, env: &Env, wanted: bool) -> std::result::Result<bool, Halt> {
        let label = self.fresh_label();
        let mut hit = false;
        let result = self.eval(generator, input, env, &mut |v| {
            if is_truthy(&v) == wanted {
                hit = true;
                return Err(Halt::Break(label));
            }
            Ok(())
        });
        catch_break(label, result)?;
        Ok(hit)
    }

    /// Pairs each array element with `[f]` evaluated on it, stably sorted by that key.
    fn keyed(
        &self,
        f: &Expr,
        input: Value,
        env: &Env,
        what: &str,
    ) -> std::result::Result<Vec<(Value, Value)>, Halt> {
        let items = array_input(input, what)?;
        let mut keyed = Vec::with_capacity(items.len());
        for item in items {
            let key = Value::Array(self.collect(f, item.clone(), env)?);
            keyed.push((key, item));
        }
        keyed.sort_by(|a, b| value::compare(&a.0, &b.0));
        Ok(keyed)
    }

    /// The first `limit` outputs of `f`; a negative limit keeps them all.
    fn take(&self, f: &Expr, input: Value, env: &Env, limit: f64, out: Sink<'_>) -> Flow {
        if limit < 0.0 {
            return self.eval(f, input, env, out);
        }
        if limit == 0.0 {
            return Ok(());
        }
        let mut taken = 0.0;
        let label = self.fresh_label();
        let result = self.eval(f, input, env, &mut |v| {
            out(v)?;
            taken += 1.0;
            if taken >= limit {
                Err(Halt::Break(label))
            } else {
                Ok(())
            }
        });
        catch_break(label, result)
    }

    fn until(&self, cond: &Expr, update: &Expr, input: Value, env: &Env, out: Sink<'_>) -> Flow {
        self.eval(cond, input.clone(), env, &mut |c| {
            if is_truthy(&c) {
                out(input.clone())
            } else {
                self.eval(update, input.clone(), env, &mut |next| {
                    self.until(cond, update, next, env, out)
                })
            }
        })
    }

    fn repeat_while(
        &self,
        cond: &Expr,
        update: &Expr,
        input: Value,
        env: &Env,
        out: Sink<'_>,
    ) -> Flow {
        self.eval(cond, input.clone(), env, &mut |c| {
            if !is_truthy(&c) {
                return Ok(());
            }
            out(input.clone())?;
            self.eval(update, input.clone(), env, &mut |next| {
                self.repeat_while(cond, update, next, env, out)
            })
        })
    }

    fn repeat(&self, f: &Expr, input: Value, env: &Env, out: Sink<'_>) -> Flow {
        out(input.clone())?;
        self.eval(f, input, env, &mut |next| self.repeat(f, next, env, out))
    }

    fn recurse_with(
        &self,
        f: &Expr,
        cond: Option<&Expr>,
        input: Value,
        env: &Env,
        out: Sink<'_>,
    ) -> Flow {
        out(input.clone())?;
        self.eval(f, input, env, &mut |child| match cond {
            Some(cond) => self.eval(cond, child.clone(), env, &mut |keep| {
                if is_truthy(&keep) {
                    self.recurse_with(f, Some(cond), child.clone(), env, out)
                } else {
                    Ok(())
                }
            }),
            None => self.recurse_with(f, None, child, env, out),
        })
    }

    fn recurse_path_with(
        &self,
        f: &Expr,
        cond: Option<&Expr>,
        path: Vec<Value>,
        current: Value,
        env: &Env,
        out: PathSink<'_>,
    ) -> Flow {
        out(path.clone(), current.clone())?;
        self.eval_path(f, path, current, env, &mut |p, child| match cond {
            Some(cond) => self.eval(cond, child.clone(), env, &mut |keep| {
                if is_truthy(&keep) {
                    self.recurse_path_with(f, Some(cond), p.clone(), child.clone(), env, out)
                } else {
                    Ok(())
                }
            }),
            None => self.recurse_path_with(f, None, p, child, env, out),
        })
    }

    fn walk(&self, f: &Expr, input: Value, env: &Env, out: Sink<'_>) -> Flow {
        let inner = match input {
            Value::Array(items) => {
                let mut mapped = Vec::with_capacity(items.len());
                for item in items {
                    self.walk(f, item, env, &mut |v| {
                        mapped.push(v);
                        Ok(())
                    })?;
                }
                Value::Array(mapped)
            }
            Value::Object(map) => {
                let mut mapped = Map::new();
                for (key, item) in map {
                    let mut first = None;
                    self.walk(f, item, env, &mut |v| {
                        if first.is_none() {
                            first = Some(v);
                        }
                        Ok(())
                    })?;
                    if let Some(v) = first {
                        mapped.insert(key, v);
                    }
                }
                Value::Object(mapped)
            }
            other => other,
        };
        self.eval(f, inner, env, out)
    }
}

fn group(keyed: Vec<(Value, Value)>) -> Vec<Vec<Value>> {
    let mut groups: Vec<(Value, Vec<Value>)> = Vec::new();
    for (key, item) in keyed {
        match groups.last_mut() {
            Some((last, members)) if value::equals(last, &key) => members.push(item),
            _ => groups.push((key, vec![item])),
        }
    }
    groups.into_iter().map(|(_, members)| members).collect()
}

/// The element with the smallest (or largest) key; ties keep the first
/// minimum and the last maximum.
fn extreme(keyed: Vec<(Value, Value)>, largest: bool) -> Value {
    let mut best: Option<(Value, Value)> = None;
    for (key, item) in keyed {
        let replace = match &best {
            None => true,
            Some((current, _)) => {
                let ord = value::compare(&key, current);
                if largest {
                    ord != std::cmp::Ordering::Less
                } else {
                    ord == std::cmp::Ordering::Less
                }
            }
        };
        if replace {
            best = Some((key, item));
        }
    }
    best.map(|(_, item)| item).unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::super::eval::evaluate;
    use super::super::parser::parse;
    use super::*;
    use serde_json::json;

    fn run(source: &str, input: Value) -> std::result::Result<Vec<Value>, Value> {
        let ast = parse(source).unwrap();
        evaluate(&ast, input)
            .into_iter()
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(RuntimeError::into_value)
    }

    fn one(source: &str, input: Value) -> Value {
        let mut outputs = run(source, input).unwrap();
        assert_eq!(outputs.len(), 1, "{source}: {outputs:?}");
        outputs.remove(0)
    }

    #[test]
    fn test_registry() {
        assert!(is_defined("map", 1));
        assert!(!is_defined("map", 0));
        assert!(!is_defined("input", 0));
        assert!(is_defined("gsub", 3));
        assert!(is_defined("range", 3));
    }

    #[test]
    fn test_length_and_keys() {
        assert_eq!(one("length", json!("héllo")), json!(5));
        assert_eq!(one("length", json!(-3)), json!(3));
        assert_eq!(one("length", Value::Null), json!(0));
        assert_eq!(one("keys", json!({"b": 1, "a": 2})), json!(["a", "b"]));
        assert_eq!(one("keys_unsorted", json!({"b": 1, "a": 2})), json!(["b", "a"]));
        assert_eq!(
            run("length", json!(true)).unwrap_err(),
            json!("boolean (true) has no length")
        );
    }

    #[test]
    fn test_map_select_entries() {
        let doc = json!([{"id": 1, "ok": true}, {"id": 2, "ok": false}]);
        assert_eq!(one("map(select(.ok) | .id)", doc.clone()), json!([1]));
        assert_eq!(
            one("to_entries", json!({"a": 1})),
            json!([{"key": "a", "value": 1}])
        );
        assert_eq!(
            one("with_entries(.value += 1)", json!({"a": 1, "b": 2})),
            json!({"a": 2, "b": 3})
        );
        assert_eq!(
            one("from_entries", json!([{"name": "x", "v": 1}, {"k": 2, "value": null}])),
            json!({"x": 1, "2": null})
        );
        assert_eq!(one("map_values(. * 10)", json!({"a": 1})), json!({"a": 10}));
    }

    #[test]
    fn test_aggregates() {
        assert_eq!(one("add", json!([1, 2, 3])), json!(6));
        assert_eq!(one("add", json!([])), Value::Null);
        assert_eq!(one("add(.[].a)", json!([{"a": "x"}, {"a": "y"}])), json!("xy"));
        assert_eq!(one("any", json!([false, 1])), json!(true));
        assert_eq!(one("all", json!([])), json!(true));
        assert_eq!(one("any(. > 2)", json!([1, 2])), json!(false));
        assert_eq!(one("all(.[]; . > 0)", json!([1, 2])), json!(true));
        assert_eq!(one(".[] | IN(2, 3)", json!([3])), json!(true));
        assert_eq!(one("min_by(.n)", json!([{"n": 2}, {"n": 1}])), json!({"n": 1}));
        assert_eq!(one("max", json!([1, 3, 2])), json!(3));
        assert_eq!(one("max", json!([])), Value::Null);
    }

    #[test]
    fn test_sorting_and_grouping() {
        assert_eq!(one("sort", json!([3, null, "a", 1])), json!([null, 1, 3, "a"]));
        assert_eq!(
            one("sort_by(.n)", json!([{"n": 2, "i": 0}, {"n": 1}, {"n": 2, "i": 1}])),
            json!([{"n": 1}, {"n": 2, "i": 0}, {"n": 2, "i": 1}])
        );
        assert_eq!(
            one("group_by(.t) | map(length)", json!([{"t": "a"}, {"t": "b"}, {"t": "a"}])),
            json!([2, 1])
        );
        assert_eq!(one("unique", json!([2, 1, 2])), json!([1, 2]));
        assert_eq!(one("unique_by(length)", json!(["a", "bb", "c"])), json!(["a", "bb"]));
        assert_eq!(
            run("sort", json!({"a": 1})).unwrap_err(),
            json!("object ({\"a\":1}) cannot be sorted, as it is not an array")
        );
    }

    #[test]
    fn test_range_limit_first() {
        assert_eq!(run("range(3)", Value::Null).unwrap(), vec![json!(0), json!(1), json!(2)]);
        assert_eq!(run("range(0; 10; 4)", Value::Null).unwrap(), vec![json!(0), json!(4), json!(8)]);
        assert_eq!(run("range(0; 3; 0)", Value::Null).unwrap(), Vec::<Value>::new());
        assert_eq!(one("[limit(2; range(100))]", Value::Null), json!([0, 1]));
        assert_eq!(one("[limit(0; 1, 2)]", Value::Null), json!([]));
        assert_eq!(one("[limit(-1; 1, 2)]", Value::Null), json!([1, 2]));
        assert_eq!(one("[path(limit(-1; .a, .b))]", json!({})), json!([["a"], ["b"]]));
        assert_eq!(one("first(range(5; 10))", Value::Null), json!(5));
        assert_eq!(one("last(range(5))", Value::Null), json!(4));
        assert_eq!(one("nth(2; range(10))", Value::Null), json!(2));
        assert_eq!(one("isempty(empty)", Value::Null), json!(true));
        assert_eq!(one("first", json!([7, 8])), json!(7));
        assert_eq!(one("[.[] | numbers]", json!([1, "a", null, 2])), json!([1, 2]));
    }

    #[test]
    fn test_strings() {
        assert_eq!(one("split(\", \")", json!("a, b")), json!(["a", "b"]));
        assert_eq!(one("join(\"-\")", json!(["a", 1, null, true])), json!("a-1--true"));
        assert_eq!(one("ascii_downcase", json!("AbC")), json!("abc"));
        assert_eq!(one("ltrimstr(\"foo\")", json!("foobar")), json!("bar"));
        assert_eq!(one("ltrimstr(\"x\")", json!(1)), json!(1));
        assert_eq!(one("startswith(\"fo\")", json!("foo")), json!(true));
        assert_eq!(one("tostring", json!({"a": [1]})), json!("{\"a\":[1]}"));
        assert_eq!(one("tonumber", json!("1.5")), json!(1.5));
        assert_eq!(one("fromjson", json!("{\"a\":1}")), json!({"a": 1}));
        assert_eq!(one("index(\"b\")", json!("abcb")), json!(1));
        assert_eq!(one("rindex(\"b\")", json!("abcb")), json!(3));
        assert_eq!(one("indices(1)", json!([0, 1, 1])), json!([1, 2]));
        assert_eq!(one("explode | implode", json!("hé")), json!("hé"));
        assert_eq!(one("trim", json!("  x ")), json!("x"));
    }

    #[test]
    fn test_paths() {
        let doc = json!({"a": {"b": 1}, "c": [2]});
        assert_eq!(
            one("[paths]", doc.clone()),
            json!([["a"], ["a", "b"], ["c"], ["c", 0]])
        );
        assert_eq!(one("[leaf_paths]", doc.clone()), json!([["a", "b"], ["c", 0]]));
        assert_eq!(one("[paths(type == \"number\")]", doc.clone()), json!([["a", "b"], ["c", 0]]));
        assert_eq!(one("path(.a.b)", doc.clone()), json!(["a", "b"]));
        assert_eq!(one("[path(..)] | length", doc.clone()), json!(5));
        assert_eq!(one("del(.a)", doc.clone()), json!({"c": [2]}));
        assert_eq!(one("del(.c[0], .a.b)", doc.clone()), json!({"a": {}, "c": []}));
        assert_eq!(one("getpath([\"a\", \"b\"])", doc.clone()), json!(1));
        assert_eq!(one("getpath([\"x\", \"y\"])", doc.clone()), Value::Null);
        assert_eq!(one("setpath([\"c\", 1]; 3) | .c", doc.clone()), json!([2, 3]));
        assert_eq!(one("delpaths([[\"a\"], [\"c\"]])", doc.clone()), json!({}));
        assert_eq!(one("pick(.a.b)", doc), json!({"a": {"b": 1}}));
        assert_eq!(
            one("path(.[] | select(. > 1))", json!([1, 2])),
            json!([1])
        );
    }

    #[test]
    fn test_recursion_helpers() {
        assert_eq!(
            run("recurse(if . < 3 then . + 1 else empty end)", json!(0)).unwrap(),
            vec![json!(0), json!(1), json!(2), json!(3)]
        );
        assert_eq!(
            one("[recurse(. * 2; . < 20)]", json!(1)),
            json!([1, 2, 4, 8, 16])
        );
        assert_eq!(one("until(. > 100; . * 2)", json!(1)), json!(128));
        assert_eq!(one("[while(. < 10; . + 4)]", json!(1)), json!([1, 5, 9]));
        assert_eq!(one("[limit(3; repeat(. + 1))]", json!(0)), json!([0, 1, 2]));
        assert_eq!(
            one("walk(if type == \"number\" then . + 1 else . end)", json!({"a": [1, {"b": 2}]})),
            json!({"a": [2, {"b": 3}]})
        );
    }

    #[test]
    fn test_misc() {
        assert_eq!(one("flatten", json!([1, [2, [3]]])), json!([1, 2, 3]));
        assert_eq!(one("flatten(1)", json!([1, [2, [3]]])), json!([1, 2, [3]]));
        assert_eq!(one("reverse", json!([1, 2])), json!([2, 1]));
        assert_eq!(one("reverse", json!("ab")), json!("ba"));
        assert_eq!(one("transpose", json!([[1, 2], [3]])), json!([[1, 3], [2, null]]));
        assert_eq!(one("has(\"a\")", json!({"a": null})), json!(true));
        assert_eq!(one("has(2)", json!([1, 2])), json!(false));
        assert_eq!(one("contains({a: [1]})", json!({"a": [1, 2], "b": 0})), json!(true));
        assert_eq!(one("floor", json!(1.7)), json!(1));
        assert_eq!(one("pow(2; 10)", Value::Null), json!(1024));
        assert_eq!(one("toarray", json!(1)), json!([1]));
        assert_eq!(one("type", json!([])), json!("array"));
        assert_eq!(one("not", json!(null)), json!(true));
    }

    #[test]
    fn test_regex_builtins() {
        let emails = json!([{"email": "a@x.io"}, {"email": "bad"}]);
        assert_eq!(
            one("map(select(.email | test(\"@.+\\\\.io$\")) | .email)", emails),
            json!(["a@x.io"])
        );
        assert_eq!(one("test(\"ABC\"; \"i\")", json!("xabc")), json!(true));
        assert_eq!(one("test([\"b\", \"i\"])", json!("B")), json!(true));
        assert_eq!(
            one("capture(\"(?<user>[^@]+)@(?<host>.+)\")", json!("me@host.io")),
            json!({"user": "me", "host": "host.io"})
        );
        assert_eq!(one("[match(\"a\"; \"g\") | .offset]", json!("aba")), json!([0, 2]));
        assert_eq!(one("[scan(\"[0-9]+\")]", json!("a1b22")), json!(["1", "22"]));
        assert_eq!(one("[scan(\"(a)(b)?\")]", json!("ab a")), json!([["a", "b"], ["a", null]]));
        assert_eq!(one("split(\", *\"; null)", json!("a, b,c")), json!(["a", "b", "c"]));
        assert_eq!(one("[splits(\"-\")]", json!("a-b")), json!(["a", "b"]));
        assert_eq!(one("sub(\"o\"; \"0\")", json!("foo")), json!("f0o"));
        assert_eq!(one("gsub(\"o\"; \"0\")", json!("foo")), json!("f00"));
        assert_eq!(
            one("gsub(\"(?<d>[0-9])\"; \"<\\(.d)>\")", json!("a1b2")),
            json!("a<1>b<2>")
        );
        assert_eq!(one("gsub(\"A\"; \"b\"; \"i\")", json!("aA")), json!("bb"));
        assert_eq!(
            run("[sub(\"a\"; \"x\", \"y\")]", json!("ab")).unwrap(),
            vec![json!(["xb", "yb"])]
        );
        assert_eq!(one("gsub(\" \"; \"_\") | length", json!(" ".repeat(10_000))), json!(10_000));
        assert!(run("test(\"(\")", json!("a")).is_err());
        assert!(run("test(\"a\")", json!(1)).is_err());
    }

    #[test]
    fn test_formats_in_queries() {
        assert_eq!(one("@tsv", json!(["a", 1, null])), json!("a\t1\t"));
        assert_eq!(one(".[] | @csv", json!([["x", 2]])), json!("\"x\",2"));
        assert_eq!(one("@base64", json!("hi")), json!("aGk="));
        assert_eq!(one("@base64 | @base64d", json!("hi")), json!("hi"));
        assert_eq!(
            one("@uri \"https://x.io/?q=\\(.q)&n=\\(.n)\"", json!({"q": "a b", "n": 1})),
            json!("https://x.io/?q=a%20b&n=1")
        );
        assert_eq!(one("@sh \"echo \\(.)\"", json!("it's")), json!("echo 'it'\\''s'"));
        assert_eq!(one("@json \"v=\\(.)\"", json!([1])), json!("v=[1]"));
        assert_eq!(one("@html", json!("<b>")), json!("&lt;b&gt;"));
        assert_eq!(one("@text", json!(1)), json!("1"));
    }

    #[test]
    fn test_streaming() {
        let doc = json!({"a": [1, {"b": 2}], "c": {}});
        assert_eq!(
            run("tostream", doc.clone()).unwrap(),
            vec![
                json!([["a", 0], 1]),
                json!([["a", 1, "b"], 2]),
                json!([["a", 1, "b"]]),
                json!([["a", 1]]),
                json!([["c"], {}]),
                json!([["c"]]),
            ]
        );
        assert_eq!(one("fromstream(tostream)", doc.clone()), doc);
        assert_eq!(run("fromstream(1, 2 | tostream)", Value::Null).unwrap(), vec![json!(1), json!(2)]);
        assert!(run("fromstream(1)", Value::Null).is_err());
    }

    #[test]
    fn test_index_and_numbers() {
        assert_eq!(
            one("INDEX(.id)", json!([{"id": 1, "n": "a"}, {"id": "x"}])),
            json!({"1": {"id": 1, "n": "a"}, "x": {"id": "x"}})
        );
        assert_eq!(one("INDEX(.[]; .k)", json!([{"k": "a"}])), json!({"a": {"k": "a"}}));
        assert_eq!(one("infinite | isinfinite", Value::Null), json!(true));
        assert_eq!(one("infinite > 1e308", Value::Null), json!(true));
        assert_eq!(one("-infinite < 0", Value::Null), json!(true));
        assert_eq!(one("nan", Value::Null), Value::Null);
        assert_eq!(one("1 | isnan", Value::Null), json!(false));
        assert_eq!(one("1 | isnormal", Value::Null), json!(true));
        assert_eq!(one("0 | isnormal", Value::Null), json!(false));
    }

    #[test]
    fn test_dates_and_env() {
        assert_eq!(one("todate", json!(1_700_000_000)), json!("2023-11-14T22:13:20Z"));
        assert_eq!(one("fromdate", json!("2023-11-14T22:13:20Z")), json!(1_700_000_000));
        assert!(run("fromdate", json!("yesterday")).is_err());
        assert_eq!(one("now | type", Value::Null), json!("number"));
        assert_eq!(one("env | type", Value::Null), json!("object"));
        assert_eq!(one("$ENV | type", Value::Null), json!("object"));
    }
}
