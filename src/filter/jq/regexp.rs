//! Regular expressions for `test`, `match`, `capture`, `scan`, `split`,
//! `sub` and `gsub`.
//!
//! Patterns use the syntax of the `regex` crate. Offsets and lengths in
//! match objects count codepoints.

use super::value::describe;
use super::RuntimeError;
use regex::{Captures, Regex, RegexBuilder};
use serde_json::{Map, Value};
use std::ops::Range;

type Result<T> = std::result::Result<T, RuntimeError>;

/// A compiled pattern with its flags.
struct Matcher {
    regex: Regex,
    global: bool,
    skip_empty: bool,
}

impl Matcher {
    fn new(pattern: &Value, flags: &Value, global: bool) -> Result<Self> {
        let Value::String(pattern) = pattern else {
            return Err(RuntimeError::msg(format!(
                "{} cannot be matched, as it is not a string",
                describe(pattern)
            )));
        };
        let flags = match flags {
            Value::Null => "",
            Value::String(flags) => flags.as_str(),
            other => {
                return Err(RuntimeError::msg(format!("{} is not a string", describe(other))))
            }
        };
        let mut builder = RegexBuilder::new(pattern);
        let mut matcher_global = global;
        let mut skip_empty = false;
        for flag in flags.chars() {
            match flag {
                'g' => matcher_global = true,
                'i' => {
                    builder.case_insensitive(true);
                }
                'x' => {
                    builder.ignore_whitespace(true);
                }
                'n' => skip_empty = true,
                'p' => {
                    builder.dot_matches_new_line(true);
                }
                // `^` and `$` already anchor at the ends of the input; the
                // engine has no longest-match mode.
                's' | 'l' => {}
                _ => {
                    return Err(RuntimeError::msg(format!(
                        "{flags} is not a valid modifier string"
                    )))
                }
            }
        }
        let regex = builder
            .build()
            .map_err(|e| RuntimeError::msg(format!("{pattern} is not a valid regex: {e}")))?;
        Ok(Self {
            regex,
            global: matcher_global,
            skip_empty,
        })
    }

    fn captures<'h>(&self, haystack: &'h str) -> Vec<Captures<'h>> {
        let found = self.regex.captures_iter(haystack).filter(|caps| {
            !(self.skip_empty && caps.get(0).is_some_and(|m| m.is_empty()))
        });
        if self.global {
            found.collect()
        } else {
            found.take(1).collect()
        }
    }

    fn match_object(&self, haystack: &str, caps: &Captures<'_>) -> Value {
        let captures = self
            .regex
            .capture_names()
            .enumerate()
            .skip(1)
            .map(|(i, name)| {
                let name = name.map_or(Value::Null, Value::from);
                let mut group = match caps.get(i) {
                    Some(m) => span(haystack, m.start(), m.as_str()),
                    None => unmatched(),
                };
                group.insert("name".into(), name);
                Value::Object(group)
            })
            .collect();
        let mut object = match caps.get(0) {
            Some(m) => span(haystack, m.start(), m.as_str()),
            None => unmatched(),
        };
        object.insert("captures".into(), Value::Array(captures));
        Value::Object(object)
    }
}

fn span(haystack: &str, start: usize, text: &str) -> Map<String, Value> {
    let mut object = Map::new();
    object.insert("offset".into(), Value::from(haystack[..start].chars().count()));
    object.insert("length".into(), Value::from(text.chars().count()));
    object.insert("string".into(), Value::from(text));
    object
}

fn unmatched() -> Map<String, Value> {
    let mut object = Map::new();
    object.insert("offset".into(), Value::from(-1));
    object.insert("length".into(), Value::from(0));
    object.insert("string".into(), Value::Null);
    object
}

pub fn subject(input: &Value) -> Result<&str> {
    input.as_str().ok_or_else(|| {
        RuntimeError::msg(format!(
            "{} cannot be matched, as it is not a string",
            describe(input)
        ))
    })
}

/// Splits the single-argument form `re` or `[re, flags]`.
pub fn arguments(value: Value) -> Result<(Value, Value)> {
    match value {
        Value::String(_) => Ok((value, Value::Null)),
        Value::Array(mut items) if !items.is_empty() => {
            let flags = if items.len() > 1 {
                items.swap_remove(1)
            } else {
                Value::Null
            };
            Ok((items.swap_remove(0), flags))
        }
        other => Err(RuntimeError::msg(format!(
            "{} not a string or array",
            describe(&other)
        ))),
    }
}

/// Whether `pattern` matches anywhere in `input`.
pub fn test(input: &Value, pattern: &Value, flags: &Value) -> Result<bool> {
    let haystack = subject(input)?;
    let matcher = Matcher::new(pattern, flags, false)?;
    Ok(!matcher.captures(haystack).is_empty())
}

/// Match objects, one per match, or only the first without the `g` flag.
pub fn find(input: &Value, pattern: &Value, flags: &Value, global: bool) -> Result<Vec<Value>> {
    let haystack = subject(input)?;
    let matcher = Matcher::new(pattern, flags, global)?;
    Ok(matcher
        .captures(haystack)
        .iter()
        .map(|caps| matcher.match_object(haystack, caps))
        .collect())
}

/// Byte span of each match with its `capture` object, for `sub`.
pub fn spans(
    haystack: &str,
    pattern: &Value,
    flags: &Value,
    global: bool,
) -> Result<Vec<(Range<usize>, Value)>> {
    let matcher = Matcher::new(pattern, flags, global)?;
    Ok(matcher
        .captures(haystack)
        .iter()
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let object = matcher.match_object(haystack, caps);
            Some((whole.range(), capture_object(&object)))
        })
        .collect())
}

/// The pieces of `input` between matches.
pub fn split(input: &Value, pattern: &Value, flags: &Value) -> Result<Vec<Value>> {
    let haystack = subject(input)?;
    let matcher = Matcher::new(pattern, flags, true)?;
    let mut pieces = Vec::new();
    let mut at = 0;
    for caps in matcher.captures(haystack) {
        let Some(whole) = caps.get(0) else {
            continue;
        };
        pieces.push(Value::from(&haystack[at..whole.start()]));
        at = whole.end();
    }
    pieces.push(Value::from(&haystack[at..]));
    Ok(pieces)
}

/// `{name: string}` for every named group of a match object.
pub fn capture_object(found: &Value) -> Value {
    let mut object = Map::new();
    if let Some(Value::Array(groups)) = found.get("captures") {
        for group in groups {
            if let Some(Value::String(name)) = group.get("name") {
                let text = group.get("string").cloned().unwrap_or(Value::Null);
                object.insert(name.clone(), text);
            }
        }
    }
    Value::Object(object)
}

/// What `scan` emits for a match: the matched text, or the group texts when
/// the pattern has groups.
pub fn scan_item(found: &Value) -> Value {
    match found.get("captures") {
        Some(Value::Array(groups)) if !groups.is_empty() => Value::Array(
            groups
                .iter()
                .map(|g| g.get("string").cloned().unwrap_or(Value::Null))
                .collect(),
        ),
        _ => found.get("string").cloned().unwrap_or(Value::Null),
    }
}
