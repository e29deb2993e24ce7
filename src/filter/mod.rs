//! Output filtering: applies a jq-style expression to response data.
//!
//! The [`Filter`] boundary normalizes typed input to JSON, runs the query
//! engine, and collapses the outputs: exactly one result is returned bare,
//! any other count (including zero) is returned as an array. Engine panics
//! are caught here and reported as ordinary filter errors.

pub mod fields;
pub mod jq;
mod normalize;

pub use fields::{build_fields_query, build_object_expr, effective_expression, parse_fields};
pub use normalize::{Codec, JsonCodec, Normalizer};

use crate::error::{Error, Result};
use jq::{Interpreter, Query, QueryRunner};
use serde::Serialize;
use serde_json::Value;
use std::panic::{self, AssertUnwindSafe};

/// Undoes shell history escaping, so `.a | select(.b \!= 1)` works from zsh.
pub fn normalize_expression(expression: &str) -> String {
    expression.replace("\\!", "!")
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Applies filter expressions with a pluggable normalizer and query engine.
pub struct Filter<C: Codec = JsonCodec> {
    normalizer: Normalizer<C>,
    runner: Box<dyn QueryRunner>,
}

impl Default for Filter {
    fn default() -> Self {
        Self::new()
    }
}

impl Filter {
    /// A filter using the JSON codec and the built-in [`Interpreter`].
    pub fn new() -> Self {
        Self::with_parts(Normalizer::default(), Box::new(Interpreter))
    }
}

impl<C: Codec> Filter<C> {
    /// Assembles a filter from a normalizer and any [`QueryRunner`].
    pub fn with_parts(normalizer: Normalizer<C>, runner: Box<dyn QueryRunner>) -> Self {
        Self { normalizer, runner }
    }

    /// Filters a JSON value. A blank expression returns `input` untouched.
    pub fn apply(&self, input: Value, expression: &str) -> Result<Value> {
        if expression.trim().is_empty() {
            return Ok(input);
        }
        let expression = normalize_expression(expression);

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            Query::parse(&expression).map(|query| self.runner.run(&query, input))
        }));
        let results = match outcome {
            Ok(Ok(results)) => results,
            Ok(Err(e)) => return Err(Error::InvalidExpression(e.to_string())),
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                tracing::warn!(%message, "filter evaluation panicked");
                return Err(Error::FilterRuntime(format!("jq panic: {message}")));
            }
        };

        let mut outputs = results
            .into_iter()
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::FilterRuntime(e.to_string()))?;
        if outputs.len() == 1 {
            Ok(outputs.remove(0))
        } else {
            Ok(Value::Array(outputs))
        }
    }

    /// Normalizes any serializable value and filters it.
    pub fn apply_to<T: Serialize + ?Sized>(&self, data: &T, expression: &str) -> Result<Value> {
        let input = self.normalizer.normalize(data)?;
        self.apply(input, expression)
    }

    /// Filters a JSON document, returning pretty-printed (two-space) JSON.
    ///
    /// A blank expression returns the input bytes verbatim without parsing.
    pub fn apply_to_json(&self, input: &[u8], expression: &str) -> Result<Vec<u8>> {
        if expression.trim().is_empty() {
            return Ok(input.to_vec());
        }
        let value: Value =
            serde_json::from_slice(input).map_err(|e| Error::InvalidJson(e.to_string()))?;
        let filtered = self.apply(value, expression)?;
        serde_json::to_vec_pretty(&filtered).map_err(|e| Error::SerializationFailed(e.to_string()))
    }
}

/// [`Filter::apply`] with the default engine.
///
/// ```
/// use serde_json::json;
///
/// let out = instantly::filter::apply(json!({"a": [1, 2]}), ".a[]").unwrap();
/// assert_eq!(out, json!([1, 2]));
/// ```
pub fn apply(input: Value, expression: &str) -> Result<Value> {
    Filter::new().apply(input, expression)
}

/// [`Filter::apply_to_json`] with the default engine.
pub fn apply_to_json(input: &[u8], expression: &str) -> Result<Vec<u8>> {
    Filter::new().apply_to_json(input, expression)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    struct PanickingRunner;

    impl QueryRunner for PanickingRunner {
        fn run(&self, _query: &Query, _input: Value) -> Vec<std::result::Result<Value, jq::RuntimeError>> {
            panic!("engine exploded")
        }
    }

    #[test]
    fn test_shell_escaped_bang() {
        assert_eq!(normalize_expression(".a \\!= 1"), ".a != 1");
        let out = apply(json!([1, 2, 3]), "map(select(. \\!= 2))").unwrap();
        assert_eq!(out, json!([1, 3]));
    }

    #[test]
    fn test_result_collapsing() {
        let data = json!({"items": [{"id": "a"}, {"id": "b"}]});
        assert_eq!(apply(data.clone(), ".items[0].id").unwrap(), json!("a"));
        assert_eq!(apply(data.clone(), ".items[].id").unwrap(), json!(["a", "b"]));
        assert_eq!(apply(data, "empty").unwrap(), json!([]));
    }

    #[test]
    fn test_blank_expression_is_identity() {
        let data = json!({"b": 1, "a": 2});
        assert_eq!(apply(data.clone(), "   ").unwrap(), data);
        assert_eq!(apply_to_json(b"not json", "").unwrap(), b"not json".to_vec());
    }

    #[test]
    fn test_error_classes() {
        let err = apply(json!({}), "???").unwrap_err();
        assert!(matches!(err, Error::InvalidExpression(_)));
        assert!(err.to_string().starts_with("invalid jq expression: "), "{err}");

        let err = apply(json!({}), "error(\"boom\")").unwrap_err();
        assert_eq!(err.to_string(), "jq error: boom");

        let err = apply_to_json(b"{", ".").unwrap_err();
        assert!(matches!(err, Error::InvalidJson(_)));
    }

    #[test]
    fn test_apply_to_typed_value() {
        let mut map = HashMap::new();
        map.insert("count", 3);
        let out = Filter::new().apply_to(&map, ".count * 2").unwrap();
        assert_eq!(out, json!(6));

        let mut bad: HashMap<Vec<u8>, i32> = HashMap::new();
        bad.insert(vec![0], 1);
        let err = Filter::new().apply_to(&bad, ".").unwrap_err();
        assert!(matches!(err, Error::Normalization(_)));
    }

    #[test]
    fn test_apply_to_json_is_pretty() {
        let out = apply_to_json(br#"{"a":{"b":1}}"#, ".a").unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "{\n  \"b\": 1\n}");
    }

    #[test]
    fn test_engine_panic_is_reported() {
        let filter: Filter = Filter::with_parts(Normalizer::default(), Box::new(PanickingRunner));
        let err = filter.apply(json!(1), ".").unwrap_err();
        assert!(matches!(err, Error::FilterRuntime(_)));
        assert_eq!(err.to_string(), "jq error: jq panic: engine exploded");
    }

    #[test]
    fn test_custom_codec_filter() {
        let filter = Filter::with_parts(Normalizer::new(JsonCodec), Box::new(Interpreter));
        assert_eq!(filter.apply_to(&[1, 2, 3], "add").unwrap(), json!(6));
    }

    #[test]
    fn test_oversized_expressions_are_errors() {
        let long_sum = format!("1{}", "+1".repeat(30_000));
        assert!(apply(json!(null), &long_sum).is_err());

        let long_pipe = format!(".{}", "|.".repeat(60_000));
        assert!(apply(json!(1), &long_pipe).is_err());

        let err = apply(json!(null), &"-".repeat(200_000)).unwrap_err();
        assert!(matches!(err, Error::InvalidExpression(_)));
    }

    #[test]
    fn test_oversized_results_are_errors() {
        let err = apply(json!(null), ".[1e9] = 1").unwrap_err();
        assert!(matches!(err, Error::FilterRuntime(ref m) if m == "array index too large"));
        assert!(apply(json!([]), ".[1e300] = 1").is_err());
        assert!(apply(json!("ab"), ". * 1e10").is_err());
    }

    #[test]
    fn test_numbers_print_like_float64() {
        let out = apply_to_json(b"{\"a\": 2.0, \"b\": 9007199254740993}", ".").unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "{\n  \"a\": 2,\n  \"b\": 9007199254740992\n}");
        assert_eq!(apply(json!(null), "9007199254740993").unwrap(), json!(9_007_199_254_740_992_i64));
        assert_eq!(apply(json!(null), "[limit(-1; 1, 2)]").unwrap(), json!([1, 2]));
    }
}
