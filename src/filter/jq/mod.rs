//! A jq-compatible query language over [`serde_json::Value`].
//!
//! The language covers paths, iteration, pipes, construction, conditionals,
//! `try`, `reduce`, `foreach`, destructuring (including `?//`), assignment
//! operators, `def`, `label`/`break`, `@format` strings, regular expressions
//! and the standard builtins. Modules (`import`, `include`) and the input
//! builtins (`input`, `inputs`, `input_filename`) are rejected at parse
//! time; `debug` logs through `tracing`.
//!
//! Parsing and evaluation run on a dedicated thread with a large stack, and
//! the syntax tree never leaves it.
//!
//! ```
//! use instantly::filter::jq::{Interpreter, Query, QueryRunner};
//! use serde_json::json;
//!
//! let query = Query::parse(".items | map(.id)").unwrap();
//! let results = Interpreter.run(&query, json!({"items": [{"id": 1}, {"id": 2}]}));
//! assert_eq!(results, vec![Ok(json!([1, 2]))]);
//! ```

mod ast;
mod builtins;
mod eval;
mod format;
mod lexer;
mod parser;
mod regexp;
pub(crate) mod value;

use serde_json::Value;
use std::str::FromStr;

/// Stack reserved for the parser and evaluator threads.
const EVAL_STACK_SIZE: usize = 256 * 1024 * 1024;

/// An expression that failed to parse.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message} at offset {offset}")]
pub struct ParseError {
    message: String,
    offset: usize,
}

impl ParseError {
    pub(crate) fn new(message: impl Into<String>, offset: usize) -> Self {
        Self {
            message: message.into(),
            offset,
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Character offset of the failure in the source.
    pub fn offset(&self) -> usize {
        self.offset
    }
}

/// A value raised by `error` or by a failing builtin.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{}", render_error(.0))]
pub struct RuntimeError(Value);

fn render_error(value: &Value) -> String {
    match value {
        Value::String(message) => message.clone(),
        other => format!("{} (not a string)", value::to_json(other)),
    }
}

impl RuntimeError {
    pub fn msg(message: impl Into<String>) -> Self {
        Self(Value::String(message.into()))
    }

    pub fn value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }
}

impl From<Value> for RuntimeError {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

/// A validated query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    source: String,
}

impl Query {
    /// Checks that `source` parses. An empty program is the identity.
    pub fn parse(source: &str) -> Result<Self, ParseError> {
        with_large_stack(|| parser::parse(source).map(drop))
            .unwrap_or_else(|e| Err(ParseError::new(format!("failed to start parser: {e}"), 0)))?;
        Ok(Self {
            source: source.to_string(),
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }
}

impl FromStr for Query {
    type Err = ParseError;

    fn from_str(source: &str) -> Result<Self, Self::Err> {
        Self::parse(source)
    }
}

/// Executes parsed queries.
///
/// Each output is reported in order; evaluation stops at the first error,
/// which is the last element of the returned vector.
pub trait QueryRunner: Send + Sync {
    fn run(&self, query: &Query, input: Value) -> Vec<Result<Value, RuntimeError>>;
}

/// The built-in tree-walking interpreter.
#[derive(Debug, Clone, Copy, Default)]
pub struct Interpreter;

impl QueryRunner for Interpreter {
    fn run(&self, query: &Query, input: Value) -> Vec<Result<Value, RuntimeError>> {
        let task = || match parser::parse(&query.source) {
            Ok(ast) => eval::evaluate(&ast, input),
            Err(e) => vec![Err(RuntimeError::msg(e.to_string()))],
        };
        with_large_stack(task).unwrap_or_else(|e| {
            vec![Err(RuntimeError::msg(format!(
                "failed to start evaluator: {e}"
            )))]
        })
    }
}

/// Runs `task` on a thread with [`EVAL_STACK_SIZE`] of stack. Panics are
/// resumed on the caller.
fn with_large_stack<T: Send>(task: impl FnOnce() -> T + Send) -> std::io::Result<T> {
    std::thread::scope(|scope| {
        let handle = std::thread::Builder::new()
            .name("jq".to_string())
            .stack_size(EVAL_STACK_SIZE)
            .spawn_scoped(scope, task)?;
        match handle.join() {
            Ok(value) => Ok(value),
            Err(panic) => std::panic::resume_unwind(panic),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn run(source: &str, input: Value) -> Vec<Result<Value, RuntimeError>> {
        let query = Query::parse(source).unwrap();
        Interpreter.run(&query, input)
    }

    #[test]
    fn test_runtime_error_display() {
        assert_eq!(RuntimeError::msg("boom").to_string(), "boom");
        assert_eq!(
            RuntimeError::from(json!({"a": 1})).to_string(),
            "{\"a\":1} (not a string)"
        );
    }

    #[test]
    fn test_outputs_then_error() {
        let results = run(".[] | if . > 1 then error(\"too big\") else . end", json!([1, 2, 3]));
        assert_eq!(results.len(), 2);
        assert_eq!(results[0], Ok(json!(1)));
        assert_eq!(results[1], Err(RuntimeError::msg("too big")));
    }

    #[test]
    fn test_empty_program_is_identity() {
        assert_eq!(run("", json!({"a": 1})), vec![Ok(json!({"a": 1}))]);
    }

    #[test]
    fn test_parse_error_reports_offset() {
        let err = Query::parse(".a | ???").unwrap_err();
        assert_eq!(err.offset(), 5);
        assert!(err.to_string().contains("'?'"), "{err}");
    }

    #[test]
    fn test_from_str() {
        let query: Query = ".a".parse().unwrap();
        assert_eq!(Interpreter.run(&query, json!({"a": 2})), vec![Ok(json!(2))]);
    }

    #[test]
    fn test_deep_syntax_trees_stay_on_the_worker() {
        let source = format!("1{}", "+1".repeat(40_000));
        let query = Query::parse(&source).unwrap();
        let results = Interpreter.run(&query, Value::Null);
        let err = results[0].clone().unwrap_err();
        assert!(err.to_string().contains("recursion"), "{err}");
        drop(query);
    }

    #[test]
    fn test_recursive_definition() {
        let results = run("def fact: if . <= 1 then 1 else . * (. - 1 | fact) end; fact", json!(10));
        assert_eq!(results, vec![Ok(json!(3628800))]);
    }

    #[test]
    fn test_deep_recursion_is_an_error() {
        let results = run("[recurse(if . < 100000 then . + 1 else empty end)] | length", json!(0));
        assert_eq!(results.len(), 1);
        let err = results[0].clone().unwrap_err();
        assert!(err.to_string().contains("recursion"), "{err}");
    }
}
