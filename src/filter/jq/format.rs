//! `@name` formats: `@base64`, `@csv`, `@uri` and friends.

use super::value::{self, describe};
use super::RuntimeError;
use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD};
use base64::Engine as _;
use serde_json::Value;
use std::fmt::Write as _;

const FORMATS: &[&str] = &[
    "text", "json", "html", "uri", "csv", "tsv", "sh", "base64", "base64d",
];

type Result<T> = std::result::Result<T, RuntimeError>;

pub fn is_defined(name: &str) -> bool {
    FORMATS.contains(&name)
}

/// Renders `value` with the format `name`.
pub fn apply(name: &str, value: &Value) -> Result<String> {
    match name {
        "text" => Ok(value::stringify(value)),
        "json" => Ok(value::to_json(value)),
        "html" => Ok(escape_html(&value::stringify(value))),
        "uri" => Ok(escape_uri(&value::stringify(value))),
        "csv" | "tsv" => row(name, value),
        "sh" => shell_words(value),
        "base64" => Ok(STANDARD.encode(value::stringify(value))),
        "base64d" => decode_base64(value),
        other => Err(RuntimeError::msg(format!("@{other} is not a valid format"))),
    }
}

fn escape_html(s: &str) -> String {
    let mut escaped = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '&' => escaped.push_str("&amp;"),
            '\'' => escaped.push_str("&#39;"),
            '"' => escaped.push_str("&quot;"),
            other => escaped.push(other),
        }
    }
    escaped
}

/// Percent-encodes everything outside the RFC 3986 unreserved set.
fn escape_uri(s: &str) -> String {
    let mut escaped = String::with_capacity(s.len());
    for byte in s.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b'.' | b'~') {
            escaped.push(char::from(byte));
        } else {
            let _ = write!(escaped, "%{byte:02X}");
        }
    }
    escaped
}

fn row(name: &str, value: &Value) -> Result<String> {
    let Value::Array(items) = value else {
        return Err(RuntimeError::msg(format!(
            "{} cannot be {name}-formatted, only an array can be",
            describe(value)
        )));
    };
    let separator = if name == "csv" { "," } else { "\t" };
    let cells = items
        .iter()
        .map(|item| match item {
            Value::Null => Ok(String::new()),
            Value::Bool(_) | Value::Number(_) => Ok(value::to_json(item)),
            Value::String(s) if name == "csv" => Ok(format!("\"{}\"", s.replace('"', "\"\""))),
            Value::String(s) => Ok(escape_tsv(s)),
            other => Err(RuntimeError::msg(format!(
                "{} is not valid in a {name} row",
                describe(other)
            ))),
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(cells.join(separator))
}

fn escape_tsv(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace('\t', "\\t")
        .replace('\n', "\\n")
        .replace('\r', "\\r")
}

fn shell_word(value: &Value) -> Result<String> {
    match value {
        Value::String(s) => Ok(format!("'{}'", s.replace('\'', "'\\''"))),
        Value::Array(_) | Value::Object(_) => Err(RuntimeError::msg(format!(
            "{} can not be escaped for shell",
            describe(value)
        ))),
        scalar => Ok(value::to_json(scalar)),
    }
}

fn shell_words(value: &Value) -> Result<String> {
    match value {
        Value::Array(items) => Ok(items
            .iter()
            .map(shell_word)
            .collect::<Result<Vec<_>>>()?
            .join(" ")),
        other => shell_word(other),
    }
}

/// Decodes standard base64 with or without padding.
fn decode_base64(value: &Value) -> Result<String> {
    let text = value::stringify(value);
    let bytes = STANDARD_NO_PAD
        .decode(text.trim_end_matches('='))
        .map_err(|_| RuntimeError::msg(format!("{} is not valid base64 data", describe(value))))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_text_formats() {
        assert_eq!(apply("text", &json!([1, "a"])).unwrap(), "[1,\"a\"]");
        assert_eq!(apply("json", &json!("a\"b")).unwrap(), "\"a\\\"b\"");
        assert_eq!(
            apply("html", &json!("<a href='x'>&</a>")).unwrap(),
            "&lt;a href=&#39;x&#39;&gt;&amp;&lt;/a&gt;"
        );
        assert_eq!(apply("uri", &json!("a b/ü~")).unwrap(), "a%20b%2F%C3%BC~");
    }

    #[test]
    fn test_rows() {
        assert_eq!(
            apply("csv", &json!([1, "a\"b", null, true])).unwrap(),
            "1,\"a\"\"b\",,true"
        );
        assert_eq!(apply("tsv", &json!(["a\tb", "c\\d", 2])).unwrap(), "a\\tb\tc\\\\d\t2");
        assert!(apply("csv", &json!([[1]])).is_err());
        assert!(apply("tsv", &json!("x")).is_err());
    }

    #[test]
    fn test_shell_quoting() {
        assert_eq!(apply("sh", &json!("it's")).unwrap(), "'it'\\''s'");
        assert_eq!(apply("sh", &json!(["a b", 1])).unwrap(), "'a b' 1");
        assert!(apply("sh", &json!({"a": 1})).is_err());
    }

    #[test]
    fn test_base64() {
        assert_eq!(apply("base64", &json!("hello")).unwrap(), "aGVsbG8=");
        assert_eq!(apply("base64d", &json!("aGVsbG8=")).unwrap(), "hello");
        assert_eq!(apply("base64d", &json!("aGVsbG8")).unwrap(), "hello");
        assert!(apply("base64d", &json!("@@@")).is_err());
    }
}
