//! Rendering of results and errors in the selected output mode.

use crate::envelope::{self, Envelope};
use crate::filter::Filter;
use crate::{Error, Result};
use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;
use std::io::Write;
use std::str::FromStr;

/// How results are printed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// A bare `ok`; errors go to stderr.
    Text,
    /// Indented JSON of the raw response.
    Json,
    /// One compact JSON document per line.
    Jsonl,
    /// Indented JSON of the tagged envelope.
    Agent,
}

impl OutputMode {
    /// The name accepted by `--output` and `INSTANTLY_OUTPUT`.
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputMode::Text => "text",
            OutputMode::Json => "json",
            OutputMode::Jsonl => "jsonl",
            OutputMode::Agent => "agent",
        }
    }

    /// Whether `--jq`/`--fields` can apply in this mode.
    pub fn supports_filtering(&self) -> bool {
        !matches!(self, OutputMode::Text)
    }
}

impl fmt::Display for OutputMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputMode {
    type Err = Error;

    /// An empty string selects [`OutputMode::Json`].
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "" | "json" => Ok(OutputMode::Json),
            "text" => Ok(OutputMode::Text),
            "jsonl" => Ok(OutputMode::Jsonl),
            "agent" => Ok(OutputMode::Agent),
            other => Err(Error::ConfigurationError(format!(
                "invalid --output {other:?} (expected text, json, jsonl, agent)"
            ))),
        }
    }
}

fn encode_error(e: serde_json::Error) -> Error {
    if e.is_io() {
        Error::Output(e.into())
    } else {
        Error::SerializationFailed(e.to_string())
    }
}

/// Writes `value` as two-space indented JSON followed by a newline.
pub fn print_json<W: Write + ?Sized, T: Serialize + ?Sized>(out: &mut W, value: &T) -> Result<()> {
    serde_json::to_writer_pretty(&mut *out, value).map_err(encode_error)?;
    writeln!(out)?;
    Ok(())
}

/// Writes `value` as compact JSON followed by a newline.
pub fn print_jsonl<W: Write + ?Sized, T: Serialize + ?Sized>(out: &mut W, value: &T) -> Result<()> {
    serde_json::to_writer(&mut *out, value).map_err(encode_error)?;
    writeln!(out)?;
    Ok(())
}

#[derive(Serialize)]
struct ErrorPayload<'a> {
    kind: &'a str,
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    meta: Option<Map<String, Value>>,
}

/// Prints results and errors for one invocation.
pub struct Printer {
    mode: OutputMode,
    expression: String,
    filter: Filter,
}

impl Printer {
    /// `expression` is the effective filter; blank means no filtering.
    pub fn new(mode: OutputMode, expression: impl Into<String>) -> Self {
        Self {
            mode,
            expression: expression.into(),
            filter: Filter::new(),
        }
    }

    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }

    pub fn mode(&self) -> OutputMode {
        self.mode
    }

    /// Prints a successful response.
    ///
    /// In agent mode the filter sees the envelope, otherwise the raw
    /// response. Filter failures are returned without printing anything.
    pub fn print_result<W: Write + ?Sized>(
        &self,
        out: &mut W,
        kind: &str,
        response: Value,
        meta: Option<Map<String, Value>>,
    ) -> Result<()> {
        match self.mode {
            OutputMode::Text => {
                writeln!(out, "ok")?;
                Ok(())
            }
            OutputMode::Agent => {
                let envelope: Envelope = envelope::wrap(kind, response, meta);
                let value = self.filter.apply_to(&envelope, &self.expression)?;
                print_json(out, &value)
            }
            OutputMode::Jsonl => {
                let value = self.filter.apply(response, &self.expression)?;
                print_jsonl(out, &value)
            }
            OutputMode::Json => {
                let value = self.filter.apply(response, &self.expression)?;
                print_json(out, &value)
            }
        }
    }

    /// Reports `error`: its message on `err` in text mode, otherwise a
    /// `{kind, error, meta}` payload on `out`. API errors add `http_status`
    /// to the metadata.
    pub fn print_error<W: Write + ?Sized, E: Write + ?Sized>(
        &self,
        out: &mut W,
        err: &mut E,
        kind: &str,
        error: &Error,
        meta: Option<Map<String, Value>>,
    ) -> Result<()> {
        if self.mode == OutputMode::Text {
            writeln!(err, "{error}")?;
            return Ok(());
        }

        let meta = match error {
            Error::Api(api) => {
                let mut meta = meta.unwrap_or_default();
                meta.insert("http_status".to_string(), Value::from(api.status.as_u16()));
                Some(meta)
            }
            _ => meta,
        };
        let payload = ErrorPayload {
            kind,
            error: error.to_string(),
            meta,
        };
        match self.mode {
            OutputMode::Jsonl => print_jsonl(out, &payload),
            _ => print_json(out, &payload),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ApiError;
    use crate::metadata::ResponseMeta;
    use http::{Method, StatusCode};
    use serde_json::json;

    fn render(printer: &Printer, response: Value) -> Result<String> {
        let mut out = Vec::new();
        printer.print_result(&mut out, "leads.list", response, None)?;
        Ok(String::from_utf8(out).unwrap())
    }

    #[test]
    fn test_parse_mode() {
        assert_eq!("".parse::<OutputMode>().unwrap(), OutputMode::Json);
        assert_eq!("agent".parse::<OutputMode>().unwrap(), OutputMode::Agent);
        let err = "nope".parse::<OutputMode>().unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid --output \"nope\" (expected text, json, jsonl, agent)"
        );
    }

    #[test]
    fn test_modes() {
        let response = json!({"items": [{"id": 1}]});
        let text = render(&Printer::new(OutputMode::Text, ""), response.clone()).unwrap();
        assert_eq!(text, "ok\n");

        let jsonl = render(&Printer::new(OutputMode::Jsonl, ""), response.clone()).unwrap();
        assert_eq!(jsonl, "{\"items\":[{\"id\":1}]}\n");

        let json = render(&Printer::new(OutputMode::Json, ".items[0]"), response.clone()).unwrap();
        assert_eq!(json, "{\n  \"id\": 1\n}\n");

        let agent = render(&Printer::new(OutputMode::Agent, ""), response).unwrap();
        let parsed: Value = serde_json::from_str(&agent).unwrap();
        assert_eq!(parsed, json!({"kind": "leads.list", "items": [{"id": 1}]}));
    }

    #[test]
    fn test_agent_filter_sees_envelope() {
        let printer = Printer::new(OutputMode::Agent, ".kind");
        let out = render(&printer, json!({"id": 1})).unwrap();
        assert_eq!(out, "\"leads.list\"\n");
    }

    #[test]
    fn test_filter_failure_is_returned() {
        let printer = Printer::new(OutputMode::Json, "error(\"nope\")");
        let mut out = Vec::new();
        let err = printer
            .print_result(&mut out, "x", json!(1), None)
            .unwrap_err();
        assert!(matches!(err, Error::FilterRuntime(_)));
        assert!(out.is_empty());
    }

    #[test]
    fn test_print_error_text_mode() {
        let printer = Printer::new(OutputMode::Text, "");
        let (mut out, mut err) = (Vec::new(), Vec::new());
        printer
            .print_error(&mut out, &mut err, "x", &Error::Cancelled, None)
            .unwrap();
        assert!(out.is_empty());
        assert_eq!(String::from_utf8(err).unwrap(), "request cancelled\n");
    }

    #[test]
    fn test_print_error_payload_includes_http_status() {
        let error = Error::Api(ApiError {
            status: StatusCode::NOT_FOUND,
            message: "not found".to_string(),
            body: Vec::new(),
            meta: ResponseMeta::new(&Method::GET, "https://example.com/x", None),
        });
        let printer = Printer::new(OutputMode::Jsonl, "");
        let (mut out, mut err) = (Vec::new(), Vec::new());
        printer
            .print_error(&mut out, &mut err, "api.get", &error, None)
            .unwrap();
        let payload: Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(
            payload,
            json!({
                "kind": "api.get",
                "error": "instantly api error (http 404): not found",
                "meta": {"http_status": 404},
            })
        );
        assert!(err.is_empty());
    }
}
