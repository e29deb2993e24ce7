//! Command-line surface: flags, configuration layering and logging bootstrap.
//!
//! Flags override environment variables, which override the defaults of
//! [`RequestPolicy`]. The only command is the raw `api` escape hatch; it runs
//! one request through the executor and prints the result with a [`Printer`].

use crate::envelope::{kind_from_command_path, meta_from};
use crate::filter::effective_expression;
use crate::metadata::Query;
use crate::output::{OutputMode, Printer};
use crate::policy::DEFAULT_BASE_URL;
use crate::{Client, Error, RequestPolicy, Result};
use clap::{Args, Parser, Subcommand};
use serde_json::Value;
use std::io::{self, Read, Write};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

const EXIT_FAILURE: i32 = 1;
const EXIT_USAGE: i32 = 2;

#[derive(Parser, Debug)]
#[command(name = "instantly", about = "Agent-friendly CLI for Instantly.ai", version)]
pub struct Cli {
    /// Output format (text, json, jsonl, agent). Defaults to INSTANTLY_OUTPUT, else agent.
    #[arg(short, long, global = true)]
    output: Option<String>,

    /// Shorthand for --output json.
    #[arg(long, global = true)]
    json: bool,

    /// Suppress stderr and text output.
    #[arg(long, global = true)]
    quiet: bool,

    /// Suppress all output (stdout and stderr).
    #[arg(long, global = true)]
    silent: bool,

    /// Debug logging (stderr).
    #[arg(long, global = true)]
    debug: bool,

    /// HTTP timeout (e.g. 30s, 2m).
    #[arg(long, global = true, value_parser = parse_duration, default_value = "60s")]
    timeout: Duration,

    /// Instantly API base URL.
    #[arg(long, global = true, env = "INSTANTLY_BASE_URL", default_value = DEFAULT_BASE_URL)]
    base_url: String,

    /// Instantly API key.
    #[arg(long, global = true, env = "INSTANTLY_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Do not make network calls; print the request that would be made.
    #[arg(long, global = true)]
    dry_run: bool,

    /// jq expression to filter JSON/agent output.
    #[arg(long, global = true, default_value = "")]
    jq: String,

    /// Comma-separated fields to select (shorthand for --jq).
    #[arg(long, global = true, default_value = "")]
    fields: String,

    /// Max retries for 429 responses.
    #[arg(long = "max-429-retries", global = true, default_value_t = 0)]
    max_429_retries: usize,

    /// Max retries for transient 5xx responses and transport failures.
    #[arg(long = "max-5xx-retries", global = true, default_value_t = 0)]
    max_5xx_retries: usize,

    /// Base delay between retries (e.g. 1s).
    #[arg(long, global = true, value_parser = parse_duration, default_value = "1s")]
    retry_delay: Duration,

    /// Max delay between retries.
    #[arg(long, global = true, value_parser = parse_duration, default_value = "30s")]
    max_retry_delay: Duration,

    /// Idempotency key for write requests (enables retries for writes).
    #[arg(long, global = true)]
    idempotency_key: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Low-level Instantly API access.
    #[command(subcommand, alias = "raw")]
    Api(ApiCommand),
}

#[derive(Subcommand, Debug)]
enum ApiCommand {
    /// GET an arbitrary API path.
    Get(TargetArgs),
    /// POST an arbitrary API path.
    Post(WriteArgs),
    /// PATCH an arbitrary API path.
    Patch(WriteArgs),
    /// DELETE an arbitrary API path.
    Delete(TargetArgs),
}

#[derive(Args, Debug)]
struct TargetArgs {
    path: String,

    /// Query param (repeatable): key=value.
    #[arg(long = "query")]
    query: Vec<String>,
}

#[derive(Args, Debug)]
struct WriteArgs {
    #[command(flatten)]
    target: TargetArgs,

    /// JSON payload as a string.
    #[arg(long)]
    data: Option<String>,

    /// JSON payload file path, or '-' for stdin.
    #[arg(long)]
    data_file: Option<String>,
}

impl ApiCommand {
    fn method(&self) -> &'static str {
        match self {
            ApiCommand::Get(_) => "get",
            ApiCommand::Post(_) => "post",
            ApiCommand::Patch(_) => "patch",
            ApiCommand::Delete(_) => "delete",
        }
    }

    fn target(&self) -> &TargetArgs {
        match self {
            ApiCommand::Get(target) | ApiCommand::Delete(target) => target,
            ApiCommand::Post(write) | ApiCommand::Patch(write) => &write.target,
        }
    }
}

impl Cli {
    fn command_path(&self) -> String {
        match &self.command {
            Command::Api(api) => format!("instantly api {}", api.method()),
        }
    }

    /// Resolves the output mode from `--output`, `--json`, the environment
    /// default and the filter flags.
    fn output_mode(&self, env_default: Option<String>) -> Result<OutputMode> {
        let explicit = self.output.is_some();
        let mut output = match &self.output {
            Some(output) => output.clone(),
            None => env_default
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
                .unwrap_or_else(|| "agent".to_string()),
        };

        if self.json {
            if explicit && output != "json" {
                return Err(Error::ConfigurationError(format!(
                    "--json conflicts with --output {output}"
                )));
            }
            output = "json".to_string();
        }

        let mode: OutputMode = output.parse()?;
        let filtering = !self.jq.trim().is_empty() || !self.fields.trim().is_empty();
        if filtering && !mode.supports_filtering() {
            if explicit {
                return Err(Error::ConfigurationError(
                    "--jq/--fields require --output json, jsonl, or agent (or omit --output)"
                        .to_string(),
                ));
            }
            return Ok(OutputMode::Json);
        }
        Ok(mode)
    }

    fn policy(&self) -> RequestPolicy {
        let mut builder = RequestPolicy::builder()
            .base_url(self.base_url.as_str())
            .token_opt(self.api_key.clone())
            .dry_run(self.dry_run)
            .max_429_retries(self.max_429_retries)
            .max_5xx_retries(self.max_5xx_retries)
            .retry_delay(self.retry_delay)
            .max_retry_delay(self.max_retry_delay)
            .timeout(self.timeout);
        if let Some(key) = &self.idempotency_key {
            builder = builder.idempotency_key(key.as_str());
        }
        builder.build()
    }
}

/// Parses `250ms`, `30s`, `2m` or `1h`. A bare number is seconds.
///
/// ```
/// use instantly::cli::parse_duration;
/// use std::time::Duration;
///
/// assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
/// assert_eq!(parse_duration("2m").unwrap(), Duration::from_secs(120));
/// assert_eq!(parse_duration("5").unwrap(), Duration::from_secs(5));
/// ```
pub fn parse_duration(input: &str) -> std::result::Result<Duration, String> {
    let input = input.trim();
    let split = input
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(input.len());
    let (number, unit) = input.split_at(split);
    let amount: f64 = number
        .parse()
        .map_err(|_| format!("invalid duration {input:?}"))?;
    let seconds = match unit {
        "" | "s" => amount,
        "ms" => amount / 1000.0,
        "m" => amount * 60.0,
        "h" => amount * 3600.0,
        _ => return Err(format!("invalid duration unit in {input:?} (expected ms, s, m, h)")),
    };
    Duration::try_from_secs_f64(seconds).map_err(|e| format!("invalid duration {input:?}: {e}"))
}

/// Turns repeated `key=value` pairs into a query. Blank pairs are skipped.
fn parse_query_pairs(pairs: &[String]) -> Result<Query> {
    let mut query = Query::new();
    for pair in pairs.iter().map(|pair| pair.trim()).filter(|pair| !pair.is_empty()) {
        match pair.split_once('=') {
            Some((key, value)) if !key.trim().is_empty() => {
                query
                    .entry(key.trim().to_string())
                    .or_default()
                    .push(value.trim().to_string());
            }
            _ => {
                return Err(Error::ConfigurationError(format!(
                    "invalid --query {pair:?} (expected key=value)"
                )))
            }
        }
    }
    Ok(query)
}

/// Reads the raw payload from `--data` or `--data-file` (`-` is stdin).
fn read_json_input(
    data: Option<&str>,
    data_file: Option<&str>,
    stdin: &mut dyn Read,
) -> Result<Option<Vec<u8>>> {
    let data = data.filter(|data| !data.trim().is_empty());
    let data_file = data_file.filter(|file| !file.trim().is_empty());
    match (data, data_file) {
        (Some(_), Some(_)) => Err(Error::ConfigurationError(
            "--data and --data-file cannot be used together".to_string(),
        )),
        (Some(data), None) => Ok(Some(data.as_bytes().to_vec())),
        (None, Some("-")) => {
            let mut buf = Vec::new();
            stdin
                .read_to_end(&mut buf)
                .map_err(|e| Error::ConfigurationError(format!("read stdin: {e}")))?;
            Ok(Some(buf))
        }
        (None, Some(path)) => std::fs::read(path)
            .map(Some)
            .map_err(|e| Error::ConfigurationError(format!("read {path}: {e}"))),
        (None, None) => Ok(None),
    }
}

fn parse_payload(raw: Option<Vec<u8>>) -> Result<Option<Value>> {
    raw.map(|raw| {
        serde_json::from_slice(&raw)
            .map_err(|e| Error::ConfigurationError(format!("invalid JSON payload: {e}")))
    })
    .transpose()
}

fn log_directive(debug: bool, quiet: bool) -> &'static str {
    if debug {
        "instantly=debug"
    } else if quiet {
        "off"
    } else {
        "warn"
    }
}

/// Installs the stderr `fmt` subscriber. `RUST_LOG` wins over the flags.
fn init_logging(debug: bool, quiet: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_directive(debug, quiet)));
    // Already installed when embedded; keep the existing subscriber.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}

async fn call(cli: &Cli, stdin: &mut dyn Read, cancel: &CancellationToken) -> Result<crate::Response<Value>> {
    let api = match &cli.command {
        Command::Api(api) => api,
    };
    let target = api.target();
    let path = target.path.trim();
    if path.is_empty() {
        return Err(Error::ConfigurationError("path is required".to_string()));
    }
    let query = Some(parse_query_pairs(&target.query)?);

    let client = Client::new(&cli.policy())?;
    match api {
        ApiCommand::Get(_) => client.get_json(path, query, cancel).await,
        ApiCommand::Delete(_) => client.delete_json(path, query, cancel).await,
        ApiCommand::Post(write) | ApiCommand::Patch(write) => {
            let raw = read_json_input(write.data.as_deref(), write.data_file.as_deref(), stdin)?;
            let payload = parse_payload(raw)?;
            if matches!(api, ApiCommand::Post(_)) {
                client.post_json(path, query, payload.as_ref(), cancel).await
            } else {
                client.patch_json(path, query, payload.as_ref(), cancel).await
            }
        }
    }
}

/// Runs a parsed command, writing to the given streams. Returns the exit code.
pub async fn execute(
    cli: Cli,
    stdout: &mut dyn Write,
    stderr: &mut dyn Write,
    stdin: &mut dyn Read,
    cancel: &CancellationToken,
) -> i32 {
    let mode = match cli.output_mode(std::env::var("INSTANTLY_OUTPUT").ok()) {
        Ok(mode) => mode,
        Err(e) => {
            if !cli.silent {
                let _ = writeln!(stderr, "error: {e}");
            }
            return EXIT_USAGE;
        }
    };

    let mut sink_out = io::sink();
    let mut sink_err = io::sink();
    let out: &mut dyn Write = if cli.silent || (cli.quiet && mode == OutputMode::Text) {
        &mut sink_out
    } else {
        stdout
    };
    let err: &mut dyn Write = if cli.silent || cli.quiet {
        &mut sink_err
    } else {
        stderr
    };

    let kind = kind_from_command_path(&cli.command_path());
    let printer = match effective_expression(&cli.jq, &cli.fields) {
        Ok(expression) => Printer::new(mode, expression),
        Err(e) => {
            let _ = Printer::new(mode, "").print_error(out, err, &kind, &e, None);
            return EXIT_FAILURE;
        }
    };

    match call(&cli, stdin, cancel).await {
        Ok(response) => {
            let meta = meta_from(Some(&response.meta), Some(&response.data));
            match printer.print_result(out, &kind, response.data, meta.clone()) {
                Ok(()) => 0,
                Err(e) => {
                    let _ = printer.print_error(out, err, &kind, &e, meta);
                    EXIT_FAILURE
                }
            }
        }
        Err(e) => {
            tracing::debug!(error = %e, "request failed");
            let meta = meta_from(e.meta(), None);
            let _ = printer.print_error(out, err, &kind, &e, meta);
            EXIT_FAILURE
        }
    }
}

/// Parses the process arguments, runs the command and returns the exit code.
///
/// Ctrl-C cancels the in-flight request.
pub async fn run() -> i32 {
    let cli = Cli::parse();
    init_logging(cli.debug, cli.quiet || cli.silent);

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::debug!("interrupt received, cancelling");
            on_interrupt.cancel();
        }
    });

    let mut stdout = io::stdout().lock();
    let mut stderr = io::stderr().lock();
    let mut stdin = io::stdin().lock();
    let code = execute(cli, &mut stdout, &mut stderr, &mut stdin, &cancel).await;
    let _ = stdout.flush();
    code
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{DEFAULT_MAX_RETRY_DELAY, DEFAULT_RETRY_DELAY, DEFAULT_TIMEOUT};
    use serde_json::json;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).unwrap()
    }

    async fn run_captured(args: &[&str]) -> (i32, String, String) {
        let (mut out, mut err) = (Vec::new(), Vec::new());
        let mut stdin: &[u8] = b"";
        let code = execute(parse(args), &mut out, &mut err, &mut stdin, &CancellationToken::new()).await;
        (
            code,
            String::from_utf8(out).unwrap(),
            String::from_utf8(err).unwrap(),
        )
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("1s").unwrap(), Duration::from_secs(1));
        assert_eq!(parse_duration("1.5s").unwrap(), Duration::from_millis(1500));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
        assert_eq!(parse_duration("0").unwrap(), Duration::ZERO);
        assert!(parse_duration("10d").is_err());
        assert!(parse_duration("s").is_err());
        assert!(parse_duration("").is_err());
    }

    #[test]
    fn test_defaults_match_policy() {
        let cli = parse(&["instantly", "api", "get", "/x"]);
        assert_eq!(cli.timeout, DEFAULT_TIMEOUT);
        assert_eq!(cli.retry_delay, DEFAULT_RETRY_DELAY);
        assert_eq!(cli.max_retry_delay, DEFAULT_MAX_RETRY_DELAY);
        let policy = cli.policy();
        assert_eq!(policy.max_429_retries(), 0);
        assert_eq!(policy.idempotency_key(), None);
    }

    #[test]
    fn test_output_mode_resolution() {
        let cli = parse(&["instantly", "api", "get", "/x"]);
        assert_eq!(cli.output_mode(None).unwrap(), OutputMode::Agent);
        assert_eq!(cli.output_mode(Some(" jsonl ".into())).unwrap(), OutputMode::Jsonl);

        let cli = parse(&["instantly", "--json", "api", "get", "/x"]);
        assert_eq!(cli.output_mode(None).unwrap(), OutputMode::Json);

        let cli = parse(&["instantly", "--json", "-o", "jsonl", "api", "get", "/x"]);
        assert_eq!(
            cli.output_mode(None).unwrap_err().to_string(),
            "--json conflicts with --output jsonl"
        );

        let cli = parse(&["instantly", "--jq", ".a", "api", "get", "/x"]);
        assert_eq!(cli.output_mode(Some("text".into())).unwrap(), OutputMode::Json);

        let cli = parse(&["instantly", "-o", "text", "--fields", "a", "api", "get", "/x"]);
        assert!(cli.output_mode(None).is_err());

        let cli = parse(&["instantly", "-o", "yaml", "api", "get", "/x"]);
        assert!(cli.output_mode(None).is_err());
    }

    #[test]
    fn test_raw_alias() {
        let cli = parse(&["instantly", "raw", "delete", "/leads/1"]);
        assert_eq!(cli.command_path(), "instantly api delete");
    }

    #[test]
    fn test_parse_query_pairs() {
        let pairs = vec![" limit = 2 ".to_string(), "".to_string(), "tag=a".to_string(), "tag=b".to_string()];
        let query = parse_query_pairs(&pairs).unwrap();
        assert_eq!(query["limit"], vec!["2"]);
        assert_eq!(query["tag"], vec!["a", "b"]);

        let err = parse_query_pairs(&["=x".to_string()]).unwrap_err();
        assert_eq!(err.to_string(), "invalid --query \"=x\" (expected key=value)");
        assert!(parse_query_pairs(&["novalue".to_string()]).is_err());
    }

    #[test]
    fn test_read_json_input() {
        let mut stdin: &[u8] = br#"{"a":1}"#;
        assert_eq!(
            read_json_input(None, Some("-"), &mut stdin).unwrap(),
            Some(br#"{"a":1}"#.to_vec())
        );
        let mut empty: &[u8] = b"";
        assert!(read_json_input(Some("{}"), Some("f.json"), &mut empty).is_err());
        assert_eq!(read_json_input(Some("{}"), None, &mut empty).unwrap(), Some(b"{}".to_vec()));
        assert_eq!(read_json_input(Some(" "), None, &mut empty).unwrap(), None);
        let err = read_json_input(None, Some("/nonexistent/payload.json"), &mut empty).unwrap_err();
        assert!(err.to_string().starts_with("read /nonexistent/payload.json: "), "{err}");
    }

    #[test]
    fn test_parse_payload() {
        assert_eq!(parse_payload(None).unwrap(), None);
        assert_eq!(parse_payload(Some(b"[1]".to_vec())).unwrap(), Some(json!([1])));
        let err = parse_payload(Some(b"{".to_vec())).unwrap_err();
        assert!(err.to_string().starts_with("invalid JSON payload: "), "{err}");
    }

    #[tokio::test]
    async fn test_dry_run_prints_envelope() {
        let (code, out, err) = run_captured(&[
            "instantly",
            "--dry-run",
            "--base-url",
            "https://api.example.com/v2",
            "-o",
            "agent",
            "api",
            "post",
            "leads",
            "--query",
            "limit=2",
            "--data",
            r#"{"email":"a@b.c"}"#,
        ])
        .await;
        assert_eq!(code, 0, "{err}");
        let printed: Value = serde_json::from_str(&out).unwrap();
        assert_eq!(
            printed,
            json!({
                "kind": "api.post",
                "item": {
                    "dry_run": true,
                    "request": {
                        "method": "POST",
                        "url": "https://api.example.com/v2/leads?limit=2",
                        "query": {"limit": ["2"]},
                        "body": {"email": "a@b.c"},
                    },
                },
                "meta": {"request_url": "https://api.example.com/v2/leads?limit=2"},
            })
        );
    }

    #[tokio::test]
    async fn test_fields_projection_in_json_mode() {
        let (code, out, _) = run_captured(&[
            "instantly",
            "--dry-run",
            "--json",
            "--fields",
            "dry_run,request.method",
            "api",
            "get",
            "/x",
        ])
        .await;
        assert_eq!(code, 0);
        let printed: Value = serde_json::from_str(&out).unwrap();
        assert_eq!(printed, json!({"dry_run": true, "method": "GET"}));
    }

    #[tokio::test]
    async fn test_errors_are_structured() {
        let (code, out, _) =
            run_captured(&["instantly", "--dry-run", "-o", "jsonl", "--jq", ".", "--fields", "a", "api", "get", "/x"]).await;
        assert_eq!(code, EXIT_FAILURE);
        assert_eq!(
            out,
            "{\"kind\":\"api.get\",\"error\":\"--jq and --fields cannot be used together\"}\n"
        );

        let (code, out, err) = run_captured(&["instantly", "--dry-run", "-o", "text", "api", "get", " "]).await;
        assert_eq!(code, EXIT_FAILURE);
        assert!(out.is_empty());
        assert_eq!(err, "path is required\n");
    }

    #[tokio::test]
    async fn test_silent_suppresses_everything() {
        let (code, out, err) =
            run_captured(&["instantly", "--silent", "--dry-run", "api", "get", " "]).await;
        assert_eq!(code, EXIT_FAILURE);
        assert!(out.is_empty());
        assert!(err.is_empty());
    }
}
