//! Error types for API calls and output filtering.
//!
//! Every failure the core can produce is a variant of [`Error`]. Nothing is
//! logged-and-swallowed: the CLI layer decides how to present these, the core
//! only has to classify them accurately.

use crate::metadata::ResponseMeta;
use crate::rate_limit::RateLimitInfo;
use http::StatusCode;

/// A terminal HTTP-level failure (status >= 400 that was not retried further).
///
/// The message is the best human-readable string the error classifier could
/// extract from the body; the numeric status is kept separately so callers
/// can report `http_status` to programmatic consumers.
#[derive(Debug, Clone, thiserror::Error)]
#[error("instantly api error (http {}){}", status_code(.status), message_suffix(.message))]
pub struct ApiError {
    /// The HTTP status code of the terminal response.
    pub status: StatusCode,
    /// Best-effort human message (see [`crate::classify::api_error_message`]).
    pub message: String,
    /// The raw response body.
    pub body: Vec<u8>,
    /// Request line and rate-limit state of the terminal attempt.
    pub meta: ResponseMeta,
}

fn status_code(status: &StatusCode) -> u16 {
    status.as_u16()
}

fn message_suffix(message: &str) -> String {
    if message.is_empty() {
        String::new()
    } else {
        format!(": {message}")
    }
}

impl ApiError {
    /// Returns the raw body as (lossy) UTF-8 text.
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// The main error type.
///
/// # Examples
///
/// ```no_run
/// use instantly::{Client, Error, RequestPolicy};
/// use tokio_util::sync::CancellationToken;
///
/// # async fn example() -> Result<(), Error> {
/// let policy = RequestPolicy::builder().token("secret").build();
/// let client = Client::new(&policy)?;
///
/// match client.get_json("/campaigns", None, &CancellationToken::new()).await {
///     Ok(response) => println!("{}", response.data),
///     Err(Error::Api(err)) => eprintln!("http {}: {}", err.status, err.message),
///     Err(Error::Cancelled) => eprintln!("aborted"),
///     Err(e) => eprintln!("other error: {e}"),
/// }
/// # Ok(())
/// # }
/// ```
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// No bearer token was configured and dry-run is off.
    #[error("missing API key: set INSTANTLY_API_KEY or pass --api-key")]
    MissingCredential,

    /// A network-level failure (connection refused, DNS, TLS, timeout) that
    /// survived the 5xx retry budget.
    #[error("request failed: {0}")]
    Transport(#[source] reqwest::Error),

    /// The response arrived but its body could not be read. Never retried.
    #[error("read response: {0}")]
    Read(#[source] reqwest::Error),

    /// The server answered with a terminal HTTP error status.
    #[error(transparent)]
    Api(ApiError),

    /// The caller's cancellation signal fired while the request was in flight
    /// or sleeping between retries.
    #[error("request cancelled")]
    Cancelled,

    /// The fully-resolved request URL could not be parsed.
    #[error("create request: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Invalid configuration or conflicting options.
    #[error("{0}")]
    ConfigurationError(String),

    /// A request payload (or dry-run description) could not be encoded.
    #[error("encode json: {0}")]
    SerializationFailed(String),

    /// A successful response body was not valid JSON.
    #[error("decode json: {serde_error}")]
    DeserializationFailed {
        /// The raw response body that failed to decode
        raw_response: String,
        /// The serde error message
        serde_error: String,
        /// The HTTP status code
        status: StatusCode,
    },

    /// The filter expression does not parse.
    #[error("invalid jq expression: {0}")]
    InvalidExpression(String),

    /// The filter expression parsed but failed while evaluating, including
    /// recovered engine panics.
    #[error("jq error: {0}")]
    FilterRuntime(String),

    /// The value handed to the filter could not be normalized to JSON.
    #[error("normalize jq input: {0}")]
    Normalization(String),

    /// A `--fields` list violated the field path grammar.
    #[error("{0}")]
    FieldGrammar(String),

    /// Bytes handed to the filter were not valid JSON.
    #[error("invalid JSON: {0}")]
    InvalidJson(String),

    /// Rendered output could not be written.
    #[error("write output: {0}")]
    Output(#[from] std::io::Error),
}

impl Error {
    /// Returns `true` if a fresh attempt could plausibly succeed.
    ///
    /// Transport failures, 429 and 5xx API errors are retryable; everything
    /// else (including cancellation) is not.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Transport(_) => true,
            Error::Api(err) => {
                err.status.is_server_error() || err.status == StatusCode::TOO_MANY_REQUESTS
            }
            _ => false,
        }
    }

    /// Returns `true` if this error reports a deliberate abort.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }

    /// Returns the HTTP status code if this error has one.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Error::Api(err) => Some(err.status),
            Error::DeserializationFailed { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Returns the best human-readable message for this error.
    ///
    /// For API errors this is the classifier's message when it found one;
    /// otherwise it is the error's display string.
    pub fn message(&self) -> String {
        match self {
            Error::Api(err) if !err.message.is_empty() => err.message.clone(),
            other => other.to_string(),
        }
    }

    /// Returns the raw response body if this error has one.
    pub fn raw_response(&self) -> Option<String> {
        match self {
            Error::Api(err) => Some(err.body_text()),
            Error::DeserializationFailed { raw_response, .. } => Some(raw_response.clone()),
            _ => None,
        }
    }

    /// Returns the metadata of the terminal attempt for API errors.
    pub fn meta(&self) -> Option<&ResponseMeta> {
        match self {
            Error::Api(err) => Some(&err.meta),
            _ => None,
        }
    }

    /// Returns rate limit information if the terminal response carried any.
    pub fn rate_limit_info(&self) -> Option<&RateLimitInfo> {
        self.meta()?.rate_limit.as_ref()
    }
}

/// A specialized `Result` type for this crate.
pub type Result<T> = std::result::Result<T, Error>;
