//! Response wrapper that keeps the payload together with call metadata.
//!
//! The executor returns a [`Response`] holding raw body bytes; the JSON
//! convenience calls map it to a [`Response<Value>`] with [`Response::json`].

use crate::metadata::ResponseMeta;
use crate::{Error, Result};
use http::StatusCode;
use serde_json::Value;
use std::time::Duration;

/// A successful call and its metadata.
///
/// # Examples
///
/// ```no_run
/// use instantly::{Client, RequestPolicy};
/// use tokio_util::sync::CancellationToken;
///
/// # async fn example() -> Result<(), instantly::Error> {
/// let client = Client::new(&RequestPolicy::builder().token("k").build())?;
/// let response = client.get_json("/accounts", None, &CancellationToken::new()).await?;
///
/// println!("{}", response.data);
/// println!("{} took {:?}", response.meta.url(), response.latency);
/// println!("attempts: {}", response.attempts);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Response<T> {
    /// The payload: raw bytes from the executor, decoded JSON from the
    /// convenience calls.
    pub data: T,

    /// The HTTP status code. Dry-run responses report `200 OK`.
    pub status: StatusCode,

    /// Request line and rate-limit state.
    pub meta: ResponseMeta,

    /// Total time spent, including retry sleeps.
    pub latency: Duration,

    /// Physical attempts made. `0` for dry-run responses, which never reach
    /// the wire.
    pub attempts: usize,
}

impl<T> Response<T> {
    /// Creates a new `Response`.
    pub fn new(
        data: T,
        status: StatusCode,
        meta: ResponseMeta,
        latency: Duration,
        attempts: usize,
    ) -> Self {
        Self {
            data,
            status,
            meta,
            latency,
            attempts,
        }
    }

    /// Maps the payload while preserving the metadata.
    pub fn map<U, F>(self, f: F) -> Response<U>
    where
        F: FnOnce(T) -> U,
    {
        Response {
            data: f(self.data),
            status: self.status,
            meta: self.meta,
            latency: self.latency,
            attempts: self.attempts,
        }
    }

    /// Returns `true` if the request required retries.
    pub fn was_retried(&self) -> bool {
        self.attempts > 1
    }

    /// Returns `true` if this response was simulated by dry-run mode.
    pub fn is_dry_run(&self) -> bool {
        self.attempts == 0
    }
}

impl Response<Vec<u8>> {
    /// Returns the body as (lossy) UTF-8 text.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.data).into_owned()
    }

    /// Decodes the body as JSON.
    ///
    /// An empty body decodes to `{"success": true}`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeserializationFailed`] if the body is not valid JSON.
    ///
    /// # Examples
    ///
    /// ```
    /// # use instantly::{Response, metadata::ResponseMeta};
    /// # use http::{Method, StatusCode};
    /// # use std::time::Duration;
    /// let meta = ResponseMeta::new(&Method::DELETE, "https://example.com/x", None);
    /// let response = Response::new(Vec::new(), StatusCode::NO_CONTENT, meta, Duration::ZERO, 1);
    ///
    /// let decoded = response.json().unwrap();
    /// assert_eq!(decoded.data, serde_json::json!({"success": true}));
    /// ```
    pub fn json(self) -> Result<Response<Value>> {
        if self.data.is_empty() {
            return Ok(self.map(|_| serde_json::json!({ "success": true })));
        }

        let value = serde_json::from_slice::<Value>(&self.data).map_err(|e| {
            tracing::error!(
                error = %e,
                status = self.status.as_u16(),
                "Failed to decode response body"
            );
            Error::DeserializationFailed {
                raw_response: self.text(),
                serde_error: e.to_string(),
                status: self.status,
            }
        })?;

        Ok(self.map(|_| value))
    }
}

impl<T> AsRef<T> for Response<T> {
    fn as_ref(&self) -> &T {
        &self.data
    }
}

impl<T> std::ops::Deref for Response<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::Method;

    fn raw(body: &[u8], attempts: usize) -> Response<Vec<u8>> {
        Response::new(
            body.to_vec(),
            StatusCode::OK,
            ResponseMeta::new(&Method::GET, "https://example.com/x", None),
            Duration::from_millis(5),
            attempts,
        )
    }

    #[test]
    fn test_json_decodes_body() {
        let response = raw(br#"{"ok":true}"#, 1).json().unwrap();
        assert_eq!(response.data["ok"], true);
        assert!(!response.was_retried());
    }

    #[test]
    fn test_empty_body_is_success() {
        let response = raw(b"", 1).json().unwrap();
        assert_eq!(response.data, serde_json::json!({"success": true}));
    }

    #[test]
    fn test_invalid_json_keeps_raw_body() {
        match raw(b"not-json", 1).json() {
            Err(Error::DeserializationFailed {
                raw_response,
                status,
                ..
            }) => {
                assert_eq!(raw_response, "not-json");
                assert_eq!(status, StatusCode::OK);
            }
            other => panic!("Expected DeserializationFailed, got {:?}", other),
        }
        let err = raw(b"not-json", 1).json().unwrap_err();
        assert!(err.to_string().starts_with("decode json:"));
    }

    #[test]
    fn test_attempt_flags() {
        assert!(raw(b"", 3).was_retried());
        assert!(raw(b"", 0).is_dry_run());
        assert!(!raw(b"", 1).is_dry_run());
    }
}
