//! Request descriptions and per-call response metadata.

use crate::rate_limit::RateLimitInfo;
use http::Method;
use serde::Serialize;
use std::collections::BTreeMap;

/// Multi-valued query parameters, ordered by key.
///
/// Keys encode in sorted order and each key's values keep insertion order,
/// so the resolved URL is stable across runs.
pub type Query = BTreeMap<String, Vec<String>>;

/// One logical HTTP request: method, path, query and an optional raw body.
///
/// The body is already-serialized bytes; the executor never re-encodes it.
#[derive(Debug, Clone)]
pub struct Request {
    /// The HTTP method (GET, POST, etc.).
    pub method: Method,

    /// The request path, relative to the base URL. A leading slash is added
    /// when missing.
    pub path: String,

    /// Query parameters for this request.
    pub query: Query,

    /// Raw request body.
    pub body: Option<Vec<u8>>,
}

impl Request {
    /// Creates a new `Request` with the given method and path.
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Query::new(),
            body: None,
        }
    }

    /// Appends a value to a query parameter, keeping earlier values.
    pub fn with_query_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.entry(key.into()).or_default().push(value.into());
        self
    }

    /// Replaces all values of a query parameter.
    pub fn set_query_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(key.into(), vec![value.into()]);
        self
    }

    /// Merges a whole query map into this request.
    pub fn with_query(mut self, query: Query) -> Self {
        for (key, values) in query {
            self.query.entry(key).or_default().extend(values);
        }
        self
    }

    /// Sets the raw request body.
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Returns the body only when it is non-empty.
    pub(crate) fn payload(&self) -> Option<&[u8]> {
        self.body.as_deref().filter(|body| !body.is_empty())
    }

    /// Returns the path with a guaranteed leading slash.
    pub(crate) fn normalized_path(&self) -> String {
        if self.path.starts_with('/') {
            self.path.clone()
        } else {
            format!("/{}", self.path)
        }
    }
}

impl Default for Request {
    fn default() -> Self {
        Self::new(Method::GET, "")
    }
}

/// Encodes a query map as `application/x-www-form-urlencoded`.
pub(crate) fn encode_query(query: &Query) -> String {
    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    for (key, values) in query {
        for value in values {
            serializer.append_pair(key, value);
        }
    }
    serializer.finish()
}

/// Method and fully-resolved URL of a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RequestLine {
    /// The HTTP method.
    pub method: String,
    /// The full URL including the encoded query string.
    pub url: String,
}

/// Metadata describing one call.
///
/// Built once per physical round trip that reached the wire; dry-run
/// simulations carry only the request line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResponseMeta {
    /// The request that produced this response.
    pub request: RequestLine,

    /// Rate-limit headers, when the server sent any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<RateLimitInfo>,
}

impl ResponseMeta {
    /// Creates metadata for a request line with optional rate-limit state.
    pub fn new(method: &Method, url: impl Into<String>, rate_limit: Option<RateLimitInfo>) -> Self {
        Self {
            request: RequestLine {
                method: method.as_str().to_string(),
                url: url.into(),
            },
            rate_limit,
        }
    }

    /// Returns the resolved request URL.
    pub fn url(&self) -> &str {
        &self.request.url
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_params_append_and_set() {
        let request = Request::new(Method::GET, "/leads")
            .with_query_param("b", "2")
            .with_query_param("a", "1")
            .with_query_param("a", "x y");
        assert_eq!(encode_query(&request.query), "a=1&a=x+y&b=2");

        let request = request.set_query_param("a", "3");
        assert_eq!(encode_query(&request.query), "a=3&b=2");
    }

    #[test]
    fn test_normalized_path() {
        assert_eq!(Request::new(Method::GET, "x").normalized_path(), "/x");
        assert_eq!(Request::new(Method::GET, "/x").normalized_path(), "/x");
    }

    #[test]
    fn test_payload_ignores_empty_body() {
        let request = Request::new(Method::POST, "/x").with_body(Vec::new());
        assert!(request.payload().is_none());
        let request = request.with_body(b"{}".to_vec());
        assert_eq!(request.payload(), Some(&b"{}"[..]));
    }

    #[test]
    fn test_meta_serialization_omits_missing_rate_limit() {
        let meta = ResponseMeta::new(&Method::DELETE, "https://example.com/x", None);
        let json = serde_json::to_string(&meta).unwrap();
        assert_eq!(
            json,
            r#"{"request":{"method":"DELETE","url":"https://example.com/x"}}"#
        );
    }
}
