//! The request executor.
//!
//! [`Client::execute`] turns one logical [`Request`] into zero or more
//! physical HTTP attempts under the configured [`RequestPolicy`]. The JSON
//! convenience calls (`get_json`, `post_json`, ...) sit on top of it.

use crate::{
    classify::api_error_message,
    error::ApiError,
    metadata::{encode_query, Query, Request, ResponseMeta},
    policy::RequestPolicy,
    rate_limit::{cap_delay, retry_after_delay, RateLimitInfo},
    retry::{JitterSource, Scheduler},
    Error, Response, Result,
};
use http::{header, HeaderMap, HeaderValue, Method, StatusCode};
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use url::Url;

const IDEMPOTENCY_KEY: &str = "idempotency-key";

/// An API client executing requests under one [`RequestPolicy`].
///
/// The client is cheap to clone and reuses its connection pool. Retry
/// counters live on the stack of each [`Client::execute`] call, so clones
/// never share attempt state.
///
/// # Examples
///
/// ```no_run
/// use instantly::{Client, RequestPolicy};
/// use instantly::metadata::Request;
/// use http::Method;
/// use std::time::Duration;
/// use tokio_util::sync::CancellationToken;
///
/// # async fn example() -> Result<(), instantly::Error> {
/// let policy = RequestPolicy::builder()
///     .token("secret")
///     .max_429_retries(2)
///     .max_5xx_retries(3)
///     .retry_delay(Duration::from_millis(500))
///     .build();
/// let client = Client::new(&policy)?;
/// let cancel = CancellationToken::new();
///
/// let request = Request::new(Method::GET, "/campaigns").with_query_param("limit", "10");
/// let response = client.execute(&request, &cancel).await?;
/// println!("{} bytes after {} attempts", response.data.len(), response.attempts);
///
/// let created = client
///     .post_json("/leads", None, Some(&serde_json::json!({"email": "a@b.c"})), &cancel)
///     .await?;
/// println!("{}", created.data);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    http_client: reqwest::Client,
    policy: RequestPolicy,
    scheduler: Scheduler,
}

impl Client {
    /// Creates a client for `policy` with random jitter.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigurationError`] if the HTTP client cannot be
    /// constructed.
    pub fn new(policy: &RequestPolicy) -> Result<Self> {
        Self::builder().policy(policy.clone()).build()
    }

    /// Creates a new `ClientBuilder`.
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// The policy this client executes under.
    pub fn policy(&self) -> &RequestPolicy {
        &self.inner.policy
    }

    /// Resolves the full URL of `request` against the base URL.
    ///
    /// Plain concatenation: trailing slashes are trimmed from the base, a
    /// leading slash is added to the path, and a non-empty query is appended
    /// form-encoded.
    ///
    /// # Examples
    ///
    /// ```
    /// use instantly::{Client, RequestPolicy};
    /// use instantly::metadata::Request;
    /// use http::Method;
    ///
    /// let policy = RequestPolicy::builder().base_url("https://api.example.com/v2/").build();
    /// let client = Client::new(&policy).unwrap();
    /// let request = Request::new(Method::GET, "leads").with_query_param("q", "a b");
    /// assert_eq!(client.resolve_url(&request), "https://api.example.com/v2/leads?q=a+b");
    /// ```
    pub fn resolve_url(&self, request: &Request) -> String {
        let base = self.inner.policy.base_url().trim_end_matches('/');
        let mut url = format!("{}{}", base, request.normalized_path());
        if !request.query.is_empty() {
            url.push('?');
            url.push_str(&encode_query(&request.query));
        }
        url
    }

    /// Executes one logical request and returns the raw body bytes.
    ///
    /// In dry-run mode nothing is sent; the body describes the request that
    /// would have been made and `attempts` is `0`.
    ///
    /// Retries apply only to GET requests, or to any method when an
    /// idempotency key is configured. 429 responses and 5xx responses (plus
    /// transport failures) draw on separate retry budgets.
    ///
    /// # Errors
    ///
    /// - [`Error::MissingCredential`] when no token is set outside dry-run.
    /// - [`Error::InvalidUrl`] when the resolved URL does not parse.
    /// - [`Error::Transport`] when the connection fails and no 5xx budget
    ///   remains.
    /// - [`Error::Read`] when the response body cannot be read. Never retried.
    /// - [`Error::Api`] for a terminal status >= 400.
    /// - [`Error::Cancelled`] when `cancel` fires during a send or a sleep.
    pub async fn execute(
        &self,
        request: &Request,
        cancel: &CancellationToken,
    ) -> Result<Response<Vec<u8>>> {
        let start_time = Instant::now();
        let policy = &self.inner.policy;
        let full_url = self.resolve_url(request);

        if policy.dry_run() {
            return simulate(request, full_url, start_time);
        }

        let token = policy.token().ok_or(Error::MissingCredential)?;
        let url = Url::parse(&full_url)?;
        let headers = request_headers(token, policy.idempotency_key(), request.payload())?;

        let can_retry = request.method == Method::GET || policy.idempotency_key().is_some();
        let mut retries_429 = 0;
        let mut retries_5xx = 0;
        let mut attempt = 0;

        loop {
            attempt += 1;

            tracing::debug!(
                method = %request.method,
                url = %full_url,
                attempt = attempt,
                "Executing HTTP request"
            );

            let mut builder = self
                .inner
                .http_client
                .request(request.method.clone(), url.clone())
                .headers(headers.clone());
            if let Some(body) = &request.body {
                builder = builder.body(body.clone());
            }

            let sent = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                sent = builder.send() => sent,
            };

            let response = match sent {
                Ok(response) => response,
                Err(e) => {
                    if can_retry && retries_5xx < policy.max_5xx_retries() {
                        retries_5xx += 1;
                        tracing::warn!(
                            error = %e,
                            retries_5xx = retries_5xx,
                            attempt = attempt,
                            "Transport failure, retrying"
                        );
                        self.inner
                            .scheduler
                            .sleep_with_backoff(
                                policy.retry_delay(),
                                policy.max_retry_delay(),
                                retries_5xx,
                                cancel,
                            )
                            .await?;
                        continue;
                    }

                    tracing::warn!(
                        error = %e,
                        method = %request.method,
                        url = %full_url,
                        attempt = attempt,
                        "Request failed"
                    );
                    return Err(Error::Transport(e));
                }
            };

            let status = response.status();
            let response_headers = response.headers().clone();

            let body = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                body = response.bytes() => body.map_err(Error::Read)?,
            };

            tracing::info!(
                status = status.as_u16(),
                latency_ms = start_time.elapsed().as_millis(),
                attempt = attempt,
                "Received HTTP response"
            );

            let meta = ResponseMeta::new(
                &request.method,
                full_url.clone(),
                RateLimitInfo::from_headers(&response_headers),
            );

            if status == StatusCode::TOO_MANY_REQUESTS
                && can_retry
                && retries_429 < policy.max_429_retries()
            {
                retries_429 += 1;
                let delay = cap_delay(
                    retry_after_delay(&response_headers, policy.retry_delay()),
                    policy.max_retry_delay(),
                );
                tracing::warn!(
                    retries_429 = retries_429,
                    delay_ms = delay.as_millis(),
                    attempt = attempt,
                    "Rate limited, waiting before retry"
                );
                self.inner
                    .scheduler
                    .sleep_with_jitter(delay, cancel)
                    .await?;
                continue;
            }

            if status.is_server_error() && can_retry && retries_5xx < policy.max_5xx_retries() {
                retries_5xx += 1;
                tracing::warn!(
                    status = status.as_u16(),
                    retries_5xx = retries_5xx,
                    attempt = attempt,
                    "Server error, retrying"
                );
                self.inner
                    .scheduler
                    .sleep_with_backoff(
                        policy.retry_delay(),
                        policy.max_retry_delay(),
                        retries_5xx,
                        cancel,
                    )
                    .await?;
                continue;
            }

            if status.as_u16() >= 400 {
                return Err(Error::Api(ApiError {
                    status,
                    message: api_error_message(status.as_u16(), &body),
                    body: body.to_vec(),
                    meta,
                }));
            }

            return Ok(Response::new(
                body.to_vec(),
                status,
                meta,
                start_time.elapsed(),
                attempt,
            ));
        }
    }

    /// GET `path` and decode the body as JSON.
    ///
    /// # Errors
    ///
    /// Any error of [`Client::execute`], or [`Error::DeserializationFailed`]
    /// for a non-JSON success body.
    pub async fn get_json(
        &self,
        path: impl Into<String>,
        query: Option<Query>,
        cancel: &CancellationToken,
    ) -> Result<Response<Value>> {
        self.send_json(Method::GET, path, query, None, cancel).await
    }

    /// POST an optional JSON payload and decode the response.
    ///
    /// # Errors
    ///
    /// [`Error::SerializationFailed`] if the payload cannot be encoded, plus
    /// everything [`Client::get_json`] returns.
    pub async fn post_json<T>(
        &self,
        path: impl Into<String>,
        query: Option<Query>,
        payload: Option<&T>,
        cancel: &CancellationToken,
    ) -> Result<Response<Value>>
    where
        T: Serialize + ?Sized,
    {
        let body = encode_payload(payload)?;
        self.send_json(Method::POST, path, query, body, cancel).await
    }

    /// PATCH an optional JSON payload and decode the response.
    ///
    /// # Errors
    ///
    /// Same as [`Client::post_json`].
    pub async fn patch_json<T>(
        &self,
        path: impl Into<String>,
        query: Option<Query>,
        payload: Option<&T>,
        cancel: &CancellationToken,
    ) -> Result<Response<Value>>
    where
        T: Serialize + ?Sized,
    {
        let body = encode_payload(payload)?;
        self.send_json(Method::PATCH, path, query, body, cancel).await
    }

    /// DELETE `path` without a body and decode the response.
    ///
    /// # Errors
    ///
    /// Same as [`Client::get_json`].
    pub async fn delete_json(
        &self,
        path: impl Into<String>,
        query: Option<Query>,
        cancel: &CancellationToken,
    ) -> Result<Response<Value>> {
        self.send_json(Method::DELETE, path, query, None, cancel)
            .await
    }

    /// DELETE `path` with an optional JSON payload and decode the response.
    ///
    /// # Errors
    ///
    /// Same as [`Client::post_json`].
    pub async fn delete_json_with_body<T>(
        &self,
        path: impl Into<String>,
        query: Option<Query>,
        payload: Option<&T>,
        cancel: &CancellationToken,
    ) -> Result<Response<Value>>
    where
        T: Serialize + ?Sized,
    {
        let body = encode_payload(payload)?;
        self.send_json(Method::DELETE, path, query, body, cancel)
            .await
    }

    async fn send_json(
        &self,
        method: Method,
        path: impl Into<String>,
        query: Option<Query>,
        body: Option<Vec<u8>>,
        cancel: &CancellationToken,
    ) -> Result<Response<Value>> {
        let mut request = Request::new(method, path).with_query(query.unwrap_or_default());
        request.body = body;
        self.execute(&request, cancel).await?.json()
    }
}

fn encode_payload<T>(payload: Option<&T>) -> Result<Option<Vec<u8>>>
where
    T: Serialize + ?Sized,
{
    payload
        .map(|payload| {
            serde_json::to_vec(payload).map_err(|e| Error::SerializationFailed(e.to_string()))
        })
        .transpose()
}

fn request_headers(
    token: &str,
    idempotency_key: Option<&str>,
    payload: Option<&[u8]>,
) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();

    let mut auth = HeaderValue::from_str(&format!("Bearer {token}"))
        .map_err(|e| Error::ConfigurationError(format!("invalid API key: {e}")))?;
    auth.set_sensitive(true);
    headers.insert(header::AUTHORIZATION, auth);

    // Some endpoints reject a JSON content type on an empty body.
    if payload.is_some() {
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
    }

    if let Some(key) = idempotency_key {
        let value = HeaderValue::from_str(key)
            .map_err(|e| Error::ConfigurationError(format!("invalid idempotency key: {e}")))?;
        headers.insert(IDEMPOTENCY_KEY, value);
    }

    Ok(headers)
}

/// Builds the dry-run response describing `request` without sending it.
fn simulate(request: &Request, url: String, start_time: Instant) -> Result<Response<Vec<u8>>> {
    let mut described = Map::new();
    described.insert("method".into(), Value::from(request.method.as_str()));
    described.insert("url".into(), Value::from(url.as_str()));

    if !request.query.is_empty() {
        let query = serde_json::to_value(&request.query)
            .map_err(|e| Error::SerializationFailed(e.to_string()))?;
        described.insert("query".into(), query);
    }

    if let Some(payload) = request.payload() {
        let body = match serde_json::from_slice::<Value>(payload) {
            Ok(Value::Null) => None,
            Ok(value) => Some(value),
            Err(_) => Some(Value::String(String::from_utf8_lossy(payload).into_owned())),
        };
        if let Some(body) = body {
            described.insert("body".into(), body);
        }
    }

    let mut out = Map::new();
    out.insert("dry_run".into(), Value::Bool(true));
    out.insert("request".into(), Value::Object(described));

    let bytes = serde_json::to_vec(&Value::Object(out))
        .map_err(|e| Error::SerializationFailed(format!("dry-run response: {e}")))?;

    tracing::debug!(method = %request.method, url = %url, "Dry run, request not sent");

    Ok(Response::new(
        bytes,
        StatusCode::OK,
        ResponseMeta::new(&request.method, url, None),
        start_time.elapsed(),
        0,
    ))
}

/// Builder for configuring and creating a [`Client`].
///
/// # Examples
///
/// ```
/// use instantly::{ClientBuilder, RequestPolicy};
/// use instantly::retry::FixedJitter;
/// use std::sync::Arc;
///
/// let client = ClientBuilder::new()
///     .policy(RequestPolicy::builder().token("secret").build())
///     .jitter_source(Arc::new(FixedJitter::default()))
///     .build()
///     .unwrap();
/// assert_eq!(client.policy().token(), Some("secret"));
/// ```
pub struct ClientBuilder {
    policy: RequestPolicy,
    jitter: Option<Arc<dyn JitterSource>>,
}

impl ClientBuilder {
    /// Creates a new `ClientBuilder` with the default policy.
    pub fn new() -> Self {
        Self {
            policy: RequestPolicy::default(),
            jitter: None,
        }
    }

    /// Sets the request policy.
    pub fn policy(mut self, policy: RequestPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Replaces the randomness used to jitter retry sleeps.
    pub fn jitter_source(mut self, jitter: Arc<dyn JitterSource>) -> Self {
        self.jitter = Some(jitter);
        self
    }

    /// Builds the configured `Client`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigurationError`] if the HTTP client cannot be
    /// constructed.
    pub fn build(self) -> Result<Client> {
        let http_client = reqwest::Client::builder()
            .timeout(self.policy.timeout())
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| {
                Error::ConfigurationError(format!("Failed to build HTTP client: {}", e))
            })?;

        let scheduler = self.jitter.map(Scheduler::new).unwrap_or_default();

        Ok(Client {
            inner: Arc::new(ClientInner {
                http_client,
                policy: self.policy,
                scheduler,
            }),
        })
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(policy: RequestPolicy) -> Client {
        Client::new(&policy).unwrap()
    }

    #[test]
    fn test_resolve_url() {
        let c = client(
            RequestPolicy::builder()
                .base_url("https://api.example.com/api/v2///")
                .build(),
        );
        let request = Request::new(Method::GET, "campaigns");
        assert_eq!(
            c.resolve_url(&request),
            "https://api.example.com/api/v2/campaigns"
        );

        let request = Request::new(Method::GET, "/leads")
            .with_query_param("limit", "10")
            .with_query_param("email", "a@b.c");
        assert_eq!(
            c.resolve_url(&request),
            "https://api.example.com/api/v2/leads?email=a%40b.c&limit=10"
        );
    }

    #[test]
    fn test_request_headers() {
        let headers = request_headers("k", Some("idem"), Some(b"{}")).unwrap();
        assert_eq!(headers[header::AUTHORIZATION], "Bearer k");
        assert_eq!(headers[header::CONTENT_TYPE], "application/json");
        assert_eq!(headers[IDEMPOTENCY_KEY], "idem");

        let headers = request_headers("k", None, None).unwrap();
        assert!(headers.get(header::CONTENT_TYPE).is_none());
        assert!(headers.get(IDEMPOTENCY_KEY).is_none());

        assert!(matches!(
            request_headers("bad\ntoken", None, None),
            Err(Error::ConfigurationError(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_credential() {
        let c = client(RequestPolicy::default());
        let err = c
            .execute(&Request::new(Method::GET, "/x"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::MissingCredential));
    }

    #[tokio::test]
    async fn test_invalid_url_is_reported_before_sending() {
        let c = client(
            RequestPolicy::builder()
                .base_url("not a url")
                .token("k")
                .build(),
        );
        let err = c
            .execute(&Request::new(Method::GET, "/x"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidUrl(_)));
        assert!(err.to_string().starts_with("create request:"));
    }

    #[tokio::test]
    async fn test_dry_run_describes_request() {
        let c = client(
            RequestPolicy::builder()
                .base_url("https://api.example.com/v2")
                .dry_run(true)
                .build(),
        );
        let request = Request::new(Method::POST, "/leads")
            .with_query_param("a", "1")
            .with_body(br#"{"email":"x@y.z"}"#.to_vec());
        let response = c
            .execute(&request, &CancellationToken::new())
            .await
            .unwrap();

        assert!(response.is_dry_run());
        assert_eq!(response.status, StatusCode::OK);
        assert!(response.meta.rate_limit.is_none());
        assert_eq!(response.meta.url(), "https://api.example.com/v2/leads?a=1");

        let body: Value = serde_json::from_slice(&response.data).unwrap();
        assert_eq!(
            body,
            serde_json::json!({
                "dry_run": true,
                "request": {
                    "method": "POST",
                    "url": "https://api.example.com/v2/leads?a=1",
                    "query": {"a": ["1"]},
                    "body": {"email": "x@y.z"}
                }
            })
        );
    }

    #[tokio::test]
    async fn test_dry_run_raw_body_and_omitted_fields() {
        let c = client(RequestPolicy::builder().dry_run(true).build());

        let request = Request::new(Method::PATCH, "x").with_body(b"not json".to_vec());
        let response = c
            .execute(&request, &CancellationToken::new())
            .await
            .unwrap();
        let body: Value = serde_json::from_slice(&response.data).unwrap();
        assert_eq!(body["request"]["body"], "not json");
        assert!(body["request"].get("query").is_none());

        let response = c
            .get_json("/accounts", None, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(response.data["dry_run"], true);
        assert!(response.data["request"].get("body").is_none());
    }

    #[test]
    fn test_encode_payload() {
        assert_eq!(encode_payload::<Value>(None).unwrap(), None);
        assert_eq!(
            encode_payload(Some(&serde_json::json!({"a": 1}))).unwrap(),
            Some(br#"{"a":1}"#.to_vec())
        );

        let mut bad = std::collections::HashMap::new();
        bad.insert(vec![1u8], 1);
        let err = encode_payload(Some(&bad)).unwrap_err();
        assert!(err.to_string().starts_with("encode json:"));
    }
}
