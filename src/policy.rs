//! Per-invocation request policy.
//!
//! A [`RequestPolicy`] is built once from flags and environment and handed to
//! [`crate::Client::new`]. It is read-only while requests execute.

use std::time::Duration;

/// The production API endpoint.
pub const DEFAULT_BASE_URL: &str = "https://api.instantly.ai/api/v2";

/// Overall HTTP timeout when none (or zero) is configured.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Base retry delay.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Upper bound on a single retry sleep.
pub const DEFAULT_MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

/// Execution policy for every request of one invocation.
///
/// # Examples
///
/// ```
/// use instantly::RequestPolicy;
/// use std::time::Duration;
///
/// let policy = RequestPolicy::builder()
///     .base_url("https://api.example.com/v2/")
///     .token("secret")
///     .max_5xx_retries(2)
///     .retry_delay(Duration::from_millis(200))
///     .build();
///
/// assert_eq!(policy.base_url(), "https://api.example.com/v2/");
/// assert_eq!(policy.max_5xx_retries(), 2);
/// assert_eq!(policy.max_429_retries(), 0);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestPolicy {
    base_url: String,
    token: Option<String>,
    dry_run: bool,
    max_429_retries: usize,
    max_5xx_retries: usize,
    retry_delay: Duration,
    max_retry_delay: Duration,
    idempotency_key: Option<String>,
    timeout: Duration,
}

impl Default for RequestPolicy {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            token: None,
            dry_run: false,
            max_429_retries: 0,
            max_5xx_retries: 0,
            retry_delay: DEFAULT_RETRY_DELAY,
            max_retry_delay: DEFAULT_MAX_RETRY_DELAY,
            idempotency_key: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl RequestPolicy {
    /// Creates a builder starting from the defaults.
    pub fn builder() -> RequestPolicyBuilder {
        RequestPolicyBuilder::default()
    }

    /// The base URL requests are resolved against.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// The bearer token, if configured.
    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    /// Whether requests are simulated instead of sent.
    pub fn dry_run(&self) -> bool {
        self.dry_run
    }

    /// Retry ceiling for 429 responses.
    pub fn max_429_retries(&self) -> usize {
        self.max_429_retries
    }

    /// Retry ceiling for 5xx responses and transport failures.
    pub fn max_5xx_retries(&self) -> usize {
        self.max_5xx_retries
    }

    /// Base delay between retries.
    pub fn retry_delay(&self) -> Duration {
        self.retry_delay
    }

    /// Cap on a single retry delay; zero means uncapped.
    pub fn max_retry_delay(&self) -> Duration {
        self.max_retry_delay
    }

    /// The `Idempotency-Key` header value, if configured.
    pub fn idempotency_key(&self) -> Option<&str> {
        self.idempotency_key.as_deref()
    }

    /// Overall HTTP timeout per physical attempt.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Upper bound on physical attempts for one logical request.
    pub fn max_attempts(&self) -> usize {
        self.max_429_retries
            .saturating_add(self.max_5xx_retries)
            .saturating_add(1)
    }
}

/// Builder for [`RequestPolicy`].
#[derive(Debug, Clone, Default)]
pub struct RequestPolicyBuilder {
    policy: RequestPolicy,
}

fn non_blank(value: impl Into<String>) -> Option<String> {
    let value = value.into();
    if value.trim().is_empty() {
        None
    } else {
        Some(value)
    }
}

impl RequestPolicyBuilder {
    /// Sets the base URL. A blank value keeps [`DEFAULT_BASE_URL`].
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.policy.base_url = non_blank(url)
            .map(|url| url.trim().to_string())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        self
    }

    /// Sets the bearer token. A blank token counts as absent.
    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.policy.token = non_blank(token).map(|t| t.trim().to_string());
        self
    }

    /// Sets the bearer token from an optional value.
    pub fn token_opt(self, token: Option<String>) -> Self {
        match token {
            Some(token) => self.token(token),
            None => Self {
                policy: RequestPolicy {
                    token: None,
                    ..self.policy
                },
            },
        }
    }

    /// Enables or disables dry-run simulation.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.policy.dry_run = dry_run;
        self
    }

    /// Sets the retry ceiling for 429 responses.
    pub fn max_429_retries(mut self, retries: usize) -> Self {
        self.policy.max_429_retries = retries;
        self
    }

    /// Sets the retry ceiling for 5xx responses and transport failures.
    pub fn max_5xx_retries(mut self, retries: usize) -> Self {
        self.policy.max_5xx_retries = retries;
        self
    }

    /// Sets the base retry delay.
    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.policy.retry_delay = delay;
        self
    }

    /// Sets the cap on a single retry delay.
    pub fn max_retry_delay(mut self, delay: Duration) -> Self {
        self.policy.max_retry_delay = delay;
        self
    }

    /// Sets the idempotency key. Enables retries for write methods.
    pub fn idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.policy.idempotency_key = non_blank(key);
        self
    }

    /// Sets the overall HTTP timeout. Zero keeps [`DEFAULT_TIMEOUT`].
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.policy.timeout = if timeout.is_zero() {
            DEFAULT_TIMEOUT
        } else {
            timeout
        };
        self
    }

    /// Builds the policy.
    pub fn build(self) -> RequestPolicy {
        self.policy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let policy = RequestPolicy::default();
        assert_eq!(policy.base_url(), DEFAULT_BASE_URL);
        assert_eq!(policy.timeout(), Duration::from_secs(60));
        assert_eq!(policy.retry_delay(), Duration::from_secs(1));
        assert_eq!(policy.max_retry_delay(), Duration::from_secs(30));
        assert!(policy.token().is_none());
        assert!(!policy.dry_run());
        assert_eq!(policy.max_attempts(), 1);
    }

    #[test]
    fn test_blank_values_fall_back() {
        let policy = RequestPolicy::builder()
            .base_url("   ")
            .token("  ")
            .idempotency_key(" ")
            .timeout(Duration::ZERO)
            .build();
        assert_eq!(policy.base_url(), DEFAULT_BASE_URL);
        assert!(policy.token().is_none());
        assert!(policy.idempotency_key().is_none());
        assert_eq!(policy.timeout(), DEFAULT_TIMEOUT);
    }

    #[test]
    fn test_token_opt_clears() {
        let policy = RequestPolicy::builder()
            .token("abc")
            .token_opt(None)
            .build();
        assert!(policy.token().is_none());

        let policy = RequestPolicy::builder()
            .token_opt(Some(" abc ".to_string()))
            .build();
        assert_eq!(policy.token(), Some("abc"));
    }

    #[test]
    fn test_max_attempts_counts_both_classes() {
        let policy = RequestPolicy::builder()
            .max_429_retries(2)
            .max_5xx_retries(3)
            .build();
        assert_eq!(policy.max_attempts(), 6);
    }
}
