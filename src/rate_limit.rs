//! Rate limit metadata and `Retry-After` handling.
//!
//! The server reports its rate-limit window through three optional headers.
//! Each is parsed on its own; a malformed value drops only that field.

use chrono::{DateTime, Utc};
use http::HeaderMap;
use serde::Serialize;
use std::time::Duration;

/// Rate limit state reported by the server.
///
/// Every field is optional because servers send any subset of the headers.
/// An entirely empty set of headers is represented as `None` at the call
/// site, never as a zero-valued struct.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RateLimitInfo {
    /// Requests remaining in the current window (`X-RateLimit-Remaining`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining: Option<i64>,

    /// Size of the current window (`X-RateLimit-Limit`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<i64>,

    /// When the window resets (`X-RateLimit-Reset`, unix seconds).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reset_at: Option<DateTime<Utc>>,
}

impl RateLimitInfo {
    /// Extracts rate limit information from HTTP response headers.
    ///
    /// Returns `None` when none of the three headers is present and parsable.
    ///
    /// # Examples
    ///
    /// ```
    /// use instantly::rate_limit::RateLimitInfo;
    /// use http::HeaderMap;
    ///
    /// let mut headers = HeaderMap::new();
    /// headers.insert("x-ratelimit-remaining", "9".parse().unwrap());
    ///
    /// let info = RateLimitInfo::from_headers(&headers).unwrap();
    /// assert_eq!(info.remaining, Some(9));
    /// assert_eq!(info.limit, None);
    ///
    /// assert!(RateLimitInfo::from_headers(&HeaderMap::new()).is_none());
    /// ```
    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        let remaining = parse_int_header(headers, "x-ratelimit-remaining");
        let limit = parse_int_header(headers, "x-ratelimit-limit");
        let reset_at = parse_rate_limit_reset(headers);

        if remaining.is_none() && limit.is_none() && reset_at.is_none() {
            return None;
        }

        Some(Self {
            remaining,
            limit,
            reset_at,
        })
    }

    /// Returns `true` if the window is exhausted.
    pub fn is_exhausted(&self) -> bool {
        self.remaining == Some(0)
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    let value = headers.get(name)?.to_str().ok()?.trim();
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

fn parse_int_header(headers: &HeaderMap, name: &str) -> Option<i64> {
    header_str(headers, name)?.parse().ok()
}

/// Parses `X-RateLimit-Reset` as a unix timestamp in seconds.
fn parse_rate_limit_reset(headers: &HeaderMap) -> Option<DateTime<Utc>> {
    let seconds: i64 = header_str(headers, "x-ratelimit-reset")?.parse().ok()?;
    DateTime::from_timestamp(seconds, 0)
}

/// Resolves the delay before retrying a 429 response.
///
/// Uses `Retry-After` when it holds a positive number of seconds, otherwise
/// the supplied fallback.
pub fn retry_after_delay(headers: &HeaderMap, fallback: Duration) -> Duration {
    match header_str(headers, "retry-after").and_then(|v| v.parse::<u64>().ok()) {
        Some(seconds) if seconds > 0 => Duration::from_secs(seconds),
        _ => fallback,
    }
}

/// Caps a delay at `max`; a zero `max` means "no cap".
pub fn cap_delay(delay: Duration, max: Duration) -> Duration {
    if !max.is_zero() && delay > max {
        max
    } else {
        delay
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    #[test]
    fn test_absent_headers_yield_none() {
        assert!(RateLimitInfo::from_headers(&HeaderMap::new()).is_none());
    }

    #[test]
    fn test_parse_all_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("x-ratelimit-remaining", HeaderValue::from_static("9"));
        headers.insert("x-ratelimit-limit", HeaderValue::from_static("10"));
        headers.insert("x-ratelimit-reset", HeaderValue::from_static("1700000000"));

        let info = RateLimitInfo::from_headers(&headers).unwrap();
        assert_eq!(info.remaining, Some(9));
        assert_eq!(info.limit, Some(10));
        assert_eq!(info.reset_at.unwrap().timestamp(), 1_700_000_000);
        assert!(!info.is_exhausted());
    }

    #[test]
    fn test_invalid_values_are_dropped_independently() {
        let mut headers = HeaderMap::new();
        headers.insert("x-ratelimit-remaining", HeaderValue::from_static("nope"));
        headers.insert("x-ratelimit-limit", HeaderValue::from_static("nope"));
        headers.insert("x-ratelimit-reset", HeaderValue::from_static("nope"));
        assert!(RateLimitInfo::from_headers(&headers).is_none());

        let mut headers = HeaderMap::new();
        headers.insert("x-ratelimit-remaining", HeaderValue::from_static("1"));
        headers.insert("x-ratelimit-reset", HeaderValue::from_static("nope"));
        let info = RateLimitInfo::from_headers(&headers).unwrap();
        assert_eq!(info.remaining, Some(1));
        assert!(info.reset_at.is_none());
    }

    #[test]
    fn test_zero_remaining_is_not_absent() {
        let mut headers = HeaderMap::new();
        headers.insert("x-ratelimit-remaining", HeaderValue::from_static("0"));
        let info = RateLimitInfo::from_headers(&headers).unwrap();
        assert_eq!(info.remaining, Some(0));
        assert!(info.is_exhausted());
    }

    #[test]
    fn test_reset_serializes_as_rfc3339() {
        let mut headers = HeaderMap::new();
        headers.insert("x-ratelimit-reset", HeaderValue::from_static("1700000000"));
        let info = RateLimitInfo::from_headers(&headers).unwrap();
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["reset_at"], "2023-11-14T22:13:20Z");
        assert!(json.get("remaining").is_none());
    }

    #[test]
    fn test_retry_after_delay() {
        let fallback = Duration::from_secs(7);
        assert_eq!(retry_after_delay(&HeaderMap::new(), fallback), fallback);

        let mut headers = HeaderMap::new();
        headers.insert("retry-after", HeaderValue::from_static("nope"));
        assert_eq!(
            retry_after_delay(&headers, Duration::from_secs(3)),
            Duration::from_secs(3)
        );

        headers.insert("retry-after", HeaderValue::from_static("0"));
        assert_eq!(
            retry_after_delay(&headers, Duration::from_secs(3)),
            Duration::from_secs(3)
        );

        headers.insert("retry-after", HeaderValue::from_static("2"));
        assert_eq!(
            retry_after_delay(&headers, Duration::from_secs(3)),
            Duration::from_secs(2)
        );
    }

    #[test]
    fn test_cap_delay() {
        let max = Duration::from_secs(1);
        assert_eq!(cap_delay(Duration::from_secs(10), max), max);
        assert_eq!(
            cap_delay(Duration::from_millis(10), max),
            Duration::from_millis(10)
        );
        assert_eq!(
            cap_delay(Duration::from_secs(10), Duration::ZERO),
            Duration::from_secs(10)
        );
    }
}
