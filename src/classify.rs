//! Extraction of a compact human message from an API error body.

use serde_json::Value;

/// Longest raw-text snippet kept when the body is not JSON.
const MAX_SNIPPET_CHARS: usize = 300;

/// Derives the message shown to users for a failed response.
///
/// The fallback order is fixed:
/// 1. non-JSON body: trimmed text, truncated to 300 characters with `...`;
/// 2. JSON that is not an object: `http <status>`;
/// 3. a non-empty top-level `message`, then `detail` string;
/// 4. `error` as a string, or a non-empty `message`/`detail` nested in an
///    `error` object;
/// 5. `http <status>`.
///
/// # Examples
///
/// ```
/// use instantly::classify::api_error_message;
///
/// assert_eq!(api_error_message(400, br#"{"error":{"detail":"x"}}"#), "x");
/// assert_eq!(api_error_message(400, br#"{"error":{"other":"y"}}"#), "http 400");
/// ```
pub fn api_error_message(status: u16, body: &[u8]) -> String {
    let data: Value = match serde_json::from_slice(body) {
        Ok(data) => data,
        Err(_) => return snippet(body),
    };

    let Value::Object(map) = data else {
        return format!("http {status}");
    };

    if let Some(msg) = non_empty_str(map.get("message")) {
        return msg.to_string();
    }
    if let Some(msg) = non_empty_str(map.get("detail")) {
        return msg.to_string();
    }

    match map.get("error") {
        Some(Value::String(msg)) => return msg.clone(),
        Some(Value::Object(inner)) => {
            if let Some(msg) = non_empty_str(inner.get("message")) {
                return msg.to_string();
            }
            if let Some(msg) = non_empty_str(inner.get("detail")) {
                return msg.to_string();
            }
        }
        _ => {}
    }

    format!("http {status}")
}

fn non_empty_str(value: Option<&Value>) -> Option<&str> {
    match value {
        Some(Value::String(s)) if !s.is_empty() => Some(s),
        _ => None,
    }
}

fn snippet(body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    let text = text.trim();
    match text.char_indices().nth(MAX_SNIPPET_CHARS) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_shapes() {
        let cases: &[(&str, &[u8], &str)] = &[
            ("message", br#"{"message":"nope"}"#, "nope"),
            ("detail", br#"{"detail":"nope2"}"#, "nope2"),
            ("error_string", br#"{"error":"bad"}"#, "bad"),
            ("error_obj_message", br#"{"error":{"message":"bad2"}}"#, "bad2"),
            ("error_obj_detail", br#"{"error":{"detail":"x"}}"#, "x"),
        ];
        for (name, body, want) in cases {
            assert_eq!(api_error_message(400, body), *want, "case {name}");
        }
    }

    #[test]
    fn test_message_preferred_over_error_label() {
        let body = br#"{"error":"Bad Request","message":"name is required"}"#;
        assert_eq!(api_error_message(400, body), "name is required");
    }

    #[test]
    fn test_empty_message_falls_through_to_detail() {
        let body = br#"{"message":"","detail":"d"}"#;
        assert_eq!(api_error_message(400, body), "d");
    }

    #[test]
    fn test_fallbacks() {
        assert_eq!(api_error_message(400, b"[]"), "http 400");
        assert_eq!(api_error_message(400, br#"{"error":{"foo":"bar"}}"#), "http 400");
        assert_eq!(api_error_message(502, br#"{"error":42}"#), "http 502");
        assert_eq!(api_error_message(503, b"  upstream down \n"), "upstream down");
    }

    #[test]
    fn test_long_text_truncated_with_ellipsis() {
        let long = "x".repeat(400);
        let msg = api_error_message(500, long.as_bytes());
        assert!(msg.ends_with("..."));
        assert_eq!(msg.len(), MAX_SNIPPET_CHARS + 3);

        let exact = "y".repeat(MAX_SNIPPET_CHARS);
        assert_eq!(api_error_message(500, exact.as_bytes()), exact);
    }

    #[test]
    fn test_truncation_respects_char_boundaries() {
        let long = "é".repeat(400);
        let msg = api_error_message(500, long.as_bytes());
        assert_eq!(msg.chars().count(), MAX_SNIPPET_CHARS + 3);
    }
}
