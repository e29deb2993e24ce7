//! Agent-friendly output envelopes.
//!
//! Responses are wrapped as `{kind, items, meta}` for lists, `{kind, item,
//! meta}` for single objects and `{kind, data, meta}` for anything else, so a
//! consumer can tell the shape apart without knowing the endpoint.

use crate::metadata::ResponseMeta;
use serde::Serialize;
use serde_json::{Map, Value};

/// The payload slot of an [`Envelope`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Body {
    /// The `items` member of a list response.
    Items(Value),
    /// A whole object response.
    Item(Value),
    /// A non-object response.
    Data(Value),
}

/// A tagged response.
///
/// ```
/// use instantly::envelope::wrap;
/// use serde_json::json;
///
/// let envelope = wrap("leads.list", json!({"items": [1, 2], "next_starting_after": "x"}), None);
/// assert_eq!(
///     serde_json::to_value(&envelope).unwrap(),
///     json!({"kind": "leads.list", "items": [1, 2]})
/// );
/// ```
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Envelope {
    pub kind: String,
    #[serde(flatten)]
    pub body: Body,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<Map<String, Value>>,
}

/// Wraps `response` by shape. An empty `meta` map is dropped.
pub fn wrap(kind: impl Into<String>, response: Value, meta: Option<Map<String, Value>>) -> Envelope {
    let body = match response {
        Value::Object(mut object) => match object.remove("items") {
            Some(items) => Body::Items(items),
            None => Body::Item(Value::Object(object)),
        },
        other => Body::Data(other),
    };
    Envelope {
        kind: kind.into(),
        body,
        meta: meta.filter(|meta| !meta.is_empty()),
    }
}

/// `"instantly campaigns list"` becomes `"campaigns.list"`.
pub fn kind_from_command_path(path: &str) -> String {
    let path = path.trim();
    let path = path.strip_prefix("instantly ").unwrap_or(path);
    let parts: Vec<&str> = path.split_whitespace().collect();
    if parts.is_empty() {
        "unknown".to_string()
    } else {
        parts.join(".")
    }
}

/// Summarizes the request URL, rate-limit state and pagination cursor.
///
/// Returns `None` when none of them are known.
pub fn meta_from(meta: Option<&ResponseMeta>, response: Option<&Value>) -> Option<Map<String, Value>> {
    let mut out = Map::new();
    if let Some(pagination) = response.and_then(pagination_from) {
        out.insert("pagination".to_string(), pagination);
    }
    if let Some(meta) = meta {
        if let Some(rate_limit) = &meta.rate_limit {
            if let Ok(value) = serde_json::to_value(rate_limit) {
                out.insert("rate_limit".to_string(), value);
            }
        }
        if !meta.url().is_empty() {
            out.insert(
                "request_url".to_string(),
                Value::String(meta.url().to_string()),
            );
        }
    }
    if out.is_empty() {
        None
    } else {
        Some(out)
    }
}

fn cursor(value: Option<&Value>) -> Option<&str> {
    value.and_then(Value::as_str).filter(|next| !next.is_empty())
}

/// The cursor sits at the top level on some endpoints and under
/// `pagination` on others.
fn pagination_from(response: &Value) -> Option<Value> {
    let object = response.as_object()?;
    let next = cursor(object.get("next_starting_after")).or_else(|| {
        cursor(
            object
                .get("pagination")
                .and_then(Value::as_object)
                .and_then(|pagination| pagination.get("next_starting_after")),
        )
    })?;
    Some(serde_json::json!({
        "has_more": true,
        "next_starting_after": next,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate_limit::RateLimitInfo;
    use http::Method;
    use serde_json::json;

    #[test]
    fn test_kind_from_command_path() {
        assert_eq!(kind_from_command_path("instantly campaigns list"), "campaigns.list");
        assert_eq!(kind_from_command_path("  instantly   emails   reply "), "emails.reply");
        assert_eq!(kind_from_command_path("instantly api get"), "api.get");
        assert_eq!(kind_from_command_path(""), "unknown");
    }

    #[test]
    fn test_wrap_shapes() {
        let meta: Map<String, Value> = [("m".to_string(), json!(1))].into_iter().collect();
        let list = wrap("x.y", json!({"items": [{"id": 1}]}), Some(meta));
        assert_eq!(
            serde_json::to_value(&list).unwrap(),
            json!({"kind": "x.y", "items": [{"id": 1}], "meta": {"m": 1}})
        );

        let item = wrap("x.y", json!({"id": 1}), Some(Map::new()));
        assert_eq!(item.body, Body::Item(json!({"id": 1})));
        assert_eq!(
            serde_json::to_value(&item).unwrap(),
            json!({"kind": "x.y", "item": {"id": 1}})
        );

        let data = wrap("x.y", json!([1, 2]), None);
        assert_eq!(data.body, Body::Data(json!([1, 2])));
    }

    #[test]
    fn test_meta_from_pagination() {
        let top = json!({"items": [], "next_starting_after": "abc"});
        let meta = meta_from(None, Some(&top)).unwrap();
        assert_eq!(
            meta["pagination"],
            json!({"has_more": true, "next_starting_after": "abc"})
        );

        let nested = json!({"pagination": {"next_starting_after": "n1"}});
        let meta = meta_from(None, Some(&nested)).unwrap();
        assert_eq!(meta["pagination"]["next_starting_after"], "n1");

        let exhausted = json!({"items": [], "next_starting_after": ""});
        assert!(meta_from(None, Some(&exhausted)).is_none());
        assert!(meta_from(None, Some(&json!([1]))).is_none());
    }

    #[test]
    fn test_meta_from_request_metadata() {
        let rate_limit = RateLimitInfo {
            remaining: Some(3),
            limit: Some(10),
            reset_at: None,
        };
        let meta = ResponseMeta::new(&Method::GET, "https://example.com/leads", Some(rate_limit));
        let summary = meta_from(Some(&meta), None).unwrap();
        assert_eq!(
            Value::Object(summary),
            json!({
                "rate_limit": {"remaining": 3, "limit": 10},
                "request_url": "https://example.com/leads",
            })
        );

        let bare = ResponseMeta::new(&Method::GET, "", None);
        assert!(meta_from(Some(&bare), None).is_none());
    }
}
