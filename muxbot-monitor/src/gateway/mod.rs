//! Remote table gateway
//!
//! The spreadsheet is reachable only through a webhook relay. Every call
//! resolves to a [`GatewayResponse`]; transport failures, non-2xx statuses
//! and non-JSON bodies all degrade to `ok: false` instead of erroring.

pub mod memory;
pub mod relay;
pub mod sheet;

pub use memory::MemorySheet;
pub use relay::RelayGateway;
pub use sheet::{PeakRow, SheetAction, SheetClient};

use async_trait::async_trait;
use serde_json::{json, Map, Value};

/// Max characters of a raw body kept in a degraded response
pub const RAW_BODY_LIMIT: usize = 300;

/// Error tag for a body that was not valid JSON
pub const INVALID_JSON: &str = "invalid_json_response";

/// Relayed GET/POST to the spreadsheet webhook
#[async_trait]
pub trait TableGateway: Send + Sync {
    async fn post(&self, url: &str, payload: &Value) -> GatewayResponse;
    async fn get(&self, url: &str) -> GatewayResponse;
}

/// Parsed webhook response
///
/// `ok` mirrors the body's own `ok` flag; the full body is kept so callers
/// can read action-specific fields such as `peak` or `row`.
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayResponse {
    pub ok: bool,
    pub body: Value,
}

impl GatewayResponse {
    /// Wrap a JSON body returned by the webhook
    pub fn from_json(body: Value) -> Self {
        let ok = body.get("ok").and_then(Value::as_bool).unwrap_or(false);
        Self { ok, body }
    }

    /// Successful response with no payload
    pub fn success() -> Self {
        Self::from_json(json!({ "ok": true }))
    }

    /// Degraded response for a transport or protocol failure
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            body: json!({ "ok": false, "error": error.into() }),
        }
    }

    /// Degraded response for a non-2xx status
    pub fn http_status(status: u16, raw_body: &str) -> Self {
        Self {
            ok: false,
            body: json!({
                "ok": false,
                "status": status,
                "error": format!("HTTP {}", status),
                "body": truncate(raw_body, RAW_BODY_LIMIT),
            }),
        }
    }

    /// Degraded response for a body that did not parse as JSON
    pub fn invalid_json(raw_body: &str) -> Self {
        Self {
            ok: false,
            body: json!({
                "ok": false,
                "error": INVALID_JSON,
                "body": truncate(raw_body, RAW_BODY_LIMIT),
            }),
        }
    }

    /// Parse a raw body, falling back to the raw-text wrapper
    pub fn from_body_text(text: &str) -> Self {
        match serde_json::from_str::<Value>(text) {
            Ok(body) if body.is_object() => Self::from_json(body),
            _ => Self::invalid_json(text),
        }
    }

    /// Error string reported by the webhook or the relay
    pub fn error(&self) -> Option<&str> {
        self.body.get("error").and_then(Value::as_str)
    }

    /// Non-negative integer field, accepting numbers or numeric strings
    pub fn u64_field(&self, key: &str) -> Option<u64> {
        match self.body.get(key)? {
            Value::Number(n) => n
                .as_u64()
                .or_else(|| n.as_f64().filter(|f| f.is_finite() && *f >= 0.0).map(|f| f as u64)),
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|f| f.is_finite() && *f >= 0.0)
                .map(|f| f as u64),
            _ => None,
        }
    }

    /// Object field, e.g. the `row` of a full-row fetch
    pub fn object_field(&self, key: &str) -> Option<&Map<String, Value>> {
        self.body.get(key).and_then(Value::as_object)
    }
}

/// Truncate to at most `limit` characters on a char boundary
fn truncate(text: &str, limit: usize) -> String {
    text.chars().take(limit).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ok_mirrors_body_flag() {
        assert!(GatewayResponse::from_json(json!({"ok": true, "peak": 5})).ok);
        assert!(!GatewayResponse::from_json(json!({"ok": false})).ok);
        assert!(!GatewayResponse::from_json(json!({"peak": 5})).ok);
    }

    #[test]
    fn test_non_json_body_is_wrapped() {
        let html = format!("<html>{}</html>", "x".repeat(1000));
        let resp = GatewayResponse::from_body_text(&html);

        assert!(!resp.ok);
        assert_eq!(resp.error(), Some(INVALID_JSON));
        assert_eq!(resp.body["body"].as_str().unwrap().chars().count(), RAW_BODY_LIMIT);
    }

    #[test]
    fn test_json_scalar_body_is_treated_as_malformed() {
        let resp = GatewayResponse::from_body_text("42");
        assert!(!resp.ok);
        assert_eq!(resp.error(), Some(INVALID_JSON));
    }

    #[test]
    fn test_http_status_failure() {
        let resp = GatewayResponse::http_status(502, "Bad gateway");
        assert!(!resp.ok);
        assert_eq!(resp.body["status"], 502);
        assert_eq!(resp.error(), Some("HTTP 502"));
    }

    #[test]
    fn test_u64_field_accepts_numeric_forms() {
        let resp = GatewayResponse::from_json(json!({
            "ok": true,
            "a": 120,
            "b": "340",
            "c": 12.7,
            "d": null,
            "e": "n/a",
            "f": -3,
        }));

        assert_eq!(resp.u64_field("a"), Some(120));
        assert_eq!(resp.u64_field("b"), Some(340));
        assert_eq!(resp.u64_field("c"), Some(12));
        assert_eq!(resp.u64_field("d"), None);
        assert_eq!(resp.u64_field("e"), None);
        assert_eq!(resp.u64_field("f"), None);
        assert_eq!(resp.u64_field("missing"), None);
    }
}
