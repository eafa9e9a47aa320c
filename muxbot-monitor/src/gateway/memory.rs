//! In-memory spreadsheet
//!
//! Implements the webhook's action semantics locally: peak upserts, bundle
//! upserts, fill-if-empty and row appends. Used for `--dry-run` and tests.
//! Failures can be injected per action to exercise degraded paths.

use super::{GatewayResponse, TableGateway};
use async_trait::async_trait;
use reqwest::Url;
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, HashSet};
use tokio::sync::Mutex;
use tracing::info;

/// Pseudo-action name used to fail every GET
pub const READS: &str = "__reads__";

/// One call observed by the sheet
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub method: &'static str,
    pub action: String,
    pub payload: Value,
}

#[derive(Default)]
struct SheetState {
    rows: BTreeMap<String, Map<String, Value>>,
    appended: Vec<Value>,
    calls: Vec<RecordedCall>,
    failing: HashSet<String>,
}

#[derive(Default)]
pub struct MemorySheet {
    state: Mutex<SheetState>,
}

impl MemorySheet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a stored peak
    pub async fn set_peak(&self, event_id: &str, peak: u64) {
        let mut state = self.state.lock().await;
        state.rows.entry(event_id.to_string()).or_default().insert("peak".to_string(), json!(peak));
    }

    /// Seed a destination cell
    pub async fn set_cell(&self, event_id: &str, cell: &str, value: Value) {
        let mut state = self.state.lock().await;
        state.rows.entry(event_id.to_string()).or_default().insert(cell.to_string(), value);
    }

    pub async fn row(&self, event_id: &str) -> Option<Map<String, Value>> {
        self.state.lock().await.rows.get(event_id).cloned()
    }

    pub async fn peak(&self, event_id: &str) -> Option<u64> {
        self.row(event_id).await.and_then(|row| row.get("peak").and_then(Value::as_u64))
    }

    pub async fn row_count(&self) -> usize {
        self.state.lock().await.rows.len()
    }

    pub async fn appended_rows(&self) -> Vec<Value> {
        self.state.lock().await.appended.clone()
    }

    pub async fn calls(&self) -> Vec<RecordedCall> {
        self.state.lock().await.calls.clone()
    }

    /// Number of POSTs carrying `action`
    pub async fn count_action(&self, action: &str) -> usize {
        self.state
            .lock()
            .await
            .calls
            .iter()
            .filter(|c| c.method == "POST" && c.action == action)
            .count()
    }

    /// Make every subsequent call for `action` fail (use [`READS`] for GETs)
    pub async fn fail_action(&self, action: &str) {
        self.state.lock().await.failing.insert(action.to_string());
    }

    pub async fn recover_action(&self, action: &str) {
        self.state.lock().await.failing.remove(action);
    }
}

fn is_empty_cell(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.trim().is_empty(),
        Some(_) => false,
    }
}

fn str_field<'a>(payload: &'a Value, key: &str) -> &'a str {
    payload.get(key).and_then(Value::as_str).unwrap_or("")
}

impl SheetState {
    fn apply_post(&mut self, payload: &Value) -> GatewayResponse {
        let action = str_field(payload, "action");
        let event_id = str_field(payload, "event_id").to_string();

        match action {
            "upsert_peak_by_id" => {
                let row = self.rows.entry(event_id).or_default();
                row.insert("name".to_string(), json!(str_field(payload, "name")));
                row.insert("peak".to_string(), payload.get("peak").cloned().unwrap_or(Value::Null));
                GatewayResponse::success()
            }
            "upsert_bundle" => {
                let row = self.rows.entry(event_id).or_default();
                row.insert("name".to_string(), json!(str_field(payload, "name")));
                row.insert(
                    "peak".to_string(),
                    payload.get("monitoring_peak").cloned().unwrap_or(Value::Null),
                );
                if let Some(cells) = payload.get("airtable").and_then(Value::as_object) {
                    for (cell, value) in cells {
                        row.insert(cell.clone(), value.clone());
                    }
                }
                GatewayResponse::success()
            }
            "fill_airtable_fields_if_empty" => {
                let row = self.rows.entry(event_id).or_default();
                let mut filled = Vec::new();
                if let Some(fields) = payload.as_object() {
                    for (cell, value) in fields {
                        if cell == "action" || cell == "event_id" || is_empty_cell(Some(value)) {
                            continue;
                        }
                        if is_empty_cell(row.get(cell)) {
                            row.insert(cell.clone(), value.clone());
                            filled.push(cell.clone());
                        }
                    }
                }
                GatewayResponse::from_json(json!({ "ok": true, "filled": filled }))
            }
            "append_video_peak_row" => {
                self.appended.push(payload.get("row").cloned().unwrap_or(Value::Null));
                GatewayResponse::success()
            }
            other => GatewayResponse::from_json(json!({
                "ok": false,
                "error": format!("unknown action: {}", other),
            })),
        }
    }

    fn apply_get(&self, action: &str, event_id: &str) -> GatewayResponse {
        let row = self.rows.get(event_id);
        match action {
            "get_peak" => GatewayResponse::from_json(json!({
                "ok": true,
                "peak": row.and_then(|r| r.get("peak")).cloned().unwrap_or(Value::Null),
            })),
            "get_row" => GatewayResponse::from_json(json!({
                "ok": true,
                "row": row.cloned().map(Value::Object).unwrap_or(Value::Null),
            })),
            other => GatewayResponse::from_json(json!({
                "ok": false,
                "error": format!("unknown action: {}", other),
            })),
        }
    }
}

#[async_trait]
impl TableGateway for MemorySheet {
    async fn post(&self, _url: &str, payload: &Value) -> GatewayResponse {
        let mut state = self.state.lock().await;
        let action = str_field(payload, "action").to_string();
        state.calls.push(RecordedCall {
            method: "POST",
            action: action.clone(),
            payload: payload.clone(),
        });

        if state.failing.contains(&action) {
            return GatewayResponse::failure(format!("injected failure: {}", action));
        }

        let response = state.apply_post(payload);
        info!(action = %action, ok = response.ok, "Dry-run sheet write");
        response
    }

    async fn get(&self, url: &str) -> GatewayResponse {
        let parsed = match Url::parse(url) {
            Ok(parsed) => parsed,
            Err(e) => return GatewayResponse::failure(format!("invalid url: {}", e)),
        };
        let mut action = String::new();
        let mut event_id = String::new();
        for (key, value) in parsed.query_pairs() {
            match key.as_ref() {
                "action" => action = value.into_owned(),
                "event_id" => event_id = value.into_owned(),
                _ => {}
            }
        }

        let mut state = self.state.lock().await;
        state.calls.push(RecordedCall {
            method: "GET",
            action: action.clone(),
            payload: json!({ "event_id": event_id }),
        });

        if state.failing.contains(READS) || state.failing.contains(&action) {
            return GatewayResponse::failure(format!("injected failure: {}", action));
        }

        state.apply_get(&action, &event_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const URL: &str = "https://sheet.example/exec";

    #[tokio::test]
    async fn test_repeated_peak_upsert_is_idempotent() {
        let sheet = MemorySheet::new();
        let payload = json!({"action": "upsert_peak_by_id", "event_id": "evt-1", "name": "n", "peak": 50});

        assert!(sheet.post(URL, &payload).await.ok);
        let first = sheet.row("evt-1").await;
        assert!(sheet.post(URL, &payload).await.ok);

        assert_eq!(sheet.row("evt-1").await, first);
        assert_eq!(sheet.peak("evt-1").await, Some(50));
        assert_eq!(sheet.row_count().await, 1);
    }

    #[tokio::test]
    async fn test_fill_if_empty_never_clobbers() {
        let sheet = MemorySheet::new();
        sheet.set_cell("evt-1", "H", json!("Y")).await;
        sheet.set_cell("evt-1", "I", json!("")).await;

        let resp = sheet
            .post(
                URL,
                &json!({"action": "fill_airtable_fields_if_empty", "event_id": "evt-1", "H": "X", "I": "AR", "J": "2025"}),
            )
            .await;

        assert!(resp.ok);
        let row = sheet.row("evt-1").await.unwrap();
        assert_eq!(row["H"], "Y");
        assert_eq!(row["I"], "AR");
        assert_eq!(row["J"], "2025");
    }

    #[tokio::test]
    async fn test_get_peak_for_missing_row_is_null() {
        let sheet = MemorySheet::new();
        let resp = sheet.get(&format!("{}?action=get_peak&event_id=evt-9", URL)).await;
        assert!(resp.ok);
        assert_eq!(resp.u64_field("peak"), None);
    }

    #[tokio::test]
    async fn test_injected_failure() {
        let sheet = MemorySheet::new();
        sheet.fail_action("upsert_bundle").await;

        let resp = sheet
            .post(URL, &json!({"action": "upsert_bundle", "event_id": "evt-1", "monitoring_peak": 3}))
            .await;

        assert!(!resp.ok);
        assert_eq!(sheet.row_count().await, 0);
        assert_eq!(sheet.count_action("upsert_bundle").await, 1);
    }
}
