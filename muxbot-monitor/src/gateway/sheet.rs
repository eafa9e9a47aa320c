//! Spreadsheet webhook actions
//!
//! [`SheetClient`] knows the webhook URL and turns each domain write into the
//! action payload the webhook expects.

use super::{GatewayResponse, TableGateway};
use crate::records::CellMap;
use reqwest::Url;
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::warn;

/// Action payloads accepted by the webhook (POST body)
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum SheetAction<'a> {
    /// Peak-only upsert of columns A/B/C for one row
    UpsertPeakById {
        event_id: &'a str,
        name: &'a str,
        peak: u64,
    },

    /// Peak plus enrichment cells in one write
    UpsertBundle {
        event_id: &'a str,
        name: &'a str,
        monitoring_peak: u64,
        overview: Map<String, Value>,
        airtable: &'a CellMap,
    },

    /// Populate only the destination cells that are currently empty
    #[serde(rename = "fill_airtable_fields_if_empty")]
    FillFieldsIfEmpty {
        event_id: &'a str,
        #[serde(flatten)]
        cells: &'a CellMap,
    },

    /// Append-only basic row [id, name, peak]
    AppendVideoPeakRow { row: PeakRow<'a> },
}

impl SheetAction<'_> {
    pub fn name(&self) -> &'static str {
        match self {
            SheetAction::UpsertPeakById { .. } => "upsert_peak_by_id",
            SheetAction::UpsertBundle { .. } => "upsert_bundle",
            SheetAction::FillFieldsIfEmpty { .. } => "fill_airtable_fields_if_empty",
            SheetAction::AppendVideoPeakRow { .. } => "append_video_peak_row",
        }
    }
}

/// Basic row columns
#[derive(Debug, Clone, Serialize)]
pub struct PeakRow<'a> {
    pub a: &'a str,
    pub b: &'a str,
    pub c: u64,
}

/// Webhook URL plus the gateway used to reach it
#[derive(Clone)]
pub struct SheetClient {
    gateway: Arc<dyn TableGateway>,
    webhook_url: String,
}

impl SheetClient {
    pub fn new(gateway: Arc<dyn TableGateway>, webhook_url: impl Into<String>) -> Self {
        Self {
            gateway,
            webhook_url: webhook_url.into(),
        }
    }

    pub fn webhook_url(&self) -> &str {
        &self.webhook_url
    }

    /// POST an action; failures are logged here and returned, never raised
    pub async fn send(&self, action: &SheetAction<'_>) -> GatewayResponse {
        let payload = match serde_json::to_value(action) {
            Ok(payload) => payload,
            Err(e) => return GatewayResponse::failure(format!("serialize {}: {}", action.name(), e)),
        };

        let response = self.gateway.post(&self.webhook_url, &payload).await;
        if !response.ok {
            warn!(
                action = action.name(),
                error = response.error().unwrap_or("unknown"),
                "Sheet write failed"
            );
        }
        response
    }

    /// Stored peak for a row; None when the read failed or the row has no peak
    pub async fn fetch_peak(&self, event_id: &str) -> Option<u64> {
        let response = self.query("get_peak", event_id).await;
        if !response.ok {
            warn!(
                event_id,
                error = response.error().unwrap_or("unknown"),
                "Sheet peak read failed"
            );
            return None;
        }
        response.u64_field("peak")
    }

    /// Full row object for an id, when present
    pub async fn fetch_row(&self, event_id: &str) -> Option<Map<String, Value>> {
        let response = self.query("get_row", event_id).await;
        if !response.ok {
            return None;
        }
        response.object_field("row").cloned()
    }

    pub async fn upsert_peak(&self, event_id: &str, name: &str, peak: u64) -> GatewayResponse {
        self.send(&SheetAction::UpsertPeakById { event_id, name, peak }).await
    }

    pub async fn upsert_bundle(
        &self,
        event_id: &str,
        name: &str,
        peak: u64,
        cells: &CellMap,
    ) -> GatewayResponse {
        self.send(&SheetAction::UpsertBundle {
            event_id,
            name,
            monitoring_peak: peak,
            overview: Map::new(),
            airtable: cells,
        })
        .await
    }

    pub async fn fill_if_empty(&self, event_id: &str, cells: &CellMap) -> GatewayResponse {
        self.send(&SheetAction::FillFieldsIfEmpty { event_id, cells }).await
    }

    pub async fn append_peak_row(&self, event_id: &str, name: &str, peak: u64) -> GatewayResponse {
        self.send(&SheetAction::AppendVideoPeakRow {
            row: PeakRow {
                a: event_id,
                b: name,
                c: peak,
            },
        })
        .await
    }

    async fn query(&self, action: &str, event_id: &str) -> GatewayResponse {
        match Url::parse_with_params(&self.webhook_url, &[("action", action), ("event_id", event_id)]) {
            Ok(url) => self.gateway.get(url.as_str()).await,
            Err(e) => GatewayResponse::failure(format!("invalid webhook url: {}", e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_peak_only_payload_shape() {
        let payload = serde_json::to_value(SheetAction::UpsertPeakById {
            event_id: "evt-1",
            name: "Final",
            peak: 50,
        })
        .unwrap();

        assert_eq!(
            payload,
            json!({"action": "upsert_peak_by_id", "event_id": "evt-1", "name": "Final", "peak": 50})
        );
    }

    #[test]
    fn test_bundle_payload_shape() {
        let mut cells = CellMap::new();
        cells.insert("H".to_string(), json!("Football"));
        cells.insert("N".to_string(), json!(2.5));

        let payload = serde_json::to_value(SheetAction::UpsertBundle {
            event_id: "evt-1",
            name: "Final",
            monitoring_peak: 70,
            overview: Map::new(),
            airtable: &cells,
        })
        .unwrap();

        assert_eq!(payload["action"], "upsert_bundle");
        assert_eq!(payload["monitoring_peak"], 70);
        assert_eq!(payload["overview"], json!({}));
        assert_eq!(payload["airtable"], json!({"H": "Football", "N": 2.5}));
    }

    #[test]
    fn test_fill_payload_flattens_cells() {
        let mut cells = CellMap::new();
        cells.insert("H".to_string(), json!("X"));

        let payload = serde_json::to_value(SheetAction::FillFieldsIfEmpty {
            event_id: "evt-1",
            cells: &cells,
        })
        .unwrap();

        assert_eq!(
            payload,
            json!({"action": "fill_airtable_fields_if_empty", "event_id": "evt-1", "H": "X"})
        );
    }

    #[test]
    fn test_append_payload_shape() {
        let payload = serde_json::to_value(SheetAction::AppendVideoPeakRow {
            row: PeakRow { a: "evt-1", b: "Final", c: 9 },
        })
        .unwrap();

        assert_eq!(
            payload,
            json!({"action": "append_video_peak_row", "row": {"a": "evt-1", "b": "Final", "c": 9}})
        );
    }

    #[tokio::test]
    async fn test_invalid_webhook_url_degrades() {
        let client = SheetClient::new(Arc::new(crate::gateway::MemorySheet::new()), "::not a url::");
        assert_eq!(client.fetch_peak("evt-1").await, None);
    }
}
