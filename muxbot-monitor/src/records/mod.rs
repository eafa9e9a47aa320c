//! Enrichment record source
//!
//! Records live in an Airtable-style table keyed by event identifier.
//! [`catalog`] maps their fields onto destination spreadsheet cells.

pub mod catalog;

pub use catalog::{CellMap, EnrichmentData};

use async_trait::async_trait;
use reqwest::Url;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Record source errors
#[derive(Debug, Error)]
pub enum RecordError {
    #[error("Record source not configured: {0}")]
    NotConfigured(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("API error {0}: {1}")]
    ApiError(u16, String),

    #[error("Parse error: {0}")]
    ParseError(String),
}

/// One table record
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct Record {
    pub id: String,
    #[serde(default)]
    pub fields: Map<String, Value>,
}

/// Fetches records for a set of event ids
#[async_trait]
pub trait RecordSource: Send + Sync {
    async fn fetch_records(&self, event_ids: &[String]) -> Result<Vec<Record>, RecordError>;
}

#[derive(Debug, Deserialize)]
struct ListResponse {
    #[serde(default)]
    records: Vec<Record>,
    offset: Option<String>,
}

/// Connection settings for [`AirtableClient`]
#[derive(Debug, Clone)]
pub struct AirtableSettings {
    pub api_url: String,
    pub base_id: String,
    pub table_id: String,
    pub token: String,
    /// Field whose text contains the event ids
    pub id_field: String,
}

/// Airtable REST client
pub struct AirtableClient {
    http_client: reqwest::Client,
    settings: AirtableSettings,
}

impl AirtableClient {
    pub fn new(settings: AirtableSettings) -> Result<Self, RecordError> {
        let http_client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| RecordError::NetworkError(e.to_string()))?;

        Ok(Self {
            http_client,
            settings,
        })
    }

    fn table_url(&self) -> String {
        format!(
            "{}/v0/{}/{}",
            self.settings.api_url.trim_end_matches('/'),
            self.settings.base_id,
            self.settings.table_id
        )
    }

    async fn fetch_page(&self, formula: &str, offset: Option<&str>) -> Result<ListResponse, RecordError> {
        let mut params = vec![("filterByFormula", formula)];
        if let Some(offset) = offset {
            params.push(("offset", offset));
        }
        let url = Url::parse_with_params(&self.table_url(), &params)
            .map_err(|e| RecordError::NotConfigured(format!("invalid table url: {}", e)))?;

        debug!(url = %url, "Querying record source");

        let response = self
            .http_client
            .get(url)
            .bearer_auth(&self.settings.token)
            .send()
            .await
            .map_err(|e| RecordError::NetworkError(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(RecordError::ApiError(status.as_u16(), error_text));
        }

        response
            .json()
            .await
            .map_err(|e| RecordError::ParseError(e.to_string()))
    }
}

#[async_trait]
impl RecordSource for AirtableClient {
    async fn fetch_records(&self, event_ids: &[String]) -> Result<Vec<Record>, RecordError> {
        if event_ids.is_empty() {
            return Ok(Vec::new());
        }

        let formula = match_any_formula(&self.settings.id_field, event_ids);
        let mut records = Vec::new();
        let mut offset: Option<String> = None;

        loop {
            let page = self.fetch_page(&formula, offset.as_deref()).await?;
            records.extend(page.records);
            match page.offset {
                Some(next) => offset = Some(next),
                None => break,
            }
        }

        info!(ids = event_ids.len(), records = records.len(), "Fetched enrichment records");
        Ok(records)
    }
}

/// Source used when no record table is configured
pub struct UnconfiguredSource;

#[async_trait]
impl RecordSource for UnconfiguredSource {
    async fn fetch_records(&self, _event_ids: &[String]) -> Result<Vec<Record>, RecordError> {
        Err(RecordError::NotConfigured(
            "records.base_id / records.table_id / records.token".to_string(),
        ))
    }
}

/// `OR(FIND("id1", {field}), FIND("id2", {field}), ...)`
pub fn match_any_formula(id_field: &str, event_ids: &[String]) -> String {
    let clauses: Vec<String> = event_ids
        .iter()
        .map(|id| format!("FIND(\"{}\", {{{}}})", id.replace('"', "\\\""), id_field))
        .collect();
    format!("OR({})", clauses.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_formula_for_several_ids() {
        let ids = vec!["abc".to_string(), "d\"ef".to_string()];
        assert_eq!(
            match_any_formula("Live | Edit ID/Stream ID", &ids),
            r#"OR(FIND("abc", {Live | Edit ID/Stream ID}), FIND("d\"ef", {Live | Edit ID/Stream ID}))"#
        );
    }

    #[test]
    fn test_list_response_parses_records() {
        let body = r#"{"records":[{"id":"rec1","createdTime":"x","fields":{"Title ENG":"Final"}},{"id":"rec2"}],"offset":"itr/2"}"#;
        let parsed: ListResponse = serde_json::from_str(body).unwrap();

        assert_eq!(parsed.records.len(), 2);
        assert_eq!(parsed.records[0].fields["Title ENG"], "Final");
        assert!(parsed.records[1].fields.is_empty());
        assert_eq!(parsed.offset.as_deref(), Some("itr/2"));
    }

    #[test]
    fn test_table_url_trims_trailing_slash() {
        let client = AirtableClient::new(AirtableSettings {
            api_url: "https://api.airtable.com/".to_string(),
            base_id: "appX".to_string(),
            table_id: "tblY".to_string(),
            token: "t".to_string(),
            id_field: "f".to_string(),
        })
        .unwrap();
        assert_eq!(client.table_url(), "https://api.airtable.com/v0/appX/tblY");
    }

    #[tokio::test]
    async fn test_unconfigured_source_errors() {
        let result = UnconfiguredSource.fetch_records(&["a".to_string()]).await;
        assert!(matches!(result, Err(RecordError::NotConfigured(_))));
    }
}
