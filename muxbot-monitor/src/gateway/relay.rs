//! HTTP relay to the spreadsheet webhook
//!
//! Adds the Authorization header and normalizes every outcome into a
//! [`GatewayResponse`].

use super::{GatewayResponse, TableGateway};
use async_trait::async_trait;
use muxbot_common::{Error, Result};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

const USER_AGENT: &str = concat!("muxbot-monitor/", env!("CARGO_PKG_VERSION"));
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// reqwest-backed relay
#[derive(Clone)]
pub struct RelayGateway {
    http_client: reqwest::Client,
    token: Option<String>,
}

impl RelayGateway {
    pub fn new(token: Option<String>) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(Error::Http)?;

        Ok(Self {
            http_client,
            token: token.filter(|t| !t.trim().is_empty()),
        })
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn finish(&self, sent: reqwest::Result<reqwest::Response>, method: &str) -> GatewayResponse {
        let response = match sent {
            Ok(response) => response,
            Err(e) => {
                warn!(method, error = %e, "Relay request failed");
                return GatewayResponse::failure(e.to_string());
            }
        };

        let status = response.status();
        let text = match response.text().await {
            Ok(text) => text,
            Err(e) => {
                warn!(method, error = %e, "Relay response body unreadable");
                return GatewayResponse::failure(e.to_string());
            }
        };

        if !status.is_success() {
            warn!(method, status = status.as_u16(), "Relay returned non-success status");
            return GatewayResponse::http_status(status.as_u16(), &text);
        }

        let parsed = GatewayResponse::from_body_text(&text);
        debug!(method, ok = parsed.ok, "Relay response");
        parsed
    }
}

#[async_trait]
impl TableGateway for RelayGateway {
    async fn post(&self, url: &str, payload: &Value) -> GatewayResponse {
        debug!(url = %url, payload = %payload, "Posting to sheet");
        let sent = self
            .authorize(self.http_client.post(url))
            .json(payload)
            .send()
            .await;
        self.finish(sent, "POST").await
    }

    async fn get(&self, url: &str) -> GatewayResponse {
        debug!(url = %url, "Reading from sheet");
        let sent = self.authorize(self.http_client.get(url)).send().await;
        self.finish(sent, "GET").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        assert!(RelayGateway::new(None).is_ok());
    }

    #[test]
    fn test_blank_token_is_dropped() {
        let relay = RelayGateway::new(Some("  ".to_string())).unwrap();
        assert!(relay.token.is_none());
    }

    #[tokio::test]
    async fn test_unreachable_host_degrades_to_failure() {
        let relay = RelayGateway::new(None).unwrap();
        // Port 9 (discard) on localhost is not expected to speak HTTP
        let resp = relay.get("http://127.0.0.1:9/exec?action=get_peak").await;
        assert!(!resp.ok);
        assert!(resp.error().is_some());
    }

    #[tokio::test]
    async fn test_invalid_url_degrades_to_failure() {
        let relay = RelayGateway::new(None).unwrap();
        let resp = relay.post("not a url", &serde_json::json!({})).await;
        assert!(!resp.ok);
    }
}
