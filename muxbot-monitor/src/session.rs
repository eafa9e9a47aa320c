//! Monitored session state
//!
//! One [`MonitoredSession`] exists per polling task and is owned by it; the
//! engine and task results mutate it only through `&mut` on that task.

use crate::records::EnrichmentData;
use chrono::{DateTime, Utc};
use reqwest::Url;
use serde::Serialize;

/// Once-only enrichment write state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnrichmentState {
    NotSent,
    /// A bundle job is in flight
    Sending,
    Sent { at: DateTime<Utc> },
}

impl EnrichmentState {
    pub fn label(&self) -> &'static str {
        match self {
            EnrichmentState::NotSent => "not_sent",
            EnrichmentState::Sending => "sending",
            EnrichmentState::Sent { .. } => "sent",
        }
    }
}

/// One-shot fill-if-empty follow-up after a failed bundle write
#[derive(Debug, Clone, PartialEq)]
pub enum BackfillState {
    Idle,
    /// Due on the next tick
    Pending(EnrichmentData),
    /// Waiting for the background record fetch
    AwaitingData,
    InFlight,
    Done,
}

#[derive(Debug, Clone)]
pub struct MonitoredSession {
    pub session_key: String,
    /// Display order; de-duplicated
    pub event_ids: Vec<String>,
    pub observed_peak: u64,
    pub remote_peak: u64,
    pub display_name: String,
    pub enrichment: EnrichmentState,
    pub enrichment_data: Option<EnrichmentData>,
    pub fetch_in_progress: bool,
    pub backfill: BackfillState,
    pub initial_fill_done: bool,
}

impl MonitoredSession {
    pub fn new(event_ids: Vec<String>) -> Self {
        let mut ids: Vec<String> = Vec::with_capacity(event_ids.len());
        for id in event_ids {
            let id = id.trim().to_string();
            if !id.is_empty() && !ids.contains(&id) {
                ids.push(id);
            }
        }

        Self {
            session_key: session_key_for(&ids),
            event_ids: ids,
            observed_peak: 0,
            remote_peak: 0,
            display_name: String::new(),
            enrichment: EnrichmentState::NotSent,
            enrichment_data: None,
            fetch_in_progress: false,
            backfill: BackfillState::Idle,
            initial_fill_done: false,
        }
    }

    pub fn enrichment_sent(&self) -> bool {
        matches!(self.enrichment, EnrichmentState::Sent { .. })
    }

    /// First id in display order; used as the basic row's id column
    pub fn primary_id(&self) -> &str {
        self.event_ids.first().map(String::as_str).unwrap_or("")
    }

    /// `"PEAK: <max> | <name or (n ID(s))>"`
    pub fn title(&self) -> String {
        let peak = self.observed_peak.max(self.remote_peak);
        if self.display_name.is_empty() {
            format!("PEAK: {} | ({} ID(s))", peak, self.event_ids.len())
        } else {
            format!("PEAK: {} | {}", peak, self.display_name)
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_key: self.session_key.clone(),
            event_ids: self.event_ids.clone(),
            display_name: self.display_name.clone(),
            observed_peak: self.observed_peak,
            remote_peak: self.remote_peak,
            enrichment: self.enrichment.label(),
            enrichment_sent_at: match self.enrichment {
                EnrichmentState::Sent { at } => Some(at),
                _ => None,
            },
            records_loaded: self.enrichment_data.is_some(),
            fetch_in_progress: self.fetch_in_progress,
            title: self.title(),
            updated_at: muxbot_common::time::now(),
        }
    }
}

/// Read-only view served by `/status`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub session_key: String,
    pub event_ids: Vec<String>,
    pub display_name: String,
    pub observed_peak: u64,
    pub remote_peak: u64,
    pub enrichment: &'static str,
    pub enrichment_sent_at: Option<DateTime<Utc>>,
    pub records_loaded: bool,
    pub fetch_in_progress: bool,
    pub title: String,
    pub updated_at: DateTime<Utc>,
}

/// Sorted, de-duplicated ids joined with `", "`
pub fn session_key_for(event_ids: &[String]) -> String {
    let mut ids: Vec<&str> = event_ids
        .iter()
        .map(|id| id.trim())
        .filter(|id| !id.is_empty())
        .collect();
    ids.sort_unstable();
    ids.dedup();
    ids.join(", ")
}

/// Event ids from `filters[n]=video_id:<id>` query parameters
///
/// Ids are URL-decoded and de-duplicated in order of appearance. An
/// unparseable URL yields no ids.
pub fn extract_event_ids_from_url(dashboard_url: &str) -> Vec<String> {
    let Ok(url) = Url::parse(dashboard_url) else {
        return Vec::new();
    };

    let mut ids: Vec<String> = Vec::new();
    for (key, value) in url.query_pairs() {
        let is_filter = key
            .strip_prefix("filters[")
            .and_then(|rest| rest.strip_suffix(']'))
            .is_some_and(|index| index.bytes().all(|b| b.is_ascii_digit()));
        if !is_filter {
            continue;
        }
        if let Some(id) = value.strip_prefix("video_id:") {
            let id = id.to_string();
            if !id.is_empty() && !ids.contains(&id) {
                ids.push(id);
            }
        }
    }
    ids
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn test_session_key_is_order_independent() {
        assert_eq!(session_key_for(&ids(&["b", "a", "b"])), "a, b");
        assert_eq!(session_key_for(&ids(&["a", "b"])), "a, b");
        assert_eq!(session_key_for(&ids(&["evt-1"])), "evt-1");
        assert_eq!(session_key_for(&ids(&[" ", ""])), "");
    }

    #[test]
    fn test_new_session_dedups_in_display_order() {
        let session = MonitoredSession::new(ids(&["z", "a", "z"]));
        assert_eq!(session.event_ids, ids(&["z", "a"]));
        assert_eq!(session.session_key, "a, z");
        assert_eq!(session.primary_id(), "z");
        assert_eq!(session.enrichment, EnrichmentState::NotSent);
        assert!(!session.enrichment_sent());
    }

    #[test]
    fn test_title_uses_max_peak_and_fallback_name() {
        let mut session = MonitoredSession::new(ids(&["a", "b"]));
        session.observed_peak = 40;
        session.remote_peak = 55;
        assert_eq!(session.title(), "PEAK: 55 | (2 ID(s))");

        session.display_name = "Final".to_string();
        assert_eq!(session.title(), "PEAK: 55 | Final");
    }

    #[test]
    fn test_extract_ids_from_dashboard_url() {
        let url = "https://dashboard.mux.com/org/env/metrics/viewers?\
                   filters%5B0%5D=video_id%3Aabc123&filters%5B1%5D=video_id%3Adef%2D456\
                   &filters%5B2%5D=video_id%3Aabc123&filters%5B3%5D=country%3AAR&timeframe=24h";
        assert_eq!(extract_event_ids_from_url(url), ids(&["abc123", "def-456"]));
    }

    #[test]
    fn test_extract_ids_from_bad_url() {
        assert!(extract_event_ids_from_url("not a url").is_empty());
        assert!(extract_event_ids_from_url("https://dashboard.mux.com/?x=1").is_empty());
    }

    #[test]
    fn test_snapshot_reflects_state() {
        let mut session = MonitoredSession::new(ids(&["evt-1"]));
        session.observed_peak = 12;
        session.enrichment = EnrichmentState::Sending;

        let snapshot = session.snapshot();
        assert_eq!(snapshot.session_key, "evt-1");
        assert_eq!(snapshot.enrichment, "sending");
        assert_eq!(snapshot.enrichment_sent_at, None);
        assert_eq!(snapshot.title, "PEAK: 12 | (1 ID(s))");
    }
}
