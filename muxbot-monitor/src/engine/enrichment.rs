//! Once-only enrichment write and fill-if-empty jobs
//!
//! Jobs are self-contained so they can run on a spawned task; each returns
//! an outcome value that the session owner applies.

use super::PeakEngine;
use crate::gateway::SheetClient;
use crate::records::{CellMap, EnrichmentData, RecordSource};
use crate::registry::OnceRegistry;
use crate::session::{BackfillState, EnrichmentState, MonitoredSession};
use chrono::{DateTime, Utc};
use muxbot_common::time;
use std::sync::Arc;
use tracing::{info, warn};

/// First enrichment write for a session
pub struct BundleJob {
    sheet: SheetClient,
    records: Arc<dyn RecordSource>,
    registry: OnceRegistry,
    session_key: String,
    event_ids: Vec<String>,
    display_name: String,
    peak: u64,
    cached: Option<EnrichmentData>,
}

/// Result of a [`BundleJob`]
#[derive(Debug, Clone, PartialEq)]
pub enum EnrichmentOutcome {
    Sent {
        at: DateTime<Utc>,
        peak: u64,
        data: EnrichmentData,
    },
    /// Data was available but the bundle write failed
    Failed {
        peak: u64,
        data: EnrichmentData,
        error: String,
    },
    /// No enrichment data; a peak-only write was issued instead
    Unavailable { peak: u64, peak_only_ok: bool },
}

impl BundleJob {
    pub(super) fn new(engine: &PeakEngine, session: &MonitoredSession, peak: u64) -> Self {
        Self {
            sheet: engine.sheet.clone(),
            records: engine.records.clone(),
            registry: engine.registry.clone(),
            session_key: session.session_key.clone(),
            event_ids: session.event_ids.clone(),
            display_name: session.display_name.clone(),
            peak,
            cached: session.enrichment_data.clone(),
        }
    }

    pub fn peak(&self) -> u64 {
        self.peak
    }

    pub async fn run(self) -> EnrichmentOutcome {
        let data = match self.cached.clone() {
            Some(data) => Some(data),
            None => self.emergency_fetch().await,
        };

        let Some(data) = data else {
            warn!(session_key = %self.session_key, "Enrichment data unavailable; writing peak only");
            let response = self
                .sheet
                .upsert_peak(&self.session_key, &self.display_name, self.peak)
                .await;
            return EnrichmentOutcome::Unavailable {
                peak: self.peak,
                peak_only_ok: response.ok,
            };
        };

        let name = if self.display_name.is_empty() {
            data.display_name.as_str()
        } else {
            self.display_name.as_str()
        };
        let cells = data.bundle_cells();
        let response = self
            .sheet
            .upsert_bundle(&self.session_key, name, self.peak, &cells)
            .await;

        if !response.ok {
            return EnrichmentOutcome::Failed {
                peak: self.peak,
                error: response.error().unwrap_or("unknown").to_string(),
                data,
            };
        }

        let at = time::now();
        if let Err(e) = self.registry.mark_sent(&self.session_key, at).await {
            warn!(session_key = %self.session_key, error = %e, "Failed to persist enrichment marker");
        }
        info!(session_key = %self.session_key, peak = self.peak, "Enrichment bundle written");
        EnrichmentOutcome::Sent {
            at,
            peak: self.peak,
            data,
        }
    }

    /// One best-effort record fetch when nothing is cached yet
    async fn emergency_fetch(&self) -> Option<EnrichmentData> {
        match self.records.fetch_records(&self.event_ids).await {
            Ok(records) => EnrichmentData::from_records(&records),
            Err(e) => {
                warn!(session_key = %self.session_key, error = %e, "Emergency record fetch failed");
                None
            }
        }
    }
}

impl EnrichmentOutcome {
    pub fn peak(&self) -> u64 {
        match self {
            EnrichmentOutcome::Sent { peak, .. }
            | EnrichmentOutcome::Failed { peak, .. }
            | EnrichmentOutcome::Unavailable { peak, .. } => *peak,
        }
    }

    /// Apply the outcome to the session that spawned the job
    ///
    /// Sent → `SENT`, with the remote peak set to the one the bundle wrote.
    /// Failure or missing data → `NOT_SENT` so a later advance
    /// may retry, plus a one-shot fill-if-empty follow-up: due now when the
    /// data was obtained, or when the background record fetch resolves.
    pub fn apply_to(self, session: &mut MonitoredSession) {
        match self {
            EnrichmentOutcome::Sent { at, peak, data } => {
                session.enrichment = EnrichmentState::Sent { at };
                // The bundle carried its own peak; a later local advance is rewritten by the next reconcile
                session.remote_peak = peak;
                cache_data(session, data);
            }
            EnrichmentOutcome::Failed { data, error, .. } => {
                warn!(session_key = %session.session_key, error = %error, "Enrichment bundle write failed");
                session.enrichment = EnrichmentState::NotSent;
                if session.backfill == BackfillState::Idle {
                    session.backfill = BackfillState::Pending(data.clone());
                }
                cache_data(session, data);
            }
            EnrichmentOutcome::Unavailable { .. } => {
                session.enrichment = EnrichmentState::NotSent;
                if session.fetch_in_progress && session.backfill == BackfillState::Idle {
                    session.backfill = BackfillState::AwaitingData;
                }
            }
        }
    }
}

fn cache_data(session: &mut MonitoredSession, data: EnrichmentData) {
    if session.display_name.is_empty() {
        session.display_name = data.display_name.clone();
    }
    if session.enrichment_data.is_none() {
        session.enrichment_data = Some(data);
    }
}

/// Apply the background record fetch result to its session
pub fn apply_records(session: &mut MonitoredSession, data: Option<EnrichmentData>) {
    session.fetch_in_progress = false;
    match data {
        Some(data) => {
            if session.backfill == BackfillState::AwaitingData {
                session.backfill = BackfillState::Pending(data.clone());
            }
            session.display_name = data.display_name.clone();
            session.enrichment_data = Some(data);
        }
        None => {
            if session.backfill == BackfillState::AwaitingData {
                session.backfill = BackfillState::Done;
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillKind {
    /// One-time H/I/J/K fill
    Initial,
    /// Follow-up of a failed bundle write
    Backfill,
}

/// A `fill_airtable_fields_if_empty` write
pub struct FillJob {
    sheet: SheetClient,
    session_key: String,
    kind: FillKind,
    cells: CellMap,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FillOutcome {
    pub kind: FillKind,
    pub ok: bool,
}

impl FillJob {
    pub(super) fn new(engine: &PeakEngine, session: &MonitoredSession, kind: FillKind, cells: CellMap) -> Self {
        Self {
            sheet: engine.sheet.clone(),
            session_key: session.session_key.clone(),
            kind,
            cells,
        }
    }

    pub fn kind(&self) -> FillKind {
        self.kind
    }

    pub fn cells(&self) -> &CellMap {
        &self.cells
    }

    pub async fn run(self) -> FillOutcome {
        let response = self.sheet.fill_if_empty(&self.session_key, &self.cells).await;
        if response.ok {
            info!(session_key = %self.session_key, kind = ?self.kind, "Filled empty cells");
        }
        FillOutcome {
            kind: self.kind,
            ok: response.ok,
        }
    }
}

impl FillOutcome {
    /// Backfill runs once regardless of outcome
    pub fn apply_to(self, session: &mut MonitoredSession) {
        if self.kind == FillKind::Backfill {
            session.backfill = BackfillState::Done;
        }
    }
}
