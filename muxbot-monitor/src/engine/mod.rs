//! Peak reconciliation engine
//!
//! Decides, for each locally observed peak, whether the remote spreadsheet or
//! the page holds the truth, and which write (if any) follows:
//!
//! - remote higher: adopt it, no write
//! - local higher: peak-only upsert, then the once-only enrichment path
//! - equal: nothing
//!
//! The decided peak never drops below the session's observed peak, so a
//! write lost to a network failure is retried by the next reconcile.
//!
//! Network work that must not block the polling task is returned as a job
//! ([`BundleJob`], [`FillJob`]) for the caller to spawn; its outcome is
//! applied back onto the session by the owning task.

pub mod enrichment;

pub use enrichment::{apply_records, BundleJob, EnrichmentOutcome, FillJob, FillKind, FillOutcome};

use crate::gateway::SheetClient;
use crate::records::{EnrichmentData, RecordError, RecordSource};
use crate::registry::{once_retention, OnceRegistry, PeakRowLedger};
use crate::session::{BackfillState, EnrichmentState, MonitoredSession};
use crate::store::KeyValueStore;
use muxbot_common::time;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Where a decided peak came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PeakSource {
    Remote,
    Local,
    Equal,
    /// Empty session key; nothing was read or written
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PeakDecision {
    pub decided_peak: u64,
    pub source: PeakSource,
}

impl PeakDecision {
    fn new(decided_peak: u64, source: PeakSource) -> Self {
        Self {
            decided_peak,
            source,
        }
    }
}

/// Write chosen by [`PeakEngine::on_new_peak_detected`]
pub enum PeakWrite {
    /// Peak-only upsert already issued
    PeakOnly { ok: bool },
    /// First enrichment write; the caller spawns [`BundleJob::run`]
    Bundle(BundleJob),
    Rejected,
}

#[derive(Clone)]
pub struct PeakEngine {
    sheet: SheetClient,
    records: Arc<dyn RecordSource>,
    registry: OnceRegistry,
    ledger: PeakRowLedger,
}

impl PeakEngine {
    pub fn new(
        sheet: SheetClient,
        records: Arc<dyn RecordSource>,
        store: Arc<dyn KeyValueStore>,
    ) -> Self {
        Self {
            sheet,
            records,
            registry: OnceRegistry::new(store.clone()),
            ledger: PeakRowLedger::new(store),
        }
    }

    pub fn registry(&self) -> &OnceRegistry {
        &self.registry
    }

    /// Reconcile a candidate peak against the remote store
    ///
    /// A failed or empty remote read counts as 0. The candidate is floored
    /// at the session's observed peak; when the floor beats the remote value
    /// it is written as a peak-only upsert. The session's observed and remote
    /// peaks are updated in place.
    pub async fn reconcile(&self, session: &mut MonitoredSession, candidate: u64) -> PeakDecision {
        if session.session_key.is_empty() {
            warn!("Refusing to reconcile a session without event ids");
            return PeakDecision::new(session.observed_peak, PeakSource::Rejected);
        }

        let key = session.session_key.clone();
        let remote = match self.sheet.fetch_peak(&key).await {
            Some(peak) => {
                session.remote_peak = peak;
                peak
            }
            None => 0,
        };
        let floor = candidate.max(session.observed_peak);

        let decision = if remote > candidate && remote >= floor {
            PeakDecision::new(remote, PeakSource::Remote)
        } else if floor > remote {
            let response = self.sheet.upsert_peak(&key, &session.display_name, floor).await;
            if response.ok {
                session.remote_peak = floor;
            }
            PeakDecision::new(floor, PeakSource::Local)
        } else {
            PeakDecision::new(candidate, PeakSource::Equal)
        };

        session.observed_peak = session.observed_peak.max(decision.decided_peak);
        debug!(
            session_key = %key,
            candidate,
            remote,
            decided = decision.decided_peak,
            source = ?decision.source,
            "Peak reconciled"
        );
        decision
    }

    /// Choose between the once-only bundle write and a peak-only write
    ///
    /// Called after [`reconcile`](Self::reconcile) decided `Local`. While a
    /// bundle is in flight, or once the registry holds a fresh marker for the
    /// session, only the peak is written. A marker older than the retention
    /// window re-arms the session.
    pub async fn on_new_peak_detected(&self, session: &mut MonitoredSession, new_peak: u64) -> PeakWrite {
        if session.session_key.is_empty() {
            return PeakWrite::Rejected;
        }

        if session.enrichment == EnrichmentState::Sending {
            debug!(session_key = %session.session_key, "Bundle in flight; peak-only write");
            return self.peak_only(session, new_peak).await;
        }

        let now = time::now();
        if let EnrichmentState::Sent { at } = session.enrichment {
            if time::is_expired(at, once_retention(), now) {
                info!(session_key = %session.session_key, "Enrichment marker expired; re-arming");
                session.enrichment = EnrichmentState::NotSent;
            }
        }

        let marker = self.registry.load_at(now).await.get(&session.session_key).copied();
        if let Some(marker) = marker {
            if session.enrichment == EnrichmentState::NotSent {
                session.enrichment = EnrichmentState::Sent {
                    at: marker.written_at().unwrap_or(now),
                };
            }
            return self.peak_only(session, new_peak).await;
        }

        if session.enrichment_sent() {
            return self.peak_only(session, new_peak).await;
        }

        session.enrichment = EnrichmentState::Sending;
        info!(session_key = %session.session_key, peak = new_peak, "Starting enrichment write");
        PeakWrite::Bundle(BundleJob::new(self, session, new_peak))
    }

    async fn peak_only(&self, session: &MonitoredSession, peak: u64) -> PeakWrite {
        let response = self
            .sheet
            .upsert_peak(&session.session_key, &session.display_name, peak)
            .await;
        PeakWrite::PeakOnly { ok: response.ok }
    }

    /// Enrichment records for a set of ids; `Ok(None)` when nothing matched
    pub async fn fetch_enrichment(&self, event_ids: &[String]) -> Result<Option<EnrichmentData>, RecordError> {
        let records = self.records.fetch_records(event_ids).await?;
        Ok(EnrichmentData::from_records(&records))
    }

    /// One-time H/I/J/K fill, due once enrichment data is cached
    pub fn take_due_initial_fill(&self, session: &mut MonitoredSession) -> Option<FillJob> {
        if session.initial_fill_done {
            return None;
        }
        let cells = session.enrichment_data.as_ref()?.initial_fill_cells();
        session.initial_fill_done = true;
        if session.session_key.is_empty() {
            return None;
        }
        Some(FillJob::new(self, session, FillKind::Initial, cells))
    }

    /// Fill-if-empty follow-up of a failed bundle write, when due
    pub fn take_due_backfill(&self, session: &mut MonitoredSession) -> Option<FillJob> {
        let BackfillState::Pending(data) = &session.backfill else {
            return None;
        };
        let cells = data.backfill_cells();
        session.backfill = BackfillState::InFlight;
        Some(FillJob::new(self, session, FillKind::Backfill, cells))
    }

    /// Append `[id, name, peak]` when the observed peak beats the last row
    ///
    /// Skipped until the display name is known. Returns whether a row was
    /// written.
    pub async fn append_peak_row(&self, session: &MonitoredSession) -> bool {
        if session.session_key.is_empty() || session.display_name.is_empty() {
            return false;
        }

        let peak = session.observed_peak;
        if peak <= self.ledger.last_peak(&session.session_key).await {
            return false;
        }

        let response = self
            .sheet
            .append_peak_row(session.primary_id(), &session.display_name, peak)
            .await;
        if !response.ok {
            return false;
        }

        if let Err(e) = self.ledger.record(&session.session_key, peak).await {
            warn!(session_key = %session.session_key, error = %e, "Failed to record appended row");
        }
        true
    }
}
