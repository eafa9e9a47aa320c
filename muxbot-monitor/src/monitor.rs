//! Polling monitor
//!
//! Owns one [`MonitoredSession`] and drives it from a timer: sample the
//! page, reconcile, and start whatever writes the engine chooses. Slow
//! network work (record fetch, bundle write, fill writes) runs on spawned
//! tasks whose results come back over a channel and are applied at the
//! start of the next tick, so only this task ever mutates the session.

use crate::engine::{
    apply_records, EnrichmentOutcome, FillJob, FillKind, FillOutcome, PeakDecision, PeakEngine, PeakSource,
    PeakWrite,
};
use crate::records::EnrichmentData;
use crate::sampler::PageSampler;
use crate::session::{MonitoredSession, SessionSnapshot};
use muxbot_common::events::{EventBus, MonitorEvent};
use muxbot_common::time;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Latest session snapshot, shared with the status API
pub type SharedStatus = Arc<RwLock<Option<SessionSnapshot>>>;

/// Result of a spawned job, applied by the monitor task
#[derive(Debug)]
enum TaskMessage {
    RecordsResolved(Option<EnrichmentData>),
    Enrichment(EnrichmentOutcome),
    Fill(FillOutcome),
}

/// What one tick did
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickReport {
    pub sample: u64,
    /// None when the sample did not call for a reconcile
    pub decision: Option<PeakDecision>,
    pub bundle_started: bool,
    pub fills_started: usize,
    pub row_appended: bool,
}

pub struct Monitor {
    session: MonitoredSession,
    engine: PeakEngine,
    sampler: Arc<dyn PageSampler>,
    status: SharedStatus,
    events: EventBus,
    interval: Duration,
    tx: mpsc::UnboundedSender<TaskMessage>,
    rx: mpsc::UnboundedReceiver<TaskMessage>,
    in_flight: usize,
}

impl Monitor {
    pub fn new(
        session: MonitoredSession,
        engine: PeakEngine,
        sampler: Arc<dyn PageSampler>,
        status: SharedStatus,
        events: EventBus,
        interval: Duration,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            session,
            engine,
            sampler,
            status,
            events,
            interval,
            tx,
            rx,
            in_flight: 0,
        }
    }

    pub fn session(&self) -> &MonitoredSession {
        &self.session
    }

    /// Announce the session and kick off the background record fetch
    pub async fn start(&mut self) {
        info!(
            session_key = %self.session.session_key,
            ids = self.session.event_ids.len(),
            "Monitoring started"
        );
        self.events.emit_lossy(MonitorEvent::MonitoringStarted {
            session_key: self.session.session_key.clone(),
            event_ids: self.session.event_ids.clone(),
            timestamp: time::now(),
        });
        self.start_record_fetch();
        self.publish_status().await;
    }

    fn start_record_fetch(&mut self) {
        if self.session.event_ids.is_empty() || self.session.fetch_in_progress {
            return;
        }
        self.session.fetch_in_progress = true;

        let engine = self.engine.clone();
        let ids = self.session.event_ids.clone();
        self.spawn(async move {
            match engine.fetch_enrichment(&ids).await {
                Ok(data) => TaskMessage::RecordsResolved(data),
                Err(e) => {
                    warn!(error = %e, "Enrichment record fetch failed");
                    TaskMessage::RecordsResolved(None)
                }
            }
        });
    }

    fn spawn<F>(&mut self, job: F)
    where
        F: Future<Output = TaskMessage> + Send + 'static,
    {
        self.in_flight += 1;
        let tx = self.tx.clone();
        tokio::spawn(async move {
            // Receiver is gone only when the monitor stopped
            let _ = tx.send(job.await);
        });
    }

    fn spawn_fill(&mut self, job: FillJob) {
        self.spawn(async move { TaskMessage::Fill(job.run().await) });
    }

    /// One polling step
    pub async fn tick(&mut self) -> TickReport {
        self.drain_messages();
        let mut report = TickReport {
            fills_started: self.start_due_fills(),
            ..TickReport::default()
        };

        let sample = self.sampler.sample_current_metric().await;
        report.sample = sample;

        // Also retry while our observed peak is ahead of the last known remote value
        let advanced = sample > self.session.observed_peak;
        let unconfirmed = self.session.observed_peak > self.session.remote_peak;
        if advanced || unconfirmed {
            let previous = self.session.observed_peak;
            let decision = self.engine.reconcile(&mut self.session, sample).await;
            report.decision = Some(decision);

            match decision.source {
                PeakSource::Remote => {
                    self.events.emit_lossy(MonitorEvent::RemotePeakAdopted {
                        session_key: self.session.session_key.clone(),
                        peak: decision.decided_peak,
                        timestamp: time::now(),
                    });
                }
                PeakSource::Local if decision.decided_peak > previous => {
                    self.events.emit_lossy(MonitorEvent::PeakAccepted {
                        session_key: self.session.session_key.clone(),
                        peak: decision.decided_peak,
                        previous,
                        timestamp: time::now(),
                    });

                    let write = self
                        .engine
                        .on_new_peak_detected(&mut self.session, decision.decided_peak)
                        .await;
                    if let PeakWrite::Bundle(job) = write {
                        report.bundle_started = true;
                        self.spawn(async move { TaskMessage::Enrichment(job.run().await) });
                    }

                    report.row_appended = self.engine.append_peak_row(&self.session).await;
                }
                PeakSource::Local => {
                    // Unconfirmed rewrite of the same peak; enrichment waits for the next advance
                    debug!(
                        session_key = %self.session.session_key,
                        peak = decision.decided_peak,
                        "Rewrote unconfirmed peak"
                    );
                }
                PeakSource::Equal | PeakSource::Rejected => {}
            }
        }

        self.publish_status().await;
        report
    }

    fn start_due_fills(&mut self) -> usize {
        let mut started = 0;
        if let Some(job) = self.engine.take_due_initial_fill(&mut self.session) {
            self.spawn_fill(job);
            started += 1;
        }
        if let Some(job) = self.engine.take_due_backfill(&mut self.session) {
            self.spawn_fill(job);
            started += 1;
        }
        started
    }

    fn drain_messages(&mut self) {
        while let Ok(message) = self.rx.try_recv() {
            self.apply(message);
        }
    }

    fn apply(&mut self, message: TaskMessage) {
        self.in_flight = self.in_flight.saturating_sub(1);
        let session_key = self.session.session_key.clone();

        match message {
            TaskMessage::RecordsResolved(data) => {
                let record_count = data.as_ref().map_or(0, |d| d.record_count);
                apply_records(&mut self.session, data);
                info!(
                    session_key = %session_key,
                    records = record_count,
                    name = %self.session.display_name,
                    "Enrichment records resolved"
                );
                self.events.emit_lossy(MonitorEvent::RecordsResolved {
                    session_key,
                    display_name: self.session.display_name.clone(),
                    record_count,
                    timestamp: time::now(),
                });
            }
            TaskMessage::Enrichment(outcome) => {
                let event = match &outcome {
                    EnrichmentOutcome::Sent { peak, .. } => MonitorEvent::EnrichmentSent {
                        session_key,
                        peak: *peak,
                        timestamp: time::now(),
                    },
                    EnrichmentOutcome::Failed { error, .. } => MonitorEvent::EnrichmentFailed {
                        session_key,
                        reason: error.clone(),
                        timestamp: time::now(),
                    },
                    EnrichmentOutcome::Unavailable { .. } => MonitorEvent::EnrichmentFailed {
                        session_key,
                        reason: "enrichment data unavailable".to_string(),
                        timestamp: time::now(),
                    },
                };
                outcome.apply_to(&mut self.session);
                self.events.emit_lossy(event);
            }
            TaskMessage::Fill(outcome) => {
                if outcome.kind == FillKind::Backfill {
                    self.events.emit_lossy(MonitorEvent::BackfillCompleted {
                        session_key,
                        ok: outcome.ok,
                        timestamp: time::now(),
                    });
                }
                outcome.apply_to(&mut self.session);
            }
        }
    }

    /// Wait for every spawned job, including fills they make due
    pub async fn settle(&mut self) {
        loop {
            while self.in_flight > 0 {
                match self.rx.recv().await {
                    Some(message) => self.apply(message),
                    None => break,
                }
            }
            if self.start_due_fills() == 0 {
                break;
            }
        }
        self.publish_status().await;
    }

    async fn publish_status(&self) {
        debug!(title = %self.session.title(), "Status updated");
        *self.status.write().await = Some(self.session.snapshot());
    }

    /// Poll until `shutdown` resolves; in-flight jobs are left to finish alone
    pub async fn run<F>(mut self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        self.start().await;

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!(session_key = %self.session.session_key, "Monitor stopping");
                    break;
                }
                _ = ticker.tick() => {
                    self.tick().await;
                }
            }
        }
    }
}
