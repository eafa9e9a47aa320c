//! Monitor event types and EventBus
//!
//! Events are broadcast via [`EventBus`] and serialized for SSE transmission.
//! Emission is always lossy: a monitor with no listeners keeps running.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Events emitted by a monitoring session
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum MonitorEvent {
    /// Polling started for a set of event ids
    MonitoringStarted {
        session_key: String,
        event_ids: Vec<String>,
        timestamp: DateTime<Utc>,
    },

    /// Enrichment records arrived (or the fetch gave up)
    RecordsResolved {
        session_key: String,
        display_name: String,
        record_count: usize,
        timestamp: DateTime<Utc>,
    },

    /// Local peak advanced and was written as the new remote peak
    PeakAccepted {
        session_key: String,
        peak: u64,
        previous: u64,
        timestamp: DateTime<Utc>,
    },

    /// Remote store held a higher peak; local state adopted it
    RemotePeakAdopted {
        session_key: String,
        peak: u64,
        timestamp: DateTime<Utc>,
    },

    /// The once-only enrichment bundle was written
    EnrichmentSent {
        session_key: String,
        peak: u64,
        timestamp: DateTime<Utc>,
    },

    /// Bundle write failed or enrichment data was unavailable
    EnrichmentFailed {
        session_key: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// A fill-if-empty follow-up write finished
    BackfillCompleted {
        session_key: String,
        ok: bool,
        timestamp: DateTime<Utc>,
    },
}

impl MonitorEvent {
    /// Event name used as the SSE `event:` field
    pub fn event_type(&self) -> &'static str {
        match self {
            MonitorEvent::MonitoringStarted { .. } => "MonitoringStarted",
            MonitorEvent::RecordsResolved { .. } => "RecordsResolved",
            MonitorEvent::PeakAccepted { .. } => "PeakAccepted",
            MonitorEvent::RemotePeakAdopted { .. } => "RemotePeakAdopted",
            MonitorEvent::EnrichmentSent { .. } => "EnrichmentSent",
            MonitorEvent::EnrichmentFailed { .. } => "EnrichmentFailed",
            MonitorEvent::BackfillCompleted { .. } => "BackfillCompleted",
        }
    }

    /// Session the event belongs to
    pub fn session_key(&self) -> &str {
        match self {
            MonitorEvent::MonitoringStarted { session_key, .. }
            | MonitorEvent::RecordsResolved { session_key, .. }
            | MonitorEvent::PeakAccepted { session_key, .. }
            | MonitorEvent::RemotePeakAdopted { session_key, .. }
            | MonitorEvent::EnrichmentSent { session_key, .. }
            | MonitorEvent::EnrichmentFailed { session_key, .. }
            | MonitorEvent::BackfillCompleted { session_key, .. } => session_key,
        }
    }
}

/// Broadcast bus for [`MonitorEvent`]s
///
/// Uses `tokio::sync::broadcast` internally: slow subscribers lag and lose
/// the oldest events rather than blocking the monitor.
#[derive(Clone, Debug)]
pub struct EventBus {
    tx: broadcast::Sender<MonitorEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// ```
    /// use muxbot_common::events::EventBus;
    ///
    /// let event_bus = EventBus::new(100);
    /// assert_eq!(event_bus.capacity(), 100);
    /// ```
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<MonitorEvent> {
        self.tx.subscribe()
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: MonitorEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
