//! muxbot-monitor library
//!
//! Samples a live "concurrent viewers" metric, reconciles it against the
//! peak stored in a remote spreadsheet, and writes a richer enrichment
//! bundle at most once per session. Also serves a small read-only status
//! API for the running monitor.

use axum::Router;
use chrono::{DateTime, Utc};
use muxbot_common::EventBus;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub mod api;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod gateway;
pub mod monitor;
pub mod records;
pub mod registry;
pub mod sampler;
pub mod session;
pub mod store;

pub use engine::{PeakDecision, PeakEngine, PeakSource, PeakWrite};
pub use gateway::SheetClient;
pub use monitor::{Monitor, SharedStatus};
pub use session::MonitoredSession;

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    /// Latest snapshot published by the monitor
    pub status: SharedStatus,
    pub event_bus: EventBus,
    /// Used for on-demand row reads
    pub sheet: SheetClient,
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(status: SharedStatus, event_bus: EventBus, sheet: SheetClient) -> Self {
        Self {
            status,
            event_bus,
            sheet,
            startup_time: muxbot_common::time::now(),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    use axum::routing::get;

    Router::new()
        .route("/status", get(api::get_status))
        .route("/status/row", get(api::get_remote_row))
        .route("/events", get(api::event_stream))
        .merge(api::health_routes())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
