//! Server-Sent Events for monitor activity

use crate::AppState;
use axum::{
    extract::State,
    response::sse::{Event, Sse},
};
use futures::stream::Stream;
use std::convert::Infallible;

/// GET /events
///
/// Streams every [`MonitorEvent`](muxbot_common::MonitorEvent) plus a
/// heartbeat comment every 15 seconds.
pub async fn event_stream(State(state): State<AppState>) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    muxbot_common::sse::create_event_sse_stream("muxbot-monitor", &state.event_bus)
}
