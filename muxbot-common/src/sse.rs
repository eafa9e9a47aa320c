//! Server-Sent Events (SSE) utilities
//!
//! Forwards [`MonitorEvent`]s from an [`EventBus`] to an SSE client with a
//! periodic heartbeat so idle connections stay open.

use crate::events::EventBus;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::Stream;
use std::convert::Infallible;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Create an SSE stream of monitor events
///
/// # Arguments
/// * `service_name` - Name of the service for logging (e.g., "muxbot-monitor")
/// * `bus` - Event bus to subscribe to
pub fn create_event_sse_stream(
    service_name: &'static str,
    bus: &EventBus,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    info!("New SSE client connected to {} events", service_name);

    let mut rx = bus.subscribe();

    let stream = async_stream::stream! {
        yield Ok(Event::default()
            .event("ConnectionStatus")
            .data("connected"));

        loop {
            tokio::select! {
                _ = tokio::time::sleep(HEARTBEAT_INTERVAL) => {
                    debug!("SSE: Sending heartbeat");
                    yield Ok(Event::default().comment("heartbeat"));
                }

                received = rx.recv() => {
                    match received {
                        Ok(event) => match serde_json::to_string(&event) {
                            Ok(json) => {
                                yield Ok(Event::default().event(event.event_type()).data(json));
                            }
                            Err(e) => warn!("SSE: Failed to serialize event: {}", e),
                        },
                        Err(RecvError::Lagged(skipped)) => {
                            warn!("SSE: client lagged, {} events dropped", skipped);
                        }
                        Err(RecvError::Closed) => {
                            info!("SSE: {} event bus closed", service_name);
                            break;
                        }
                    }
                }
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::new().interval(HEARTBEAT_INTERVAL).text("heartbeat"))
}
