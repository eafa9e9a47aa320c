//! HTTP API handlers for muxbot-monitor

pub mod health;
pub mod sse;
pub mod status;

pub use health::health_routes;
pub use sse::event_stream;
pub use status::{get_remote_row, get_status};
