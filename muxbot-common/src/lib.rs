//! # MuxBot Common Library
//!
//! Shared code for the MuxBot services including:
//! - Error and result types
//! - Configuration loading (TOML, environment, compiled defaults)
//! - Monitor event types and the broadcast EventBus
//! - SSE streaming helper
//! - Timestamp utilities

pub mod config;
pub mod error;
pub mod events;
pub mod sse;
pub mod time;

pub use error::{Error, Result};
pub use events::{EventBus, MonitorEvent};
