//! HTTP control API of the HLS bridge.
//!
//! Thin JSON surface over [`hlsbridge_relay::RelayRegistry`]: start, status and
//! stop of relay sessions, plus a health probe.

pub mod http;

pub use http::{create_router, AppError, AppResult, AppState};
