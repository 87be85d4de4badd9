//! Shared building blocks for the HLS relay bridge: configuration, logging,
//! the durable relay session model and its persistence backends.

pub mod bootstrap;
pub mod config;
pub mod error;
pub mod logging;
pub mod models;
pub mod store;

pub use config::Config;
pub use error::{Error, Result};
pub use models::{RelaySessionState, SegmentLedger, SessionStatus};
pub use store::{MemorySessionStore, RedisSessionStore, SessionStore};
