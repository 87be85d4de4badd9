//! Durable storage for relay session records.
//!
//! The actor owning a stream id is the only writer of its record, so the
//! store needs per-record atomicity and nothing more.

mod memory;
mod redis_store;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::RelaySessionState;

pub use self::memory::MemorySessionStore;
pub use self::redis_store::RedisSessionStore;

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Load the record for a stream id, `None` if the stream was never started
    async fn load(&self, stream_id: &str) -> Result<Option<RelaySessionState>>;

    /// Replace the stored record atomically, keeping the active index in step
    async fn save(&self, state: &RelaySessionState) -> Result<()>;

    /// Stream ids whose stored record is active
    async fn list_active(&self) -> Result<Vec<String>>;
}
