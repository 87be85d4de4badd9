use async_trait::async_trait;
use redis::aio::ConnectionManager as RedisConnectionManager;
use redis::AsyncCommands;
use tracing::debug;

use super::SessionStore;
use crate::error::Result;
use crate::models::RelaySessionState;

/// Redis-backed store.
///
/// Each record is a JSON string at `{prefix}relay:session:{stream_id}`; the
/// set `{prefix}relay:active` indexes active stream ids for cold-start resume.
#[derive(Clone)]
pub struct RedisSessionStore {
    redis: RedisConnectionManager,
    key_prefix: String,
}

impl RedisSessionStore {
    #[must_use]
    pub fn new(redis: RedisConnectionManager, key_prefix: impl Into<String>) -> Self {
        Self {
            redis,
            key_prefix: key_prefix.into(),
        }
    }

    /// Open a managed connection to `url`.
    pub async fn connect(url: &str, key_prefix: impl Into<String>) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = client.get_connection_manager().await?;
        Ok(Self::new(conn, key_prefix))
    }

    fn session_key(&self, stream_id: &str) -> String {
        format!("{}relay:session:{stream_id}", self.key_prefix)
    }

    fn active_key(&self) -> String {
        format!("{}relay:active", self.key_prefix)
    }
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    async fn load(&self, stream_id: &str) -> Result<Option<RelaySessionState>> {
        let mut conn = self.redis.clone();
        let raw: Option<String> = conn.get(self.session_key(stream_id)).await?;
        raw.map(|json| serde_json::from_str(&json).map_err(Into::into))
            .transpose()
    }

    async fn save(&self, state: &RelaySessionState) -> Result<()> {
        let json = serde_json::to_string(state)?;
        let mut conn = self.redis.clone();
        let mut pipe = redis::pipe();
        pipe.atomic()
            .set(self.session_key(&state.stream_id), json)
            .ignore();
        if state.is_active() {
            pipe.sadd(self.active_key(), &state.stream_id).ignore();
        } else {
            pipe.srem(self.active_key(), &state.stream_id).ignore();
        }
        pipe.query_async::<()>(&mut conn).await?;

        debug!(
            stream_id = %state.stream_id,
            next_byte_offset = state.next_byte_offset,
            "Relay session saved"
        );
        Ok(())
    }

    async fn list_active(&self) -> Result<Vec<String>> {
        let mut conn = self.redis.clone();
        let mut ids: Vec<String> = conn.smembers(self.active_key()).await?;
        ids.sort();
        Ok(ids)
    }
}
